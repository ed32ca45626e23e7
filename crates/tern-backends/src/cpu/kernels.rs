// Kernels for the CPU tape.
//
// Every kernel writes into a caller-provided buffer, resizing it to the
// output length, and rounds results to the output element kind. Work is
// split across the rayon pool once the output reaches `threshold` elements.

use rayon::prelude::*;

use tern_core::tensor::matmul_rows;
use tern_core::ElemKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKernel {
    Neg,
    Relu,
    Sigmoid,
    Tanh,
    Exp,
    Log,
}

impl UnaryKernel {
    #[inline]
    fn apply(self, v: f64) -> f64 {
        match self {
            UnaryKernel::Neg => -v,
            UnaryKernel::Relu => v.max(0.0),
            UnaryKernel::Sigmoid => 1.0 / (1.0 + (-v).exp()),
            UnaryKernel::Tanh => v.tanh(),
            UnaryKernel::Exp => v.exp(),
            UnaryKernel::Log => v.ln(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryKernel::Neg => "neg",
            UnaryKernel::Relu => "relu",
            UnaryKernel::Sigmoid => "sigmoid",
            UnaryKernel::Tanh => "tanh",
            UnaryKernel::Exp => "exp",
            UnaryKernel::Log => "log",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKernel {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    /// `relu(a + b)`
    AddRelu,
}

impl BinaryKernel {
    #[inline]
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryKernel::Add => a + b,
            BinaryKernel::Sub => a - b,
            BinaryKernel::Mul => a * b,
            BinaryKernel::Div => a / b,
            BinaryKernel::Max => a.max(b),
            BinaryKernel::Min => a.min(b),
            BinaryKernel::AddRelu => (a + b).max(0.0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryKernel::Add => "add",
            BinaryKernel::Sub => "sub",
            BinaryKernel::Mul => "mul",
            BinaryKernel::Div => "div",
            BinaryKernel::Max => "max",
            BinaryKernel::Min => "min",
            BinaryKernel::AddRelu => "add_relu",
        }
    }
}

pub fn unary(op: UnaryKernel, src: &[f64], dst: &mut Vec<f64>, kind: ElemKind, threshold: usize) {
    dst.resize(src.len(), 0.0);
    let f = |(o, &v): (&mut f64, &f64)| *o = kind.coerce(op.apply(v));
    if src.len() >= threshold {
        dst.par_iter_mut().zip(src.par_iter()).for_each(f);
    } else {
        dst.iter_mut().zip(src.iter()).for_each(f);
    }
}

pub fn binary(
    op: BinaryKernel,
    lhs: &[f64],
    rhs: &[f64],
    dst: &mut Vec<f64>,
    kind: ElemKind,
    threshold: usize,
) {
    dst.resize(lhs.len(), 0.0);
    let f = |(o, (&a, &b)): (&mut f64, (&f64, &f64))| *o = kind.coerce(op.apply(a, b));
    if lhs.len() >= threshold {
        dst.par_iter_mut()
            .zip(lhs.par_iter().zip(rhs.par_iter()))
            .for_each(f);
    } else {
        dst.iter_mut().zip(lhs.iter().zip(rhs.iter())).for_each(f);
    }
}

/// `dst[m x n] = lhs[m x k] @ rhs[k x n]`, split by output rows.
pub fn matmul(
    lhs: &[f64],
    rhs: &[f64],
    dst: &mut Vec<f64>,
    (m, k, n): (usize, usize, usize),
    kind: ElemKind,
    threshold: usize,
) {
    dst.resize(m * n, 0.0);
    if m * n >= threshold && m > 1 && n > 0 {
        dst.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            let out = matmul_rows(lhs, rhs, i..i + 1, k, n);
            for (o, v) in row.iter_mut().zip(out) {
                *o = kind.coerce(v);
            }
        });
    } else {
        let out = matmul_rows(lhs, rhs, 0..m, k, n);
        for (o, v) in dst.iter_mut().zip(out) {
            *o = kind.coerce(v);
        }
    }
}

/// `dst[cols x rows] = src[rows x cols]^T`
pub fn transpose(src: &[f64], dst: &mut Vec<f64>, rows: usize, cols: usize) {
    dst.resize(rows * cols, 0.0);
    for r in 0..rows {
        for c in 0..cols {
            dst[c * rows + r] = src[r * cols + c];
        }
    }
}

pub fn copy(src: &[f64], dst: &mut Vec<f64>) {
    dst.clear();
    dst.extend_from_slice(src);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_matches_serial() {
        let a: Vec<f64> = (0..64).map(|i| i as f64 * 0.5 - 3.0).collect();
        let b: Vec<f64> = (0..64).map(|i| (i % 7) as f64).collect();
        let mut serial = Vec::new();
        let mut parallel = Vec::new();
        binary(BinaryKernel::AddRelu, &a, &b, &mut serial, ElemKind::Double, usize::MAX);
        binary(BinaryKernel::AddRelu, &a, &b, &mut parallel, ElemKind::Double, 1);
        assert_eq!(serial, parallel);

        let mut ms = Vec::new();
        let mut mp = Vec::new();
        matmul(&a, &b, &mut ms, (8, 8, 8), ElemKind::Double, usize::MAX);
        matmul(&a, &b, &mut mp, (8, 8, 8), ElemKind::Double, 1);
        assert_eq!(ms, mp);
    }

    #[test]
    fn test_float_results_are_rounded() {
        let mut out = Vec::new();
        unary(UnaryKernel::Exp, &[0.1], &mut out, ElemKind::Float, usize::MAX);
        assert_eq!(out[0], (0.1f64.exp() as f32) as f64);
    }

    #[test]
    fn test_transpose() {
        let mut out = Vec::new();
        transpose(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &mut out, 2, 3);
        assert_eq!(out, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}
