use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::elem::{ElemKind, WithElemKind};
use crate::error::{Error, Result};
use crate::shape::Shape;

// Tensor — Dense values supplied by callers and produced by backends
//
// MEMORY MODEL:
//
//   The data lives behind Arc<RwLock<Vec<f64>>>. Cloning a Tensor is O(1)
//   and the clone shares storage with the original. That is what lets the
//   placeholder binders install a *reference* into a context: the caller
//   keeps its handle, the context keeps another, and an in-place write by a
//   compiled function is visible through both.
//
//   Values are stored as f64 regardless of ElemKind. Every constructor and
//   every operation coerces results into the kind's value domain, so an
//   Int8 tensor never holds 300.0 and a Float tensor never holds more than
//   f32 precision.
//
//   Shape and kind are fixed for the lifetime of a tensor. In-place updates
//   may change values only.

/// The element kind and shape of a value: what a placeholder expects and
/// what a tensor must have to be bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub kind: ElemKind,
    pub shape: Shape,
}

impl TensorType {
    pub fn new(kind: ElemKind, shape: impl Into<Shape>) -> Self {
        Self {
            kind,
            shape: shape.into(),
        }
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// Size of one value of this type in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.shape.elem_count() * self.kind.size_in_bytes()
    }

    /// Fail with the matching mismatch error unless `other` equals `self`.
    pub fn expect_eq(&self, other: &TensorType) -> Result<()> {
        if self.kind != other.kind {
            return Err(Error::ElemKindMismatch {
                expected: self.kind,
                got: other.kind,
            });
        }
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.kind, self.shape)
    }
}

struct TensorInner {
    storage: RwLock<Vec<f64>>,
    ty: TensorType,
}

/// A dense n-dimensional value.
///
/// # Example
/// ```
/// use tern_core::{ElemKind, Tensor};
///
/// let a = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0], 4).unwrap();
/// let b = Tensor::from_f64_slice(&[10.0, 20.0, 30.0, 40.0], 4, ElemKind::Float).unwrap();
/// let c = a.add(&b).unwrap();
/// assert_eq!(c.to_f64_vec(), vec![11.0, 22.0, 33.0, 44.0]);
/// ```
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor({})", self.inner.ty)
    }
}

impl Tensor {
    //  Construction

    /// Create a tensor taking ownership of `data`. Values are coerced into
    /// `kind`'s domain.
    pub fn from_vec(mut data: Vec<f64>, shape: impl Into<Shape>, kind: ElemKind) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        let expected = shape.elem_count();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        if kind != ElemKind::Double {
            data.iter_mut().for_each(|v| *v = kind.coerce(*v));
        }
        Ok(Tensor {
            inner: Arc::new(TensorInner {
                storage: RwLock::new(data),
                ty: TensorType { kind, shape },
            }),
        })
    }

    /// Create a tensor from an f64 slice, converting to `kind`.
    pub fn from_f64_slice(data: &[f64], shape: impl Into<Shape>, kind: ElemKind) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape, kind)
    }

    /// Create a tensor from a typed slice. The element kind follows `T`.
    pub fn from_slice<T: WithElemKind>(data: &[T], shape: impl Into<Shape>) -> Result<Self> {
        let values = data.iter().map(|&v| WithElemKind::to_f64(v)).collect();
        Self::from_vec(values, shape, T::KIND)
    }

    /// A zero-filled tensor of the given type.
    pub fn zeros(kind: ElemKind, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        let n = shape.elem_count();
        Self::from_vec(vec![0.0; n], shape, kind)
    }

    /// A zero-filled tensor matching `ty`.
    pub fn zeros_of(ty: &TensorType) -> Result<Self> {
        Self::zeros(ty.kind, ty.shape.clone())
    }

    //  Accessors

    pub fn ty(&self) -> &TensorType {
        &self.inner.ty
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.ty.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.inner.ty.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.inner.ty.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.inner.ty.shape.elem_count()
    }

    pub fn elem_kind(&self) -> ElemKind {
        self.inner.ty.kind
    }

    /// Read access to the raw values.
    pub fn data(&self) -> RwLockReadGuard<'_, Vec<f64>> {
        self.inner.storage.read().expect("tensor storage lock poisoned")
    }

    /// Copy the values out.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.data().clone()
    }

    /// Copy the values out as `T`. `T` must match the element kind.
    pub fn to_vec<T: WithElemKind>(&self) -> Result<Vec<T>> {
        if T::KIND != self.elem_kind() {
            return Err(Error::ElemKindMismatch {
                expected: self.elem_kind(),
                got: T::KIND,
            });
        }
        Ok(self.data().iter().map(|&v| T::from_f64(v)).collect())
    }

    /// A copy with its own storage.
    pub fn duplicate(&self) -> Result<Self> {
        Self::from_vec(self.to_f64_vec(), self.shape().clone(), self.elem_kind())
    }

    /// Whether two handles share the same storage.
    pub fn shares_storage_with(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Element-wise comparison within an absolute tolerance.
    pub fn approx_eq(&self, other: &Tensor, tol: f64) -> bool {
        if self.ty() != other.ty() {
            return false;
        }
        let a = self.data();
        let b = other.data();
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tol)
    }

    //  In-place updates

    /// Overwrite all values. Every handle sharing this storage sees the change.
    pub fn update_data_inplace(&self, new_data: &[f64]) -> Result<()> {
        let expected = self.elem_count();
        if new_data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape: self.shape().clone(),
                expected,
                got: new_data.len(),
            });
        }
        let kind = self.elem_kind();
        let mut guard = self
            .inner
            .storage
            .write()
            .expect("tensor storage lock poisoned");
        for (dst, &src) in guard.iter_mut().zip(new_data) {
            *dst = kind.coerce(src);
        }
        Ok(())
    }

    /// Copy the values of `src` into this tensor. Types must match.
    pub fn copy_from(&self, src: &Tensor) -> Result<()> {
        self.ty().expect_eq(src.ty())?;
        if self.shares_storage_with(src) {
            return Ok(());
        }
        let data = src.data();
        self.update_data_inplace(&data)
    }

    //  Slicing

    /// Take `len` rows along the leading dimension starting at `start`,
    /// wrapping around to row 0 past the end.
    pub fn rows_wrapping(&self, start: usize, len: usize) -> Result<Self> {
        let batch = self.shape().leading()?;
        if batch == 0 {
            return Err(Error::msg("cannot slice rows of a tensor with an empty leading dimension"));
        }
        let row = self.shape().row_len();
        let data = self.data();
        let mut out = Vec::with_capacity(len * row);
        for r in 0..len {
            let src = (start + r) % batch;
            out.extend_from_slice(&data[src * row..(src + 1) * row]);
        }
        let shape = self.shape().with_leading(len)?;
        Self::from_vec(out, shape, self.elem_kind())
    }

    //  Element-wise binary ops

    fn zip_map(&self, rhs: &Tensor, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        self.ty().expect_eq(rhs.ty())?;
        let out: Vec<f64> = {
            let a = self.data();
            let b = rhs.data();
            a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect()
        };
        Self::from_vec(out, self.shape().clone(), self.elem_kind())
    }

    pub fn add(&self, rhs: &Tensor) -> Result<Self> {
        self.zip_map(rhs, |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Tensor) -> Result<Self> {
        self.zip_map(rhs, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Tensor) -> Result<Self> {
        self.zip_map(rhs, |a, b| a * b)
    }

    /// Element-wise division. Integer kinds truncate toward zero.
    pub fn div(&self, rhs: &Tensor) -> Result<Self> {
        if self.elem_kind().is_float() {
            self.zip_map(rhs, |a, b| a / b)
        } else {
            self.zip_map(rhs, |a, b| (a / b).trunc())
        }
    }

    pub fn maximum(&self, rhs: &Tensor) -> Result<Self> {
        self.zip_map(rhs, f64::max)
    }

    pub fn minimum(&self, rhs: &Tensor) -> Result<Self> {
        self.zip_map(rhs, f64::min)
    }

    //  Element-wise unary ops

    fn map(&self, f: impl Fn(f64) -> f64) -> Result<Self> {
        let out: Vec<f64> = self.data().iter().map(|&v| f(v)).collect();
        Self::from_vec(out, self.shape().clone(), self.elem_kind())
    }

    pub fn neg(&self) -> Result<Self> {
        self.map(|v| -v)
    }

    pub fn relu(&self) -> Result<Self> {
        self.map(|v| v.max(0.0))
    }

    pub fn sigmoid(&self) -> Result<Self> {
        self.map(|v| 1.0 / (1.0 + (-v).exp()))
    }

    pub fn tanh(&self) -> Result<Self> {
        self.map(f64::tanh)
    }

    pub fn exp(&self) -> Result<Self> {
        self.map(f64::exp)
    }

    pub fn log(&self) -> Result<Self> {
        self.map(f64::ln)
    }

    //  Matrix ops

    /// Matrix product of two rank-2 tensors of the same kind.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Self> {
        let (m, k1) = matrix_dims(self)?;
        let (k2, n) = matrix_dims(rhs)?;
        if self.elem_kind() != rhs.elem_kind() {
            return Err(Error::ElemKindMismatch {
                expected: self.elem_kind(),
                got: rhs.elem_kind(),
            });
        }
        if k1 != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
        }
        let out = {
            let a = self.data();
            let b = rhs.data();
            matmul_rows(&a, &b, 0..m, k1, n)
        };
        Self::from_vec(out, (m, n), self.elem_kind())
    }

    /// Transpose of a rank-2 tensor.
    pub fn transpose(&self) -> Result<Self> {
        let (rows, cols) = matrix_dims(self)?;
        let data = self.data();
        let mut out = vec![0.0; rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                out[c * rows + r] = data[r * cols + c];
            }
        }
        Self::from_vec(out, (cols, rows), self.elem_kind())
    }

    /// Same values, new shape. Element counts must agree.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.elem_count() != self.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                shape,
                got: self.elem_count(),
            });
        }
        Self::from_vec(self.to_f64_vec(), shape, self.elem_kind())
    }
}

/// `(rows, cols)` of a rank-2 tensor.
pub fn matrix_dims(t: &Tensor) -> Result<(usize, usize)> {
    match t.dims() {
        &[r, c] => Ok((r, c)),
        dims => Err(Error::RankMismatch {
            expected: 2,
            got: dims.len(),
        }),
    }
}

/// Compute output rows `rows` of `a[m x k] @ b[k x n]`, row-major.
///
/// Exposed so backends can split the row range across threads.
pub fn matmul_rows(
    a: &[f64],
    b: &[f64],
    rows: std::ops::Range<usize>,
    k: usize,
    n: usize,
) -> Vec<f64> {
    let mut out = vec![0.0; rows.len() * n];
    for (oi, i) in rows.enumerate() {
        let out_row = &mut out[oi * n..(oi + 1) * n];
        for p in 0..k {
            let aip = a[i * k + p];
            if aip == 0.0 {
                continue;
            }
            let b_row = &b[p * n..(p + 1) * n];
            for (o, &bv) in out_row.iter_mut().zip(b_row) {
                *o += aip * bv;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(data: &[f64], shape: impl Into<Shape>) -> Tensor {
        Tensor::from_f64_slice(data, shape, ElemKind::Double).unwrap()
    }

    #[test]
    fn test_clone_shares_storage() {
        let a = t(&[1.0, 2.0], 2);
        let b = a.clone();
        b.update_data_inplace(&[5.0, 6.0]).unwrap();
        assert!(a.shares_storage_with(&b));
        assert_eq!(a.to_f64_vec(), vec![5.0, 6.0]);
    }

    #[test]
    fn test_element_count_checked() {
        let err = Tensor::from_f64_slice(&[1.0, 2.0, 3.0], (2, 2), ElemKind::Float).unwrap_err();
        assert!(matches!(err, Error::ElementCountMismatch { expected: 4, got: 3, .. }));
    }

    #[test]
    fn test_binary_requires_same_type() {
        let a = t(&[1.0, 2.0], 2);
        let b = t(&[1.0, 2.0, 3.0], 3);
        assert!(matches!(a.add(&b), Err(Error::ShapeMismatch { .. })));
        let c = Tensor::from_f64_slice(&[1.0, 2.0], 2, ElemKind::Float).unwrap();
        assert!(matches!(a.add(&c), Err(Error::ElemKindMismatch { .. })));
    }

    #[test]
    fn test_integer_division_truncates() {
        let a = Tensor::from_slice(&[7i32, -7], 2).unwrap();
        let b = Tensor::from_slice(&[2i32, 2], 2).unwrap();
        assert_eq!(a.div(&b).unwrap().to_vec::<i32>().unwrap(), vec![3, -3]);
    }

    #[test]
    fn test_int8_saturates_after_op() {
        let a = Tensor::from_slice(&[100i8], 1).unwrap();
        assert_eq!(a.add(&a).unwrap().to_vec::<i8>().unwrap(), vec![127]);
    }

    #[test]
    fn test_matmul() {
        let a = t(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        let b = t(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], (3, 2));
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.dims(), &[2, 2]);
        assert_eq!(c.to_f64_vec(), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_inner_dim_mismatch() {
        let a = t(&[1.0; 6], (2, 3));
        let err = a.matmul(&a).unwrap_err();
        assert!(matches!(err, Error::MatmulShapeMismatch { k1: 3, k2: 2, .. }));
    }

    #[test]
    fn test_transpose() {
        let a = t(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        let at = a.transpose().unwrap();
        assert_eq!(at.dims(), &[3, 2]);
        assert_eq!(at.to_f64_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_rows_wrapping() {
        let data: Vec<f64> = (0..8).map(|v| v as f64).collect();
        let a = t(&data, (4, 2));
        let s = a.rows_wrapping(3, 2).unwrap();
        assert_eq!(s.dims(), &[2, 2]);
        assert_eq!(s.to_f64_vec(), vec![6.0, 7.0, 0.0, 1.0]);
    }

    #[test]
    fn test_copy_from_checks_type() {
        let a = t(&[0.0, 0.0], 2);
        let b = t(&[1.0, 2.0], 2);
        a.copy_from(&b).unwrap();
        assert_eq!(a.to_f64_vec(), vec![1.0, 2.0]);
        assert!(a.copy_from(&t(&[1.0], 1)).is_err());
    }
}
