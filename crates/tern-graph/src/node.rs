// Node — One operation in a function's graph
//
// A Function is a flat list of nodes. Each node names its operation (`Op`),
// the ids of the nodes it reads (`inputs`), and the type of value it
// produces (`ty`). Ids are positions in the list and every input id is
// smaller than the consumer's, so list order is a valid execution order.
//
// `OpKind` is the payload-free tag of an `Op`. Backends answer support
// questions per (OpKind, ElemKind) without looking at payloads.

use std::fmt;

use tern_core::{Error, Result, Tensor, TensorType};

use crate::placeholder::Placeholder;

/// Position of a node inside its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Payload-free operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Input,
    Constant,
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    MatMul,
    Relu,
    Sigmoid,
    Tanh,
    Exp,
    Log,
    Neg,
    Reshape,
    Transpose,
    AddRelu,
    Save,
}

impl OpKind {
    pub fn is_elementwise_binary(&self) -> bool {
        matches!(
            self,
            OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div | OpKind::Max | OpKind::Min
        )
    }

    pub fn is_elementwise_unary(&self) -> bool {
        matches!(
            self,
            OpKind::Relu | OpKind::Sigmoid | OpKind::Tanh | OpKind::Exp | OpKind::Log | OpKind::Neg
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Input => "input",
            OpKind::Constant => "constant",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Max => "max",
            OpKind::Min => "min",
            OpKind::MatMul => "matmul",
            OpKind::Relu => "relu",
            OpKind::Sigmoid => "sigmoid",
            OpKind::Tanh => "tanh",
            OpKind::Exp => "exp",
            OpKind::Log => "log",
            OpKind::Neg => "neg",
            OpKind::Reshape => "reshape",
            OpKind::Transpose => "transpose",
            OpKind::AddRelu => "add_relu",
            OpKind::Save => "save",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node operation with its payload.
#[derive(Debug, Clone)]
pub enum Op {
    /// Read the tensor bound to a placeholder.
    Input(Placeholder),
    /// A value baked into the function.
    Constant(Tensor),
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    MatMul,
    Relu,
    Sigmoid,
    Tanh,
    Exp,
    Log,
    Neg,
    /// Target shape is the node's type.
    Reshape,
    Transpose,
    /// `relu(a + b)`, produced by the optimizer.
    AddRelu,
    /// Write the single input into a placeholder.
    Save(Placeholder),
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Input(_) => OpKind::Input,
            Op::Constant(_) => OpKind::Constant,
            Op::Add => OpKind::Add,
            Op::Sub => OpKind::Sub,
            Op::Mul => OpKind::Mul,
            Op::Div => OpKind::Div,
            Op::Max => OpKind::Max,
            Op::Min => OpKind::Min,
            Op::MatMul => OpKind::MatMul,
            Op::Relu => OpKind::Relu,
            Op::Sigmoid => OpKind::Sigmoid,
            Op::Tanh => OpKind::Tanh,
            Op::Exp => OpKind::Exp,
            Op::Log => OpKind::Log,
            Op::Neg => OpKind::Neg,
            Op::Reshape => OpKind::Reshape,
            Op::Transpose => OpKind::Transpose,
            Op::AddRelu => OpKind::AddRelu,
            Op::Save(_) => OpKind::Save,
        }
    }

    /// Placeholder read or written by this op, if any.
    pub fn placeholder(&self) -> Option<&Placeholder> {
        match self {
            Op::Input(ph) | Op::Save(ph) => Some(ph),
            _ => None,
        }
    }

    /// Compute this op's value from already-evaluated inputs.
    ///
    /// `Input` and `Save` touch a context and cannot be evaluated here;
    /// callers handle them before dispatching.
    pub fn evaluate(&self, inputs: &[&Tensor], ty: &TensorType) -> Result<Tensor> {
        let arg = |i: usize| -> Result<&Tensor> {
            inputs.get(i).copied().ok_or_else(|| {
                Error::msg(format!(
                    "{} expects {} inputs, got {}",
                    self.kind(),
                    i + 1,
                    inputs.len()
                ))
            })
        };

        match self {
            Op::Constant(t) => Ok(t.clone()),
            Op::Add => arg(0)?.add(arg(1)?),
            Op::Sub => arg(0)?.sub(arg(1)?),
            Op::Mul => arg(0)?.mul(arg(1)?),
            Op::Div => arg(0)?.div(arg(1)?),
            Op::Max => arg(0)?.maximum(arg(1)?),
            Op::Min => arg(0)?.minimum(arg(1)?),
            Op::MatMul => arg(0)?.matmul(arg(1)?),
            Op::Relu => arg(0)?.relu(),
            Op::Sigmoid => arg(0)?.sigmoid(),
            Op::Tanh => arg(0)?.tanh(),
            Op::Exp => arg(0)?.exp(),
            Op::Log => arg(0)?.log(),
            Op::Neg => arg(0)?.neg(),
            Op::Reshape => arg(0)?.reshape(ty.shape.clone()),
            Op::Transpose => arg(0)?.transpose(),
            Op::AddRelu => arg(0)?.add(arg(1)?)?.relu(),
            Op::Input(ph) | Op::Save(ph) => Err(Error::msg(format!(
                "{} of placeholder '{}' needs a context",
                self.kind(),
                ph.name()
            ))),
        }
    }
}

/// A single node: operation, operand ids, result type.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub op: Op,
    pub inputs: Vec<NodeId>,
    pub ty: TensorType,
}

impl Node {
    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::ElemKind;

    #[test]
    fn test_evaluate_add_relu() {
        let a = Tensor::from_f64_slice(&[1.0, -5.0], 2, ElemKind::Float).unwrap();
        let b = Tensor::from_f64_slice(&[1.0, 2.0], 2, ElemKind::Float).unwrap();
        let out = Op::AddRelu.evaluate(&[&a, &b], a.ty()).unwrap();
        assert_eq!(out.to_f64_vec(), vec![2.0, 0.0]);
    }

    #[test]
    fn test_evaluate_missing_input() {
        let a = Tensor::from_f64_slice(&[1.0], 1, ElemKind::Float).unwrap();
        assert!(Op::Add.evaluate(&[&a], a.ty()).is_err());
    }

    #[test]
    fn test_kind_classification() {
        assert!(OpKind::Max.is_elementwise_binary());
        assert!(OpKind::Log.is_elementwise_unary());
        assert!(!OpKind::MatMul.is_elementwise_binary());
    }
}
