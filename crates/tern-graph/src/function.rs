// Function — A named computation graph, the unit of compilation
//
// Functions are built through typed builder methods that check operand
// types as nodes are appended:
//
//   let x = module.create_placeholder(ElemKind::Float, 4, "x", false)?;
//   let y = module.create_placeholder(ElemKind::Float, 4, "y", false)?;
//   let z = module.create_placeholder(ElemKind::Float, 4, "z", false)?;
//   let f = module.create_function("add")?;
//   let xv = f.input(&x)?;
//   let yv = f.input(&y)?;
//   let sum = f.add("sum", xv, yv)?;
//   f.save("ret", sum, &z)?;
//
// Nodes are append-only for callers. The optimizer rewrites them in place
// through crate-private helpers that preserve the topological invariant.

use std::collections::HashSet;
use std::fmt::Write as _;

use tern_core::{Error, Result, Shape, Tensor, TensorType};

use crate::node::{Node, NodeId, Op, OpKind};
use crate::placeholder::{ModuleId, Placeholder, PlaceholderId};

/// A named computation graph inside a module.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    module: ModuleId,
    nodes: Vec<Node>,
}

impl Function {
    pub(crate) fn new(name: String, module: ModuleId) -> Self {
        Self {
            name,
            module,
            nodes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Type of the value produced by `id`.
    pub fn ty(&self, id: NodeId) -> Result<&TensorType> {
        self.nodes
            .get(id.0)
            .map(|n| &n.ty)
            .ok_or_else(|| Error::msg(format!("node {} does not exist in '{}'", id, self.name)))
    }

    /// Placeholders read by this function, in node order, without repeats.
    pub fn input_placeholders(&self) -> Vec<&Placeholder> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .filter_map(|n| match &n.op {
                Op::Input(ph) if seen.insert(ph.id()) => Some(ph),
                _ => None,
            })
            .collect()
    }

    /// Placeholders written by this function, in node order.
    pub fn output_placeholders(&self) -> Vec<&Placeholder> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.op {
                Op::Save(ph) => Some(ph),
                _ => None,
            })
            .collect()
    }

    /// Count nodes of a given kind.
    pub fn count_kind(&self, kind: OpKind) -> usize {
        self.nodes.iter().filter(|n| n.kind() == kind).count()
    }

    //  Builders

    fn push(
        &mut self,
        name: impl Into<String>,
        op: Op,
        inputs: Vec<NodeId>,
        ty: TensorType,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.into(),
            op,
            inputs,
            ty,
        });
        id
    }

    fn check_placeholder(&self, ph: &Placeholder) -> Result<()> {
        if ph.id().module() != self.module {
            return Err(Error::UnknownPlaceholder {
                name: ph.name().to_string(),
            });
        }
        Ok(())
    }

    /// Read the tensor bound to `ph` at run time.
    pub fn input(&mut self, ph: &Placeholder) -> Result<NodeId> {
        self.check_placeholder(ph)?;
        let ty = ph.ty().clone();
        Ok(self.push(ph.name(), Op::Input(ph.clone()), vec![], ty))
    }

    /// Embed a constant value.
    pub fn constant(&mut self, name: impl Into<String>, value: Tensor) -> NodeId {
        let ty = value.ty().clone();
        self.push(name, Op::Constant(value), vec![], ty)
    }

    fn binary(
        &mut self,
        name: impl Into<String>,
        op: Op,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<NodeId> {
        let lt = self.ty(lhs)?.clone();
        lt.expect_eq(self.ty(rhs)?)?;
        Ok(self.push(name, op, vec![lhs, rhs], lt))
    }

    fn unary(&mut self, name: impl Into<String>, op: Op, src: NodeId) -> Result<NodeId> {
        let ty = self.ty(src)?.clone();
        Ok(self.push(name, op, vec![src], ty))
    }

    pub fn add(&mut self, name: impl Into<String>, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
        self.binary(name, Op::Add, lhs, rhs)
    }

    pub fn sub(&mut self, name: impl Into<String>, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
        self.binary(name, Op::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, name: impl Into<String>, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
        self.binary(name, Op::Mul, lhs, rhs)
    }

    pub fn div(&mut self, name: impl Into<String>, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
        self.binary(name, Op::Div, lhs, rhs)
    }

    pub fn max(&mut self, name: impl Into<String>, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
        self.binary(name, Op::Max, lhs, rhs)
    }

    pub fn min(&mut self, name: impl Into<String>, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
        self.binary(name, Op::Min, lhs, rhs)
    }

    /// Matrix product of two rank-2 values.
    pub fn matmul(&mut self, name: impl Into<String>, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
        let lt = self.ty(lhs)?.clone();
        let rt = self.ty(rhs)?.clone();
        if lt.kind != rt.kind {
            return Err(Error::ElemKindMismatch {
                expected: lt.kind,
                got: rt.kind,
            });
        }
        let (m, k1) = rank2(&lt.shape)?;
        let (k2, n) = rank2(&rt.shape)?;
        if k1 != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
        }
        Ok(self.push(name, Op::MatMul, vec![lhs, rhs], TensorType::new(lt.kind, (m, n))))
    }

    pub fn relu(&mut self, name: impl Into<String>, src: NodeId) -> Result<NodeId> {
        self.unary(name, Op::Relu, src)
    }

    pub fn sigmoid(&mut self, name: impl Into<String>, src: NodeId) -> Result<NodeId> {
        self.unary(name, Op::Sigmoid, src)
    }

    pub fn tanh(&mut self, name: impl Into<String>, src: NodeId) -> Result<NodeId> {
        self.unary(name, Op::Tanh, src)
    }

    pub fn exp(&mut self, name: impl Into<String>, src: NodeId) -> Result<NodeId> {
        self.unary(name, Op::Exp, src)
    }

    pub fn log(&mut self, name: impl Into<String>, src: NodeId) -> Result<NodeId> {
        self.unary(name, Op::Log, src)
    }

    pub fn neg(&mut self, name: impl Into<String>, src: NodeId) -> Result<NodeId> {
        self.unary(name, Op::Neg, src)
    }

    /// Same values under a new shape with the same element count.
    pub fn reshape(
        &mut self,
        name: impl Into<String>,
        src: NodeId,
        shape: impl Into<Shape>,
    ) -> Result<NodeId> {
        let st = self.ty(src)?.clone();
        let shape = shape.into();
        shape.validate()?;
        if shape.elem_count() != st.shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                shape,
                got: st.shape.elem_count(),
            });
        }
        Ok(self.push(name, Op::Reshape, vec![src], TensorType::new(st.kind, shape)))
    }

    /// Transpose of a rank-2 value.
    pub fn transpose(&mut self, name: impl Into<String>, src: NodeId) -> Result<NodeId> {
        let st = self.ty(src)?.clone();
        let (r, c) = rank2(&st.shape)?;
        Ok(self.push(name, Op::Transpose, vec![src], TensorType::new(st.kind, (c, r))))
    }

    /// Write `value` into `ph` when the function runs.
    pub fn save(
        &mut self,
        name: impl Into<String>,
        value: NodeId,
        ph: &Placeholder,
    ) -> Result<NodeId> {
        self.check_placeholder(ph)?;
        ph.ty().expect_eq(self.ty(value)?)?;
        if self.output_placeholders().iter().any(|p| p.id() == ph.id()) {
            return Err(Error::msg(format!(
                "placeholder '{}' is already saved by '{}'",
                ph.name(),
                self.name
            )));
        }
        Ok(self.push(name, Op::Save(ph.clone()), vec![value], ph.ty().clone()))
    }

    //  Checks and printing

    /// Check that every input refers to an earlier node and that saves
    /// target distinct placeholders.
    pub fn verify(&self) -> Result<()> {
        let mut saved: HashSet<PlaceholderId> = HashSet::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(bad) = node.inputs.iter().find(|id| id.0 >= i) {
                return Err(Error::msg(format!(
                    "node '{}' ({}) in '{}' reads {} which is not defined before it",
                    node.name,
                    NodeId(i),
                    self.name,
                    bad
                )));
            }
            if let Op::Save(ph) = &node.op {
                if !saved.insert(ph.id()) {
                    return Err(Error::msg(format!(
                        "placeholder '{}' is saved twice in '{}'",
                        ph.name(),
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Human-readable listing of the graph.
    pub fn dump(&self) -> String {
        let mut out = format!("function {} {{\n", self.name);
        for (i, node) in self.nodes.iter().enumerate() {
            let args: Vec<String> = node.inputs.iter().map(|id| id.to_string()).collect();
            let _ = write!(out, "  {} = {}", NodeId(i), node.kind());
            match &node.op {
                Op::Input(ph) => {
                    let _ = write!(out, " @{}", ph.name());
                }
                Op::Save(ph) => {
                    let _ = write!(out, " {} -> @{}", args.join(", "), ph.name());
                }
                _ if !args.is_empty() => {
                    let _ = write!(out, " {}", args.join(", "));
                }
                _ => {}
            }
            let _ = writeln!(out, " : {}  // {}", node.ty, node.name);
        }
        out.push('}');
        out
    }

    //  Optimizer support

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    /// Redirect every read of `from` to `to`. `to` must precede all readers.
    pub(crate) fn replace_all_uses(&mut self, from: NodeId, to: NodeId) {
        for node in &mut self.nodes {
            for input in &mut node.inputs {
                if *input == from {
                    *input = to;
                }
            }
        }
    }

    /// Number of nodes reading each node.
    pub(crate) fn use_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.nodes.len()];
        for node in &self.nodes {
            for input in &node.inputs {
                counts[input.0] += 1;
            }
        }
        counts
    }

    /// Drop nodes whose `keep` flag is false, renumbering the rest in order.
    /// Kept nodes must not read dropped ones.
    pub(crate) fn retain(&mut self, keep: &[bool]) -> usize {
        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut next = 0;
        for (i, &k) in keep.iter().enumerate() {
            if k {
                remap[i] = next;
                next += 1;
            }
        }
        let before = self.nodes.len();
        let old = std::mem::take(&mut self.nodes);
        self.nodes = old
            .into_iter()
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|(mut node, _)| {
                for input in &mut node.inputs {
                    *input = NodeId(remap[input.0]);
                }
                node
            })
            .collect();
        before - self.nodes.len()
    }
}

fn rank2(shape: &Shape) -> Result<(usize, usize)> {
    match shape.dims() {
        &[r, c] => Ok((r, c)),
        dims => Err(Error::RankMismatch {
            expected: 2,
            got: dims.len(),
        }),
    }
}
