// Optimizer — Graph rewrites run before a backend sees a function
//
// PASSES (in order):
//
//   1. Constant folding       — nodes whose inputs are all constants become
//                               constants
//   2. CSE                    — identical (op, inputs, type) nodes collapse;
//                               repeated reads of one placeholder collapse
//   3. Add+Relu fusion        — relu(add(a, b)) with a single-use add becomes
//                               one AddRelu node (inference only)
//   4. Dead code elimination  — nodes that do not reach a Save are dropped
//
// Every pass keeps the function's invariant that inputs precede their
// readers: folding rewrites a node in place, CSE only redirects readers to an
// earlier node, fusion reuses the add's (earlier) operands, and DCE keeps
// relative order.
//
// Training keeps operations distinct, so fusion is skipped in Train mode.

use std::collections::HashMap;
use std::fmt;

use tern_core::{Result, TensorType};

use crate::function::Function;
use crate::mode::CompilationMode;
use crate::node::{NodeId, Op, OpKind};
use crate::placeholder::PlaceholderId;

/// What the optimizer changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    /// Nodes replaced by constants.
    pub folded: usize,
    /// Nodes merged into an identical earlier node.
    pub merged: usize,
    /// Relu nodes fused with their add.
    pub fused: usize,
    /// Nodes removed as dead.
    pub removed: usize,
}

impl fmt::Display for OptimizeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} folded, {} merged, {} fused, {} removed",
            self.folded, self.merged, self.fused, self.removed
        )
    }
}

/// Optimize `function` in place for `mode`.
pub fn optimize(function: &mut Function, mode: CompilationMode) -> Result<OptimizeStats> {
    function.verify()?;
    let before = function.len();

    let mut stats = OptimizeStats {
        folded: fold_constants(function)?,
        merged: eliminate_common_subexpressions(function),
        ..Default::default()
    };
    if !mode.is_training() {
        stats.fused = fuse_add_relu(function);
    }
    stats.removed = eliminate_dead_code(function);

    log::debug!(
        "optimized '{}' for {}: {} -> {} nodes ({})",
        function.name(),
        mode,
        before,
        function.len(),
        stats
    );
    Ok(stats)
}

/// Replace computations over constants with their values.
pub fn fold_constants(function: &mut Function) -> Result<usize> {
    let mut folded = 0;
    for i in 0..function.len() {
        let node = &function.nodes()[i];
        if matches!(node.op, Op::Input(_) | Op::Save(_) | Op::Constant(_))
            || node.inputs.is_empty()
        {
            continue;
        }
        let mut args = Vec::with_capacity(node.inputs.len());
        for id in &node.inputs {
            match &function.node(*id).op {
                Op::Constant(t) => args.push(t),
                _ => break,
            }
        }
        if args.len() != node.inputs.len() {
            continue;
        }
        let value = node.op.evaluate(&args, &node.ty)?;
        log::trace!("folded '{}' ({}) in '{}'", node.name, node.kind(), function.name());

        let node = &mut function.nodes_mut()[i];
        node.op = Op::Constant(value);
        node.inputs.clear();
        folded += 1;
    }
    Ok(folded)
}

#[derive(PartialEq, Eq, Hash)]
struct NodeKey {
    kind: OpKind,
    inputs: Vec<NodeId>,
    ty: TensorType,
    placeholder: Option<PlaceholderId>,
}

/// Redirect readers of duplicate nodes to the first occurrence.
///
/// Constants and saves are never merged. Duplicates are left without readers
/// for dead code elimination to collect.
pub fn eliminate_common_subexpressions(function: &mut Function) -> usize {
    let mut seen: HashMap<NodeKey, NodeId> = HashMap::new();
    let mut merged = 0;
    for i in 0..function.len() {
        let node = &function.nodes()[i];
        if matches!(node.op, Op::Constant(_) | Op::Save(_)) {
            continue;
        }
        let key = NodeKey {
            kind: node.kind(),
            inputs: node.inputs.clone(),
            ty: node.ty.clone(),
            placeholder: node.op.placeholder().map(|ph| ph.id()),
        };
        match seen.get(&key) {
            Some(&first) => {
                function.replace_all_uses(NodeId(i), first);
                merged += 1;
            }
            None => {
                seen.insert(key, NodeId(i));
            }
        }
    }
    merged
}

/// Turn `relu(add(a, b))` into `add_relu(a, b)` when the add has no other
/// reader.
pub fn fuse_add_relu(function: &mut Function) -> usize {
    let uses = function.use_counts();
    let mut fused = 0;
    for i in 0..function.len() {
        let node = &function.nodes()[i];
        if node.kind() != OpKind::Relu {
            continue;
        }
        let src = node.inputs[0];
        let add = function.node(src);
        if add.kind() != OpKind::Add || uses[src.0] != 1 {
            continue;
        }
        let operands = add.inputs.clone();

        let node = &mut function.nodes_mut()[i];
        node.op = Op::AddRelu;
        node.inputs = operands;
        fused += 1;
    }
    fused
}

/// Drop every node that does not contribute to a Save.
pub fn eliminate_dead_code(function: &mut Function) -> usize {
    let mut keep = vec![false; function.len()];
    for i in (0..function.len()).rev() {
        let node = &function.nodes()[i];
        if node.kind() == OpKind::Save {
            keep[i] = true;
        }
        if keep[i] {
            for input in &node.inputs {
                keep[input.0] = true;
            }
        }
    }
    function.retain(&keep)
}
