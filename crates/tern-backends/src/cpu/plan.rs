// Plan — Lowering an optimized function to a flat instruction tape
//
// The CPU backend never walks the graph at run time. Compilation produces:
//
//   Instruction   — one pre-resolved step reading and writing buffer slots
//   Plan          — the tape, slot types, baked constants and statistics
//   CompileStats  — what lowering did
//
// MEMORY PLANNING:
//
//   Every computed value gets a slot. A slot is returned to a per-type free
//   list right after the last instruction that reads its value, so later
//   values of the same type reuse it. A destination slot is always taken
//   before the instruction's operands are released, so no instruction
//   writes a slot it also reads.
//
//   Once a slot is referenced for the last time anywhere on the tape, a
//   Free instruction releases its buffer.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use tern_core::{Error, Result, Tensor, TensorType};
use tern_graph::{Function, Op, Placeholder};

use super::kernels::{BinaryKernel, UnaryKernel};

/// A single step of the tape.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Copy the tensor bound to a placeholder into a slot.
    LoadInput { placeholder: Placeholder, dst: usize },
    /// Copy a baked constant into a slot.
    LoadConstant { constant: usize, dst: usize },
    Unary { op: UnaryKernel, src: usize, dst: usize },
    Binary { op: BinaryKernel, lhs: usize, rhs: usize, dst: usize },
    MatMul { lhs: usize, rhs: usize, dst: usize, m: usize, k: usize, n: usize },
    Reshape { src: usize, dst: usize },
    Transpose { src: usize, dst: usize, rows: usize, cols: usize },
    /// Write a slot into the placeholder's bound tensor.
    Store { src: usize, placeholder: Placeholder },
    /// Release a slot's buffer.
    Free { slot: usize },
}

impl Instruction {
    /// Slots read by this instruction.
    pub fn reads(&self) -> Vec<usize> {
        match self {
            Instruction::LoadInput { .. } | Instruction::LoadConstant { .. } => vec![],
            Instruction::Unary { src, .. }
            | Instruction::Reshape { src, .. }
            | Instruction::Transpose { src, .. }
            | Instruction::Store { src, .. } => vec![*src],
            Instruction::Binary { lhs, rhs, .. } | Instruction::MatMul { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            Instruction::Free { .. } => vec![],
        }
    }

    /// Slot written by this instruction, if any.
    pub fn writes(&self) -> Option<usize> {
        match self {
            Instruction::LoadInput { dst, .. }
            | Instruction::LoadConstant { dst, .. }
            | Instruction::Unary { dst, .. }
            | Instruction::Binary { dst, .. }
            | Instruction::MatMul { dst, .. }
            | Instruction::Reshape { dst, .. }
            | Instruction::Transpose { dst, .. } => Some(*dst),
            Instruction::Store { .. } | Instruction::Free { .. } => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::LoadInput { placeholder, dst } => {
                write!(f, "load_input @{} -> s{}", placeholder.name(), dst)
            }
            Instruction::LoadConstant { constant, dst } => {
                write!(f, "load_constant c{} -> s{}", constant, dst)
            }
            Instruction::Unary { op, src, dst } => {
                write!(f, "{} s{} -> s{}", op.as_str(), src, dst)
            }
            Instruction::Binary { op, lhs, rhs, dst } => {
                write!(f, "{} s{}, s{} -> s{}", op.as_str(), lhs, rhs, dst)
            }
            Instruction::MatMul { lhs, rhs, dst, m, k, n } => {
                write!(f, "matmul s{}, s{} -> s{} [{}x{}x{}]", lhs, rhs, dst, m, k, n)
            }
            Instruction::Reshape { src, dst } => write!(f, "reshape s{} -> s{}", src, dst),
            Instruction::Transpose { src, dst, rows, cols } => {
                write!(f, "transpose s{} -> s{} [{}x{}]", src, dst, rows, cols)
            }
            Instruction::Store { src, placeholder } => {
                write!(f, "store s{} -> @{}", src, placeholder.name())
            }
            Instruction::Free { slot } => write!(f, "free s{}", slot),
        }
    }
}

/// Statistics from lowering one function.
#[derive(Debug, Clone, Default)]
pub struct CompileStats {
    pub num_instructions: usize,
    pub num_source_nodes: usize,
    pub num_slots: usize,
    /// Values placed in a slot released by an earlier value.
    pub num_reused: usize,
    pub num_frees: usize,
    pub num_fused: usize,
    pub compile_time_us: u64,
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instructions ({} source nodes), {} slots ({} reused), \
             {} frees, {} fused, compiled in {}us",
            self.num_instructions,
            self.num_source_nodes,
            self.num_slots,
            self.num_reused,
            self.num_frees,
            self.num_fused,
            self.compile_time_us,
        )
    }
}

/// A lowered function.
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    pub instructions: Vec<Instruction>,
    /// Type of the values held by each slot.
    pub slot_types: Vec<TensorType>,
    /// Baked constants, named after their source nodes.
    pub constants: Vec<(String, Tensor)>,
    pub stats: CompileStats,
}

impl Plan {
    /// Lower `function`, which must already be optimized and verified.
    pub fn compile(function: &Function) -> Result<Self> {
        let start = Instant::now();
        let nodes = function.nodes();

        let mut last_use: Vec<Option<usize>> = vec![None; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for input in &node.inputs {
                last_use[input.0] = Some(i);
            }
        }

        let mut slot_of: Vec<Option<usize>> = vec![None; nodes.len()];
        let mut slot_types: Vec<TensorType> = Vec::new();
        let mut free: HashMap<TensorType, Vec<usize>> = HashMap::new();
        let mut constants = Vec::new();
        let mut instructions = Vec::with_capacity(nodes.len());
        let mut num_reused = 0;
        let mut num_fused = 0;

        for (i, node) in nodes.iter().enumerate() {
            let operand = |j: usize| -> Result<usize> {
                let id = node.inputs.get(j).ok_or_else(|| {
                    Error::msg(format!("node '{}' is missing operand {}", node.name, j))
                })?;
                slot_of[id.0].ok_or_else(|| {
                    Error::msg(format!("node '{}' reads {} which has no slot", node.name, id))
                })
            };

            if let Op::Save(ph) = &node.op {
                instructions.push(Instruction::Store {
                    src: operand(0)?,
                    placeholder: ph.clone(),
                });
            } else {
                let dst = match free.get_mut(&node.ty).and_then(Vec::pop) {
                    Some(slot) => {
                        num_reused += 1;
                        slot
                    }
                    None => {
                        slot_types.push(node.ty.clone());
                        slot_types.len() - 1
                    }
                };

                let instr = match &node.op {
                    Op::Input(ph) => Instruction::LoadInput {
                        placeholder: ph.clone(),
                        dst,
                    },
                    Op::Constant(t) => {
                        constants.push((node.name.clone(), t.clone()));
                        Instruction::LoadConstant {
                            constant: constants.len() - 1,
                            dst,
                        }
                    }
                    Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Max | Op::Min | Op::AddRelu => {
                        let op = match &node.op {
                            Op::Add => BinaryKernel::Add,
                            Op::Sub => BinaryKernel::Sub,
                            Op::Mul => BinaryKernel::Mul,
                            Op::Div => BinaryKernel::Div,
                            Op::Max => BinaryKernel::Max,
                            Op::Min => BinaryKernel::Min,
                            _ => {
                                num_fused += 1;
                                BinaryKernel::AddRelu
                            }
                        };
                        Instruction::Binary {
                            op,
                            lhs: operand(0)?,
                            rhs: operand(1)?,
                            dst,
                        }
                    }
                    Op::Relu | Op::Sigmoid | Op::Tanh | Op::Exp | Op::Log | Op::Neg => {
                        let op = match &node.op {
                            Op::Relu => UnaryKernel::Relu,
                            Op::Sigmoid => UnaryKernel::Sigmoid,
                            Op::Tanh => UnaryKernel::Tanh,
                            Op::Exp => UnaryKernel::Exp,
                            Op::Log => UnaryKernel::Log,
                            _ => UnaryKernel::Neg,
                        };
                        Instruction::Unary {
                            op,
                            src: operand(0)?,
                            dst,
                        }
                    }
                    Op::MatMul => {
                        let lhs_ty = function.ty(node.inputs[0])?;
                        let (m, k) = match lhs_ty.dims() {
                            &[m, k] => (m, k),
                            dims => {
                                return Err(Error::RankMismatch {
                                    expected: 2,
                                    got: dims.len(),
                                })
                            }
                        };
                        let n = node.ty.dims().get(1).copied().unwrap_or(0);
                        Instruction::MatMul {
                            lhs: operand(0)?,
                            rhs: operand(1)?,
                            dst,
                            m,
                            k,
                            n,
                        }
                    }
                    Op::Reshape => Instruction::Reshape {
                        src: operand(0)?,
                        dst,
                    },
                    Op::Transpose => {
                        let (cols, rows) = match node.ty.dims() {
                            &[c, r] => (c, r),
                            dims => {
                                return Err(Error::RankMismatch {
                                    expected: 2,
                                    got: dims.len(),
                                })
                            }
                        };
                        Instruction::Transpose {
                            src: operand(0)?,
                            dst,
                            rows,
                            cols,
                        }
                    }
                    Op::Save(_) => unreachable!("saves are lowered above"),
                };
                instructions.push(instr);
                slot_of[i] = Some(dst);

                if last_use[i].is_none() {
                    free.entry(node.ty.clone()).or_default().push(dst);
                }
            }

            let mut released: Vec<usize> = Vec::new();
            for input in &node.inputs {
                if last_use[input.0] == Some(i) && !released.contains(&input.0) {
                    released.push(input.0);
                    if let Some(slot) = slot_of[input.0] {
                        free.entry(nodes[input.0].ty.clone()).or_default().push(slot);
                    }
                }
            }
        }

        let num_frees = insert_frees(&mut instructions, slot_types.len());

        let stats = CompileStats {
            num_instructions: instructions.len(),
            num_source_nodes: nodes.len(),
            num_slots: slot_types.len(),
            num_reused,
            num_frees,
            num_fused,
            compile_time_us: start.elapsed().as_micros() as u64,
        };

        Ok(Plan {
            name: function.name().to_string(),
            instructions,
            slot_types,
            constants,
            stats,
        })
    }

    /// Textual listing of the tape.
    pub fn dump(&self) -> String {
        let mut out = format!("=== cpu: {} ===\n{}\n\n", self.name, self.stats);
        for (i, (name, t)) in self.constants.iter().enumerate() {
            out.push_str(&format!("  c{} = {} : {}\n", i, name, t.ty()));
        }
        for (i, ty) in self.slot_types.iter().enumerate() {
            out.push_str(&format!("  s{} : {}\n", i, ty));
        }
        for (i, instr) in self.instructions.iter().enumerate() {
            out.push_str(&format!("  [{:>3}] {}\n", i, instr));
        }
        out
    }
}

/// Insert a Free after the last instruction touching each slot, unless that
/// instruction ends the tape. Returns how many were inserted.
fn insert_frees(instructions: &mut Vec<Instruction>, num_slots: usize) -> usize {
    let mut last_touch: Vec<Option<usize>> = vec![None; num_slots];
    for (i, instr) in instructions.iter().enumerate() {
        for slot in instr.reads().into_iter().chain(instr.writes()) {
            last_touch[slot] = Some(i);
        }
    }

    let end = instructions.len().saturating_sub(1);
    let mut points: Vec<(usize, usize)> = last_touch
        .iter()
        .enumerate()
        .filter_map(|(slot, at)| at.filter(|&at| at < end).map(|at| (slot, at)))
        .collect();

    // Latest first so earlier insert positions stay valid.
    points.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
    for &(slot, at) in &points {
        instructions.insert(at + 1, Instruction::Free { slot });
    }
    points.len()
}
