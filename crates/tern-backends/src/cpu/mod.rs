// CPU — Native backend: instruction tape, rayon kernels, bundle export
//
// Compilation lowers an optimized function into a [`Plan`]; execution runs
// the tape over a table of reusable f64 buffers and writes results into the
// context. The same plan drives bundle export, which lays out constants,
// placeholders and activations in three aligned memory regions.
//
// Only float and double values are supported, and only inference.

mod bundle;
mod kernels;
mod plan;

use std::path::Path;

use tern_core::{ElemKind, Error, Result};
use tern_graph::{CompilationMode, Context, Function, OpKind, Placeholder};

use crate::backend::{
    check_supported, load_input, store_output_values, Backend, BackendKind, CompiledFunction,
};

pub use bundle::{read_weights, BundleInfo, WeightEntry, WeightsHeader};
pub use kernels::{BinaryKernel, UnaryKernel};
pub use plan::{CompileStats, Instruction, Plan};

/// Tuning knobs for the CPU backend.
#[derive(Debug, Clone)]
pub struct CpuConfig {
    /// Output size, in elements, from which kernels split work across the
    /// rayon pool.
    pub parallel_threshold: usize,
    /// Alignment, in bytes, of every buffer in an exported bundle.
    pub alignment: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 4096,
            alignment: 64,
        }
    }
}

impl CpuConfig {
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(1);
        self
    }

    /// Set bundle alignment. Rounded up to a power of two.
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment.max(1).next_power_of_two();
        self
    }
}

/// The native backend.
#[derive(Debug, Default, Clone)]
pub struct CpuBackend {
    config: CpuConfig,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CpuConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    fn lower(&self, function: &Function, mode: CompilationMode) -> Result<Plan> {
        if mode.is_training() {
            return Err(Error::BackendCompile {
                function: function.name().to_string(),
                reason: format!("{} backend only compiles for inference", self.kind()),
            });
        }
        check_supported(self, function)?;
        Plan::compile(function).map_err(|e| e.in_compile(function.name()))
    }

    /// Write a bundle and report where everything went.
    pub fn save_bundle(
        &self,
        function: &Function,
        mode: CompilationMode,
        output_dir: &Path,
        network_name: &str,
    ) -> Result<BundleInfo> {
        bundle::validate_network_name(network_name)?;
        let plan = self.lower(function, mode)?;
        let info = bundle::write_bundle(&plan, output_dir, network_name, self.config.alignment)?;
        log::info!(
            "cpu: saved bundle '{}' for '{}' into {} \
             ({} constant, {} mutable, {} activation bytes)",
            network_name,
            function.name(),
            output_dir.display(),
            info.constant_mem_size,
            info.mutable_mem_size,
            info.activations_mem_size
        );
        Ok(info)
    }
}

impl Backend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn is_op_supported(&self, _op: OpKind, elem: ElemKind) -> bool {
        matches!(elem, ElemKind::Float | ElemKind::Double)
    }

    fn compile(
        &self,
        function: &Function,
        mode: CompilationMode,
    ) -> Result<Box<dyn CompiledFunction>> {
        let plan = self.lower(function, mode)?;
        log::debug!("cpu: compiled '{}': {}", plan.name, plan.stats);
        Ok(Box::new(CpuFunction {
            plan,
            parallel_threshold: self.config.parallel_threshold,
        }))
    }

    fn supports_bundles(&self) -> bool {
        true
    }

    fn save(
        &self,
        function: &Function,
        mode: CompilationMode,
        output_dir: &Path,
        network_name: &str,
    ) -> Result<()> {
        self.save_bundle(function, mode, output_dir, network_name)
            .map(|_| ())
    }
}

/// A function lowered to a CPU tape.
#[derive(Debug)]
pub struct CpuFunction {
    plan: Plan,
    parallel_threshold: usize,
}

impl CpuFunction {
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn stats(&self) -> &CompileStats {
        &self.plan.stats
    }

    fn run(&self, ctx: &mut Context) -> Result<()> {
        let threshold = self.parallel_threshold;
        let mut slots: Vec<Option<Vec<f64>>> = vec![None; self.plan.slot_types.len()];
        // Written back after the whole tape has run.
        let mut stores: Vec<(&Placeholder, Vec<f64>)> = Vec::new();

        for instr in &self.plan.instructions {
            log::trace!("cpu: {}: {}", self.plan.name, instr);
            if let Instruction::Free { slot } = instr {
                slots[*slot] = None;
                continue;
            }
            if let Instruction::Store { src, placeholder } = instr {
                stores.push((placeholder, read(&slots, *src)?.to_vec()));
                continue;
            }

            let dst = instr
                .writes()
                .ok_or_else(|| Error::msg(format!("instruction '{instr}' has no destination")))?;
            let kind = self.plan.slot_types[dst].kind;
            let mut out = slots[dst].take().unwrap_or_default();
            match instr {
                Instruction::LoadInput { placeholder, .. } => {
                    let t = load_input(ctx, placeholder)?;
                    kernels::copy(&t.data(), &mut out);
                }
                Instruction::LoadConstant { constant, .. } => {
                    let (_, t) = &self.plan.constants[*constant];
                    kernels::copy(&t.data(), &mut out);
                }
                Instruction::Unary { op, src, .. } => {
                    kernels::unary(*op, read(&slots, *src)?, &mut out, kind, threshold);
                }
                Instruction::Binary { op, lhs, rhs, .. } => {
                    let (a, b) = (read(&slots, *lhs)?, read(&slots, *rhs)?);
                    kernels::binary(*op, a, b, &mut out, kind, threshold);
                }
                Instruction::MatMul { lhs, rhs, m, k, n, .. } => {
                    let (a, b) = (read(&slots, *lhs)?, read(&slots, *rhs)?);
                    kernels::matmul(a, b, &mut out, (*m, *k, *n), kind, threshold);
                }
                Instruction::Reshape { src, .. } => {
                    kernels::copy(read(&slots, *src)?, &mut out);
                }
                Instruction::Transpose { src, rows, cols, .. } => {
                    kernels::transpose(read(&slots, *src)?, &mut out, *rows, *cols);
                }
                Instruction::Store { .. } | Instruction::Free { .. } => {}
            }
            slots[dst] = Some(out);
        }

        for (placeholder, values) in stores {
            store_output_values(ctx, placeholder, &values)?;
        }
        Ok(())
    }
}

impl CompiledFunction for CpuFunction {
    fn name(&self) -> &str {
        &self.plan.name
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn execute(&self, ctx: &mut Context) -> Result<()> {
        self.run(ctx).map_err(|e| e.in_execution(&self.plan.name))
    }

    fn dump(&self) -> String {
        self.plan.dump()
    }
}

fn read(slots: &[Option<Vec<f64>>], idx: usize) -> Result<&[f64]> {
    slots
        .get(idx)
        .and_then(|s| s.as_deref())
        .ok_or_else(|| {
            Error::msg(format!(
                "buffer slot {} is empty (value was freed or never produced)",
                idx
            ))
        })
}
