// Backend — The code generator behind the engine
//
// A Backend turns an optimized Function into a CompiledFunction and answers
// whether it can handle a given (operation kind, element kind) pair. Some
// backends can also write a standalone bundle for ahead-of-time use.
//
//   Backend           — factory: support queries, compile, optional save
//   CompiledFunction  — opaque artifact: execute against a Context
//   BackendKind       — finite tag used by the by-kind installation path
//
// The engine owns every CompiledFunction a backend returns. Backends keep no
// per-function state, so replacing a backend never leaves a compiled
// artifact pointing at freed backend resources.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tern_core::{ElemKind, Error, Result, Tensor};
use tern_graph::{CompilationMode, Context, Function, Placeholder};

use crate::cpu::CpuBackend;
use crate::interpreter::InterpreterBackend;

/// Identifies a backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// Walks the optimized graph node by node on every run.
    #[default]
    Interpreter,
    /// Compiles to a flat instruction tape with planned buffers and can
    /// export standalone bundles.
    Cpu,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Interpreter => "interpreter",
            BackendKind::Cpu => "cpu",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "interpreter" | "interp" => Ok(BackendKind::Interpreter),
            "cpu" | "native" => Ok(BackendKind::Cpu),
            other => Err(Error::msg(format!("unknown backend kind '{other}'"))),
        }
    }
}

/// A code generator.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// Whether `op` on values of `elem` can be compiled. Pure.
    fn is_op_supported(&self, op: tern_graph::OpKind, elem: ElemKind) -> bool;

    /// Produce an executable artifact for an optimized function.
    ///
    /// Fails with [`Error::BackendCompile`] when the function holds an
    /// unsupported operation or the backend rejects `mode`.
    fn compile(
        &self,
        function: &Function,
        mode: CompilationMode,
    ) -> Result<Box<dyn CompiledFunction>>;

    /// Whether [`Backend::save`] is implemented.
    fn supports_bundles(&self) -> bool {
        false
    }

    /// Write a standalone bundle for `function` into `output_dir`. Every file
    /// name starts with `network_name`, which is also the entry symbol.
    fn save(
        &self,
        _function: &Function,
        _mode: CompilationMode,
        _output_dir: &Path,
        _network_name: &str,
    ) -> Result<()> {
        Err(Error::BundleUnsupported {
            backend: self.kind().to_string(),
        })
    }
}

/// A backend-produced artifact, executable against a context.
pub trait CompiledFunction: Send + Sync + fmt::Debug {
    /// Name of the function this was compiled from.
    fn name(&self) -> &str;

    /// The backend kind that produced it.
    fn backend_kind(&self) -> BackendKind;

    /// Run once: read inputs from `ctx`, write outputs into `ctx`.
    ///
    /// Failures are reported as [`Error::Execution`].
    fn execute(&self, ctx: &mut Context) -> Result<()>;

    /// Human-readable listing of what will execute.
    fn dump(&self) -> String;
}

/// Construct a fresh backend of the given kind with default settings.
pub fn create_backend(kind: BackendKind) -> Box<dyn Backend> {
    match kind {
        BackendKind::Interpreter => Box::new(InterpreterBackend::new()),
        BackendKind::Cpu => Box::new(CpuBackend::new()),
    }
}

// Helpers shared by backends

/// Fail unless `backend` supports every node of `function`.
pub fn check_supported(backend: &dyn Backend, function: &Function) -> Result<()> {
    for node in function.nodes() {
        if !backend.is_op_supported(node.kind(), node.ty.kind) {
            return Err(Error::BackendCompile {
                function: function.name().to_string(),
                reason: format!(
                    "{} backend does not support {} on {} (node '{}')",
                    backend.kind(),
                    node.kind(),
                    node.ty.kind,
                    node.name
                ),
            });
        }
    }
    Ok(())
}

/// Fetch the tensor bound to `ph`, checking it matches the placeholder.
pub fn load_input(ctx: &Context, ph: &Placeholder) -> Result<Tensor> {
    let tensor = ctx.get(ph).ok_or_else(|| Error::UnboundPlaceholder {
        name: ph.name().to_string(),
    })?;
    ph.ty().expect_eq(tensor.ty())?;
    Ok(tensor.clone())
}

/// Store `value` into `ph`.
///
/// An existing binding of the right type is written in place so that every
/// handle to it observes the result. Otherwise a private copy is bound, so
/// later in-place writes never reach a tensor the caller bound as an input.
pub fn store_output(ctx: &mut Context, ph: &Placeholder, value: &Tensor) -> Result<()> {
    if let Some(existing) = ctx.get(ph) {
        if existing.ty() == ph.ty() {
            return existing.copy_from(value);
        }
    }
    ctx.insert(ph, value.duplicate()?);
    Ok(())
}

/// Store raw values into `ph`, with the same binding rules as
/// [`store_output`].
pub fn store_output_values(ctx: &mut Context, ph: &Placeholder, values: &[f64]) -> Result<()> {
    if let Some(existing) = ctx.get(ph) {
        if existing.ty() == ph.ty() {
            return existing.update_data_inplace(values);
        }
    }
    ctx.insert(
        ph,
        Tensor::from_f64_slice(values, ph.shape().clone(), ph.elem_kind())?,
    );
    Ok(())
}
