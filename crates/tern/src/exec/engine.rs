// Engine — Owns a module, a backend and the functions compiled by it
//
//   let mut engine = ExecutionEngine::new(BackendKind::Interpreter);
//   let m = engine.module_mut();
//   ... declare placeholders, build function "add" ...
//   engine.compile(CompilationMode::Infer, "add", true)?;
//   bind_placeholders(&mut ctx, &[x, y], &[xt, yt])?;
//   engine.run(&mut ctx)?;
//
// STATE:
//
//   Fresh ──compile──▶ Compiled ──compile / run──▶ Compiled
//     ▲                   │
//     └────set_backend────┘
//
// Every compiled function in the registry comes from the installed backend:
// installing a backend clears the registry, whatever its kind. Borrows of
// compiled functions are tied to `&self`, so they cannot outlive the next
// `set_backend` or `compile`.
//
// Teardown releases the registry, then the backend, then the module.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tern_backends::{create_backend, Backend, BackendKind, CompiledFunction};
use tern_core::{ElemKind, Result};
use tern_graph::{optimize, CompilationMode, Context, Module, OpKind};

use super::registry::FunctionRegistry;

/// An installed backend and who is responsible for destroying it.
pub enum BackendHandle {
    /// The engine drops the backend when it is replaced or the engine goes
    /// away.
    Owned(Box<dyn Backend>),
    /// The engine only drops its reference; the supplier keeps the backend
    /// alive.
    Borrowed(Arc<dyn Backend>),
}

impl BackendHandle {
    pub fn get(&self) -> &dyn Backend {
        match self {
            BackendHandle::Owned(b) => b.as_ref(),
            BackendHandle::Borrowed(b) => b.as_ref(),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, BackendHandle::Owned(_))
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ownership = if self.is_owned() { "owned" } else { "borrowed" };
        write!(f, "BackendHandle({}, {:?})", ownership, self.get())
    }
}

impl From<Box<dyn Backend>> for BackendHandle {
    fn from(b: Box<dyn Backend>) -> Self {
        BackendHandle::Owned(b)
    }
}

impl From<Arc<dyn Backend>> for BackendHandle {
    fn from(b: Arc<dyn Backend>) -> Self {
        BackendHandle::Borrowed(b)
    }
}

/// Observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing is compiled for the installed backend.
    Fresh,
    /// At least one compiled function can be run.
    Compiled,
}

/// Drives graph → optimize → compile → execute over one module.
#[derive(Debug)]
pub struct ExecutionEngine {
    // Field order is drop order.
    registry: FunctionRegistry,
    backend: BackendHandle,
    module: Module,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(BackendKind::default())
    }
}

impl ExecutionEngine {
    /// Engine with an empty module and a fresh backend of `kind`.
    pub fn new(kind: BackendKind) -> Self {
        log::info!("engine: created with {} backend", kind);
        Self {
            registry: FunctionRegistry::new(),
            backend: BackendHandle::Owned(create_backend(kind)),
            module: Module::new(),
        }
    }

    //  Backend

    /// Install a fresh engine-owned backend of `kind`.
    pub fn set_backend(&mut self, kind: BackendKind) {
        self.set_backend_instance(BackendHandle::Owned(create_backend(kind)));
    }

    /// Install a caller-supplied backend.
    ///
    /// The registry is cleared before the previous backend is released.
    pub fn set_backend_instance(&mut self, backend: impl Into<BackendHandle>) {
        let backend = backend.into();
        self.registry.clear();
        log::info!(
            "engine: installing {} backend ({}), replacing {}",
            backend.get().kind(),
            if backend.is_owned() { "owned" } else { "borrowed" },
            self.backend.get().kind()
        );
        self.backend = backend;
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.get()
    }

    /// Whether the engine destroys the installed backend.
    pub fn owns_backend(&self) -> bool {
        self.backend.is_owned()
    }

    pub fn is_op_supported(&self, op: OpKind, elem: ElemKind) -> bool {
        self.backend.get().is_op_supported(op, elem)
    }

    //  Module

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    //  Registry

    pub fn state(&self) -> EngineState {
        if self.registry.is_empty() {
            EngineState::Fresh
        } else {
            EngineState::Compiled
        }
    }

    /// The only compiled function.
    pub fn compiled_function(&self) -> Result<&dyn CompiledFunction> {
        self.registry.lookup_sole()
    }

    pub fn compiled_function_named(&self, name: &str) -> Result<&dyn CompiledFunction> {
        self.registry.lookup(name)
    }

    /// Names of the compiled functions, sorted.
    pub fn compiled_names(&self) -> Vec<String> {
        self.registry.names()
    }

    //  Compile / save

    /// Optimize the module's function `name` for `mode`, compile it on the
    /// installed backend and register the result under `name`.
    ///
    /// With `clear_others`, every other compiled function is dropped first.
    /// On failure nothing is installed.
    pub fn compile(&mut self, mode: CompilationMode, name: &str, clear_others: bool) -> Result<()> {
        if clear_others {
            self.registry.clear();
        }

        let function = self.module.function_mut(name)?;
        let stats = optimize(function, mode).map_err(|e| e.in_compile(name))?;
        let compiled = self
            .backend
            .get()
            .compile(function, mode)
            .map_err(|e| e.in_compile(name))?;

        log::info!(
            "engine: compiled '{}' for {} on {} backend ({})",
            name,
            mode,
            self.backend.get().kind(),
            stats
        );
        self.registry.install(name, compiled);
        Ok(())
    }

    /// Export function `name` as a standalone bundle.
    ///
    /// Works on an optimized copy, so neither the module nor the registry
    /// change.
    pub fn save(
        &self,
        mode: CompilationMode,
        name: &str,
        output_dir: impl AsRef<Path>,
        network_name: &str,
    ) -> Result<()> {
        let backend = self.backend.get();
        if !backend.supports_bundles() {
            return Err(tern_core::Error::BundleUnsupported {
                backend: backend.kind().to_string(),
            });
        }
        let mut function = self.module.function(name)?.clone();
        optimize(&mut function, mode).map_err(|e| e.in_compile(name))?;
        backend.save(&function, mode, output_dir.as_ref(), network_name)?;
        log::info!(
            "engine: saved '{}' as bundle '{}' into {}",
            name,
            network_name,
            output_dir.as_ref().display()
        );
        Ok(())
    }

    //  Run

    /// Execute the only compiled function once against `ctx`.
    pub fn run(&self, ctx: &mut Context) -> Result<()> {
        let compiled = self.registry.lookup_sole()?;
        Self::execute(compiled, ctx)
    }

    /// Execute the compiled function `name` once against `ctx`.
    pub fn run_named(&self, ctx: &mut Context, name: &str) -> Result<()> {
        let compiled = self.registry.lookup(name)?;
        Self::execute(compiled, ctx)
    }

    fn execute(compiled: &dyn CompiledFunction, ctx: &mut Context) -> Result<()> {
        log::debug!("engine: run '{}' ({} bindings)", compiled.name(), ctx.len());
        compiled
            .execute(ctx)
            .map_err(|e| e.in_execution(compiled.name()))
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        self.registry.clear();
        log::debug!(
            "engine: dropping {} {} backend",
            if self.backend.is_owned() { "owned" } else { "borrowed" },
            self.backend.get().kind()
        );
    }
}
