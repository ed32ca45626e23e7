//! # tern
//!
//! Compile small tensor graphs on a pluggable backend and run them.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ```rust
//! use tern::prelude::*;
//!
//! # fn main() -> tern::Result<()> {
//! let mut engine = ExecutionEngine::new(BackendKind::Interpreter);
//! let m = engine.module_mut();
//! let x = m.create_placeholder(ElemKind::Float, 4, "x", false)?;
//! let y = m.create_placeholder(ElemKind::Float, 4, "y", false)?;
//! let z = m.create_placeholder(ElemKind::Float, 4, "z", false)?;
//! let f = m.create_function("add")?;
//! let (xv, yv) = (f.input(&x)?, f.input(&y)?);
//! let sum = f.add("sum", xv, yv)?;
//! f.save("ret", sum, &z)?;
//!
//! engine.compile(CompilationMode::Infer, "add", true)?;
//! let mut ctx = Context::new();
//! bind_placeholders(
//!     &mut ctx,
//!     &[&x, &y],
//!     &[
//!         Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0], 4)?,
//!         Tensor::from_slice(&[10.0f32, 20.0, 30.0, 40.0], 4)?,
//!     ],
//! )?;
//! engine.run(&mut ctx)?;
//! assert_eq!(ctx.get(&z).unwrap().to_vec::<f32>()?, vec![11.0, 22.0, 33.0, 44.0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `tern-core` | ElemKind, Shape, TensorType, Tensor, Error |
//! | `tern-graph` | Module, Function, Placeholder, Context, optimizer |
//! | `tern-backends` | Backend trait, interpreter, CPU tape and bundle export |
//! | `tern` | ExecutionEngine, registry, binders, batch runner |

/// Re-export core types.
pub use tern_core::{ElemKind, Error, Result, Shape, Tensor, TensorType, WithElemKind};

/// Re-export the graph layer.
pub use tern_graph::{
    optimize, CompilationMode, Context, Function, Module, Node, NodeId, Op, OpKind,
    OptimizeStats, Placeholder, PlaceholderId,
};

/// Re-export backends.
pub mod backends {
    pub use tern_backends::*;
}
pub use tern_backends::{
    create_backend, Backend, BackendKind, CompiledFunction, CpuBackend, CpuConfig,
    InterpreterBackend,
};

/// The execution engine facade.
pub mod exec;

pub use exec::{
    bind_placeholders, bind_placeholders_by_name, run_batch, BackendHandle, EngineState,
    ExecutionEngine, FunctionRegistry,
};

/// Convenience prelude.
pub mod prelude {
    pub use crate::exec::{
        bind_placeholders, bind_placeholders_by_name, run_batch, BackendHandle, EngineState,
        ExecutionEngine,
    };
    pub use tern_backends::{Backend, BackendKind, CompiledFunction};
    pub use tern_core::{ElemKind, Error, Result, Shape, Tensor};
    pub use tern_graph::{CompilationMode, Context, Module, OpKind, Placeholder};
}
