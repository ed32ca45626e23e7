//! # tern-graph
//!
//! The high-level graph the engine compiles:
//!
//! - [`Module`] — owns functions and placeholders
//! - [`Function`] — a named graph of [`Node`]s, the unit of compilation
//! - [`Placeholder`] — named input/output slots, identified by [`PlaceholderId`]
//! - [`Context`] — caller-owned placeholder → tensor bindings
//! - [`optimizer`] — rewrites applied before a backend compiles a function

pub mod context;
pub mod function;
pub mod mode;
pub mod module;
pub mod node;
pub mod optimizer;
pub mod placeholder;

pub use context::Context;
pub use function::Function;
pub use mode::CompilationMode;
pub use module::Module;
pub use node::{Node, NodeId, Op, OpKind};
pub use optimizer::{optimize, OptimizeStats};
pub use placeholder::{ModuleId, Placeholder, PlaceholderId};
