// Execution — The engine facade over module, backend and compiled functions
//
//   module ─▶ optimize ─▶ backend.compile ─▶ registry ─▶ run(context)
//
// The engine owns the module, the backend handle and the registry. Runtime
// data lives in caller-owned contexts, filled by the binders and advanced
// by the batch runner.

mod batch;
mod bind;
mod engine;
mod registry;

pub use batch::run_batch;
pub use bind::{bind_placeholders, bind_placeholders_by_name};
pub use engine::{BackendHandle, EngineState, ExecutionEngine};
pub use registry::FunctionRegistry;
