//! # tern-backends
//!
//! Code generators for tern functions.
//!
//! - [`Backend`] / [`CompiledFunction`] — the compile and execute seams
//! - [`InterpreterBackend`] — walks the optimized graph on every run
//! - [`CpuBackend`] — lowers to a buffer-planned instruction tape with rayon
//!   kernels, and exports standalone bundles
//! - [`create_backend`] — build a backend from a [`BackendKind`]

pub mod backend;
pub mod cpu;
pub mod interpreter;

pub use backend::{
    check_supported, create_backend, load_input, store_output, store_output_values, Backend,
    BackendKind, CompiledFunction,
};
pub use cpu::{BundleInfo, CpuBackend, CpuConfig, CpuFunction};
pub use interpreter::{InterpretedFunction, InterpreterBackend};
