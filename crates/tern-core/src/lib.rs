//! # tern-core
//!
//! Value-level building blocks shared by every tern crate.
//!
//! This crate provides:
//! - [`ElemKind`] — element kinds (float, double, i8, i32, index)
//! - [`Shape`] / [`TensorType`] — dimensions and the (kind, shape) pair
//! - [`Tensor`] — shared-storage dense values bound into contexts
//! - [`Error`] / [`Result`] — the single error type used across tern

pub mod elem;
pub mod error;
pub mod shape;
pub mod tensor;

pub use elem::{ElemKind, WithElemKind};
pub use error::{Error, Result};
pub use shape::{Shape, MAX_TENSOR_DIMENSIONS};
pub use tensor::{Tensor, TensorType};
