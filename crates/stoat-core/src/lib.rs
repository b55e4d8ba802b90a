//! # stoat-core
//!
//! Core engine of stoat: shapes, device-backed tensors, parameters,
//! initializers, and the define-by-run computation graph with reverse-mode
//! automatic differentiation.
//!
//! This crate provides:
//! - [`Shape`] — per-axis extents plus a batch size
//! - [`Device`] trait — the pluggable compute backend owning all storage
//! - [`Tensor`] — move-only handle to one device buffer
//! - [`Parameter`] — persistent value/gradient pair registered with optimizers
//! - [`Initializer`] — distributions over initial parameter values
//! - [`Graph`] / [`Node`] / [`ops`] — operator factories, lazy forward
//!   evaluation, and `backward`
//!
//! A reference host-memory device lives in the `stoat-cpu` crate; update
//! rules live in `stoat-optim`.

#[macro_use]
mod error;

pub mod device;
pub mod graph;
pub mod initializer;
pub mod ops;
pub mod parameter;
pub mod shape;
pub mod tensor;

pub use device::{BinaryOp, Device, ScalarOp, StorageId, UnaryOp};
pub use error::{Error, Result};
pub use graph::{Graph, Node};
pub use initializer::Initializer;
pub use parameter::Parameter;
pub use shape::Shape;
pub use tensor::{same_device, Tensor};
