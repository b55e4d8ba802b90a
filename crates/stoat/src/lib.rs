//! # stoat
//!
//! A define-by-run automatic differentiation engine for dense f32 tensors.
//!
//! Client code obtains a [`Device`], constructs [`Parameter`]s through an
//! [`Initializer`], then repeatedly builds a fresh [`Graph`] by invoking
//! operator factories from [`ops`], calls [`Graph::backward`] on a scalar
//! loss node, and lets an optimizer consume the accumulated gradients.
//!
//! ```ignore
//! use std::sync::Arc;
//! use stoat::prelude::*;
//!
//! let dev: Arc<dyn Device> = Arc::new(CpuDevice::with_seed(42));
//! let w = Parameter::new("w", Shape::new([4, 8], 1)?,
//!                        &Initializer::XavierUniform { scale: 1.0 }, &dev)?;
//!
//! let mut trainer = Sgd::new(0.1);
//! trainer.add_parameter(&w);
//!
//! trainer.reset_gradients()?;
//! let mut g = Graph::new(&dev);
//! let x = ops::input(&mut g, Shape::new([8], 16)?, minibatch)?;
//! let wn = ops::parameter(&mut g, &w)?;
//! let a = ops::matmul(&mut g, wn, x)?;
//! let y = ops::relu(&mut g, a)?;
//! let ce = ops::softmax_cross_entropy(&mut g, y, &labels, 0)?;
//! let loss = ops::batch_mean(&mut g, ce)?;
//! g.backward(loss)?;
//! trainer.update()?;
//! ```
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `stoat-core` | Shape, Tensor, Device trait, Parameter, Initializer, Graph and autodiff |
//! | `stoat-cpu` | Reference host-memory device with leak tracking and seeded RNG |
//! | `stoat-optim` | Optimizers (SGD, momentum SGD) |

/// Re-export core types.
pub use stoat_core::{
    same_device, BinaryOp, Device, Error, Graph, Initializer, Node, Parameter, Result, ScalarOp,
    Shape, StorageId, Tensor, UnaryOp,
};

/// Re-export the operator factories.
pub use stoat_core::ops;

/// Re-export the reference device.
pub use stoat_cpu::CpuDevice;

/// Re-export optimizers.
pub use stoat_optim::{MomentumSgd, Optimizer, Sgd};

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::ops;
    pub use crate::{
        CpuDevice, Device, Error, Graph, Initializer, MomentumSgd, Node, Optimizer, Parameter,
        Result, Sgd, Shape, Tensor,
    };
}
