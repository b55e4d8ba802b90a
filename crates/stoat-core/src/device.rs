use std::fmt;

use crate::error::{Error, Result};
use crate::shape::Shape;

// Device — abstraction over compute backends
//
// A Device owns every storage buffer its tensors live in and implements every
// kernel: allocation, host transfer, elementwise math, reductions, matrix
// multiplication, structural copies, random fills, and in-place gradient
// accumulation. Tensors hold an `Arc<dyn Device>` and dispatch everything
// through it, so a new backend only has to implement this trait to be usable
// by the whole engine.
//
// Kernels operate on `(StorageId, &Shape)` pairs and return fresh storage
// handles; the Tensor and graph layers validate shapes and wrap results.
// Devices may therefore assume their inputs were checked.
//
// STORAGE DISCIPLINE:
//
// Every `allocate` is matched by exactly one `release` (driven by Tensor's
// Drop). The device keeps a registry of live handles; dropping a device with
// outstanding handles is a programmer error and must abort the process with
// a leak report. Releasing a handle the device does not know fails with
// `InvalidState`.
//
// LAYOUT: all buffers are contiguous column-major f32 (axis 0 fastest),
// batch outermost with stride `elems_per_sample`.

/// Opaque handle naming one device-resident storage buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageId(pub u64);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// Kernel-category enums
//
// These parameterize the elementwise kernels (one trait method per category)
// and double as the dispatch tags the graph records per vertex, so the
// backward pass knows which rule to apply.

/// Element-wise unary kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// -x
    Negate,
    /// e^x
    Exp,
    /// tanh(x)
    Tanh,
    /// Logistic sigmoid, computed as 0.5 + 0.5·tanh(0.5·x).
    Sigmoid,
    /// 1 if x > 0 else 0.
    Step,
    /// max(0, x)
    Relu,
}

/// Element-wise kernels combining a tensor with one scalar constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOp {
    /// x + k
    AddConst,
    /// x - k
    SubConst,
    /// k - x
    ConstSub,
    /// x * k
    MulConst,
    /// x / k
    DivConst,
    /// k / x
    ConstDiv,
}

/// Element-wise tensor/tensor kernels with batch broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A compute backend owning storage and implementing every kernel.
///
/// Devices are single objects with stable identity: two tensors may be
/// combined only if they live on the same device instance. Concurrent use
/// from multiple threads is not part of the contract.
pub trait Device: fmt::Debug {
    /// A short human-readable backend name (e.g. "cpu").
    fn name(&self) -> String;

    // Storage lifecycle

    /// Allocate an uninitialized buffer for `shape` and register its handle.
    fn allocate(&self, shape: &Shape) -> Result<StorageId>;

    /// Release a handle previously returned by `allocate`.
    ///
    /// Fails with `InvalidState` if the handle is unknown.
    fn release(&self, id: StorageId) -> Result<()>;

    /// Number of live storage handles (the registry size).
    fn live_handles(&self) -> usize;

    // Host transfer

    /// Copy a buffer to host memory, column-major with batch outermost.
    fn to_vec(&self, x: StorageId, shape: &Shape) -> Result<Vec<f32>>;

    /// Overwrite every element with the constant `k`.
    fn reset_const(&self, x: StorageId, shape: &Shape, k: f32) -> Result<()>;

    /// Overwrite the buffer with `values` (same layout as `to_vec`).
    fn reset_values(&self, x: StorageId, shape: &Shape, values: &[f32]) -> Result<()>;

    // Random fills
    //
    // All draws come from the device-owned generator seeded at construction.

    /// Fresh buffer of 0/1 draws, 1 with probability `p`.
    fn random_bernoulli(&self, shape: &Shape, p: f32) -> Result<StorageId>;

    /// Fresh buffer of uniform draws on `(lower, upper]`.
    ///
    /// Draws exactly equal to `lower` are remapped to `upper`, closing the
    /// interval on the upper bound.
    fn random_uniform(&self, shape: &Shape, lower: f32, upper: f32) -> Result<StorageId>;

    /// Fresh buffer of Gaussian draws with the given mean and deviation.
    fn random_normal(&self, shape: &Shape, mean: f32, sd: f32) -> Result<StorageId>;

    // Value-producing kernels

    /// Bitwise copy of a buffer into fresh storage.
    fn duplicate(&self, x: StorageId, shape: &Shape) -> Result<StorageId>;

    /// Element-wise unary kernel.
    fn unary_op(&self, op: UnaryOp, x: StorageId, shape: &Shape) -> Result<StorageId>;

    /// Element-wise kernel against a scalar constant.
    fn scalar_op(&self, op: ScalarOp, x: StorageId, shape: &Shape, k: f32) -> Result<StorageId>;

    /// Element-wise tensor/tensor kernel.
    ///
    /// Per-sample extents of the operands are equal; the result batch is the
    /// larger of the two and a batch-1 operand repeats across it.
    fn binary_op(
        &self,
        op: BinaryOp,
        a: StorageId,
        sa: &Shape,
        b: StorageId,
        sb: &Shape,
    ) -> Result<StorageId>;

    /// Transpose the leading two axes of each sample.
    fn transpose(&self, x: StorageId, shape: &Shape) -> Result<StorageId>;

    /// Column-major matrix product: a is (d1, d2), b is (d2, d3), the result
    /// is (d1, d3), with batch broadcasting as for `binary_op`.
    fn matmul(
        &self,
        a: StorageId,
        sa: &Shape,
        b: StorageId,
        sb: &Shape,
    ) -> Result<StorageId>;

    /// Reduce axis `dim` to extent 1 by summation.
    fn sum(&self, x: StorageId, shape: &Shape, dim: usize) -> Result<StorageId>;

    /// Repeat an extent-1 axis `dim` to extent `size`.
    ///
    /// Reserved: the reference device does not implement this and engine
    /// code must not rely on it.
    fn broadcast(&self, x: StorageId, shape: &Shape, dim: usize, size: usize) -> Result<StorageId> {
        let _ = (x, shape, dim, size);
        Err(Error::not_implemented(format!(
            "broadcast is not supported by the {} device",
            self.name()
        )))
    }

    /// Sum samples across the batch, reducing batch to 1.
    fn batch_sum(&self, x: StorageId, shape: &Shape) -> Result<StorageId>;

    /// Copy the sub-range of `out_shape.dim(dim)` extents starting at
    /// `offset` along axis `dim` into fresh storage.
    fn slice(
        &self,
        x: StorageId,
        shape: &Shape,
        dim: usize,
        offset: usize,
        out_shape: &Shape,
    ) -> Result<StorageId>;

    /// Splice buffers along axis `dim` into one buffer of `out_shape`.
    /// Batch-1 inputs repeat across the output batch.
    fn concat(
        &self,
        xs: &[(StorageId, &Shape)],
        dim: usize,
        out_shape: &Shape,
    ) -> Result<StorageId>;

    // In-place gradient kernels
    //
    // The only mutating kernels. Both broadcast across the batch in either
    // direction: a batch-1 destination accumulates every source sample, and
    // a batch-1 source repeats into every destination sample.

    /// dst += src, element-wise with batch broadcasting.
    fn add_gradient(
        &self,
        dst: StorageId,
        sd: &Shape,
        src: StorageId,
        ss: &Shape,
    ) -> Result<()>;

    /// Accumulate `src` into the sub-range of `dst` starting at `offset`
    /// along axis `dim` — the reverse of `slice`.
    fn add_gradient_offset(
        &self,
        dst: StorageId,
        sd: &Shape,
        src: StorageId,
        ss: &Shape,
        dim: usize,
        offset: usize,
    ) -> Result<()>;
}
