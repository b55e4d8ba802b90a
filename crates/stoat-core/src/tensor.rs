use std::fmt;
use std::sync::Arc;

use crate::device::{Device, StorageId};
use crate::error::{Error, Result};
use crate::shape::Shape;

// Tensor — a uniquely owning handle to device storage
//
// A Tensor pairs a Shape with one storage handle on one device. Ownership is
// move-only: the type is deliberately not Clone, so exactly one live Tensor
// refers to any given buffer and dropping it releases the buffer through the
// owning device. Sharing data requires an explicit `duplicate()`.
//
// A default-constructed Tensor is *invalid* — it has no device and no
// storage — and every operation on it fails with `InvalidState`. This is the
// one representable "empty" state; it exists so containers and swaps have a
// cheap placeholder.
//
// The in-place operations (`set_values`, `set_values_const`, `add_gradient`)
// take `&self`: the buffer lives behind the device's own lock, not inside
// this struct, so mutation is interior to the device.

/// Value handle pairing a [`Shape`] with device-resident storage.
pub struct Tensor {
    shape: Shape,
    device: Option<Arc<dyn Device>>,
    id: StorageId,
}

/// Whether two device handles name the same device instance.
pub fn same_device(a: &Arc<dyn Device>, b: &Arc<dyn Device>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl Default for Tensor {
    /// The invalid tensor: no storage, no device.
    fn default() -> Self {
        Tensor {
            shape: Shape::scalar(),
            device: None,
            id: StorageId(0),
        }
    }
}

impl Tensor {
    /// Wrap a storage handle the device just produced.
    pub(crate) fn from_parts(shape: Shape, device: Arc<dyn Device>, id: StorageId) -> Self {
        Tensor {
            shape,
            device: Some(device),
            id,
        }
    }

    /// Allocate an uninitialized tensor on `device`.
    pub fn new(shape: Shape, device: &Arc<dyn Device>) -> Result<Self> {
        let id = device.allocate(&shape)?;
        Ok(Tensor::from_parts(shape, Arc::clone(device), id))
    }

    /// Allocate a tensor filled with the constant `k`.
    pub fn constant(shape: Shape, k: f32, device: &Arc<dyn Device>) -> Result<Self> {
        let t = Tensor::new(shape, device)?;
        t.set_values_const(k)?;
        Ok(t)
    }

    /// Allocate a tensor initialized from `values` (column-major,
    /// batch outermost).
    pub fn from_values(shape: Shape, values: &[f32], device: &Arc<dyn Device>) -> Result<Self> {
        let t = Tensor::new(shape, device)?;
        t.set_values(values)?;
        Ok(t)
    }

    /// Allocate a tensor of Bernoulli draws (1 with probability `p`).
    pub fn random_bernoulli(shape: Shape, p: f32, device: &Arc<dyn Device>) -> Result<Self> {
        let id = device.random_bernoulli(&shape, p)?;
        Ok(Tensor::from_parts(shape, Arc::clone(device), id))
    }

    /// Allocate a tensor of uniform draws on `(lower, upper]`.
    pub fn random_uniform(
        shape: Shape,
        lower: f32,
        upper: f32,
        device: &Arc<dyn Device>,
    ) -> Result<Self> {
        let id = device.random_uniform(&shape, lower, upper)?;
        Ok(Tensor::from_parts(shape, Arc::clone(device), id))
    }

    /// Allocate a tensor of Gaussian draws.
    pub fn random_normal(
        shape: Shape,
        mean: f32,
        sd: f32,
        device: &Arc<dyn Device>,
    ) -> Result<Self> {
        let id = device.random_normal(&shape, mean, sd)?;
        Ok(Tensor::from_parts(shape, Arc::clone(device), id))
    }

    /// Whether this tensor owns storage.
    pub fn valid(&self) -> bool {
        self.device.is_some()
    }

    /// The shape of this tensor.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The device owning this tensor's storage.
    pub fn device(&self) -> Result<&Arc<dyn Device>> {
        self.device
            .as_ref()
            .ok_or_else(|| Error::invalid_state("tensor is invalid (default-constructed)"))
    }

    /// The storage handle.
    pub fn storage(&self) -> Result<StorageId> {
        if self.device.is_none() {
            return Err(Error::invalid_state(
                "tensor is invalid (default-constructed)",
            ));
        }
        Ok(self.id)
    }

    /// Whether this tensor lives on `device`.
    pub fn on_device(&self, device: &Arc<dyn Device>) -> bool {
        match &self.device {
            Some(d) => same_device(d, device),
            None => false,
        }
    }

    /// Copy the values to host memory, column-major with batch outermost.
    /// The result length equals `shape().total_elems()`.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        let dev = self.device()?;
        dev.to_vec(self.id, &self.shape)
    }

    /// Overwrite every element with `k`.
    pub fn set_values_const(&self, k: f32) -> Result<()> {
        let dev = self.device()?;
        dev.reset_const(self.id, &self.shape, k)
    }

    /// Overwrite the storage with `values` (same layout as `to_vec`).
    pub fn set_values(&self, values: &[f32]) -> Result<()> {
        if values.len() != self.shape.total_elems() {
            bail!(
                "value count {} does not match shape {} ({} elements)",
                values.len(),
                self.shape,
                self.shape.total_elems()
            );
        }
        let dev = self.device()?;
        dev.reset_values(self.id, &self.shape, values)
    }

    /// Accumulate `other` into this tensor with batch broadcasting.
    pub fn add_gradient(&self, other: &Tensor) -> Result<()> {
        let dev = self.device()?;
        let other_dev = other.device()?;
        if !same_device(dev, other_dev) {
            bail!(
                "cannot accumulate across devices ({} vs {})",
                dev.name(),
                other_dev.name()
            );
        }
        // Both directions of batch broadcast are legal; extents must match.
        self.shape.broadcast_batch(&other.shape)?;
        dev.add_gradient(self.id, &self.shape, other.id, &other.shape)
    }

    /// Allocate a fresh tensor holding a copy of this tensor's values.
    pub fn duplicate(&self) -> Result<Tensor> {
        let dev = self.device()?;
        let id = dev.duplicate(self.id, &self.shape)?;
        Ok(Tensor::from_parts(
            self.shape.clone(),
            Arc::clone(dev),
            id,
        ))
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        if let Some(dev) = self.device.take() {
            // A failed release here means the handle was already gone;
            // there is nothing further to unwind from a destructor.
            let _ = dev.release(self.id);
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(dev) => write!(
                f,
                "Tensor(shape={}, device={}, storage={})",
                self.shape,
                dev.name(),
                self.id
            ),
            None => write!(f, "Tensor(invalid)"),
        }
    }
}
