use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::device::Device;
use crate::error::Result;
use crate::initializer::Initializer;
use crate::shape::Shape;
use crate::tensor::Tensor;

// Parameter — a named, persistent value/gradient tensor pair
//
// Parameters are the learnable state of a model. Unlike graph vertices they
// live across graphs: a graph only borrows them, and every graph referencing
// a parameter must be dropped before the parameter is.
//
// The auxiliary state map holds optimizer scratch tensors (momentum buffers
// and the like), keyed by a string unique to each optimizer family. Every
// entry has the parameter's own shape.

/// A named, persistent pair of a value tensor and a gradient tensor.
pub struct Parameter {
    name: String,
    shape: Shape,
    value: Tensor,
    gradient: Tensor,
    state: RefCell<HashMap<String, Tensor>>,
}

impl Parameter {
    /// Create a parameter on `device`, apply `init` to its value, and zero
    /// its gradient.
    pub fn new(
        name: impl Into<String>,
        shape: Shape,
        init: &Initializer,
        device: &Arc<dyn Device>,
    ) -> Result<Self> {
        let mut value = Tensor::new(shape.clone(), device)?;
        init.apply(&mut value)?;
        let gradient = Tensor::constant(shape.clone(), 0.0, device)?;
        Ok(Parameter {
            name: name.into(),
            shape,
            value,
            gradient,
            state: RefCell::new(HashMap::new()),
        })
    }

    /// The parameter's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parameter's shape (shared by value, gradient, and all state
    /// tensors).
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The value tensor.
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// The gradient tensor.
    pub fn gradient(&self) -> &Tensor {
        &self.gradient
    }

    /// Zero the gradient tensor.
    pub fn reset_gradient(&self) -> Result<()> {
        self.gradient.set_values_const(0.0)
    }

    /// Accumulate `g` into the gradient tensor.
    pub fn add_gradient(&self, g: &Tensor) -> Result<()> {
        self.gradient.add_gradient(g)
    }

    /// Remove and return the optimizer state tensor stored under `key`.
    pub fn take_state(&self, key: &str) -> Option<Tensor> {
        self.state.borrow_mut().remove(key)
    }

    /// Store an optimizer state tensor under `key`.
    ///
    /// Fails with `InvalidArgument` if the tensor's shape differs from the
    /// parameter's.
    pub fn put_state(&self, key: impl Into<String>, t: Tensor) -> Result<()> {
        if t.shape() != &self.shape {
            bail!(
                "state tensor shape {} does not match parameter '{}' shape {}",
                t.shape(),
                self.name,
                self.shape
            );
        }
        self.state.borrow_mut().insert(key.into(), t);
        Ok(())
    }

    /// Whether optimizer state exists under `key`.
    pub fn has_state(&self, key: &str) -> bool {
        self.state.borrow().contains_key(key)
    }
}

impl std::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parameter(name={:?}, shape={})", self.name, self.shape)
    }
}
