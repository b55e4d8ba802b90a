// Optimizers — update rules over registered parameters
//
// An optimizer holds non-owning references to the parameters it manages and
// two operations: zero every gradient before a training step, and apply the
// update rule after backward has accumulated gradients. Update arithmetic
// runs on host copies of the tensors — the parameter count is small next to
// the kernels of a training step, and this keeps update rules independent of
// the device's kernel set.
//
// Optimizer scratch state (momentum buffers) lives in each parameter's own
// state map, keyed per optimizer family, so two optimizers never collide.

use stoat_core::{Parameter, Result, Tensor};

/// An update rule applied to a set of registered parameters.
pub trait Optimizer<'p> {
    /// Register a parameter; it must outlive the optimizer.
    fn add_parameter(&mut self, p: &'p Parameter);

    /// Zero every registered parameter's gradient.
    fn reset_gradients(&self) -> Result<()>;

    /// Consume the accumulated gradients and mutate parameter values.
    fn update(&self) -> Result<()>;
}

/// Plain stochastic gradient descent: `value ← value − lr·grad`.
pub struct Sgd<'p> {
    lr: f32,
    params: Vec<&'p Parameter>,
}

impl<'p> Sgd<'p> {
    pub fn new(lr: f32) -> Self {
        Sgd { lr, params: Vec::new() }
    }

    pub fn learning_rate(&self) -> f32 {
        self.lr
    }
}

impl<'p> Optimizer<'p> for Sgd<'p> {
    fn add_parameter(&mut self, p: &'p Parameter) {
        self.params.push(p);
    }

    fn reset_gradients(&self) -> Result<()> {
        for p in &self.params {
            p.reset_gradient()?;
        }
        Ok(())
    }

    fn update(&self) -> Result<()> {
        for p in &self.params {
            let grad = p.gradient().to_vec()?;
            let mut value = p.value().to_vec()?;
            for (v, g) in value.iter_mut().zip(grad.iter()) {
                *v -= self.lr * g;
            }
            p.value().set_values(&value)?;
        }
        Ok(())
    }
}

/// SGD with classical momentum:
/// `m ← momentum·m − lr·grad; value ← value + m`.
///
/// The velocity tensor is stored under the `"momentum"` key of each
/// parameter's state map and created on the first update.
pub struct MomentumSgd<'p> {
    lr: f32,
    momentum: f32,
    params: Vec<&'p Parameter>,
}

const MOMENTUM_KEY: &str = "momentum";

impl<'p> MomentumSgd<'p> {
    pub fn new(lr: f32, momentum: f32) -> Self {
        MomentumSgd {
            lr,
            momentum,
            params: Vec::new(),
        }
    }
}

impl<'p> Optimizer<'p> for MomentumSgd<'p> {
    fn add_parameter(&mut self, p: &'p Parameter) {
        self.params.push(p);
    }

    fn reset_gradients(&self) -> Result<()> {
        for p in &self.params {
            p.reset_gradient()?;
        }
        Ok(())
    }

    fn update(&self) -> Result<()> {
        for p in &self.params {
            let grad = p.gradient().to_vec()?;
            let mut velocity = match p.take_state(MOMENTUM_KEY) {
                Some(m) => m.to_vec()?,
                None => vec![0.0; p.shape().total_elems()],
            };
            let mut value = p.value().to_vec()?;
            for i in 0..value.len() {
                velocity[i] = self.momentum * velocity[i] - self.lr * grad[i];
                value[i] += velocity[i];
            }
            p.value().set_values(&value)?;
            let device = p.value().device()?.clone();
            p.put_state(
                MOMENTUM_KEY,
                Tensor::from_values(p.shape().clone(), &velocity, &device)?,
            )?;
        }
        Ok(())
    }
}
