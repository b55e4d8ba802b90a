use crate::error::Result;
use crate::tensor::Tensor;

// Initializer — strategies for writing a parameter's starting values
//
// Each variant writes a tensor's storage in place: either directly through
// `set_values`, or by drawing a fresh random tensor on the same device and
// moving it into place. The random variants go through the device generator,
// so a seeded device gives reproducible parameters.

/// A distribution over initial tensor values.
#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    /// Every element equals `k`.
    Constant(f32),
    /// I.i.d. uniform on `(lower, upper]` (the device RNG contract).
    Uniform { lower: f32, upper: f32 },
    /// I.i.d. Gaussian with the given mean and standard deviation.
    Normal { mean: f32, sd: f32 },
    /// The identity matrix. Requires a square rank-2 shape.
    Identity,
    /// Glorot uniform: bound `scale·√(6/(fan_in+fan_out))` where the fans
    /// are the two leading axes. Requires rank ≤ 2.
    XavierUniform { scale: f32 },
    /// Glorot normal: σ = `scale·√(2/(fan_in+fan_out))`. Requires rank ≤ 2.
    XavierNormal { scale: f32 },
}

impl Initializer {
    /// Write initial values into `x`.
    pub fn apply(&self, x: &mut Tensor) -> Result<()> {
        let shape = x.shape().clone();
        match *self {
            Initializer::Constant(k) => x.set_values_const(k),
            Initializer::Uniform { lower, upper } => {
                let device = x.device()?.clone();
                *x = Tensor::random_uniform(shape, lower, upper, &device)?;
                Ok(())
            }
            Initializer::Normal { mean, sd } => {
                let device = x.device()?.clone();
                *x = Tensor::random_normal(shape, mean, sd, &device)?;
                Ok(())
            }
            Initializer::Identity => {
                if shape.rank() != 2 || shape.dim(0) != shape.dim(1) {
                    bail!("Identity requires a square rank-2 shape, got {}", shape);
                }
                let n = shape.dim(0);
                let mut sample = vec![0.0f32; n * n];
                for i in 0..n {
                    sample[i * (n + 1)] = 1.0;
                }
                let mut values = Vec::with_capacity(shape.total_elems());
                for _ in 0..shape.batch() {
                    values.extend_from_slice(&sample);
                }
                x.set_values(&values)
            }
            Initializer::XavierUniform { scale } => {
                let (fan_in, fan_out) = fans(&shape)?;
                let bound = scale * (6.0 / (fan_in + fan_out) as f32).sqrt();
                let device = x.device()?.clone();
                *x = Tensor::random_uniform(shape, -bound, bound, &device)?;
                Ok(())
            }
            Initializer::XavierNormal { scale } => {
                let (fan_in, fan_out) = fans(&shape)?;
                let sd = scale * (2.0 / (fan_in + fan_out) as f32).sqrt();
                let device = x.device()?.clone();
                *x = Tensor::random_normal(shape, 0.0, sd, &device)?;
                Ok(())
            }
        }
    }
}

/// The two leading axes of a rank ≤ 2 shape, for Xavier scaling.
fn fans(shape: &crate::Shape) -> Result<(usize, usize)> {
    if shape.rank() > 2 {
        bail!("Xavier initialization requires rank <= 2, got {}", shape);
    }
    Ok((shape.dim(0), shape.dim(1)))
}
