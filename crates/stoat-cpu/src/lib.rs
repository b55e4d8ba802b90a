// CpuDevice — the reference host-memory compute device
//
// Buffers are plain `Vec<f32>` values kept in a handle-keyed registry behind
// one mutex, together with the device's random generator. Every kernel locks
// once, reads its inputs out of the registry, and inserts the freshly
// computed buffer under a new handle.
//
// The registry doubles as the leak detector: a `Tensor` releases its handle
// on drop, so dropping the device while handles remain means some tensor was
// forgotten — a programmer error. The destructor reports each leaked block
// through the `log` facade and aborts the process.
//
// Layout is contiguous column-major f32, batch outermost. Batch-broadcast
// kernels walk one sample at a time with a per-operand skip of either the
// sample size or 0, so a batch-1 operand repeats without copying.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution, Normal, Uniform};

use stoat_core::{BinaryOp, Device, Error, Result, ScalarOp, Shape, StorageId, UnaryOp};

/// Reference device backed by host memory.
///
/// `new()` seeds the generator from entropy; `with_seed` makes every random
/// kernel (and everything initialized through it) reproducible.
#[derive(Debug)]
pub struct CpuDevice {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    blocks: HashMap<u64, Vec<f32>>,
    next_id: u64,
    rng: StdRng,
}

impl Inner {
    fn get(&self, id: StorageId) -> Result<&[f32]> {
        self.blocks
            .get(&id.0)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::invalid_state(format!("unknown storage handle {}", id)))
    }

    fn get_mut(&mut self, id: StorageId) -> Result<&mut [f32]> {
        self.blocks
            .get_mut(&id.0)
            .map(Vec::as_mut_slice)
            .ok_or_else(|| Error::invalid_state(format!("unknown storage handle {}", id)))
    }

    fn insert(&mut self, data: Vec<f32>) -> StorageId {
        let id = self.next_id;
        self.next_id += 1;
        self.blocks.insert(id, data);
        StorageId(id)
    }

    fn fresh(&mut self, len: usize) -> Result<Vec<f32>> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::resource_exhausted(format!("allocation of {} floats failed", len)))?;
        data.resize(len, 0.0);
        Ok(data)
    }
}

impl CpuDevice {
    /// Create a device with a nondeterministic seed.
    pub fn new() -> Self {
        CpuDevice::from_rng(StdRng::from_entropy())
    }

    /// Create a device whose random kernels are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        CpuDevice::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        CpuDevice {
            inner: Mutex::new(Inner {
                blocks: HashMap::new(),
                next_id: 1,
                rng,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::invalid_state("cpu device lock poisoned"))
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        CpuDevice::new()
    }
}

impl Drop for CpuDevice {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !inner.blocks.is_empty() {
            log::error!(
                "fatal: {} storage blocks leaked on cpu device",
                inner.blocks.len()
            );
            for (id, block) in &inner.blocks {
                log::error!("  leaked block #{}: {} elements", id, block.len());
            }
            std::process::abort();
        }
    }
}

impl Device for CpuDevice {
    fn name(&self) -> String {
        "cpu".to_string()
    }

    fn allocate(&self, shape: &Shape) -> Result<StorageId> {
        let mut inner = self.lock()?;
        let data = inner.fresh(shape.total_elems())?;
        Ok(inner.insert(data))
    }

    fn release(&self, id: StorageId) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .blocks
            .remove(&id.0)
            .map(|_| ())
            .ok_or_else(|| Error::invalid_state(format!("unknown storage handle {}", id)))
    }

    fn live_handles(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.blocks.len(),
            Err(poisoned) => poisoned.into_inner().blocks.len(),
        }
    }

    fn to_vec(&self, x: StorageId, _shape: &Shape) -> Result<Vec<f32>> {
        let inner = self.lock()?;
        Ok(inner.get(x)?.to_vec())
    }

    fn reset_const(&self, x: StorageId, _shape: &Shape, k: f32) -> Result<()> {
        let mut inner = self.lock()?;
        for v in inner.get_mut(x)? {
            *v = k;
        }
        Ok(())
    }

    fn reset_values(&self, x: StorageId, _shape: &Shape, values: &[f32]) -> Result<()> {
        let mut inner = self.lock()?;
        inner.get_mut(x)?.copy_from_slice(values);
        Ok(())
    }

    fn random_bernoulli(&self, shape: &Shape, p: f32) -> Result<StorageId> {
        let dist = Bernoulli::new(p as f64)
            .map_err(|_| Error::invalid_argument(format!("bernoulli probability {} out of range", p)))?;
        let mut inner = self.lock()?;
        let mut data = inner.fresh(shape.total_elems())?;
        for v in &mut data {
            *v = dist.sample(&mut inner.rng) as u8 as f32;
        }
        Ok(inner.insert(data))
    }

    fn random_uniform(&self, shape: &Shape, lower: f32, upper: f32) -> Result<StorageId> {
        if !(lower < upper) {
            return Err(Error::invalid_argument(format!(
                "uniform bounds must satisfy lower < upper, got ({}, {})",
                lower, upper
            )));
        }
        let dist = Uniform::new(lower, upper);
        let mut inner = self.lock()?;
        let mut data = inner.fresh(shape.total_elems())?;
        for v in &mut data {
            // Draws landing exactly on the lower bound are remapped to the
            // upper bound, closing the interval on the right: (lower, upper].
            let x = dist.sample(&mut inner.rng);
            *v = if x == lower { upper } else { x };
        }
        Ok(inner.insert(data))
    }

    fn random_normal(&self, shape: &Shape, mean: f32, sd: f32) -> Result<StorageId> {
        let dist = Normal::new(mean, sd)
            .map_err(|_| Error::invalid_argument(format!("invalid normal deviation {}", sd)))?;
        let mut inner = self.lock()?;
        let mut data = inner.fresh(shape.total_elems())?;
        for v in &mut data {
            *v = dist.sample(&mut inner.rng);
        }
        Ok(inner.insert(data))
    }

    fn duplicate(&self, x: StorageId, _shape: &Shape) -> Result<StorageId> {
        let mut inner = self.lock()?;
        let data = inner.get(x)?.to_vec();
        Ok(inner.insert(data))
    }

    fn unary_op(&self, op: UnaryOp, x: StorageId, _shape: &Shape) -> Result<StorageId> {
        let f: fn(f32) -> f32 = match op {
            UnaryOp::Negate => |v| -v,
            UnaryOp::Exp => f32::exp,
            UnaryOp::Tanh => f32::tanh,
            UnaryOp::Sigmoid => |v| 0.5 + 0.5 * (0.5 * v).tanh(),
            UnaryOp::Step => |v| (v > 0.0) as u8 as f32,
            UnaryOp::Relu => |v| v.max(0.0),
        };
        let mut inner = self.lock()?;
        let data: Vec<f32> = inner.get(x)?.iter().map(|&v| f(v)).collect();
        Ok(inner.insert(data))
    }

    fn scalar_op(&self, op: ScalarOp, x: StorageId, _shape: &Shape, k: f32) -> Result<StorageId> {
        let f: fn(f32, f32) -> f32 = match op {
            ScalarOp::AddConst => |v, k| v + k,
            ScalarOp::SubConst => |v, k| v - k,
            ScalarOp::ConstSub => |v, k| k - v,
            ScalarOp::MulConst => |v, k| v * k,
            ScalarOp::DivConst => |v, k| v / k,
            ScalarOp::ConstDiv => |v, k| k / v,
        };
        let mut inner = self.lock()?;
        let data: Vec<f32> = inner.get(x)?.iter().map(|&v| f(v, k)).collect();
        Ok(inner.insert(data))
    }

    fn binary_op(
        &self,
        op: BinaryOp,
        a: StorageId,
        sa: &Shape,
        b: StorageId,
        sb: &Shape,
    ) -> Result<StorageId> {
        let f: fn(f32, f32) -> f32 = match op {
            BinaryOp::Add => |x, y| x + y,
            BinaryOp::Sub => |x, y| x - y,
            BinaryOp::Mul => |x, y| x * y,
            BinaryOp::Div => |x, y| x / y,
        };
        let size = sa.elems_per_sample();
        let bs = sa.batch().max(sb.batch());
        let skip_a = if sa.batch() > 1 { size } else { 0 };
        let skip_b = if sb.batch() > 1 { size } else { 0 };
        let mut inner = self.lock()?;
        let mut out = inner.fresh(size * bs)?;
        {
            let pa = inner.get(a)?;
            let pb = inner.get(b)?;
            for bi in 0..bs {
                let oa = bi * skip_a;
                let ob = bi * skip_b;
                let dst = &mut out[bi * size..(bi + 1) * size];
                for i in 0..size {
                    dst[i] = f(pa[oa + i], pb[ob + i]);
                }
            }
        }
        Ok(inner.insert(out))
    }

    fn transpose(&self, x: StorageId, shape: &Shape) -> Result<StorageId> {
        let d1 = shape.dim(0);
        let d2 = shape.dim(1);
        let ms = d1 * d2;
        let bs = shape.batch();
        let mut inner = self.lock()?;
        let mut out = inner.fresh(ms * bs)?;
        {
            let src = inner.get(x)?;
            for b in 0..bs {
                for j in 0..d2 {
                    for i in 0..d1 {
                        out[b * ms + j + i * d2] = src[b * ms + i + j * d1];
                    }
                }
            }
        }
        Ok(inner.insert(out))
    }

    fn matmul(
        &self,
        a: StorageId,
        sa: &Shape,
        b: StorageId,
        sb: &Shape,
    ) -> Result<StorageId> {
        let d1 = sa.dim(0);
        let d2 = sa.dim(1);
        let d3 = sb.dim(1);
        let bs = sa.batch().max(sb.batch());
        let dest_size = d1 * d3;
        let skip_a = if sa.batch() > 1 { d1 * d2 } else { 0 };
        let skip_b = if sb.batch() > 1 { d2 * d3 } else { 0 };
        let mut inner = self.lock()?;
        let mut out = inner.fresh(dest_size * bs)?;
        {
            let pa = inner.get(a)?;
            let pb = inner.get(b)?;
            for bi in 0..bs {
                let oa = bi * skip_a;
                let ob = bi * skip_b;
                let od = bi * dest_size;
                for k in 0..d3 {
                    for i in 0..d1 {
                        let mut acc = 0.0f32;
                        for j in 0..d2 {
                            acc += pa[oa + i + j * d1] * pb[ob + j + k * d2];
                        }
                        out[od + i + k * d1] = acc;
                    }
                }
            }
        }
        Ok(inner.insert(out))
    }

    fn sum(&self, x: StorageId, shape: &Shape, dim: usize) -> Result<StorageId> {
        let out_shape = shape.resize_dim(dim, 1)?;
        let n = shape.dim(dim);
        let repeat = out_shape.total_elems();
        let skip1 = out_shape.elems_under_rank(dim);
        let skip2 = skip1 * n;
        let mut inner = self.lock()?;
        let mut out = inner.fresh(repeat)?;
        {
            let src = inner.get(x)?;
            for i in 0..repeat {
                let mut offset = i % skip1 + (i / skip1) * skip2;
                let mut acc = 0.0f32;
                for _ in 0..n {
                    acc += src[offset];
                    offset += skip1;
                }
                out[i] = acc;
            }
        }
        Ok(inner.insert(out))
    }

    fn batch_sum(&self, x: StorageId, shape: &Shape) -> Result<StorageId> {
        let size = shape.elems_per_sample();
        let bs = shape.batch();
        let mut inner = self.lock()?;
        let mut out = inner.fresh(size)?;
        {
            let src = inner.get(x)?;
            for (i, v) in out.iter_mut().enumerate() {
                let mut acc = 0.0f32;
                for b in 0..bs {
                    acc += src[i + b * size];
                }
                *v = acc;
            }
        }
        Ok(inner.insert(out))
    }

    fn slice(
        &self,
        x: StorageId,
        shape: &Shape,
        dim: usize,
        offset: usize,
        out_shape: &Shape,
    ) -> Result<StorageId> {
        let base = out_shape.elems_under_rank(dim);
        let span = base * out_shape.dim(dim);
        let skip = base * shape.dim(dim);
        let repeat = out_shape.total_elems() / span;
        let mut inner = self.lock()?;
        let mut out = inner.fresh(out_shape.total_elems())?;
        {
            let src = inner.get(x)?;
            for r in 0..repeat {
                let sp = r * skip + base * offset;
                out[r * span..(r + 1) * span].copy_from_slice(&src[sp..sp + span]);
            }
        }
        Ok(inner.insert(out))
    }

    fn concat(
        &self,
        xs: &[(StorageId, &Shape)],
        dim: usize,
        out_shape: &Shape,
    ) -> Result<StorageId> {
        let base = out_shape.elems_under_rank(dim);
        let skip = base * out_shape.dim(dim);
        let repeat = out_shape.elems_per_sample() / skip;
        let new_bs = out_shape.batch();
        let out_sample = out_shape.elems_per_sample();
        let mut inner = self.lock()?;
        let mut out = inner.fresh(out_shape.total_elems())?;
        {
            let mut offset = 0;
            for &(id, s) in xs {
                let src = inner.get(id)?;
                let span = base * s.dim(dim);
                let b_skip = if s.batch() > 1 { span * repeat } else { 0 };
                for b in 0..new_bs {
                    for i in 0..repeat {
                        let sp = b * b_skip + i * span;
                        let dp = b * out_sample + i * skip + offset;
                        out[dp..dp + span].copy_from_slice(&src[sp..sp + span]);
                    }
                }
                offset += span;
            }
        }
        Ok(inner.insert(out))
    }

    fn add_gradient(
        &self,
        dst: StorageId,
        sd: &Shape,
        src: StorageId,
        ss: &Shape,
    ) -> Result<()> {
        let size = sd.elems_per_sample();
        let bs = sd.batch().max(ss.batch());
        let skip_d = if sd.batch() > 1 { size } else { 0 };
        let skip_s = if ss.batch() > 1 { size } else { 0 };
        let mut inner = self.lock()?;
        // Snapshot the source so an aliased accumulate stays well-defined.
        let sbuf = inner.get(src)?.to_vec();
        let dbuf = inner.get_mut(dst)?;
        for b in 0..bs {
            let od = b * skip_d;
            let os = b * skip_s;
            for i in 0..size {
                dbuf[od + i] += sbuf[os + i];
            }
        }
        Ok(())
    }

    fn add_gradient_offset(
        &self,
        dst: StorageId,
        sd: &Shape,
        src: StorageId,
        ss: &Shape,
        dim: usize,
        offset: usize,
    ) -> Result<()> {
        let base = sd.elems_under_rank(dim);
        let span = base * ss.dim(dim);
        let skip = base * sd.dim(dim);
        let repeat = sd.elems_per_sample() / skip;
        let bs = sd.batch().max(ss.batch());
        let skip_d = if sd.batch() > 1 { sd.elems_per_sample() } else { 0 };
        let skip_s = if ss.batch() > 1 { ss.elems_per_sample() } else { 0 };
        let mut inner = self.lock()?;
        let sbuf = inner.get(src)?.to_vec();
        let dbuf = inner.get_mut(dst)?;
        for b in 0..bs {
            for i in 0..repeat {
                let dp = b * skip_d + base * offset + i * skip;
                let sp = b * skip_s + i * span;
                for j in 0..span {
                    dbuf[dp + j] += sbuf[sp + j];
                }
            }
        }
        Ok(())
    }
}
