use std::fmt;

use crate::error::Result;

// Shape — per-sample extents plus a batch size
//
// A Shape describes a dense column-major tensor: an ordered list of per-axis
// extents (axis 0 varies fastest in storage) and a trailing batch axis along
// which independent samples are concatenated. For example:
//
//   - Scalar:      Shape::new([], 1)      — 1 element
//   - Vector:      Shape::new([784], 1)   — 784 elements
//   - Minibatch:   Shape::new([784], 64)  — 64 samples of 784 elements
//   - Matrix:      Shape::new([8, 4], 1)  — 32 elements, column-major
//
// Extents are canonicalized at construction: trailing axes of extent 1 are
// trimmed, so `[3, 1, 1]` and `[3]` are the same shape and derived equality
// is canonical. Axis lookup past the declared rank always yields 1.
//
// Shapes are plain values: cheap to clone, never mutated in place. The
// resize operations return a new Shape.

/// Per-axis extents and batch size of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
    batch: usize,
}

impl Shape {
    /// Create a new shape from per-axis extents and a batch size.
    ///
    /// Fails with `InvalidArgument` if any extent or the batch size is zero.
    pub fn new(dims: impl Into<Vec<usize>>, batch: usize) -> Result<Self> {
        let mut dims = dims.into();
        if batch == 0 {
            bail!("shape batch size must be at least 1");
        }
        if let Some(pos) = dims.iter().position(|&d| d == 0) {
            bail!("shape axis {} has extent 0: {:?}", pos, dims);
        }
        while dims.last() == Some(&1) {
            dims.pop();
        }
        Ok(Shape { dims, batch })
    }

    /// Create a shape with batch size 1.
    pub fn from_dims(dims: impl Into<Vec<usize>>) -> Result<Self> {
        Shape::new(dims, 1)
    }

    /// The scalar shape: no axes, batch 1.
    pub fn scalar() -> Self {
        Shape {
            dims: vec![],
            batch: 1,
        }
    }

    /// Extent of axis `i`. Axes past the declared rank have extent 1.
    pub fn dim(&self, i: usize) -> usize {
        self.dims.get(i).copied().unwrap_or(1)
    }

    /// The canonicalized per-axis extents.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of axes with trailing extent-1 axes trimmed.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// The batch size.
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Number of elements in one sample (product of all extents).
    pub fn elems_per_sample(&self) -> usize {
        self.dims.iter().product()
    }

    /// Total number of elements across the batch.
    pub fn total_elems(&self) -> usize {
        self.elems_per_sample() * self.batch
    }

    /// Product of the extents of axes 0..d — the column-major stride of
    /// axis `d` within one sample.
    pub fn elems_under_rank(&self, d: usize) -> usize {
        self.dims[..d.min(self.dims.len())].iter().product()
    }

    /// A copy of this shape with axis `d` resized to `n`.
    pub fn resize_dim(&self, d: usize, n: usize) -> Result<Shape> {
        let mut dims = self.dims.clone();
        if dims.len() <= d {
            dims.resize(d + 1, 1);
        }
        dims[d] = n;
        Shape::new(dims, self.batch)
    }

    /// A copy of this shape with batch size `n`.
    pub fn resize_batch(&self, n: usize) -> Result<Shape> {
        Shape::new(self.dims.clone(), n)
    }

    /// Whether the per-sample extents match (ignoring batch).
    pub fn has_same_dims(&self, other: &Shape) -> bool {
        self.dims == other.dims
    }

    /// Compute the broadcast result shape of two operands.
    ///
    /// Two shapes are broadcast-compatible iff their per-sample extents are
    /// equal and their batch sizes either match or at least one is 1. The
    /// result keeps the common extents with the larger batch.
    pub fn broadcast_batch(&self, other: &Shape) -> Result<Shape> {
        if !self.has_same_dims(other) {
            bail!(
                "shapes {} and {} have different per-sample extents",
                self,
                other
            );
        }
        if self.batch != other.batch && self.batch != 1 && other.batch != 1 {
            bail!(
                "shapes {} and {} have incompatible batch sizes",
                self,
                other
            );
        }
        Shape::new(self.dims.clone(), self.batch.max(other.batch))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]x{}", self.batch)
    }
}
