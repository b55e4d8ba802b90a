use std::sync::Arc;

use crate::device::{BinaryOp, Device, ScalarOp, StorageId, UnaryOp};
use crate::error::{Error, Result};
use crate::parameter::Parameter;
use crate::shape::Shape;
use crate::tensor::Tensor;

// Graph — the define-by-run computation DAG
//
// Operator factories (see the `ops` module) append vertices to a Graph as
// client code runs; nothing is declared ahead of time. Each vertex records
// an operator tag with its constants, the indices of its input vertices,
// and the eagerly inferred output shape. Because every input index is
// strictly smaller than the vertex's own index, the vertex list is a
// topological order by construction and needs no sorting.
//
// `forward` walks ancestors iteratively in post-order, runs each vertex's
// kernel on its inputs' cached tensors, and memoizes the result; re-entry
// is idempotent. `backward` seeds the loss vertex with ones and sweeps the
// reachable vertices in reverse creation order, applying each operator's
// vector-Jacobian rule and accumulating into one gradient tensor per
// vertex; parameter vertices flush their accumulator into the referenced
// Parameter's gradient.
//
// A Graph is single-use: construct, populate, evaluate, drop. It borrows
// its Parameters (`&'p Parameter`), so every Parameter outlives the Graph
// by construction.

/// Handle to a vertex of a specific [`Graph`].
///
/// A Node carries no data; all per-vertex state lives in the Graph it was
/// created by, and it is only meaningful together with that Graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node(pub(crate) usize);

/// Operator tag plus operator-specific constants, one per vertex.
///
/// Dropout and softmax cross-entropy carry a cache slot filled at forward
/// time (the scaled keep-mask, the softmax output) that their backward
/// rules read.
pub(crate) enum Operator<'p> {
    Input { values: Vec<f32> },
    Parameter { param: &'p Parameter },
    Add,
    Sub,
    Mul,
    Div,
    AddConst { k: f32 },
    SubConst { k: f32 },
    ConstSub { k: f32 },
    MulConst { k: f32 },
    DivConst { k: f32 },
    ConstDiv { k: f32 },
    Neg,
    Exp,
    Tanh,
    Sigmoid,
    Relu,
    Transpose,
    Matmul,
    Sum { dim: usize },
    BatchSum,
    BatchMean,
    Slice { dim: usize, offset: usize },
    Concat { dim: usize },
    Dropout { p: f32, train: bool, mask: Option<Tensor> },
    SoftmaxCrossEntropy { labels: Vec<u32>, dim: usize, softmax: Option<Tensor> },
}

pub(crate) struct Vertex<'p> {
    pub(crate) operator: Operator<'p>,
    pub(crate) args: Vec<usize>,
    pub(crate) shape: Shape,
    pub(crate) value: Option<Tensor>,
}

/// DAG of operator invocations driving forward evaluation and reverse-mode
/// differentiation.
pub struct Graph<'p> {
    device: Arc<dyn Device>,
    vertices: Vec<Vertex<'p>>,
}

/// Forward-time cache produced by an operator, written back to its vertex.
enum Cached {
    Mask(Tensor),
    Softmax(Tensor),
}

impl<'p> Graph<'p> {
    /// Create an empty graph whose tensors will live on `device`.
    pub fn new(device: &Arc<dyn Device>) -> Self {
        Graph {
            device: Arc::clone(device),
            vertices: Vec::new(),
        }
    }

    /// The device this graph evaluates on.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Number of vertices appended so far.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// The inferred output shape of a node.
    pub fn node_shape(&self, node: Node) -> Result<&Shape> {
        self.check_node(node)?;
        Ok(&self.vertices[node.0].shape)
    }

    pub(crate) fn check_node(&self, node: Node) -> Result<()> {
        if node.0 >= self.vertices.len() {
            return Err(Error::invalid_state(format!(
                "node {} does not belong to this graph ({} vertices)",
                node.0,
                self.vertices.len()
            )));
        }
        Ok(())
    }

    /// Append a vertex. Input indices are expected to be validated by the
    /// operator factory.
    pub(crate) fn push(
        &mut self,
        operator: Operator<'p>,
        args: Vec<usize>,
        shape: Shape,
    ) -> Node {
        self.vertices.push(Vertex {
            operator,
            args,
            shape,
            value: None,
        });
        Node(self.vertices.len() - 1)
    }

    /// The cached value of a vertex, or the live parameter value for
    /// parameter-reference vertices.
    fn vertex_value(&self, i: usize) -> Result<&Tensor> {
        match &self.vertices[i].operator {
            Operator::Parameter { param } => Ok(param.value()),
            _ => self.vertices[i].value.as_ref().ok_or_else(|| {
                Error::invalid_state(format!("vertex {} has not been evaluated", i))
            }),
        }
    }

    fn evaluated(&self, i: usize) -> bool {
        matches!(self.vertices[i].operator, Operator::Parameter { .. })
            || self.vertices[i].value.is_some()
    }

    /// Wrap a freshly produced storage handle into an owning tensor.
    fn lift(&self, shape: Shape, id: StorageId) -> Tensor {
        Tensor::from_parts(shape, Arc::clone(&self.device), id)
    }

    fn unary(&self, op: UnaryOp, x: &Tensor) -> Result<Tensor> {
        let id = self.device.unary_op(op, x.storage()?, x.shape())?;
        Ok(self.lift(x.shape().clone(), id))
    }

    fn scalar(&self, op: ScalarOp, x: &Tensor, k: f32) -> Result<Tensor> {
        let id = self.device.scalar_op(op, x.storage()?, x.shape(), k)?;
        Ok(self.lift(x.shape().clone(), id))
    }

    fn binary(&self, op: BinaryOp, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let shape = a.shape().broadcast_batch(b.shape())?;
        let id = self
            .device
            .binary_op(op, a.storage()?, a.shape(), b.storage()?, b.shape())?;
        Ok(self.lift(shape, id))
    }

    fn transpose(&self, x: &Tensor) -> Result<Tensor> {
        let s = x.shape();
        let shape = Shape::new([s.dim(1), s.dim(0)], s.batch())?;
        let id = self.device.transpose(x.storage()?, s)?;
        Ok(self.lift(shape, id))
    }

    fn matmul(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let (sa, sb) = (a.shape(), b.shape());
        let shape = Shape::new([sa.dim(0), sb.dim(1)], sa.batch().max(sb.batch()))?;
        let id = self
            .device
            .matmul(a.storage()?, sa, b.storage()?, sb)?;
        Ok(self.lift(shape, id))
    }

    // Forward evaluation

    /// Evaluate `node`, computing and memoizing all of its ancestors.
    ///
    /// Idempotent: vertices evaluated by an earlier call keep their cached
    /// tensors. Parameter-reference vertices read the live parameter value
    /// and are never copied.
    pub fn forward(&mut self, node: Node) -> Result<&Tensor> {
        self.check_node(node)?;
        let mut stack = vec![node.0];
        while let Some(&top) = stack.last() {
            if self.evaluated(top) {
                stack.pop();
                continue;
            }
            let mut ready = true;
            let args = self.vertices[top].args.clone();
            for &a in args.iter().rev() {
                if !self.evaluated(a) {
                    stack.push(a);
                    ready = false;
                }
            }
            if ready {
                self.evaluate(top)?;
                stack.pop();
            }
        }
        self.vertex_value(node.0)
    }

    /// Run one vertex's kernel. All inputs are already evaluated.
    fn evaluate(&mut self, i: usize) -> Result<()> {
        let out_shape = self.vertices[i].shape.clone();
        let dev = &self.device;

        let result: (Tensor, Option<Cached>) = {
            let v = &self.vertices[i];
            let mut ins: Vec<&Tensor> = Vec::with_capacity(v.args.len());
            for &a in &v.args {
                ins.push(self.vertex_value(a)?);
            }
            match &v.operator {
                Operator::Input { values } => {
                    (Tensor::from_values(out_shape.clone(), values, dev)?, None)
                }
                // Never memoized; vertex_value reads the parameter directly.
                Operator::Parameter { .. } => return Ok(()),
                Operator::Add => (self.binary(BinaryOp::Add, ins[0], ins[1])?, None),
                Operator::Sub => (self.binary(BinaryOp::Sub, ins[0], ins[1])?, None),
                Operator::Mul => (self.binary(BinaryOp::Mul, ins[0], ins[1])?, None),
                Operator::Div => (self.binary(BinaryOp::Div, ins[0], ins[1])?, None),
                Operator::AddConst { k } => (self.scalar(ScalarOp::AddConst, ins[0], *k)?, None),
                Operator::SubConst { k } => (self.scalar(ScalarOp::SubConst, ins[0], *k)?, None),
                Operator::ConstSub { k } => (self.scalar(ScalarOp::ConstSub, ins[0], *k)?, None),
                Operator::MulConst { k } => (self.scalar(ScalarOp::MulConst, ins[0], *k)?, None),
                Operator::DivConst { k } => (self.scalar(ScalarOp::DivConst, ins[0], *k)?, None),
                Operator::ConstDiv { k } => (self.scalar(ScalarOp::ConstDiv, ins[0], *k)?, None),
                Operator::Neg => (self.unary(UnaryOp::Negate, ins[0])?, None),
                Operator::Exp => (self.unary(UnaryOp::Exp, ins[0])?, None),
                Operator::Tanh => (self.unary(UnaryOp::Tanh, ins[0])?, None),
                Operator::Sigmoid => (self.unary(UnaryOp::Sigmoid, ins[0])?, None),
                Operator::Relu => (self.unary(UnaryOp::Relu, ins[0])?, None),
                Operator::Transpose => (self.transpose(ins[0])?, None),
                Operator::Matmul => (self.matmul(ins[0], ins[1])?, None),
                Operator::Sum { dim } => {
                    let id = dev.sum(ins[0].storage()?, ins[0].shape(), *dim)?;
                    (self.lift(out_shape.clone(), id), None)
                }
                Operator::BatchSum => {
                    let id = dev.batch_sum(ins[0].storage()?, ins[0].shape())?;
                    (self.lift(out_shape.clone(), id), None)
                }
                Operator::BatchMean => {
                    let bs = ins[0].shape().batch();
                    let sum_id = dev.batch_sum(ins[0].storage()?, ins[0].shape())?;
                    let sum = self.lift(out_shape.clone(), sum_id);
                    let mean = self.scalar(ScalarOp::MulConst, &sum, 1.0 / bs as f32)?;
                    (mean, None)
                }
                Operator::Slice { dim, offset } => {
                    let id = dev.slice(
                        ins[0].storage()?,
                        ins[0].shape(),
                        *dim,
                        *offset,
                        &out_shape,
                    )?;
                    (self.lift(out_shape.clone(), id), None)
                }
                Operator::Concat { dim } => {
                    let parts: Vec<(StorageId, &Shape)> = ins
                        .iter()
                        .map(|t| Ok((t.storage()?, t.shape())))
                        .collect::<Result<_>>()?;
                    let id = dev.concat(&parts, *dim, &out_shape)?;
                    (self.lift(out_shape.clone(), id), None)
                }
                Operator::Dropout { p, train, .. } => {
                    if !*train {
                        (ins[0].duplicate()?, None)
                    } else {
                        let keep = Tensor::random_bernoulli(
                            ins[0].shape().clone(),
                            1.0 - *p,
                            dev,
                        )?;
                        let mask = self.scalar(ScalarOp::MulConst, &keep, 1.0 / (1.0 - *p))?;
                        let out = self.binary(BinaryOp::Mul, ins[0], &mask)?;
                        (out, Some(Cached::Mask(mask)))
                    }
                }
                Operator::SoftmaxCrossEntropy { labels, dim, .. } => {
                    let (loss, softmax) =
                        self.softmax_cross_entropy_forward(ins[0], labels, *dim, &out_shape)?;
                    (loss, Some(Cached::Softmax(softmax)))
                }
            }
        };

        let (value, cached) = result;
        self.vertices[i].value = Some(value);
        if let Some(cached) = cached {
            match (&mut self.vertices[i].operator, cached) {
                (Operator::Dropout { mask, .. }, Cached::Mask(m)) => *mask = Some(m),
                (Operator::SoftmaxCrossEntropy { softmax, .. }, Cached::Softmax(s)) => {
                    *softmax = Some(s)
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Softmax along `dim` followed by the picked-label negative log
    /// likelihood, computed host-side. Returns (loss, softmax).
    fn softmax_cross_entropy_forward(
        &self,
        logits: &Tensor,
        labels: &[u32],
        dim: usize,
        out_shape: &Shape,
    ) -> Result<(Tensor, Tensor)> {
        let xs = logits.shape().clone();
        let x = logits.to_vec()?;
        let n = xs.dim(dim);
        let base = xs.elems_under_rank(dim);
        let sample = xs.elems_per_sample();
        let repeat = sample / (base * n);
        let out_sample = out_shape.elems_per_sample();

        let mut p = vec![0.0f32; x.len()];
        let mut loss = vec![0.0f32; out_shape.total_elems()];
        for b in 0..xs.batch() {
            let label = labels[b] as usize;
            for r in 0..repeat {
                for inner in 0..base {
                    let at = |j: usize| b * sample + inner + base * (j + n * r);
                    // shift by the max for numerical stability
                    let mut max = f32::NEG_INFINITY;
                    for j in 0..n {
                        max = max.max(x[at(j)]);
                    }
                    let mut z = 0.0f32;
                    for j in 0..n {
                        let e = (x[at(j)] - max).exp();
                        p[at(j)] = e;
                        z += e;
                    }
                    for j in 0..n {
                        p[at(j)] /= z;
                    }
                    loss[b * out_sample + inner + base * r] = -p[at(label)].ln();
                }
            }
        }
        let loss = Tensor::from_values(out_shape.clone(), &loss, &self.device)?;
        let softmax = Tensor::from_values(xs, &p, &self.device)?;
        Ok((loss, softmax))
    }

    // Backward evaluation

    /// Reverse-mode differentiation from `node`, accumulating into the
    /// gradients of every Parameter referenced by a reachable vertex.
    ///
    /// `node`'s shape must be a per-sample scalar. Each call re-seeds the
    /// accumulators from zero, so repeated calls produce identical parameter
    /// gradient contributions.
    pub fn backward(&mut self, node: Node) -> Result<()> {
        self.check_node(node)?;
        if self.vertices[node.0].shape.elems_per_sample() != 1 {
            bail!(
                "backward requires a per-sample scalar loss, got shape {}",
                self.vertices[node.0].shape
            );
        }
        self.forward(node)?;

        let n = node.0;
        let mut needed = vec![false; self.vertices.len()];
        let mut stack = vec![n];
        while let Some(i) = stack.pop() {
            if needed[i] {
                continue;
            }
            needed[i] = true;
            stack.extend(self.vertices[i].args.iter().copied());
        }

        // One zeroed accumulator per reachable vertex; the loss is seeded
        // with 1 broadcast over its batch.
        let mut grads: Vec<Option<Tensor>> = Vec::with_capacity(self.vertices.len());
        for (i, v) in self.vertices.iter().enumerate() {
            if needed[i] {
                grads.push(Some(Tensor::constant(v.shape.clone(), 0.0, &self.device)?));
            } else {
                grads.push(None);
            }
        }
        accumulator(&grads, n)?.set_values_const(1.0)?;

        for i in (0..=n).rev() {
            if needed[i] {
                self.backprop_vertex(i, &grads)?;
            }
        }

        for i in 0..=n {
            if !needed[i] {
                continue;
            }
            if let Operator::Parameter { param } = &self.vertices[i].operator {
                param.add_gradient(accumulator(&grads, i)?)?;
            }
        }
        Ok(())
    }

    /// Apply vertex `i`'s vector-Jacobian rule: for each input, compute the
    /// gradient contribution from `i`'s upstream gradient and add it to the
    /// input's accumulator.
    fn backprop_vertex(&self, i: usize, grads: &[Option<Tensor>]) -> Result<()> {
        let up = accumulator(grads, i)?;
        let v = &self.vertices[i];
        let args = &v.args;
        let dev = &self.device;

        match &v.operator {
            Operator::Input { .. } | Operator::Parameter { .. } => {}

            Operator::Add => {
                accumulator(grads, args[0])?.add_gradient(up)?;
                accumulator(grads, args[1])?.add_gradient(up)?;
            }
            Operator::Sub => {
                accumulator(grads, args[0])?.add_gradient(up)?;
                let neg = self.unary(UnaryOp::Negate, up)?;
                accumulator(grads, args[1])?.add_gradient(&neg)?;
            }
            Operator::Mul => {
                let a = self.vertex_value(args[0])?;
                let b = self.vertex_value(args[1])?;
                let ga = self.binary(BinaryOp::Mul, up, b)?;
                accumulator(grads, args[0])?.add_gradient(&ga)?;
                let gb = self.binary(BinaryOp::Mul, up, a)?;
                accumulator(grads, args[1])?.add_gradient(&gb)?;
            }
            Operator::Div => {
                let a = self.vertex_value(args[0])?;
                let b = self.vertex_value(args[1])?;
                let ga = self.binary(BinaryOp::Div, up, b)?;
                accumulator(grads, args[0])?.add_gradient(&ga)?;
                // d(a/b)/db = -a / b²
                let num = self.binary(BinaryOp::Mul, up, a)?;
                let den = self.binary(BinaryOp::Mul, b, b)?;
                let quot = self.binary(BinaryOp::Div, &num, &den)?;
                let gb = self.unary(UnaryOp::Negate, &quot)?;
                accumulator(grads, args[1])?.add_gradient(&gb)?;
            }

            Operator::AddConst { .. } | Operator::SubConst { .. } => {
                accumulator(grads, args[0])?.add_gradient(up)?;
            }
            Operator::ConstSub { .. } => {
                let neg = self.unary(UnaryOp::Negate, up)?;
                accumulator(grads, args[0])?.add_gradient(&neg)?;
            }
            Operator::MulConst { k } => {
                let g = self.scalar(ScalarOp::MulConst, up, *k)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }
            Operator::DivConst { k } => {
                let g = self.scalar(ScalarOp::DivConst, up, *k)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }
            Operator::ConstDiv { k } => {
                // d(k/x)/dx = -k / x²
                let x = self.vertex_value(args[0])?;
                let num = self.scalar(ScalarOp::MulConst, up, -*k)?;
                let den = self.binary(BinaryOp::Mul, x, x)?;
                let g = self.binary(BinaryOp::Div, &num, &den)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }

            Operator::Neg => {
                let g = self.unary(UnaryOp::Negate, up)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }
            Operator::Exp => {
                let y = self.vertex_value(i)?;
                let g = self.binary(BinaryOp::Mul, up, y)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }
            Operator::Tanh => {
                // 1 - tanh²(x), from the cached output
                let y = self.vertex_value(i)?;
                let y2 = self.binary(BinaryOp::Mul, y, y)?;
                let d = self.scalar(ScalarOp::ConstSub, &y2, 1.0)?;
                let g = self.binary(BinaryOp::Mul, up, &d)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }
            Operator::Sigmoid => {
                // σ(x)·(1 − σ(x)), from the cached output
                let y = self.vertex_value(i)?;
                let one_minus = self.scalar(ScalarOp::ConstSub, y, 1.0)?;
                let d = self.binary(BinaryOp::Mul, y, &one_minus)?;
                let g = self.binary(BinaryOp::Mul, up, &d)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }
            Operator::Relu => {
                let x = self.vertex_value(args[0])?;
                let step = self.unary(UnaryOp::Step, x)?;
                let g = self.binary(BinaryOp::Mul, up, &step)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }

            Operator::Transpose => {
                let g = self.transpose(up)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }
            Operator::Matmul => {
                let a = self.vertex_value(args[0])?;
                let b = self.vertex_value(args[1])?;
                let bt = self.transpose(b)?;
                let ga = self.matmul(up, &bt)?;
                accumulator(grads, args[0])?.add_gradient(&ga)?;
                let at = self.transpose(a)?;
                let gb = self.matmul(&at, up)?;
                accumulator(grads, args[1])?.add_gradient(&gb)?;
            }

            Operator::Sum { dim } => {
                // Replicate the upstream gradient along the reduced axis by
                // splicing the same storage n times; the broadcast kernel is
                // reserved and must not be used here.
                let input_shape = &self.vertices[args[0]].shape;
                let n = input_shape.dim(*dim);
                let up_id = up.storage()?;
                let parts: Vec<(StorageId, &Shape)> =
                    (0..n).map(|_| (up_id, up.shape())).collect();
                let target = input_shape.resize_batch(up.shape().batch())?;
                let id = dev.concat(&parts, *dim, &target)?;
                let g = self.lift(target, id);
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }
            Operator::BatchSum => {
                // Upstream has batch 1; accumulation broadcasts it across
                // the input batch.
                accumulator(grads, args[0])?.add_gradient(up)?;
            }
            Operator::BatchMean => {
                let bs = self.vertices[args[0]].shape.batch();
                let g = self.scalar(ScalarOp::MulConst, up, 1.0 / bs as f32)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }

            Operator::Slice { dim, offset } => {
                let acc = accumulator(grads, args[0])?;
                dev.add_gradient_offset(
                    acc.storage()?,
                    acc.shape(),
                    up.storage()?,
                    up.shape(),
                    *dim,
                    *offset,
                )?;
            }
            Operator::Concat { dim } => {
                let mut offset = 0;
                for &arg in args {
                    let part_shape = self.vertices[arg]
                        .shape
                        .resize_batch(up.shape().batch())?;
                    let id = dev.slice(up.storage()?, up.shape(), *dim, offset, &part_shape)?;
                    let g = self.lift(part_shape, id);
                    accumulator(grads, arg)?.add_gradient(&g)?;
                    offset += self.vertices[arg].shape.dim(*dim);
                }
            }

            Operator::Dropout { train, mask, .. } => {
                if *train {
                    let mask = mask.as_ref().ok_or_else(|| {
                        Error::invalid_state("dropout mask missing; forward did not run")
                    })?;
                    let g = self.binary(BinaryOp::Mul, up, mask)?;
                    accumulator(grads, args[0])?.add_gradient(&g)?;
                } else {
                    accumulator(grads, args[0])?.add_gradient(up)?;
                }
            }

            Operator::SoftmaxCrossEntropy { labels, dim, softmax } => {
                let softmax = softmax.as_ref().ok_or_else(|| {
                    Error::invalid_state("softmax cache missing; forward did not run")
                })?;
                let g = self.softmax_cross_entropy_backward(softmax, labels, *dim, up)?;
                accumulator(grads, args[0])?.add_gradient(&g)?;
            }
        }
        Ok(())
    }

    /// (softmax − onehot) scaled by the upstream gradient, computed
    /// host-side from the cached softmax.
    fn softmax_cross_entropy_backward(
        &self,
        softmax: &Tensor,
        labels: &[u32],
        dim: usize,
        up: &Tensor,
    ) -> Result<Tensor> {
        let xs = softmax.shape().clone();
        let p = softmax.to_vec()?;
        let u = up.to_vec()?;
        let n = xs.dim(dim);
        let base = xs.elems_under_rank(dim);
        let sample = xs.elems_per_sample();
        let repeat = sample / (base * n);
        let out_sample = up.shape().elems_per_sample();

        let mut g = vec![0.0f32; p.len()];
        for b in 0..xs.batch() {
            let label = labels[b] as usize;
            for r in 0..repeat {
                for inner in 0..base {
                    let scale = u[b * out_sample + inner + base * r];
                    for j in 0..n {
                        let at = b * sample + inner + base * (j + n * r);
                        let onehot = if j == label { 1.0 } else { 0.0 };
                        g[at] = (p[at] - onehot) * scale;
                    }
                }
            }
        }
        Tensor::from_values(xs, &g, &self.device)
    }
}

/// The gradient accumulator of vertex `i`.
fn accumulator(grads: &[Option<Tensor>], i: usize) -> Result<&Tensor> {
    grads[i]
        .as_ref()
        .ok_or_else(|| Error::invalid_state(format!("vertex {} has no gradient accumulator", i)))
}
