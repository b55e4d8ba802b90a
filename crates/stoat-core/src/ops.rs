use crate::error::Result;
use crate::graph::{Graph, Node, Operator};
use crate::parameter::Parameter;
use crate::shape::Shape;

// ops — operator factories
//
// Every function here appends one vertex to the given graph and returns its
// Node handle. Shape inference and input validation happen eagerly, so a
// malformed network fails at construction, not at evaluation. The graph is
// passed explicitly; there is no ambient "current graph".

/// Store a constant payload on the graph's device.
///
/// `values` is column-major with batch outermost and must contain exactly
/// `shape.total_elems()` entries.
pub fn input(g: &mut Graph<'_>, shape: Shape, values: Vec<f32>) -> Result<Node> {
    if values.len() != shape.total_elems() {
        bail!(
            "input payload has {} values but shape {} needs {}",
            values.len(),
            shape,
            shape.total_elems()
        );
    }
    Ok(g.push(Operator::Input { values }, vec![], shape))
}

/// Reference a parameter's live value.
///
/// The parameter must live on the graph's device; the graph borrows it for
/// the graph's whole lifetime.
pub fn parameter<'p>(g: &mut Graph<'p>, p: &'p Parameter) -> Result<Node> {
    if !p.value().on_device(g.device()) {
        bail!(
            "parameter '{}' does not live on the {} device",
            p.name(),
            g.device().name()
        );
    }
    let shape = p.shape().clone();
    Ok(g.push(Operator::Parameter { param: p }, vec![], shape))
}

fn elementwise(g: &mut Graph<'_>, op: Operator<'static>, a: Node, b: Node) -> Result<Node> {
    g.check_node(a)?;
    g.check_node(b)?;
    let shape = g.node_shape(a)?.broadcast_batch(g.node_shape(b)?)?;
    Ok(g.push(op, vec![a.0, b.0], shape))
}

/// x + y, element-wise with batch broadcasting.
pub fn add(g: &mut Graph<'_>, a: Node, b: Node) -> Result<Node> {
    elementwise(g, Operator::Add, a, b)
}

/// x − y, element-wise with batch broadcasting.
pub fn sub(g: &mut Graph<'_>, a: Node, b: Node) -> Result<Node> {
    elementwise(g, Operator::Sub, a, b)
}

/// x · y, element-wise with batch broadcasting.
pub fn mul(g: &mut Graph<'_>, a: Node, b: Node) -> Result<Node> {
    elementwise(g, Operator::Mul, a, b)
}

/// x / y, element-wise with batch broadcasting.
pub fn div(g: &mut Graph<'_>, a: Node, b: Node) -> Result<Node> {
    elementwise(g, Operator::Div, a, b)
}

fn unary(g: &mut Graph<'_>, op: Operator<'static>, x: Node) -> Result<Node> {
    g.check_node(x)?;
    let shape = g.node_shape(x)?.clone();
    Ok(g.push(op, vec![x.0], shape))
}

/// x + k.
pub fn add_const(g: &mut Graph<'_>, x: Node, k: f32) -> Result<Node> {
    unary(g, Operator::AddConst { k }, x)
}

/// x − k.
pub fn sub_const(g: &mut Graph<'_>, x: Node, k: f32) -> Result<Node> {
    unary(g, Operator::SubConst { k }, x)
}

/// k − x.
pub fn const_sub(g: &mut Graph<'_>, k: f32, x: Node) -> Result<Node> {
    unary(g, Operator::ConstSub { k }, x)
}

/// x · k.
pub fn mul_const(g: &mut Graph<'_>, x: Node, k: f32) -> Result<Node> {
    unary(g, Operator::MulConst { k }, x)
}

/// x / k.
pub fn div_const(g: &mut Graph<'_>, x: Node, k: f32) -> Result<Node> {
    unary(g, Operator::DivConst { k }, x)
}

/// k / x.
pub fn const_div(g: &mut Graph<'_>, k: f32, x: Node) -> Result<Node> {
    unary(g, Operator::ConstDiv { k }, x)
}

/// −x.
pub fn neg(g: &mut Graph<'_>, x: Node) -> Result<Node> {
    unary(g, Operator::Neg, x)
}

/// e^x.
pub fn exp(g: &mut Graph<'_>, x: Node) -> Result<Node> {
    unary(g, Operator::Exp, x)
}

/// tanh(x).
pub fn tanh(g: &mut Graph<'_>, x: Node) -> Result<Node> {
    unary(g, Operator::Tanh, x)
}

/// Logistic sigmoid.
pub fn sigmoid(g: &mut Graph<'_>, x: Node) -> Result<Node> {
    unary(g, Operator::Sigmoid, x)
}

/// max(0, x).
pub fn relu(g: &mut Graph<'_>, x: Node) -> Result<Node> {
    unary(g, Operator::Relu, x)
}

/// Transpose of a matrix (or vector) over the leading two axes.
pub fn transpose(g: &mut Graph<'_>, x: Node) -> Result<Node> {
    g.check_node(x)?;
    let s = g.node_shape(x)?;
    if s.rank() > 2 {
        bail!("transpose requires rank <= 2, got {}", s);
    }
    let shape = Shape::new([s.dim(1), s.dim(0)], s.batch())?;
    Ok(g.push(Operator::Transpose, vec![x.0], shape))
}

/// Matrix product: a is (d1, d2), b is (d2, d3), the result is (d1, d3);
/// batches broadcast like the element-wise binaries.
pub fn matmul(g: &mut Graph<'_>, a: Node, b: Node) -> Result<Node> {
    g.check_node(a)?;
    g.check_node(b)?;
    let sa = g.node_shape(a)?;
    let sb = g.node_shape(b)?;
    if sa.rank() > 2 || sb.rank() > 2 {
        bail!("matmul requires rank <= 2 operands, got {} and {}", sa, sb);
    }
    if sa.dim(1) != sb.dim(0) {
        bail!("matmul inner extents differ: {} vs {}", sa, sb);
    }
    if sa.batch() != sb.batch() && sa.batch() != 1 && sb.batch() != 1 {
        bail!("matmul batch sizes incompatible: {} vs {}", sa, sb);
    }
    let shape = Shape::new([sa.dim(0), sb.dim(1)], sa.batch().max(sb.batch()))?;
    Ok(g.push(Operator::Matmul, vec![a.0, b.0], shape))
}

/// Sum over axis `dim`, reducing it to extent 1.
pub fn sum(g: &mut Graph<'_>, x: Node, dim: usize) -> Result<Node> {
    g.check_node(x)?;
    let shape = g.node_shape(x)?.resize_dim(dim, 1)?;
    Ok(g.push(Operator::Sum { dim }, vec![x.0], shape))
}

/// Sum samples across the batch, reducing batch to 1.
pub fn batch_sum(g: &mut Graph<'_>, x: Node) -> Result<Node> {
    g.check_node(x)?;
    let shape = g.node_shape(x)?.resize_batch(1)?;
    Ok(g.push(Operator::BatchSum, vec![x.0], shape))
}

/// Element-wise mean over the batch, reducing batch to 1.
pub fn batch_mean(g: &mut Graph<'_>, x: Node) -> Result<Node> {
    g.check_node(x)?;
    let shape = g.node_shape(x)?.resize_batch(1)?;
    Ok(g.push(Operator::BatchMean, vec![x.0], shape))
}

/// The sub-range `offset .. offset + len` along axis `dim`.
pub fn slice(g: &mut Graph<'_>, x: Node, dim: usize, offset: usize, len: usize) -> Result<Node> {
    g.check_node(x)?;
    let s = g.node_shape(x)?;
    if len == 0 || offset + len > s.dim(dim) {
        bail!(
            "slice range {}..{} exceeds axis {} of {}",
            offset,
            offset + len,
            dim,
            s
        );
    }
    let shape = s.resize_dim(dim, len)?;
    Ok(g.push(Operator::Slice { dim, offset }, vec![x.0], shape))
}

/// Splice nodes along axis `dim`. All other extents must match; batches
/// broadcast.
pub fn concat(g: &mut Graph<'_>, xs: &[Node], dim: usize) -> Result<Node> {
    if xs.is_empty() {
        bail!("concat needs at least one input");
    }
    for &x in xs {
        g.check_node(x)?;
    }
    let first = g.node_shape(xs[0])?.clone();
    let mut total = first.dim(dim);
    let mut batch = first.batch();
    for &x in &xs[1..] {
        let s = g.node_shape(x)?;
        if !s.resize_dim(dim, 1)?.has_same_dims(&first.resize_dim(dim, 1)?) {
            bail!("concat extents differ off axis {}: {} vs {}", dim, first, s);
        }
        if s.batch() != batch && s.batch() != 1 && batch != 1 {
            bail!("concat batch sizes incompatible: {} vs {}", batch, s.batch());
        }
        total += s.dim(dim);
        batch = batch.max(s.batch());
    }
    let shape = first.resize_dim(dim, total)?.resize_batch(batch)?;
    let args = xs.iter().map(|n| n.0).collect();
    Ok(g.push(Operator::Concat { dim }, args, shape))
}

/// Dropout: during training each element is zeroed with probability `p` and
/// the survivors are scaled by 1/(1−p); in evaluation mode the input passes
/// through unchanged.
pub fn dropout(g: &mut Graph<'_>, x: Node, p: f32, train: bool) -> Result<Node> {
    if !(0.0..1.0).contains(&p) {
        bail!("dropout probability must be in [0, 1), got {}", p);
    }
    unary(g, Operator::Dropout { p, train, mask: None }, x)
}

/// Softmax along axis `dim` followed by the negative log likelihood of the
/// per-sample label. The result keeps the logits shape with `dim` reduced
/// to 1.
pub fn softmax_cross_entropy(
    g: &mut Graph<'_>,
    logits: Node,
    labels: &[u32],
    dim: usize,
) -> Result<Node> {
    g.check_node(logits)?;
    let s = g.node_shape(logits)?;
    if labels.len() != s.batch() {
        bail!(
            "got {} labels for logits with batch size {}",
            labels.len(),
            s.batch()
        );
    }
    let classes = s.dim(dim);
    if let Some(&bad) = labels.iter().find(|&&l| l as usize >= classes) {
        bail!("label {} out of range for {} classes", bad, classes);
    }
    let shape = s.resize_dim(dim, 1)?;
    Ok(g.push(
        Operator::SoftmaxCrossEntropy {
            labels: labels.to_vec(),
            dim,
            softmax: None,
        },
        vec![logits.0],
        shape,
    ))
}
