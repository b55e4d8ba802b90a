// Forward-evaluation tests: operator semantics, shape inference, and the
// algebraic properties the engine guarantees.

use std::sync::Arc;

use stoat::prelude::*;

fn cpu(seed: u64) -> Arc<dyn Device> {
    Arc::new(CpuDevice::with_seed(seed))
}

fn assert_vec_approx(got: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(got.len(), expected.len(), "length mismatch");
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            (g - e).abs() < tol,
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

#[test]
fn test_input_forward() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let x = ops::input(&mut g, Shape::new([2, 2], 1)?, vec![1.0, 2.0, 3.0, 4.0])?;
    assert_eq!(g.forward(x)?.to_vec()?, vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn test_elementwise_forward() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let x = ops::input(&mut g, Shape::new([3], 1)?, vec![1.0, 2.0, 3.0])?;
    let y = ops::input(&mut g, Shape::new([3], 1)?, vec![4.0, 0.5, -1.0])?;

    let s = ops::add(&mut g, x, y)?;
    assert_eq!(g.forward(s)?.to_vec()?, vec![5.0, 2.5, 2.0]);

    let d = ops::sub(&mut g, x, y)?;
    assert_eq!(g.forward(d)?.to_vec()?, vec![-3.0, 1.5, 4.0]);

    let m = ops::mul(&mut g, x, y)?;
    assert_eq!(g.forward(m)?.to_vec()?, vec![4.0, 1.0, -3.0]);

    let q = ops::div(&mut g, x, y)?;
    assert_vec_approx(&g.forward(q)?.to_vec()?, &[0.25, 4.0, -3.0], 1e-6);
    Ok(())
}

#[test]
fn test_batch_broadcast_forward() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let x = ops::input(
        &mut g,
        Shape::new([2], 3)?,
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
    )?;
    let b = ops::input(&mut g, Shape::new([2], 1)?, vec![10.0, 20.0])?;
    let y = ops::add(&mut g, x, b)?;
    assert_eq!(g.node_shape(y)?.batch(), 3);
    assert_eq!(
        g.forward(y)?.to_vec()?,
        vec![11.0, 22.0, 13.0, 24.0, 15.0, 26.0]
    );
    Ok(())
}

#[test]
fn test_linearity() -> Result<()> {
    let dev = cpu(0);
    let xv = [1.5f32, -2.0, 0.25, 3.0];
    let yv = [0.5f32, 1.0, -4.0, 2.0];
    let (a, b) = (3.0f32, -0.5f32);

    let mut g = Graph::new(&dev);
    let x = ops::input(&mut g, Shape::new([4], 1)?, xv.to_vec())?;
    let y = ops::input(&mut g, Shape::new([4], 1)?, yv.to_vec())?;
    let ax = ops::mul_const(&mut g, x, a)?;
    let by = ops::mul_const(&mut g, y, b)?;
    let z = ops::add(&mut g, ax, by)?;

    let expected: Vec<f32> = xv.iter().zip(yv.iter()).map(|(x, y)| a * x + b * y).collect();
    assert_vec_approx(&g.forward(z)?.to_vec()?, &expected, 1e-6);
    Ok(())
}

#[test]
fn test_add_mul_commute() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let x = ops::input(&mut g, Shape::new([3], 1)?, vec![1.0, -2.0, 3.5])?;
    let y = ops::input(&mut g, Shape::new([3], 1)?, vec![0.5, 4.0, -1.0])?;
    let xy = ops::add(&mut g, x, y)?;
    let yx = ops::add(&mut g, y, x)?;
    assert_eq!(g.forward(xy)?.to_vec()?, g.forward(yx)?.to_vec()?);
    let m1 = ops::mul(&mut g, x, y)?;
    let m2 = ops::mul(&mut g, y, x)?;
    assert_eq!(g.forward(m1)?.to_vec()?, g.forward(m2)?.to_vec()?);
    Ok(())
}

#[test]
fn test_const_operators() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let x = ops::input(&mut g, Shape::new([2], 1)?, vec![2.0, 4.0])?;

    let n = ops::add_const(&mut g, x, 1.0)?;
    assert_eq!(g.forward(n)?.to_vec()?, vec![3.0, 5.0]);
    let n = ops::sub_const(&mut g, x, 1.0)?;
    assert_eq!(g.forward(n)?.to_vec()?, vec![1.0, 3.0]);
    let n = ops::const_sub(&mut g, 1.0, x)?;
    assert_eq!(g.forward(n)?.to_vec()?, vec![-1.0, -3.0]);
    let n = ops::mul_const(&mut g, x, 3.0)?;
    assert_eq!(g.forward(n)?.to_vec()?, vec![6.0, 12.0]);
    let n = ops::div_const(&mut g, x, 2.0)?;
    assert_eq!(g.forward(n)?.to_vec()?, vec![1.0, 2.0]);
    let n = ops::const_div(&mut g, 8.0, x)?;
    assert_eq!(g.forward(n)?.to_vec()?, vec![4.0, 2.0]);
    let n = ops::neg(&mut g, x)?;
    assert_eq!(g.forward(n)?.to_vec()?, vec![-2.0, -4.0]);
    Ok(())
}

#[test]
fn test_matmul_scenario() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let a = ops::input(&mut g, Shape::new([2, 2], 1)?, vec![1.0, 2.0, 3.0, 4.0])?;
    let b = ops::input(&mut g, Shape::new([2, 2], 1)?, vec![5.0, 6.0, 7.0, 8.0])?;
    let c = ops::matmul(&mut g, a, b)?;
    assert_eq!(g.forward(c)?.to_vec()?, vec![23.0, 34.0, 31.0, 46.0]);
    Ok(())
}

#[test]
fn test_matmul_identity() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let eye = ops::input(
        &mut g,
        Shape::new([3, 3], 1)?,
        vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    )?;
    let x = ops::input(
        &mut g,
        Shape::new([3, 2], 1)?,
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
    )?;
    let y = ops::matmul(&mut g, eye, x)?;
    assert_eq!(g.forward(y)?.to_vec()?, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    Ok(())
}

#[test]
fn test_matvec() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    // column-major (2, 3): rows are (1, 3, 5) and (2, 4, 6)
    let w = ops::input(
        &mut g,
        Shape::new([2, 3], 1)?,
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
    )?;
    let x = ops::input(&mut g, Shape::new([3], 1)?, vec![1.0, 1.0, 1.0])?;
    let y = ops::matmul(&mut g, w, x)?;
    assert_eq!(g.node_shape(y)?, &Shape::new([2], 1)?);
    assert_eq!(g.forward(y)?.to_vec()?, vec![9.0, 12.0]);
    Ok(())
}

#[test]
fn test_transpose_involution() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let x = ops::input(&mut g, Shape::new([2, 3], 1)?, values.clone())?;
    let t = ops::transpose(&mut g, x)?;
    assert_eq!(g.node_shape(t)?, &Shape::new([3, 2], 1)?);
    let tt = ops::transpose(&mut g, t)?;
    assert_eq!(g.forward(tt)?.to_vec()?, values);
    Ok(())
}

#[test]
fn test_transpose_product_identity() -> Result<()> {
    // dot(Aᵀ, Bᵀ) == transpose(dot(B, A))
    let dev = cpu(5);
    let mut g = Graph::new(&dev);
    let a = ops::input(
        &mut g,
        Shape::new([2, 3], 1)?,
        vec![1.0, -2.0, 0.5, 3.0, 2.0, 1.0],
    )?;
    let b = ops::input(
        &mut g,
        Shape::new([3, 2], 1)?,
        vec![2.0, 0.0, 1.0, -1.0, 4.0, 0.5],
    )?;
    let at = ops::transpose(&mut g, a)?;
    let bt = ops::transpose(&mut g, b)?;
    let lhs = ops::matmul(&mut g, at, bt)?;
    let ba = ops::matmul(&mut g, b, a)?;
    let rhs = ops::transpose(&mut g, ba)?;
    assert_vec_approx(&g.forward(lhs)?.to_vec()?, &g.forward(rhs)?.to_vec()?, 1e-5);
    Ok(())
}

#[test]
fn test_sum_scenario() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let x = ops::input(
        &mut g,
        Shape::new([3, 2], 1)?,
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
    )?;
    let y = ops::sum(&mut g, x, 0)?;
    assert_eq!(g.node_shape(y)?, &Shape::new([1, 2], 1)?);
    assert_eq!(g.forward(y)?.to_vec()?, vec![6.0, 15.0]);
    Ok(())
}

#[test]
fn test_batch_reductions() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let x = ops::input(
        &mut g,
        Shape::new([2], 3)?,
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
    )?;
    let s = ops::batch_sum(&mut g, x)?;
    assert_eq!(g.node_shape(s)?.batch(), 1);
    assert_eq!(g.forward(s)?.to_vec()?, vec![9.0, 12.0]);

    let m = ops::batch_mean(&mut g, x)?;
    assert_vec_approx(&g.forward(m)?.to_vec()?, &[3.0, 4.0], 1e-6);
    Ok(())
}

#[test]
fn test_slice_concat_roundtrip() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let x = ops::input(&mut g, Shape::new([3, 2], 1)?, values.clone())?;
    let lo = ops::slice(&mut g, x, 0, 0, 1)?;
    let hi = ops::slice(&mut g, x, 0, 1, 2)?;
    let back = ops::concat(&mut g, &[lo, hi], 0)?;
    assert_eq!(g.node_shape(back)?, &Shape::new([3, 2], 1)?);
    assert_eq!(g.forward(back)?.to_vec()?, values);
    Ok(())
}

#[test]
fn test_nonlinearities_forward() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let x = ops::input(&mut g, Shape::new([3], 1)?, vec![-1.0, 0.0, 1.0])?;

    let r = ops::relu(&mut g, x)?;
    assert_eq!(g.forward(r)?.to_vec()?, vec![0.0, 0.0, 1.0]);

    let s = ops::sigmoid(&mut g, x)?;
    let sv = g.forward(s)?.to_vec()?;
    assert!((sv[1] - 0.5).abs() < 1e-6);
    assert!((sv[0] + sv[2] - 1.0).abs() < 1e-5);

    let t = ops::tanh(&mut g, x)?;
    let tv = g.forward(t)?.to_vec()?;
    assert!(tv[1].abs() < 1e-6);
    assert!((tv[0] + tv[2]).abs() < 1e-6);

    let e = ops::exp(&mut g, x)?;
    let ev = g.forward(e)?.to_vec()?;
    assert!((ev[1] - 1.0).abs() < 1e-6);
    assert!((ev[0] * ev[2] - 1.0).abs() < 1e-5);
    Ok(())
}

#[test]
fn test_softmax_cross_entropy_scenario() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let logits = ops::input(&mut g, Shape::new([3], 1)?, vec![0.0, 0.0, 0.0])?;
    let loss = ops::softmax_cross_entropy(&mut g, logits, &[0], 0)?;
    assert_eq!(g.node_shape(loss)?.elems_per_sample(), 1);
    let v = g.forward(loss)?.to_vec()?;
    assert!((v[0] - 3.0f32.ln()).abs() < 1e-5, "loss {} != ln 3", v[0]);
    Ok(())
}

#[test]
fn test_dropout_eval_is_identity() -> Result<()> {
    let dev = cpu(3);
    let mut g = Graph::new(&dev);
    let values = vec![1.0, -2.0, 3.0, -4.0];
    let x = ops::input(&mut g, Shape::new([4], 1)?, values.clone())?;
    let y = ops::dropout(&mut g, x, 0.5, false)?;
    assert_eq!(g.forward(y)?.to_vec()?, values);
    Ok(())
}

#[test]
fn test_dropout_train_zeroes_or_scales() -> Result<()> {
    let dev = cpu(17);
    let mut g = Graph::new(&dev);
    let values: Vec<f32> = (1..=64).map(|i| i as f32).collect();
    let x = ops::input(&mut g, Shape::new([64], 1)?, values.clone())?;
    let y = ops::dropout(&mut g, x, 0.5, true)?;
    let yv = g.forward(y)?.to_vec()?;
    let mut kept = 0;
    for (out, inp) in yv.iter().zip(values.iter()) {
        assert!(
            *out == 0.0 || (out - 2.0 * inp).abs() < 1e-5,
            "dropout output {} is neither 0 nor 2·{}",
            out,
            inp
        );
        if *out != 0.0 {
            kept += 1;
        }
    }
    assert!(kept > 0 && kept < 64, "mask kept {} of 64 elements", kept);
    Ok(())
}

#[test]
fn test_forward_idempotent() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let x = ops::input(&mut g, Shape::new([2], 1)?, vec![1.0, 2.0])?;
    let y = ops::exp(&mut g, x)?;
    let first = g.forward(y)?.to_vec()?;
    let second = g.forward(y)?.to_vec()?;
    assert_eq!(first, second);
    let handles = dev.live_handles();
    g.forward(y)?;
    // memoized: re-entry allocates nothing
    assert_eq!(dev.live_handles(), handles);
    Ok(())
}

#[test]
fn test_parameter_reads_live_value() -> Result<()> {
    let dev = cpu(0);
    let p = Parameter::new("w", Shape::new([3], 1)?, &Initializer::Constant(2.0), &dev)?;
    let mut g = Graph::new(&dev);
    let w = ops::parameter(&mut g, &p)?;
    assert_eq!(g.forward(w)?.to_vec()?, vec![2.0, 2.0, 2.0]);
    Ok(())
}

#[test]
fn test_shape_inference_failures() -> Result<()> {
    let dev = cpu(0);
    let mut g = Graph::new(&dev);
    let a = ops::input(&mut g, Shape::new([3], 1)?, vec![0.0; 3])?;
    let b = ops::input(&mut g, Shape::new([4], 1)?, vec![0.0; 4])?;
    assert!(matches!(ops::add(&mut g, a, b), Err(Error::InvalidArgument(_))));

    let m = ops::input(&mut g, Shape::new([2, 3], 1)?, vec![0.0; 6])?;
    assert!(matches!(
        ops::matmul(&mut g, m, m),
        Err(Error::InvalidArgument(_))
    ));

    // incompatible batches (2 vs 3)
    let x2 = ops::input(&mut g, Shape::new([3], 2)?, vec![0.0; 6])?;
    let x3 = ops::input(&mut g, Shape::new([3], 3)?, vec![0.0; 9])?;
    assert!(matches!(
        ops::add(&mut g, x2, x3),
        Err(Error::InvalidArgument(_))
    ));

    assert!(matches!(
        ops::slice(&mut g, a, 0, 2, 3),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ops::dropout(&mut g, a, 1.0, true),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ops::softmax_cross_entropy(&mut g, a, &[0, 1], 0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ops::softmax_cross_entropy(&mut g, a, &[3], 0),
        Err(Error::InvalidArgument(_))
    ));

    // payload length mismatch
    assert!(matches!(
        ops::input(&mut g, Shape::new([3], 1)?, vec![0.0; 2]),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn test_foreign_node_rejected() -> Result<()> {
    let dev = cpu(0);
    let mut small = Graph::new(&dev);
    let mut big = Graph::new(&dev);
    let _a = ops::input(&mut big, Shape::new([1], 1)?, vec![1.0])?;
    let b = ops::input(&mut big, Shape::new([1], 1)?, vec![2.0])?;
    // `b` indexes a vertex `small` does not have
    assert!(matches!(small.forward(b), Err(Error::InvalidState(_))));
    Ok(())
}

#[test]
fn test_parameter_device_mismatch() -> Result<()> {
    let dev_a = cpu(1);
    let dev_b = cpu(2);
    let p = Parameter::new("w", Shape::new([2], 1)?, &Initializer::Constant(0.0), &dev_a)?;
    let mut g = Graph::new(&dev_b);
    assert!(matches!(
        ops::parameter(&mut g, &p),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}
