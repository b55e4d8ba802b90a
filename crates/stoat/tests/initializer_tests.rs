// Initializer tests: deterministic fills, rank validation, and the range
// and moment contracts of the random distributions.

use std::sync::Arc;

use stoat::prelude::*;

fn cpu(seed: u64) -> Arc<dyn Device> {
    Arc::new(CpuDevice::with_seed(seed))
}

fn init_tensor(shape: Shape, init: &Initializer, dev: &Arc<dyn Device>) -> Result<Tensor> {
    let mut t = Tensor::constant(shape, 0.0, dev)?;
    init.apply(&mut t)?;
    Ok(t)
}

#[test]
fn test_constant_fill() -> Result<()> {
    let dev = cpu(0);
    for k in [1.0f32, 10.0, 100.0, 1000.0] {
        let t = init_tensor(Shape::new([3, 3], 1)?, &Initializer::Constant(k), &dev)?;
        assert_eq!(t.to_vec()?, vec![k; 9]);
    }
    Ok(())
}

#[test]
fn test_constant_seven_scenario() -> Result<()> {
    let dev = cpu(0);
    let t = init_tensor(Shape::new([3, 3], 1)?, &Initializer::Constant(7.0), &dev)?;
    assert_eq!(t.to_vec()?, vec![7.0; 9]);
    Ok(())
}

#[test]
fn test_identity_fill() -> Result<()> {
    let dev = cpu(0);
    let n = 16;
    let t = init_tensor(Shape::new([n, n], 1)?, &Initializer::Identity, &dev)?;
    let v = t.to_vec()?;
    for (i, x) in v.iter().enumerate() {
        let expected = if i % (n + 1) == 0 { 1.0 } else { 0.0 };
        assert_eq!(*x, expected, "index {}", i);
    }
    Ok(())
}

#[test]
fn test_identity_invalid_shapes() -> Result<()> {
    let dev = cpu(0);
    for shape in [
        Shape::new([2], 1)?,
        Shape::new([2, 3], 1)?,
        Shape::new([2, 2, 2], 1)?,
    ] {
        let r = init_tensor(shape, &Initializer::Identity, &dev);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }
    Ok(())
}

#[test]
fn test_uniform_range() -> Result<()> {
    let dev = cpu(31);
    let t = init_tensor(
        Shape::new([64, 64], 1)?,
        &Initializer::Uniform { lower: -0.1, upper: 0.1 },
        &dev,
    )?;
    for v in t.to_vec()? {
        assert!(v > -0.1 && v <= 0.1, "draw {} outside (-0.1, 0.1]", v);
    }
    Ok(())
}

#[test]
fn test_normal_moments() -> Result<()> {
    let dev = cpu(37);
    let t = init_tensor(
        Shape::new([100, 100], 1)?,
        &Initializer::Normal { mean: -3.0, sd: 2.0 },
        &dev,
    )?;
    let v = t.to_vec()?;
    let mean = v.iter().sum::<f32>() / v.len() as f32;
    let sd = (v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / v.len() as f32).sqrt();
    assert!((mean + 3.0).abs() < 0.1, "mean {}", mean);
    assert!((sd - 2.0).abs() < 0.1, "sd {}", sd);
    Ok(())
}

#[test]
fn test_xavier_uniform_bound() -> Result<()> {
    let dev = cpu(41);
    let n = 64;
    for scale in [0.5f32, 1.0, 2.0] {
        let t = init_tensor(
            Shape::new([n, n], 1)?,
            &Initializer::XavierUniform { scale },
            &dev,
        )?;
        let bound = scale * (6.0 / (n + n) as f32).sqrt();
        for v in t.to_vec()? {
            assert!(
                v > -bound && v <= bound,
                "draw {} outside (-{}, {}]",
                v,
                bound,
                bound
            );
        }
    }
    Ok(())
}

#[test]
fn test_xavier_normal_moments() -> Result<()> {
    let dev = cpu(43);
    let n = 100;
    let scale = 2.0f32;
    let t = init_tensor(
        Shape::new([n, n], 1)?,
        &Initializer::XavierNormal { scale },
        &dev,
    )?;
    let v = t.to_vec()?;
    let mean = v.iter().sum::<f32>() / v.len() as f32;
    let sd = (v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / v.len() as f32).sqrt();
    let expected_sd = scale * (2.0 / (n + n) as f32).sqrt();
    assert!(mean.abs() < 0.01, "mean {}", mean);
    assert!((sd - expected_sd).abs() < 0.01, "sd {} vs {}", sd, expected_sd);
    Ok(())
}

#[test]
fn test_xavier_invalid_rank() -> Result<()> {
    let dev = cpu(0);
    for shape in [Shape::new([2, 3, 4], 1)?, Shape::new([2, 3, 4, 5], 1)?] {
        let u = init_tensor(shape.clone(), &Initializer::XavierUniform { scale: 1.0 }, &dev);
        assert!(matches!(u, Err(Error::InvalidArgument(_))));
        let n = init_tensor(shape, &Initializer::XavierNormal { scale: 1.0 }, &dev);
        assert!(matches!(n, Err(Error::InvalidArgument(_))));
    }
    Ok(())
}

#[test]
fn test_parameter_initialization() -> Result<()> {
    let dev = cpu(47);
    let p = Parameter::new(
        "w",
        Shape::new([8, 4], 1)?,
        &Initializer::XavierUniform { scale: 1.0 },
        &dev,
    )?;
    assert_eq!(p.name(), "w");
    assert_eq!(p.shape(), &Shape::new([8, 4], 1)?);
    assert!(p.value().to_vec()?.iter().any(|&v| v != 0.0));
    assert_eq!(p.gradient().to_vec()?, vec![0.0; 32]);
    Ok(())
}
