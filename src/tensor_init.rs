/*!
# Tensor initialization functions

Random initializers used by the layer builders. Every initializer can either
be sampled on the host from a caller supplied `rand` generator (reproducible
regardless of the libtorch version) or directly by libtorch on the requested
device (reproducible through `tch::manual_seed`).
 */

use rand::Rng;
use rand_distr::{Distribution, Normal};
use tch::{Device, Kind, Tensor};

use crate::error::{Error, Result};

/// Samples of a truncated normal further than this many standard deviations
/// from the mean are drawn again.
pub const TRUNCATION_CUTOFF: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Const(f64),
    Normal { mean: f64, stddev: f64 },
    TruncatedNormal { mean: f64, stddev: f64 },
}

impl Init {
    /**
    Sample a float CPU tensor of shape `dims` using `rng`.

    # Example
    ```rust,no_run
    # use rand::SeedableRng;
    # use stn_utils::tensor_init::Init;
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let w = Init::TruncatedNormal { mean: 0.0, stddev: 0.02 }
        .sample(&[5, 5, 3, 16], &mut rng)
        .unwrap();
    assert_eq!(w.size(), vec![5, 5, 3, 16]);
    ```
     */
    pub fn sample<R: Rng + ?Sized>(&self, dims: &[i64], rng: &mut R) -> Result<Tensor> {
        let numel = numel(dims)?;
        let values = match *self {
            Init::Const(value) => vec![value as f32; numel],
            Init::Normal { mean, stddev } => {
                let normal = normal(mean, stddev)?;
                std::iter::repeat_with(|| normal.sample(rng) as f32)
                    .take(numel)
                    .collect::<Vec<f32>>()
            }
            Init::TruncatedNormal { mean, stddev } => {
                let normal = normal(mean, stddev)?;
                let bound = TRUNCATION_CUTOFF * stddev;
                std::iter::repeat_with(|| normal.sample(rng))
                    .filter(|v| (v - mean).abs() <= bound)
                    .map(|v| v as f32)
                    .take(numel)
                    .collect::<Vec<f32>>()
            }
        };
        Ok(Tensor::of_slice(&values).reshape(dims))
    }

    /**
    Sample a tensor of shape `dims` with libtorch's own generator.
     */
    pub fn tensor(&self, dims: &[i64], options: (Kind, Device)) -> Result<Tensor> {
        numel(dims)?;
        let tensor = match *self {
            Init::Const(value) => Tensor::f_full(dims, value, options)?,
            Init::Normal { mean, stddev } => {
                check_stddev(stddev)?;
                Tensor::f_randn(dims, options)? * stddev + mean
            }
            Init::TruncatedNormal { mean, stddev } => {
                check_stddev(stddev)?;
                let mut t = Tensor::f_randn(dims, options)?;
                loop {
                    let outside = t.abs().gt(TRUNCATION_CUTOFF);
                    if !bool::from(outside.any()) {
                        break;
                    }
                    t = Tensor::f_randn(dims, options)?.where_self(&outside, &t);
                }
                t * stddev + mean
            }
        };
        Ok(tensor)
    }
}

fn numel(dims: &[i64]) -> Result<usize> {
    if let Some(d) = dims.iter().find(|&&d| d < 0) {
        return Err(Error::invalid("dims", format!("negative dimension {}", d)));
    }
    Ok(dims.iter().product::<i64>() as usize)
}

fn check_stddev(stddev: f64) -> Result<()> {
    if stddev.is_finite() && stddev >= 0.0 {
        Ok(())
    } else {
        Err(Error::invalid(
            "stddev",
            format!("must be finite and non-negative, got {}", stddev),
        ))
    }
}

fn normal(mean: f64, stddev: f64) -> Result<Normal<f64>> {
    check_stddev(stddev)?;
    Normal::new(mean, stddev).map_err(|e| Error::invalid("stddev", e.to_string()))
}
