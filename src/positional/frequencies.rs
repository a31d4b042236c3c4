//! Angular frequencies shared by the sinusoidal and rotary encoders.

use ndarray::Array1;

use crate::error::PositionalError;

/// Default frequency base from "Attention is All You Need".
pub const DEFAULT_BASE: f64 = 10_000.0;

/// Largest position for which norm preservation is guaranteed within
/// `atol = 1e-5, rtol = 1e-4` (feature dimension >= 64).
pub const MAX_STABLE_POSITION: usize = 100_000;

/// Rejects odd or zero feature dimensions.
pub fn check_dimension(dim: usize) -> Result<(), PositionalError> {
    if dim == 0 || dim % 2 != 0 {
        return Err(PositionalError::InvalidDimension { dim });
    }
    Ok(())
}

pub fn check_base(base: f64) -> Result<(), PositionalError> {
    if !base.is_finite() || base <= 0.0 {
        return Err(PositionalError::InvalidBase { base });
    }
    Ok(())
}

/// `theta_i = 10000^(-2i / dim)` for `i in 0..dim / 2`.
pub fn generate_frequencies(dim: usize) -> Result<Array1<f64>, PositionalError> {
    generate_frequencies_with_base(dim, DEFAULT_BASE)
}

/// `theta_i = base^(-2i / dim)` for `i in 0..dim / 2`, strictly decreasing from 1.
pub fn generate_frequencies_with_base(
    dim: usize,
    base: f64,
) -> Result<Array1<f64>, PositionalError> {
    check_dimension(dim)?;
    check_base(base)?;

    let half = dim / 2;
    let dim = dim as f64;
    Ok(Array1::from_shape_fn(half, |i| base.powf(-(2.0 * i as f64) / dim)))
}
