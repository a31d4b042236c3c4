use ndarray::{Array, Array1, Array2, Array3, ArrayBase, Data, Dimension, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PositionalError;
use crate::positional::frequencies::{generate_frequencies_with_base, DEFAULT_BASE};
use crate::positional::layout::{broadcastable, check_feature_axis, resolve_position_axis};
use crate::positional::PositionalEncoding;
use crate::utils::{PositionalEncodingType, Scalar, TrigFloat};

/// Sinusoidal positional encoding
///
/// Row `p` holds `sin(p * theta_i)` at column `2i` and `cos(p * theta_i)` at
/// column `2i + 1`. Tables are rebuilt on every call; the struct only keeps
/// the parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinusoidalPositionalEncoding {
    dim: usize,
    base: f64,
    max_positions: Option<usize>,
}

impl SinusoidalPositionalEncoding {
    pub fn new(dim: usize) -> Result<Self, PositionalError> {
        Self::with_base(dim, DEFAULT_BASE)
    }

    pub fn with_base(dim: usize, base: f64) -> Result<Self, PositionalError> {
        // validates both dim and base
        generate_frequencies_with_base(dim, base)?;
        Ok(Self {
            dim,
            base,
            max_positions: None,
        })
    }

    /// Rejects inputs longer than `max_positions` in [`Self::add_to`].
    pub fn with_max_positions(mut self, max_positions: usize) -> Self {
        self.max_positions = Some(max_positions);
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn max_positions(&self) -> Option<usize> {
        self.max_positions
    }

    /// `[seq_len, dim]` table for positions `0..seq_len`.
    pub fn table(&self, seq_len: usize) -> Result<Array2<f64>, PositionalError> {
        let theta = generate_frequencies_with_base(self.dim, self.base)?;
        Ok(build_rows(&theta, seq_len, |row| row))
    }

    /// One row per entry of `positions`, in order.
    pub fn rows(&self, positions: &[usize]) -> Result<Array2<f64>, PositionalError> {
        let theta = generate_frequencies_with_base(self.dim, self.base)?;
        Ok(build_rows(&theta, positions.len(), |row| positions[row]))
    }

    /// Adds the table to `x` along `position_axis`, broadcasting over every
    /// other non-feature axis. Output keeps the element type of `x`.
    pub fn add_to<S, T, D>(
        &self,
        x: &ArrayBase<S, D>,
        position_axis: isize,
    ) -> Result<Array<T, D>, PositionalError>
    where
        S: Data<Elem = T>,
        T: Scalar,
        D: Dimension,
    {
        let axis = resolve_position_axis(position_axis, x.ndim())?;
        check_feature_axis(x.shape(), self.dim)?;
        let seq_len = x.shape()[axis];
        if let Some(max) = self.max_positions {
            if seq_len > max {
                return Err(PositionalError::shape_mismatch(format!(
                    "sequence of length {seq_len} exceeds the {max} encoded positions"
                )));
            }
        }
        debug!(
            shape = ?x.shape(),
            position_axis = axis,
            dtype = T::NAME,
            "adding sinusoidal encoding"
        );

        let table = self.table(seq_len)?.mapv(<T::Compute as TrigFloat>::from_f64);
        let table = broadcastable(table, x.ndim(), axis)?;
        let table = table.broadcast(x.shape()).ok_or_else(|| {
            PositionalError::shape_mismatch(format!(
                "cannot broadcast {:?} to {:?}",
                table.shape(),
                x.shape()
            ))
        })?;

        let out = Zip::from(x.view().into_dyn())
            .and(&table)
            .map_collect(|&v, &pe| T::narrow(v.widen() + pe));
        Ok(out.into_dimensionality::<D>()?)
    }
}

impl PositionalEncoding for SinusoidalPositionalEncoding {
    fn kind(&self) -> PositionalEncodingType {
        PositionalEncodingType::Sinusoidal
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>, PositionalError> {
        self.add_to(input, 1)
    }
}

/// `[seq_len, dim]` sinusoidal table for positions `0..seq_len`.
///
/// Every row depends only on its own position, so a longer table always
/// starts with the shorter one, for odd and even lengths alike.
pub fn sinusoidal_encode(dim: usize, seq_len: usize) -> Result<Array2<f64>, PositionalError> {
    SinusoidalPositionalEncoding::new(dim)?.table(seq_len)
}

/// Rows of the sinusoidal table for arbitrary positions.
pub fn sinusoidal_rows(dim: usize, positions: &[usize]) -> Result<Array2<f64>, PositionalError> {
    SinusoidalPositionalEncoding::new(dim)?.rows(positions)
}

fn build_rows(
    theta: &Array1<f64>,
    n_rows: usize,
    position: impl Fn(usize) -> usize,
) -> Array2<f64> {
    let dim = theta.len() * 2;
    Array2::from_shape_fn((n_rows, dim), |(row, col)| {
        let angle = position(row) as f64 * theta[col / 2];
        if col % 2 == 0 {
            angle.sin()
        } else {
            angle.cos()
        }
    })
}
