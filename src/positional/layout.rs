//! Axis bookkeeping shared by the encoders: which axis holds positions, and
//! how a `[positions, dim]` table is reshaped to broadcast against an input of
//! arbitrary rank.

use ndarray::{Array2, ArrayD, IxDyn};

use crate::error::PositionalError;

/// Resolves a possibly negative position axis against `ndim` dimensions.
///
/// The trailing axis is the feature axis and can never be the position axis.
pub(crate) fn resolve_position_axis(
    position_axis: isize,
    ndim: usize,
) -> Result<usize, PositionalError> {
    if ndim < 2 {
        return Err(PositionalError::shape_mismatch(format!(
            "input needs a position axis and a feature axis, got {ndim} dimension(s)"
        )));
    }
    let resolved = if position_axis < 0 {
        ndim as isize + position_axis
    } else {
        position_axis
    };
    if resolved < 0 || resolved as usize >= ndim - 1 {
        return Err(PositionalError::InvalidAxis {
            axis: position_axis,
            ndim,
        });
    }
    Ok(resolved as usize)
}

pub(crate) fn check_feature_axis(shape: &[usize], dim: usize) -> Result<(), PositionalError> {
    match shape.last() {
        Some(&features) if features == dim => Ok(()),
        Some(&features) => Err(PositionalError::shape_mismatch(format!(
            "trailing axis has {features} features, encoder dimension is {dim}"
        ))),
        None => Err(PositionalError::shape_mismatch(
            "scalar input has no feature axis",
        )),
    }
}

/// Reshapes a `[positions, dim]` table to `[1, .., positions, .., 1, dim]`
/// with the positions on `position_axis`.
pub(crate) fn broadcastable<F>(
    table: Array2<F>,
    ndim: usize,
    position_axis: usize,
) -> Result<ArrayD<F>, PositionalError> {
    let (positions, dim) = table.dim();
    let mut shape = vec![1usize; ndim];
    shape[position_axis] = positions;
    shape[ndim - 1] = dim;
    Ok(table.into_shape_with_order(IxDyn(&shape))?)
}
