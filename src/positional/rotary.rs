use std::ops::Neg;

use ndarray::{Array, Array2, Array3, ArrayBase, Axis, Data, Dimension, Slice, Zip};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PositionalError;
use crate::positional::frequencies::{
    check_dimension, generate_frequencies_with_base, DEFAULT_BASE, MAX_STABLE_POSITION,
};
use crate::positional::layout::{broadcastable, check_feature_axis, resolve_position_axis};
use crate::positional::PositionalEncoding;
use crate::utils::{PairingConvention, PositionalEncodingType, Scalar, TrigFloat};

/// Rotary Position Embedding (RoPE) implementation
///
/// Rotates pair `i` of the feature vector at position `p` by `p * theta_i`:
/// `out = cos * x + sin * rotate_half(x)`. Which features form a pair is fixed
/// by the [`PairingConvention`], and the angle table and [`rotate_half`] both
/// read it from the same field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotaryPositionEmbedding {
    dim: usize,
    base: f64,
    convention: PairingConvention,
}

impl RotaryPositionEmbedding {
    /// Creates rotary embeddings with the default base and half-split pairs
    pub fn new(dim: usize) -> Result<Self, PositionalError> {
        Self::with_base(dim, DEFAULT_BASE)
    }

    pub fn with_base(dim: usize, base: f64) -> Result<Self, PositionalError> {
        generate_frequencies_with_base(dim, base)?;
        Ok(Self {
            dim,
            base,
            convention: PairingConvention::default(),
        })
    }

    pub fn with_convention(mut self, convention: PairingConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn convention(&self) -> PairingConvention {
        self.convention
    }

    /// `[positions.len(), dim]` angles; both features of a pair hold `p * theta_i`.
    pub fn angle_table(&self, positions: &[usize]) -> Result<Array2<f64>, PositionalError> {
        let theta = generate_frequencies_with_base(self.dim, self.base)?;
        let (dim, convention) = (self.dim, self.convention);
        Ok(Array2::from_shape_fn((positions.len(), dim), |(row, col)| {
            positions[row] as f64 * theta[convention.frequency_index(col, dim)]
        }))
    }

    /// Rotates `x` with position `p` equal to the index along `position_axis`.
    pub fn encode<S, T, D>(
        &self,
        x: &ArrayBase<S, D>,
        position_axis: isize,
    ) -> Result<Array<T, D>, PositionalError>
    where
        S: Data<Elem = T>,
        T: Scalar,
        D: Dimension,
    {
        self.encode_with_offset(x, position_axis, 0)
    }

    /// Like [`Self::encode`] with positions starting at `offset`, for
    /// continuing a sequence that was encoded earlier.
    pub fn encode_with_offset<S, T, D>(
        &self,
        x: &ArrayBase<S, D>,
        position_axis: isize,
        offset: usize,
    ) -> Result<Array<T, D>, PositionalError>
    where
        S: Data<Elem = T>,
        T: Scalar,
        D: Dimension,
    {
        let axis = resolve_position_axis(position_axis, x.ndim())?;
        let positions: Vec<usize> = (offset..offset + x.len_of(Axis(axis))).collect();
        self.rotate(x, axis, &positions)
    }

    /// Rotates `x` using explicit positions, one per index along `position_axis`.
    pub fn encode_at<S, T, D>(
        &self,
        x: &ArrayBase<S, D>,
        position_axis: isize,
        positions: &[usize],
    ) -> Result<Array<T, D>, PositionalError>
    where
        S: Data<Elem = T>,
        T: Scalar,
        D: Dimension,
    {
        let axis = resolve_position_axis(position_axis, x.ndim())?;
        let len = x.len_of(Axis(axis));
        if positions.len() != len {
            return Err(PositionalError::shape_mismatch(format!(
                "position axis {axis} has length {len} but {} positions were given",
                positions.len()
            )));
        }
        self.rotate(x, axis, positions)
    }

    fn rotate<S, T, D>(
        &self,
        x: &ArrayBase<S, D>,
        axis: usize,
        positions: &[usize],
    ) -> Result<Array<T, D>, PositionalError>
    where
        S: Data<Elem = T>,
        T: Scalar,
        D: Dimension,
    {
        check_feature_axis(x.shape(), self.dim)?;
        if let Some(&max) = positions.iter().max() {
            if max > MAX_STABLE_POSITION {
                warn!(
                    max_position = max,
                    limit = MAX_STABLE_POSITION,
                    "rotary positions beyond the stable range; angles lose precision"
                );
            }
        }
        debug!(
            shape = ?x.shape(),
            position_axis = axis,
            convention = self.convention.name(),
            dtype = T::NAME,
            compute = <T::Compute as TrigFloat>::NAME,
            "applying rotary embedding"
        );

        let angles = self.angle_table(positions)?;
        let (cos, sin) = trig_tables::<T::Compute>(&angles);
        let cos = broadcastable(cos, x.ndim(), axis)?;
        let sin = broadcastable(sin, x.ndim(), axis)?;

        let x = x.mapv(T::widen).into_dyn();
        let rotated = rotate_half(&x, self.convention)?;
        let broadcast_error = || {
            PositionalError::shape_mismatch(format!(
                "cannot broadcast {:?} to {:?}",
                cos.shape(),
                x.shape()
            ))
        };
        let cos_b = cos.broadcast(x.shape()).ok_or_else(broadcast_error)?;
        let sin_b = sin.broadcast(x.shape()).ok_or_else(broadcast_error)?;

        let out = Zip::from(&x)
            .and(&rotated)
            .and(&cos_b)
            .and(&sin_b)
            .map_collect(|&v, &r, &c, &s| T::narrow(c * v + s * r));
        Ok(out.into_dimensionality::<D>()?)
    }
}

impl PositionalEncoding for RotaryPositionEmbedding {
    fn kind(&self) -> PositionalEncodingType {
        PositionalEncodingType::Rotary
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>, PositionalError> {
        self.encode(input, 1)
    }
}

/// Rotary encoding with the default base and pairing; the feature dimension
/// is taken from the trailing axis of `x`.
pub fn rotary_encode<S, T, D>(
    x: &ArrayBase<S, D>,
    position_axis: isize,
) -> Result<Array<T, D>, PositionalError>
where
    S: Data<Elem = T>,
    T: Scalar,
    D: Dimension,
{
    let dim = x.shape().last().copied().unwrap_or(0);
    RotaryPositionEmbedding::new(dim)?.encode(x, position_axis)
}

/// The 90 degree rotation of every pair.
///
/// - interleaved: `out[2i] = -x[2i + 1]`, `out[2i + 1] = x[2i]`
/// - half-split: `out = concat(-x[d/2..], x[..d/2])`
pub fn rotate_half<S, F, D>(
    x: &ArrayBase<S, D>,
    convention: PairingConvention,
) -> Result<Array<F, D>, PositionalError>
where
    S: Data<Elem = F>,
    F: Copy + Neg<Output = F>,
    D: Dimension,
{
    if x.ndim() == 0 {
        return Err(PositionalError::shape_mismatch(
            "scalar input has no feature axis",
        ));
    }
    let last = Axis(x.ndim() - 1);
    let dim = x.len_of(last);
    check_dimension(dim)?;

    let mut out = x.to_owned();
    match convention {
        PairingConvention::Interleaved => {
            let evens = Slice::new(0, None, 2);
            let odds = Slice::new(1, None, 2);
            out.slice_axis_mut(last, evens)
                .zip_mut_with(&x.slice_axis(last, odds), |o, &v| *o = -v);
            out.slice_axis_mut(last, odds)
                .assign(&x.slice_axis(last, evens));
        }
        PairingConvention::HalfSplit => {
            let half = (dim / 2) as isize;
            let low = Slice::new(0, Some(half), 1);
            let high = Slice::new(half, None, 1);
            out.slice_axis_mut(last, low)
                .zip_mut_with(&x.slice_axis(last, high), |o, &v| *o = -v);
            out.slice_axis_mut(last, high)
                .assign(&x.slice_axis(last, low));
        }
    }
    Ok(out)
}

/// cos and sin of every angle, evaluated in f64 and narrowed to `F`.
fn trig_tables<F: TrigFloat>(angles: &Array2<f64>) -> (Array2<F>, Array2<F>) {
    let mut cos = Array2::<F>::zeros(angles.raw_dim());
    let mut sin = Array2::<F>::zeros(angles.raw_dim());
    Zip::from(&mut cos)
        .and(&mut sin)
        .and(angles)
        .for_each(|c, s, &angle| {
            let (sin_v, cos_v) = angle.sin_cos();
            *c = F::from_f64(cos_v);
            *s = F::from_f64(sin_v);
        });
    (cos, sin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use half::f16;
    use ndarray::{array, s, Array1, Array4, ArrayD, IxDyn};
    use proptest::prelude::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn randn(shape: &[usize], seed: u64) -> ArrayD<f32> {
        let mut rng = SmallRng::seed_from_u64(seed);
        ArrayD::from_shape_fn(IxDyn(shape), |_| StandardNormal.sample(&mut rng))
    }

    fn norm(v: ndarray::ArrayView1<f32>) -> f32 {
        v.dot(&v).sqrt()
    }

    #[test]
    fn test_shape_preservation_batch_seq_dim() {
        let x = randn(&[2, 10, 64], 1).into_dimensionality::<ndarray::Ix3>().unwrap();
        let out = rotary_encode(&x, -2).unwrap();
        assert_eq!(out.shape(), &[2, 10, 64]);
    }

    #[test]
    fn test_position_zero_is_identity() {
        for convention in [PairingConvention::Interleaved, PairingConvention::HalfSplit] {
            let rope = RotaryPositionEmbedding::new(8).unwrap().with_convention(convention);
            let x = Array2::from_shape_fn((1, 8), |(_, d)| d as f32 + 0.5);
            let out = rope.encode(&x, 0).unwrap();
            for d in 0..8 {
                assert_abs_diff_eq!(out[[0, d]], x[[0, d]], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_known_values_half_split() {
        // theta = [1, 0.01], pairs (0, 2) and (1, 3)
        let rope = RotaryPositionEmbedding::new(4).unwrap();
        let x = array![[1.0f64, 2.0, 3.0, 4.0]];
        let out = rope.encode_at(&x, 0, &[1]).unwrap();
        let (a0, a1) = (1.0f64, 0.01f64);
        assert_abs_diff_eq!(out[[0, 0]], 1.0 * a0.cos() - 3.0 * a0.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(out[[0, 2]], 1.0 * a0.sin() + 3.0 * a0.cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(out[[0, 1]], 2.0 * a1.cos() - 4.0 * a1.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(out[[0, 3]], 2.0 * a1.sin() + 4.0 * a1.cos(), epsilon = 1e-12);
    }

    #[test]
    fn test_known_values_interleaved() {
        // pairs (0, 1) and (2, 3)
        let rope = RotaryPositionEmbedding::new(4)
            .unwrap()
            .with_convention(PairingConvention::Interleaved);
        let x = array![[1.0f64, 2.0, 3.0, 4.0]];
        let out = rope.encode_at(&x, 0, &[1]).unwrap();
        let (a0, a1) = (1.0f64, 0.01f64);
        assert_abs_diff_eq!(out[[0, 0]], 1.0 * a0.cos() - 2.0 * a0.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(out[[0, 1]], 1.0 * a0.sin() + 2.0 * a0.cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(out[[0, 2]], 3.0 * a1.cos() - 4.0 * a1.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(out[[0, 3]], 3.0 * a1.sin() + 4.0 * a1.cos(), epsilon = 1e-12);
    }

    #[test]
    fn test_angle_table_layout_matches_convention() {
        let half_split = RotaryPositionEmbedding::new(8).unwrap();
        let angles = half_split.angle_table(&[3]).unwrap();
        for i in 0..4 {
            assert_eq!(angles[[0, i]], angles[[0, i + 4]]);
        }

        let interleaved = half_split.with_convention(PairingConvention::Interleaved);
        let angles = interleaved.angle_table(&[3]).unwrap();
        for i in 0..4 {
            assert_eq!(angles[[0, 2 * i]], angles[[0, 2 * i + 1]]);
        }
        assert_abs_diff_eq!(angles[[0, 0]], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotate_half_interleaved() {
        let x = array![[1.0f32, 2.0, 3.0, 4.0]];
        let out = rotate_half(&x, PairingConvention::Interleaved).unwrap();
        assert_eq!(out, array![[-2.0f32, 1.0, -4.0, 3.0]]);
    }

    #[test]
    fn test_rotate_half_half_split() {
        let x = array![[1.0f32, 2.0, 3.0, 4.0]];
        let out = rotate_half(&x, PairingConvention::HalfSplit).unwrap();
        assert_eq!(out, array![[-3.0f32, -4.0, 1.0, 2.0]]);
    }

    #[test]
    fn test_rotate_half_twice_negates() {
        let x = randn(&[3, 8], 9);
        for convention in [PairingConvention::Interleaved, PairingConvention::HalfSplit] {
            let twice = rotate_half(&rotate_half(&x, convention).unwrap(), convention).unwrap();
            assert_eq!(twice, x.mapv(|v| -v));
        }
    }

    #[test]
    fn test_norm_preservation() {
        let x = randn(&[2, 10, 64], 2);
        let out = rotary_encode(&x, -2).unwrap();
        for b in 0..2 {
            for p in 0..10 {
                let before = norm(x.slice(s![b, p, ..]));
                let after = norm(out.slice(s![b, p, ..]));
                assert!(
                    (before - after).abs() < 1e-5 + 1e-4 * before,
                    "p={p}: {before} vs {after}"
                );
            }
        }
    }

    #[test]
    fn test_broadcast_over_heads_and_position_axis_zero() {
        // [batch, heads, seq, dim]
        let x = randn(&[2, 3, 5, 16], 3).into_dimensionality::<ndarray::Ix4>().unwrap();
        let rope = RotaryPositionEmbedding::new(16).unwrap();
        let out: Array4<f32> = rope.encode(&x, -2).unwrap();

        // [seq, batch * heads, dim] layout of the same data
        let permuted = Array3::from_shape_vec(
            (5, 6, 16),
            x.view().permuted_axes([2, 0, 1, 3]).iter().copied().collect(),
        )
        .unwrap();
        let out_seq_first = rope.encode(&permuted, 0).unwrap();

        for b in 0..2usize {
            for h in 0..3usize {
                for p in 0..5usize {
                    let expected = out_seq_first.slice(s![p, b * 3 + h, ..]);
                    let actual = out.slice(s![b, h, p, ..]);
                    for d in 0..16 {
                        assert_abs_diff_eq!(actual[d], expected[d], epsilon = 1e-6);
                    }
                }
            }
        }
    }

    #[test]
    fn test_offset_matches_explicit_positions() {
        let x = randn(&[1, 4, 8], 4);
        let rope = RotaryPositionEmbedding::new(8).unwrap();
        let with_offset = rope.encode_with_offset(&x, 1, 7).unwrap();
        let explicit = rope.encode_at(&x, 1, &[7, 8, 9, 10]).unwrap();
        assert_eq!(with_offset, explicit);
    }

    #[test]
    fn test_errors() {
        let odd = Array3::<f32>::zeros((1, 2, 7));
        assert!(matches!(
            rotary_encode(&odd, 1),
            Err(PositionalError::InvalidDimension { dim: 7 })
        ));

        let rope = RotaryPositionEmbedding::new(8).unwrap();
        let x = Array3::<f32>::zeros((1, 3, 8));
        assert!(matches!(
            rope.encode_at(&x, 1, &[0, 1]),
            Err(PositionalError::ShapeMismatch(_))
        ));
        assert!(matches!(
            rope.encode(&x, -1),
            Err(PositionalError::InvalidAxis { axis: -1, ndim: 3 })
        ));
        let wrong_dim = Array3::<f32>::zeros((1, 3, 6));
        assert!(matches!(
            rope.encode(&wrong_dim, 1),
            Err(PositionalError::ShapeMismatch(_))
        ));
        let flat = Array1::<f32>::zeros(8);
        assert!(matches!(
            rope.encode(&flat, 0),
            Err(PositionalError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_large_positions_stay_finite() {
        let x = randn(&[1, 3, 64], 5);
        let rope = RotaryPositionEmbedding::new(64).unwrap();
        let out = rope.encode_at(&x, 1, &[99_999, 100_000, 100_001]).unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
        for p in 0..3 {
            let before = norm(x.slice(s![0, p, ..]));
            let after = norm(out.slice(s![0, p, ..]));
            assert!((before - after).abs() < 1e-5 + 1e-4 * before);
        }
    }

    #[test]
    fn test_half_precision_uses_single_precision_trig() {
        let x = randn(&[1, 4, 32], 6);
        let positions = [2048, 4095, 30_000, 65_000];
        let rope = RotaryPositionEmbedding::new(32).unwrap();

        let x_half = x.mapv(f16::from_f32);
        let out_half = rope.encode_at(&x_half, 1, &positions).unwrap();
        let reference = rope.encode_at(&x_half.mapv(f16::to_f32), 1, &positions).unwrap();

        for (h, r) in out_half.iter().zip(reference.iter()) {
            assert!((h.to_f32() - r).abs() < 1e-2, "{} vs {}", h.to_f32(), r);
        }
    }

    #[test]
    fn test_forward_trait() {
        let rope = RotaryPositionEmbedding::new(8).unwrap();
        let input = Array3::<f32>::ones((2, 3, 8));
        let out = rope.forward(&input).unwrap();
        assert_eq!(out, rope.encode(&input, 1).unwrap());
        assert_eq!(rope.kind(), PositionalEncodingType::Rotary);
    }

    proptest! {
        #[test]
        fn rotation_preserves_norm(
            half in 1usize..=32,
            position in 0usize..=100_000,
            seed in any::<u64>(),
        ) {
            let dim = half * 2;
            let x = randn(&[1, dim], seed);
            let rope = RotaryPositionEmbedding::new(dim).unwrap();
            let out = rope.encode_at(&x, 0, &[position]).unwrap();
            let before = norm(x.slice(s![0, ..]));
            let after = norm(out.slice(s![0, ..]));
            prop_assert!((before - after).abs() < 1e-5 + 1e-4 * before, "{} vs {}", before, after);
        }

        #[test]
        fn conventions_agree_up_to_permutation(
            half in 1usize..=16,
            position in 0usize..1000,
            seed in any::<u64>(),
        ) {
            let dim = half * 2;
            let x = randn(&[1, dim], seed);
            // interleaved feature 2i <-> half-split feature i, 2i+1 <-> i + half
            let to_half_split = |v: &ArrayD<f32>| {
                let mut out = v.clone();
                for i in 0..half {
                    out[[0, i]] = v[[0, 2 * i]];
                    out[[0, i + half]] = v[[0, 2 * i + 1]];
                }
                out
            };
            let interleaved = RotaryPositionEmbedding::new(dim).unwrap()
                .with_convention(PairingConvention::Interleaved);
            let half_split = RotaryPositionEmbedding::new(dim).unwrap();

            let a = to_half_split(&interleaved.encode_at(&x, 0, &[position]).unwrap());
            let b = half_split.encode_at(&to_half_split(&x), 0, &[position]).unwrap();
            for (u, v) in a.iter().zip(b.iter()) {
                prop_assert!((u - v).abs() < 1e-5, "{} vs {}", u, v);
            }
        }
    }
}
