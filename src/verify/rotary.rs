//! Invariant checks for rotary encoders.

use half::f16;
use ndarray::{s, Array2, ArrayD, ArrayViewD, IxDyn};
use tracing::info;

use crate::error::PositionalError;
use crate::positional::{RotaryPositionEmbedding, DEFAULT_BASE};
use crate::utils::{dot, l2_norm, max_abs_diff, variance, PairingConvention};
use crate::verify::inputs::{standard_normal, SuiteConfig};
use crate::verify::reference::{reference_rotate, reference_theta};
use crate::verify::report::{finite_or_inf, Bound, CheckOutcome, VerificationReport};

/// A rotary encoder the suite can certify.
///
/// Inputs are `[..., positions, dim]` arrays; `position_axis` may be negative.
pub trait RotaryUnderTest {
    fn dim(&self) -> usize;

    fn base(&self) -> f64 {
        DEFAULT_BASE
    }

    /// Layout the implementation claims to use for both angles and rotation.
    fn convention(&self) -> PairingConvention;

    fn encode(
        &self,
        x: ArrayViewD<'_, f32>,
        position_axis: isize,
    ) -> Result<ArrayD<f32>, PositionalError>;

    fn encode_at(
        &self,
        x: ArrayViewD<'_, f32>,
        position_axis: isize,
        positions: &[usize],
    ) -> Result<ArrayD<f32>, PositionalError>;

    fn encode_half(
        &self,
        x: ArrayViewD<'_, f16>,
        position_axis: isize,
        positions: &[usize],
    ) -> Result<ArrayD<f16>, PositionalError>;
}

impl RotaryUnderTest for RotaryPositionEmbedding {
    fn dim(&self) -> usize {
        RotaryPositionEmbedding::dim(self)
    }

    fn base(&self) -> f64 {
        RotaryPositionEmbedding::base(self)
    }

    fn convention(&self) -> PairingConvention {
        RotaryPositionEmbedding::convention(self)
    }

    fn encode(
        &self,
        x: ArrayViewD<'_, f32>,
        position_axis: isize,
    ) -> Result<ArrayD<f32>, PositionalError> {
        RotaryPositionEmbedding::encode(self, &x, position_axis)
    }

    fn encode_at(
        &self,
        x: ArrayViewD<'_, f32>,
        position_axis: isize,
        positions: &[usize],
    ) -> Result<ArrayD<f32>, PositionalError> {
        RotaryPositionEmbedding::encode_at(self, &x, position_axis, positions)
    }

    fn encode_half(
        &self,
        x: ArrayViewD<'_, f16>,
        position_axis: isize,
        positions: &[usize],
    ) -> Result<ArrayD<f16>, PositionalError> {
        RotaryPositionEmbedding::encode_at(self, &x, position_axis, positions)
    }
}

/// Flattens `[..., dim]` into `[vectors, dim]` in logical order.
fn feature_rows(x: &ArrayD<f32>) -> Option<Array2<f64>> {
    let dim = *x.shape().last()?;
    let count = if dim == 0 { 0 } else { x.len() / dim };
    Array2::from_shape_vec((count, dim), x.iter().map(|&v| f64::from(v)).collect()).ok()
}

pub struct RotarySuite<'a> {
    subject: &'a dyn RotaryUnderTest,
    config: SuiteConfig,
}

impl<'a> RotarySuite<'a> {
    pub fn new(subject: &'a dyn RotaryUnderTest) -> Self {
        Self::with_config(subject, SuiteConfig::default())
    }

    pub fn with_config(subject: &'a dyn RotaryUnderTest, config: SuiteConfig) -> Self {
        Self { subject, config }
    }

    pub fn run(&self) -> VerificationReport {
        let mut report = VerificationReport::new(format!(
            "rotary encoder (dim {}, {} pairs)",
            self.subject.dim(),
            self.subject.convention().name()
        ));
        report.push(self.shape_preservation());
        report.push(self.norm_preservation());
        report.push(self.linearity());
        report.push(self.relative_distance_invariance());
        report.push(self.frequency_decay());
        report.push(self.reference_agreement());
        report.push(self.long_position_stability());
        report.push(self.reduced_precision_agreement());
        info!(
            subject = %report.subject,
            passed = report.passed(),
            "rotary verification finished"
        );
        report
    }

    /// Output shape equals input shape for 3-D and 4-D inputs and for a
    /// leading position axis.
    pub fn shape_preservation(&self) -> CheckOutcome {
        const NAME: &str = "shape_preservation";
        let (batch, seq, dim) = (self.config.batch, self.config.seq_len, self.subject.dim());
        let cases = [
            (vec![batch, seq, dim], -2),
            (vec![batch, 2, seq, dim], -2),
            (vec![seq, batch, dim], 0),
        ];

        let mut rng = self.config.rng(1);
        let mut mismatches = Vec::new();
        for (shape, axis) in cases {
            let x = standard_normal(&mut rng, &shape);
            match self.subject.encode(x.view(), axis) {
                Ok(out) if out.shape() == shape.as_slice() => {}
                Ok(out) => mismatches.push(format!("{shape:?} became {:?}", out.shape())),
                Err(e) => return CheckOutcome::errored(NAME, &e),
            }
        }
        CheckOutcome::measure(
            NAME,
            mismatches.len() as f64,
            Bound::AtMost(0.0),
            mismatches.join(", "),
        )
    }

    /// `||rope(v, p)|| = ||v||` for every vector of a random batch.
    pub fn norm_preservation(&self) -> CheckOutcome {
        const NAME: &str = "norm_preservation";
        let (batch, seq, dim) = (self.config.batch, self.config.seq_len, self.subject.dim());
        let x = standard_normal(&mut self.config.rng(2), &[batch, seq, dim]);
        let out = match self.subject.encode(x.view(), -2) {
            Ok(out) => out,
            Err(e) => return CheckOutcome::errored(NAME, &e),
        };
        self.compare_norms(NAME, &x, &out, |row| format!("position {}", row % seq.max(1)))
    }

    /// `rope(x + y) = rope(x) + rope(y)`.
    pub fn linearity(&self) -> CheckOutcome {
        const NAME: &str = "linearity";
        let shape = [self.config.batch, self.config.seq_len, self.subject.dim()];
        let mut rng = self.config.rng(3);
        let x = standard_normal(&mut rng, &shape);
        let y = standard_normal(&mut rng, &shape);
        let sum = &x + &y;

        let encoded = [sum.view(), x.view(), y.view()]
            .into_iter()
            .map(|input| self.subject.encode(input, -2))
            .collect::<Result<Vec<_>, _>>();
        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(e) => return CheckOutcome::errored(NAME, &e),
        };

        let of_sum = encoded[0].mapv(f64::from);
        let sum_of = encoded[1].mapv(f64::from) + encoded[2].mapv(f64::from);
        CheckOutcome::measure(
            NAME,
            max_abs_diff(&of_sum, &sum_of),
            Bound::AtMost(self.config.tolerances.linearity),
            "max |rope(x + y) - rope(x) - rope(y)|",
        )
    }

    /// `rope(v)[p] . rope(v)[p + k]` does not depend on `p`.
    ///
    /// Checked twice: with the vector embedded in a zero sequence at
    /// `{0, k}` vs `{t, t + k}`, and with explicit positions far from zero.
    pub fn relative_distance_invariance(&self) -> CheckOutcome {
        const NAME: &str = "relative_distance_invariance";
        let (k, t, dim) = (self.config.offset, self.config.shift, self.subject.dim());
        let v = standard_normal(&mut self.config.rng(4), &[dim]);

        let in_sequence = |first: usize| -> Result<f64, PositionalError> {
            let len = t + k + 1;
            let mut input = ArrayD::<f32>::zeros(IxDyn(&[1, len, dim]));
            input.slice_mut(s![0, first, ..]).assign(&v);
            input.slice_mut(s![0, first + k, ..]).assign(&v);
            let out = self.subject.encode(input.view(), -2)?;
            let rows = feature_rows(&out)
                .filter(|rows| rows.nrows() == len)
                .ok_or_else(|| PositionalError::shape_mismatch("output lost its shape"))?;
            Ok(dot(rows.row(first), rows.row(first + k)))
        };
        let at_positions = |first: usize| -> Result<f64, PositionalError> {
            let mut input = ArrayD::<f32>::zeros(IxDyn(&[1, 2, dim]));
            input.slice_mut(s![0, 0, ..]).assign(&v);
            input.slice_mut(s![0, 1, ..]).assign(&v);
            let out = self.subject.encode_at(input.view(), -2, &[first, first + k])?;
            let rows = feature_rows(&out)
                .filter(|rows| rows.nrows() == 2)
                .ok_or_else(|| PositionalError::shape_mismatch("output lost its shape"))?;
            Ok(dot(rows.row(0), rows.row(1)))
        };

        let far = 1_000;
        let scores = (|| -> Result<[f64; 4], PositionalError> {
            Ok([
                in_sequence(0)?,
                in_sequence(t)?,
                at_positions(far)?,
                at_positions(far + t)?,
            ])
        })();
        let [near_a, near_b, far_a, far_b] = match scores {
            Ok(scores) => scores,
            Err(e) => return CheckOutcome::errored(NAME, &e),
        };

        let diff = finite_or_inf((near_a - near_b).abs()).max(finite_or_inf((far_a - far_b).abs()));
        CheckOutcome::measure(
            NAME,
            diff,
            Bound::AtMost(self.config.tolerances.relative_distance),
            format!(
                "score(0, {k}) = {near_a:.6}, score({t}, {}) = {near_b:.6}, \
                 score({far}, {}) = {far_a:.6}, score({}, {}) = {far_b:.6}",
                t + k,
                far + k,
                far + t,
                far + t + k
            ),
        )
    }

    /// High-frequency pairs rotate much faster than low-frequency ones.
    pub fn frequency_decay(&self) -> CheckOutcome {
        const NAME: &str = "frequency_decay";
        let dim = self.subject.dim();
        if dim < 8 {
            return CheckOutcome::skipped(
                NAME,
                format!("needs dim >= 8 to separate the extreme frequencies, got {dim}"),
            );
        }

        let len = self.config.decay_seq_len;
        let x = ArrayD::<f32>::ones(IxDyn(&[1, len, dim]));
        let out = match self.subject.encode(x.view(), -2) {
            Ok(out) => out,
            Err(e) => return CheckOutcome::errored(NAME, &e),
        };
        let Some(rows) = feature_rows(&out).filter(|rows| rows.dim() == (len, dim)) else {
            return CheckOutcome::measure(
                NAME,
                0.0,
                Bound::AtLeast(self.config.decay_ratio),
                "output lost its shape",
            );
        };

        let convention = self.subject.convention();
        let (fast, _) = convention.pair(0, dim);
        let (slow, _) = convention.pair(dim / 2 - 1, dim);
        let var_fast = variance(rows.column(fast));
        let var_slow = variance(rows.column(slow));
        let ratio = match (var_fast > 0.0, var_slow > 0.0) {
            (_, true) => var_fast / var_slow,
            (true, false) => f64::INFINITY,
            (false, false) => 0.0,
        };
        CheckOutcome::measure(
            NAME,
            ratio,
            Bound::AtLeast(self.config.decay_ratio),
            format!(
                "variance {var_fast:.4e} at feature {fast} vs {var_slow:.4e} at feature {slow}"
            ),
        )
    }

    /// Output matches a pair-by-pair 2x2 rotation in the declared layout.
    ///
    /// An encoder whose angle table and rotate-half disagree on the pairing
    /// fails here even when it happens to keep norms.
    pub fn reference_agreement(&self) -> CheckOutcome {
        const NAME: &str = "reference_agreement";
        let (batch, seq, dim) = (self.config.batch, self.config.seq_len, self.subject.dim());
        let convention = self.subject.convention();
        let theta = reference_theta(dim, self.subject.base());
        let mut rng = self.config.rng(5);

        let x = standard_normal(&mut rng, &[batch, seq, dim]);
        let shifted = standard_normal(&mut rng, &[1, seq, dim]);
        let positions: Vec<usize> = (0..seq).map(|j| 4_096 + 37 * j).collect();

        let outputs = self
            .subject
            .encode(x.view(), -2)
            .and_then(|a| Ok((a, self.subject.encode_at(shifted.view(), -2, &positions)?)));
        let (out, out_shifted) = match outputs {
            Ok(outputs) => outputs,
            Err(e) => return CheckOutcome::errored(NAME, &e),
        };

        let cases = [
            (&x, &out, (0..batch * seq).map(|row| row % seq).collect::<Vec<_>>()),
            (&shifted, &out_shifted, positions),
        ];
        let mut worst = (0.0f64, 0usize);
        for (input, output, row_positions) in cases {
            let (Some(xr), Some(or)) = (feature_rows(input), feature_rows(output)) else {
                return CheckOutcome::measure(
                    NAME,
                    f64::INFINITY,
                    Bound::AtMost(0.0),
                    "output lost its shape",
                );
            };
            if xr.dim() != or.dim() {
                return CheckOutcome::measure(
                    NAME,
                    f64::INFINITY,
                    Bound::AtMost(self.config.tolerances.reference),
                    format!("output has {:?} vectors, input {:?}", or.dim(), xr.dim()),
                );
            }
            for (row, &position) in row_positions.iter().enumerate() {
                let expected = reference_rotate(xr.row(row), position, &theta, convention);
                let diff = max_abs_diff(&expected, &or.row(row));
                if diff > worst.0 {
                    worst = (diff, position);
                }
            }
        }
        CheckOutcome::measure(
            NAME,
            worst.0,
            Bound::AtMost(self.config.tolerances.reference),
            format!(
                "worst at position {}; the angle table and rotate-half must both use {} pairs",
                worst.1,
                convention.name()
            ),
        )
    }

    /// Finite output and preserved norms around `long_position`.
    pub fn long_position_stability(&self) -> CheckOutcome {
        const NAME: &str = "long_position_stability";
        let far = self.config.long_position.max(2);
        let positions = [far - 2, far - 1, far];
        let x = standard_normal(&mut self.config.rng(6), &[1, positions.len(), self.subject.dim()]);
        let out = match self.subject.encode_at(x.view(), -2, &positions) {
            Ok(out) => out,
            Err(e) => return CheckOutcome::errored(NAME, &e),
        };
        let non_finite = out.iter().filter(|v| !v.is_finite()).count();
        if non_finite > 0 {
            return CheckOutcome::measure(
                NAME,
                f64::INFINITY,
                Bound::AtMost(self.config.tolerances.norm_atol),
                format!("{non_finite} non-finite values near position {far}"),
            );
        }
        self.compare_norms(NAME, &x, &out, |row| format!("position {}", positions[row.min(2)]))
    }

    /// f16 storage must agree with f32 storage of the same values; trig
    /// evaluated in half precision is off by whole radians at these positions.
    pub fn reduced_precision_agreement(&self) -> CheckOutcome {
        const NAME: &str = "reduced_precision_agreement";
        let positions = [1_024, 2_048, 4_095, 8_191, 16_384, 30_000, 50_000, 65_000];
        let x = standard_normal(&mut self.config.rng(7), &[1, positions.len(), self.subject.dim()]);
        let x_half = x.mapv(f16::from_f32);

        let outputs = self
            .subject
            .encode_half(x_half.view(), -2, &positions)
            .and_then(|half| {
                let widened = x_half.mapv(f16::to_f32);
                let single = self.subject.encode_at(widened.view(), -2, &positions)?;
                Ok((half, single))
            });
        let (half, single) = match outputs {
            Ok(outputs) => outputs,
            Err(e) => return CheckOutcome::errored(NAME, &e),
        };
        CheckOutcome::measure(
            NAME,
            max_abs_diff(&half.mapv(f16::to_f64), &single.mapv(f64::from)),
            Bound::AtMost(self.config.tolerances.half_precision),
            format!("f16 vs f32 storage up to position {}", positions[positions.len() - 1]),
        )
    }

    fn compare_norms(
        &self,
        name: &'static str,
        input: &ArrayD<f32>,
        output: &ArrayD<f32>,
        locate: impl Fn(usize) -> String,
    ) -> CheckOutcome {
        let tol = &self.config.tolerances;
        let (Some(xr), Some(or)) = (feature_rows(input), feature_rows(output)) else {
            return CheckOutcome::measure(
                name,
                f64::INFINITY,
                Bound::AtMost(tol.norm_atol),
                "output lost its shape",
            );
        };
        if xr.dim() != or.dim() {
            return CheckOutcome::measure(
                name,
                f64::INFINITY,
                Bound::AtMost(tol.norm_atol),
                format!("output has {:?} vectors, input {:?}", or.dim(), xr.dim()),
            );
        }

        let (mut worst, mut worst_row, mut largest) = (0.0f64, 0usize, 0.0f64);
        for (row, (a, b)) in xr.rows().into_iter().zip(or.rows()).enumerate() {
            let norm_in = l2_norm(a);
            largest = largest.max(norm_in);
            let diff = finite_or_inf((norm_in - l2_norm(b)).abs());
            if diff > worst {
                worst = diff;
                worst_row = row;
            }
        }
        CheckOutcome::measure(
            name,
            worst,
            Bound::AtMost(tol.norm_atol + tol.norm_rtol * largest),
            format!("worst | ||out|| - ||in|| | at {}", locate(worst_row)),
        )
    }
}
