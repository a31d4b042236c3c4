//! Invariant checks for sinusoidal tables.

use ndarray::{s, Array1, Array2, Axis};
use tracing::info;

use crate::error::PositionalError;
use crate::positional::{SinusoidalPositionalEncoding, DEFAULT_BASE};
use crate::utils::{all_finite, dot, max_abs_diff, pearson_correlation, variance};
use crate::verify::inputs::SuiteConfig;
use crate::verify::reference::{
    closed_form_dot, reference_sinusoid_row, reference_theta, shift_matrix,
};
use crate::verify::report::{finite_or_inf, Bound, CheckOutcome, VerificationReport};

/// A sinusoidal table generator the suite can certify.
pub trait SinusoidalUnderTest {
    fn dim(&self) -> usize;

    fn base(&self) -> f64 {
        DEFAULT_BASE
    }

    /// `[seq_len, dim]` rows for positions `0..seq_len`.
    fn table(&self, seq_len: usize) -> Result<Array2<f64>, PositionalError>;

    /// One row per requested position.
    fn rows(&self, positions: &[usize]) -> Result<Array2<f64>, PositionalError>;
}

impl SinusoidalUnderTest for SinusoidalPositionalEncoding {
    fn dim(&self) -> usize {
        SinusoidalPositionalEncoding::dim(self)
    }

    fn base(&self) -> f64 {
        SinusoidalPositionalEncoding::base(self)
    }

    fn table(&self, seq_len: usize) -> Result<Array2<f64>, PositionalError> {
        SinusoidalPositionalEncoding::table(self, seq_len)
    }

    fn rows(&self, positions: &[usize]) -> Result<Array2<f64>, PositionalError> {
        SinusoidalPositionalEncoding::rows(self, positions)
    }
}

/// `Err` carries the outcome of a check that could not be measured.
type Attempt = Result<CheckOutcome, CheckOutcome>;

/// Largest `|sin^2 + cos^2 - 1|` over every pair, with its row and pair.
fn worst_magnitude(rows: &Array2<f64>) -> (f64, usize, usize) {
    let mut worst = (0.0, 0, 0);
    for (r, row) in rows.outer_iter().enumerate() {
        for i in 0..row.len() / 2 {
            let magnitude = row[2 * i].powi(2) + row[2 * i + 1].powi(2);
            let deviation = finite_or_inf((magnitude - 1.0).abs());
            if deviation > worst.0 {
                worst = (deviation, r, i);
            }
        }
    }
    worst
}

pub struct SinusoidalSuite<'a> {
    subject: &'a dyn SinusoidalUnderTest,
    config: SuiteConfig,
}

impl<'a> SinusoidalSuite<'a> {
    pub fn new(subject: &'a dyn SinusoidalUnderTest) -> Self {
        Self::with_config(subject, SuiteConfig::default())
    }

    pub fn with_config(subject: &'a dyn SinusoidalUnderTest, config: SuiteConfig) -> Self {
        Self { subject, config }
    }

    pub fn run(&self) -> VerificationReport {
        let mut report =
            VerificationReport::new(format!("sinusoidal table (dim {})", self.subject.dim()));
        let checks: [fn(&Self) -> Attempt; 12] = [
            Self::shape,
            Self::unit_magnitude,
            Self::frequency_pair_equality,
            Self::prefix_consistency,
            Self::shift_invariant_dot,
            Self::dot_product_identity,
            Self::linear_shift_operator,
            Self::constant_norm_per_pair,
            Self::frequency_orthogonality,
            Self::long_position_stability,
            Self::row_consistency,
            Self::reference_agreement,
        ];
        for check in checks {
            report.push(check(self).unwrap_or_else(|outcome| outcome));
        }
        info!(
            subject = %report.subject,
            passed = report.passed(),
            "sinusoidal verification finished"
        );
        report
    }

    fn table(&self, name: &'static str, seq_len: usize) -> Result<Array2<f64>, CheckOutcome> {
        let table = self
            .subject
            .table(seq_len)
            .map_err(|e| CheckOutcome::errored(name, &e))?;
        self.expect_rows(name, table, seq_len)
    }

    fn rows(&self, name: &'static str, positions: &[usize]) -> Result<Array2<f64>, CheckOutcome> {
        let rows = self
            .subject
            .rows(positions)
            .map_err(|e| CheckOutcome::errored(name, &e))?;
        self.expect_rows(name, rows, positions.len())
    }

    fn expect_rows(
        &self,
        name: &'static str,
        table: Array2<f64>,
        count: usize,
    ) -> Result<Array2<f64>, CheckOutcome> {
        let dim = self.subject.dim();
        if table.dim() == (count, dim) {
            Ok(table)
        } else {
            Err(CheckOutcome::measure(
                name,
                f64::INFINITY,
                Bound::AtMost(0.0),
                format!("expected ({count}, {dim}), got {:?}", table.dim()),
            ))
        }
    }

    /// `[S, D]` for empty, single, odd and even lengths.
    fn shape(&self) -> Attempt {
        const NAME: &str = "shape";
        let dim = self.subject.dim();
        let mut mismatches = Vec::new();
        for seq_len in [0, 1, 7, self.config.seq_len] {
            let table = self
                .subject
                .table(seq_len)
                .map_err(|e| CheckOutcome::errored(NAME, &e))?;
            if table.dim() != (seq_len, dim) {
                mismatches.push(format!("{seq_len} positions gave {:?}", table.dim()));
            }
        }
        Ok(CheckOutcome::measure(
            NAME,
            mismatches.len() as f64,
            Bound::AtMost(0.0),
            mismatches.join(", "),
        ))
    }

    /// `sin^2 + cos^2 = 1` for every pair.
    fn unit_magnitude(&self) -> Attempt {
        const NAME: &str = "unit_magnitude";
        let positions = [0, 1, 10, 50, 99];
        let rows = self.rows(NAME, &positions)?;
        let (worst, row, pair) = worst_magnitude(&rows);
        Ok(CheckOutcome::measure(
            NAME,
            worst,
            Bound::AtMost(self.config.tolerances.unit_magnitude),
            format!("worst at position {}, pair {pair}", positions[row]),
        ))
    }

    /// Both features of pair `i` share frequency `theta_i`: at position 1
    /// `atan2(sin, cos)` recovers it exactly.
    fn frequency_pair_equality(&self) -> Attempt {
        const NAME: &str = "frequency_pair_equality";
        let row = self.rows(NAME, &[1])?;
        let theta = reference_theta(self.subject.dim(), self.subject.base());
        let mut worst = (0.0, 0);
        for (i, omega) in theta.iter().enumerate() {
            let recovered = row[[0, 2 * i]].atan2(row[[0, 2 * i + 1]]);
            let diff = finite_or_inf((recovered - omega).abs());
            if diff > worst.0 {
                worst = (diff, i);
            }
        }
        Ok(CheckOutcome::measure(
            NAME,
            worst.0,
            Bound::AtMost(self.config.tolerances.reference),
            format!("worst at pair {}", worst.1),
        ))
    }

    /// Shorter tables are exact prefixes of longer ones, odd lengths included.
    fn prefix_consistency(&self) -> Attempt {
        const NAME: &str = "prefix_consistency";
        let full_len = self.config.seq_len.max(5) + 1;
        let full = self.table(NAME, full_len)?;
        let mut worst = (0.0, 0);
        for len in [0, 1, 4, 5, full_len - 1, full_len] {
            let prefix = self.table(NAME, len)?;
            let diff = max_abs_diff(&prefix, &full.slice(s![..len, ..]));
            if diff > worst.0 {
                worst = (diff, len);
            }
        }
        Ok(CheckOutcome::measure(
            NAME,
            worst.0,
            Bound::AtMost(0.0),
            format!("worst for length {} against length {full_len}", worst.1),
        ))
    }

    /// `PE(p) . PE(p + k)` is the same for every `p`.
    fn shift_invariant_dot(&self) -> Attempt {
        const NAME: &str = "shift_invariant_dot";
        let k = self.config.offset;
        let starts = [0, 10, 20, 50];
        let positions: Vec<usize> = starts.iter().flat_map(|&p| [p, p + k]).collect();
        let rows = self.rows(NAME, &positions)?;
        let scores: Vec<f64> = (0..starts.len())
            .map(|j| dot(rows.row(2 * j), rows.row(2 * j + 1)))
            .collect();
        let worst = scores
            .iter()
            .map(|score| finite_or_inf((score - scores[0]).abs()))
            .fold(0.0, f64::max);
        Ok(CheckOutcome::measure(
            NAME,
            worst,
            Bound::AtMost(self.config.tolerances.dot_product),
            format!("PE(p) . PE(p + {k}) for p in {starts:?}: {scores:.6?}"),
        ))
    }

    /// `PE(p) . PE(q) = sum_i cos(theta_i (p - q))`.
    fn dot_product_identity(&self) -> Attempt {
        const NAME: &str = "dot_product_identity";
        let theta = reference_theta(self.subject.dim(), self.subject.base());
        let pairs = [(10, 25), (0, 1), (3, 99)];
        let positions: Vec<usize> = pairs.iter().flat_map(|&(p, q)| [p, q]).collect();
        let rows = self.rows(NAME, &positions)?;
        let mut worst = (0.0, pairs[0]);
        for (j, &(p, q)) in pairs.iter().enumerate() {
            let measured = dot(rows.row(2 * j), rows.row(2 * j + 1));
            let diff = finite_or_inf((measured - closed_form_dot(p, q, &theta)).abs());
            if diff > worst.0 {
                worst = (diff, (p, q));
            }
        }
        Ok(CheckOutcome::measure(
            NAME,
            worst.0,
            Bound::AtMost(self.config.tolerances.dot_product),
            format!("worst for positions {:?}", worst.1),
        ))
    }

    /// A fixed rotation per pair carries `PE(p)` to `PE(p + delta)`.
    fn linear_shift_operator(&self) -> Attempt {
        const NAME: &str = "linear_shift_operator";
        let (p, delta) = (10, 5);
        let theta = reference_theta(self.subject.dim(), self.subject.base());
        let rows = self.rows(NAME, &[p, p + delta])?;
        let mut worst = (0.0, 0);
        for (i, omega) in theta.iter().enumerate() {
            let m = shift_matrix(omega * delta as f64);
            let (sin, cos) = (rows[[0, 2 * i]], rows[[0, 2 * i + 1]]);
            let predicted_sin = m[0][0] * sin + m[0][1] * cos;
            let predicted_cos = m[1][0] * sin + m[1][1] * cos;
            let diff = finite_or_inf(
                (predicted_sin - rows[[1, 2 * i]])
                    .abs()
                    .max((predicted_cos - rows[[1, 2 * i + 1]]).abs()),
            );
            if diff > worst.0 {
                worst = (diff, i);
            }
        }
        Ok(CheckOutcome::measure(
            NAME,
            worst.0,
            Bound::AtMost(self.config.tolerances.shift_operator),
            format!("PE({p}) to PE({}), worst at pair {}", p + delta, worst.1),
        ))
    }

    /// Per-pair energy, and so the row norm, does not vary with position.
    fn constant_norm_per_pair(&self) -> Attempt {
        const NAME: &str = "constant_norm_per_pair";
        let table = self.table(NAME, 500)?;
        let squared = table.mapv(|v| v * v);
        let mut worst = (0.0, String::new());
        for i in 0..self.subject.dim() / 2 {
            let energy = &squared.column(2 * i) + &squared.column(2 * i + 1);
            let spread = finite_or_inf(variance(energy.view()));
            if spread > worst.0 {
                worst = (spread, format!("pair {i}"));
            }
        }
        let row_norms = squared.sum_axis(Axis(1));
        let spread = finite_or_inf(variance(row_norms.view()));
        if spread > worst.0 {
            worst = (spread, "row norm".to_string());
        }
        Ok(CheckOutcome::measure(
            NAME,
            worst.0,
            Bound::AtMost(self.config.tolerances.norm_variance),
            format!("largest variance over 500 positions: {}", worst.1),
        ))
    }

    /// Pairs 0 and 5 are nearly uncorrelated: each pair's `[sin, cos]` columns
    /// are flattened row by row over 1000 positions before correlating.
    fn frequency_orthogonality(&self) -> Attempt {
        const NAME: &str = "frequency_orthogonality";
        let dim = self.subject.dim();
        if dim < 12 {
            return Ok(CheckOutcome::skipped(
                NAME,
                format!("needs pairs 0 and 5, dim >= 12, got {dim}"),
            ));
        }
        let table = self.table(NAME, 1_000)?;
        let flattened = |pair: usize| -> Array1<f64> {
            table.slice(s![.., 2 * pair..2 * pair + 2]).iter().copied().collect()
        };
        let correlation = pearson_correlation(flattened(0).view(), flattened(5).view());
        Ok(CheckOutcome::measure(
            NAME,
            finite_or_inf(correlation.abs()),
            Bound::AtMost(self.config.tolerances.cross_correlation),
            format!("correlation of flattened pairs 0 and 5: {correlation:.4}"),
        ))
    }

    /// Finite unit-magnitude rows around `long_position`.
    fn long_position_stability(&self) -> Attempt {
        const NAME: &str = "long_position_stability";
        let far = self.config.long_position.max(1);
        let positions = [far - 1, far];
        let rows = self.rows(NAME, &positions)?;
        if !all_finite(&rows) {
            return Ok(CheckOutcome::measure(
                NAME,
                f64::INFINITY,
                Bound::AtMost(self.config.tolerances.unit_magnitude),
                format!("non-finite values near position {far}"),
            ));
        }
        let (worst, row, pair) = worst_magnitude(&rows);
        Ok(CheckOutcome::measure(
            NAME,
            worst,
            Bound::AtMost(self.config.tolerances.unit_magnitude),
            format!("worst at position {}, pair {pair}", positions[row]),
        ))
    }

    /// Rows fetched by position equal the matching table rows exactly.
    fn row_consistency(&self) -> Attempt {
        const NAME: &str = "row_consistency";
        let seq_len = self.config.seq_len.max(2);
        let table = self.table(NAME, seq_len)?;
        let positions = [seq_len - 1, 0, seq_len / 2, 1];
        let rows = self.rows(NAME, &positions)?;
        let mut worst = (0.0, 0);
        for (j, &p) in positions.iter().enumerate() {
            let diff = max_abs_diff(&rows.row(j), &table.row(p));
            if diff > worst.0 {
                worst = (diff, p);
            }
        }
        Ok(CheckOutcome::measure(
            NAME,
            worst.0,
            Bound::AtMost(0.0),
            format!("worst at position {}", worst.1),
        ))
    }

    /// Agreement with rows rebuilt pair by pair from the closed form.
    fn reference_agreement(&self) -> Attempt {
        const NAME: &str = "reference_agreement";
        let theta = reference_theta(self.subject.dim(), self.subject.base());
        let seq_len = self.config.seq_len;
        let table = self.table(NAME, seq_len)?;
        let far_positions = [4_096, self.config.long_position];
        let far = self.rows(NAME, &far_positions)?;

        let candidates = (0..seq_len)
            .map(|p| (p, table.row(p)))
            .chain(far_positions.iter().copied().zip(far.outer_iter()));
        let mut worst = (0.0, 0);
        for (p, row) in candidates {
            let diff = max_abs_diff(&reference_sinusoid_row(p, &theta), &row);
            if diff > worst.0 {
                worst = (diff, p);
            }
        }
        Ok(CheckOutcome::measure(
            NAME,
            worst.0,
            Bound::AtMost(self.config.tolerances.reference),
            format!("worst at position {}", worst.1),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::report::CheckStatus;

    /// Closed-form table written independently of the crate's.
    struct ClosedForm {
        dim: usize,
        /// Indexes the frequency by column instead of by pair.
        column_frequencies: bool,
        /// Emits `[cos, sin]` instead of `[sin, cos]`.
        swapped: bool,
        /// Samples `table` rows from the grid `0, 2, .., seq_len` stretched
        /// over `seq_len` rows, so even lengths come out compressed.
        length_dependent: bool,
        gain: f64,
        /// Amplitude grows by this much per position.
        growth: f64,
    }

    impl ClosedForm {
        fn correct(dim: usize) -> Self {
            Self {
                dim,
                column_frequencies: false,
                swapped: false,
                length_dependent: false,
                gain: 1.0,
                growth: 0.0,
            }
        }

        fn value(&self, position: f64, col: usize) -> f64 {
            let exponent = if self.column_frequencies { col } else { col / 2 * 2 };
            let angle = position / 10_000f64.powf(exponent as f64 / self.dim as f64);
            let wave = if (col % 2 == 0) != self.swapped {
                angle.sin()
            } else {
                angle.cos()
            };
            (self.gain + self.growth * position) * wave
        }
    }

    impl SinusoidalUnderTest for ClosedForm {
        fn dim(&self) -> usize {
            self.dim
        }

        fn table(&self, seq_len: usize) -> Result<Array2<f64>, PositionalError> {
            let stretch = if self.length_dependent {
                let grid = (0..=seq_len).step_by(2).count();
                2.0 * grid as f64 / (seq_len + 1) as f64
            } else {
                1.0
            };
            Ok(Array2::from_shape_fn((seq_len, self.dim), |(p, c)| {
                self.value(p as f64 * stretch, c)
            }))
        }

        fn rows(&self, positions: &[usize]) -> Result<Array2<f64>, PositionalError> {
            Ok(Array2::from_shape_fn((positions.len(), self.dim), |(r, c)| {
                self.value(positions[r] as f64, c)
            }))
        }
    }

    #[test]
    fn test_crate_encoder_passes() {
        for dim in [2, 4, 16, 64, 128] {
            let encoding = SinusoidalPositionalEncoding::new(dim).unwrap();
            let report = SinusoidalSuite::new(&encoding).run();
            assert!(report.passed(), "{report}");
        }
    }

    #[test]
    fn test_d128_runs_every_check() {
        let encoding = SinusoidalPositionalEncoding::new(128).unwrap();
        let report = SinusoidalSuite::new(&encoding).run();
        assert_eq!(report.outcomes.len(), 12);
        assert!(report.outcomes.iter().all(|o| o.status == CheckStatus::Passed), "{report}");
        assert!(report.to_string().ends_with("Summary: 12 passed, 0 failed, 0 skipped"));
        // pairs 0 and 5 turn at 1 and 0.487 rad per step
        assert!(report.get("frequency_orthogonality").unwrap().measured < 0.05);
    }

    #[test]
    fn test_small_dimension_skips_orthogonality() {
        let encoding = SinusoidalPositionalEncoding::new(8).unwrap();
        let report = SinusoidalSuite::new(&encoding).run();
        assert_eq!(
            report.get("frequency_orthogonality").unwrap().status,
            CheckStatus::Skipped
        );
        assert!(report.passed());
    }

    #[test]
    fn test_independent_implementation_passes() {
        let report = SinusoidalSuite::new(&ClosedForm::correct(32)).run();
        assert!(report.passed(), "{report}");
    }

    #[test]
    fn test_per_column_frequencies_are_caught() {
        let broken = ClosedForm {
            column_frequencies: true,
            ..ClosedForm::correct(16)
        };
        let report = SinusoidalSuite::new(&broken).run();
        assert!(!report.passed());
        for name in ["unit_magnitude", "frequency_pair_equality", "reference_agreement"] {
            assert!(report.get(name).unwrap().failed(), "{name} passed:\n{report}");
        }
    }

    #[test]
    fn test_swapped_layout_is_caught() {
        let broken = ClosedForm {
            swapped: true,
            ..ClosedForm::correct(16)
        };
        let report = SinusoidalSuite::new(&broken).run();
        assert!(report.get("unit_magnitude").unwrap().passed());
        assert!(report.get("reference_agreement").unwrap().failed(), "{report}");
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_length_dependent_table_breaks_prefixes() {
        let broken = ClosedForm {
            length_dependent: true,
            ..ClosedForm::correct(16)
        };
        let report = SinusoidalSuite::new(&broken).run();
        let prefix = report.get("prefix_consistency").unwrap();
        assert!(prefix.failed(), "{prefix}");
        assert!(report.get("row_consistency").unwrap().failed());
        assert!(report.get("unit_magnitude").unwrap().passed());
    }

    #[test]
    fn test_constant_gain_breaks_dot_identity_only_where_expected() {
        let loud = ClosedForm {
            gain: 1.01,
            ..ClosedForm::correct(16)
        };
        let report = SinusoidalSuite::new(&loud).run();
        for name in ["unit_magnitude", "dot_product_identity", "reference_agreement"] {
            assert!(report.get(name).unwrap().failed(), "{name} passed:\n{report}");
        }
        for name in ["shift_invariant_dot", "linear_shift_operator", "constant_norm_per_pair"] {
            assert!(report.get(name).unwrap().passed(), "{name} failed:\n{report}");
        }
    }

    #[test]
    fn test_growing_amplitude_breaks_shift_checks() {
        let growing = ClosedForm {
            growth: 1e-3,
            ..ClosedForm::correct(16)
        };
        let report = SinusoidalSuite::new(&growing).run();
        for name in ["shift_invariant_dot", "linear_shift_operator", "constant_norm_per_pair"] {
            assert!(report.get(name).unwrap().failed(), "{name} passed:\n{report}");
        }
        assert!(report.get("prefix_consistency").unwrap().passed());
    }

    #[test]
    fn test_custom_base_is_respected() {
        let encoding = SinusoidalPositionalEncoding::with_base(32, 500.0).unwrap();
        let report = SinusoidalSuite::new(&encoding).run();
        assert!(report.passed(), "{report}");
    }
}
