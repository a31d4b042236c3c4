use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::PositionalError;

/// Acceptance region for a measured quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    AtMost(f64),
    AtLeast(f64),
}

impl Bound {
    /// NaN is never admitted.
    pub fn admits(self, measured: f64) -> bool {
        match self {
            Bound::AtMost(limit) => measured <= limit,
            Bound::AtLeast(limit) => measured >= limit,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::AtMost(limit) => write!(f, "<= {limit:e}"),
            Bound::AtLeast(limit) => write!(f, ">= {limit:e}"),
        }
    }
}

/// NaN compares as the worst possible discrepancy.
pub(crate) fn finite_or_inf(value: f64) -> f64 {
    if value.is_nan() {
        f64::INFINITY
    } else {
        value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
}

/// Result of one invariant check with the discrepancy that decided it.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub status: CheckStatus,
    /// Max absolute difference, variance, ratio or correlation, per check.
    pub measured: f64,
    pub bound: Bound,
    pub detail: String,
}

impl CheckOutcome {
    pub fn measure(
        name: &'static str,
        measured: f64,
        bound: Bound,
        detail: impl Into<String>,
    ) -> Self {
        let status = if bound.admits(measured) {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed
        };
        Self {
            name,
            status,
            measured,
            bound,
            detail: detail.into(),
        }
    }

    pub fn skipped(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            measured: f64::NAN,
            bound: Bound::AtMost(0.0),
            detail: reason.into(),
        }
    }

    /// The implementation under test returned an error on valid input.
    pub fn errored(name: &'static str, error: &PositionalError) -> Self {
        Self {
            name,
            status: CheckStatus::Failed,
            measured: f64::INFINITY,
            bound: Bound::AtMost(0.0),
            detail: format!("encoder failed: {error}"),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }

    pub fn failed(&self) -> bool {
        self.status == CheckStatus::Failed
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            CheckStatus::Skipped => write!(f, "SKIPPED {}: {}", self.name, self.detail),
            status => {
                let label = if status == CheckStatus::Passed { "PASSED" } else { "FAILED" };
                write!(
                    f,
                    "{label} {}: measured {:e} (bound {})",
                    self.name, self.measured, self.bound
                )?;
                if !self.detail.is_empty() {
                    write!(f, "; {}", self.detail)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("{subject}: {failed} invariant check(s) failed\n{summary}")]
    Violated {
        subject: String,
        failed: usize,
        summary: String,
    },
}

/// All outcomes of one suite run.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub subject: String,
    pub outcomes: Vec<CheckOutcome>,
}

impl VerificationReport {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: CheckOutcome) {
        match outcome.status {
            CheckStatus::Passed => info!(
                subject = %self.subject,
                check = outcome.name,
                measured = outcome.measured,
                "invariant holds"
            ),
            CheckStatus::Failed => warn!(
                subject = %self.subject,
                check = outcome.name,
                measured = outcome.measured,
                bound = %outcome.bound,
                detail = %outcome.detail,
                "invariant violated"
            ),
            CheckStatus::Skipped => debug!(
                subject = %self.subject,
                check = outcome.name,
                reason = %outcome.detail,
                "invariant check skipped"
            ),
        }
        self.outcomes.push(outcome);
    }

    /// True when no check failed; skipped checks do not count against it.
    pub fn passed(&self) -> bool {
        !self.outcomes.iter().any(CheckOutcome::failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(|o| o.failed())
    }

    pub fn get(&self, name: &str) -> Option<&CheckOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn into_result(self) -> Result<Self, VerificationError> {
        let failed = self.failures().count();
        if failed == 0 {
            return Ok(self);
        }
        let summary = self
            .failures()
            .map(|o| format!("- {o}"))
            .collect::<Vec<_>>()
            .join("\n");
        Err(VerificationError::Violated {
            subject: self.subject,
            failed,
            summary,
        })
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Invariant checks for {}", self.subject)?;
        for outcome in &self.outcomes {
            writeln!(f, "  {outcome}")?;
        }
        let count = |status: CheckStatus| {
            self.outcomes.iter().filter(|o| o.status == status).count()
        };
        write!(
            f,
            "Summary: {} passed, {} failed, {} skipped",
            count(CheckStatus::Passed),
            count(CheckStatus::Failed),
            count(CheckStatus::Skipped)
        )
    }
}
