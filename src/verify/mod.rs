//! Invariant suites that certify positional encoders.
//!
//! Each suite drives an implementation through a trait, compares it against
//! the closed-form mathematics in [`reference`] and returns a
//! [`VerificationReport`] with the measured discrepancy of every check.
mod inputs;
pub use inputs::{SuiteConfig, Tolerances};

pub mod reference;

mod report;
pub use report::{Bound, CheckOutcome, CheckStatus, VerificationError, VerificationReport};

mod rotary;
pub use rotary::{RotarySuite, RotaryUnderTest};

mod sinusoidal;
pub use sinusoidal::{SinusoidalSuite, SinusoidalUnderTest};
