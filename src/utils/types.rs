//! Element types accepted by the encoders.
//!
//! Angles and their sines/cosines are evaluated in f64 and narrowed to a
//! [`TrigFloat`] (f32 or f64), never further. Half precision storage types
//! widen to f32 for the whole computation and are narrowed once, on the final
//! multiply-add.

use std::fmt;

use half::{bf16, f16};
use ndarray::NdFloat;

/// Float type that cosines, sines and the rotation are held in.
///
/// Only implemented for `f32` and `f64`.
pub trait TrigFloat: NdFloat {
    const NAME: &'static str;

    fn from_f64(value: f64) -> Self;
}

impl TrigFloat for f32 {
    const NAME: &'static str = "f32";

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl TrigFloat for f64 {
    const NAME: &'static str = "f64";

    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Storage element type of an encoded array.
pub trait Scalar: Copy + fmt::Debug + Send + Sync + 'static {
    /// Precision used for every intermediate; never narrower than f32.
    type Compute: TrigFloat;

    const NAME: &'static str;

    fn widen(self) -> Self::Compute;

    fn narrow(value: Self::Compute) -> Self;
}

impl Scalar for f32 {
    type Compute = f32;
    const NAME: &'static str = "f32";

    fn widen(self) -> f32 {
        self
    }

    fn narrow(value: f32) -> Self {
        value
    }
}

impl Scalar for f64 {
    type Compute = f64;
    const NAME: &'static str = "f64";

    fn widen(self) -> f64 {
        self
    }

    fn narrow(value: f64) -> Self {
        value
    }
}

impl Scalar for f16 {
    type Compute = f32;
    const NAME: &'static str = "f16";

    fn widen(self) -> f32 {
        self.to_f32()
    }

    fn narrow(value: f32) -> Self {
        f16::from_f32(value)
    }
}

impl Scalar for bf16 {
    type Compute = f32;
    const NAME: &'static str = "bf16";

    fn widen(self) -> f32 {
        self.to_f32()
    }

    fn narrow(value: f32) -> Self {
        bf16::from_f32(value)
    }
}
