//! Reference mathematics re-derived without touching the encoders.
//!
//! Everything here works one vector and one pair at a time with explicit 2x2
//! rotations, so a layout bug in an encoder's vectorised tables cannot hide
//! behind the same bug in its oracle.

use ndarray::{Array1, ArrayView1};

use crate::utils::PairingConvention;

/// `omega_i = 1 / base^(2i / dim)`.
pub fn reference_theta(dim: usize, base: f64) -> Vec<f64> {
    (0..dim / 2)
        .map(|i| 1.0 / base.powf((2 * i) as f64 / dim as f64))
        .collect()
}

/// `[[cos a, sin a], [-sin a, cos a]]`, the matrix taking `(sin wp, cos wp)`
/// to `(sin w(p + d), cos w(p + d))` when `a = w d`.
pub fn shift_matrix(angle: f64) -> [[f64; 2]; 2] {
    let (sin, cos) = angle.sin_cos();
    [[cos, sin], [-sin, cos]]
}

/// Rotates pair `i` of `v` counter-clockwise by `position * theta[i]`.
pub fn reference_rotate(
    v: ArrayView1<f64>,
    position: usize,
    theta: &[f64],
    convention: PairingConvention,
) -> Array1<f64> {
    let dim = v.len();
    let mut out = Array1::zeros(dim);
    for (i, &omega) in theta.iter().enumerate() {
        let (a, b) = convention.pair(i, dim);
        let (sin, cos) = (position as f64 * omega).sin_cos();
        out[a] = v[a] * cos - v[b] * sin;
        out[b] = v[a] * sin + v[b] * cos;
    }
    out
}

/// `[sin(p w_0), cos(p w_0), sin(p w_1), cos(p w_1), ...]`.
pub fn reference_sinusoid_row(position: usize, theta: &[f64]) -> Array1<f64> {
    let mut row = Array1::zeros(theta.len() * 2);
    for (i, &omega) in theta.iter().enumerate() {
        let (sin, cos) = (position as f64 * omega).sin_cos();
        row[2 * i] = sin;
        row[2 * i + 1] = cos;
    }
    row
}

/// `PE(p) . PE(q) = sum_i cos(w_i (p - q))`.
pub fn closed_form_dot(p: usize, q: usize, theta: &[f64]) -> f64 {
    let delta = p as f64 - q as f64;
    theta.iter().map(|omega| (omega * delta).cos()).sum()
}
