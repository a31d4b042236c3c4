// error.rs
use thiserror::Error;

use crate::utils::IoError;

#[derive(Error, Debug)]
pub enum PositionalError {
    #[error("Invalid feature dimension {dim}: must be positive and even")]
    InvalidDimension { dim: usize },

    #[error("Invalid frequency base {base}: must be finite and greater than zero")]
    InvalidBase { base: f64 },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid position axis {axis} for an array with {ndim} dimensions")]
    InvalidAxis { axis: isize, ndim: usize },

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] IoError),
}

impl PositionalError {
    pub fn shape_mismatch<E: std::fmt::Display>(detail: E) -> Self {
        PositionalError::ShapeMismatch(detail.to_string())
    }
}
