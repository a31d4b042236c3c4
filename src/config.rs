use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PositionalError;
use crate::positional::frequencies::{check_base, check_dimension, DEFAULT_BASE};
use crate::positional::{PositionalEncoding, RotaryPositionEmbedding, SinusoidalPositionalEncoding};
use crate::utils::{read_to_string, PairingConvention, PositionalEncodingType};

/// Configuration for a positional encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingConfig {
    #[serde(default)]
    pub kind: PositionalEncodingType,
    pub dim: usize,                         // feature dimension, even
    #[serde(default = "default_base")]
    pub base: f64,                          // frequency base, 10000 in most models
    #[serde(default)]
    pub convention: PairingConvention,      // rotary only
    #[serde(default)]
    pub max_positions: Option<usize>,       // sinusoidal only; None = unbounded
}

// Default values for optional fields
fn default_base() -> f64 { DEFAULT_BASE }

impl EncodingConfig {
    pub fn sinusoidal(dim: usize) -> Self {
        Self {
            kind: PositionalEncodingType::Sinusoidal,
            dim,
            base: DEFAULT_BASE,
            convention: PairingConvention::default(),
            max_positions: None,
        }
    }

    pub fn rotary(dim: usize, convention: PairingConvention) -> Self {
        Self {
            kind: PositionalEncodingType::Rotary,
            convention,
            ..Self::sinusoidal(dim)
        }
    }

    pub fn validate(&self) -> Result<(), PositionalError> {
        check_dimension(self.dim)?;
        check_base(self.base)?;
        if self.kind == PositionalEncodingType::Rotary && self.max_positions.is_some() {
            return Err(PositionalError::Config(
                "max_positions only applies to sinusoidal encodings".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, PositionalError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PositionalError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading encoding config");
        Self::from_json_str(&read_to_string(path)?)
    }
}

/// Builds the encoder described by `config`
pub fn build_positional_encoding(
    config: &EncodingConfig,
) -> Result<Box<dyn PositionalEncoding>, PositionalError> {
    config.validate()?;
    match config.kind {
        PositionalEncodingType::Sinusoidal => {
            let mut encoding = SinusoidalPositionalEncoding::with_base(config.dim, config.base)?;
            if let Some(max) = config.max_positions {
                encoding = encoding.with_max_positions(max);
            }
            Ok(Box::new(encoding))
        }
        PositionalEncodingType::Rotary => Ok(Box::new(
            RotaryPositionEmbedding::with_base(config.dim, config.base)?
                .with_convention(config.convention),
        )),
    }
}
