pub mod config;
pub use config::{build_positional_encoding, EncodingConfig};

pub mod error;
pub use error::PositionalError;

pub mod positional;
pub use positional::{
    generate_frequencies, generate_frequencies_with_base, rotary_encode, rotate_half,
    sinusoidal_encode, sinusoidal_rows, PositionalEncoding, RotaryPositionEmbedding,
    SinusoidalPositionalEncoding, DEFAULT_BASE, MAX_STABLE_POSITION,
};

pub mod utils;
pub use utils::{PairingConvention, PositionalEncodingType, Scalar};

pub mod verify;
pub use verify::{RotarySuite, SinusoidalSuite, SuiteConfig, VerificationReport};
