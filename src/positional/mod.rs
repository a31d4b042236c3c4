//! Positional encoding implementations
mod positional;
pub use positional::PositionalEncoding;

pub mod frequencies;
pub use frequencies::{
    generate_frequencies, generate_frequencies_with_base, DEFAULT_BASE, MAX_STABLE_POSITION,
};

mod layout;

mod sinusoidal;
pub use sinusoidal::{
    sinusoidal_encode, sinusoidal_rows, SinusoidalPositionalEncoding,
};

mod rotary;
pub use rotary::{rotary_encode, rotate_half, RotaryPositionEmbedding};
