//! Utility types and helpers shared by the encoders and the verification suite
pub mod enums;
pub mod io;
pub mod math;
pub mod types;

// Re-export commonly used utilities
pub use enums::*;
pub use io::*;
pub use math::*;
pub use types::*;
