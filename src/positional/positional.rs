use ndarray::Array3;

use crate::error::PositionalError;
use crate::utils::PositionalEncodingType;

/// Trait for all positional encoding implementations
pub trait PositionalEncoding: Send + Sync {
    fn kind(&self) -> PositionalEncodingType;

    /// Feature dimension the encoding was built for
    fn dim(&self) -> usize;

    /// Apply positional encoding to input embeddings
    /// Input shape: (batch_size, seq_len, embedding_dim)
    fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>, PositionalError>;
}
