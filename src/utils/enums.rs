use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionalEncodingType {
    /// Fixed sinusoidal table added to the token vectors
    Sinusoidal,
    /// Rotary position embeddings (RoPE) applied to queries/keys
    Rotary,
}

impl Default for PositionalEncodingType {
    fn default() -> Self {
        Self::Sinusoidal
    }
}

/// Which two features share one frequency and are rotated together.
///
/// The angle-table layout and the rotate-half operator are both derived from
/// this value, so one encoder can never mix the two layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PairingConvention {
    /// Pair `i` is `(2i, 2i + 1)`.
    Interleaved,
    /// Pair `i` is `(i, i + dim / 2)` (LLaMA / HF layout).
    HalfSplit,
}

impl Default for PairingConvention {
    fn default() -> Self {
        Self::HalfSplit
    }
}

impl PairingConvention {
    /// Index of the frequency driving `feature`.
    pub fn frequency_index(self, feature: usize, dim: usize) -> usize {
        match self {
            Self::Interleaved => feature / 2,
            Self::HalfSplit => feature % (dim / 2),
        }
    }

    /// Feature indices `(first, second)` of pair `pair`.
    pub fn pair(self, pair: usize, dim: usize) -> (usize, usize) {
        match self {
            Self::Interleaved => (2 * pair, 2 * pair + 1),
            Self::HalfSplit => (pair, pair + dim / 2),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Interleaved => "interleaved",
            Self::HalfSplit => "half-split",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_cover_every_feature_once() {
        for convention in [PairingConvention::Interleaved, PairingConvention::HalfSplit] {
            let dim = 16;
            let mut seen = vec![false; dim];
            for i in 0..dim / 2 {
                let (a, b) = convention.pair(i, dim);
                assert!(!seen[a] && !seen[b], "{convention:?} reuses a feature");
                seen[a] = true;
                seen[b] = true;
                assert_eq!(convention.frequency_index(a, dim), i);
                assert_eq!(convention.frequency_index(b, dim), i);
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn test_convention_serde_names() {
        let json = serde_json::to_string(&PairingConvention::HalfSplit).unwrap();
        assert_eq!(json, "\"HalfSplit\"");
        let parsed: PairingConvention = serde_json::from_str("\"Interleaved\"").unwrap();
        assert_eq!(parsed, PairingConvention::Interleaved);
    }
}
