//! Token estimation strategies.
//!
//! Everything that needs a token count goes through [`EstimateTokens`]. The
//! default [`TokenEstimator`] is enum-dispatched: a BPE tokenizer when its
//! tables load, otherwise a chars-times-ratio heuristic.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

use crate::errors::{AnalysisResult, ConfigError};

/// Tokens per character for diff-like text (denser than prose).
pub const DEFAULT_TOKEN_RATIO: f64 = 0.28;

/// The single "estimate tokens for text" operation.
pub trait EstimateTokens {
    fn estimate_tokens(&self, text: &str) -> usize;
}

/// Which estimator to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerMode {
    /// Use BPE if it loads, the heuristic otherwise.
    Auto,
    Heuristic,
    Bpe,
}

impl std::str::FromStr for TokenizerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "heuristic" | "chars" => Ok(Self::Heuristic),
            "bpe" | "cl100k" | "tiktoken" => Ok(Self::Bpe),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub enum TokenEstimator {
    Heuristic { ratio: f64 },
    Bpe(Arc<CoreBPE>),
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heuristic { ratio } => f.debug_struct("Heuristic").field("ratio", ratio).finish(),
            Self::Bpe(_) => f.write_str("Bpe(cl100k_base)"),
        }
    }
}

impl TokenEstimator {
    /// Character-ratio fallback. The ratio must be positive and finite.
    pub fn heuristic(ratio: f64) -> AnalysisResult<Self> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(ConfigError::InvalidRatio(ratio).into());
        }
        Ok(Self::Heuristic { ratio })
    }

    /// Builds the estimator for `mode`. `Bpe` and `Auto` both fall back to
    /// the heuristic when the tokenizer cannot be loaded.
    pub fn from_mode(mode: TokenizerMode, ratio: f64) -> AnalysisResult<Self> {
        let fallback = Self::heuristic(ratio)?;
        if mode == TokenizerMode::Heuristic {
            return Ok(fallback);
        }
        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => {
                debug!("tokens: using cl100k_base tokenizer");
                Ok(Self::Bpe(Arc::new(bpe)))
            }
            Err(e) => {
                warn!("tokens: BPE unavailable ({}), using ratio {}", e, ratio);
                Ok(fallback)
            }
        }
    }

    pub fn is_precise(&self) -> bool {
        matches!(self, Self::Bpe(_))
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::Heuristic {
            ratio: DEFAULT_TOKEN_RATIO,
        }
    }
}

impl EstimateTokens for TokenEstimator {
    fn estimate_tokens(&self, text: &str) -> usize {
        match self {
            Self::Heuristic { ratio } => (text.chars().count() as f64 * ratio).ceil() as usize,
            Self::Bpe(bpe) => bpe.encode_with_special_tokens(text).len(),
        }
    }
}

impl<F> EstimateTokens for F
where
    F: Fn(&str) -> usize,
{
    fn estimate_tokens(&self, text: &str) -> usize {
        self(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_rounds_up() {
        let est = TokenEstimator::heuristic(0.28).unwrap();
        assert_eq!(est.estimate_tokens(""), 0);
        // 10 chars * 0.28 = 2.8 -> 3
        assert_eq!(est.estimate_tokens("0123456789"), 3);
        // chars, not bytes
        assert_eq!(est.estimate_tokens("ééééé"), 2);
    }

    #[test]
    fn rejects_bad_ratio() {
        assert!(TokenEstimator::heuristic(0.0).is_err());
        assert!(TokenEstimator::heuristic(f64::NAN).is_err());
    }

    #[test]
    fn closures_are_estimators() {
        let words = |t: &str| t.split_whitespace().count();
        assert_eq!(words.estimate_tokens("a b c"), 3);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("BPE".parse::<TokenizerMode>(), Ok(TokenizerMode::Bpe));
        assert_eq!("".parse::<TokenizerMode>(), Ok(TokenizerMode::Auto));
        assert!("words".parse::<TokenizerMode>().is_err());
    }
}
