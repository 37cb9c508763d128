//! Runtime configuration loaded from environment variables.

use crate::chunk::tokens::{DEFAULT_TOKEN_RATIO, TokenEstimator, TokenizerMode};
use crate::chunk::ChunkLimits;
use crate::errors::{AnalysisResult, ConfigError};
use crate::filter::FilePatterns;

/// Knobs for filtering and chunking. All fields have defaults via `from_env`.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisConfig {
    /// Globs for files that are never reviewed.
    pub ignore_patterns: Vec<String>,
    /// Globs for files reviewed first.
    pub priority_patterns: Vec<String>,
    pub token_budget: usize,
    /// `None` = unlimited.
    pub max_chunks: Option<usize>,
    /// Tokens per character for the heuristic estimator.
    pub token_ratio: f64,
    pub tokenizer: TokenizerMode,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignores(),
            priority_patterns: Vec::new(),
            token_budget: 6000,
            max_chunks: None,
            token_ratio: DEFAULT_TOKEN_RATIO,
            tokenizer: TokenizerMode::Auto,
        }
    }
}

impl AnalysisConfig {
    /// Build from environment variables with sensible defaults.
    ///
    /// - `REVIEW_IGNORE_PATTERNS`, `REVIEW_PRIORITY_PATTERNS`: comma-separated globs
    /// - `REVIEW_TOKEN_BUDGET` (6000), `REVIEW_MAX_CHUNKS` (unset or 0 = unlimited)
    /// - `REVIEW_TOKEN_RATIO` (0.28), `REVIEW_TOKENIZER` (`auto` | `heuristic` | `bpe`)
    pub fn from_env() -> AnalysisResult<Self> {
        let d = Self::default();
        let cfg = Self {
            ignore_patterns: list("REVIEW_IGNORE_PATTERNS").unwrap_or(d.ignore_patterns),
            priority_patterns: list("REVIEW_PRIORITY_PATTERNS").unwrap_or(d.priority_patterns),
            token_budget: parse("REVIEW_TOKEN_BUDGET", d.token_budget)?,
            max_chunks: match parse("REVIEW_MAX_CHUNKS", 0usize)? {
                0 => None,
                n => Some(n),
            },
            token_ratio: parse("REVIEW_TOKEN_RATIO", d.token_ratio)?,
            tokenizer: match std::env::var("REVIEW_TOKENIZER") {
                Ok(v) => v.parse().map_err(|value| ConfigError::InvalidEnv {
                    key: "REVIEW_TOKENIZER".into(),
                    value,
                })?,
                Err(_) => d.tokenizer,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates config values.
    pub fn validate(&self) -> AnalysisResult<()> {
        if self.token_budget == 0 {
            return Err(ConfigError::ZeroBudget.into());
        }
        if !self.token_ratio.is_finite() || self.token_ratio <= 0.0 {
            return Err(ConfigError::InvalidRatio(self.token_ratio).into());
        }
        Ok(())
    }

    pub fn patterns(&self) -> AnalysisResult<FilePatterns> {
        FilePatterns::new(&self.ignore_patterns, &self.priority_patterns)
    }

    pub fn limits(&self) -> ChunkLimits {
        ChunkLimits {
            token_budget: self.token_budget,
            max_chunks: self.max_chunks,
        }
    }

    pub fn estimator(&self) -> AnalysisResult<TokenEstimator> {
        TokenEstimator::from_mode(self.tokenizer, self.token_ratio)
    }
}

/// Lock files and vendored/minified output rarely deserve review.
fn default_ignores() -> Vec<String> {
    ["**/*.lock", "**/*.min.js", "**/*.min.css", "**/vendor/**", "**/node_modules/**"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn parse<T: std::str::FromStr>(key: &str, dflt: T) -> AnalysisResult<T> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().parse().map_err(|_| {
            ConfigError::InvalidEnv {
                key: key.to_string(),
                value: v.clone(),
            }
            .into()
        }),
        _ => Ok(dflt),
    }
}
