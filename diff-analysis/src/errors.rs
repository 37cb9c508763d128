//! Crate-wide error hierarchy for diff-analysis.
//!
//! Only two things are fatal here: bad configuration and broken caller
//! contracts. Malformed diff input is recovered per file and surfaces as
//! [`crate::parser::ParseWarning`] instead.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type AnalysisResult<T> = Result<T, Error>;

/// Root error type for the diff-analysis crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Unified diff parsing failure (only raised by strict helpers).
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Configuration problems (bad globs, zero budget, etc.).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The caller broke an API contract, e.g. mapped a binary file.
    #[error("contract violation: {0}")]
    Contract(String),
}

/// Unified diff parser errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid hunk header: {0}")]
    InvalidHunkHeader(String),

    #[error("hunk truncated: expected -{expected_old}/+{expected_new}, got -{got_old}/+{got_new}")]
    TruncatedHunk {
        expected_old: u32,
        expected_new: u32,
        got_old: u32,
        got_new: u32,
    },

    #[error("hunk overflow: header announced -{expected_old}/+{expected_new}, {extra} extra line(s) dropped")]
    HunkOverflow {
        expected_old: u32,
        expected_new: u32,
        extra: u32,
    },

    #[error("overlapping hunks at line {line}")]
    OverlappingHunks { line: u32 },

    #[error("integer overflow")]
    Overflow,
}

/// Configuration errors for patterns and chunk budgets.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid glob pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("token budget must be > 0")]
    ZeroBudget,

    #[error("token ratio must be a positive finite number, got {0}")]
    InvalidRatio(f64),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}
