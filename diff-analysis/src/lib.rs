//! Diff analysis core for merge-request review.
//!
//! Pure, synchronous pipeline over one raw diff:
//!
//! 1) **Parse**: unified diff → `FileChange[]` with dual line numbering
//! 2) **Filter**: ignore globs, drop binaries, priority ordering
//! 3) **Chunk**: token-budgeted `AnalysisChunk[]` for the analysis service
//! 4) **Map**: `LinePositionIndex` (new line → old line + `line_code`)
//!
//! Nothing here does I/O or keeps global state; every call owns its own
//! results, so independent merge requests can be planned concurrently.

pub mod chunk;
pub mod config;
pub mod errors;
pub mod filter;
pub mod parser;
pub mod position;
pub mod types;

use std::time::Instant;
use tracing::{debug, info};

use chunk::tokens::EstimateTokens;
use chunk::{ChunkLimits, ChunkPlan};
use errors::AnalysisResult;
use filter::FilePatterns;
use parser::ParsedDiff;
use position::LinePositionIndex;

/// Everything the collaborators need for one review cycle.
#[derive(Debug, Clone)]
pub struct ReviewPlan {
    /// Full parse result, binaries and ignored files included (for reporting).
    pub parsed: ParsedDiff,
    /// Paths dropped by ignore patterns.
    pub ignored: Vec<String>,
    /// Paths dropped because they are binary.
    pub binary: Vec<String>,
    /// Chunks for the analysis service.
    pub chunks: ChunkPlan,
    /// Positions of reviewed files only.
    pub index: LinePositionIndex,
}

/// Runs filter → chunk → map over an already parsed diff.
pub fn plan_parsed<E: EstimateTokens + ?Sized>(
    mut parsed: ParsedDiff,
    patterns: &FilePatterns,
    limits: ChunkLimits,
    est: &E,
) -> AnalysisResult<ReviewPlan> {
    let t0 = Instant::now();

    let filter::FilterOutcome {
        kept,
        ignored,
        binary,
    } = filter::filter_files(&parsed.files, patterns);
    let chunks = chunk::chunk_files(&kept, limits, est)?;
    let index = LinePositionIndex::build(kept.iter().copied());
    debug!(
        "plan: kept={} chunks={} mapped_files={}",
        kept.len(),
        chunks.chunks.len(),
        index.file_count()
    );
    drop(kept);
    parsed.warnings.extend_from_slice(index.warnings());

    info!(
        "plan: files={} ignored={} binary={} chunks={} tokens~{} warnings={} in {} ms",
        parsed.files.len(),
        ignored.len(),
        binary.len(),
        chunks.chunks.len(),
        chunks.total_tokens(),
        parsed.warnings.len(),
        t0.elapsed().as_millis()
    );

    Ok(ReviewPlan {
        parsed,
        ignored,
        binary,
        chunks,
        index,
    })
}

/// Parses `raw` and runs the whole pipeline.
pub fn plan_review<E: EstimateTokens + ?Sized>(
    raw: &str,
    patterns: &FilePatterns,
    limits: ChunkLimits,
    est: &E,
) -> AnalysisResult<ReviewPlan> {
    plan_parsed(parser::parse_unified_diff(raw), patterns, limits, est)
}

// -----------------------------------------------------------------------------
// Convenience re-exports for downstream users
// -----------------------------------------------------------------------------

pub use chunk::tokens::{TokenEstimator, TokenizerMode};
pub use chunk::AnalysisChunk;
pub use config::AnalysisConfig;
pub use errors::Error as AnalysisError;
pub use position::{FileLineMap, LinePositionInfo};
pub use types::{DiffLine, FileChange, FileStatus, Hunk, LineKind};

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "diff --git a/src/core.rs b/src/core.rs
--- a/src/core.rs
+++ b/src/core.rs
@@ -1,2 +1,3 @@
 fn core() {
+    run();
 }
diff --git a/Cargo.lock b/Cargo.lock
--- a/Cargo.lock
+++ b/Cargo.lock
@@ -1 +1 @@
-version = 1
+version = 2
diff --git a/docs/guide.md b/docs/guide.md
--- a/docs/guide.md
+++ b/docs/guide.md
@@ -3 +3,2 @@
 intro
+more
diff --git a/icon.ico b/icon.ico
Binary files a/icon.ico and b/icon.ico differ
";

    fn plan() -> ReviewPlan {
        let patterns =
            FilePatterns::new(&["*.lock".to_string()], &["src/**".to_string()]).unwrap();
        plan_review(
            DIFF,
            &patterns,
            ChunkLimits {
                token_budget: 10_000,
                max_chunks: None,
            },
            &TokenEstimator::default(),
        )
        .unwrap()
    }

    #[test]
    fn ignored_file_never_reaches_chunks_or_index() {
        let p = plan();
        assert_eq!(p.ignored, vec!["Cargo.lock"]);
        assert_eq!(p.binary, vec!["icon.ico"]);
        assert!(
            p.chunks
                .chunks
                .iter()
                .all(|c| c.paths().all(|path| path != "Cargo.lock"))
        );
        assert!(p.index.file_map("Cargo.lock").is_none());
        assert!(p.index.file_map("icon.ico").is_none());
        // Still listed for reporting.
        assert_eq!(p.parsed.files.len(), 4);
    }

    #[test]
    fn reviewed_files_are_chunked_and_mapped() {
        let p = plan();
        assert_eq!(p.chunks.chunks.len(), 1);
        let paths: Vec<&str> = p.chunks.chunks[0].paths().collect();
        assert_eq!(paths, vec!["src/core.rs", "docs/guide.md"]);
        assert!(p.index.is_valid_position("src/core.rs", 2));
        assert!(p.index.is_valid_position("docs/guide.md", 4));
    }

    #[test]
    fn overlapping_file_does_not_sink_the_plan() {
        let diff = "diff --git a/bad.rs b/bad.rs
--- a/bad.rs
+++ b/bad.rs
@@ -1,1 +1,1 @@
-a
+b
@@ -1,1 +1,1 @@
-a
+b
diff --git a/good.rs b/good.rs
--- a/good.rs
+++ b/good.rs
@@ -1 +1,2 @@
 x
+y
";
        let p = plan_review(
            diff,
            &FilePatterns::empty(),
            ChunkLimits {
                token_budget: 10_000,
                max_chunks: None,
            },
            &TokenEstimator::default(),
        )
        .unwrap();

        assert!(p.index.is_valid_position("good.rs", 2));
        assert!(p.index.file_map("bad.rs").is_none());
        assert!(p.parsed.warnings.iter().any(|w| w.path == "bad.rs"
            && w.error == errors::ParseError::OverlappingHunks { line: 1 }));
    }
}
