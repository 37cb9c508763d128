//! Token-budgeted grouping of files into analysis chunks.
//!
//! First-fit, sequential, no reordering: files are taken in filter order and
//! appended to the open chunk until the next one would overflow the budget.
//! A file is never split. When a file alone is larger than the budget it is
//! shipped on its own in an `oversized` chunk.

pub mod tokens;

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{AnalysisResult, ConfigError};
use crate::types::FileChange;
use tokens::EstimateTokens;

/// A size-bounded batch submitted to the analysis service.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisChunk {
    /// Position of this chunk in the plan (0-based).
    pub index: usize,
    pub files: Vec<FileChange>,
    pub estimated_tokens: usize,
    /// Set when this is a single file larger than the budget.
    pub oversized: bool,
}

impl AnalysisChunk {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.new_path.as_str())
    }
}

/// Files and chunks cut off by `max_chunks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub dropped_chunks: usize,
    pub dropped_files: Vec<String>,
}

/// Output of the chunker.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkPlan {
    pub budget: usize,
    pub chunks: Vec<AnalysisChunk>,
    /// `Some` when review coverage is partial because of `max_chunks`.
    pub truncated: Option<Truncation>,
}

impl ChunkPlan {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.chunks.iter().map(|c| c.estimated_tokens).sum()
    }
}

/// Chunker limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub token_budget: usize,
    /// `None` means unlimited.
    pub max_chunks: Option<usize>,
}

/// Estimated size of one file as it will be sent.
pub fn estimate_file_tokens<E: EstimateTokens + ?Sized>(fc: &FileChange, est: &E) -> usize {
    est.estimate_tokens(&fc.render_diff())
}

/// Packs `files` into chunks under `limits.token_budget`.
pub fn chunk_files<E: EstimateTokens + ?Sized>(
    files: &[&FileChange],
    limits: ChunkLimits,
    est: &E,
) -> AnalysisResult<ChunkPlan> {
    let budget = limits.token_budget;
    if budget == 0 {
        return Err(ConfigError::ZeroBudget.into());
    }

    let mut chunks: Vec<AnalysisChunk> = Vec::new();
    let mut current: Vec<FileChange> = Vec::new();
    let mut running = 0usize;

    for fc in files {
        let tokens = estimate_file_tokens(fc, est);

        if !current.is_empty() && running + tokens > budget {
            close(&mut chunks, &mut current, &mut running, false);
        }

        if tokens > budget {
            warn!(
                "chunk: {} alone needs ~{} tokens (budget {}), sending as oversized chunk",
                fc.new_path, tokens, budget
            );
            current.push((*fc).clone());
            running = tokens;
            close(&mut chunks, &mut current, &mut running, true);
            continue;
        }

        current.push((*fc).clone());
        running += tokens;
    }
    close(&mut chunks, &mut current, &mut running, false);

    let truncated = match limits.max_chunks {
        Some(max) if chunks.len() > max => {
            let dropped: Vec<AnalysisChunk> = chunks.split_off(max);
            let dropped_files: Vec<String> = dropped
                .iter()
                .flat_map(|c| c.paths().map(str::to_string))
                .collect();
            warn!(
                "chunk: max_chunks={} reached, dropping {} chunk(s) / {} file(s): {:?}",
                max,
                dropped.len(),
                dropped_files.len(),
                dropped_files
            );
            Some(Truncation {
                dropped_chunks: dropped.len(),
                dropped_files,
            })
        }
        _ => None,
    };

    debug!(
        "chunk: files={} chunks={} budget={} truncated={}",
        files.len(),
        chunks.len(),
        budget,
        truncated.is_some()
    );

    Ok(ChunkPlan {
        budget,
        chunks,
        truncated,
    })
}

fn close(
    chunks: &mut Vec<AnalysisChunk>,
    current: &mut Vec<FileChange>,
    running: &mut usize,
    oversized: bool,
) {
    if current.is_empty() {
        return;
    }
    chunks.push(AnalysisChunk {
        index: chunks.len(),
        files: std::mem::take(current),
        estimated_tokens: *running,
        oversized,
    });
    *running = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiffLine, FileStatus, LineKind};

    /// One token per character keeps the arithmetic readable.
    fn per_char(t: &str) -> usize {
        t.chars().count()
    }

    /// File whose rendered diff is exactly `size` characters long.
    fn file(path: &str, size: usize) -> FileChange {
        let mut fc = FileChange {
            old_path: path.to_string(),
            new_path: path.to_string(),
            status: FileStatus::Modified,
            hunks: Vec::new(),
            lines: vec![DiffLine {
                hunk: 0,
                kind: LineKind::Added { new_line: 1 },
                content: String::new(),
            }],
            is_binary: false,
        };
        let base = fc.render_diff().chars().count();
        assert!(size >= base, "{path}: size {size} < header {base}");
        fc.lines[0].content = "x".repeat(size - base);
        fc
    }

    fn limits(budget: usize) -> ChunkLimits {
        ChunkLimits {
            token_budget: budget,
            max_chunks: None,
        }
    }

    fn layout(plan: &ChunkPlan) -> Vec<Vec<String>> {
        plan.chunks
            .iter()
            .map(|c| c.paths().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn greedy_first_fit_in_order() {
        let files = vec![file("a", 40), file("b", 40), file("c", 30), file("d", 90)];
        let refs: Vec<&FileChange> = files.iter().collect();
        let plan = chunk_files(&refs, limits(100), &per_char).unwrap();

        assert_eq!(layout(&plan), vec![vec!["a", "b"], vec!["c"], vec!["d"]]);
        assert_eq!(
            plan.chunks.iter().map(|c| c.estimated_tokens).collect::<Vec<_>>(),
            vec![80, 30, 90]
        );
        assert!(plan.chunks.iter().all(|c| !c.oversized));
        assert!(plan.truncated.is_none());
    }

    #[test]
    fn budget_holds_and_concatenation_reconstructs_input() {
        let files: Vec<FileChange> = (0..25)
            .map(|i| file(&format!("f{i}"), 30 + (i * 37) % 80))
            .collect();
        let refs: Vec<&FileChange> = files.iter().collect();
        let plan = chunk_files(&refs, limits(150), &per_char).unwrap();

        for c in &plan.chunks {
            assert!(c.oversized || c.estimated_tokens <= 150);
            assert_eq!(c.index, plan.chunks.iter().position(|x| std::ptr::eq(x, c)).unwrap());
        }
        let flat: Vec<&FileChange> = plan.chunks.iter().flat_map(|c| c.files.iter()).collect();
        assert_eq!(flat, refs);
    }

    #[test]
    fn oversized_file_is_alone_and_flagged() {
        let files = vec![file("huge.rs", 200)];
        let refs: Vec<&FileChange> = files.iter().collect();
        let plan = chunk_files(&refs, limits(100), &per_char).unwrap();

        assert_eq!(plan.chunks.len(), 1);
        assert!(plan.chunks[0].oversized);
        assert_eq!(plan.chunks[0].estimated_tokens, 200);
        assert_eq!(plan.chunks[0].files[0], files[0]);
    }

    #[test]
    fn oversized_in_the_middle_closes_neighbours() {
        let files = vec![file("a", 30), file("big", 500), file("b", 30)];
        let refs: Vec<&FileChange> = files.iter().collect();
        let plan = chunk_files(&refs, limits(100), &per_char).unwrap();
        assert_eq!(layout(&plan), vec![vec!["a"], vec!["big"], vec!["b"]]);
        assert_eq!(
            plan.chunks.iter().map(|c| c.oversized).collect::<Vec<_>>(),
            vec![false, true, false]
        );
    }

    #[test]
    fn chunking_is_idempotent() {
        let files: Vec<FileChange> = (0..12).map(|i| file(&format!("f{i}"), 35 + i * 5)).collect();
        let refs: Vec<&FileChange> = files.iter().collect();
        let a = chunk_files(&refs, limits(120), &per_char).unwrap();
        let b = chunk_files(&refs, limits(120), &per_char).unwrap();
        assert_eq!(layout(&a), layout(&b));
    }

    #[test]
    fn max_chunks_truncation_is_reported() {
        let files = vec![file("a", 60), file("b", 60), file("c", 60), file("d", 60)];
        let refs: Vec<&FileChange> = files.iter().collect();
        let plan = chunk_files(
            &refs,
            ChunkLimits {
                token_budget: 100,
                max_chunks: Some(2),
            },
            &per_char,
        )
        .unwrap();
        assert_eq!(layout(&plan), vec![vec!["a"], vec!["b"]]);
        assert_eq!(
            plan.truncated,
            Some(Truncation {
                dropped_chunks: 2,
                dropped_files: vec!["c".to_string(), "d".to_string()],
            })
        );
    }

    #[test]
    fn empty_input_and_zero_budget() {
        let plan = chunk_files(&[], limits(10), &per_char).unwrap();
        assert!(plan.is_empty());
        assert!(chunk_files(&[], limits(0), &per_char).is_err());
    }
}
