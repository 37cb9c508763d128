//! File classification: ignore globs, binary exclusion and review priority.
//!
//! Patterns are matched against `new_path` with `/` separators. Ordering is a
//! stable sort on (priority match, changed lines desc), so ties keep the
//! order in which files appeared in the diff.

use std::cmp::Reverse;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::debug;

use crate::errors::{AnalysisResult, ConfigError};
use crate::types::FileChange;

/// Compiled ignore/priority pattern sets.
#[derive(Debug, Clone)]
pub struct FilePatterns {
    ignore: Option<GlobSet>,
    prioritize: Option<GlobSet>,
}

impl FilePatterns {
    /// Compiles both pattern lists. Blank entries are skipped; an invalid glob
    /// is a configuration error.
    pub fn new(ignore: &[String], prioritize: &[String]) -> AnalysisResult<Self> {
        Ok(Self {
            ignore: build_globset(ignore)?,
            prioritize: build_globset(prioritize)?,
        })
    }

    /// Pattern set that ignores nothing and prioritizes nothing.
    pub fn empty() -> Self {
        Self {
            ignore: None,
            prioritize: None,
        }
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        matches(self.ignore.as_ref(), path)
    }

    pub fn is_priority(&self, path: &str) -> bool {
        matches(self.prioritize.as_ref(), path)
    }
}

/// Result of filtering: the files to review plus what was dropped and why.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterOutcome<'a> {
    #[serde(skip)]
    pub kept: Vec<&'a FileChange>,
    /// Paths dropped by an ignore pattern.
    pub ignored: Vec<String>,
    /// Paths dropped because they are binary.
    pub binary: Vec<String>,
}

impl FilterOutcome<'_> {
    pub fn kept_paths(&self) -> Vec<&str> {
        self.kept.iter().map(|f| f.new_path.as_str()).collect()
    }
}

/// Drops ignored and binary files, then orders the rest for review.
pub fn filter_files<'a>(files: &'a [FileChange], patterns: &FilePatterns) -> FilterOutcome<'a> {
    let mut out = FilterOutcome::default();

    for fc in files {
        if patterns.is_ignored(&fc.new_path) {
            debug!("filter: ignore (glob) {}", fc.new_path);
            out.ignored.push(fc.new_path.clone());
        } else if fc.is_binary {
            debug!("filter: skip binary {}", fc.new_path);
            out.binary.push(fc.new_path.clone());
        } else {
            out.kept.push(fc);
        }
    }

    // `sort_by_key` is stable: original order breaks ties.
    out.kept.sort_by_key(|fc| {
        (
            Reverse(patterns.is_priority(&fc.new_path)),
            Reverse(fc.changed_line_count()),
        )
    });

    debug!(
        "filter: kept={} ignored={} binary={}",
        out.kept.len(),
        out.ignored.len(),
        out.binary.len()
    );
    out
}

fn build_globset(patterns: &[String]) -> AnalysisResult<Option<GlobSet>> {
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for pat in patterns {
        let pat = pat.trim();
        if pat.is_empty() {
            continue;
        }
        let glob = Glob::new(pat).map_err(|source| ConfigError::InvalidPattern {
            pattern: pat.to_string(),
            source,
        })?;
        builder.add(glob);
        any = true;
    }
    if !any {
        return Ok(None);
    }
    let set = builder.build().map_err(|source| ConfigError::InvalidPattern {
        pattern: patterns.join(","),
        source,
    })?;
    Ok(Some(set))
}

fn matches(set: Option<&GlobSet>, path: &str) -> bool {
    set.is_some_and(|gs| gs.is_match(path.replace('\\', "/")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiffLine, FileStatus, LineKind};

    fn file(path: &str, added: u32, binary: bool) -> FileChange {
        FileChange {
            old_path: path.to_string(),
            new_path: path.to_string(),
            status: FileStatus::Modified,
            hunks: Vec::new(),
            lines: (1..=added)
                .map(|n| DiffLine {
                    hunk: 0,
                    kind: LineKind::Added { new_line: n },
                    content: format!("line {n}"),
                })
                .collect(),
            is_binary: binary,
        }
    }

    fn pats(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn drops_ignored_and_binary() {
        let files = vec![
            file("Cargo.lock", 50, false),
            file("src/main.rs", 3, false),
            file("assets/logo.png", 0, true),
            file("web/dist/app.min.js", 9, false),
        ];
        let p = FilePatterns::new(&pats(&["*.lock", "**/dist/**"]), &[]).unwrap();
        let out = filter_files(&files, &p);
        assert_eq!(out.kept_paths(), vec!["src/main.rs"]);
        assert_eq!(out.ignored, vec!["Cargo.lock", "web/dist/app.min.js"]);
        assert_eq!(out.binary, vec!["assets/logo.png"]);
    }

    #[test]
    fn orders_by_priority_then_size_then_input() {
        let files = vec![
            file("docs/a.md", 10, false),
            file("src/small.rs", 2, false),
            file("docs/b.md", 10, false),
            file("src/big.rs", 7, false),
            file("docs/c.md", 40, false),
        ];
        let p = FilePatterns::new(&[], &pats(&["src/**"])).unwrap();
        let out = filter_files(&files, &p);
        assert_eq!(
            out.kept_paths(),
            vec!["src/big.rs", "src/small.rs", "docs/c.md", "docs/a.md", "docs/b.md"]
        );
    }

    #[test]
    fn invalid_glob_is_config_error() {
        let err = FilePatterns::new(&pats(&["src/[abc"]), &[]).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::Error::Config(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn blank_patterns_match_nothing() {
        let p = FilePatterns::new(&pats(&["", "  "]), &[]).unwrap();
        assert!(!p.is_ignored("anything.rs"));
        assert!(!FilePatterns::empty().is_priority("src/lib.rs"));
    }
}
