//! Resolves analysis suggestions to diff positions.
//!
//! A suggestion lands inline when its line is addressable in the new file,
//! or when an addressable line exists within `snap_distance`. Anything else
//! becomes a general MR note naming the file and line.

use std::collections::HashMap;

use diff_analysis::ReviewPlan;
use diff_analysis::position::LinePositionIndex;
use serde::Serialize;

use crate::analysis::Suggestion;

/// Where a suggestion will be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Placement {
    Inline {
        new_path: String,
        old_path: String,
        new_line: u32,
        /// Set for context lines; `None` for added lines.
        old_line: Option<u32>,
        line_code: String,
        /// Original requested line when the comment was moved.
        snapped_from: Option<u32>,
    },
    General {
        reason: String,
    },
}

impl Placement {
    pub fn is_inline(&self) -> bool {
        matches!(self, Placement::Inline { .. })
    }
}

/// Index plus the old paths needed for GitLab positions.
#[derive(Debug)]
pub struct Placer<'a> {
    index: &'a LinePositionIndex,
    old_paths: HashMap<&'a str, &'a str>,
    snap_distance: u32,
}

impl<'a> Placer<'a> {
    pub fn new(plan: &'a ReviewPlan, snap_distance: u32) -> Self {
        let old_paths = plan
            .parsed
            .files
            .iter()
            .map(|f| (f.new_path.as_str(), f.old_path.as_str()))
            .collect();
        Self {
            index: &plan.index,
            old_paths,
            snap_distance,
        }
    }

    pub fn place(&self, s: &Suggestion) -> Placement {
        let path = s.file_path.as_str();
        if self.index.file_map(path).is_none() {
            return Placement::General {
                reason: format!("{path} has no reviewable lines in this diff"),
            };
        }

        let (line, snapped_from) = match self.index.get_line_info(path, s.line_number) {
            Some(_) => (s.line_number, None),
            None => match self
                .index
                .find_nearest_valid_line_within(path, s.line_number, self.snap_distance)
            {
                Some(l) => (l, Some(s.line_number)),
                None => {
                    return Placement::General {
                        reason: format!("{path}:{} is outside the diff", s.line_number),
                    };
                }
            },
        };

        let Some(info) = self.index.get_line_info(path, line) else {
            return Placement::General {
                reason: format!("{path}:{line} is not addressable"),
            };
        };

        Placement::Inline {
            new_path: path.to_string(),
            old_path: self.old_paths.get(path).copied().unwrap_or(path).to_string(),
            new_line: line,
            old_line: info.old_line_number(),
            line_code: info.line_identifier.clone(),
            snapped_from,
        }
    }
}

/// One-shot form of [`Placer::place`].
pub fn place_suggestion(plan: &ReviewPlan, s: &Suggestion, snap_distance: u32) -> Placement {
    Placer::new(plan, snap_distance).place(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diff_analysis::chunk::ChunkLimits;
    use diff_analysis::filter::FilePatterns;
    use diff_analysis::position::path_hash;
    use diff_analysis::{TokenEstimator, plan_review};

    const DIFF: &str = "diff --git a/src/old_name.rs b/src/app.rs
similarity index 90%
rename from src/old_name.rs
rename to src/app.rs
--- a/src/old_name.rs
+++ b/src/app.rs
@@ -10,2 +10,3 @@
 fn a() {}
+fn b() {}
 fn c() {}
@@ -30,1 +31,1 @@
-old();
+new();
";

    fn plan() -> ReviewPlan {
        plan_review(
            DIFF,
            &FilePatterns::empty(),
            ChunkLimits {
                token_budget: 1000,
                max_chunks: None,
            },
            &TokenEstimator::default(),
        )
        .unwrap()
    }

    fn sugg(path: &str, line: u32) -> Suggestion {
        Suggestion {
            file_path: path.into(),
            line_number: line,
            message: "m".into(),
            severity: "info".into(),
        }
    }

    #[test]
    fn exact_added_line_goes_inline() {
        let p = plan();
        let h = path_hash("src/app.rs");
        assert_eq!(
            place_suggestion(&p, &sugg("src/app.rs", 11), 3),
            Placement::Inline {
                new_path: "src/app.rs".into(),
                old_path: "src/old_name.rs".into(),
                new_line: 11,
                old_line: None,
                line_code: format!("{h}__11"),
                snapped_from: None,
            }
        );
    }

    #[test]
    fn context_line_carries_old_number() {
        let p = plan();
        match place_suggestion(&p, &sugg("src/app.rs", 12), 3) {
            Placement::Inline {
                old_line,
                line_code,
                ..
            } => {
                assert_eq!(old_line, Some(11));
                assert!(line_code.ends_with("_11_12"));
            }
            other => panic!("expected inline, got {other:?}"),
        }
    }

    #[test]
    fn nearby_line_snaps_within_distance() {
        let p = plan();
        match place_suggestion(&p, &sugg("src/app.rs", 14), 3) {
            Placement::Inline {
                new_line,
                snapped_from,
                ..
            } => {
                assert_eq!(new_line, 12);
                assert_eq!(snapped_from, Some(14));
            }
            other => panic!("expected inline, got {other:?}"),
        }
    }

    #[test]
    fn far_line_and_unknown_file_fall_back_to_general() {
        let p = plan();
        assert!(!place_suggestion(&p, &sugg("src/app.rs", 20), 3).is_inline());
        assert!(!place_suggestion(&p, &sugg("src/app.rs", 14), 0).is_inline());
        assert!(!place_suggestion(&p, &sugg("README.md", 1), 3).is_inline());
    }
}
