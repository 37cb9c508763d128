//! Line-position mapping for inline comments.
//!
//! For every line that exists in the new version of a file (Added or
//! Context) we keep a [`LinePositionInfo`] keyed by its new line number,
//! together with the `line_code` GitLab expects on discussion positions:
//!
//! ```text
//! <sha1(new_path) as 40 hex chars>_<old_line or "">_<new_line or "">
//! ```
//!
//! GitLab rejects a context-line position without `line_code` ("line_code
//! can't be blank"), so the identifier is computed for every mapped line.
//!
//! The index is a plain value built once per review cycle and passed by
//! reference; lookups on unknown files or lines return `None`.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::errors::{AnalysisResult, Error, ParseError};
use crate::parser::ParseWarning;
use crate::types::{FileChange, LineKind};

/// Metadata needed to anchor a comment on one diff line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinePositionInfo {
    pub file_path: String,
    pub kind: LineKind,
    /// False for removed lines: the new file has nothing to anchor to.
    pub commentable: bool,
    pub line_identifier: String,
}

impl LinePositionInfo {
    pub fn new_line_number(&self) -> Option<u32> {
        self.kind.new_line()
    }

    pub fn old_line_number(&self) -> Option<u32> {
        self.kind.old_line()
    }
}

/// Lowercase hex SHA-1 of a file path.
pub fn path_hash(path: &str) -> String {
    format!("{:x}", Sha1::digest(path.as_bytes()))
}

/// Builds `"{path_hash}_{old}_{new}"`; absent numbers become empty strings.
pub fn line_identifier(path_hash: &str, old: Option<u32>, new: Option<u32>) -> String {
    let part = |n: Option<u32>| n.map(|v| v.to_string()).unwrap_or_default();
    format!("{}_{}_{}", path_hash, part(old), part(new))
}

/// All addressable lines of one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileLineMap {
    pub path: String,
    pub path_hash: String,
    /// Added and Context lines keyed by new line number.
    lines: BTreeMap<u32, LinePositionInfo>,
    /// Removed lines keyed by old line number (never commentable).
    removed: BTreeMap<u32, LinePositionInfo>,
}

impl FileLineMap {
    /// Maps one parsed, non-binary file.
    ///
    /// Fails with [`Error::Contract`] for binary files and for line sets that
    /// put two entries on the same new line (overlapping hunks).
    pub fn build(fc: &FileChange) -> AnalysisResult<Self> {
        if fc.is_binary {
            return Err(Error::Contract(format!(
                "cannot map positions for binary file {}",
                fc.new_path
            )));
        }
        Self::map_lines(fc).map_err(|e| Error::Contract(format!("{} in {}", e, fc.new_path)))
    }

    /// Maps the lines of a text file; two entries on one line number means
    /// the hunks overlap.
    fn map_lines(fc: &FileChange) -> Result<Self, ParseError> {
        let hash = path_hash(&fc.new_path);
        let mut lines = BTreeMap::new();
        let mut removed = BTreeMap::new();

        for dl in &fc.lines {
            let info = LinePositionInfo {
                file_path: fc.new_path.clone(),
                kind: dl.kind,
                commentable: !matches!(dl.kind, LineKind::Removed { .. }),
                line_identifier: line_identifier(&hash, dl.kind.old_line(), dl.kind.new_line()),
            };
            let (map, key) = match dl.kind {
                LineKind::Removed { old_line } => (&mut removed, old_line),
                LineKind::Added { new_line } | LineKind::Context { new_line, .. } => {
                    (&mut lines, new_line)
                }
            };
            if map.insert(key, info).is_some() {
                return Err(ParseError::OverlappingHunks { line: key });
            }
        }

        Ok(Self {
            path: fc.new_path.clone(),
            path_hash: hash,
            lines,
            removed,
        })
    }

    pub fn get(&self, new_line: u32) -> Option<&LinePositionInfo> {
        self.lines.get(&new_line)
    }

    pub fn get_removed(&self, old_line: u32) -> Option<&LinePositionInfo> {
        self.removed.get(&old_line)
    }

    pub fn contains(&self, new_line: u32) -> bool {
        self.lines.contains_key(&new_line)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Addressable lines in ascending new-line order.
    pub fn iter(&self) -> impl Iterator<Item = &LinePositionInfo> {
        self.lines.values()
    }

    /// Closest mapped new line; ties go to the smaller line number.
    pub fn nearest(&self, requested: u32) -> Option<u32> {
        let below = self.lines.range(..=requested).next_back().map(|(k, _)| *k);
        let above = self.lines.range(requested..).next().map(|(k, _)| *k);
        match (below, above) {
            (Some(b), Some(a)) => {
                if requested - b <= a - requested {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (b, a) => b.or(a),
        }
    }
}

/// Per-diff lookup from file path to its [`FileLineMap`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinePositionIndex {
    files: HashMap<String, FileLineMap>,
    /// Files left unmapped because their hunks overlap.
    warnings: Vec<ParseWarning>,
}

impl LinePositionIndex {
    /// Builds maps for the given files. Binary files are skipped so they
    /// simply have no map. Files without hunks get no map either.
    ///
    /// A file whose hunks overlap gets no map and a warning; the other
    /// files are still mapped.
    pub fn build<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = &'a FileChange>,
    {
        let mut map = HashMap::new();
        let mut warnings = Vec::new();
        for fc in files {
            if fc.is_binary || fc.lines.is_empty() {
                continue;
            }
            let flm = match FileLineMap::map_lines(fc) {
                Ok(flm) => flm,
                Err(error) => {
                    warn!("position: {} unmapped: {}", fc.new_path, error);
                    warnings.push(ParseWarning {
                        path: fc.new_path.clone(),
                        error,
                    });
                    continue;
                }
            };
            debug!(
                "position: {} lines={} removed={}",
                flm.path,
                flm.lines.len(),
                flm.removed.len()
            );
            map.insert(fc.new_path.clone(), flm);
        }
        Self {
            files: map,
            warnings,
        }
    }

    /// Files that could not be mapped.
    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    pub fn file_map(&self, file: &str) -> Option<&FileLineMap> {
        self.files.get(file)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn is_valid_position(&self, file: &str, new_line: u32) -> bool {
        self.file_map(file).is_some_and(|m| m.contains(new_line))
    }

    pub fn get_line_info(&self, file: &str, new_line: u32) -> Option<&LinePositionInfo> {
        self.file_map(file)?.get(new_line)
    }

    pub fn get_removed_line_info(&self, file: &str, old_line: u32) -> Option<&LinePositionInfo> {
        self.file_map(file)?.get_removed(old_line)
    }

    pub fn find_nearest_valid_line(&self, file: &str, requested: u32) -> Option<u32> {
        self.file_map(file)?.nearest(requested)
    }

    /// Like [`Self::find_nearest_valid_line`] but refuses to move further
    /// than `max_distance` lines.
    pub fn find_nearest_valid_line_within(
        &self,
        file: &str,
        requested: u32,
        max_distance: u32,
    ) -> Option<u32> {
        self.find_nearest_valid_line(file, requested)
            .filter(|line| line.abs_diff(requested) <= max_distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_unified_diff;

    const DIFF: &str = "diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -10,2 +10,3 @@
 fn a() {}
+fn b() {}
 fn c() {}
@@ -40,3 +41,2 @@
 // keep
-fn old() {}
 // end
diff --git a/img.png b/img.png
Binary files a/img.png and b/img.png differ
";

    fn index() -> LinePositionIndex {
        let parsed = parse_unified_diff(DIFF);
        LinePositionIndex::build(&parsed.files)
    }

    #[test]
    fn sha1_path_hash() {
        // sha1("src/lib.rs")
        let h = path_hash("src/lib.rs");
        assert_eq!(h.len(), 40);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(path_hash("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn identifier_shapes() {
        assert_eq!(line_identifier("h", Some(41), Some(42)), "h_41_42");
        assert_eq!(line_identifier("h", None, Some(42)), "h__42");
        assert_eq!(line_identifier("h", Some(41), None), "h_41_");
    }

    #[test]
    fn simple_addition_scenario() {
        let idx = index();
        let hash = path_hash("src/lib.rs");

        let added = idx.get_line_info("src/lib.rs", 11).unwrap();
        assert_eq!(added.old_line_number(), None);
        assert!(added.commentable);
        assert!(added.line_identifier.ends_with("__11"));
        assert_eq!(added.line_identifier, format!("{hash}__11"));

        let ctx = idx.get_line_info("src/lib.rs", 12).unwrap();
        assert_eq!(ctx.old_line_number(), Some(11));
        assert_eq!(ctx.new_line_number(), Some(12));
        assert!(ctx.line_identifier.ends_with("_11_12"));
    }

    #[test]
    fn removed_lines_are_not_addressable() {
        let idx = index();
        let removed = idx.get_removed_line_info("src/lib.rs", 41).unwrap();
        assert!(!removed.commentable);
        assert_eq!(removed.line_identifier, format!("{}_41_", path_hash("src/lib.rs")));
        // 41 in the new file is the "// keep" context line, not the removed one.
        let ctx = idx.get_line_info("src/lib.rs", 41).unwrap();
        assert_eq!(ctx.old_line_number(), Some(40));
        assert_eq!(idx.get_line_info("src/lib.rs", 42).unwrap().old_line_number(), Some(42));
    }

    #[test]
    fn missing_line_and_nearest() {
        let idx = index();
        assert!(idx.get_line_info("src/lib.rs", 20).is_none());
        assert!(!idx.is_valid_position("src/lib.rs", 20));
        // mapped: 10, 11, 12, 41, 42
        assert_eq!(idx.find_nearest_valid_line("src/lib.rs", 20), Some(12));
        assert_eq!(idx.find_nearest_valid_line("src/lib.rs", 35), Some(41));
        assert_eq!(idx.find_nearest_valid_line("src/lib.rs", 1), Some(10));
        assert_eq!(idx.find_nearest_valid_line("src/lib.rs", 100), Some(42));
        assert_eq!(idx.find_nearest_valid_line_within("src/lib.rs", 20, 3), None);
        assert_eq!(idx.find_nearest_valid_line_within("src/lib.rs", 14, 3), Some(12));
    }

    #[test]
    fn nearest_tie_goes_to_smaller_line() {
        let parsed = parse_unified_diff(
            "--- a/t\n+++ b/t\n@@ -1,1 +1,1 @@\n a\n@@ -5,1 +5,1 @@\n e\n",
        );
        let idx = LinePositionIndex::build(&parsed.files);
        assert_eq!(idx.find_nearest_valid_line("t", 3), Some(1));
        assert_eq!(idx.find_nearest_valid_line("t", 4), Some(5));
    }

    #[test]
    fn unknown_and_binary_files_have_no_map() {
        let idx = index();
        assert!(idx.file_map("img.png").is_none());
        assert!(idx.get_line_info("nope.rs", 1).is_none());
        assert_eq!(idx.find_nearest_valid_line("img.png", 1), None);
        assert_eq!(idx.file_count(), 1);
    }

    #[test]
    fn mapping_binary_file_is_contract_violation() {
        let parsed = parse_unified_diff(DIFF);
        let bin = parsed.files.iter().find(|f| f.is_binary).unwrap();
        assert!(matches!(FileLineMap::build(bin), Err(Error::Contract(_))));
    }

    #[test]
    fn overlapping_hunks_are_contract_violation_for_direct_build() {
        let parsed = parse_unified_diff(
            "--- a/t\n+++ b/t\n@@ -1,1 +1,1 @@\n a\n@@ -1,1 +1,1 @@\n a\n",
        );
        assert!(matches!(
            FileLineMap::build(&parsed.files[0]),
            Err(Error::Contract(_))
        ));
    }

    #[test]
    fn overlapping_file_is_skipped_and_others_still_mapped() {
        let parsed = parse_unified_diff(
            "diff --git a/bad.rs b/bad.rs
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
",
        );
        assert_eq!(parsed.files.len(), 2);
        let idx = LinePositionIndex::build(&parsed.files);

        assert!(idx.file_map("bad.rs").is_none());
        assert!(idx.is_valid_position("good.rs", 2));
        assert_eq!(idx.file_count(), 1);
        assert_eq!(idx.warnings().len(), 1);
        assert_eq!(idx.warnings()[0].path, "bad.rs");
        assert_eq!(
            idx.warnings()[0].error,
            ParseError::OverlappingHunks { line: 1 }
        );
    }

    #[test]
    fn identifiers_are_stable_across_parses() {
        let a = index();
        let b = index();
        let ids = |i: &LinePositionIndex| {
            i.file_map("src/lib.rs")
                .unwrap()
                .iter()
                .map(|l| l.line_identifier.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn pure_rename_has_no_map() {
        let parsed = parse_unified_diff(
            "diff --git a/x.rs b/y.rs\nsimilarity index 100%\nrename from x.rs\nrename to y.rs\n",
        );
        assert!(parsed.files[0].lines.is_empty());
        let idx = LinePositionIndex::build(&parsed.files);
        assert!(idx.file_map("y.rs").is_none());
    }
}
