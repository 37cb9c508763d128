//! Provider-agnostic data model for parsed diffs.
//!
//! These types are the normalized output of the parser and are consumed
//! read-only by the filter, the chunker and the position mapper.

use serde::{Deserialize, Serialize};

/// How a file changed within the merge request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// Classification of one diff line together with the line numbers that are
/// valid for it. An added line has no old number, a removed line has no new
/// number; there is no way to build anything else.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LineKind {
    Added { new_line: u32 },
    Removed { old_line: u32 },
    Context { old_line: u32, new_line: u32 },
}

impl LineKind {
    /// Line number in the pre-change file, if the line exists there.
    pub fn old_line(&self) -> Option<u32> {
        match *self {
            LineKind::Added { .. } => None,
            LineKind::Removed { old_line } | LineKind::Context { old_line, .. } => Some(old_line),
        }
    }

    /// Line number in the post-change file, if the line exists there.
    pub fn new_line(&self) -> Option<u32> {
        match *self {
            LineKind::Removed { .. } => None,
            LineKind::Added { new_line } | LineKind::Context { new_line, .. } => Some(new_line),
        }
    }

    /// Unified-diff marker for this kind.
    pub fn marker(&self) -> char {
        match self {
            LineKind::Added { .. } => '+',
            LineKind::Removed { .. } => '-',
            LineKind::Context { .. } => ' ',
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, LineKind::Context { .. })
    }
}

/// One physical line inside a hunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffLine {
    /// Index into [`FileChange::hunks`] of the hunk that produced this line.
    pub hunk: usize,
    pub kind: LineKind,
    /// Line text without the leading marker.
    pub content: String,
}

/// Header of a hunk (`@@ -old_start,old_lines +new_start,new_lines @@ section`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    /// Optional text after the closing `@@` (usually the enclosing function).
    pub section: String,
}

impl Hunk {
    /// Renders the header line exactly as git would print it.
    pub fn header(&self) -> String {
        let mut s = format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_lines, self.new_start, self.new_lines
        );
        if !self.section.is_empty() {
            s.push(' ');
            s.push_str(&self.section);
        }
        s
    }
}

/// All hunks for one file within one diff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub old_path: String,
    pub new_path: String,
    pub status: FileStatus,
    pub hunks: Vec<Hunk>,
    /// Flattened lines of all hunks in order; `DiffLine::hunk` links back.
    pub lines: Vec<DiffLine>,
    pub is_binary: bool,
}

impl FileChange {
    /// Number of added plus removed lines.
    pub fn changed_line_count(&self) -> usize {
        self.lines.iter().filter(|l| l.kind.is_change()).count()
    }

    /// Lines produced by hunk `idx`.
    pub fn hunk_lines(&self, idx: usize) -> impl Iterator<Item = &DiffLine> {
        self.lines.iter().filter(move |l| l.hunk == idx)
    }

    /// Unified diff text for this file: a `---`/`+++` header followed by every
    /// hunk. This is what gets sized and shipped to the analysis service.
    pub fn render_diff(&self) -> String {
        let mut out = String::new();
        let old = match self.status {
            FileStatus::Added => "/dev/null".to_string(),
            _ => format!("a/{}", self.old_path),
        };
        let new = match self.status {
            FileStatus::Deleted => "/dev/null".to_string(),
            _ => format!("b/{}", self.new_path),
        };
        out.push_str("--- ");
        out.push_str(&old);
        out.push('\n');
        out.push_str("+++ ");
        out.push_str(&new);
        out.push('\n');

        if self.is_binary {
            out.push_str("Binary files differ\n");
            return out;
        }

        for (idx, h) in self.hunks.iter().enumerate() {
            out.push_str(&h.header());
            out.push('\n');
            for line in self.hunk_lines(idx) {
                out.push(line.kind.marker());
                out.push_str(&line.content);
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_kind_accessors() {
        let a = LineKind::Added { new_line: 3 };
        let r = LineKind::Removed { old_line: 7 };
        let c = LineKind::Context {
            old_line: 4,
            new_line: 5,
        };
        assert_eq!((a.old_line(), a.new_line()), (None, Some(3)));
        assert_eq!((r.old_line(), r.new_line()), (Some(7), None));
        assert_eq!((c.old_line(), c.new_line()), (Some(4), Some(5)));
        assert!(a.is_change() && r.is_change() && !c.is_change());
    }

    #[test]
    fn render_new_file() {
        let fc = FileChange {
            old_path: "a.txt".into(),
            new_path: "a.txt".into(),
            status: FileStatus::Added,
            hunks: vec![Hunk {
                old_start: 0,
                old_lines: 0,
                new_start: 1,
                new_lines: 1,
                section: String::new(),
            }],
            lines: vec![DiffLine {
                hunk: 0,
                kind: LineKind::Added { new_line: 1 },
                content: "hello".into(),
            }],
            is_binary: false,
        };
        assert_eq!(
            fc.render_diff(),
            "--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1,1 @@\n+hello\n"
        );
        assert_eq!(fc.changed_line_count(), 1);
    }

    #[test]
    fn render_keeps_hunks_without_lines() {
        let hunk = |old_start, new_start, n| Hunk {
            old_start,
            old_lines: n,
            new_start,
            new_lines: n,
            section: String::new(),
        };
        let fc = FileChange {
            old_path: "m.rs".into(),
            new_path: "m.rs".into(),
            status: FileStatus::Modified,
            hunks: vec![hunk(5, 5, 0), hunk(9, 9, 1)],
            lines: vec![DiffLine {
                hunk: 1,
                kind: LineKind::Context {
                    old_line: 9,
                    new_line: 9,
                },
                content: "z".into(),
            }],
            is_binary: false,
        };
        assert_eq!(
            fc.render_diff(),
            "--- a/m.rs\n+++ b/m.rs\n@@ -5,0 +5,0 @@\n@@ -9,1 +9,1 @@\n z\n"
        );
    }
}
