//! Unified-diff parser.
//!
//! Features:
//! - Multi-file input split on `diff --git` or on a `---`/`+++` header pair.
//! - Hunks-only input (provider payloads that carry paths out of band).
//! - Extended git headers (`new file mode`, `deleted file mode`, `rename from/to`).
//! - Ignores `\ No newline at end of file` marker lines.
//! - Binary patch heuristics (`GIT binary patch`, `Binary files ... differ`).
//!
//! Hunk header counters decide where a hunk ends, so a removed line whose
//! text starts with `-- ` is never mistaken for a file header, and trailing
//! noise after the last hunk (e.g. a `format-patch` signature) is skipped.
//!
//! A malformed hunk header spoils only its own file: that file is emitted
//! with no lines, a [`ParseWarning`] is recorded and parsing resumes at the
//! next file header.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::ParseError;
use crate::types::{DiffLine, FileChange, FileStatus, Hunk, LineKind};

lazy_static! {
    static ref HUNK_HEADER: Regex =
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@ ?(.*)$").unwrap();
}

/// A recoverable problem found while parsing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    /// Best known path of the affected file.
    pub path: String,
    #[serde(serialize_with = "display")]
    pub error: ParseError,
}

fn display<S: serde::Serializer>(e: &ParseError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

/// Parse result: files in input order plus warnings for degraded files.
#[derive(Debug, Clone, Default)]
pub struct ParsedDiff {
    pub files: Vec<FileChange>,
    pub warnings: Vec<ParseWarning>,
}

/// One file as delivered by a provider API: paths and flags come as fields,
/// `diff` holds only the hunks.
#[derive(Debug, Clone, Copy)]
pub struct RawFileDiff<'a> {
    pub old_path: &'a str,
    pub new_path: &'a str,
    pub new_file: bool,
    pub deleted_file: bool,
    pub renamed_file: bool,
    /// Provider says the content is binary or too large to show.
    pub binary_hint: bool,
    pub diff: Option<&'a str>,
}

/// Parses a whole unified diff (one or more files).
pub fn parse_unified_diff(input: &str) -> ParsedDiff {
    let mut p = Parser::new(false);
    for line in input.lines() {
        p.feed(line);
    }
    let out = p.finish();
    debug!(
        "parser: files={} warnings={}",
        out.files.len(),
        out.warnings.len()
    );
    out
}

/// Parses a single provider-supplied file diff.
pub fn parse_file_diff(raw: RawFileDiff<'_>) -> (FileChange, Vec<ParseWarning>) {
    let status_hint = if raw.new_file {
        Some(FileStatus::Added)
    } else if raw.deleted_file {
        Some(FileStatus::Deleted)
    } else if raw.renamed_file {
        Some(FileStatus::Renamed)
    } else {
        None
    };

    let body = raw.diff.unwrap_or_default();
    let fb = FileBuilder {
        old_path: non_empty(raw.old_path),
        new_path: non_empty(raw.new_path),
        status_hint,
        is_binary: raw.binary_hint || raw.diff.is_none() || looks_like_binary_patch(body),
        ..FileBuilder::default()
    };

    let mut p = Parser::new(true);
    p.cur = Some(fb);
    if !p.cur.as_ref().is_some_and(|f| f.is_binary) {
        for line in body.lines() {
            p.feed(line);
        }
    }
    let mut out = p.finish();
    let file = out.files.pop().unwrap_or_else(|| FileBuilder::default().build());
    (file, out.warnings)
}

/// Simple heuristic to detect binary patches or messages in unified diff.
pub fn looks_like_binary_patch(s: &str) -> bool {
    s.contains("GIT binary patch")
        || s.lines().any(is_binary_marker)
        || s.bytes().any(|b| b == 0)
}

fn is_binary_marker(line: &str) -> bool {
    (line.starts_with("Binary files ") || line.starts_with("Files ")) && line.ends_with(" differ")
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Remaining line budget of the hunk being read plus the running cursors.
#[derive(Debug, Clone, Copy)]
struct HunkCursor {
    index: usize,
    old: u32,
    new: u32,
    old_left: u32,
    new_left: u32,
    expected_old: u32,
    expected_new: u32,
    /// Change lines seen after the counts ran out.
    extra: u32,
}

impl HunkCursor {
    fn has_room(&self) -> bool {
        self.old_left > 0 || self.new_left > 0
    }
}

#[derive(Debug, Default)]
struct FileBuilder {
    old_path: Option<String>,
    new_path: Option<String>,
    old_is_null: bool,
    new_is_null: bool,
    status_hint: Option<FileStatus>,
    /// Opened by a `diff --git` line.
    git_header: bool,
    saw_file_header: bool,
    hunks: Vec<Hunk>,
    lines: Vec<DiffLine>,
    is_binary: bool,
    broken: bool,
    cursor: Option<HunkCursor>,
}

impl FileBuilder {
    fn expects_content(&self) -> bool {
        !self.broken && self.cursor.is_some_and(|c| c.has_room())
    }

    /// A git header was seen and nothing has filled it yet.
    fn awaits_body(&self) -> bool {
        self.git_header && self.hunks.is_empty() && !self.is_binary && !self.broken
    }

    /// Counts a `+`/`-`/` ` line arriving after the hunk is full.
    /// Returns false when `line` is not diff content.
    fn note_overflow(&mut self, line: &str) -> bool {
        if self.broken || !is_change_line(line) {
            return false;
        }
        match self.cursor.as_mut() {
            Some(c) => {
                c.extra = c.extra.saturating_add(1);
                true
            }
            None => false,
        }
    }

    fn display_path(&self) -> String {
        self.new_path
            .clone()
            .or_else(|| self.old_path.clone())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    fn push_content(&mut self, line: &str) {
        let Some(c) = self.cursor.as_mut() else {
            return;
        };
        let (kind, content) = if let Some(rest) = line.strip_prefix('+') {
            let k = LineKind::Added { new_line: c.new };
            c.new = c.new.saturating_add(1);
            c.new_left = c.new_left.saturating_sub(1);
            (k, rest)
        } else if let Some(rest) = line.strip_prefix('-') {
            let k = LineKind::Removed { old_line: c.old };
            c.old = c.old.saturating_add(1);
            c.old_left = c.old_left.saturating_sub(1);
            (k, rest)
        } else {
            // Leading space, or a bare line whose space was stripped by a tool.
            let rest = line.strip_prefix(' ').unwrap_or(line);
            let k = LineKind::Context {
                old_line: c.old,
                new_line: c.new,
            };
            c.old = c.old.saturating_add(1);
            c.new = c.new.saturating_add(1);
            c.old_left = c.old_left.saturating_sub(1);
            c.new_left = c.new_left.saturating_sub(1);
            (k, rest)
        };
        self.lines.push(DiffLine {
            hunk: c.index,
            kind,
            content: content.to_string(),
        });
    }

    /// Closes the current hunk; reports it when fewer or more lines arrived
    /// than announced.
    fn close_hunk(&mut self) -> Option<ParseError> {
        let c = self.cursor.take()?;
        if c.has_room() {
            return Some(ParseError::TruncatedHunk {
                expected_old: c.expected_old,
                expected_new: c.expected_new,
                got_old: c.expected_old - c.old_left,
                got_new: c.expected_new - c.new_left,
            });
        }
        if c.extra > 0 {
            return Some(ParseError::HunkOverflow {
                expected_old: c.expected_old,
                expected_new: c.expected_new,
                extra: c.extra,
            });
        }
        None
    }

    fn start_hunk(&mut self, header: Hunk) {
        let index = self.hunks.len();
        self.cursor = Some(HunkCursor {
            index,
            old: header.old_start,
            new: header.new_start,
            old_left: header.old_lines,
            new_left: header.new_lines,
            expected_old: header.old_lines,
            expected_new: header.new_lines,
            extra: 0,
        });
        self.hunks.push(header);
    }

    fn mark_broken(&mut self) {
        self.broken = true;
        self.cursor = None;
        self.hunks.clear();
        self.lines.clear();
    }

    fn build(self) -> FileChange {
        let status = if self.status_hint == Some(FileStatus::Added) || self.old_is_null {
            FileStatus::Added
        } else if self.status_hint == Some(FileStatus::Deleted) || self.new_is_null {
            FileStatus::Deleted
        } else if self.status_hint == Some(FileStatus::Renamed)
            || matches!((&self.old_path, &self.new_path), (Some(o), Some(n)) if o != n)
        {
            FileStatus::Renamed
        } else {
            FileStatus::Modified
        };

        let new_path = self
            .new_path
            .clone()
            .or_else(|| self.old_path.clone())
            .unwrap_or_default();
        let old_path = self.old_path.unwrap_or_else(|| new_path.clone());

        let (hunks, lines) = if self.is_binary || self.broken {
            (Vec::new(), Vec::new())
        } else {
            (self.hunks, self.lines)
        };

        FileChange {
            old_path,
            new_path,
            status,
            hunks,
            lines,
            is_binary: self.is_binary && !self.broken,
        }
    }
}

struct Parser {
    single_file: bool,
    files: Vec<FileChange>,
    warnings: Vec<ParseWarning>,
    cur: Option<FileBuilder>,
    /// `---` line waiting for its `+++` partner.
    pending_old: Option<String>,
}

impl Parser {
    fn new(single_file: bool) -> Self {
        Self {
            single_file,
            files: Vec::new(),
            warnings: Vec::new(),
            cur: None,
            pending_old: None,
        }
    }

    fn warn(&mut self, path: String, error: ParseError) {
        warn!("parser: {} in {}", error, path);
        self.warnings.push(ParseWarning { path, error });
    }

    fn flush_file(&mut self) {
        if let Some(mut fb) = self.cur.take() {
            if let Some(e) = fb.close_hunk() {
                self.warn(fb.display_path(), e);
            }
            self.files.push(fb.build());
        }
    }

    fn feed(&mut self, line: &str) {
        // A dangling `---` only counts as a header if `+++` follows right away.
        if let Some(old) = self.pending_old.take() {
            if let Some(new) = line.strip_prefix("+++ ") {
                self.begin_from_header_pair(&old, new);
                return;
            }
        }

        let header_like = line.starts_with("@@") || line.starts_with("diff --git ");
        if let Some(fb) = self.cur.as_mut() {
            if fb.expects_content() && !header_like {
                if !line.starts_with('\\') {
                    fb.push_content(line);
                }
                return;
            }
            if !header_like && fb.note_overflow(line) {
                return;
            }
        }

        if line.starts_with("@@") {
            self.on_hunk_header(line);
            return;
        }
        if line.starts_with('\\') {
            return;
        }

        if !self.single_file {
            if let Some(rest) = line.strip_prefix("diff --git ") {
                self.flush_file();
                let (old_path, new_path) = split_git_header(rest);
                self.cur = Some(FileBuilder {
                    old_path,
                    new_path,
                    git_header: true,
                    ..FileBuilder::default()
                });
                return;
            }
            // `diff -r` prints bare markers; they belong to their own file
            // unless a git header just opened one.
            if is_binary_marker(line) && !self.cur.as_ref().is_some_and(FileBuilder::awaits_body) {
                self.flush_file();
                self.cur = Some(binary_file_from_marker(line));
                return;
            }
            if let Some(old) = line.strip_prefix("--- ") {
                self.pending_old = Some(old.to_string());
                return;
            }
        }

        let Some(fb) = self.cur.as_mut() else {
            return;
        };
        if line.starts_with("new file mode") {
            fb.status_hint = Some(FileStatus::Added);
        } else if line.starts_with("deleted file mode") {
            fb.status_hint = Some(FileStatus::Deleted);
        } else if let Some(p) = line.strip_prefix("rename from ") {
            fb.old_path = non_empty(p);
            fb.status_hint.get_or_insert(FileStatus::Renamed);
        } else if let Some(p) = line.strip_prefix("rename to ") {
            fb.new_path = non_empty(p);
            fb.status_hint.get_or_insert(FileStatus::Renamed);
        } else if line.contains("GIT binary patch") || is_binary_marker(line) {
            fb.is_binary = true;
        }
        // Anything else (index, mode, similarity, trailers) carries no data we need.
    }

    fn begin_from_header_pair(&mut self, old: &str, new: &str) {
        let (old_path, old_null) = clean_path(old);
        let (new_path, new_null) = clean_path(new);

        // A git header already opened this file unless it has moved on to hunks.
        let reuse = self
            .cur
            .as_ref()
            .is_some_and(|fb| !fb.saw_file_header && fb.hunks.is_empty() && !fb.broken);
        if !reuse {
            self.flush_file();
            self.cur = Some(FileBuilder::default());
        }
        if let Some(fb) = self.cur.as_mut() {
            fb.saw_file_header = true;
            fb.old_is_null = old_null;
            fb.new_is_null = new_null;
            if old_path.is_some() {
                fb.old_path = old_path;
            }
            if new_path.is_some() {
                fb.new_path = new_path;
            }
        }
    }

    fn on_hunk_header(&mut self, line: &str) {
        if self.cur.is_none() {
            // Hunks-only input without any file header.
            self.cur = Some(FileBuilder::default());
        }
        let Some(fb) = self.cur.as_mut() else {
            return;
        };
        if fb.broken || fb.is_binary {
            return;
        }

        let truncated = fb.close_hunk();
        let path = fb.display_path();
        if let Some(e) = truncated {
            self.warn(path.clone(), e);
        }

        match parse_hunk_header(line) {
            Ok(h) => {
                if let Some(fb) = self.cur.as_mut() {
                    fb.start_hunk(h);
                }
            }
            Err(e) => {
                if let Some(fb) = self.cur.as_mut() {
                    fb.mark_broken();
                }
                self.warn(path, e);
            }
        }
    }

    fn finish(mut self) -> ParsedDiff {
        if let Some(old) = self.pending_old.take() {
            // Lone `---` at EOF: treat as noise, nothing to attach it to.
            debug!("parser: dangling old header ignored: {}", old);
        }
        self.flush_file();
        ParsedDiff {
            files: self.files,
            warnings: self.warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Header helpers
// ---------------------------------------------------------------------------

/// Parses `@@ -a[,b] +c[,d] @@ [section]`. Omitted counts mean 1.
pub fn parse_hunk_header(line: &str) -> Result<Hunk, ParseError> {
    let caps = HUNK_HEADER
        .captures(line)
        .ok_or_else(|| ParseError::InvalidHunkHeader(line.to_string()))?;

    let num = |i: usize, default: u32| -> Result<u32, ParseError> {
        match caps.get(i) {
            Some(m) => m.as_str().parse::<u32>().map_err(|_| ParseError::Overflow),
            None => Ok(default),
        }
    };

    let old_start = num(1, 0)?;
    let old_lines = num(2, 1)?;
    let new_start = num(3, 0)?;
    let new_lines = num(4, 1)?;
    old_start.checked_add(old_lines).ok_or(ParseError::Overflow)?;
    new_start.checked_add(new_lines).ok_or(ParseError::Overflow)?;

    Ok(Hunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        section: caps
            .get(5)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    })
}

/// Hunk content after the counts ran out. `--- `/`+++ ` open the next file
/// and `-- ` is a `format-patch` signature, so neither counts.
fn is_change_line(line: &str) -> bool {
    if line.starts_with("--- ") || line.starts_with("+++ ") || line == "--" || line == "-- " {
        return false;
    }
    matches!(line.as_bytes().first(), Some(b'+' | b'-' | b' '))
}

/// Builds a binary file from `Binary files <old> and <new> differ`.
fn binary_file_from_marker(line: &str) -> FileBuilder {
    let body = line
        .strip_prefix("Binary files ")
        .or_else(|| line.strip_prefix("Files "))
        .unwrap_or(line);
    let body = body.strip_suffix(" differ").unwrap_or(body);
    let split = body
        .rfind(" and b/")
        .or_else(|| body.rfind(" and \"b/"))
        .or_else(|| body.find(" and "));
    let (old, new) = match split {
        Some(i) => (&body[..i], &body[i + " and ".len()..]),
        None => (body, body),
    };
    let (old_path, old_is_null) = clean_path(old);
    let (new_path, new_is_null) = clean_path(new);
    FileBuilder {
        old_path,
        new_path,
        old_is_null,
        new_is_null,
        is_binary: true,
        ..FileBuilder::default()
    }
}

/// Splits `a/<old> b/<new>` (optionally quoted) from a `diff --git` line.
fn split_git_header(rest: &str) -> (Option<String>, Option<String>) {
    let rest = rest.trim();
    let idx = rest.rfind(" \"b/").or_else(|| rest.rfind(" b/"));
    match idx {
        Some(i) => (
            clean_path(&rest[..i]).0,
            clean_path(&rest[i + 1..]).0,
        ),
        None => (None, None),
    }
}

/// Normalizes a header path: drops a trailing tab timestamp, quotes and the
/// `a/`/`b/` prefix. Returns `(path, is_dev_null)`.
fn clean_path(raw: &str) -> (Option<String>, bool) {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    let raw = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw);
    if raw == "/dev/null" {
        return (None, true);
    }
    let p = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    (non_empty(p), false)
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}
