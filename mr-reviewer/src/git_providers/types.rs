//! Provider-agnostic data model for merge requests and their diffs.
//!
//! File-level changes reuse `diff_analysis` types so that what we fetch is
//! exactly what gets filtered, chunked and mapped.

use chrono::{DateTime, Utc};
use diff_analysis::parser::ParsedDiff;
use serde::{Deserialize, Serialize};

/// Supported providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderKind {
    GitLab,
}

/// A unique reference to a merge request inside a provider.
///
/// * `project` – numeric ID or "group/project".
/// * `iid`     – MR IID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeRequestId {
    pub project: String,
    pub iid: u64,
}

/// Triple of SHAs used to bind inline comments reliably.
///
/// Passed through opaquely to the publisher.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffRefs {
    pub base_sha: String,
    pub start_sha: Option<String>,
    pub head_sha: String,
}

/// Minimal info about the human who opened the MR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub id: String,
    pub username: Option<String>,
    pub name: Option<String>,
}

/// High-level metadata for a merge request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub provider: ProviderKind,
    pub id: ChangeRequestId,
    pub title: String,
    pub description: Option<String>,
    pub author: AuthorInfo,
    pub state: String,
    pub web_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub diff_refs: DiffRefs,
}

/// Parsed changes of one MR.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub diff: ParsedDiff,
    /// Provider reported that some diffs were cut (size limits).
    pub is_truncated: bool,
}
