//! GitLab provider (REST v4) for MR metadata and diffs.
//!
//! Endpoints used:
//! - GET /projects/:id/merge_requests/:iid
//! - GET /projects/:id/merge_requests/:iid/diffs      (per-file hunks)
//! - GET /projects/:id/merge_requests/:iid/raw_diffs  (whole unified text)

use chrono::{DateTime, Utc};
use diff_analysis::parser::{self, ParsedDiff, RawFileDiff};
use reqwest::{Client, header::HeaderMap};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::MrResult;
use crate::git_providers::types::*;

#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: Client,
    base_api: String, // e.g. "https://gitlab.com/api/v4"
    token: String,    // "PRIVATE-TOKEN"
}

impl GitLabClient {
    pub fn new(http: Client, base_api: String, token: String) -> Self {
        Self {
            http,
            base_api: base_api.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn mr_url(&self, id: &ChangeRequestId, tail: &str) -> String {
        format!(
            "{}/projects/{}/merge_requests/{}{}",
            self.base_api,
            urlencoding::encode(&id.project),
            id.iid,
            tail
        )
    }

    /// Fetches MR metadata. Includes `diff_refs` with head/base/start SHAs.
    pub async fn get_meta(&self, id: &ChangeRequestId) -> MrResult<ChangeRequest> {
        let resp: GitLabMr = self
            .http
            .get(self.mr_url(id, ""))
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // GitLab leaves diff_refs null while the MR is still being prepared.
        let diff_refs = resp
            .diff_refs
            .map(|r| DiffRefs {
                base_sha: r.base_sha,
                start_sha: Some(r.start_sha),
                head_sha: r.head_sha,
            })
            .unwrap_or_else(|| {
                warn!("gitlab: MR {} has no diff_refs yet", id.iid);
                DiffRefs {
                    head_sha: resp.sha.clone().unwrap_or_default(),
                    ..DiffRefs::default()
                }
            });

        Ok(ChangeRequest {
            provider: ProviderKind::GitLab,
            id: id.clone(),
            title: resp.title,
            description: resp.description,
            author: AuthorInfo {
                id: resp.author.id.to_string(),
                username: Some(resp.author.username),
                name: Some(resp.author.name),
            },
            state: resp.state,
            web_url: resp.web_url,
            created_at: resp.created_at,
            updated_at: resp.updated_at,
            source_branch: Some(resp.source_branch),
            target_branch: Some(resp.target_branch),
            diff_refs,
        })
    }

    /// Fetches file-level diffs and parses each into a `FileChange`.
    ///
    /// Files GitLab marks as too large or without a diff are kept as binary
    /// so they show up in reports but never get mapped.
    pub async fn get_changes(&self, id: &ChangeRequestId) -> MrResult<ChangeSet> {
        let mut files: Vec<GitLabMrDiffFile> = Vec::new();
        let mut page = 1u32;
        loop {
            let resp = self
                .http
                .get(self.mr_url(id, &format!("/diffs?per_page=100&page={}", page)))
                .header("PRIVATE-TOKEN", &self.token)
                .send()
                .await?
                .error_for_status()?;
            let next = next_page(resp.headers());
            let batch: Vec<GitLabMrDiffFile> = resp.json().await?;
            debug!("gitlab: diffs page={} files={}", page, batch.len());
            files.extend(batch);
            match next {
                Some(n) if n > page => page = n,
                _ => break,
            }
        }

        let set = changeset_from_files(&files);
        debug!(
            "gitlab: diffs files={} warnings={} truncated={}",
            set.diff.files.len(),
            set.diff.warnings.len(),
            set.is_truncated
        );
        Ok(set)
    }

    /// Fetches the whole MR as unified text (`git diff` format).
    pub async fn get_raw_diff(&self, id: &ChangeRequestId) -> MrResult<String> {
        let raw = self
            .http
            .get(self.mr_url(id, "/raw_diffs"))
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(raw)
    }

    /// Same as [`get_raw_diff`](Self::get_raw_diff) but parsed.
    pub async fn get_raw_changes(&self, id: &ChangeRequestId) -> MrResult<ChangeSet> {
        let raw = self.get_raw_diff(id).await?;
        Ok(ChangeSet {
            diff: parser::parse_unified_diff(&raw),
            is_truncated: false,
        })
    }
}

/// Page number from GitLab's `X-Next-Page` header; empty on the last page.
pub(crate) fn next_page(headers: &HeaderMap) -> Option<u32> {
    headers
        .get("x-next-page")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn changeset_from_files(files: &[GitLabMrDiffFile]) -> ChangeSet {
    let mut diff = ParsedDiff::default();
    for f in files {
        let too_large = f.too_large.unwrap_or(false);
        let (fc, warnings) = parser::parse_file_diff(RawFileDiff {
            old_path: &f.old_path,
            new_path: &f.new_path,
            new_file: f.new_file,
            deleted_file: f.deleted_file,
            renamed_file: f.renamed_file,
            binary_hint: too_large,
            diff: f.diff.as_deref(),
        });
        diff.files.push(fc);
        diff.warnings.extend(warnings);
    }

    let is_truncated = files.iter().any(|f| f.too_large.unwrap_or(false));
    ChangeSet { diff, is_truncated }
}

// --- GitLab response shapes (subset of fields we actually use) ---

#[derive(Debug, Deserialize)]
struct GitLabMr {
    title: String,
    description: Option<String>,
    web_url: String,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    diff_refs: Option<GitLabDiffRefs>,
    author: GitLabUser,
}

#[derive(Debug, Deserialize)]
struct GitLabDiffRefs {
    base_sha: String,
    head_sha: String,
    start_sha: String,
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    id: u64,
    username: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitLabMrDiffFile {
    old_path: String,
    new_path: String,
    new_file: bool,
    renamed_file: bool,
    deleted_file: bool,
    #[serde(default)]
    too_large: Option<bool>,
    #[serde(default)]
    diff: Option<String>, // hunks only; None for binary/too large
}

#[cfg(test)]
mod tests {
    use super::*;
    use diff_analysis::FileStatus;

    const DIFFS_JSON: &str = r#"[
      {
        "old_path": "src/lib.rs", "new_path": "src/lib.rs",
        "new_file": false, "renamed_file": false, "deleted_file": false,
        "diff": "@@ -1,2 +1,3 @@\n use a;\n+use b;\n fn f() {}\n"
      },
      {
        "old_path": "src/old.rs", "new_path": "src/new.rs",
        "new_file": false, "renamed_file": true, "deleted_file": false,
        "diff": ""
      },
      {
        "old_path": "assets/big.json", "new_path": "assets/big.json",
        "new_file": true, "renamed_file": false, "deleted_file": false,
        "too_large": true, "diff": null
      }
    ]"#;

    #[test]
    fn diffs_payload_becomes_changeset() {
        let files: Vec<GitLabMrDiffFile> = serde_json::from_str(DIFFS_JSON).unwrap();
        let set = changeset_from_files(&files);

        assert!(set.is_truncated);
        assert_eq!(set.diff.files.len(), 3);

        let lib = &set.diff.files[0];
        assert_eq!(lib.status, FileStatus::Modified);
        assert_eq!(lib.lines.len(), 3);
        assert_eq!(lib.lines[1].kind.new_line(), Some(2));

        let renamed = &set.diff.files[1];
        assert_eq!(renamed.status, FileStatus::Renamed);
        assert_eq!(renamed.old_path, "src/old.rs");
        assert!(renamed.lines.is_empty());

        let big = &set.diff.files[2];
        assert!(big.is_binary);
        assert!(big.lines.is_empty());
    }

    #[test]
    fn mr_payload_without_diff_refs_decodes() {
        let json = r#"{
          "title": "t", "description": null, "web_url": "https://x/mr/1",
          "state": "opened",
          "created_at": "2025-01-01T00:00:00Z", "updated_at": "2025-01-02T00:00:00Z",
          "source_branch": "feat", "target_branch": "main",
          "sha": "abc", "diff_refs": null,
          "author": { "id": 7, "username": "dev", "name": "Dev" }
        }"#;
        let mr: GitLabMr = serde_json::from_str(json).unwrap();
        assert!(mr.diff_refs.is_none());
        assert_eq!(mr.sha.as_deref(), Some("abc"));
    }

    #[test]
    fn next_page_follows_header_and_stops_when_empty() {
        use reqwest::header::HeaderValue;

        let mut headers = HeaderMap::new();
        assert_eq!(next_page(&headers), None);
        headers.insert("x-next-page", HeaderValue::from_static("3"));
        assert_eq!(next_page(&headers), Some(3));
        headers.insert("x-next-page", HeaderValue::from_static(""));
        assert_eq!(next_page(&headers), None);
    }
}
