//! GitLab publisher.
//!
//! Uses Discussions API for inline comments and MR Notes for general ones.
//!
//! API:
//! - POST /projects/:id/merge_requests/:iid/discussions   (inline)
//! - POST /projects/:id/merge_requests/:iid/notes         (general)
//! - GET  /projects/:id/merge_requests/:iid/discussions   (for idempotency)
//!
//! Position requires `head_sha` + `base_sha` + `start_sha` from MR meta and
//! always carries `line_code`.

use std::{collections::HashSet, sync::Arc, time::Duration};

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::analysis::Suggestion;
use crate::errors::{Error, MrResult};
use crate::git_providers::gitlab::next_page;
use crate::git_providers::{ChangeRequestId, DiffRefs, ProviderConfig};
use crate::publish::placement::Placement;
use crate::publish::{PlacedComment, ProviderIds, PublishConfig, PublishedComment};

lazy_static! {
    /// Hidden marker embedded into comment bodies to detect duplicates.
    /// Example: `<!-- mrai:key=src/app.rs:42;hash=abcdef;ver=1 -->`
    static ref MARKER: Regex =
        Regex::new(r"<!--\s*mrai:key=([^;>]+);hash=([0-9a-f]+);ver=\d+\s*-->").unwrap();
}

/// Publish all placed comments to GitLab.
pub async fn publish_gitlab(
    cfg: &ProviderConfig,
    id: &ChangeRequestId,
    refs: &DiffRefs,
    comments: &[PlacedComment],
    pcfg: &PublishConfig,
) -> MrResult<Vec<PublishedComment>> {
    let http = build_http_client()?;
    let headers = build_gitlab_headers(&cfg.token)?;
    let base = cfg.base_api.trim_end_matches('/').to_string();

    // Dry-run never touches the API, not even for reads.
    let existing = if pcfg.dry_run {
        HashSet::new()
    } else {
        load_existing_markers(&http, &headers, &base, id).await?
    };
    info!("publish: existing markers={}", existing.len());

    let existing = Arc::new(existing);
    let refs = Arc::new(refs.clone());
    let sem = Arc::new(Semaphore::new(pcfg.max_concurrency.max(1)));

    let mut futs = Vec::with_capacity(comments.len());
    for c in comments {
        // make everything owned for 'static future
        let http = http.clone();
        let headers = headers.clone();
        let base = base.clone();
        let id = id.clone();
        let refs = refs.clone();
        let existing = existing.clone();
        let sem = sem.clone();
        let comment = c.clone();
        let dry_run = pcfg.dry_run;

        futs.push(tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| Error::Validation(format!("publish pool closed: {e}")))?;
            let target = Target {
                http: &http,
                headers: &headers,
                base_api: &base,
                id: &id,
            };
            publish_one(&target, &refs, &comment, dry_run, &existing).await
        }));
    }

    let mut out = Vec::with_capacity(comments.len());
    for f in futs {
        out.push(
            f.await
                .map_err(|e| Error::Validation(format!("join error: {e}")))??,
        );
    }
    Ok(out)
}

/// Borrowed HTTP context for one MR.
struct Target<'a> {
    http: &'a reqwest::Client,
    headers: &'a HeaderMap,
    base_api: &'a str,
    id: &'a ChangeRequestId,
}

impl Target<'_> {
    fn url(&self, tail: &str) -> String {
        format!(
            "{}/projects/{}/merge_requests/{}/{}",
            self.base_api,
            urlencoding::encode(&self.id.project),
            self.id.iid,
            tail
        )
    }
}

/// Publish one comment, respecting idempotency and dry-run.
async fn publish_one(
    t: &Target<'_>,
    refs: &DiffRefs,
    c: &PlacedComment,
    dry_run: bool,
    existing: &HashSet<String>,
) -> MrResult<PublishedComment> {
    let text = render_body(&c.suggestion, &c.placement);
    let (marker, key) = make_marker(&marker_key(&c.suggestion), &text);
    let body = format!("{text}\n\n{marker}");

    let skipped = |reason: &str| PublishedComment {
        placement: c.placement.clone(),
        performed: false,
        skipped_reason: Some(reason.to_string()),
        provider_ids: None,
    };

    if existing.contains(&key) {
        debug!("publish: skip duplicate key={}", key);
        return Ok(skipped("duplicate"));
    }

    match &c.placement {
        Placement::Inline { .. } => {
            let req = InlineRequest::new(&body, refs, &c.placement)
                .ok_or_else(|| Error::Validation("inline request without position".into()))?;
            debug!(
                "publish: inline POST path={} line={} dry_run={}",
                req.position.new_path, req.position.new_line, dry_run
            );
            if dry_run {
                return Ok(skipped("dry-run"));
            }
            let discussion_id = post_discussion(t, &req).await?;
            Ok(PublishedComment {
                placement: c.placement.clone(),
                performed: true,
                skipped_reason: None,
                provider_ids: Some(ProviderIds {
                    discussion_id: Some(discussion_id),
                    note_id: None,
                }),
            })
        }
        Placement::General { reason } => {
            debug!("publish: note POST reason={} dry_run={}", reason, dry_run);
            if dry_run {
                return Ok(skipped("dry-run"));
            }
            let note_id = post_note(t, &body).await?;
            Ok(PublishedComment {
                placement: c.placement.clone(),
                performed: true,
                skipped_reason: None,
                provider_ids: Some(ProviderIds {
                    discussion_id: None,
                    note_id: Some(note_id),
                }),
            })
        }
    }
}

/// GitLab "text" position.
#[derive(Debug, Serialize)]
struct Position<'a> {
    position_type: &'a str,
    base_sha: &'a str,
    start_sha: &'a str,
    head_sha: &'a str,
    old_path: &'a str,
    new_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    old_line: Option<u32>,
    new_line: u32,
    line_code: &'a str,
}

#[derive(Debug, Serialize)]
struct InlineRequest<'a> {
    body: &'a str,
    position: Position<'a>,
}

impl<'a> InlineRequest<'a> {
    fn new(body: &'a str, refs: &'a DiffRefs, p: &'a Placement) -> Option<Self> {
        let Placement::Inline {
            new_path,
            old_path,
            new_line,
            old_line,
            line_code,
            ..
        } = p
        else {
            return None;
        };
        Some(Self {
            body,
            position: Position {
                position_type: "text",
                base_sha: &refs.base_sha,
                // GitLab accepts base_sha when start_sha is unknown.
                start_sha: refs.start_sha.as_deref().unwrap_or(&refs.base_sha),
                head_sha: &refs.head_sha,
                old_path,
                new_path,
                old_line: *old_line,
                new_line: *new_line,
                line_code,
            },
        })
    }
}

async fn post_discussion(t: &Target<'_>, req: &InlineRequest<'_>) -> MrResult<String> {
    let resp = t
        .http
        .post(t.url("discussions"))
        .headers(t.headers.clone())
        .json(req)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(Error::Validation(format!(
            "gitlab inline post failed: status={} body={:?}",
            resp.status(),
            resp.text().await.ok()
        )));
    }

    #[derive(serde::Deserialize)]
    struct DiscussionResp {
        id: String,
    }
    let disc: DiscussionResp = resp.json().await?;
    Ok(disc.id)
}

async fn post_note(t: &Target<'_>, body: &str) -> MrResult<u64> {
    #[derive(Serialize)]
    struct Req<'a> {
        body: &'a str,
    }

    let resp = t
        .http
        .post(t.url("notes"))
        .headers(t.headers.clone())
        .json(&Req { body })
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(Error::Validation(format!(
            "gitlab note post failed: status={} body={:?}",
            resp.status(),
            resp.text().await.ok()
        )));
    }

    #[derive(serde::Deserialize)]
    struct NoteResp {
        id: u64,
    }
    let nr: NoteResp = resp.json().await?;
    Ok(nr.id)
}

/// Load existing discussion bodies and extract mrai markers for idempotency.
async fn load_existing_markers(
    http: &reqwest::Client,
    headers: &HeaderMap,
    base_api: &str,
    id: &ChangeRequestId,
) -> MrResult<HashSet<String>> {
    // Notes also come back as discussions of type "Individual note".
    let t = Target {
        http,
        headers,
        base_api,
        id,
    };

    #[derive(serde::Deserialize)]
    struct Note {
        body: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct Discussion {
        notes: Vec<Note>,
    }

    let mut set = HashSet::new();
    let mut page = 1u32;
    loop {
        let resp = http
            .get(t.url(&format!("discussions?per_page=100&page={}", page)))
            .headers(headers.clone())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Validation(format!(
                "gitlab list discussions failed: status={} body={:?}",
                resp.status(),
                resp.text().await.ok()
            )));
        }

        let next = next_page(resp.headers());
        let discussions: Vec<Discussion> = resp.json().await?;
        set.extend(
            discussions
                .iter()
                .flat_map(|d| d.notes.iter())
                .filter_map(|n| n.body.as_deref())
                .filter_map(parse_marker),
        );
        match next {
            Some(n) if n > page => page = n,
            _ => break,
        }
    }
    debug!("gitlab: existing markers={} pages={}", set.len(), page);
    Ok(set)
}

/// Markdown body shown to reviewers. General notes name the location
/// because they are not attached to a line.
fn render_body(s: &Suggestion, p: &Placement) -> String {
    match p {
        Placement::Inline {
            snapped_from: Some(orig),
            ..
        } => format!(
            "**{}** (line {})\n\n{}",
            s.severity, orig, s.message
        ),
        Placement::Inline { .. } => format!("**{}**\n\n{}", s.severity, s.message),
        Placement::General { .. } => format!(
            "**{}** `{}:{}`\n\n{}",
            s.severity, s.file_path, s.line_number, s.message
        ),
    }
}

/// Idempotency key: requested location, stable across re-runs.
fn marker_key(s: &Suggestion) -> String {
    format!("{}:{}", s.file_path, s.line_number).replace([';', '>'], "_")
}

/// Returns `(marker, key#hash)`; the hash is sha256 of `body`.
fn make_marker(key: &str, body: &str) -> (String, String) {
    let hash = format!("{:x}", Sha256::digest(body.as_bytes()));
    let marker = format!("<!-- mrai:key={key};hash={hash};ver=1 -->");
    (marker, format!("{key}#{hash}"))
}

/// Extracts `key#hash` from a comment body, if it carries our marker.
fn parse_marker(body: &str) -> Option<String> {
    let caps = MARKER.captures(body)?;
    Some(format!("{}#{}", caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

fn build_http_client() -> MrResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(8)
        .build()?;
    Ok(client)
}

fn build_gitlab_headers(token: &str) -> MrResult<HeaderMap> {
    let mut h = HeaderMap::new();
    h.insert(USER_AGENT, HeaderValue::from_static("mr-reviewer/1.0"));
    h.insert(ACCEPT, HeaderValue::from_static("application/json"));
    h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    h.insert(
        "PRIVATE-TOKEN",
        HeaderValue::from_str(token).map_err(|e| Error::Validation(format!("bad token: {e}")))?,
    );
    Ok(h)
}
