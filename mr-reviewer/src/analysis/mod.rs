//! Analysis service client: ships chunks, collects suggestions.
//!
//! Each chunk is one POST. Chunks run on a bounded pool (`Semaphore` +
//! `tokio::spawn`), results come back in chunk order, and one failing chunk
//! never aborts the others.

use std::{future::Future, sync::Arc, time::Duration, time::Instant};

use diff_analysis::{AnalysisChunk, FileStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::errors::{ConfigError, Error, MrResult};

/// Where and how hard to call the analysis service.
#[derive(Debug, Clone)]
pub struct AnalysisServiceConfig {
    pub url: String,
    /// Parallel in-flight chunks.
    pub max_concurrency: usize,
    pub timeout_secs: u64,
}

impl AnalysisServiceConfig {
    /// `ANALYSIS_URL` (required), `ANALYSIS_CONCURRENCY` (4), `ANALYSIS_TIMEOUT_SECS` (120).
    pub fn from_env() -> MrResult<Self> {
        let url = std::env::var("ANALYSIS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingAnalysisUrl)?;
        Ok(Self {
            url,
            max_concurrency: env_parse("ANALYSIS_CONCURRENCY", 4)?,
            timeout_secs: env_parse("ANALYSIS_TIMEOUT_SECS", 120)?,
        })
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> MrResult<T> {
    parse_setting(key, std::env::var(key).ok(), default)
}

/// Parses a raw setting value; absent or blank falls back to `default`.
pub(crate) fn parse_setting<T: std::str::FromStr>(
    key: &str,
    raw: Option<String>,
    default: T,
) -> MrResult<T> {
    match raw {
        Some(v) if !v.trim().is_empty() => v.trim().parse().map_err(|_| {
            ConfigError::InvalidEnv {
                key: key.to_string(),
                value: v.clone(),
            }
            .into()
        }),
        _ => Ok(default),
    }
}

/// One finding returned by the analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub file_path: String,
    /// New-file line the finding refers to.
    pub line_number: u32,
    pub message: String,
    #[serde(default = "default_severity")]
    pub severity: String,
}

fn default_severity() -> String {
    "info".to_string()
}

/// Wire shape of one chunk.
#[derive(Debug, Serialize)]
pub struct ChunkRequest<'a> {
    pub chunk_index: usize,
    pub files: Vec<ChunkFile<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ChunkFile<'a> {
    pub path: &'a str,
    pub old_path: &'a str,
    pub status: FileStatus,
    /// Rendered unified diff of the file.
    pub diff: String,
}

impl<'a> ChunkRequest<'a> {
    pub fn from_chunk(chunk: &'a AnalysisChunk) -> Self {
        Self {
            chunk_index: chunk.index,
            files: chunk
                .files
                .iter()
                .map(|f| ChunkFile {
                    path: &f.new_path,
                    old_path: &f.old_path,
                    status: f.status,
                    diff: f.render_diff(),
                })
                .collect(),
        }
    }
}

/// Per-chunk outcome; failures stay local to their chunk.
#[derive(Debug)]
pub struct ChunkReport {
    pub index: usize,
    pub result: MrResult<Vec<Suggestion>>,
}

impl ChunkReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// HTTP client for the analysis service.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    http: reqwest::Client,
    url: String,
    max_concurrency: usize,
}

impl AnalysisClient {
    pub fn new(cfg: &AnalysisServiceConfig) -> MrResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .user_agent("mr-reviewer/0.1")
            .build()?;
        Ok(Self {
            http,
            url: cfg.url.clone(),
            max_concurrency: cfg.max_concurrency.max(1),
        })
    }

    /// Sends one chunk and decodes the JSON array of suggestions.
    pub async fn analyze(&self, chunk: &AnalysisChunk) -> MrResult<Vec<Suggestion>> {
        let req = ChunkRequest::from_chunk(chunk);
        let resp = self.http.post(&self.url).json(&req).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Service(format!(
                "chunk {} failed: status={} body={:?}",
                chunk.index,
                resp.status(),
                resp.text().await.ok()
            )));
        }
        let out: Vec<Suggestion> = resp.json().await?;
        debug!("analysis: chunk={} suggestions={}", chunk.index, out.len());
        Ok(out)
    }

    /// Analyzes every chunk on the configured pool.
    pub async fn analyze_all(&self, chunks: &[AnalysisChunk]) -> Vec<ChunkReport> {
        let client = self.clone();
        dispatch_chunks(chunks, self.max_concurrency, move |chunk| {
            let client = client.clone();
            async move { client.analyze(&chunk).await }
        })
        .await
    }
}

/// Runs `call` for every chunk with at most `max_concurrency` in flight.
///
/// Reports are returned in chunk order regardless of completion order.
pub async fn dispatch_chunks<F, Fut>(
    chunks: &[AnalysisChunk],
    max_concurrency: usize,
    call: F,
) -> Vec<ChunkReport>
where
    F: Fn(AnalysisChunk) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = MrResult<Vec<Suggestion>>> + Send + 'static,
{
    let t0 = Instant::now();
    let sem = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let mut handles = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let sem = sem.clone();
        let call = call.clone();
        let chunk = chunk.clone();
        let index = chunk.index;
        let handle = tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| Error::Service(format!("pool closed: {e}")))?;
            call(chunk).await
        });
        handles.push((index, handle));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for (index, handle) in handles {
        let result = match handle.await {
            Ok(r) => r,
            Err(e) => Err(Error::Service(format!("join error: {e}"))),
        };
        if let Err(e) = &result {
            warn!("analysis: chunk={} failed: {}", index, e);
        }
        reports.push(ChunkReport { index, result });
    }

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    info!(
        "analysis: chunks={} failed={} in {} ms",
        reports.len(),
        failed,
        t0.elapsed().as_millis()
    );
    reports
}
