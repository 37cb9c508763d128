//! Public entry for the mr-reviewer pipeline.
//!
//! High-level functions that run one review cycle for a GitLab Merge Request.
//!
//! 1) **Step 1: Provider I/O**
//!    - Fetch MR metadata to get `diff_refs`
//!    - Fetch per-file diffs; fall back to `/raw_diffs` when truncated
//!
//! 2) **Step 2: Plan**
//!    - `diff_analysis::plan_parsed`: filter, chunk, build the position index
//!
//! 3) **Step 3: Analysis**
//!    - Ship chunks to the analysis service on a bounded pool
//!
//! 4) **Step 4: Placement + publish**
//!    - Resolve suggestions to inline positions (or general notes)
//!    - Post to GitLab with idempotency markers (or just log in dry-run)
//!
//! The index is built per call and dropped with the outcome; nothing is
//! shared between merge requests.

pub mod analysis;
pub mod errors;
pub mod git_providers;
pub mod publish;

use std::time::Instant;
use tracing::{debug, warn};

use diff_analysis::{AnalysisConfig, ReviewPlan};
use errors::MrResult;
use git_providers::{ChangeRequest, ChangeRequestId, ProviderClient, ProviderConfig};
use analysis::{AnalysisClient, AnalysisServiceConfig, Suggestion};
use publish::{PlacedComment, PublishConfig, PublishedComment};

/// MR metadata plus the analysis plan for its diff.
#[derive(Debug, Clone)]
pub struct PreparedReview {
    pub meta: ChangeRequest,
    pub plan: ReviewPlan,
}

/// Everything one review cycle produced.
#[derive(Debug)]
pub struct ReviewOutcome {
    pub prepared: PreparedReview,
    /// Indexes of chunks the analysis service failed on.
    pub failed_chunks: Vec<usize>,
    pub comments: Vec<PlacedComment>,
    pub published: Vec<PublishedComment>,
}

/// Steps 1–2: fetch the MR and plan its diff.
pub async fn prepare_review(
    provider_cfg: &ProviderConfig,
    id: &ChangeRequestId,
    analysis_cfg: &AnalysisConfig,
) -> MrResult<PreparedReview> {
    let t0 = Instant::now();
    let client = ProviderClient::from_config(provider_cfg)?;

    debug!("step1: fetch meta");
    let meta = client.fetch_meta(id).await?;
    debug!("step1: meta ok, head_sha={}", meta.diff_refs.head_sha);

    let mut changes = client.fetch_changes(id).await?;
    debug!(
        "step1: changes fetched, files={} truncated={}",
        changes.diff.files.len(),
        changes.is_truncated
    );
    if changes.is_truncated {
        debug!("step1: provider reported truncation, fetching raw diff");
        match client.fetch_raw_changes(id).await {
            Ok(raw) => changes = raw,
            Err(e) => warn!("step1: raw diff unavailable, keeping truncated diffs: {}", e),
        }
    }
    debug!("step1: done in {} ms", t0.elapsed().as_millis());

    let t2 = Instant::now();
    let plan = diff_analysis::plan_parsed(
        changes.diff,
        &analysis_cfg.patterns()?,
        analysis_cfg.limits(),
        &analysis_cfg.estimator()?,
    )?;
    debug!("step2: plan ready in {} ms", t2.elapsed().as_millis());

    Ok(PreparedReview { meta, plan })
}

/// Steps 1–4 against the analysis service.
pub async fn run_review(
    provider_cfg: &ProviderConfig,
    id: &ChangeRequestId,
    analysis_cfg: &AnalysisConfig,
    service_cfg: &AnalysisServiceConfig,
    publish_cfg: &PublishConfig,
) -> MrResult<ReviewOutcome> {
    let prepared = prepare_review(provider_cfg, id, analysis_cfg).await?;

    let t3 = Instant::now();
    let service = AnalysisClient::new(service_cfg)?;
    let reports = service.analyze_all(&prepared.plan.chunks.chunks).await;
    let mut failed_chunks = Vec::new();
    let mut suggestions = Vec::new();
    for r in reports {
        match r.result {
            Ok(s) => suggestions.extend(s),
            Err(_) => failed_chunks.push(r.index),
        }
    }
    debug!(
        "step3: suggestions={} failed_chunks={} in {} ms",
        suggestions.len(),
        failed_chunks.len(),
        t3.elapsed().as_millis()
    );

    let (comments, published) =
        place_and_publish(provider_cfg, id, &prepared, &suggestions, publish_cfg).await?;

    Ok(ReviewOutcome {
        prepared,
        failed_chunks,
        comments,
        published,
    })
}

/// Steps 1–2 and 4 for suggestions computed elsewhere.
pub async fn publish_suggestions(
    provider_cfg: &ProviderConfig,
    id: &ChangeRequestId,
    analysis_cfg: &AnalysisConfig,
    suggestions: &[Suggestion],
    publish_cfg: &PublishConfig,
) -> MrResult<ReviewOutcome> {
    let prepared = prepare_review(provider_cfg, id, analysis_cfg).await?;
    let (comments, published) =
        place_and_publish(provider_cfg, id, &prepared, suggestions, publish_cfg).await?;
    Ok(ReviewOutcome {
        prepared,
        failed_chunks: Vec::new(),
        comments,
        published,
    })
}

async fn place_and_publish(
    provider_cfg: &ProviderConfig,
    id: &ChangeRequestId,
    prepared: &PreparedReview,
    suggestions: &[Suggestion],
    publish_cfg: &PublishConfig,
) -> MrResult<(Vec<PlacedComment>, Vec<PublishedComment>)> {
    let comments = publish::place_all(&prepared.plan, suggestions, publish_cfg.snap_distance);
    let inline = comments.iter().filter(|c| c.placement.is_inline()).count();
    debug!(
        "step4: placed inline={} general={}",
        inline,
        comments.len() - inline
    );

    let published = publish::publish(
        provider_cfg,
        id,
        &prepared.meta.diff_refs,
        &comments,
        publish_cfg,
    )
    .await?;
    Ok((comments, published))
}

// -----------------------------------------------------------------------------
// Convenience re-exports for downstream users
// -----------------------------------------------------------------------------

pub use analysis::{AnalysisServiceConfig as ReviewerServiceConfig, Suggestion as ReviewerSuggestion};
pub use git_providers::{ProviderConfig as ReviewerProviderConfig, ProviderKind};
pub use publish::placement::Placement as ReviewerPlacement;
