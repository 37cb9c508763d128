//! Publisher.
//!
//! Posts placed suggestions to the MR provider.
//!
//! - GitLab: inline discussions for placed lines, MR notes otherwise.
//! - Idempotency: embeds a hidden marker in the body and skips duplicates.
//! - Dry-run: compute and log actions without actually calling the API.
//! - No async-trait, no Box<dyn ...>; uses plain async fn + enum dispatch.

pub mod gitlab;
pub mod placement;

use std::time::Instant;

use diff_analysis::ReviewPlan;
use tracing::info;

use crate::analysis::{Suggestion, env_parse};
use crate::errors::{ConfigError, MrResult};
use crate::git_providers::{ChangeRequestId, DiffRefs, ProviderConfig, ProviderKind};
use placement::{Placement, Placer};

/// Configuration for publishing step.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// If true, do not actually send anything; just log what would be posted.
    pub dry_run: bool,
    /// Concurrency for posting requests.
    pub max_concurrency: usize,
    /// Max lines a suggestion may move to reach an addressable line.
    pub snap_distance: u32,
}

impl PublishConfig {
    /// Reads publishing settings from the environment.
    ///
    /// Unparsable values are reported instead of silently replaced.
    pub fn from_env() -> MrResult<Self> {
        Ok(Self {
            dry_run: parse_flag(
                "MR_REVIEWER_PUBLISH_DRY_RUN",
                std::env::var("MR_REVIEWER_PUBLISH_DRY_RUN").ok(),
                true,
            )?,
            max_concurrency: env_parse("MR_REVIEWER_PUBLISH_CONCURRENCY", 2)?,
            snap_distance: env_parse("MR_REVIEWER_SNAP_DISTANCE", 3)?,
        })
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            max_concurrency: 2,
            snap_distance: 3,
        }
    }
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> MrResult<bool> {
    let Some(v) = raw.filter(|v| !v.trim().is_empty()) else {
        return Ok(default);
    };
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: v,
        }
        .into()),
    }
}

/// A suggestion together with its resolved position.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlacedComment {
    pub suggestion: Suggestion,
    pub placement: Placement,
}

/// Resolves every suggestion against the plan's position index.
pub fn place_all(
    plan: &ReviewPlan,
    suggestions: &[Suggestion],
    snap_distance: u32,
) -> Vec<PlacedComment> {
    let placer = Placer::new(plan, snap_distance);
    suggestions
        .iter()
        .map(|s| PlacedComment {
            suggestion: s.clone(),
            placement: placer.place(s),
        })
        .collect()
}

/// Result for a single published comment.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PublishedComment {
    pub placement: Placement,
    /// Was a network POST performed (false in dry-run or duplicate)?
    pub performed: bool,
    /// Reason if skipped (duplicate, dry-run).
    pub skipped_reason: Option<String>,
    /// Provider-specific identifiers (GitLab discussion/note ids).
    pub provider_ids: Option<ProviderIds>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderIds {
    pub discussion_id: Option<String>,
    pub note_id: Option<u64>,
}

/// Publish all placed comments for given MR.
///
/// Returns per-comment results and logs summary (`INFO`).
pub async fn publish(
    provider_cfg: &ProviderConfig,
    id: &ChangeRequestId,
    refs: &DiffRefs,
    comments: &[PlacedComment],
    cfg: &PublishConfig,
) -> MrResult<Vec<PublishedComment>> {
    let t0 = Instant::now();
    info!(
        "publish: start provider={:?} comments={} dry_run={}",
        provider_cfg.kind,
        comments.len(),
        cfg.dry_run
    );

    let results = match provider_cfg.kind {
        ProviderKind::GitLab => {
            gitlab::publish_gitlab(provider_cfg, id, refs, comments, cfg).await?
        }
    };

    let created = results.iter().filter(|r| r.performed).count();
    let inline = results.iter().filter(|r| r.placement.is_inline()).count();
    let skipped = results
        .iter()
        .filter(|r| r.skipped_reason.is_some())
        .count();

    info!(
        "publish: done created={} inline={} skipped={} in {} ms",
        created,
        inline,
        skipped,
        t0.elapsed().as_millis()
    );

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::parse_setting;
    use crate::errors::Error;

    #[test]
    fn snap_distance_rejects_values_outside_u32() {
        let err = parse_setting::<u32>(
            "MR_REVIEWER_SNAP_DISTANCE",
            Some("4294967296".into()),
            3,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidEnv { ref key, ref value })
                if key == "MR_REVIEWER_SNAP_DISTANCE" && value == "4294967296"
        ));
        assert_eq!(parse_setting::<u32>("K", Some(" 7 ".into()), 3).unwrap(), 7);
        assert_eq!(parse_setting::<u32>("K", None, 3).unwrap(), 3);
        assert_eq!(parse_setting::<u32>("K", Some("  ".into()), 3).unwrap(), 3);
    }

    #[test]
    fn dry_run_flag_accepts_known_spellings_only() {
        assert!(parse_flag("D", Some("On".into()), false).unwrap());
        assert!(!parse_flag("D", Some("0".into()), true).unwrap());
        assert!(parse_flag("D", None, true).unwrap());
        assert!(matches!(
            parse_flag("D", Some("maybe".into()), true),
            Err(Error::Config(ConfigError::InvalidEnv { .. }))
        ));
    }
}
