use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use diff_analysis::{AnalysisConfig, ReviewPlan};
use mr_reviewer::analysis::{AnalysisServiceConfig, Suggestion};
use mr_reviewer::git_providers::{ChangeRequestId, ProviderConfig};
use mr_reviewer::publish::PublishConfig;

#[derive(Parser, Debug)]
#[command(name = "mr-review")]
#[command(about = "Plans, analyzes and publishes merge-request reviews")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plan a local unified diff and print the summary as JSON (offline).
    Plan {
        #[arg(long)]
        diff: PathBuf,
    },
    /// Fetch an MR, analyze its chunks and publish the suggestions.
    Review {
        #[arg(long)]
        project: String,
        #[arg(long)]
        iid: u64,
    },
    /// Fetch an MR and publish suggestions from a JSON file.
    Publish {
        #[arg(long)]
        project: String,
        #[arg(long)]
        iid: u64,
        #[arg(long)]
        suggestions: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real deployments use the process environment.
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,diff_analysis=info,mr_reviewer=info"))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let analysis_cfg = AnalysisConfig::from_env()?;

    match args.cmd {
        Command::Plan { diff } => {
            let raw = std::fs::read_to_string(&diff)
                .with_context(|| format!("reading {}", diff.display()))?;
            let plan = diff_analysis::plan_review(
                &raw,
                &analysis_cfg.patterns()?,
                analysis_cfg.limits(),
                &analysis_cfg.estimator()?,
            )?;
            println!("{}", serde_json::to_string_pretty(&plan_summary(&plan))?);
        }
        Command::Review { project, iid } => {
            let provider_cfg = ProviderConfig::from_env()?;
            let service_cfg = AnalysisServiceConfig::from_env()?;
            let publish_cfg = PublishConfig::from_env()?;
            let id = ChangeRequestId { project, iid };

            let out = mr_reviewer::run_review(
                &provider_cfg,
                &id,
                &analysis_cfg,
                &service_cfg,
                &publish_cfg,
            )
            .await?;
            info!(
                "review: chunks={} failed={:?} comments={}",
                out.prepared.plan.chunks.chunks.len(),
                out.failed_chunks,
                out.comments.len()
            );
            println!("{}", serde_json::to_string_pretty(&out.published)?);
        }
        Command::Publish {
            project,
            iid,
            suggestions,
        } => {
            let raw = std::fs::read_to_string(&suggestions)
                .with_context(|| format!("reading {}", suggestions.display()))?;
            let list: Vec<Suggestion> =
                serde_json::from_str(&raw).context("suggestions file must be a JSON array")?;

            let provider_cfg = ProviderConfig::from_env()?;
            let publish_cfg = PublishConfig::from_env()?;
            let id = ChangeRequestId { project, iid };

            let out = mr_reviewer::publish_suggestions(
                &provider_cfg,
                &id,
                &analysis_cfg,
                &list,
                &publish_cfg,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&out.published)?);
        }
    }

    Ok(())
}

fn plan_summary(plan: &ReviewPlan) -> serde_json::Value {
    let files: Vec<_> = plan
        .parsed
        .files
        .iter()
        .map(|f| {
            json!({
                "path": f.new_path,
                "old_path": f.old_path,
                "status": f.status,
                "binary": f.is_binary,
                "hunks": f.hunks.len(),
                "changed_lines": f.changed_line_count(),
            })
        })
        .collect();
    let chunks: Vec<_> = plan
        .chunks
        .chunks
        .iter()
        .map(|c| {
            json!({
                "index": c.index,
                "files": c.paths().collect::<Vec<_>>(),
                "estimated_tokens": c.estimated_tokens,
                "oversized": c.oversized,
            })
        })
        .collect();

    json!({
        "files": files,
        "ignored": plan.ignored,
        "binary": plan.binary,
        "warnings": plan.parsed.warnings,
        "budget": plan.chunks.budget,
        "chunks": chunks,
        "truncated": plan.chunks.truncated,
        "mapped_files": plan.index.file_count(),
    })
}
