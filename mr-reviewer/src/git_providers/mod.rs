//! Provider facade w/o async-trait or dynamic trait objects.
//!
//! We expose an enum `ProviderClient` with concrete implementations per provider.
//! This keeps async fns simple and avoids boxing futures.

pub mod types;
pub use types::*;

pub mod gitlab;

use crate::errors::{ConfigError, MrResult};

/// Runtime configuration for any provider client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// API base, e.g. "https://gitlab.com/api/v4"
    pub base_api: String,
    /// Access token for the provider (PAT or bot token).
    pub token: String,
}

impl ProviderConfig {
    /// Reads `GITLAB_BASE_API` (default `https://gitlab.com/api/v4`) and `GITLAB_TOKEN`.
    pub fn from_env() -> MrResult<Self> {
        let base_api = std::env::var("GITLAB_BASE_API")
            .unwrap_or_else(|_| "https://gitlab.com/api/v4".to_string());
        let token = std::env::var("GITLAB_TOKEN").unwrap_or_default();
        let cfg = Self {
            kind: ProviderKind::GitLab,
            base_api,
            token,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> MrResult<()> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken.into());
        }
        if !(self.base_api.starts_with("http://") || self.base_api.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(self.base_api.clone()).into());
        }
        Ok(())
    }
}

/// Concrete provider client (enum-dispatch).
#[derive(Debug, Clone)]
pub enum ProviderClient {
    GitLab(gitlab::GitLabClient),
}

impl ProviderClient {
    /// Constructs a concrete client from generic config.
    pub fn from_config(cfg: &ProviderConfig) -> MrResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("mr-reviewer/0.1")
            .build()?;
        Ok(match cfg.kind {
            ProviderKind::GitLab => Self::GitLab(gitlab::GitLabClient::new(
                client,
                cfg.base_api.clone(),
                cfg.token.clone(),
            )),
        })
    }

    /// Fetch only metadata (title, state, diff refs).
    pub async fn fetch_meta(&self, id: &ChangeRequestId) -> MrResult<ChangeRequest> {
        match self {
            Self::GitLab(c) => c.get_meta(id).await,
        }
    }

    /// Fetch per-file diffs, parsed.
    pub async fn fetch_changes(&self, id: &ChangeRequestId) -> MrResult<ChangeSet> {
        match self {
            Self::GitLab(c) => c.get_changes(id).await,
        }
    }

    /// Fetch the raw unified diff and parse it.
    ///
    /// Used when per-file diffs came back truncated.
    pub async fn fetch_raw_changes(&self, id: &ChangeRequestId) -> MrResult<ChangeSet> {
        match self {
            Self::GitLab(c) => c.get_raw_changes(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_token_and_bad_url() {
        let mut cfg = ProviderConfig {
            kind: ProviderKind::GitLab,
            base_api: "https://gitlab.example.com/api/v4".into(),
            token: String::new(),
        };
        assert!(cfg.validate().is_err());
        cfg.token = "glpat-x".into();
        cfg.validate().unwrap();
        cfg.base_api = "gitlab.example.com".into();
        assert!(cfg.validate().is_err());
    }
}
