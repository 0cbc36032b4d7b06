//! Release selection: newest published, non-prerelease release whose name
//! matches the configured pattern.

use crate::config::DeployConfig;
use crate::error::{DeployError, Result};
use crate::github::{build_releases_url, GitHubClient};
use crate::types::Release;
use regex::Regex;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct ReleaseSelector {
    repo_url: String,
    releases_url: String,
    pattern: Regex,
}

impl ReleaseSelector {
    pub fn new(repo_url: impl Into<String>, releases_url: impl Into<String>, pattern: Regex) -> Self {
        Self {
            repo_url: repo_url.into(),
            releases_url: releases_url.into(),
            pattern,
        }
    }

    pub fn from_config(config: &DeployConfig) -> Self {
        Self::new(
            config.repo_url(),
            build_releases_url(&config.api_url, &config.username, &config.repository),
            config.asset_pattern.clone(),
        )
    }

    /// Whether a release may be deployed at all.
    pub fn qualifies(&self, release: &Release) -> bool {
        !release.draft && !release.prerelease && self.pattern.is_match(&release.name)
    }

    /// Pick the newest qualifying release. Equal publication times fall
    /// back to the higher release id so the choice does not depend on
    /// listing order.
    pub fn select<'a>(&self, releases: &'a [Release]) -> Option<&'a Release> {
        releases
            .iter()
            .filter(|r| self.qualifies(r))
            .max_by(|a, b| compare_recency(a, b))
    }

    pub async fn select_release(&self, client: &GitHubClient) -> Result<Release> {
        tracing::info!("Looking up releases in {}", self.repo_url);

        let releases: Vec<Release> = client
            .get_json(&self.releases_url)
            .await?
            .ok_or_else(|| DeployError::InvalidResponse {
                url: self.releases_url.clone(),
            })?;

        tracing::debug!("{} release(s) listed", releases.len());

        let release = self
            .select(&releases)
            .cloned()
            .ok_or_else(|| DeployError::NoReleaseFound {
                repo_url: self.repo_url.clone(),
                pattern: self.pattern.as_str().to_string(),
            })?;

        tracing::info!(
            "Selected release '{}' published {}",
            release.name,
            release
                .published_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
        Ok(release)
    }
}

fn compare_recency(a: &Release, b: &Release) -> Ordering {
    // `None` sorts below any date
    a.published_at
        .cmp(&b.published_at)
        .then_with(|| a.id.cmp(&b.id))
}
