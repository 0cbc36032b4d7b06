//! Error kinds surfaced by a deployment run.
//!
//! Nothing in the crate retries; every variant aborts the current run and
//! carries enough context to diagnose the failure from the log alone.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("required config key {0} is missing or empty")]
    Missing(&'static str),

    #[error("AUTHTOKEN and PRIVATEKEY/APPID are mutually exclusive, configure only one")]
    ConflictingAuth,

    #[error("PRIVATEKEY and APPID must be configured together")]
    IncompleteAppAuth,

    #[error("no credentials configured: set AUTHTOKEN, PRIVATEKEY + APPID or GITHUB_TOKEN")]
    NoAuth,

    #[error("APPID must be a positive integer, got '{0}'")]
    InvalidAppId(String),

    #[error("ASSETREGEX '{pattern}' is not a valid regular expression: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("GitHub API request to {url} failed with status {status}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("download from {url} stalled, no data for {seconds}s")]
    DownloadStalled { url: String, seconds: u64 },

    #[error("response from {url} was not the expected JSON document")]
    InvalidResponse { url: String },

    #[error("No releases found in: {repo_url}\nUsing Filter for name: {pattern}")]
    NoReleaseFound { repo_url: String, pattern: String },

    #[error("No Assets found in: {assets_url}\nCheck: {html_url}")]
    NoAssetsFound { assets_url: String, html_url: String },

    #[error("No bytes received for: {url}")]
    AssetDownload { url: String },

    #[error("deployment failed at {}: {message}", .path.display())]
    Deployment {
        path: PathBuf,
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not expand archive {}: {message}", .path.display())]
    Archive { path: PathBuf, message: String },

    #[error("could not start post-deploy command '{command}': {source}")]
    Hook {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    /// Short machine-friendly name of the error kind, used by reporters.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Config(_) => "config",
            DeployError::Auth(_) => "auth",
            DeployError::Http { .. } => "http",
            DeployError::Transport { .. } => "transport",
            DeployError::ClientBuild(_) => "client_build",
            DeployError::DownloadStalled { .. } => "download_stalled",
            DeployError::InvalidResponse { .. } => "invalid_response",
            DeployError::NoReleaseFound { .. } => "no_release_found",
            DeployError::NoAssetsFound { .. } => "no_assets_found",
            DeployError::AssetDownload { .. } => "asset_download",
            DeployError::Deployment { .. } => "deployment",
            DeployError::Archive { .. } => "archive",
            DeployError::Hook { .. } => "hook",
        }
    }

    pub(crate) fn deployment(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        DeployError::Deployment {
            path: path.into(),
            message: message.into(),
            source,
        }
    }
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;
