//! GitHub API client
//!
//! Every request carries the current credential and a media type suited to
//! the endpoint: JSON for listings, octet-stream for asset bytes. Non-2xx
//! responses are returned as [`DeployError::Http`] and never retried here.

use crate::auth::CredentialProvider;
use crate::error::{DeployError, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub const JSON_ACCEPT: &str = "application/vnd.github.v3+json";
pub const BINARY_ACCEPT: &str = "application/octet-stream";
pub const USER_AGENT: &str = concat!("git-auto-deploy/", env!("CARGO_PKG_VERSION"));

/// Client for API calls. `timeout` bounds each request as a whole.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(DeployError::ClientBuild)
}

/// Client for asset downloads. Only connecting is bounded here, a body may
/// take as long as it needs while data keeps arriving.
pub fn build_download_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(timeout)
        .build()
        .map_err(DeployError::ClientBuild)
}

/// Send a request and turn any non-2xx status into [`DeployError::Http`].
pub(crate) async fn send(request: RequestBuilder, url: &str) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|source| DeployError::Transport {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        return Err(DeployError::Http {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    Ok(response)
}

/// Parse a 2xx body. A body that is not the expected JSON yields `None`
/// rather than an error; callers decide what that means for them.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<Option<T>> {
    let text = response
        .text()
        .await
        .map_err(|source| DeployError::Transport {
            url: url.to_string(),
            source,
        })?;

    match serde_json::from_str(&text) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!("Response from {} is not valid JSON: {}", url, e);
            Ok(None)
        }
    }
}

pub struct GitHubClient {
    http: reqwest::Client,
    downloads: reqwest::Client,
    /// Longest gap allowed between two chunks of a download.
    idle_timeout: Duration,
    api_url: String,
    credentials: CredentialProvider,
    show_progress: bool,
}

impl GitHubClient {
    pub fn new(api_url: &str, credentials: CredentialProvider, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_http_client(timeout)?,
            downloads: build_download_client(timeout)?,
            idle_timeout: timeout,
            api_url: api_url.trim_end_matches('/').to_string(),
            credentials,
            show_progress: console::Term::stderr().is_term(),
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    async fn authorized(&self, request: RequestBuilder, accept: &str) -> Result<RequestBuilder> {
        let header = self
            .credentials
            .authorization_header(&self.http, &self.api_url)
            .await?;
        Ok(request.header(ACCEPT, accept).header(AUTHORIZATION, header))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        tracing::debug!("GET {}", url);
        let request = self.authorized(self.http.get(url), JSON_ACCEPT).await?;
        let response = send(request, url).await?;
        read_json(response, url).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<Option<T>> {
        tracing::debug!("POST {}", url);
        let request = self
            .authorized(self.http.post(url).json(body), JSON_ACCEPT)
            .await?;
        let response = send(request, url).await?;
        read_json(response, url).await
    }

    /// Download an asset's bytes. `label` names the file in the progress bar.
    pub async fn get_file(&self, url: &str, label: &str) -> Result<Vec<u8>> {
        tracing::debug!("GET {} (binary)", url);
        let request = self
            .authorized(self.downloads.get(url), BINARY_ACCEPT)
            .await?;
        let stalled = || DeployError::DownloadStalled {
            url: url.to_string(),
            seconds: self.idle_timeout.as_secs(),
        };
        let response = tokio::time::timeout(self.idle_timeout, send(request, url))
            .await
            .map_err(|_| stalled())??;

        let total_size = response.content_length().unwrap_or(0);
        let pb = if self.show_progress {
            ProgressBar::new(total_size)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::with_template(
                "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message(format!("Downloading {}", label));

        let mut bytes = Vec::with_capacity(total_size as usize);
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| stalled())?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|source| DeployError::Transport {
                url: url.to_string(),
                source,
            })?;
            bytes.extend_from_slice(&chunk);
            pb.set_position(bytes.len() as u64);
        }

        pb.finish_and_clear();
        Ok(bytes)
    }
}

pub fn build_releases_url(api_url: &str, owner: &str, repo: &str) -> String {
    format!(
        "{}/repos/{}/{}/releases?per_page=100",
        api_url.trim_end_matches('/'),
        owner,
        repo
    )
}
