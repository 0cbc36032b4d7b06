//! Deploys the assets of the newest matching GitHub release into a local
//! directory.
//!
//! A run selects a release, restores assets whose deployed copy is still
//! current, downloads the rest and runs an optional post-deploy command.
//! See [`deploy::deploy`] for the sequence.

pub mod archive;
pub mod auth;
pub mod config;
pub mod deploy;
pub mod error;
pub mod github;
pub mod release;
pub mod report;
pub mod sync;
pub mod types;

pub use config::DeployConfig;
pub use deploy::{DeployOutcome, HookOutcome};
pub use error::{ConfigError, DeployError};

use auth::CredentialProvider;
use github::GitHubClient;
use report::Reporter;

/// Build the API client a run uses for `config`.
pub fn client_for(config: &DeployConfig) -> error::Result<GitHubClient> {
    GitHubClient::new(
        &config.api_url,
        CredentialProvider::from_config(config),
        config.timeout,
    )
}

/// One deployment run. Failures are passed to `reporter` and then returned.
pub async fn run_with_reporter(
    config: &DeployConfig,
    reporter: &dyn Reporter,
) -> error::Result<DeployOutcome> {
    let result = match client_for(config) {
        Ok(client) => deploy::deploy(config, &client).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        reporter.capture(e);
    }
    result
}
