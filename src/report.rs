//! Error reporting sinks
//!
//! Failed runs are handed to a [`Reporter`] before the error is returned to
//! the caller. The binary always logs through [`TracingReporter`] and also
//! forwards to Sentry when a DSN file sits next to the config file.

use crate::error::DeployError;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

pub const SENTRY_DSN_FILE: &str = "sentry.txt";

pub trait Reporter: Send + Sync {
    fn capture(&self, error: &DeployError);
}

/// Emits one structured `error` event per failed run.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn capture(&self, error: &DeployError) {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        tracing::error!(
            kind = error.kind(),
            causes = ?chain,
            "Deployment run failed: {}",
            error
        );
    }
}

/// Sends errors to Sentry. Events are flushed when the reporter is dropped.
pub struct SentryReporter {
    _guard: sentry::ClientInitGuard,
}

impl SentryReporter {
    pub fn init(dsn: sentry::types::Dsn) -> Self {
        let guard = sentry::init(sentry::ClientOptions {
            dsn: Some(dsn),
            release: sentry::release_name!(),
            ..Default::default()
        });
        Self { _guard: guard }
    }
}

impl Reporter for SentryReporter {
    fn capture(&self, error: &DeployError) {
        let id = sentry::capture_error(error);
        tracing::debug!("Reported {} to Sentry as {}", error.kind(), id);
    }
}

/// Forwards every error to each of its reporters in order.
#[derive(Default)]
pub struct Reporters {
    sinks: Vec<Box<dyn Reporter>>,
}

impl Reporters {
    pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
        self.sinks.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Reporter for Reporters {
    fn capture(&self, error: &DeployError) {
        for sink in &self.sinks {
            sink.capture(error);
        }
    }
}

pub fn sentry_dsn_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(SENTRY_DSN_FILE)
}

/// DSN from the `sentry.txt` next to `config_path`. A missing or empty file
/// means Sentry is off; an unparsable one is logged and ignored.
pub fn read_sentry_dsn(config_path: &Path) -> Option<sentry::types::Dsn> {
    let path = sentry_dsn_path(config_path);
    let content = fs::read_to_string(&path).ok()?;
    let dsn = content.trim();
    if dsn.is_empty() {
        return None;
    }

    match dsn.parse() {
        Ok(dsn) => Some(dsn),
        Err(e) => {
            tracing::warn!("Ignoring invalid Sentry DSN in {}: {}", path.display(), e);
            None
        }
    }
}

/// Reporters for a run driven by the config file at `config_path`.
pub fn reporters_for(config_path: &Path) -> Reporters {
    let reporters = Reporters::default().with(TracingReporter);
    match read_sentry_dsn(config_path) {
        Some(dsn) => {
            tracing::debug!("Sentry reporting enabled");
            reporters.with(SentryReporter::init(dsn))
        }
        None => reporters,
    }
}
