//! Deployment committer
//!
//! A run moves everything currently deployed into a fresh staging directory
//! inside the destination, lets the synchroniser either restore entries
//! from there or download replacements, and removes the staging directory
//! afterwards. If synchronisation fails the destination is put back the
//! way it was before the staging directory goes away.

use crate::config::DeployConfig;
use crate::error::{DeployError, Result};
use crate::github::GitHubClient;
use crate::release::ReleaseSelector;
use crate::sync::{resolve_assets, AssetOutcome, AssetSynchronizer, SyncReport};
use crate::types::{Asset, Release};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub const STAGING_PREFIX: &str = ".git-auto-deploy-staging-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    StagingCreated,
    Swapped,
    Synchronized,
    HookRun,
    HookSkipped,
    Cleaned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Skipped,
    Succeeded,
    /// Exit code, `None` when killed by a signal.
    Failed(Option<i32>),
}

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub release: Release,
    pub assets: Vec<AssetOutcome>,
    pub hook: HookOutcome,
}

impl DeployOutcome {
    pub fn updated(&self) -> bool {
        self.assets
            .iter()
            .any(|a| a.disposition == crate::sync::Disposition::Downloaded)
    }
}

/// Select the release, list its assets and commit them to the destination.
pub async fn deploy(config: &DeployConfig, client: &GitHubClient) -> Result<DeployOutcome> {
    let release = ReleaseSelector::from_config(config)
        .select_release(client)
        .await?;
    let assets = resolve_assets(client, &release).await?;

    let mut committer = Committer::new(config, client);
    let (assets, hook) = committer.commit(&assets).await?;

    Ok(DeployOutcome {
        release,
        assets,
        hook,
    })
}

pub struct Committer<'a> {
    config: &'a DeployConfig,
    client: &'a GitHubClient,
    phase: Phase,
}

impl<'a> Committer<'a> {
    pub fn new(config: &'a DeployConfig, client: &'a GitHubClient) -> Self {
        Self {
            config,
            client,
            phase: Phase::NotStarted,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!("Deployment phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub async fn commit(&mut self, assets: &[Asset]) -> Result<(Vec<AssetOutcome>, HookOutcome)> {
        let config = self.config;
        let destination = config.destination_dir.as_path();
        fs::create_dir_all(destination).map_err(|e| {
            DeployError::deployment(destination, "could not create destination directory", e)
        })?;

        recover_interrupted(destination)?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(destination)
            .map_err(|e| {
                DeployError::deployment(destination, "could not create staging directory", e)
            })?;
        self.enter(Phase::StagingCreated);
        tracing::debug!("Staging directory: {}", staging.path().display());

        let result = self.swap_and_sync(destination, staging.path(), assets).await;

        let result = match result {
            Ok(report) => {
                self.enter(Phase::Synchronized);
                self.run_hook(report.updated())
                    .map(|hook| (report.assets, hook))
            }
            Err((e, report, swapped)) => {
                tracing::error!("Deployment failed, restoring previous files: {}", e);
                rollback(destination, staging.path(), swapped, &report);
                Err(e)
            }
        };

        let cleaned = close_staging(staging);
        self.enter(Phase::Cleaned);

        match (result, cleaned) {
            (Ok(done), Ok(())) => Ok(done),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    tracing::error!("{}", cleanup_err);
                }
                Err(e)
            }
        }
    }

    /// On failure also hands back what was done so far and whether the old
    /// entries had all been moved into staging.
    async fn swap_and_sync(
        &mut self,
        destination: &Path,
        staging: &Path,
        assets: &[Asset],
    ) -> std::result::Result<SyncReport, (DeployError, SyncReport, bool)> {
        let mut report = SyncReport::default();

        if let Err(e) = move_into_staging(destination, staging) {
            return Err((e, report, false));
        }
        self.enter(Phase::Swapped);

        let config = self.config;
        let unzip_dir = config.unzip_dir.as_deref();
        let reexpand = unzip_dir.is_some_and(|dir| is_within(dir, destination));
        let synchronizer = AssetSynchronizer::new(self.client, destination, staging)
            .with_unzip_dir(unzip_dir, reexpand);

        match synchronizer.synchronize(assets, &mut report).await {
            Ok(()) => Ok(report),
            Err(e) => Err((e, report, true)),
        }
    }

    fn run_hook(&mut self, updated: bool) -> Result<HookOutcome> {
        let config = self.config;
        let command = match (&config.post_script, updated) {
            (Some(command), true) => command,
            (Some(_), false) => {
                tracing::info!("No new assets, skipping post-deploy command");
                self.enter(Phase::HookSkipped);
                return Ok(HookOutcome::Skipped);
            }
            (None, _) => {
                self.enter(Phase::HookSkipped);
                return Ok(HookOutcome::Skipped);
            }
        };

        tracing::info!("Running post-deploy command: {}", command);
        let status = Command::new(command)
            .status()
            .map_err(|source| DeployError::Hook {
                command: command.clone(),
                source,
            })?;
        self.enter(Phase::HookRun);

        if status.success() {
            Ok(HookOutcome::Succeeded)
        } else {
            tracing::warn!("Post-deploy command '{}' exited with {}", command, status);
            Ok(HookOutcome::Failed(status.code()))
        }
    }
}

fn is_staging_dir(name: &OsString) -> bool {
    name.to_string_lossy().starts_with(STAGING_PREFIX)
}

fn list_entries(dir: &Path) -> Result<Vec<(OsString, PathBuf)>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| DeployError::deployment(dir, "could not list directory", e))?;

    let mut listed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DeployError::deployment(dir, "could not list directory", e))?;
        listed.push((entry.file_name(), entry.path()));
    }
    Ok(listed)
}

/// Move every entry of `destination` except `staging` itself into staging.
fn move_into_staging(destination: &Path, staging: &Path) -> Result<()> {
    let staging_name = staging.file_name().map(OsString::from);

    for (name, path) in list_entries(destination)? {
        if Some(&name) == staging_name.as_ref() {
            continue;
        }
        let target = staging.join(&name);
        fs::rename(&path, &target).map_err(|e| {
            DeployError::deployment(&path, format!("could not move into {}", staging.display()), e)
        })?;
    }
    Ok(())
}

/// Put the previous deployment back after a failed run. Failures here are
/// logged; the error that caused the rollback is what gets reported.
fn rollback(destination: &Path, staging: &Path, swapped: bool, report: &SyncReport) {
    let staging_name = staging.file_name().map(OsString::from);

    // Once the swap completed, anything in the destination that was not
    // restored from staging was written by this run.
    if swapped {
        match list_entries(destination) {
            Ok(entries) => {
                for (name, path) in entries {
                    if Some(&name) == staging_name.as_ref() || report.restored_entries.contains(&name) {
                        continue;
                    }
                    if let Err(e) = remove_entry(&path) {
                        tracing::error!("Could not remove {}: {}", path.display(), e);
                    }
                }
            }
            Err(e) => tracing::error!("{}", e),
        }
    }

    match list_entries(staging) {
        Ok(entries) => {
            for (name, path) in entries {
                let target = destination.join(&name);
                if target.exists() {
                    if let Err(e) = remove_entry(&target) {
                        tracing::error!("Could not remove {}: {}", target.display(), e);
                        continue;
                    }
                }
                if let Err(e) = fs::rename(&path, &target) {
                    tracing::error!("Could not restore {}: {}", target.display(), e);
                }
            }
        }
        Err(e) => tracing::error!("{}", e),
    }
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn close_staging(staging: TempDir) -> Result<()> {
    let path = staging.path().to_path_buf();
    staging
        .close()
        .map_err(|e| DeployError::deployment(path, "could not remove staging directory", e))
}

/// A run killed after its swap leaves the previous deployment inside a
/// staging directory. Move whatever is missing from the destination back
/// and drop the leftover.
fn recover_interrupted(destination: &Path) -> Result<()> {
    for (name, path) in list_entries(destination)? {
        if !is_staging_dir(&name) || !path.is_dir() {
            continue;
        }
        tracing::warn!("Recovering interrupted deployment from {}", path.display());

        for (entry_name, entry_path) in list_entries(&path)? {
            let target = destination.join(&entry_name);
            if target.exists() {
                continue;
            }
            fs::rename(&entry_path, &target).map_err(|e| {
                DeployError::deployment(&entry_path, "could not recover staged entry", e)
            })?;
        }

        fs::remove_dir_all(&path)
            .map_err(|e| DeployError::deployment(&path, "could not remove leftover staging directory", e))?;
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn is_within(dir: &Path, destination: &Path) -> bool {
    absolute(dir).starts_with(absolute(destination))
}
