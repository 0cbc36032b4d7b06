//! Asset synchronisation
//!
//! Each asset is either restored from the staging directory, when the copy
//! deployed by an earlier run is still current, or downloaded afresh. The
//! sidecar marker `._<name>.node_id` next to every asset holds the node id
//! it was downloaded under and is the only record of what is deployed.

use crate::archive;
use crate::error::{DeployError, Result};
use crate::github::GitHubClient;
use crate::types::{Asset, Release};
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const MARKER_PREFIX: &str = "._";
pub const MARKER_SUFFIX: &str = ".node_id";

pub fn marker_name(asset_name: &str) -> String {
    format!("{}{}{}", MARKER_PREFIX, asset_name, MARKER_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Restored,
    Downloaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetOutcome {
    pub name: String,
    pub disposition: Disposition,
}

/// What a synchronisation pass did so far. Kept up to date while assets are
/// processed so a failed pass can still be rolled back precisely.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub assets: Vec<AssetOutcome>,
    /// Destination entries that were moved back out of staging.
    pub restored_entries: HashSet<OsString>,
}

impl SyncReport {
    /// True if at least one asset was downloaded.
    pub fn updated(&self) -> bool {
        self.assets
            .iter()
            .any(|a| a.disposition == Disposition::Downloaded)
    }
}

/// Fetch the asset list of `release`. An empty list is an error.
pub async fn resolve_assets(client: &GitHubClient, release: &Release) -> Result<Vec<Asset>> {
    let assets: Vec<Asset> = client
        .get_json(&release.assets_url)
        .await?
        .ok_or_else(|| DeployError::InvalidResponse {
            url: release.assets_url.clone(),
        })?;

    if assets.is_empty() {
        return Err(DeployError::NoAssetsFound {
            assets_url: release.assets_url.clone(),
            html_url: release.html_url.clone(),
        });
    }

    tracing::debug!("Release '{}' has {} asset(s)", release.name, assets.len());
    Ok(assets)
}

/// The staged copy of `asset` is current: same size and same node id.
pub fn is_unchanged(staging: &Path, asset: &Asset) -> bool {
    let staged = staging.join(&asset.name);
    let size_matches = fs::metadata(&staged)
        .map(|m| m.is_file() && m.len() == asset.size)
        .unwrap_or(false);
    if !size_matches {
        return false;
    }

    // A missing or unreadable marker just means "changed"
    fs::read_to_string(staging.join(marker_name(&asset.name)))
        .map(|stored| stored.trim_end() == asset.id)
        .unwrap_or(false)
}

fn validate_name(destination: &Path, name: &str) -> Result<()> {
    let plain = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if plain && name != "." && name != ".." {
        return Ok(());
    }
    Err(DeployError::deployment(
        destination.join(name),
        format!("asset name '{}' is not a plain file name", name),
        io::Error::from(io::ErrorKind::InvalidInput),
    ))
}

fn move_entry(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| {
        DeployError::deployment(from, format!("could not move to {}", to.display()), e)
    })
}

pub struct AssetSynchronizer<'a> {
    client: &'a GitHubClient,
    destination: &'a Path,
    staging: &'a Path,
    unzip_dir: Option<&'a Path>,
    reexpand_restored: bool,
}

impl<'a> AssetSynchronizer<'a> {
    pub fn new(client: &'a GitHubClient, destination: &'a Path, staging: &'a Path) -> Self {
        Self {
            client,
            destination,
            staging,
            unzip_dir: None,
            reexpand_restored: false,
        }
    }

    /// Expand downloaded archives into `unzip_dir`. When that directory lives
    /// inside the destination its previous contents were swapped into
    /// staging too, so restored archives are expanded again.
    pub fn with_unzip_dir(mut self, unzip_dir: Option<&'a Path>, reexpand_restored: bool) -> Self {
        self.unzip_dir = unzip_dir;
        self.reexpand_restored = reexpand_restored && unzip_dir.is_some();
        self
    }

    pub async fn synchronize(&self, assets: &[Asset], report: &mut SyncReport) -> Result<()> {
        for asset in assets {
            validate_name(self.destination, &asset.name)?;

            let disposition = if is_unchanged(self.staging, asset) {
                self.restore(asset, report)?;
                Disposition::Restored
            } else {
                self.download(asset).await?;
                Disposition::Downloaded
            };

            report.assets.push(AssetOutcome {
                name: asset.name.clone(),
                disposition,
            });
        }
        Ok(())
    }

    fn restore(&self, asset: &Asset, report: &mut SyncReport) -> Result<()> {
        let marker = marker_name(&asset.name);
        tracing::info!(
            "{} is unchanged (size {}, node id {}), keeping deployed copy",
            asset.name,
            asset.size,
            asset.id
        );

        move_entry(&self.staging.join(&asset.name), &self.destination.join(&asset.name))?;
        report.restored_entries.insert(OsString::from(&asset.name));
        move_entry(&self.staging.join(&marker), &self.destination.join(&marker))?;
        report.restored_entries.insert(OsString::from(&marker));

        if self.reexpand_restored {
            if let Some(unzip_dir) = self.unzip_dir {
                archive::expand_if_archive(&self.destination.join(&asset.name), unzip_dir)?;
            }
        }
        Ok(())
    }

    async fn download(&self, asset: &Asset) -> Result<()> {
        tracing::info!("Downloading {} ({} bytes)", asset.name, asset.size);

        let bytes = self.client.get_file(&asset.url, &asset.name).await?;
        if bytes.is_empty() {
            return Err(DeployError::AssetDownload {
                url: asset.url.clone(),
            });
        }
        if bytes.len() as u64 != asset.size {
            tracing::warn!(
                "{} is {} bytes, release lists {}",
                asset.name,
                bytes.len(),
                asset.size
            );
        }

        let target = self.destination.join(&asset.name);
        let partial: PathBuf = self.destination.join(format!(".{}.part", asset.name));
        fs::write(&partial, &bytes)
            .map_err(|e| DeployError::deployment(&partial, "could not write download", e))?;
        move_entry(&partial, &target)?;

        let marker = self.destination.join(marker_name(&asset.name));
        fs::write(&marker, &asset.id)
            .map_err(|e| DeployError::deployment(&marker, "could not write marker", e))?;

        if let Some(unzip_dir) = self.unzip_dir {
            archive::expand_if_archive(&target, unzip_dir)?;
        }

        tracing::info!("Deployed {} to {}", asset.name, target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn asset(name: &str, size: u64, id: &str) -> Asset {
        Asset {
            name: name.to_string(),
            url: format!("https://api.github.com/repos/acme/app/releases/assets/{}", name),
            size,
            id: id.to_string(),
            download_url: String::new(),
        }
    }

    #[test]
    fn test_marker_name() {
        assert_eq!(marker_name("tool.zip"), "._tool.zip.node_id");
    }

    #[test]
    fn test_unchanged_requires_size_and_marker() {
        let staging = TempDir::new().unwrap();
        fs::write(staging.path().join("tool.zip"), vec![0u8; 100]).unwrap();

        // No marker yet
        assert!(!is_unchanged(staging.path(), &asset("tool.zip", 100, "abc")));

        fs::write(staging.path().join("._tool.zip.node_id"), "abc").unwrap();
        assert!(is_unchanged(staging.path(), &asset("tool.zip", 100, "abc")));
        assert!(!is_unchanged(staging.path(), &asset("tool.zip", 101, "abc")));
        assert!(!is_unchanged(staging.path(), &asset("tool.zip", 100, "abd")));
        assert!(!is_unchanged(staging.path(), &asset("other.zip", 100, "abc")));
    }

    #[test]
    fn test_marker_tolerates_trailing_newline() {
        let staging = TempDir::new().unwrap();
        fs::write(staging.path().join("tool"), b"1234").unwrap();
        fs::write(staging.path().join("._tool.node_id"), "xyz\n").unwrap();
        assert!(is_unchanged(staging.path(), &asset("tool", 4, "xyz")));
    }

    #[test]
    fn test_validate_name() {
        let dest = Path::new("/srv/app");
        assert!(validate_name(dest, "tool.zip").is_ok());
        assert!(validate_name(dest, "../tool").is_err());
        assert!(validate_name(dest, "dir/tool").is_err());
        assert!(validate_name(dest, "..").is_err());
    }

    #[test]
    fn test_report_updated() {
        let mut report = SyncReport::default();
        assert!(!report.updated());
        report.assets.push(AssetOutcome {
            name: "a".into(),
            disposition: Disposition::Restored,
        });
        assert!(!report.updated());
        report.assets.push(AssetOutcome {
            name: "b".into(),
            disposition: Disposition::Downloaded,
        });
        assert!(report.updated());
    }
}
