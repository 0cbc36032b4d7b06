use git_auto_deploy::config::{DeployConfig, NumberOrString, RawConfig};
use git_auto_deploy::github::GitHubClient;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const OWNER: &str = "acme";
pub const REPO: &str = "app";
pub const TOKEN: &str = "test-token";

// Not every test binary uses every helper.
#[allow(dead_code)]
pub struct TestContext {
    pub server: MockServer,
    pub root: TempDir,
    pub dest: PathBuf,
}

#[allow(dead_code)]
impl TestContext {
    pub async fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let dest = root.path().join("deploy");
        Self {
            server: MockServer::start().await,
            root,
            dest,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn raw_config(&self) -> RawConfig {
        RawConfig {
            username: Some(OWNER.into()),
            repository: Some(REPO.into()),
            assetregex: Some("^v[0-9]".into()),
            destinationdir: Some(self.dest.to_string_lossy().into_owned()),
            authtoken: Some(TOKEN.into()),
            apiurl: Some(self.uri()),
            timeout: Some(5),
            ..Default::default()
        }
    }

    pub fn config(&self) -> DeployConfig {
        DeployConfig::from_raw(self.raw_config(), None).expect("valid config")
    }

    pub fn app_config(&self, key: &Path, app_id: u64) -> DeployConfig {
        let raw = RawConfig {
            authtoken: None,
            privatekey: Some(key.to_string_lossy().into_owned()),
            appid: Some(NumberOrString::Number(app_id)),
            ..self.raw_config()
        };
        DeployConfig::from_raw(raw, None).expect("valid config")
    }

    pub fn client(&self, config: &DeployConfig) -> GitHubClient {
        git_auto_deploy::client_for(config)
            .expect("client")
            .with_progress(false)
    }

    pub fn release(&self, id: u64, name: &str, published_at: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "published_at": published_at,
            "prerelease": false,
            "draft": false,
            "assets_url": format!("{}/repos/{}/{}/releases/{}/assets", self.uri(), OWNER, REPO, id),
            "html_url": format!("https://github.com/{}/{}/releases/tag/{}", OWNER, REPO, name),
        })
    }

    pub fn asset(&self, id: u64, name: &str, size: usize, node_id: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "url": format!("{}/repos/{}/{}/releases/assets/{}", self.uri(), OWNER, REPO, id),
            "size": size,
            "node_id": node_id,
            "browser_download_url": format!("https://github.com/{}/{}/releases/download/{}", OWNER, REPO, name),
        })
    }

    pub async fn mount_releases(&self, releases: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/{}/{}/releases", OWNER, REPO)))
            .respond_with(ResponseTemplate::new(200).set_body_json(releases))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_assets(&self, release_id: u64, assets: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/{}/{}/releases/{}/assets", OWNER, REPO, release_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(assets))
            .mount(&self.server)
            .await;
    }

    /// Serve `body` for asset `id`, expecting exactly `expected_calls` downloads.
    pub async fn mount_download(&self, id: u64, body: Vec<u8>, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/{}/{}/releases/assets/{}", OWNER, REPO, id)))
            .and(header("accept", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(expected_calls)
            .named(format!("download of asset {}", id))
            .mount(&self.server)
            .await;
    }

    /// Deployed entry names, sorted, for whole-directory assertions.
    pub fn deployed(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.dest)
            .expect("destination exists")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// A post-deploy script that appends a line to `hook.log` per run.
    #[cfg(unix)]
    pub fn hook_script(&self) -> (String, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = self.root.path().join("hook.log");
        let script = self.root.path().join("hook.sh");
        fs::write(&script, format!("#!/bin/sh\necho ran >> '{}'\n", log.display()))
            .expect("write hook");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod hook");
        (script.to_string_lossy().into_owned(), log)
    }
}

#[allow(dead_code)]
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .expect("start zip entry");
        writer.write_all(data).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

#[allow(dead_code)]
pub fn has_staging_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with(git_auto_deploy::deploy::STAGING_PREFIX)
            })
        })
        .unwrap_or(false)
}
