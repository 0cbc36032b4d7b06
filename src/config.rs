use crate::error::ConfigError;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "git-auto-deploy";
pub const LOCAL_CONFIG_FILE: &str = "config/default.json";
pub const CONFIG_FILE_NAME: &str = "default.json";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Config file as written by operators. Keys are upper case, empty strings
/// mean "not set".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct RawConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub assetregex: Option<String>,
    #[serde(default)]
    pub destinationdir: Option<String>,
    #[serde(default)]
    pub unzipdir: Option<String>,
    #[serde(default)]
    pub postscript: Option<String>,
    #[serde(default)]
    pub authtoken: Option<String>,
    #[serde(default)]
    pub privatekey: Option<String>,
    #[serde(default)]
    pub appid: Option<NumberOrString>,
    #[serde(default)]
    pub apiurl: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(u64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    Token(String),
    App { private_key: PathBuf, app_id: u64 },
}

/// Validated configuration for one deployment run.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub username: String,
    pub repository: String,
    pub asset_pattern: Regex,
    pub destination_dir: PathBuf,
    pub unzip_dir: Option<PathBuf>,
    pub post_script: Option<String>,
    pub auth: AuthConfig,
    pub api_url: String,
    pub timeout: Duration,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    non_empty(value).ok_or(ConfigError::Missing(key))
}

impl DeployConfig {
    /// Validate a raw config. `env_token` is the fallback static token used
    /// when the file configures no credentials at all.
    pub fn from_raw(raw: RawConfig, env_token: Option<String>) -> Result<Self, ConfigError> {
        let username = required(raw.username, "USERNAME")?;
        let repository = required(raw.repository, "REPOSITORY")?;
        let pattern = required(raw.assetregex, "ASSETREGEX")?;
        let destination_dir = PathBuf::from(required(raw.destinationdir, "DESTINATIONDIR")?);

        let asset_pattern = Regex::new(&pattern)
            .map_err(|source| ConfigError::InvalidPattern { pattern, source })?;

        let app_id = match raw.appid {
            Some(NumberOrString::Number(0)) => return Err(ConfigError::InvalidAppId("0".into())),
            Some(NumberOrString::Number(id)) => Some(id),
            Some(NumberOrString::Text(text)) => match non_empty(Some(text)) {
                Some(text) => Some(
                    text.parse::<u64>()
                        .ok()
                        .filter(|id| *id > 0)
                        .ok_or(ConfigError::InvalidAppId(text))?,
                ),
                None => None,
            },
            None => None,
        };

        let auth = match (non_empty(raw.authtoken), non_empty(raw.privatekey), app_id) {
            (Some(_), Some(_), _) | (Some(_), None, Some(_)) => {
                return Err(ConfigError::ConflictingAuth)
            }
            (Some(token), None, None) => AuthConfig::Token(token),
            (None, Some(key), Some(app_id)) => AuthConfig::App {
                private_key: PathBuf::from(key),
                app_id,
            },
            (None, Some(_), None) | (None, None, Some(_)) => {
                return Err(ConfigError::IncompleteAppAuth)
            }
            (None, None, None) => match non_empty(env_token) {
                Some(token) => {
                    tracing::debug!("No credentials in config file, using GITHUB_TOKEN");
                    AuthConfig::Token(token)
                }
                None => return Err(ConfigError::NoAuth),
            },
        };

        let api_url = non_empty(raw.apiurl)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(DeployConfig {
            username,
            repository,
            asset_pattern,
            destination_dir,
            unzip_dir: non_empty(raw.unzipdir).map(PathBuf::from),
            post_script: non_empty(raw.postscript),
            auth,
            api_url,
            timeout: Duration::from_secs(raw.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1)),
        })
    }

    /// `https://api.github.com/repos/{owner}/{repo}`
    pub fn repo_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_url, self.username, self.repository
        )
    }
}

pub fn parse_config(path: &Path, content: &str) -> Result<RawConfig, ConfigError> {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    if is_yaml {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    } else {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

pub fn load_config(path: &Path) -> Result<DeployConfig, ConfigError> {
    tracing::debug!("Loading config file: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let raw = parse_config(path, &content)?;
    DeployConfig::from_raw(raw, std::env::var("GITHUB_TOKEN").ok())
}

/// `config/default.json` in the working directory when present, otherwise
/// the per-user config directory.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return local;
    }

    match dirs::config_dir() {
        Some(dir) => dir.join(APP_NAME).join(CONFIG_FILE_NAME),
        None => local,
    }
}
