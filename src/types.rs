use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A release as listed by `GET /repos/{owner}/{repo}/releases`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    #[serde(default)]
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    /// Drafts have no publication date.
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    pub assets_url: String,
    #[serde(default)]
    pub html_url: String,
}

/// A release asset as listed by the release's `assets_url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    /// API endpoint that serves the bytes when asked for `application/octet-stream`.
    pub url: String,
    pub size: u64,
    /// Content identity token, changes whenever the asset is re-uploaded.
    #[serde(rename = "node_id")]
    pub id: String,
    #[serde(rename = "browser_download_url", default)]
    pub download_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    pub id: u64,
    #[serde(default)]
    pub account: Option<InstallationAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationAccount {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Response of `GET /app`, only used by the key check.
#[derive(Debug, Clone, Deserialize)]
pub struct AppInfo {
    pub id: u64,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    StaticToken,
    InstalledApp,
}

/// A ready-to-send `Authorization` header value and how long it stays valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub mode: AuthMode,
}

impl Credential {
    /// True once `now` is within `margin` of the expiry.
    pub fn is_expired(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now + margin >= self.expires_at
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_with_null_name_and_date() {
        let release: Release = serde_json::from_str(
            r#"{"id": 7, "name": null, "published_at": null, "prerelease": false,
                "draft": true, "assets_url": "https://x/assets", "html_url": "https://x"}"#,
        )
        .unwrap();
        assert_eq!(release.name, "");
        assert!(release.published_at.is_none());
        assert!(release.draft);
    }

    #[test]
    fn test_asset_field_names() {
        let asset: Asset = serde_json::from_str(
            r#"{"name": "tool.zip", "url": "https://api/assets/1", "size": 100,
                "node_id": "abc", "browser_download_url": "https://dl/tool.zip"}"#,
        )
        .unwrap();
        assert_eq!(asset.id, "abc");
        assert_eq!(asset.size, 100);
        assert_eq!(asset.download_url, "https://dl/tool.zip");
    }

    #[test]
    fn test_credential_expiry_margin() {
        let now = Utc::now();
        let credential = Credential {
            value: "token x".to_string(),
            expires_at: now + chrono::Duration::seconds(20),
            mode: AuthMode::StaticToken,
        };
        assert!(!credential.is_expired(now, chrono::Duration::zero()));
        assert!(credential.is_expired(now, chrono::Duration::seconds(30)));
    }
}
