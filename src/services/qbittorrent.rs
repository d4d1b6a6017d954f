//! qBittorrent Web API client
//!
//! Torrent tags are the only record of what has been downloaded, so this
//! client only needs to list, add and tag torrents.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Response;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::rate_limiter::RateLimitedClient;
use crate::error::{DiscoveryError, Result};

const SERVICE: &str = "qbittorrent";

/// A torrent known to the client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Torrent {
    pub name: String,
    pub category: String,
    pub hash: String,
    pub tags: Vec<String>,
}

/// Restricts [`TorrentClient::list`]; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorrentFilter {
    pub category: Option<String>,
    pub tag: Option<String>,
}

impl TorrentFilter {
    pub fn category(category: &str) -> Self {
        Self {
            category: Some(category.to_string()),
            tag: None,
        }
    }

    pub fn tag(tag: &str) -> Self {
        Self {
            category: None,
            tag: Some(tag.to_string()),
        }
    }

    /// Whether `torrent` passes this filter
    pub fn matches(&self, torrent: &Torrent) -> bool {
        self.category.as_ref().is_none_or(|c| &torrent.category == c)
            && self.tag.as_ref().is_none_or(|t| torrent.tags.contains(t))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddTorrentRequest {
    pub urls: Vec<String>,
    pub tags: Vec<String>,
    pub category: String,
    pub save_path: String,
    pub name: Option<String>,
}

/// The download client
#[async_trait]
pub trait TorrentClient: Send + Sync {
    async fn list(&self, filter: &TorrentFilter) -> Result<Vec<Torrent>>;

    async fn add_torrent(&self, request: &AddTorrentRequest) -> Result<()>;

    async fn add_torrent_tags(&self, hashes: &[String], tags: &[String]) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    name: String,
    hash: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    tags: String,
}

impl From<TorrentInfo> for Torrent {
    fn from(info: TorrentInfo) -> Self {
        Torrent {
            name: info.name,
            category: info.category,
            hash: info.hash,
            tags: split_tags(&info.tags),
        }
    }
}

/// qBittorrent reports tags as one `", "` separated string.
fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Session-cookie client for the qBittorrent Web API (v2)
pub struct QBittorrent {
    client: RateLimitedClient,
    base_url: String,
    username: String,
    password: String,
    logged_in: AtomicBool,
}

impl QBittorrent {
    /// `client` must keep cookies, see [`RateLimitedClient::for_torrent_client`].
    pub fn new(client: RateLimitedClient, base_url: &str, username: &str, password: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            logged_in: AtomicBool::new(false),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, path)
    }

    async fn ensure_session(&self) -> Result<()> {
        if self.logged_in.load(Ordering::Acquire) {
            return Ok(());
        }

        let form = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];
        let response = self
            .client
            .post_form(&self.endpoint("auth/login"), &form)
            .await?;
        let body = self.read_body(response).await?;

        if body.trim() != "Ok." {
            warn!(response = %body.trim(), "qBittorrent login rejected");
            return Err(DiscoveryError::Authentication { service: SERVICE });
        }

        info!(url = %self.base_url, "Logged in to qBittorrent");
        self.logged_in.store(true, Ordering::Release);
        Ok(())
    }

    /// Check the status and read the body, dropping the session on 403.
    async fn read_body(&self, response: Response) -> Result<String> {
        if response.status().as_u16() == 403 {
            self.logged_in.store(false, Ordering::Release);
            return Err(DiscoveryError::Authentication { service: SERVICE });
        }
        let response = self.client.check_status(response)?;
        Ok(response.text().await?)
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<String> {
        self.ensure_session().await?;
        let response = self.client.post_form(&self.endpoint(path), form).await?;
        self.read_body(response).await
    }
}

#[async_trait]
impl TorrentClient for QBittorrent {
    async fn list(&self, filter: &TorrentFilter) -> Result<Vec<Torrent>> {
        self.ensure_session().await?;

        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(category) = &filter.category {
            query.push(("category", category.as_str()));
        }
        if let Some(tag) = &filter.tag {
            query.push(("tag", tag.as_str()));
        }

        let response = self
            .client
            .get_with_query(&self.endpoint("torrents/info"), &query)
            .await?;
        let body = self.read_body(response).await?;

        let infos: Vec<TorrentInfo> =
            serde_json::from_str(&body).map_err(|e| DiscoveryError::decode(SERVICE, e.to_string()))?;
        debug!(count = infos.len(), ?filter, "Listed torrents");
        Ok(infos.into_iter().map(Torrent::from).collect())
    }

    async fn add_torrent(&self, request: &AddTorrentRequest) -> Result<()> {
        let mut form = vec![
            ("urls", request.urls.join("\n")),
            ("tags", request.tags.join(",")),
            ("category", request.category.clone()),
            ("savepath", request.save_path.clone()),
        ];
        if let Some(name) = &request.name {
            form.push(("rename", name.clone()));
        }

        let body = self.post("torrents/add", &form).await?;
        if body.trim() == "Fails." {
            return Err(DiscoveryError::Unavailable(format!(
                "qbittorrent refused to add {}",
                request.urls.join(", ")
            )));
        }
        Ok(())
    }

    async fn add_torrent_tags(&self, hashes: &[String], tags: &[String]) -> Result<()> {
        if hashes.is_empty() || tags.is_empty() {
            return Ok(());
        }

        let form = [("hashes", hashes.join("|")), ("tags", tags.join(","))];
        self.post("torrents/addTags", &form).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_torrent_info() {
        let body = r#"[
            {
                "name": "[SubsPlease] Sousou no Frieren - 07 (1080p) [A1B2C3D4].mkv",
                "hash": "8c4f0f2b",
                "category": "anime",
                "tags": "!sousou no frieren, S1E7",
                "progress": 1.0
            },
            {
                "name": "untagged",
                "hash": "ffff",
                "category": "",
                "tags": ""
            }
        ]"#;

        let torrents: Vec<Torrent> = serde_json::from_str::<Vec<TorrentInfo>>(body)
            .unwrap()
            .into_iter()
            .map(Torrent::from)
            .collect();

        assert_eq!(
            torrents[0],
            Torrent {
                name: "[SubsPlease] Sousou no Frieren - 07 (1080p) [A1B2C3D4].mkv".to_string(),
                category: "anime".to_string(),
                hash: "8c4f0f2b".to_string(),
                tags: vec!["!sousou no frieren".to_string(), "S1E7".to_string()],
            }
        );
        assert!(torrents[1].tags.is_empty());
    }

    #[test]
    fn test_filter_matches() {
        let torrent = Torrent {
            name: "x".to_string(),
            category: "anime".to_string(),
            hash: "h".to_string(),
            tags: vec!["!dandadan".to_string(), "S1E3".to_string()],
        };

        assert!(TorrentFilter::default().matches(&torrent));
        assert!(TorrentFilter::category("anime").matches(&torrent));
        assert!(!TorrentFilter::category("tv").matches(&torrent));
        assert!(TorrentFilter::tag("!dandadan").matches(&torrent));
        assert!(!TorrentFilter::tag("!dandadan s2").matches(&torrent));
    }

    #[test]
    fn test_endpoint() {
        let client = RateLimitedClient::for_torrent_client("test").unwrap();
        let qbit = QBittorrent::new(client, "http://localhost:8080/", "admin", "");
        assert_eq!(qbit.endpoint("auth/login"), "http://localhost:8080/api/v2/auth/login");
    }
}
