//! Application configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::jobs::discovery::DiscoveryConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// qBittorrent Web UI base URL
    pub qbittorrent_url: String,
    pub qbittorrent_username: String,
    pub qbittorrent_password: String,

    /// Category added torrents are filed under
    pub qbittorrent_category: String,

    /// Save path for added torrents
    pub save_path: String,

    /// RSS search base URL
    pub feed_url: String,

    /// nyaa category (`1_2` is English-translated anime)
    pub feed_category: String,

    /// MyAnimeList API base URL
    pub mal_api_url: String,

    /// MyAnimeList OAuth bearer token
    pub mal_access_token: String,

    /// Idle period between scans
    pub poll_interval: Duration,

    /// Resolution hints passed to the feed search
    pub resolutions: Vec<String>,

    /// Release group hints passed to the feed search
    pub sources: Vec<String>,

    pub user_agent: String,

    /// Log accepted releases instead of adding them
    pub dry_run: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let qbittorrent_url = var("QBITTORRENT_URL", "http://localhost:8080");
        Url::parse(&qbittorrent_url).context("Invalid QBITTORRENT_URL")?;

        let feed_url = var("FEED_URL", "https://nyaa.si");
        Url::parse(&feed_url).context("Invalid FEED_URL")?;

        let mal_api_url = var("MAL_API_URL", "https://api.myanimelist.net/v2");
        Url::parse(&mal_api_url).context("Invalid MAL_API_URL")?;

        Ok(Self {
            qbittorrent_url,
            qbittorrent_username: var("QBITTORRENT_USERNAME", "admin"),
            qbittorrent_password: var("QBITTORRENT_PASSWORD", ""),
            qbittorrent_category: var("QBITTORRENT_CATEGORY", "anime"),

            save_path: var("SAVE_PATH", "./data/downloads"),

            feed_url,
            feed_category: var("FEED_CATEGORY", "1_2"),

            mal_api_url,
            mal_access_token: lookup("MAL_ACCESS_TOKEN").context("MAL_ACCESS_TOKEN is required")?,

            poll_interval: Duration::from_secs(
                var("POLL_INTERVAL_SECS", "900")
                    .parse()
                    .context("Invalid POLL_INTERVAL_SECS")?,
            ),

            resolutions: split_list(&var("QUALITY_RESOLUTIONS", "1080p")),
            sources: split_list(&var("RELEASE_SOURCES", "")),

            user_agent: var(
                "USER_AGENT",
                concat!("episode-scout/", env!("CARGO_PKG_VERSION")),
            ),

            dry_run: var("DRY_RUN", "false")
                .parse()
                .context("Invalid DRY_RUN")?,
        })
    }

    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            category: self.qbittorrent_category.clone(),
            save_path: self.save_path.clone(),
            interval: self.poll_interval,
            resolutions: self.resolutions.clone(),
            sources: self.sources.clone(),
            dry_run: self.dry_run,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("MAL_ACCESS_TOKEN", "token")])).unwrap();
        assert_eq!(config.qbittorrent_url, "http://localhost:8080");
        assert_eq!(config.qbittorrent_category, "anime");
        assert_eq!(config.feed_category, "1_2");
        assert_eq!(config.poll_interval, Duration::from_secs(900));
        assert_eq!(config.resolutions, vec!["1080p"]);
        assert!(config.sources.is_empty());
        assert!(config.user_agent.starts_with("episode-scout/"));
        assert!(!config.dry_run);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("MAL_ACCESS_TOKEN", "token"),
            ("POLL_INTERVAL_SECS", "60"),
            ("QUALITY_RESOLUTIONS", "1080p, 720p"),
            ("RELEASE_SOURCES", "SubsPlease,Erai-raws,"),
            ("DRY_RUN", "true"),
        ]))
        .unwrap();

        let discovery = config.discovery();
        assert_eq!(discovery.interval, Duration::from_secs(60));
        assert_eq!(discovery.resolutions, vec!["1080p", "720p"]);
        assert_eq!(discovery.sources, vec!["SubsPlease", "Erai-raws"]);
        assert!(discovery.dry_run);
    }

    #[test]
    fn test_missing_token() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("MAL_ACCESS_TOKEN"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(
            Config::from_lookup(lookup(&[
                ("MAL_ACCESS_TOKEN", "token"),
                ("POLL_INTERVAL_SECS", "soon"),
            ]))
            .is_err()
        );
        assert!(
            Config::from_lookup(lookup(&[
                ("MAL_ACCESS_TOKEN", "token"),
                ("QBITTORRENT_URL", "not a url"),
            ]))
            .is_err()
        );
    }
}
