//! Watch list source
//!
//! [`MyAnimeList`] reads the user's "currently watching" list through the
//! MyAnimeList v2 API. [`CachedAnimeList`] wraps any source and keeps the
//! last good list around for when the service stays down.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::rate_limiter::RateLimitedClient;
use crate::error::{DiscoveryError, Result};

const SERVICE: &str = "myanimelist";
const PAGE_SIZE: &str = "100";
const FIELDS: &str = "alternative_titles,status,start_date,num_episodes";

/// Airing state of a show
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AiringStatus {
    #[default]
    Unknown,
    Airing,
    Aired,
}

impl AiringStatus {
    fn from_mal(status: Option<&str>) -> Self {
        match status {
            Some("finished_airing") => AiringStatus::Aired,
            Some("currently_airing") => AiringStatus::Airing,
            _ => AiringStatus::Unknown,
        }
    }
}

/// One show being tracked
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchEntry {
    /// Alternate titles, most canonical first
    pub titles: Vec<String>,
    pub airing_status: AiringStatus,
    pub start_date: Option<DateTime<Utc>>,
    /// Announced episode count, 0 when unknown
    pub num_episodes: u32,
}

impl WatchEntry {
    pub fn display_title(&self) -> &str {
        self.titles.first().map(String::as_str).unwrap_or("<untitled>")
    }
}

/// Provides the shows currently being watched
#[async_trait]
pub trait AnimeListSource: Send + Sync {
    async fn currently_watching(&self) -> Result<Vec<WatchEntry>>;
}

// MyAnimeList API response types

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    data: Vec<ListNode>,
    #[serde(default)]
    paging: Paging,
}

#[derive(Debug, Default, Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListNode {
    node: MalAnime,
}

#[derive(Debug, Deserialize)]
struct MalAnime {
    title: String,
    #[serde(default)]
    alternative_titles: Option<AlternativeTitles>,
    status: Option<String>,
    start_date: Option<String>,
    #[serde(default)]
    num_episodes: u32,
}

#[derive(Debug, Default, Deserialize)]
struct AlternativeTitles {
    #[serde(default)]
    synonyms: Vec<String>,
    en: Option<String>,
    ja: Option<String>,
}

impl From<MalAnime> for WatchEntry {
    fn from(anime: MalAnime) -> Self {
        let alternative = anime.alternative_titles.unwrap_or_default();

        let mut titles: Vec<String> = Vec::new();
        let candidates = std::iter::once(anime.title)
            .chain(alternative.en)
            .chain(alternative.ja)
            .chain(alternative.synonyms);
        for title in candidates {
            let title = title.trim().to_string();
            if !title.is_empty() && !titles.contains(&title) {
                titles.push(title);
            }
        }

        WatchEntry {
            titles,
            airing_status: AiringStatus::from_mal(anime.status.as_deref()),
            start_date: anime.start_date.as_deref().and_then(parse_start_date),
            num_episodes: anime.num_episodes,
        }
    }
}

/// Parse `YYYY-MM-DD`, `YYYY-MM` or `YYYY` as midnight UTC of the first
/// matching day.
fn parse_start_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01-01"), "%Y-%m-%d"))
        .ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// MyAnimeList v2 API client
pub struct MyAnimeList {
    client: RateLimitedClient,
    base_url: String,
    access_token: String,
}

impl MyAnimeList {
    pub fn new(client: RateLimitedClient, base_url: &str, access_token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    async fn fetch_page(&self, url: &str, query: &[(&str, &str)]) -> Result<ListPage> {
        let bearer = format!("Bearer {}", self.access_token);
        let response = self
            .client
            .get_with_headers_and_query(url, &[("Authorization", bearer.as_str())], query)
            .await?;

        if response.status().as_u16() == 401 {
            return Err(DiscoveryError::Authentication { service: SERVICE });
        }
        let response = self.client.check_status(response)?;

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| DiscoveryError::decode(SERVICE, e.to_string()))
    }
}

#[async_trait]
impl AnimeListSource for MyAnimeList {
    async fn currently_watching(&self) -> Result<Vec<WatchEntry>> {
        let first_url = format!("{}/users/@me/animelist", self.base_url);
        let query = [
            ("status", "watching"),
            ("fields", FIELDS),
            ("limit", PAGE_SIZE),
        ];

        let mut page = self.fetch_page(&first_url, &query).await?;
        let mut entries: Vec<WatchEntry> = Vec::new();

        loop {
            entries.extend(page.data.into_iter().map(|n| WatchEntry::from(n.node)));
            match page.paging.next {
                Some(next) => {
                    debug!(url = %next, "Fetching next watch list page");
                    page = self.fetch_page(&next, &[]).await?;
                }
                None => break,
            }
        }

        info!(count = entries.len(), "Fetched watch list");
        Ok(entries)
    }
}

#[derive(Default)]
struct CacheState {
    last_good: Option<Vec<WatchEntry>>,
    consecutive_failures: u32,
}

/// Keeps the last successful watch list.
///
/// A single failure is reported as-is; once failures repeat on consecutive
/// calls the cached list is served instead, until the source recovers.
pub struct CachedAnimeList<S> {
    inner: S,
    state: Mutex<CacheState>,
}

impl<S: AnimeListSource> CachedAnimeList<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            state: Mutex::new(CacheState::default()),
        }
    }
}

#[async_trait]
impl<S: AnimeListSource> AnimeListSource for CachedAnimeList<S> {
    async fn currently_watching(&self) -> Result<Vec<WatchEntry>> {
        match self.inner.currently_watching().await {
            Ok(entries) => {
                let mut state = self.state.lock();
                state.last_good = Some(entries.clone());
                state.consecutive_failures = 0;
                Ok(entries)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let mut state = self.state.lock();
                state.consecutive_failures += 1;
                match (&state.last_good, state.consecutive_failures) {
                    (Some(cached), failures) if failures > 1 => {
                        warn!(error = %e, failures, "Watch list unavailable, using cached list");
                        Ok(cached.clone())
                    }
                    _ => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    #[test]
    fn test_parse_list_page() {
        let body = r#"{
            "data": [
                {
                    "node": {
                        "id": 52991,
                        "title": "Sousou no Frieren",
                        "alternative_titles": {
                            "synonyms": ["Frieren at the Funeral", "Sousou no Frieren"],
                            "en": "Frieren: Beyond Journey's End",
                            "ja": "葬送のフリーレン"
                        },
                        "status": "finished_airing",
                        "start_date": "2023-09-29",
                        "num_episodes": 28
                    },
                    "list_status": { "status": "watching" }
                },
                {
                    "node": {
                        "id": 1,
                        "title": "Untitled Sequel",
                        "alternative_titles": { "synonyms": [], "en": "", "ja": "" },
                        "status": "not_yet_aired",
                        "start_date": "2026-10",
                        "num_episodes": 0
                    }
                }
            ],
            "paging": { "next": "https://api.myanimelist.net/v2/users/@me/animelist?offset=100" }
        }"#;

        let page: ListPage = serde_json::from_str(body).unwrap();
        assert_eq!(
            page.paging.next.as_deref(),
            Some("https://api.myanimelist.net/v2/users/@me/animelist?offset=100")
        );

        let entries: Vec<WatchEntry> = page.data.into_iter().map(|n| n.node.into()).collect();
        assert_eq!(
            entries[0],
            WatchEntry {
                titles: vec![
                    "Sousou no Frieren".to_string(),
                    "Frieren: Beyond Journey's End".to_string(),
                    "葬送のフリーレン".to_string(),
                    "Frieren at the Funeral".to_string(),
                ],
                airing_status: AiringStatus::Aired,
                start_date: Some(Utc.with_ymd_and_hms(2023, 9, 29, 0, 0, 0).unwrap()),
                num_episodes: 28,
            }
        );
        assert_eq!(entries[1].titles, vec!["Untitled Sequel"]);
        assert_eq!(entries[1].airing_status, AiringStatus::Unknown);
        assert_eq!(
            entries[1].start_date,
            Some(Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_last_page() {
        let page: ListPage = serde_json::from_str(r#"{"data": [], "paging": {}}"#).unwrap();
        assert!(page.data.is_empty());
        assert!(page.paging.next.is_none());
    }

    #[test]
    fn test_parse_start_date() {
        assert_eq!(
            parse_start_date("2024"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_start_date("2024-04-06"),
            Some(Utc.with_ymd_and_hms(2024, 4, 6, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_start_date(""), None);
        assert_eq!(parse_start_date("soon"), None);
    }

    #[test]
    fn test_airing_status_mapping() {
        assert_eq!(AiringStatus::from_mal(Some("currently_airing")), AiringStatus::Airing);
        assert_eq!(AiringStatus::from_mal(Some("finished_airing")), AiringStatus::Aired);
        assert_eq!(AiringStatus::from_mal(Some("not_yet_aired")), AiringStatus::Unknown);
        assert_eq!(AiringStatus::from_mal(None), AiringStatus::Unknown);
    }

    struct Scripted {
        responses: Mutex<VecDeque<Result<Vec<WatchEntry>>>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Vec<WatchEntry>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl AnimeListSource for Scripted {
        async fn currently_watching(&self) -> Result<Vec<WatchEntry>> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(DiscoveryError::Unavailable("script exhausted".into())))
        }
    }

    fn outage() -> Result<Vec<WatchEntry>> {
        Err(DiscoveryError::Status {
            service: SERVICE,
            status: 503,
        })
    }

    fn frieren() -> WatchEntry {
        WatchEntry {
            titles: vec!["Sousou no Frieren".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cache_serves_last_good_list_on_repeated_failures() {
        let cached = CachedAnimeList::new(Scripted::new(vec![
            Ok(vec![frieren()]),
            outage(),
            outage(),
            outage(),
            Ok(Vec::new()),
            outage(),
        ]));

        assert_eq!(cached.currently_watching().await.unwrap(), vec![frieren()]);
        assert_matches!(
            cached.currently_watching().await,
            Err(DiscoveryError::Status { status: 503, .. })
        );
        assert_eq!(cached.currently_watching().await.unwrap(), vec![frieren()]);
        assert_eq!(cached.currently_watching().await.unwrap(), vec![frieren()]);
        assert!(cached.currently_watching().await.unwrap().is_empty());
        assert_matches!(cached.currently_watching().await, Err(DiscoveryError::Status { .. }));
    }

    #[tokio::test]
    async fn test_cache_without_history_propagates() {
        let cached = CachedAnimeList::new(Scripted::new(vec![outage(), outage()]));
        assert!(cached.currently_watching().await.is_err());
        assert!(cached.currently_watching().await.is_err());
    }

    #[tokio::test]
    async fn test_cache_never_hides_authentication_failures() {
        let cached = CachedAnimeList::new(Scripted::new(vec![
            Ok(vec![frieren()]),
            Err(DiscoveryError::Authentication { service: SERVICE }),
            Err(DiscoveryError::Authentication { service: SERVICE }),
        ]));

        cached.currently_watching().await.unwrap();
        assert_matches!(
            cached.currently_watching().await,
            Err(DiscoveryError::Authentication { .. })
        );
        assert_matches!(
            cached.currently_watching().await,
            Err(DiscoveryError::Authentication { .. })
        );
    }
}
