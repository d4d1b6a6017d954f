//! Release feed search over nyaa's RSS endpoint
//!
//! This service handles:
//! - Building a search query from a watch entry's titles and quality hints
//! - Fetching the RSS feed with retry on transient failures
//! - Parsing RSS XML into [`FeedItem`]s

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, info};

use super::rate_limiter::{RateLimitedClient, RetryConfig, retry_async};
use crate::error::{DiscoveryError, Result};

const SERVICE: &str = "nyaa";

/// One release as advertised by the feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    /// Torrent or magnet link handed to the torrent client
    pub link: String,
    pub seeders: u32,
    pub publish_date: Option<DateTime<Utc>>,
}

/// Search options for one watch entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// Alternate titles, any of which may match
    pub titles: Vec<String>,
    /// Resolution hints such as `1080p`
    pub resolutions: Vec<String>,
    /// Release group hints
    pub sources: Vec<String>,
}

impl SearchQuery {
    /// Render as nyaa search syntax: `("t1"|"t2") (1080p|720p) (GroupA|GroupB)`.
    ///
    /// Empty lists are left out.
    pub fn to_search_string(&self) -> String {
        let titles: Vec<String> = self
            .titles
            .iter()
            .map(|t| t.replace('"', " ").trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{t}\""))
            .collect();

        [titles, self.resolutions.clone(), self.sources.clone()]
            .into_iter()
            .filter(|group| !group.is_empty())
            .map(|group| format!("({})", group.join("|")))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Searches for releases
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<FeedItem>>;
}

/// nyaa.si RSS search
pub struct NyaaFeed {
    client: RateLimitedClient,
    base_url: String,
    category: String,
    retry: RetryConfig,
}

impl NyaaFeed {
    pub fn new(client: RateLimitedClient, base_url: &str, category: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            category: category.to_string(),
            retry: RetryConfig::default(),
        }
    }

    async fn fetch(&self, search: &str) -> Result<String> {
        let query = [
            ("page", "rss"),
            ("q", search),
            ("c", self.category.as_str()),
            ("f", "0"),
        ];
        let response = self
            .client
            .get_with_query(&format!("{}/", self.base_url), &query)
            .await?;
        let response = self.client.check_status(response)?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl FeedSource for NyaaFeed {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<FeedItem>> {
        let search = query.to_search_string();
        info!(query = %search, "Searching release feed");

        let content = retry_async(|| self.fetch(&search), &self.retry, "nyaa search").await?;
        parse_feed(&content)
    }
}

/// Parse RSS XML content into items.
///
/// Items without a title or link are skipped; a missing or malformed seeder
/// count reads as zero.
pub fn parse_feed(content: &str) -> Result<Vec<FeedItem>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current_item: Option<RssItemBuilder> = None;
    let mut current_tag = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag_name == "item" {
                    current_item = Some(RssItemBuilder::default());
                }
                current_tag = tag_name;
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"item"
                    && let Some(builder) = current_item.take()
                    && let Some(item) = builder.build()
                {
                    items.push(item);
                }
                current_tag.clear();
            }
            Ok(Event::Text(ref e)) => {
                if let Some(ref mut builder) = current_item {
                    let text = e
                        .unescape()
                        .map_err(|err| DiscoveryError::decode(SERVICE, err.to_string()))?
                        .to_string();
                    builder.set(&current_tag, text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(ref mut builder) = current_item {
                    let text = String::from_utf8_lossy(e.as_ref()).to_string();
                    builder.set(&current_tag, text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DiscoveryError::decode(SERVICE, e.to_string())),
            _ => {}
        }
    }

    debug!(count = items.len(), "Parsed items from RSS feed");
    Ok(items)
}

/// Parse RSS date format (RFC 2822)
fn parse_rss_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = ["%a, %d %b %Y %H:%M:%S GMT", "%Y-%m-%d %H:%M:%S"];
    for fmt in formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }

    debug!(date = %s, "Failed to parse RSS date");
    None
}

/// Builder for RSS items during parsing
#[derive(Default)]
struct RssItemBuilder {
    title: Option<String>,
    link: Option<String>,
    pub_date: Option<String>,
    seeders: Option<String>,
}

impl RssItemBuilder {
    fn set(&mut self, tag: &str, text: String) {
        match tag {
            "title" => self.title = Some(text),
            "link" => self.link = Some(text),
            "pubDate" => self.pub_date = Some(text),
            "nyaa:seeders" => self.seeders = Some(text),
            _ => {}
        }
    }

    fn build(self) -> Option<FeedItem> {
        let title = self.title?;
        let link = self.link?;

        Some(FeedItem {
            seeders: self
                .seeders
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
            publish_date: self.pub_date.and_then(|s| parse_rss_date(&s)),
            title,
            link,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_feed() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss xmlns:atom="http://www.w3.org/2005/Atom" xmlns:nyaa="https://nyaa.si/xmlns/nyaa" version="2.0">
        <channel>
            <title>Nyaa - Home - Torrent File RSS</title>
            <item>
                <title>[SubsPlease] Sousou no Frieren - 07 (1080p) [A1B2C3D4].mkv</title>
                <link>https://nyaa.si/download/1700001.torrent</link>
                <guid isPermaLink="true">https://nyaa.si/view/1700001</guid>
                <pubDate>Fri, 20 Oct 2023 16:03:12 -0000</pubDate>
                <nyaa:seeders>1520</nyaa:seeders>
                <nyaa:leechers>34</nyaa:leechers>
            </item>
            <item>
                <title><![CDATA[[Judas] Vinland Saga (Season 2) [1080p][Batch]]]></title>
                <link>https://nyaa.si/download/1700002.torrent</link>
                <pubDate>not a date</pubDate>
            </item>
            <item>
                <link>https://nyaa.si/download/1700003.torrent</link>
            </item>
        </channel>
        </rss>
        "#;

        let items = parse_feed(content).unwrap();
        assert_eq!(items.len(), 2);

        assert_eq!(
            items[0],
            FeedItem {
                title: "[SubsPlease] Sousou no Frieren - 07 (1080p) [A1B2C3D4].mkv".to_string(),
                link: "https://nyaa.si/download/1700001.torrent".to_string(),
                seeders: 1520,
                publish_date: Some(Utc.with_ymd_and_hms(2023, 10, 20, 16, 3, 12).unwrap()),
            }
        );

        assert_eq!(items[1].title, "[Judas] Vinland Saga (Season 2) [1080p][Batch]");
        assert_eq!(items[1].seeders, 0);
        assert_eq!(items[1].publish_date, None);
    }

    #[test]
    fn test_parse_feed_escaped_title() {
        let content = r#"<rss><channel><item>
            <title>Kaguya-sama &amp; Friends - 03</title>
            <link>magnet:?xt=urn:btih:abc&amp;dn=x</link>
            <nyaa:seeders>3</nyaa:seeders>
        </item></channel></rss>"#;

        let items = parse_feed(content).unwrap();
        assert_eq!(items[0].title, "Kaguya-sama & Friends - 03");
        assert_eq!(items[0].link, "magnet:?xt=urn:btih:abc&dn=x");
        assert_eq!(items[0].seeders, 3);
    }

    #[test]
    fn test_parse_empty_channel() {
        let items = parse_feed("<rss><channel><title>empty</title></channel></rss>").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_search_string() {
        let query = SearchQuery {
            titles: vec!["Sousou no Frieren".to_string(), "Frieren: \"Beyond\"".to_string()],
            resolutions: vec!["1080p".to_string(), "720p".to_string()],
            sources: vec!["SubsPlease".to_string(), "Erai-raws".to_string()],
        };
        assert_eq!(
            query.to_search_string(),
            r#"("Sousou no Frieren"|"Frieren:  Beyond") (1080p|720p) (SubsPlease|Erai-raws)"#
        );
    }

    #[test]
    fn test_search_string_skips_empty_groups() {
        let query = SearchQuery {
            titles: vec!["Dandadan".to_string()],
            ..Default::default()
        };
        assert_eq!(query.to_search_string(), r#"("Dandadan")"#);
    }
}
