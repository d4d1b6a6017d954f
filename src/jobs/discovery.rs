//! Discovery job: find and add new episodes for the watch list
//!
//! Each scan:
//! 1. Re-tags torrents in the download category from their names
//! 2. Fetches the currently watching list
//! 3. Per entry, reads the latest progression tag off existing torrents,
//!    searches the feed and adds every release that moves progression forward
//!
//! Scans run back to back with an idle period in between until the
//! cancellation token fires.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DiscoveryError, Result};
use crate::services::anime_list::{AnimeListSource, WatchEntry};
use crate::services::qbittorrent::{AddTorrentRequest, TorrentClient, TorrentFilter};
use crate::services::release_filter::select_from_feed;
use crate::services::release_parser;
use crate::services::rss::{FeedSource, SearchQuery};
use crate::services::tag::{Tag, parse_progress_tags, series_tag};

/// Settings for the discovery job
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Category added torrents are filed under, and the one re-tagged on refresh
    pub category: String,
    pub save_path: String,
    /// Idle period between scans
    pub interval: Duration,
    pub resolutions: Vec<String>,
    pub sources: Vec<String>,
    /// Log accepted releases instead of adding them
    pub dry_run: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            category: "anime".to_string(),
            save_path: "./data/downloads".to_string(),
            interval: Duration::from_secs(900),
            resolutions: vec!["1080p".to_string()],
            sources: Vec::new(),
            dry_run: false,
        }
    }
}

/// Counters for one scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub entries: usize,
    pub searched: usize,
    pub accepted: usize,
    pub added: usize,
    /// Entries with nothing new
    pub skipped: usize,
    /// Entries that failed with a non-fatal error
    pub failed: usize,
}

/// Race a collaborator call against cancellation.
async fn checkpoint<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiscoveryError::Cancelled),
        result = operation => result,
    }
}

pub struct DiscoveryJob {
    anime_list: Arc<dyn AnimeListSource>,
    feed: Arc<dyn FeedSource>,
    torrents: Arc<dyn TorrentClient>,
    config: DiscoveryConfig,
}

impl DiscoveryJob {
    pub fn new(
        anime_list: Arc<dyn AnimeListSource>,
        feed: Arc<dyn FeedSource>,
        torrents: Arc<dyn TorrentClient>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            anime_list,
            feed,
            torrents,
            config,
        }
    }

    /// Scan immediately, then once per interval, until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            job = "discovery",
            interval_secs = self.config.interval.as_secs(),
            dry_run = self.config.dry_run,
            "Starting discovery poller"
        );

        loop {
            match self.scan(&cancel).await {
                Ok(_) => {}
                Err(DiscoveryError::Cancelled) => break,
                Err(e) => {
                    error!(job = "discovery", error = %e, "Discovery scan aborted");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!(job = "discovery", "Discovery poller stopped");
    }

    /// Run a single scan over the whole watch list.
    ///
    /// Authentication failures and cancellation abort the scan; any other
    /// failure only skips the entry it happened on.
    pub async fn scan(&self, cancel: &CancellationToken) -> Result<ScanSummary> {
        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }

        match self.refresh_tags(cancel).await {
            Ok(0) => {}
            Ok(tagged) => info!(job = "discovery", tagged, "Refreshed torrent tags"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(job = "discovery", error = %e, "Failed to refresh torrent tags"),
        }

        let entries = checkpoint(cancel, self.anime_list.currently_watching()).await?;
        let mut summary = ScanSummary {
            entries: entries.len(),
            ..Default::default()
        };

        for entry in &entries {
            if let Err(e) = self.process_entry(entry, cancel, &mut summary).await {
                if e.is_fatal() {
                    return Err(e);
                }
                summary.failed += 1;
                warn!(
                    job = "discovery",
                    title = %entry.display_title(),
                    error = %e,
                    "Failed to process watch entry"
                );
            }
        }

        info!(
            job = "discovery",
            entries = summary.entries,
            searched = summary.searched,
            accepted = summary.accepted,
            added = summary.added,
            skipped = summary.skipped,
            failed = summary.failed,
            "Discovery scan complete"
        );

        Ok(summary)
    }

    async fn process_entry(
        &self,
        entry: &WatchEntry,
        cancel: &CancellationToken,
        summary: &mut ScanSummary,
    ) -> Result<()> {
        let Some(primary_title) = entry.titles.first() else {
            warn!(job = "discovery", "Watch entry has no titles, skipping");
            summary.skipped += 1;
            return Ok(());
        };

        let latest = self.latest_tag(entry, cancel).await?;

        let query = SearchQuery {
            titles: entry.titles.clone(),
            resolutions: self.config.resolutions.clone(),
            sources: self.config.sources.clone(),
        };
        let items = checkpoint(cancel, self.feed.search(&query)).await?;
        summary.searched += 1;

        let accepted = select_from_feed(entry, items, &latest);
        if accepted.is_empty() {
            debug!(job = "discovery", title = %primary_title, latest = %latest, "No new releases");
            summary.skipped += 1;
            return Ok(());
        }
        summary.accepted += accepted.len();

        for candidate in accepted {
            let tags = candidate.metadata.retitled(primary_title).torrent_tags();

            if self.config.dry_run {
                info!(
                    job = "discovery",
                    title = %primary_title,
                    release = %candidate.item.title,
                    tag = %candidate.metadata.tag,
                    "Dry run, not adding release"
                );
                continue;
            }

            let request = AddTorrentRequest {
                urls: vec![candidate.item.link.clone()],
                tags,
                category: self.config.category.clone(),
                save_path: self.config.save_path.clone(),
                name: None,
            };
            checkpoint(cancel, self.torrents.add_torrent(&request)).await?;
            summary.added += 1;

            info!(
                job = "discovery",
                title = %primary_title,
                release = %candidate.item.title,
                tag = %candidate.metadata.tag,
                seeders = candidate.item.seeders,
                "Added release"
            );
        }

        Ok(())
    }

    /// Highest progression tag on any torrent carrying one of the entry's series tags.
    pub async fn latest_tag(&self, entry: &WatchEntry, cancel: &CancellationToken) -> Result<Tag> {
        let mut series_tags: Vec<String> = Vec::new();
        for title in &entry.titles {
            let tag = series_tag(title);
            if !series_tags.contains(&tag) {
                series_tags.push(tag);
            }
        }

        let mut tags = Vec::new();
        for tag in &series_tags {
            let torrents = checkpoint(cancel, self.torrents.list(&TorrentFilter::tag(tag))).await?;
            tags.extend(torrents.iter().flat_map(|t| parse_progress_tags(&t.tags)));
        }

        Ok(Tag::latest(tags))
    }

    /// Tag torrents in the download category from their names.
    ///
    /// Returns how many torrents were tagged. Torrents that already carry a
    /// progression tag are left alone.
    pub async fn refresh_tags(&self, cancel: &CancellationToken) -> Result<usize> {
        let torrents = checkpoint(
            cancel,
            self.torrents
                .list(&TorrentFilter::category(&self.config.category)),
        )
        .await?;

        let mut missing_by_tags: BTreeMap<Vec<String>, Vec<String>> = BTreeMap::new();
        for torrent in torrents {
            if parse_progress_tags(&torrent.tags).next().is_some() {
                continue;
            }

            let metadata = release_parser::parse(&torrent.name);
            if metadata.title.is_empty() {
                continue;
            }

            let missing: Vec<String> = metadata
                .torrent_tags()
                .into_iter()
                .filter(|t| !torrent.tags.contains(t))
                .collect();
            if !missing.is_empty() {
                missing_by_tags.entry(missing).or_default().push(torrent.hash);
            }
        }

        let mut tagged = 0;
        for (tags, hashes) in missing_by_tags {
            debug!(job = "discovery", tags = ?tags, count = hashes.len(), "Adding missing tags");
            checkpoint(cancel, self.torrents.add_torrent_tags(&hashes, &tags)).await?;
            tagged += hashes.len();
        }

        Ok(tagged)
    }
}
