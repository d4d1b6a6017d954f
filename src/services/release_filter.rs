//! Release filtering pipeline
//!
//! Turns a raw feed search into the ordered list of releases worth adding:
//! 1. viability filter (seeded, published after the premiere, within the
//!    announced episode count, title agrees with the watch entry)
//! 2. sort by progression, then title similarity, resolution and seeders
//! 3. batch policy (finished shows with nothing downloaded prefer batches,
//!    everything else only takes single episodes)
//! 4. progression scan against the latest tag already downloaded

use std::cmp::Ordering;

use tracing::debug;

use super::anime_list::{AiringStatus, WatchEntry};
use super::release_parser::{self, Metadata};
use super::rss::FeedItem;
use super::tag::Tag;
use super::text_utils::{best_similarity, titles_match_by_word_prefix};

/// A feed item together with what its title says about it
#[derive(Debug, Clone)]
pub struct ParsedCandidate {
    pub metadata: Metadata,
    pub item: FeedItem,
}

impl ParsedCandidate {
    pub fn new(item: FeedItem) -> Self {
        Self {
            metadata: release_parser::parse(&item.title),
            item,
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.metadata.tag
    }
}

fn rejection_reason(entry: &WatchEntry, candidate: &ParsedCandidate) -> Option<&'static str> {
    if candidate.item.seeders == 0 {
        return Some("no seeders");
    }

    if let (Some(start), Some(published)) = (entry.start_date, candidate.item.publish_date)
        && published < start
    {
        return Some("published before the show started");
    }

    if entry.num_episodes > 0
        && candidate
            .tag()
            .last_episode()
            .is_some_and(|e| e > f64::from(entry.num_episodes))
    {
        return Some("episode beyond the announced count");
    }

    if !entry.titles.is_empty()
        && !entry
            .titles
            .iter()
            .any(|t| titles_match_by_word_prefix(&candidate.metadata.title, t))
    {
        return Some("title does not match the watch entry");
    }

    None
}

/// Parse feed items and drop the ones that cannot belong to `entry`.
pub fn filter_viable(entry: &WatchEntry, items: Vec<FeedItem>) -> Vec<ParsedCandidate> {
    items
        .into_iter()
        .map(ParsedCandidate::new)
        .filter(|candidate| match rejection_reason(entry, candidate) {
            Some(reason) => {
                debug!(
                    release = %candidate.item.title,
                    parsed_title = %candidate.metadata.title,
                    reason,
                    "Dropping non-viable release"
                );
                false
            }
            None => true,
        })
        .collect()
}

/// Order candidates by progression; ties go to the closest title, then the
/// higher resolution, then the better seeded release.
pub fn sort_candidates(entry: &WatchEntry, candidates: Vec<ParsedCandidate>) -> Vec<ParsedCandidate> {
    let mut scored: Vec<(f64, ParsedCandidate)> = candidates
        .into_iter()
        .map(|c| (best_similarity(&c.metadata.title, &entry.titles), c))
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        a.tag()
            .compare(b.tag())
            .then_with(|| score_b.total_cmp(score_a))
            .then_with(|| {
                b.metadata
                    .vertical_resolution
                    .cmp(&a.metadata.vertical_resolution)
            })
            .then_with(|| b.item.seeders.cmp(&a.item.seeders))
    });

    scored.into_iter().map(|(_, c)| c).collect()
}

/// Keep batches for a finished show nothing has been downloaded for yet,
/// otherwise keep only single episodes.
///
/// Unparsed (zero tag) releases never count as "a batch exists", so they
/// cannot crowd out real single-episode releases.
pub fn apply_batch_policy(
    entry: &WatchEntry,
    latest: &Tag,
    candidates: Vec<ParsedCandidate>,
) -> Vec<ParsedCandidate> {
    let prefer_batches = latest.is_zero() && entry.airing_status == AiringStatus::Aired;

    if prefer_batches {
        let has_batch = candidates
            .iter()
            .any(|c| c.tag().is_multi_episode() && !c.tag().is_zero());
        if !has_batch {
            return candidates;
        }
        candidates
            .into_iter()
            .filter(|c| c.tag().is_multi_episode())
            .collect()
    } else {
        candidates
            .into_iter()
            .filter(|c| !c.tag().is_multi_episode())
            .collect()
    }
}

/// Walk sorted candidates keeping only the ones that move progression forward.
///
/// A batch that covers the running tag supersedes every earlier accepted
/// release it contains; when two batches claim the same releases the one
/// scanned last wins.
pub fn scan_progression(latest: &Tag, candidates: Vec<ParsedCandidate>) -> Vec<ParsedCandidate> {
    let mut running = latest.clone();
    let mut accepted: Vec<ParsedCandidate> = Vec::new();

    for candidate in candidates {
        let tag = candidate.tag().clone();

        if !running.is_zero() && running.is_multi_episode() && running.contains(&tag) {
            debug!(release = %candidate.item.title, tag = %tag, running = %running, "Already covered");
            continue;
        }

        if tag.is_multi_episode() && tag.contains(&running) {
            accepted.retain(|previous| {
                let superseded = tag.contains(previous.tag());
                if superseded {
                    debug!(
                        release = %previous.item.title,
                        batch = %candidate.item.title,
                        "Retracting release covered by a wider batch"
                    );
                }
                !superseded
            });
            running = tag;
            accepted.push(candidate);
            continue;
        }

        if tag.compare(&running) != Ordering::Greater {
            debug!(release = %candidate.item.title, tag = %tag, running = %running, "Not newer");
            continue;
        }

        running = tag;
        accepted.push(candidate);
    }

    accepted
}

/// Sort, apply the batch policy and scan for progression.
///
/// `candidates` are expected to have passed [`filter_viable`].
pub fn select_downloadable(
    entry: &WatchEntry,
    candidates: Vec<ParsedCandidate>,
    latest: &Tag,
) -> Vec<ParsedCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let sorted = sort_candidates(entry, candidates);
    let eligible = apply_batch_policy(entry, latest, sorted);
    scan_progression(latest, eligible)
}

/// Full pipeline from raw feed items.
pub fn select_from_feed(entry: &WatchEntry, items: Vec<FeedItem>, latest: &Tag) -> Vec<ParsedCandidate> {
    let viable = filter_viable(entry, items);
    select_downloadable(entry, viable, latest)
}
