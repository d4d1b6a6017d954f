//! Season/episode progression tags
//!
//! A [`Tag`] marks how far a release (or a show's download history) has
//! progressed:
//! - zero tag: nothing known yet
//! - `S1E7`: an exact episode
//! - `S1E1-13`: a batch covering an episode range
//! - `S1` / `S1-2`: whole-season batches
//!
//! Tags are persisted as free-text torrent tags using the same `S..E..`
//! encoding, so [`Tag`] round-trips through [`fmt::Display`] and [`FromStr`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::text_utils::normalize_title_words;

/// Prefix marking a torrent tag as the series link of a watch entry.
pub const SERIES_TAG_PREFIX: char = '!';

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^S(\d+)(?:\s*[-~]\s*S?(\d+))?(?:E(\d+(?:\.\d+)?)(?:\s*[-~]\s*E?(\d+(?:\.\d+)?))?)?$",
    )
    .expect("tag regex is valid")
});

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*[~-]\s*[SE]?(\d+(?:\.\d+)?)").expect("range regex is valid")
});

/// Structured season/episode progression marker.
///
/// Both lists hold zero, one or two values; two values form an inclusive range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub seasons: Vec<u32>,
    pub episodes: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid progression tag: {0:?}")]
pub struct TagParseError(pub String);

impl Tag {
    pub fn new(seasons: Vec<u32>, episodes: Vec<f64>) -> Self {
        Self { seasons, episodes }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn episode(season: u32, episode: f64) -> Self {
        Self::new(vec![season], vec![episode])
    }

    pub fn episode_range(season: u32, first: f64, last: f64) -> Self {
        Self::new(vec![season], vec![first, last])
    }

    /// A whole-season batch.
    pub fn season(season: u32) -> Self {
        Self::new(vec![season], Vec::new())
    }

    pub fn is_zero(&self) -> bool {
        self.seasons.is_empty() && self.episodes.is_empty()
    }

    /// True for batches: an explicit episode range, or no episode at all.
    pub fn is_multi_episode(&self) -> bool {
        self.episodes.len() != 1
    }

    pub fn last_episode(&self) -> Option<f64> {
        self.episodes.last().copied()
    }

    /// Collapse every range to its upper bound (`S1E1-12` -> `S1E12`).
    pub fn merged(&self) -> Tag {
        Tag {
            seasons: self.seasons.last().copied().into_iter().collect(),
            episodes: self.episodes.last().copied().into_iter().collect(),
        }
    }

    fn season_bounds(&self) -> Option<(u32, u32)> {
        let first = *self.seasons.first()?;
        let last = *self.seasons.last()?;
        Some((first.min(last), first.max(last)))
    }

    fn episode_bounds(&self) -> Option<(f64, f64)> {
        let first = *self.episodes.first()?;
        let last = *self.episodes.last()?;
        Some((first.min(last), first.max(last)))
    }

    /// Progression order.
    ///
    /// The zero tag sorts before everything. Ranges order by their upper
    /// bound, seasons before episodes, and a tag that stops short of the other
    /// (a season batch against one of its episodes) sorts after it.
    pub fn compare(&self, other: &Tag) -> Ordering {
        match (self.is_zero(), other.is_zero()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => {
                let (a, b) = (self.merged(), other.merged());
                compare_positional(&a.seasons, &b.seasons, |x, y| x.cmp(y))
                    .then_with(|| compare_positional(&a.episodes, &b.episodes, f64::total_cmp))
            }
        }
    }

    /// Whether this tag already covers `inner`.
    pub fn contains(&self, inner: &Tag) -> bool {
        if self.is_zero() || inner.is_zero() {
            return false;
        }

        if !self.is_multi_episode() {
            return !inner.is_multi_episode() && self.compare(inner) == Ordering::Equal;
        }

        let Some((low, high)) = self.season_bounds() else {
            return false;
        };
        if inner.seasons.is_empty() || !inner.seasons.iter().all(|s| (low..=high).contains(s)) {
            return false;
        }

        match self.episode_bounds() {
            // Season batch covers every episode of its seasons
            None => true,
            Some((first, last)) => {
                !inner.episodes.is_empty()
                    && inner.episodes.iter().all(|e| *e >= first && *e <= last)
            }
        }
    }

    /// The most advanced tag of an iterator, or the zero tag when it is empty.
    pub fn latest<I>(tags: I) -> Tag
    where
        I: IntoIterator<Item = Tag>,
    {
        tags.into_iter().fold(Tag::zero(), |latest, tag| {
            if tag.compare(&latest) == Ordering::Greater {
                tag
            } else {
                latest
            }
        })
    }
}

/// Positional comparison where a strict prefix sorts after the longer list.
fn compare_positional<T>(a: &[T], b: &[T], cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match cmp(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    b.len().cmp(&a.len())
}

fn format_episode(episode: f64) -> String {
    if episode.fract() == 0.0 {
        format!("{}", episode as i64)
    } else {
        format!("{}", episode)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(first) = self.seasons.first() {
            write!(f, "S{}", first)?;
            if let Some(last) = self.seasons.get(1) {
                write!(f, "-{}", last)?;
            }
        }
        if let Some(first) = self.episodes.first() {
            write!(f, "E{}", format_episode(*first))?;
            if let Some(last) = self.episodes.get(1) {
                write!(f, "-{}", format_episode(*last))?;
            }
        }
        Ok(())
    }
}

impl FromStr for Tag {
    type Err = TagParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = TAG_RE
            .captures(s.trim())
            .ok_or_else(|| TagParseError(s.to_string()))?;

        let int = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let float = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());

        let seasons = [int(1), int(2)].into_iter().flatten().collect();
        let episodes = [float(3), float(4)].into_iter().flatten().collect();
        Ok(Tag { seasons, episodes })
    }
}

/// Collapse every `a~b`/`a-b` range of an encoded tag into its upper bound.
pub fn merge_batch(encoded: &str) -> String {
    RANGE_RE.replace_all(encoded, "${2}").into_owned()
}

/// Torrent tag linking a download to the show it was found for.
pub fn series_tag(title: &str) -> String {
    format!("{}{}", SERIES_TAG_PREFIX, normalize_title_words(title).join(" "))
}

/// Pick the progression tags out of a torrent's free-text tags.
pub fn parse_progress_tags(tags: &[String]) -> impl Iterator<Item = Tag> + '_ {
    tags.iter()
        .filter(|t| !t.starts_with(SERIES_TAG_PREFIX))
        .filter_map(|t| t.parse::<Tag>().ok())
}
