//! Release title parser
//!
//! Turns free-text torrent titles into [`Metadata`]. Handles the common
//! fansub and scene layouts:
//! - "[SubsPlease] Sousou no Frieren - 07 (1080p) [A1B2C3D4].mkv"
//! - "[Erai-raws] Spy x Family - 01 ~ 12 [1080p][Batch]"
//! - "[Judas] Vinland Saga (Season 2) [1080p][HEVC x265 10bit]"
//! - "Show.Name.S01E02.1080p.WEB.x264-GRP"
//! - "Show 2x05 720p"

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::{Match, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tag::{Tag, series_tag};

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid release pattern {pattern:?}: {e}"))
}

static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\.(?:mkv|mp4|avi|m4v|webm|torrent)\s*$"));
static LEADING_GROUP_RE: Lazy<Regex> = Lazy::new(|| compile(r"^\s*\[([^\]]*)\]"));
static BRACKET_RE: Lazy<Regex> = Lazy::new(|| compile(r"\[([^\]]*)\]|\(([^)]*)\)"));
static SEASON_HINT_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)season|\b\d{1,2}(?:st|nd|rd|th)\b|\bS\d{1,2}\b"));
static BRACKETED_EPISODE_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"^\d{1,3}(?:\.\d)?(?:v\d)?(?:\s*[~-]\s*\d{1,3}(?:\.\d)?(?:v\d)?)?$")
});
static BRACKETED_SXXEXX_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?i)^S\d{1,2}\s*EP?\d{1,4}"));

static RESOLUTION_P_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\b(\d{3,4})p\b"));
static RESOLUTION_WXH_RE: Lazy<Regex> = Lazy::new(|| compile(r"\b\d{3,4}x(\d{3,4})\b"));

// Episode patterns, highest priority first
static DASH_EPISODE_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"\s-\s*(\d{1,4}(?:\.\d)?)(?:v\d)?(?:\s*[~-]\s*(\d{1,4}(?:\.\d)?)(?:v\d)?)?(?:\s|$)")
});
static SE_EPISODE_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(?:S\d{1,2}\s*)?EP?\s?(\d{1,4}(?:\.\d)?)(?:v\d)?(?:\s*[~-]\s*(?:S\d{1,2})?(?:EP?)?\s?(\d{1,4}(?:\.\d)?))?(?:v\d)?\b",
    )
});
static NXNN_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(\d{1,2})x(\d{1,3}(?:\.\d)?)(?:\s*[~-]\s*(\d{1,3}(?:\.\d)?))?\b"));

// Season patterns, highest priority first
static ORDINAL_SEASON_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\s+season\b"));
// A spaced " - " after the season belongs to the episode, so a spaced range
// has to repeat the marker: "S1-2", "S1~2", "S1 - S2", "Season 1-2".
static SXX_SEASON_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\bS(\d{1,2})(?:(?:\s*[~-]\s*S|[~-])(\d{1,2}))?(?:\b|EP?\d)")
});
static SEASON_WORD_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\bSeason\s*(\d{1,2})(?:(?:\s*[~-]\s*Season\s*|[~-])(\d{1,2}))?\b")
});
// "No. 8 - 05" is a numbered title, not a season
static BARE_SEASON_RE: Lazy<Regex> = Lazy::new(|| compile(r"[^\d\s.]\s+(\d{1,2})\s+-\s*\d"));

static TRAILING_SEPARATORS_RE: Lazy<Regex> = Lazy::new(|| compile(r"[\s\-:~|,]+$"));
static TRAILING_DIGITS_RE: Lazy<Regex> = Lazy::new(|| compile(r"([^\s.])\s+\d{1,2}$"));
static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| compile(r"\s+"));

/// Structured information extracted from a release title
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Release group from the leading bracket, e.g. `SubsPlease`
    pub source: Option<String>,
    /// Display title with season/episode markers and annotations removed
    pub title: String,
    pub tag: Tag,
    /// Every other bracketed annotation, in title order
    pub labels: Vec<String>,
    /// Vertical resolution in pixels, 0 when unknown
    pub vertical_resolution: u32,
}

impl Metadata {
    /// Copy of this metadata carrying a different display title.
    pub fn retitled(&self, title: &str) -> Metadata {
        let mut copy = self.clone();
        copy.title = title.to_string();
        copy
    }

    /// Torrent tags recording which show this release belongs to and how far
    /// it progresses.
    pub fn torrent_tags(&self) -> Vec<String> {
        let mut tags = vec![series_tag(&self.title)];
        if !self.tag.is_zero() {
            tags.push(self.tag.to_string());
        }
        tags
    }
}

/// A regex hit that produced one or two values.
struct Found<T> {
    values: Vec<T>,
    start: usize,
}

/// Parse a release title.
pub fn parse(raw_title: &str) -> Metadata {
    let trimmed = EXTENSION_RE.replace(raw_title.trim(), "");

    let (source, body) = match LEADING_GROUP_RE.captures(&trimmed) {
        Some(caps) => {
            let group = caps.get(1).map(|m| m.as_str().trim().to_string());
            let rest = &trimmed[caps.get(0).map_or(0, |m| m.end())..];
            (group.filter(|g| !g.is_empty()), rest.to_string())
        }
        None => (None, trimmed.to_string()),
    };

    let title_bracket = find_title_bracket(&body);
    let mut labels = Vec::new();
    let stripped = BRACKET_RE.replace_all(&body, |caps: &regex::Captures<'_>| {
        let inner = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        if title_bracket == caps.get(0).map(|m| m.start()) {
            return format!(" {} ", inner);
        }
        if !inner.is_empty() {
            labels.push(inner.to_string());
        }
        // Season and episode annotations stay in the text so they can be read back
        if BRACKETED_EPISODE_RE.is_match(inner) {
            format!(" - {} ", inner)
        } else if SEASON_HINT_RE.is_match(inner) || BRACKETED_SXXEXX_RE.is_match(inner) {
            format!(" {} ", inner)
        } else {
            " ".to_string()
        }
    });

    let cleaned = replace_separator_dots(&stripped);

    let episodes = find_episodes(&cleaned);
    let seasons = find_seasons(&cleaned);

    let cut = [
        episodes.as_ref().map(|f| f.start),
        seasons.as_ref().map(|f| f.start),
    ]
    .into_iter()
    .flatten()
    .min()
    .unwrap_or(cleaned.len());

    let episode_values = episodes.map(|f| f.values).unwrap_or_default();
    let season_values = match seasons {
        Some(found) => found.values,
        None if !episode_values.is_empty() => vec![1],
        None => Vec::new(),
    };

    let metadata = Metadata {
        source,
        title: clean_display_title(&cleaned[..cut]),
        tag: Tag::new(season_values, episode_values),
        labels,
        vertical_resolution: parse_vertical_resolution(raw_title),
    };

    debug!(
        raw_title = raw_title,
        title = %metadata.title,
        tag = %metadata.tag,
        source = ?metadata.source,
        resolution = metadata.vertical_resolution,
        "Parsed release title"
    );

    metadata
}

/// Vertical resolution from `1080p` or `1920x1080` style markers.
pub fn parse_vertical_resolution(title: &str) -> u32 {
    RESOLUTION_P_RE
        .captures(title)
        .or_else(|| RESOLUTION_WXH_RE.captures(title))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Start of the bracket group holding the title in fully bracketed layouts
/// such as "[Group][Show][01][1080P]".
fn find_title_bracket(body: &str) -> Option<usize> {
    let outside = BRACKET_RE.replace_all(body, " ");
    if outside.chars().any(char::is_alphabetic) {
        return None;
    }

    BRACKET_RE.captures_iter(body).find_map(|caps| {
        let inner = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
        let is_title = inner.chars().any(char::is_alphabetic)
            && !RESOLUTION_P_RE.is_match(inner)
            && !RESOLUTION_WXH_RE.is_match(inner)
            && !SEASON_HINT_RE.is_match(inner)
            && !BRACKETED_SXXEXX_RE.is_match(inner);
        is_title.then(|| caps.get(0).map_or(0, |m| m.start()))
    })
}

const NUMBER_ABBREVIATIONS: [&str; 2] = ["no", "vol"];

/// Whether the word ending right before `end` is `No` or `Vol`.
fn ends_with_number_abbreviation(chars: &[char], end: usize) -> bool {
    let len = chars[..end]
        .iter()
        .rev()
        .take_while(|c| c.is_alphabetic())
        .count();
    let start = end - len;
    let standalone = start == 0 || chars[start - 1].is_whitespace();
    let word: String = chars[start..end].iter().collect::<String>().to_lowercase();
    standalone && NUMBER_ABBREVIATIONS.contains(&word.as_str())
}

/// Turn `.` and `_` word separators into spaces while keeping short decimals
/// such as `07.5` and number abbreviations such as `No. 8` intact.
fn replace_separator_dots(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());

    for (i, c) in chars.iter().enumerate() {
        match c {
            '_' => out.push(' '),
            '.' => {
                let after_digit = i > 0 && chars[i - 1].is_ascii_digit();
                let run = chars[i + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_digit())
                    .count();
                let followed_by_word = chars
                    .get(i + 1 + run)
                    .is_some_and(|c| c.is_alphanumeric());
                let decimal = after_digit && (1..=2).contains(&run) && !followed_by_word;
                let abbreviation = ends_with_number_abbreviation(&chars, i)
                    && chars
                        .get(i + 1)
                        .is_some_and(|c| c.is_whitespace() || c.is_ascii_digit());
                out.push(if decimal || abbreviation { '.' } else { ' ' });
            }
            other => out.push(*other),
        }
    }

    out
}

/// One value, or an ascending two-value range.
fn range_of<T>(first: Option<Match<'_>>, last: Option<Match<'_>>) -> Vec<T>
where
    T: FromStr + PartialOrd,
{
    let first = first.and_then(|m| m.as_str().parse::<T>().ok());
    let last = last.and_then(|m| m.as_str().parse::<T>().ok());
    match (first, last) {
        (Some(first), Some(last)) if last > first => vec![first, last],
        (Some(first), _) => vec![first],
        (None, Some(last)) => vec![last],
        (None, None) => Vec::new(),
    }
}

fn find_episodes(text: &str) -> Option<Found<f64>> {
    for re in [&*DASH_EPISODE_RE, &*SE_EPISODE_RE] {
        if let Some(caps) = re.captures(text) {
            return Some(Found {
                values: range_of(caps.get(1), caps.get(2)),
                start: caps.get(0).map_or(0, |m| m.start()),
            });
        }
    }

    NXNN_RE.captures(text).map(|caps| Found {
        values: range_of(caps.get(2), caps.get(3)),
        start: caps.get(0).map_or(0, |m| m.start()),
    })
}

fn find_seasons(text: &str) -> Option<Found<u32>> {
    if let Some(caps) = ORDINAL_SEASON_RE.captures(text) {
        return Some(Found {
            values: range_of(caps.get(1), None),
            start: caps.get(0).map_or(0, |m| m.start()),
        });
    }
    if let Some(caps) = NXNN_RE.captures(text) {
        return Some(Found {
            values: range_of(caps.get(1), None),
            start: caps.get(0).map_or(0, |m| m.start()),
        });
    }
    for re in [&*SXX_SEASON_RE, &*SEASON_WORD_RE] {
        if let Some(caps) = re.captures(text) {
            return Some(Found {
                values: range_of(caps.get(1), caps.get(2)),
                start: caps.get(0).map_or(0, |m| m.start()),
            });
        }
    }

    // "Oshi no Ko 2 - 05": the numeral itself starts the span
    BARE_SEASON_RE.captures(text).and_then(|caps| {
        let numeral = caps.get(1)?;
        Some(Found {
            values: range_of(Some(numeral), None),
            start: numeral.start(),
        })
    })
}

fn clean_display_title(text: &str) -> String {
    let flattened = MULTI_SPACE_RE.replace_all(text.trim(), " ");
    let without_separators = TRAILING_SEPARATORS_RE.replace(&flattened, "");
    let without_digits = TRAILING_DIGITS_RE.replace(&without_separators, "${1}");
    TRAILING_SEPARATORS_RE
        .replace(&without_digits, "")
        .trim()
        .to_string()
}
