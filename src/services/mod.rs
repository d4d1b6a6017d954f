//! Release parsing, filtering and external service integrations

pub mod anime_list;
pub mod qbittorrent;
pub mod rate_limiter;
pub mod release_filter;
pub mod release_parser;
pub mod rss;
pub mod tag;
pub mod text_utils;

pub use anime_list::{AiringStatus, AnimeListSource, CachedAnimeList, MyAnimeList, WatchEntry};
pub use qbittorrent::{AddTorrentRequest, QBittorrent, Torrent, TorrentClient, TorrentFilter};
pub use rate_limiter::RateLimitedClient;
pub use release_filter::ParsedCandidate;
pub use release_parser::Metadata;
pub use rss::{FeedItem, FeedSource, NyaaFeed, SearchQuery};
pub use tag::Tag;
