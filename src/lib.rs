//! Episode Scout - finds new anime episodes on a release feed and hands
//! them to qBittorrent.
//!
//! The engine reads the user's watch list, works out from torrent tags what
//! has already been downloaded, and adds every feed release that moves a
//! show forward.

pub mod cli;
pub mod config;
pub mod error;
pub mod jobs;
pub mod services;

pub use error::{DiscoveryError, Result};
