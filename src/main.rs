//! Episode Scout - polls the watch list and adds new episodes to qBittorrent

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use episode_scout::cli::CliOptions;
use episode_scout::config::Config;
use episode_scout::jobs::DiscoveryJob;
use episode_scout::services::{
    CachedAnimeList, MyAnimeList, NyaaFeed, QBittorrent, RateLimitedClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = CliOptions::from_args();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "episode_scout=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Episode Scout");

    let mut discovery = config.discovery();
    if let Some(interval) = cli.interval_override {
        discovery.interval = interval;
    }
    discovery.dry_run |= cli.dry_run;

    let anime_list = MyAnimeList::new(
        RateLimitedClient::for_anime_list(&config.user_agent)
            .context("Failed to create MyAnimeList client")?,
        &config.mal_api_url,
        &config.mal_access_token,
    );
    let feed = NyaaFeed::new(
        RateLimitedClient::for_feed(&config.user_agent).context("Failed to create feed client")?,
        &config.feed_url,
        &config.feed_category,
    );
    let torrents = QBittorrent::new(
        RateLimitedClient::for_torrent_client(&config.user_agent)
            .context("Failed to create qBittorrent client")?,
        &config.qbittorrent_url,
        &config.qbittorrent_username,
        &config.qbittorrent_password,
    );

    let job = DiscoveryJob::new(
        Arc::new(CachedAnimeList::new(anime_list)),
        Arc::new(feed),
        Arc::new(torrents),
        discovery,
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to listen for ctrl-c"),
        }
    });

    if cli.once {
        let summary = job.scan(&cancel).await.context("Discovery scan failed")?;
        tracing::info!(added = summary.added, "Single scan finished");
    } else {
        job.run(cancel).await;
    }

    Ok(())
}
