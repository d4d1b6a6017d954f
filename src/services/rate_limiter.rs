//! Rate limiting and retry logic for external API calls
//!
//! Every collaborator talks HTTP through a [`RateLimitedClient`] so a scan
//! over a long watch list cannot hammer the feed or the list service.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, warn};

use crate::error::{DiscoveryError, Result};

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst capacity (allows short bursts above the rate)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2,
            burst_size: 5,
        }
    }
}

/// A rate-limited HTTP client wrapper
pub struct RateLimitedClient {
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    name: &'static str,
}

impl RateLimitedClient {
    /// Create a new rate-limited client.
    ///
    /// `cookies` enables a session cookie store, which the torrent client
    /// login relies on.
    pub fn new(
        name: &'static str,
        config: RateLimitConfig,
        user_agent: &str,
        cookies: bool,
    ) -> Result<Self> {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        let limiter = Arc::new(RateLimiter::direct(quota));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .cookie_store(cookies)
            .build()?;

        Ok(Self {
            client,
            limiter,
            name,
        })
    }

    /// Client for the release feed (RSS is cheap, allow bursts)
    pub fn for_feed(user_agent: &str) -> Result<Self> {
        Self::new(
            "nyaa",
            RateLimitConfig {
                requests_per_second: 2,
                burst_size: 5,
            },
            user_agent,
            false,
        )
    }

    /// Client for the MyAnimeList API
    pub fn for_anime_list(user_agent: &str) -> Result<Self> {
        // No published limit, stay conservative
        Self::new(
            "myanimelist",
            RateLimitConfig {
                requests_per_second: 1,
                burst_size: 3,
            },
            user_agent,
            false,
        )
    }

    /// Client for the qBittorrent Web API (local, with session cookies)
    pub fn for_torrent_client(user_agent: &str) -> Result<Self> {
        Self::new(
            "qbittorrent",
            RateLimitConfig {
                requests_per_second: 10,
                burst_size: 20,
            },
            user_agent,
            true,
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for rate limit and make a GET request with headers and query parameters
    pub async fn get_with_headers_and_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &T,
    ) -> Result<Response> {
        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        self.send(request.query(query), url).await
    }

    /// Wait for rate limit and make a GET request with query parameters
    pub async fn get_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
    ) -> Result<Response> {
        self.get_with_headers_and_query(url, &[], query).await
    }

    /// Wait for rate limit and POST an url-encoded form
    pub async fn post_form<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        form: &T,
    ) -> Result<Response> {
        self.send(self.client.post(url).form(form), url).await
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        self.wait_for_permit().await;
        debug!(client = %self.name, url = %url, "Making rate-limited request");
        Ok(request.send().await?)
    }

    /// Turn a non-success status into [`DiscoveryError::Status`].
    pub fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(DiscoveryError::Status {
                service: self.name,
                status: status.as_u16(),
            })
        }
    }

    /// Wait for a rate limit permit
    pub async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// Execute an async operation, retrying transient failures with backoff.
///
/// Errors that are not transient (see [`DiscoveryError::is_transient`]) are
/// returned immediately.
pub async fn retry_async<T, Fut, F>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempts >= config.max_retries {
                    warn!(
                        operation = %operation_name,
                        attempts = attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                if let Some(duration) = backoff.next_backoff() {
                    let retry_ms: u128 = duration.as_millis();
                    warn!(
                        operation = %operation_name,
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = retry_ms,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retries() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.requests_per_second, 2);
        assert_eq!(config.burst_size, 5);
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_presets_build() {
        assert_eq!(RateLimitedClient::for_feed("test").unwrap().name(), "nyaa");
        assert_eq!(
            RateLimitedClient::for_anime_list("test").unwrap().name(),
            "myanimelist"
        );
        assert_eq!(
            RateLimitedClient::for_torrent_client("test").unwrap().name(),
            "qbittorrent"
        );
    }

    #[tokio::test]
    async fn test_retry_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_async(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DiscoveryError::Status {
                        service: "nyaa",
                        status: 503,
                    })
                } else {
                    Ok(7)
                }
            },
            &fast_retries(),
            "flaky",
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_fatal() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_async(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DiscoveryError::Authentication {
                    service: "qbittorrent",
                })
            },
            &fast_retries(),
            "login",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
