use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Client for idempotent calls: exponential backoff, max 3 retries,
    /// base delay 500ms.
    pub fn create_client() -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(500), Duration::from_secs(2))
            .build_with_max_retries(3);

        ClientBuilder::new(Self::base_client())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    /// Client with NO retry middleware. Order placement goes through this:
    /// resubmitting after a timeout without confirming order state risks a
    /// double fill, so ambiguity is surfaced to the caller instead.
    pub fn create_placement_client() -> Client {
        Self::base_client()
    }

    fn base_client() -> Client {
        Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}
