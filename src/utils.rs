use crate::config::{ApiConfig, DownloadConfig};
use crate::error::{ComicSyncError, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    limiter: Option<Arc<DirectLimiter>>,
}

impl HttpClient {
    pub fn new(api: &ApiConfig, download: &DownloadConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in [
            ("version", &api.version),
            ("platform", &api.platform),
            ("webp", &api.webp),
            ("region", &api.region),
        ] {
            let value = HeaderValue::from_str(value).map_err(|_| {
                ComicSyncError::config(format!("api.{} is not a valid header value", name))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }

        let client = Client::builder()
            .timeout(download.timeout())
            .connect_timeout(Duration::from_secs(10))
            .user_agent(api.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        let limiter = Quota::with_period(Duration::from_millis(api.rate_limit_ms))
            .map(|quota| Arc::new(RateLimiter::direct(quota)));

        Ok(Self { client, limiter })
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Sends a GET and hands back the response whatever its status.
    pub async fn get_raw(&self, url: &str) -> Result<Response> {
        self.throttle().await;
        let response = self.client.get(url).send().await?;
        Ok(response)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: url::Url) -> Result<T> {
        self.throttle().await;
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
