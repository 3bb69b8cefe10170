use crate::config::DownloadConfig;
use crate::downloader::retry::{self, AttemptPolicy};
use crate::error::ComicSyncError;
use crate::models::{FetchFailure, PageOutcome, PageTask};
use crate::traits::ImageFetcher;
use crate::utils::HttpClient;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Pause after timeouts, bad statuses and other request errors.
    pub retry_delay: Duration,
    /// Pause after a failed connect.
    pub connect_retry_delay: Duration,
}

impl RetrySettings {
    pub fn policy(&self) -> AttemptPolicy {
        AttemptPolicy::new(self.max_attempts, self.retry_delay)
    }
}

impl From<&DownloadConfig> for RetrySettings {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
            connect_retry_delay: config.connect_retry_delay(),
        }
    }
}

#[derive(Clone)]
pub struct PageFetcher {
    http_client: HttpClient,
    settings: RetrySettings,
}

impl PageFetcher {
    pub fn new(http_client: HttpClient, settings: RetrySettings) -> Self {
        Self {
            http_client,
            settings,
        }
    }

    /// Downloads `locator` into `destination`, retrying under `policy`.
    pub async fn fetch(&self, locator: &str, destination: &Path, policy: AttemptPolicy) -> PageOutcome {
        self.fetch_observed(locator, destination, policy, |_, _| {})
            .await
    }

    /// [`fetch`](Self::fetch), also reporting each failure and the pause
    /// chosen after it to `observe`.
    async fn fetch_observed<O>(
        &self,
        locator: &str,
        destination: &Path,
        policy: AttemptPolicy,
        mut observe: O,
    ) -> PageOutcome
    where
        O: FnMut(&FetchFailure, Duration),
    {
        let connect_delay = self.settings.connect_retry_delay;
        let max_attempts = policy.max_attempts();

        let result = retry::attempt(
            policy,
            move |_| async move {
                self.fetch_once(locator, destination)
                    .await
                    .map_err(|failure| match failure {
                        FetchFailure::Connect(_) => {
                            backoff::Error::retry_after(failure, connect_delay)
                        }
                        other => backoff::Error::transient(other),
                    })
            },
            |reason, attempt, delay| {
                warn!(
                    attempt,
                    max_attempts,
                    "⚠️ Fetch of {} failed ({}), retrying in {:?}",
                    locator,
                    reason,
                    delay
                );
                observe(reason, delay);
            },
        )
        .await;

        match result {
            Ok(((), attempts)) => {
                debug!(attempts, "Stored {:?}", destination);
                PageOutcome::Stored { attempts }
            }
            Err(exhausted) => {
                warn!(
                    attempts = exhausted.attempts,
                    "❌ Giving up on {}: {}",
                    locator,
                    exhausted.error
                );
                PageOutcome::Failed {
                    reason: exhausted.error,
                    attempts: exhausted.attempts,
                }
            }
        }
    }

    async fn fetch_once(&self, locator: &str, destination: &Path) -> Result<(), FetchFailure> {
        let response = self
            .http_client
            .get_raw(locator)
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_error(ComicSyncError::Http(e)))?;

        write_atomically(destination, &bytes)
            .await
            .map_err(|e| FetchFailure::Write(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ImageFetcher for PageFetcher {
    async fn fetch_page(&self, task: &PageTask) -> PageOutcome {
        let span = info_span!("page", page = task.page_number);
        self.fetch(&task.remote_locator, &task.destination_path, self.settings.policy())
            .instrument(span)
            .await
    }
}

fn classify_error(error: ComicSyncError) -> FetchFailure {
    match error {
        ComicSyncError::Http(e) if e.is_timeout() => FetchFailure::Timeout,
        ComicSyncError::Http(e) if e.is_connect() => FetchFailure::Connect(e.to_string()),
        other => FetchFailure::Request(other.to_string()),
    }
}

/// Writes through a sibling `.part` file so the destination only ever holds a
/// complete image.
pub(crate) async fn write_atomically(destination: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut part = destination.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    tokio::fs::write(&part, bytes).await?;
    tokio::fs::rename(&part, destination).await
}
