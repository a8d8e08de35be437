use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status { status: u16, url: String },
    #[error("fetcher is shutting down")]
    Closed,
}

/// How many times a feed GET is retried and how long to wait in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            first_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Doubles per retry, capped at `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.first_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Throttling and upstream failures are worth another attempt; any other
    /// non-success answer is final.
    pub fn retries_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    pub fn retries_transport(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request()
    }

    /// A server-provided `Retry-After` in seconds wins over the computed
    /// delay, still bounded by `max_delay`.
    fn wait_after(&self, retry: u32, headers: Option<&HeaderMap>) -> Duration {
        headers
            .and_then(|h| h.get(RETRY_AFTER))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs).min(self.max_delay))
            .unwrap_or_else(|| self.delay(retry))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
    pub max_in_flight_per_source: usize,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_in_flight: 8,
            max_in_flight_per_source: 2,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

enum Attempt {
    Done(FetchedResponse),
    Again { wait: Duration, reason: String },
    Failed(FetchError),
}

/// GET-only client for provider feeds. Requests are bounded overall and per
/// source, and transient failures are retried under a [`RetryPolicy`].
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    per_source_limit: usize,
    sources: Mutex<HashMap<String, Arc<Semaphore>>>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        let builder = match config.user_agent {
            Some(agent) => builder.user_agent(agent),
            None => builder,
        };

        Ok(Self {
            client: builder.build().context("building http client")?,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            per_source_limit: config.max_in_flight_per_source.max(1),
            sources: Mutex::new(HashMap::new()),
            retry: config.retry,
        })
    }

    async fn permits(
        &self,
        source_id: &str,
    ) -> Result<(OwnedSemaphorePermit, OwnedSemaphorePermit), FetchError> {
        let source = {
            let mut sources = self.sources.lock().await;
            Arc::clone(
                sources
                    .entry(source_id.to_owned())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit))),
            )
        };
        let global = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Closed)?;
        let local = source.acquire_owned().await.map_err(|_| FetchError::Closed)?;
        Ok((global, local))
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let _permits = self.permits(source_id).await?;
        let span = info_span!("provider_fetch", %run_id, source_id, url);
        async {
            let mut retry = 0;
            loop {
                match self.attempt(url, retry).await {
                    Attempt::Done(response) => return Ok(response),
                    Attempt::Failed(err) => return Err(err),
                    Attempt::Again { wait, reason } => {
                        debug!(retry, ?wait, %reason, "retrying feed request");
                        tokio::time::sleep(wait).await;
                        retry += 1;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, url: &str, retry: u32) -> Attempt {
        let budget_left = retry < self.retry.retries;
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(source) if budget_left && RetryPolicy::retries_transport(&source) => {
                return Attempt::Again {
                    wait: self.retry.wait_after(retry, None),
                    reason: source.to_string(),
                };
            }
            Err(source) => {
                return Attempt::Failed(FetchError::Transport {
                    url: url.to_owned(),
                    source,
                })
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            if budget_left && RetryPolicy::retries_status(status) {
                return Attempt::Again {
                    wait: self.retry.wait_after(retry, Some(response.headers())),
                    reason: status.to_string(),
                };
            }
            warn!(%status, url = %final_url, "feed request rejected");
            return Attempt::Failed(FetchError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }

        match response.bytes().await {
            Ok(body) => Attempt::Done(FetchedResponse {
                status,
                final_url,
                body: body.to_vec(),
            }),
            Err(source) => Attempt::Failed(FetchError::Transport {
                url: final_url,
                source,
            }),
        }
    }
}
