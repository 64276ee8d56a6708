use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::error::{FetchError, ItemError};
use crate::settings::Settings;

const BASE_BACKOFF_MS: u64 = 2000;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("rookie_roba/", env!("CARGO_PKG_VERSION"));

/// Anything that can hand back the HTML behind a site path.
pub trait PageSource: Send + Sync + 'static {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// HTTP page source. Every request, from every worker, waits on one limiter.
pub struct Fetcher {
    client: reqwest::Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    max_retries: u32,
}

impl Fetcher {
    pub fn new(settings: &Settings) -> Result<Fetcher> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        // One request per interval, no bursts.
        let quota = Quota::with_period(settings.request_interval())
            .context("request interval must be non-zero")?
            .allow_burst(NonZeroU32::MIN);

        Ok(Fetcher {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(quota),
            max_retries: settings.max_retries,
        })
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        self.limiter.until_ready().await;

        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        debug!(
            url,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "fetched"
        );
        Ok(body)
    }
}

impl PageSource for Fetcher {
    async fn fetch(&self, path: &str) -> Result<String, FetchError> {
        let url = self.url_for(path);
        let mut attempt = 0;
        loop {
            match self.get_once(&url).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = backoff(attempt);
                    warn!(
                        "{} on {} (attempt {}/{}), backing off {:.1}s",
                        e,
                        url,
                        attempt + 1,
                        self.max_retries,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt)))
}

/// One unit of work for a stage's worker pool.
pub trait CrawlItem: Send + 'static {
    /// Site path (or absolute URL) of the page this item needs.
    fn path(&self) -> String;
}

/// Fetch every item's page on a bounded pool and parse it inside the worker.
///
/// Each item gets its own fetch result; a failed fetch never reaches `parse`.
/// Results arrive on the returned channel in completion order, so a single
/// consumer owns all writes.
pub fn crawl<S, I, T, F>(
    source: Arc<S>,
    items: Vec<I>,
    concurrency: usize,
    parse: F,
) -> mpsc::Receiver<(I, Result<T, ItemError>)>
where
    S: PageSource,
    I: CrawlItem,
    T: Send + 'static,
    F: Fn(&I, &str) -> Result<T, ItemError> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let parse = Arc::new(parse);
    let (tx, rx) = mpsc::channel(concurrency.max(1) * 2);

    for item in items {
        let source = Arc::clone(&source);
        let sem = Arc::clone(&semaphore);
        let parse = Arc::clone(&parse);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let path = item.path();
            let result = match source.fetch(&path).await {
                Ok(html) => parse(&item, &html),
                Err(e) => Err(ItemError::Fetch(e)),
            };
            let _ = tx.send((item, result)).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);
    rx
}

pub fn progress_bar(len: usize, stage: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>8} [{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    pb.set_message(stage);
    Ok(pb)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Serves canned pages by path; anything else is a 404.
    #[derive(Default)]
    pub struct MemorySource {
        pages: HashMap<String, String>,
        pub requested: Mutex<Vec<String>>,
    }

    impl MemorySource {
        pub fn with(mut self, path: &str, html: &str) -> Self {
            self.pages.insert(path.to_string(), html.to_string());
            self
        }

        pub fn request_count(&self) -> usize {
            self.requested.lock().unwrap().len()
        }
    }

    impl PageSource for MemorySource {
        async fn fetch(&self, path: &str) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(path.to_string());
            self.pages.get(path).cloned().ok_or(FetchError::Status(404))
        }
    }
}
