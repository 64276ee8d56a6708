use std::fmt;

use thiserror::Error;

/// A page request that did not produce a document.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("transport: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Transport(e.to_string()),
        }
    }
}

impl FetchError {
    /// 429 and 5xx are worth another attempt when retries are enabled.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status(code) => *code == 429 || (500..600).contains(code),
            FetchError::Transport(_) => true,
        }
    }
}

/// Why a single crawl item was dropped from the pipeline.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("below threshold: {value} < {threshold}")]
    ThresholdReject { value: i64, threshold: i64 },
}

impl ItemError {
    pub fn parse(what: impl Into<String>) -> Self {
        ItemError::Parse(what.into())
    }

    pub fn kind(&self) -> SkipKind {
        match self {
            ItemError::Fetch(_) => SkipKind::Fetch,
            ItemError::Parse(_) => SkipKind::Parse,
            ItemError::ThresholdReject { .. } => SkipKind::Threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipKind {
    Fetch,
    Parse,
    Threshold,
}

impl SkipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipKind::Fetch => "fetch",
            SkipKind::Parse => "parse",
            SkipKind::Threshold => "threshold",
        }
    }
}

impl fmt::Display for SkipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings that make a run impossible; the only run-fatal validation failures.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("empty season range: start_year {start} > end_year {end}")]
    EmptySeasonRange { start: i32, end: i32 },
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("request_interval_ms must be at least 1")]
    ZeroInterval,
    #[error("min_pa must be positive")]
    NonPositiveThreshold,
}
