use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "rookie_roba.toml";
pub const BASE_URL: &str = "https://www.baseball-reference.com";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub start_year: i32,
    pub end_year: i32,
    /// Applied to team at-bats and to rookie-season plate appearances.
    pub min_pa: i64,
    pub request_interval_ms: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_url: String,
    pub db_path: PathBuf,
    pub output: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            start_year: 2000,
            end_year: 2025,
            min_pa: 130,
            request_interval_ms: 3000,
            concurrency: 4,
            max_retries: 0,
            base_url: BASE_URL.to_string(),
            db_path: PathBuf::from("data/rookie.sqlite"),
            output: PathBuf::from("data/minors_stats.csv"),
        }
    }
}

impl Settings {
    /// Defaults, then the config file (if present), then `ROOKIE_*` env vars.
    pub fn load(file: Option<&Path>) -> Result<Settings> {
        let mut builder = Config::builder();
        builder = match file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        let settings: Settings = builder
            .add_source(Environment::with_prefix("ROOKIE").try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_year > self.end_year {
            return Err(ConfigError::EmptySeasonRange {
                start: self.start_year,
                end: self.end_year,
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.request_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.min_pa <= 0 {
            return Err(ConfigError::NonPositiveThreshold);
        }
        Ok(())
    }

    pub fn seasons(&self) -> RangeInclusive<i32> {
        self.start_year..=self.end_year
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}

/// Command-line overrides; anything left unset keeps the file/env value.
#[derive(Debug, Default, Args)]
pub struct SettingsArgs {
    /// Config file (default: ./rookie_roba.toml if it exists)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// First season to crawl
    #[arg(long, global = true)]
    pub start_year: Option<i32>,
    /// Last season to crawl (inclusive)
    #[arg(long, global = true)]
    pub end_year: Option<i32>,
    /// Minimum AB / PA to qualify
    #[arg(long, global = true)]
    pub min_pa: Option<i64>,
    /// Minimum milliseconds between requests
    #[arg(long, global = true)]
    pub interval_ms: Option<u64>,
    /// Concurrent fetch workers per stage
    #[arg(short = 'j', long, global = true)]
    pub concurrency: Option<usize>,
    /// Retries on 429/5xx responses
    #[arg(long, global = true)]
    pub retries: Option<u32>,
    /// Checkpoint database
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    /// Dataset CSV path
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,
}

impl SettingsArgs {
    pub fn resolve(&self) -> Result<Settings> {
        let mut s = Settings::load(self.config.as_deref())?;
        self.apply(&mut s);
        s.validate()?;
        Ok(s)
    }

    fn apply(&self, s: &mut Settings) {
        if let Some(v) = self.start_year {
            s.start_year = v;
        }
        if let Some(v) = self.end_year {
            s.end_year = v;
        }
        if let Some(v) = self.min_pa {
            s.min_pa = v;
        }
        if let Some(v) = self.interval_ms {
            s.request_interval_ms = v;
        }
        if let Some(v) = self.concurrency {
            s.concurrency = v;
        }
        if let Some(v) = self.retries {
            s.max_retries = v;
        }
        if let Some(v) = &self.db {
            s.db_path = v.clone();
        }
        if let Some(v) = &self.output {
            s.output = v.clone();
        }
    }
}
