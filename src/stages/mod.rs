//! The four crawl stages. Each stage reads its pending work from the
//! checkpoint store, crawls it on a bounded pool, and writes results back as
//! they arrive, so an interrupted run resumes where it stopped.

pub mod batters;
pub mod minors;
pub mod rookies;
pub mod roster;

use std::fmt;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db;
use crate::error::{ItemError, SkipKind};
use crate::summary::RunSummary;

static PLAYER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/players/[a-z]/([^/]+)\.shtml$").unwrap());
static SITE_HOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://(?:www\.)?baseball-reference\.com").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Teams,
    Batters,
    Rookies,
    Minors,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Teams => "teams",
            Stage::Batters => "batters",
            Stage::Rookies => "rookies",
            Stage::Minors => "minors",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A team's season page found on a league page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamSeasonLink {
    pub path: String,
    pub season: i32,
}

/// Player key: the profile path minus `/players/<letter>/` and `.shtml`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn from_profile_path(path: &str) -> Option<PlayerId> {
        let caps = PLAYER_ID_RE.captures(path)?;
        Some(PlayerId(caps[1].to_string()))
    }

    /// For ids read back from the checkpoint store.
    pub fn from_stored(id: String) -> PlayerId {
        PlayerId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rookie-season outcome for one qualifying player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerProfile {
    pub player_id: PlayerId,
    pub rookie_season: i32,
    pub rookie_roba: f64,
    pub rookie_pa: i64,
    /// Absent when the profile has no minor-league stats link; such a player
    /// produces no dataset rows.
    pub minors_link: Option<String>,
}

/// A retained pre-rookie minor-league batting line, all columns kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinorSeasonRow {
    pub year: i32,
    pub level: String,
    pub team: String,
    pub cells: Vec<(String, String)>,
}

/// Per-stage tally printed after each stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageStats {
    pub total: usize,
    pub ok: usize,
    pub skipped: usize,
    /// Stage-specific output count (links, profiles, rows).
    pub produced: usize,
}

impl StageStats {
    pub fn new(total: usize) -> Self {
        StageStats {
            total,
            ..StageStats::default()
        }
    }
}

/// Strip the site's scheme and host so links compare and store as paths.
pub fn site_path(href: &str) -> String {
    SITE_HOST_RE.replace(href.trim(), "").into_owned()
}

/// Log, persist and tally a dropped item. Fetch failures stay pending so the
/// next run tries them again; anything else is final for that page.
pub(crate) fn record_skip(
    conn: &Connection,
    summary: &mut RunSummary,
    stage: Stage,
    item: &str,
    err: &ItemError,
) -> Result<bool> {
    match err.kind() {
        SkipKind::Threshold => info!(stage = stage.as_str(), item, "rejected: {}", err),
        _ => warn!(stage = stage.as_str(), item, "skipped: {}", err),
    }
    db::record_skip(conn, summary.run_id(), stage, item, err)?;
    summary.record(stage, item, err);
    Ok(err.kind() != SkipKind::Fetch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_id_strips_prefix_and_suffix() {
        let id = PlayerId::from_profile_path("/players/j/judgeaa01.shtml").unwrap();
        assert_eq!(id.as_str(), "judgeaa01");
        assert!(PlayerId::from_profile_path("/players/").is_none());
        assert!(PlayerId::from_profile_path("/teams/NYY/2015.shtml").is_none());
    }

    #[test]
    fn absolute_links_become_paths() {
        assert_eq!(
            site_path("https://www.baseball-reference.com/teams/NYY/2015.shtml"),
            "/teams/NYY/2015.shtml"
        );
        assert_eq!(site_path("/players/j/judgeaa01.shtml"), "/players/j/judgeaa01.shtml");
    }
}
