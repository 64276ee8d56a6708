use std::sync::{Arc, LazyLock};

use anyhow::Result;
use regex::Regex;
use rusqlite::Connection;
use tracing::info;

use super::{record_skip, site_path, Stage, StageStats, TeamSeasonLink};
use crate::db;
use crate::fetcher::{crawl, progress_bar, CrawlItem, PageSource};
use crate::parser::extract::find_links;
use crate::parser::Document;
use crate::settings::Settings;
use crate::summary::RunSummary;

static TEAM_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/teams/[A-Z0-9]+/(\d{4})\.shtml$").unwrap());

pub fn league_path(season: i32) -> String {
    format!("/leagues/majors/{}.shtml", season)
}

/// Team-season anchors on a league page, in page order. The same team is
/// usually linked from several tables; repeats are kept.
pub fn team_links(doc: &Document, season: i32) -> Vec<TeamSeasonLink> {
    let year = season.to_string();
    find_links(doc, &TEAM_LINK_RE)
        .into_iter()
        .filter(|l| TEAM_LINK_RE.captures(&l.href).is_some_and(|c| c[1] == year))
        .map(|l| TeamSeasonLink {
            path: site_path(&l.href),
            season,
        })
        .collect()
}

struct SeasonPage(i32);

impl CrawlItem for SeasonPage {
    fn path(&self) -> String {
        league_path(self.0)
    }
}

/// Stage 1: league page per pending season → team links.
pub async fn run<S: PageSource>(
    source: Arc<S>,
    conn: &Connection,
    settings: &Settings,
    summary: &mut RunSummary,
) -> Result<StageStats> {
    let seasons = db::pending_seasons(conn, settings.seasons())?;
    let mut stats = StageStats::new(seasons.len());
    if seasons.is_empty() {
        info!("All seasons {}-{} already collected", settings.start_year, settings.end_year);
        return Ok(stats);
    }

    info!("Collecting team links for {} seasons", seasons.len());
    let pb = progress_bar(seasons.len(), "teams")?;
    let items = seasons.into_iter().map(SeasonPage).collect();
    let mut rx = crawl(source, items, settings.concurrency, |season: &SeasonPage, html: &str| {
        let doc = Document::parse(html);
        Ok(team_links(&doc, season.0))
    });

    while let Some((season, result)) = rx.recv().await {
        match result {
            Ok(links) => {
                info!(season = season.0, links = links.len(), "league page parsed");
                db::save_team_links(conn, season.0, &links)?;
                stats.ok += 1;
                stats.produced += links.len();
            }
            Err(e) => {
                if record_skip(conn, summary, Stage::Teams, &season.0.to_string(), &e)? {
                    db::mark_season_visited(conn, season.0)?;
                }
                stats.skipped += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(stats)
}
