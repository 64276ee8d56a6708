use std::sync::Arc;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info};

use super::{record_skip, MinorSeasonRow, PlayerProfile, Stage, StageStats};
use crate::db;
use crate::error::ItemError;
use crate::fetcher::{crawl, progress_bar, CrawlItem, PageSource};
use crate::parser::extract::find_table_by_id;
use crate::parser::{Document, Table};
use crate::settings::Settings;
use crate::summary::RunSummary;

const MINORS_TABLE_ID: &str = "standard_batting";
const YEAR_COLUMNS: &[&str] = &["Year", "Season"];
const TEAM_COLUMNS: &[&str] = &["Tm", "Team"];
const LEVEL_COLUMNS: &[&str] = &["Lev", "Level"];
/// Multi-team season totals read "2 Teams", "3 Teams", ...
const AGGREGATE_TEAM_MARKER: &str = "Teams";
const MAJOR_LEVEL: &str = "Maj";

/// Rows strictly before the rookie season, excluding multi-team totals and
/// major-league lines. Non-numeric years (career totals, headers) never pass.
pub fn pre_rookie_rows(table: &Table, rookie_season: i32) -> Result<Vec<MinorSeasonRow>, ItemError> {
    let missing = |col: &str| ItemError::parse(format!("minors table has no {} column", col));
    let year_col = table.column_any(YEAR_COLUMNS).ok_or_else(|| missing("Year"))?;
    let team_col = table.column_any(TEAM_COLUMNS).ok_or_else(|| missing("Tm"))?;
    let level_col = table.column_any(LEVEL_COLUMNS).ok_or_else(|| missing("Lev"))?;

    let mut rows = Vec::new();
    for r in table.records() {
        let Some(year) = r.get(year_col).and_then(|v| v.parse::<i32>().ok()) else {
            continue;
        };
        let team = r.get(team_col).unwrap_or_default();
        let level = r.get(level_col).unwrap_or_default();
        if year >= rookie_season || team.contains(AGGREGATE_TEAM_MARKER) || level == MAJOR_LEVEL {
            continue;
        }
        rows.push(MinorSeasonRow {
            year,
            level: level.to_string(),
            team: team.to_string(),
            cells: r.pairs().map(|(h, c)| (h.to_string(), c.to_string())).collect(),
        });
    }
    Ok(rows)
}

/// A page without the table is an empty row set, not a failure.
pub fn minor_rows(doc: &Document, rookie_season: i32) -> Result<Vec<MinorSeasonRow>, ItemError> {
    match find_table_by_id(doc, MINORS_TABLE_ID) {
        Some(table) => pre_rookie_rows(&table, rookie_season),
        None => Ok(Vec::new()),
    }
}

struct MinorsPage(PlayerProfile);

impl CrawlItem for MinorsPage {
    fn path(&self) -> String {
        self.0.minors_link.clone().unwrap_or_default()
    }
}

/// Stage 4: minor-league pages → retained pre-rookie rows per player.
pub async fn run<S: PageSource>(
    source: Arc<S>,
    conn: &Connection,
    settings: &Settings,
    summary: &mut RunSummary,
) -> Result<StageStats> {
    let players: Vec<MinorsPage> = db::pending_minors(conn)?.into_iter().map(MinorsPage).collect();
    let mut stats = StageStats::new(players.len());
    if players.is_empty() {
        info!("No pending minor-league pages");
        return Ok(stats);
    }

    info!("Aggregating minor-league rows for {} players", players.len());
    let pb = progress_bar(players.len(), "minors")?;
    let mut rx = crawl(source, players, settings.concurrency, |page: &MinorsPage, html: &str| {
        let doc = Document::parse(html);
        minor_rows(&doc, page.0.rookie_season)
    });

    while let Some((MinorsPage(profile), result)) = rx.recv().await {
        match result {
            Ok(rows) => {
                debug!(player = %profile.player_id, rows = rows.len(), "minors page parsed");
                db::save_minor_rows(conn, &profile.player_id, &rows)?;
                stats.ok += 1;
                stats.produced += rows.len();
            }
            Err(e) => {
                if record_skip(conn, summary, Stage::Minors, profile.player_id.as_str(), &e)? {
                    db::mark_minors_visited(conn, &profile.player_id)?;
                }
                stats.skipped += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::testing::MemorySource;
    use crate::stages::PlayerId;

    fn register_page(rows: &[(&str, &str, &str)]) -> String {
        let body: String = rows
            .iter()
            .map(|(year, team, lev)| {
                format!(
                    "<tr><th>{}</th><td>22</td><td>{}</td><td>{}</td><td>12</td></tr>",
                    year, team, lev
                )
            })
            .collect();
        format!(
            "<html><body><div class=\"placeholder\"></div><!-- <table id=\"standard_batting\"><thead><tr><th>Year</th><th>Age</th><th>Tm</th><th>Lev</th><th>HR</th></tr></thead><tbody>{}</tbody></table> --></body></html>",
            body
        )
    }

    fn years(rows: &[MinorSeasonRow]) -> Vec<i32> {
        rows.iter().map(|r| r.year).collect()
    }

    #[test]
    fn keeps_only_pre_rookie_minor_rows() {
        let html = register_page(&[
            ("2012", "Charleston", "A"),
            ("2013", "Tampa", "A+"),
            ("2014", "Trenton", "AA"),
            ("2015", "Scranton", "AAA"),
        ]);
        let rows = minor_rows(&Document::parse(&html), 2015).unwrap();
        assert_eq!(years(&rows), vec![2012, 2013, 2014]);
        assert_eq!(rows[2].level, "AA");
        assert_eq!(rows[2].cells[4], ("HR".to_string(), "12".to_string()));
    }

    #[test]
    fn drops_aggregates_majors_and_non_numeric_years() {
        let html = register_page(&[
            ("2013", "2 Teams", "A-A+"),
            ("2013", "Charleston", "A"),
            ("2014", "New York", "Maj"),
            ("3 Seasons", "", ""),
            ("Year", "Tm", "Lev"),
        ]);
        let rows = minor_rows(&Document::parse(&html), 2015).unwrap();
        assert_eq!(years(&rows), vec![2013]);
        assert_eq!(rows[0].team, "Charleston");
    }

    #[test]
    fn no_table_is_empty_not_error() {
        let rows = minor_rows(&Document::parse("<html><body></body></html>"), 2015).unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn rows_are_stored_per_player() {
        let source = Arc::new(MemorySource::default().with(
            "/register/player.fcgi?id=judge-001aar",
            &register_page(&[("2014", "Trenton", "AA"), ("2016", "Scranton", "AAA")]),
        ));
        let conn = db::memory();
        let judge = PlayerProfile {
            player_id: PlayerId::from_profile_path("/players/j/judgeaa01.shtml").unwrap(),
            rookie_season: 2016,
            rookie_roba: 0.33,
            rookie_pa: 150,
            minors_link: Some("/register/player.fcgi?id=judge-001aar".into()),
        };
        db::save_player(&conn, "/players/j/judgeaa01.shtml", &judge).unwrap();
        let mut summary = RunSummary::new();

        let stats = run(source, &conn, &Settings::default(), &mut summary).await.unwrap();
        assert_eq!((stats.ok, stats.produced), (1, 1));
        let loaded = db::load_players_with_rows(&conn).unwrap();
        assert_eq!(years(&loaded[0].1), vec![2014]);
        assert!(db::pending_minors(&conn).unwrap().is_empty());
    }
}
