use std::sync::{Arc, LazyLock};

use anyhow::Result;
use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info};

use super::{record_skip, site_path, PlayerId, PlayerProfile, Stage, StageStats};
use crate::db;
use crate::error::ItemError;
use crate::fetcher::{crawl, progress_bar, CrawlItem, PageSource};
use crate::parser::extract::{find_link_by_text, find_table_by_id, find_text_matching};
use crate::parser::{Document, Table};
use crate::settings::Settings;
use crate::summary::RunSummary;

/// "Rookie Status: Exceeded rookie limits during 2015 season". The year must
/// be present for the marker to count.
static ROOKIE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)exceeded rookie limits during\D{0,20}(\d{4})").unwrap()
});
static MINORS_LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Minor.*Stats").unwrap());

const ADVANCED_TABLE_ID: &str = "players_advanced_batting";
const SEASON_COLUMNS: &[&str] = &["Season", "Year"];

pub fn rookie_year(marker: &str) -> Option<i32> {
    ROOKIE_MARKER_RE.captures(marker)?[1].parse().ok()
}

/// PA and rOBA from the first advanced-batting row for `season`. A traded
/// player's first row for the season is his combined line.
pub fn rookie_line(table: &Table, season: i32) -> Result<(i64, f64), ItemError> {
    let missing = |col: &str| ItemError::parse(format!("advanced batting has no {} column", col));
    let season_col = table.column_any(SEASON_COLUMNS).ok_or_else(|| missing("Season"))?;
    let pa_col = table.column("PA").ok_or_else(|| missing("PA"))?;
    let roba_col = table.column("rOBA").ok_or_else(|| missing("rOBA"))?;

    let wanted = season.to_string();
    let row = table
        .records()
        .find(|r| r.get(season_col) == Some(wanted.as_str()))
        .ok_or_else(|| ItemError::parse(format!("no advanced batting row for {}", season)))?;

    let pa = row
        .get(pa_col)
        .and_then(|v| v.replace(',', "").parse::<i64>().ok())
        .ok_or_else(|| ItemError::parse(format!("unreadable PA for {}", season)))?;
    let roba = row
        .get(roba_col)
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| ItemError::parse(format!("unreadable rOBA for {}", season)))?;
    Ok((pa, roba))
}

/// Resolve one profile page. A missing minor-league link still yields a
/// profile; it just has nothing to aggregate.
pub fn resolve_profile(
    player_id: &PlayerId,
    doc: &Document,
    min_pa: i64,
) -> Result<PlayerProfile, ItemError> {
    let marker = find_text_matching(doc, &ROOKIE_MARKER_RE)
        .ok_or_else(|| ItemError::parse("no rookie-limits marker"))?;
    let rookie_season =
        rookie_year(&marker).ok_or_else(|| ItemError::parse(format!("no year in {:?}", marker)))?;

    let table = find_table_by_id(doc, ADVANCED_TABLE_ID)
        .ok_or_else(|| ItemError::parse("no advanced batting table"))?;
    let (rookie_pa, rookie_roba) = rookie_line(&table, rookie_season)?;
    if rookie_pa < min_pa {
        return Err(ItemError::ThresholdReject {
            value: rookie_pa,
            threshold: min_pa,
        });
    }

    let minors_link = find_link_by_text(doc, &MINORS_LINK_RE).map(|l| site_path(&l.href));
    Ok(PlayerProfile {
        player_id: player_id.clone(),
        rookie_season,
        rookie_roba,
        rookie_pa,
        minors_link,
    })
}

struct ProfilePage {
    path: String,
    player_id: PlayerId,
}

impl CrawlItem for ProfilePage {
    fn path(&self) -> String {
        self.path.clone()
    }
}

/// Stage 3: unique profile links → PlayerProfile records.
pub async fn run<S: PageSource>(
    source: Arc<S>,
    conn: &Connection,
    settings: &Settings,
    summary: &mut RunSummary,
) -> Result<StageStats> {
    let pages: Vec<ProfilePage> = db::pending_profiles(conn)?
        .into_iter()
        .map(|(path, player_id)| ProfilePage { path, player_id })
        .collect();
    let mut stats = StageStats::new(pages.len());
    if pages.is_empty() {
        info!("No pending player profiles");
        return Ok(stats);
    }

    info!("Resolving rookie seasons for {} players", pages.len());
    let pb = progress_bar(pages.len(), "rookies")?;
    let min_pa = settings.min_pa;
    let mut rx = crawl(source, pages, settings.concurrency, move |page: &ProfilePage, html: &str| {
        let doc = Document::parse(html);
        resolve_profile(&page.player_id, &doc, min_pa)
    });

    let mut without_minors = 0usize;
    while let Some((page, result)) = rx.recv().await {
        match result {
            Ok(profile) => {
                debug!(
                    player = %profile.player_id,
                    season = profile.rookie_season,
                    pa = profile.rookie_pa,
                    roba = profile.rookie_roba,
                    "rookie season resolved"
                );
                if profile.minors_link.is_none() {
                    without_minors += 1;
                }
                db::save_player(conn, &page.path, &profile)?;
                stats.ok += 1;
                stats.produced += 1;
            }
            Err(e) => {
                if record_skip(conn, summary, Stage::Rookies, page.player_id.as_str(), &e)? {
                    db::mark_profile_visited(conn, &page.path)?;
                }
                stats.skipped += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    if without_minors > 0 {
        info!("{} profiles have no minor-league stats link", without_minors);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::testing::MemorySource;

    fn profile_page(marker: &str, pa: &str, minors: bool) -> String {
        let minors_link = if minors {
            r#"<li><a href="/register/player.fcgi?id=judge-001aar">Minor Lg Stats</a></li>"#
        } else {
            ""
        };
        format!(
            r#"<html><body>
            <div id="meta"><p><strong>Rookie Status:</strong> {}</p></div>
            <ul>{}</ul>
            <div class="placeholder"></div><!--
            <table id="players_advanced_batting">
              <thead>
                <tr><th colspan="3"></th><th colspan="2">Batting</th></tr>
                <tr><th>Season</th><th>Age</th><th>Team</th><th>PA</th><th>rOBA</th></tr>
              </thead>
              <tbody>
                <tr><th>2014</th><td>22</td><td>NYY</td><td>40</td><td>.250</td></tr>
                <tr><th>2015</th><td>23</td><td>NYY</td><td>{}</td><td>.310</td></tr>
              </tbody>
            </table> --></body></html>"#,
            marker, minors_link, pa
        )
    }

    fn judge() -> PlayerId {
        PlayerId::from_profile_path("/players/j/judgeaa01.shtml").unwrap()
    }

    #[test]
    fn resolves_rookie_season_line() {
        let html = profile_page("Exceeded rookie limits during the 2015 season", "140", true);
        let p = resolve_profile(&judge(), &Document::parse(&html), 130).unwrap();
        assert_eq!(p.rookie_season, 2015);
        assert_eq!(p.rookie_pa, 140);
        assert!((p.rookie_roba - 0.310).abs() < 1e-9);
        assert_eq!(p.minors_link.as_deref(), Some("/register/player.fcgi?id=judge-001aar"));
    }

    #[test]
    fn below_threshold_is_rejected() {
        let html = profile_page("Exceeded rookie limits during the 2015 season", "90", true);
        let err = resolve_profile(&judge(), &Document::parse(&html), 130).unwrap_err();
        assert!(matches!(err, ItemError::ThresholdReject { value: 90, threshold: 130 }));
    }

    #[test]
    fn no_marker_means_no_profile() {
        let html = profile_page("Still intact", "400", true);
        let err = resolve_profile(&judge(), &Document::parse(&html), 130).unwrap_err();
        assert!(matches!(err, ItemError::Parse(_)));
    }

    #[test]
    fn missing_minors_link_still_yields_profile() {
        let html = profile_page("Exceeded rookie limits during 2015 season", "140", false);
        let p = resolve_profile(&judge(), &Document::parse(&html), 130).unwrap();
        assert_eq!(p.minors_link, None);
    }

    #[test]
    fn marker_year_parsing() {
        assert_eq!(rookie_year("Exceeded rookie limits during 2015 season"), Some(2015));
        assert_eq!(rookie_year("exceeded rookie limits during the 2009 season"), Some(2009));
        assert_eq!(rookie_year("Exceeded rookie limits during"), None);
    }

    #[tokio::test]
    async fn rejected_players_are_not_recorded() {
        let source = Arc::new(
            MemorySource::default()
                .with(
                    "/players/j/judgeaa01.shtml",
                    &profile_page("Exceeded rookie limits during 2016 season", "140", true),
                )
                .with(
                    "/players/s/smithjo01.shtml",
                    &profile_page("Exceeded rookie limits during 2015 season", "90", true),
                ),
        );
        let conn = db::memory();
        let links: Vec<(String, PlayerId)> = ["judgeaa01", "smithjo01", "doejo01"]
            .iter()
            .map(|id| {
                let path = format!("/players/{}/{}.shtml", &id[..1], id);
                let pid = PlayerId::from_profile_path(&path).unwrap();
                (path, pid)
            })
            .collect();
        db::save_profile_links(&conn, "/teams/NYY/2015.shtml", &links).unwrap();
        let mut summary = RunSummary::new();

        let stats = run(source, &conn, &Settings::default(), &mut summary).await.unwrap();
        // judge: no 2016 row in the table → parse failure; smith: 90 PA; doe: 404
        assert_eq!((stats.ok, stats.skipped), (0, 3));
        assert!(db::get_player(&conn, &judge()).unwrap().is_none());
        // only the fetch failure stays pending
        let pending = db::pending_profiles(&conn).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.as_str(), "doejo01");
    }

    #[tokio::test]
    async fn accepted_player_is_recorded() {
        let source = Arc::new(MemorySource::default().with(
            "/players/j/judgeaa01.shtml",
            &profile_page("Exceeded rookie limits during 2015 season", "140", false),
        ));
        let conn = db::memory();
        db::save_profile_links(
            &conn,
            "/teams/NYY/2015.shtml",
            &[("/players/j/judgeaa01.shtml".to_string(), judge())],
        )
        .unwrap();
        let mut summary = RunSummary::new();

        let stats = run(source, &conn, &Settings::default(), &mut summary).await.unwrap();
        assert_eq!((stats.ok, stats.produced), (1, 1));
        let p = db::get_player(&conn, &judge()).unwrap().unwrap();
        assert_eq!((p.rookie_season, p.rookie_pa, p.minors_link), (2015, 140, None));
        assert!(summary.is_empty());
    }
}
