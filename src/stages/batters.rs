use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info};

use super::{record_skip, site_path, PlayerId, Stage, StageStats, TeamSeasonLink};
use crate::db;
use crate::error::ItemError;
use crate::fetcher::{crawl, progress_bar, CrawlItem, PageSource};
use crate::parser::extract::{find_links, find_table_by_id, first_table};
use crate::parser::{Document, Table};
use crate::settings::Settings;
use crate::summary::RunSummary;

static PROFILE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/players/[a-z]/[^/]+\.shtml$").unwrap());

/// Current layout first, then the pre-2024 id.
const BATTING_TABLE_IDS: &[&str] = &["players_standard_batting", "team_batting"];
const NAME_COLUMNS: &[&str] = &["Player", "Name"];
const PITCHER_POSITIONS: &[&str] = &["P", "SP", "RP"];
/// Repeated header rows inside tbody carry the column name as their value.
const HEADER_PLACEHOLDER: &str = "Pos";

/// Remove handedness / status markers ("Judge*", "Gardner#").
pub fn strip_markers(name: &str) -> &str {
    name.trim_matches(|c: char| c == '*' || c == '#' || c.is_whitespace())
}

/// Display names of non-pitchers with at least `min_ab` at-bats.
pub fn qualifying_names(table: &Table, min_ab: i64) -> Result<BTreeSet<String>, ItemError> {
    let missing = |col: &str| ItemError::parse(format!("batting table has no {} column", col));
    let pos = table.column("Pos").ok_or_else(|| missing("Pos"))?;
    let ab = table.column("AB").ok_or_else(|| missing("AB"))?;
    let name = table.column_any(NAME_COLUMNS).ok_or_else(|| missing("Player"))?;

    let names = table
        .records()
        .filter(|r| match r.get(pos) {
            Some(p) => p != HEADER_PLACEHOLDER && !PITCHER_POSITIONS.contains(&p),
            None => false,
        })
        .filter(|r| {
            r.get(ab)
                .and_then(|v| v.parse::<i64>().ok())
                .is_some_and(|n| n >= min_ab)
        })
        .filter_map(|r| r.get(name).map(strip_markers))
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    Ok(names)
}

fn batting_table(doc: &Document) -> Option<Table> {
    BATTING_TABLE_IDS
        .iter()
        .find_map(|id| find_table_by_id(doc, id))
        .or_else(|| first_table(doc))
}

/// Profile links on a team page whose anchor text is a qualifying name.
pub fn qualified_profile_links(
    doc: &Document,
    min_ab: i64,
) -> Result<Vec<(String, PlayerId)>, ItemError> {
    let table = batting_table(doc).ok_or_else(|| ItemError::parse("no standard batting table"))?;
    let names = qualifying_names(&table, min_ab)?;

    let mut seen = BTreeSet::new();
    let links = find_links(doc, &PROFILE_LINK_RE)
        .into_iter()
        .filter(|l| names.contains(&l.text))
        .filter_map(|l| {
            let path = site_path(&l.href);
            let id = PlayerId::from_profile_path(&path)?;
            seen.insert(path.clone()).then_some((path, id))
        })
        .collect();
    Ok(links)
}

impl CrawlItem for TeamSeasonLink {
    fn path(&self) -> String {
        self.path.clone()
    }
}

/// Stage 2: team pages → unique qualifying player-profile links.
pub async fn run<S: PageSource>(
    source: Arc<S>,
    conn: &Connection,
    settings: &Settings,
    summary: &mut RunSummary,
) -> Result<StageStats> {
    let teams = db::pending_team_links(conn)?;
    let mut stats = StageStats::new(teams.len());
    if teams.is_empty() {
        info!("No pending team pages");
        return Ok(stats);
    }

    info!("Selecting qualified batters from {} team pages", teams.len());
    let pb = progress_bar(teams.len(), "batters")?;
    let min_ab = settings.min_pa;
    let mut rx = crawl(source, teams, settings.concurrency, move |_: &TeamSeasonLink, html: &str| {
        let doc = Document::parse(html);
        qualified_profile_links(&doc, min_ab)
    });

    while let Some((team, result)) = rx.recv().await {
        match result {
            Ok(links) => {
                let new = db::save_profile_links(conn, &team.path, &links)?;
                debug!(team = %team.path, qualified = links.len(), new, "team page parsed");
                stats.ok += 1;
                stats.produced += new;
            }
            Err(e) => {
                if record_skip(conn, summary, Stage::Batters, &team.path, &e)? {
                    db::mark_team_visited(conn, &team.path)?;
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

    fn team_page(rows: &[(&str, &str, &str, &str)]) -> String {
        let body: String = rows
            .iter()
            .map(|(name, href, pos, ab)| {
                format!(
                    "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
                    href, name, pos, ab
                )
            })
            .collect();
        format!(
            "<html><body><table id=\"team_batting\"><thead><tr><th>Name</th><th>Pos</th><th>AB</th></tr></thead><tbody>{}</tbody></table></body></html>",
            body
        )
    }

    #[test]
    fn only_non_pitchers_over_threshold() {
        let html = team_page(&[
            ("A", "/players/a/aaa01.shtml", "2B", "150"),
            ("B", "/players/b/bbb01.shtml", "P", "200"),
            ("C", "/players/c/ccc01.shtml", "OF", "50"),
        ]);
        let doc = Document::parse(&html);
        let table = find_table_by_id(&doc, "team_batting").unwrap();
        let names = qualifying_names(&table, 130).unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["A"]);
    }

    #[test]
    fn placeholders_markers_and_blank_positions() {
        let html = team_page(&[
            ("Judge*", "/players/j/judgeaa01.shtml", "RF", "528"),
            ("Gardner#", "/players/g/gardnbr01.shtml", "LF", "130"),
            ("Name", "", "Pos", "AB"),
            ("Team Totals", "", "", "5500"),
            ("Walk-on", "/players/w/walkon01.shtml", "C", "n/a"),
        ]);
        let doc = Document::parse(&html);
        let table = find_table_by_id(&doc, "team_batting").unwrap();
        let names = qualifying_names(&table, 130).unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["Gardner", "Judge"]);
    }

    #[test]
    fn links_match_names_exactly_and_dedupe() {
        let html = format!(
            "{}<a href=\"/players/j/judgeaa01.shtml\">Judge</a><a href=\"/players/j/judgeaa02.shtml\">Judge Jr.</a>",
            team_page(&[("Judge", "/players/j/judgeaa01.shtml", "RF", "528")])
        );
        let doc = Document::parse(&html);
        let links = qualified_profile_links(&doc, 130).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0, "/players/j/judgeaa01.shtml");
        assert_eq!(links[0].1.as_str(), "judgeaa01");
    }

    #[test]
    fn commented_current_layout() {
        let html = r#"<html><body><div class="placeholder"></div><!--
            <table id="players_standard_batting">
              <thead><tr><th>Rk</th><th>Player</th><th>Age</th><th>Pos</th><th>AB</th></tr></thead>
              <tbody>
                <tr><th>1</th><td><a href="/players/v/volpean01.shtml">Anthony&nbsp;Volpe</a></td><td>22</td><td>SS</td><td>541</td></tr>
                <tr><th>2</th><td><a href="/players/c/colege01.shtml">Gerrit&nbsp;Cole</a></td><td>32</td><td>SP</td><td>0</td></tr>
              </tbody>
            </table> --></body></html>"#;
        let doc = Document::parse(html);
        let links = qualified_profile_links(&doc, 130).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].1.as_str(), "volpean01");
    }

    #[test]
    fn missing_table_is_a_parse_failure() {
        let doc = Document::parse("<html><body><p>Not found</p></body></html>");
        assert!(matches!(qualified_profile_links(&doc, 130), Err(ItemError::Parse(_))));
    }

    #[tokio::test]
    async fn traded_player_is_collected_once() {
        let nyy = team_page(&[("Judge", "/players/j/judgeaa01.shtml", "RF", "300")]);
        let sdp = team_page(&[
            ("Judge", "/players/j/judgeaa01.shtml", "RF", "200"),
            ("Machado", "/players/m/machama01.shtml", "3B", "600"),
        ]);
        let source = Arc::new(
            MemorySource::default()
                .with("/teams/NYY/2015.shtml", &nyy)
                .with("/teams/SDP/2015.shtml", &sdp),
        );
        let conn = db::memory();
        db::save_team_links(
            &conn,
            2015,
            &[
                TeamSeasonLink { path: "/teams/NYY/2015.shtml".into(), season: 2015 },
                TeamSeasonLink { path: "/teams/SDP/2015.shtml".into(), season: 2015 },
                TeamSeasonLink { path: "/teams/NYY/2015.shtml".into(), season: 2015 },
                TeamSeasonLink { path: "/teams/XXX/2015.shtml".into(), season: 2015 },
            ],
        )
        .unwrap();
        let mut summary = RunSummary::new();

        let stats = run(Arc::clone(&source), &conn, &Settings::default(), &mut summary)
            .await
            .unwrap();
        assert_eq!((stats.total, stats.ok, stats.skipped, stats.produced), (3, 2, 1, 2));
        assert_eq!(source.request_count(), 3);
        let ids: BTreeSet<String> = db::pending_profiles(&conn)
            .unwrap()
            .into_iter()
            .map(|(_, id)| id.to_string())
            .collect();
        assert_eq!(ids, BTreeSet::from(["judgeaa01".to_string(), "machama01".to_string()]));
        // 404 team page stays pending for the next run
        assert_eq!(db::pending_team_links(&conn).unwrap().len(), 1);
    }
}
