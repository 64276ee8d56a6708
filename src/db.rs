use std::ops::RangeInclusive;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::error::ItemError;
use crate::stages::{MinorSeasonRow, PlayerId, PlayerProfile, Stage, TeamSeasonLink};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS seasons (
            season     INTEGER PRIMARY KEY,
            visited_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS team_links (
            season     INTEGER NOT NULL,
            ordinal    INTEGER NOT NULL,
            path       TEXT NOT NULL,
            visited    BOOLEAN NOT NULL DEFAULT 0,
            PRIMARY KEY (season, ordinal)
        );
        CREATE INDEX IF NOT EXISTS idx_team_links_path ON team_links(path);

        CREATE TABLE IF NOT EXISTS profile_links (
            id         INTEGER PRIMARY KEY,
            path       TEXT UNIQUE NOT NULL,
            player_id  TEXT UNIQUE NOT NULL,
            visited    BOOLEAN NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_profile_links_visited ON profile_links(visited);

        CREATE TABLE IF NOT EXISTS players (
            id             INTEGER PRIMARY KEY,
            player_id      TEXT UNIQUE NOT NULL,
            rookie_season  INTEGER NOT NULL,
            rookie_roba    REAL NOT NULL,
            rookie_pa      INTEGER NOT NULL CHECK(rookie_pa > 0),
            minors_link    TEXT,
            minors_visited BOOLEAN NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS minor_rows (
            player_id  TEXT NOT NULL REFERENCES players(player_id),
            ordinal    INTEGER NOT NULL,
            year       INTEGER NOT NULL,
            level      TEXT NOT NULL,
            team       TEXT NOT NULL,
            cells      TEXT NOT NULL,
            PRIMARY KEY (player_id, ordinal)
        );

        CREATE TABLE IF NOT EXISTS skips (
            id         INTEGER PRIMARY KEY,
            run_id     TEXT NOT NULL,
            stage      TEXT NOT NULL,
            item       TEXT NOT NULL,
            kind       TEXT NOT NULL,
            detail     TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_skips_stage ON skips(stage, kind);
        ",
    )?;
    Ok(())
}

// ── Stage 1: seasons → team links ──

pub fn pending_seasons(conn: &Connection, range: RangeInclusive<i32>) -> Result<Vec<i32>> {
    let mut stmt = conn.prepare("SELECT 1 FROM seasons WHERE season = ?1")?;
    let mut pending = Vec::new();
    for season in range {
        if !stmt.exists([season])? {
            pending.push(season);
        }
    }
    Ok(pending)
}

/// Store a season's links in page order and mark the season done.
pub fn save_team_links(conn: &Connection, season: i32, links: &[TeamSeasonLink]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO team_links (season, ordinal, path) VALUES (?1, ?2, ?3)",
        )?;
        for (i, link) in links.iter().enumerate() {
            stmt.execute(rusqlite::params![season, i as i64, link.path])?;
        }
        tx.execute("INSERT OR IGNORE INTO seasons (season) VALUES (?1)", [season])?;
    }
    tx.commit()?;
    Ok(())
}

pub fn mark_season_visited(conn: &Connection, season: i32) -> Result<()> {
    conn.execute("INSERT OR IGNORE INTO seasons (season) VALUES (?1)", [season])?;
    Ok(())
}

/// Full stage-1 output: season ascending, page order, duplicates included.
#[cfg(test)]
pub fn team_links(conn: &Connection) -> Result<Vec<TeamSeasonLink>> {
    let mut stmt = conn.prepare("SELECT path, season FROM team_links ORDER BY season, ordinal")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(TeamSeasonLink {
                path: row.get(0)?,
                season: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stage 2: team links → profile links ──

/// Unvisited team pages, one per distinct path, in first-seen order.
pub fn pending_team_links(conn: &Connection) -> Result<Vec<TeamSeasonLink>> {
    let mut stmt = conn.prepare(
        "SELECT path, MIN(season) FROM team_links
         WHERE visited = 0
         GROUP BY path
         ORDER BY MIN(season), MIN(ordinal)",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(TeamSeasonLink {
                path: row.get(0)?,
                season: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Insert a team's qualifying profile links (duplicates across teams are
/// ignored) and mark the team page visited. Returns newly seen links.
pub fn save_profile_links(
    conn: &Connection,
    team_path: &str,
    links: &[(String, PlayerId)],
) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt =
            tx.prepare("INSERT OR IGNORE INTO profile_links (path, player_id) VALUES (?1, ?2)")?;
        for (path, id) in links {
            count += stmt.execute(rusqlite::params![path, id.as_str()])?;
        }
        tx.execute("UPDATE team_links SET visited = 1 WHERE path = ?1", [team_path])?;
    }
    tx.commit()?;
    Ok(count)
}

pub fn mark_team_visited(conn: &Connection, team_path: &str) -> Result<()> {
    conn.execute("UPDATE team_links SET visited = 1 WHERE path = ?1", [team_path])?;
    Ok(())
}

// ── Stage 3: profile links → players ──

pub fn pending_profiles(conn: &Connection) -> Result<Vec<(String, PlayerId)>> {
    let mut stmt =
        conn.prepare("SELECT path, player_id FROM profile_links WHERE visited = 0 ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, PlayerId::from_stored(row.get(1)?)))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn save_player(conn: &Connection, profile_path: &str, p: &PlayerProfile) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO players
         (player_id, rookie_season, rookie_roba, rookie_pa, minors_link)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            p.player_id.as_str(),
            p.rookie_season,
            p.rookie_roba,
            p.rookie_pa,
            p.minors_link,
        ],
    )?;
    tx.execute("UPDATE profile_links SET visited = 1 WHERE path = ?1", [profile_path])?;
    tx.commit()?;
    Ok(())
}

pub fn mark_profile_visited(conn: &Connection, profile_path: &str) -> Result<()> {
    conn.execute("UPDATE profile_links SET visited = 1 WHERE path = ?1", [profile_path])?;
    Ok(())
}

fn profile_from_row(row: &rusqlite::Row) -> rusqlite::Result<PlayerProfile> {
    Ok(PlayerProfile {
        player_id: PlayerId::from_stored(row.get(0)?),
        rookie_season: row.get(1)?,
        rookie_roba: row.get(2)?,
        rookie_pa: row.get(3)?,
        minors_link: row.get(4)?,
    })
}

#[cfg(test)]
pub fn get_player(conn: &Connection, id: &PlayerId) -> Result<Option<PlayerProfile>> {
    let p = conn
        .query_row(
            "SELECT player_id, rookie_season, rookie_roba, rookie_pa, minors_link
             FROM players WHERE player_id = ?1",
            [id.as_str()],
            profile_from_row,
        )
        .optional()?;
    Ok(p)
}

// ── Stage 4: players → minor-league rows ──

pub fn pending_minors(conn: &Connection) -> Result<Vec<PlayerProfile>> {
    let mut stmt = conn.prepare(
        "SELECT player_id, rookie_season, rookie_roba, rookie_pa, minors_link
         FROM players
         WHERE minors_link IS NOT NULL AND minors_visited = 0
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], profile_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replace a player's retained rows and mark the minors page visited.
pub fn save_minor_rows(conn: &Connection, id: &PlayerId, rows: &[MinorSeasonRow]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        tx.execute("DELETE FROM minor_rows WHERE player_id = ?1", [id.as_str()])?;
        let mut stmt = tx.prepare(
            "INSERT INTO minor_rows (player_id, ordinal, year, level, team, cells)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (i, r) in rows.iter().enumerate() {
            let cells = serde_json::to_string(&r.cells)?;
            stmt.execute(rusqlite::params![id.as_str(), i as i64, r.year, r.level, r.team, cells])?;
        }
        tx.execute(
            "UPDATE players SET minors_visited = 1 WHERE player_id = ?1",
            [id.as_str()],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn mark_minors_visited(conn: &Connection, id: &PlayerId) -> Result<()> {
    conn.execute(
        "UPDATE players SET minors_visited = 1 WHERE player_id = ?1",
        [id.as_str()],
    )?;
    Ok(())
}

// ── Stage 5: assembly input ──

/// Every profile with its retained rows, in resolution order.
pub fn load_players_with_rows(conn: &Connection) -> Result<Vec<(PlayerProfile, Vec<MinorSeasonRow>)>> {
    let mut stmt = conn.prepare(
        "SELECT player_id, rookie_season, rookie_roba, rookie_pa, minors_link
         FROM players ORDER BY id",
    )?;
    let players = stmt
        .query_map([], profile_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut row_stmt = conn.prepare(
        "SELECT year, level, team, cells FROM minor_rows WHERE player_id = ?1 ORDER BY ordinal",
    )?;
    let mut out = Vec::with_capacity(players.len());
    for p in players {
        let raw = row_stmt
            .query_map([p.player_id.as_str()], |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut rows = Vec::with_capacity(raw.len());
        for (year, level, team, cells) in raw {
            let cells = serde_json::from_str(&cells)
                .with_context(|| format!("Corrupt minor_rows cells for {}", p.player_id))?;
            rows.push(MinorSeasonRow { year, level, team, cells });
        }
        out.push((p, rows));
    }
    Ok(out)
}

// ── Skips ──

pub fn record_skip(
    conn: &Connection,
    run_id: &str,
    stage: Stage,
    item: &str,
    err: &ItemError,
) -> Result<()> {
    conn.execute(
        "INSERT INTO skips (run_id, stage, item, kind, detail) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![run_id, stage.as_str(), item, err.kind().as_str(), err.to_string()],
    )?;
    Ok(())
}

// ── Stats ──

pub struct Stats {
    pub seasons: usize,
    pub team_links: usize,
    pub team_pages_pending: usize,
    pub profile_links: usize,
    pub profiles_pending: usize,
    pub players: usize,
    pub players_without_minors: usize,
    pub minors_pending: usize,
    pub minor_rows: usize,
    pub players_with_rows: usize,
    /// (stage, kind, count) across all runs.
    pub skips: Vec<(String, String, usize)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };

    let mut stmt = conn.prepare(
        "SELECT stage, kind, COUNT(*) FROM skips GROUP BY stage, kind ORDER BY stage, kind",
    )?;
    let skips = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stats {
        seasons: count("SELECT COUNT(*) FROM seasons")?,
        team_links: count("SELECT COUNT(*) FROM team_links")?,
        team_pages_pending: count(
            "SELECT COUNT(DISTINCT path) FROM team_links WHERE visited = 0",
        )?,
        profile_links: count("SELECT COUNT(*) FROM profile_links")?,
        profiles_pending: count("SELECT COUNT(*) FROM profile_links WHERE visited = 0")?,
        players: count("SELECT COUNT(*) FROM players")?,
        players_without_minors: count("SELECT COUNT(*) FROM players WHERE minors_link IS NULL")?,
        minors_pending: count(
            "SELECT COUNT(*) FROM players WHERE minors_link IS NOT NULL AND minors_visited = 0",
        )?,
        minor_rows: count("SELECT COUNT(*) FROM minor_rows")?,
        players_with_rows: count("SELECT COUNT(DISTINCT player_id) FROM minor_rows")?,
        skips,
    })
}

/// Drop every checkpoint so the next run starts from stage 1.
pub fn reset(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DELETE FROM minor_rows;
         DELETE FROM players;
         DELETE FROM profile_links;
         DELETE FROM team_links;
         DELETE FROM seasons;
         DELETE FROM skips;",
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_schema(&conn).unwrap();
    conn
}
