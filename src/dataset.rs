use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::stages::{MinorSeasonRow, PlayerProfile};

/// Outcome columns appended after the minor-league stat columns.
pub const OUTCOME_COLUMNS: [&str; 4] = ["PlayerID", "Rookie_Season", "Rookie_rOBA", "Rookie_PA"];

/// The flat training table: one row per retained minor-league season.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn players(&self) -> usize {
        let id = self.columns.len() - OUTCOME_COLUMNS.len();
        let mut ids: Vec<&str> = self.rows.iter().map(|r| r[id].as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

/// Join each player's retained rows to their rookie outcome. Players with no
/// retained rows are omitted entirely.
pub fn assemble(players: &[(PlayerProfile, Vec<MinorSeasonRow>)]) -> Dataset {
    // Minor-league page layouts vary by era; take the union of their columns
    // in first-seen order.
    let mut stat_columns: Vec<String> = Vec::new();
    for (_, rows) in players {
        for row in rows {
            for (header, _) in &row.cells {
                if !stat_columns.contains(header) && !OUTCOME_COLUMNS.contains(&header.as_str()) {
                    stat_columns.push(header.clone());
                }
            }
        }
    }

    let rows: Vec<Vec<String>> = players
        .par_iter()
        .filter(|(_, rows)| !rows.is_empty())
        .flat_map_iter(|(profile, rows)| rows.iter().map(|r| flatten(&stat_columns, profile, r)))
        .collect();

    let mut columns = stat_columns;
    columns.extend(OUTCOME_COLUMNS.iter().map(|c| c.to_string()));
    Dataset { columns, rows }
}

fn flatten(stat_columns: &[String], profile: &PlayerProfile, row: &MinorSeasonRow) -> Vec<String> {
    let mut out: Vec<String> = stat_columns
        .iter()
        .map(|col| {
            row.cells
                .iter()
                .find(|(h, _)| h == col)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        })
        .collect();
    out.push(profile.player_id.to_string());
    out.push(profile.rookie_season.to_string());
    out.push(profile.rookie_roba.to_string());
    out.push(profile.rookie_pa.to_string());
    out
}

pub fn write_csv<W: Write>(dataset: &Dataset, writer: W) -> Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(&dataset.columns)?;
    for row in &dataset.rows {
        w.write_record(row)?;
    }
    w.flush()?;
    Ok(())
}

/// Write the dataset file, creating its directory if needed.
pub fn save(dataset: &Dataset, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_csv(dataset, file).with_context(|| format!("Failed to write {}", path.display()))
}
