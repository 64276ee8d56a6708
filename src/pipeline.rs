use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use crate::dataset::{self, Dataset};
use crate::db;
use crate::fetcher::PageSource;
use crate::settings::Settings;
use crate::stages::{self, Stage, StageStats};
use crate::summary::RunSummary;

pub const CRAWL_STAGES: [Stage; 4] = [Stage::Teams, Stage::Batters, Stage::Rookies, Stage::Minors];

pub async fn run_stage<S: PageSource>(
    stage: Stage,
    source: &Arc<S>,
    conn: &Connection,
    settings: &Settings,
    summary: &mut RunSummary,
) -> Result<StageStats> {
    let t = Instant::now();
    let source = Arc::clone(source);
    let stats = match stage {
        Stage::Teams => stages::roster::run(source, conn, settings, summary).await?,
        Stage::Batters => stages::batters::run(source, conn, settings, summary).await?,
        Stage::Rookies => stages::rookies::run(source, conn, settings, summary).await?,
        Stage::Minors => stages::minors::run(source, conn, settings, summary).await?,
    };
    println!(
        "{:<8} {} pages: {} ok, {} skipped, {} {} ({:.1}s)",
        stage.as_str(),
        stats.total,
        stats.ok,
        stats.skipped,
        stats.produced,
        produced_label(stage),
        t.elapsed().as_secs_f64()
    );
    Ok(stats)
}

fn produced_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Teams => "team links",
        Stage::Batters => "new profile links",
        Stage::Rookies => "rookie profiles",
        Stage::Minors => "minor-league rows",
    }
}

/// Every crawl stage in order, each picking up only what is still pending.
pub async fn run_all<S: PageSource>(
    source: &Arc<S>,
    conn: &Connection,
    settings: &Settings,
    summary: &mut RunSummary,
) -> Result<Dataset> {
    for stage in CRAWL_STAGES {
        run_stage(stage, source, conn, settings, summary).await?;
    }
    export(conn, settings)
}

/// Stage 5: flatten checkpointed profiles and rows into the dataset file.
pub fn export(conn: &Connection, settings: &Settings) -> Result<Dataset> {
    let players = db::load_players_with_rows(conn)?;
    let dataset = dataset::assemble(&players);
    dataset::save(&dataset, &settings.output)?;

    let contributing = dataset.players();
    info!(
        rows = dataset.rows.len(),
        players = contributing,
        path = %settings.output.display(),
        "dataset written"
    );
    println!(
        "Wrote {} rows for {} players to {}",
        dataset.rows.len(),
        contributing,
        settings.output.display()
    );
    if players.len() > contributing {
        println!(
            "{} rookie profiles contributed no minor-league rows",
            players.len() - contributing
        );
    }
    Ok(dataset)
}
