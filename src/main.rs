mod dataset;
mod db;
mod error;
mod fetcher;
mod parser;
mod pipeline;
mod settings;
mod stages;
mod summary;

use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::info;

use fetcher::Fetcher;
use settings::SettingsArgs;
use stages::Stage;
use summary::RunSummary;

#[derive(Parser)]
#[command(
    name = "rookie_roba",
    about = "Builds a rookie rOBA / minor-league stats dataset from baseball-reference"
)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage 1: collect team-season links from league pages
    Teams,
    /// Stage 2: select qualified batters from team pages
    Batters,
    /// Stage 3: resolve rookie seasons from player profiles
    Rookies,
    /// Stage 4: collect pre-rookie minor-league rows
    Minors,
    /// Write the dataset CSV from what has been crawled so far
    Export,
    /// All stages (resuming from checkpoints), then export
    Run,
    /// Show checkpoint progress and skipped items
    Stats,
    /// Delete all checkpoints
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = cli.settings.resolve()?;
    info!(
        seasons = %format!("{}-{}", settings.start_year, settings.end_year),
        min_pa = settings.min_pa,
        interval_ms = settings.request_interval_ms,
        concurrency = settings.concurrency,
        db = %settings.db_path.display(),
        "settings loaded"
    );

    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    let mut summary = RunSummary::new();

    let result = match cli.command {
        Commands::Teams => crawl(Some(Stage::Teams), &conn, &settings, &mut summary).await,
        Commands::Batters => crawl(Some(Stage::Batters), &conn, &settings, &mut summary).await,
        Commands::Rookies => crawl(Some(Stage::Rookies), &conn, &settings, &mut summary).await,
        Commands::Minors => crawl(Some(Stage::Minors), &conn, &settings, &mut summary).await,
        Commands::Run => crawl(None, &conn, &settings, &mut summary).await,
        Commands::Export => pipeline::export(&conn, &settings).map(|_| ()),
        Commands::Stats => print_stats(&conn),
        Commands::Reset => {
            db::reset(&conn)?;
            println!("Checkpoints cleared: {}", settings.db_path.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// One stage, or every stage plus export when `stage` is `None`. The skip
/// summary is printed even when a stage bails out on a store error.
async fn crawl(
    stage: Option<Stage>,
    conn: &rusqlite::Connection,
    settings: &settings::Settings,
    summary: &mut RunSummary,
) -> anyhow::Result<()> {
    let source = Arc::new(Fetcher::new(settings)?);
    let result = match stage {
        Some(stage) => pipeline::run_stage(stage, &source, conn, settings, summary)
            .await
            .map(|_| ()),
        None => pipeline::run_all(&source, conn, settings, summary)
            .await
            .map(|_| ()),
    };
    summary.print();
    result
}

fn print_stats(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let s = db::get_stats(conn)?;
    println!("Seasons:          {}", s.seasons);
    println!("Team links:       {} ({} pages pending)", s.team_links, s.team_pages_pending);
    println!("Profile links:    {} ({} pending)", s.profile_links, s.profiles_pending);
    println!("Rookie profiles:  {} ({} without minors link)", s.players, s.players_without_minors);
    println!("Minors pending:   {}", s.minors_pending);
    println!("Minor-league rows {} across {} players", s.minor_rows, s.players_with_rows);

    if !s.skips.is_empty() {
        println!("\n--- Skipped (all runs) ---");
        for (stage, kind, n) in &s.skips {
            println!("  {:<8} {:<9} {:>6}", stage, kind, n);
        }
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
