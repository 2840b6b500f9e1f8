//! music-linker CLI: populate a song sheet with streaming links, or remove
//! duplicate rows.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use music_linker::backends::{SpotifyBackend, YoutubeBackend};
use music_linker::config::{Config, RowRange};
use music_linker::dedup::run_dedup;
use music_linker::llm::{run_llm_stage, HttpCompletionClient};
use music_linker::models::SongRecord;
use music_linker::progress::{set_log_only, ProgressFile};
use music_linker::runner::{BatchRunner, RunOptions, RunTermination};
use music_linker::sheet::{CellUpdate, SheetStore, SqliteSheet};
use music_linker::source::{CandidateSource, RetryPolicy, SourceAdapter};

#[derive(Parser)]
#[command(name = "music-linker", about = "Fill a song sheet with streaming links")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "music-linker.toml", global = true)]
    config: PathBuf,

    /// Hide progress bars for tail-friendly output
    #[arg(long, global = true)]
    log_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search the configured sources and fill link cells
    Run {
        /// Row range override: "all", "7", "5-40", or "5-end"
        #[arg(long)]
        rows: Option<RowRange>,

        /// Source override: any of "spotify", "youtube"
        #[arg(long, value_delimiter = ',')]
        sources: Option<Vec<String>>,

        /// Ignore saved progress and start at the range beginning
        #[arg(long)]
        no_resume: bool,
    },
    /// Remove duplicate (artist, title) rows, keeping the first
    Dedup {
        /// Compare keys case-sensitively
        #[arg(long)]
        case_sensitive: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    set_log_only(cli.log_only);

    let config = Config::load(&cli.config)?;
    let mut sheet = SqliteSheet::open(&config.sheet.path)?;

    match cli.command {
        Command::Run { rows, sources, no_resume } => {
            let mut config = config;
            if let Some(sources) = sources {
                config.run.sources = sources;
                config.validate()?;
            }
            let mut options = config.run_options();
            if let Some(rows) = rows {
                options.start_row = rows.start;
                options.end_row = rows.end;
            }
            if no_resume {
                options.resume = false;
            }
            run_linker(&mut sheet, &config, options)
        }
        Command::Dedup { case_sensitive } => {
            let removed = run_dedup(&mut sheet, &config.columns, case_sensitive)?;
            println!("removed {removed} duplicate row(s)");
            Ok(())
        }
    }
}

fn run_linker(sheet: &mut SqliteSheet, config: &Config, options: RunOptions) -> Result<()> {
    run_llm_pass(sheet, config)?;

    let mut spotify = if options.selection.primary {
        let creds = config
            .spotify
            .as_ref()
            .context("spotify requested but not configured")?;
        Some(SourceAdapter::new(
            SpotifyBackend::new(creds.client_id.clone(), creds.client_secret.clone()),
            RetryPolicy::default(),
        ))
    } else {
        None
    };
    let mut youtube = if options.selection.secondary {
        let creds = config
            .youtube
            .as_ref()
            .context("youtube requested but not configured")?;
        Some(SourceAdapter::new(
            YoutubeBackend::new(creds.api_key.clone()),
            RetryPolicy::default(),
        ))
    } else {
        None
    };

    let primary = spotify.as_mut().map(|a| a as &mut dyn CandidateSource);
    let secondary = youtube.as_mut().map(|a| a as &mut dyn CandidateSource);
    let progress = ProgressFile::new(config.sheet.progress_file.clone());

    let mut runner = BatchRunner::new(
        sheet,
        config.columns.clone(),
        options,
        progress,
        primary,
        secondary,
    );

    // ctrl-c requests a stop at the next row boundary; progress is already
    // persisted per row, so a hard kill loses nothing either
    let stop = runner.stop_flag();
    ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
        .context("failed to install interrupt handler")?;

    let report = runner.run()?;
    if let Some(path) = &config.run.stats_file {
        report.stats.write_to_file(path)?;
    }

    match report.termination {
        RunTermination::Completed => {
            info!("run completed");
            Ok(())
        }
        RunTermination::Paused => {
            warn!("run paused on quota exhaustion; rerun after the quota resets to resume");
            Ok(())
        }
        RunTermination::Stopped => {
            info!("run stopped on request; rerun to resume");
            Ok(())
        }
        RunTermination::Aborted(reason) => bail!("run aborted: {reason}"),
    }
}

/// Optional LLM correction pass over artist/title cells, run before linking.
fn run_llm_pass(sheet: &mut SqliteSheet, config: &Config) -> Result<()> {
    let Some(llm) = &config.llm else {
        return Ok(());
    };

    let rows = sheet.read_all_rows()?;
    let mut records: Vec<SongRecord> = rows
        .iter()
        .enumerate()
        .skip(1) // header
        .map(|(idx, cells)| SongRecord::from_cells(idx + 1, cells, &config.columns))
        .filter(SongRecord::is_processable)
        .collect();
    if records.is_empty() {
        return Ok(());
    }

    let client =
        HttpCompletionClient::new(llm.endpoint.clone(), llm.api_key.clone(), llm.model.clone());
    let original = records.clone();
    let applied = run_llm_stage(&client, &mut records)?;
    if applied == 0 {
        return Ok(());
    }

    let mut updates = Vec::new();
    for (record, before) in records.iter().zip(&original) {
        if record.artist != before.artist {
            updates.push(CellUpdate {
                row: record.row,
                col: config.columns.artist,
                value: record.artist.clone(),
            });
        }
        if record.title != before.title {
            updates.push(CellUpdate {
                row: record.row,
                col: config.columns.title,
                value: record.title.clone(),
            });
        }
        if record.notes != before.notes {
            updates.push(CellUpdate {
                row: record.row,
                col: config.columns.notes,
                value: record.notes.clone(),
            });
        }
    }
    sheet.batch_write(&updates)?;
    info!("llm pass corrected {applied} row(s)");
    Ok(())
}
