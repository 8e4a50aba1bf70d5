//! EasyScore Administration CLI

mod folder;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use easyscore_core::{
    EngineConfig, EntryId, EntryPatch, ImportApplied, ImportPlan, Library, LibraryEngine,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "easyscore-admin")]
#[command(author = "EasyScore Contributors")]
#[command(version = "0.1.0")]
#[command(about = "EasyScore library administration and snapshot tool")]
struct Cli {
    /// Directory holding the library stores
    #[arg(short, long, global = true, default_value = "./data/easyscore")]
    data_dir: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the data directory and write a default config
    Init {
        /// Metadata store quota in bytes
        #[arg(long)]
        quota: Option<u64>,
    },

    /// Replace the library with the images in a folder
    Load { dir: PathBuf },

    /// List library entries in order
    List {
        #[arg(long)]
        json: bool,
    },

    /// Edit one entry
    Set {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        bpm: Option<i64>,
        #[arg(long)]
        zoom: Option<i64>,
    },

    /// Remove one entry and its image
    Remove { id: String },

    /// Move the entry at FROM to position TO (0-based)
    Move { from: usize, to: usize },

    /// Export the library as a self-contained snapshot
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a snapshot; shows the plan unless --yes is given
    Import {
        file: PathBuf,
        #[arg(long)]
        yes: bool,
    },

    /// Remove every entry and wipe both stores
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Serialize)]
struct ListRow<'a> {
    index: usize,
    id: &'a str,
    name: &'a str,
    bpm: u16,
    zoom: u16,
    loaded: bool,
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn open_engine(data_dir: &std::path::Path) -> Result<LibraryEngine> {
    let config = EngineConfig::load(data_dir)?;
    let engine = LibraryEngine::open(&config)
        .await
        .with_context(|| format!("Failed to open library in {:?}", data_dir))?;
    Ok(engine)
}

fn print_library(library: &Library) {
    if let Some(label) = &library.source_label {
        println!("Source: {}", label);
    }
    if library.is_empty() {
        println!("Library is empty");
        return;
    }
    for (index, entry) in library.entries.iter().enumerate() {
        let marker = if index == library.active_index { '>' } else { ' ' };
        println!(
            "{} {:>3}  {:<24} {:<40} {:>3} bpm  {:>5}  {}",
            marker,
            index,
            entry.id,
            entry.name,
            entry.bpm,
            entry.zoom,
            if entry.is_loaded() { "image" } else { "no image" }
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Init { quota } => {
            let mut config = EngineConfig::load(&cli.data_dir)?;
            if let Some(quota) = quota {
                config.metadata_quota_bytes = quota;
            }
            config.save()?;
            let engine = LibraryEngine::open(&config).await?;
            println!(
                "Library initialized at {:?} ({} entries)",
                cli.data_dir,
                engine.library().await.len()
            );
        }

        Commands::Load { dir } => {
            let engine = open_engine(&cli.data_dir).await?;
            let files = folder::read_images(&dir).await?;
            let count = engine
                .load_library(files, folder::folder_label(&dir))
                .await?;
            println!("Loaded {} scores from {:?}", count, dir);
        }

        Commands::List { json } => {
            let engine = open_engine(&cli.data_dir).await?;
            let library = engine.library().await;
            if json {
                let rows: Vec<ListRow> = library
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(index, e)| ListRow {
                        index,
                        id: e.id.as_str(),
                        name: &e.name,
                        bpm: e.bpm.get(),
                        zoom: e.zoom.get(),
                        loaded: e.is_loaded(),
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_library(&library);
                let report = engine.rehydration_report();
                if report.missing_image > 0 {
                    println!("{} entries have no stored image", report.missing_image);
                }
            }
        }

        Commands::Set {
            id,
            name,
            bpm,
            zoom,
        } => {
            let patch = EntryPatch { name, bpm, zoom };
            if patch.is_empty() {
                bail!("Nothing to change: pass --name, --bpm or --zoom");
            }
            let engine = open_engine(&cli.data_dir).await?;
            let entry = engine.update_entry(&EntryId::new(id), patch).await?;
            println!(
                "{}: {} at {} bpm, zoom {}",
                entry.id, entry.name, entry.bpm, entry.zoom
            );
        }

        Commands::Remove { id } => {
            let engine = open_engine(&cli.data_dir).await?;
            let removed = engine.remove_entry(&EntryId::new(id)).await?;
            println!("Removed {} ({})", removed.name, removed.id);
        }

        Commands::Move { from, to } => {
            let engine = open_engine(&cli.data_dir).await?;
            engine.move_entry(from, to).await?;
            print_library(&engine.library().await);
        }

        Commands::Export { output } => {
            let engine = open_engine(&cli.data_dir).await?;
            let outcome = engine.export_snapshot().await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&outcome.file_name));
            tokio::fs::write(&path, outcome.document.as_bytes())
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            if !outcome.skipped.is_empty() {
                println!(
                    "Warning: {} scores have no stored image and were not exported: {}",
                    outcome.skipped.len(),
                    outcome.skipped.join(", ")
                );
            }
            println!("Exported to {:?}", path);
        }

        Commands::Import { file, yes } => {
            let engine = open_engine(&cli.data_dir).await?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {:?}", file))?;
            let pending = engine.import_snapshot(&bytes).await?;

            match pending.plan() {
                ImportPlan::Replace { summary, .. } => println!(
                    "Import will replace {} current scores with {} scores from the snapshot",
                    summary.current, summary.incoming
                ),
                ImportPlan::Merge { report, .. } => {
                    println!(
                        "Legacy snapshot: {} of {} scores match the current library",
                        report.matched, report.total
                    );
                    if !report.unmatched.is_empty() {
                        println!("Not found: {}", report.unmatched.join(", "));
                    }
                }
            }
            if !yes {
                println!("Nothing applied; rerun with --yes to import");
                return Ok(());
            }

            match engine.apply_import(pending).await? {
                ImportApplied::Replaced { entries } => println!("Imported {} scores", entries),
                ImportApplied::Merged(report) => {
                    println!("Updated {} scores", report.matched)
                }
            }
        }

        Commands::Clear { yes } => {
            let engine = open_engine(&cli.data_dir).await?;
            let count = engine.library().await.len();
            if !yes {
                println!(
                    "This removes {} scores and all stored images; rerun with --yes",
                    count
                );
                return Ok(());
            }
            engine.clear().await;
            println!("Removed {} scores", count);
        }
    }

    Ok(())
}
