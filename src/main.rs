use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dialoguer::Confirm;
use snapkit::config::Config;
use snapkit::photos::journal::{self, JournalAction, UndoSelection};
use snapkit::photos::{
    DeletionPolicy, DigestAlgorithm, DuplicateIndex, IndexOptions, Journal, RenameOptions,
    remove_duplicates, rename_by_date,
};
use snapkit::training::encode::DEFAULT_INDEX_OFFSET;
use snapkit::training::{Chart, TrainingHistory, WordIndex, render_chart};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "snapkit",
    version,
    about = "Rename photos by capture date, remove duplicates, chart training history"
)]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Config file (default: `<config dir>/snapkit/config.toml`)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Photo library workflows
    Photos {
        #[command(subcommand)]
        command: PhotosCmd,
    },

    /// Inspect or undo recorded renames and deletions
    Journal {
        #[command(subcommand)]
        command: JournalCmd,
    },

    /// Training history charts and helpers
    Training {
        #[command(subcommand)]
        command: TrainingCmd,
    },
}

#[derive(Subcommand, Debug)]
enum PhotosCmd {
    /// Rename files after their capture date
    Rename {
        /// Directory to rename files in (recursively)
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Only show what would be renamed
        #[arg(long)]
        dry_run: bool,
        /// chrono format for new names (default: `%Y-%m-%d %H%M%S`)
        #[arg(long, value_name = "FORMAT")]
        pattern: Option<String>,
        /// Use local time for files without embedded capture time
        #[arg(long)]
        local_time: bool,
        /// Only rename files with this extension (repeatable)
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,
    },

    /// Find and list groups of identical files
    Duplicates {
        /// Directory to scan; repeat to scan several, earlier ones win ties
        #[arg(short, long = "path", value_name = "DIR", required = true)]
        paths: Vec<PathBuf>,
        /// Content digest
        #[arg(long, value_enum)]
        algorithm: Option<DigestAlgorithm>,
        /// Print groups as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete duplicate files, keeping one copy of each
    Dedupe {
        /// Directory to scan; repeat to scan several, earlier ones win ties
        #[arg(short, long = "path", value_name = "DIR", required = true)]
        paths: Vec<PathBuf>,
        /// Content digest
        #[arg(long, value_enum)]
        algorithm: Option<DigestAlgorithm>,
        /// Only delete copies whose path contains this text
        #[arg(long, value_name = "TEXT")]
        delete_matching: Option<String>,
        /// Only show what would be deleted
        #[arg(long)]
        dry_run: bool,
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum JournalCmd {
    /// List journal records
    List {
        /// Directory holding the journal
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Undo recorded renames (latest record by default)
    Undo {
        /// Directory holding the journal
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Undo a specific record index
        #[arg(long, conflicts_with = "all")]
        record: Option<usize>,
        /// Undo every record
        #[arg(long, conflicts_with = "record")]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TrainingCmd {
    /// Print the best validation loss and accuracy epochs
    Summary {
        /// History file (JSON object of arrays, or CSV)
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },

    /// Chart training against validation curves
    Plot {
        /// History file (JSON object of arrays, or CSV)
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
        /// Image to write (`.svg` or `.png`)
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = Chart::Both)]
        chart: Chart,
        #[arg(long, value_name = "PX")]
        width: Option<u32>,
        #[arg(long, value_name = "PX")]
        height: Option<u32>,
    },

    /// Decode token ids back into words
    Decode {
        /// JSON object mapping words to ids
        #[arg(long, value_name = "FILE")]
        word_index: PathBuf,
        /// Comma-separated token ids
        #[arg(long, value_delimiter = ',', required = true)]
        indices: Vec<usize>,
        /// Ids reserved before the vocabulary starts
        #[arg(long, default_value_t = DEFAULT_INDEX_OFFSET)]
        offset: usize,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(format!("warn,snapkit={}", level)),
    )
    .format_timestamp(None)
    .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    let show_progress = !cli.quiet && std::io::stderr().is_terminal();

    match cli.command {
        Commands::Photos { command } => match command {
            PhotosCmd::Rename {
                path,
                dry_run,
                pattern,
                local_time,
                extensions,
            } => {
                let options = RenameOptions {
                    pattern: pattern.unwrap_or_else(|| config.rename.pattern.clone()),
                    dry_run,
                    use_local_time: local_time || config.rename.use_local_time,
                    extensions: if extensions.is_empty() {
                        config.rename.extensions.clone()
                    } else {
                        Some(extensions)
                    },
                    show_progress,
                };
                run_rename(&path, &options)?;
            }

            PhotosCmd::Duplicates {
                paths,
                algorithm,
                json,
            } => {
                let options = IndexOptions {
                    algorithm: algorithm.unwrap_or(config.dedupe.algorithm),
                    show_progress,
                };
                let index = build_index(&paths, &options, !json)?;

                if json {
                    println!("{}", serde_json::to_string_pretty(index.groups())?);
                } else if index.groups().is_empty() {
                    println!("No duplicates found.");
                } else {
                    println!("Found {} duplicate group(s):", index.groups().len());
                    for (i, group) in index.groups().iter().enumerate() {
                        println!(" Group {} ({}):", i + 1, group.digest);
                        for file in group.members() {
                            println!("   ▶ {}", file.display());
                        }
                    }
                }
            }

            PhotosCmd::Dedupe {
                paths,
                algorithm,
                delete_matching,
                dry_run,
                yes,
            } => {
                let options = IndexOptions {
                    algorithm: algorithm.unwrap_or(config.dedupe.algorithm),
                    show_progress,
                };
                let policy = DeletionPolicy::from_substring(
                    delete_matching.or_else(|| config.dedupe.delete_matching.clone()),
                );
                run_dedupe(&paths, &options, &policy, dry_run, yes)?;
            }
        },

        Commands::Journal { command } => match command {
            JournalCmd::List { path } => {
                let records = journal::read_records(&path).with_context(|| {
                    format!("Failed to read journal in {}", path.display())
                })?;
                if records.is_empty() {
                    println!("No journal records in {}", path.display());
                    return Ok(());
                }

                println!("🗂️  Journal:");
                for (i, (record, _)) in records.iter().enumerate() {
                    println!(
                        "\n[{}] {} - {:?} {} file(s)",
                        i,
                        record.timestamp,
                        record.action,
                        record.operations.len()
                    );
                    for op in &record.operations {
                        match &op.to {
                            Some(to) => println!("   ✏️  {} → {}", op.from.display(), to.display()),
                            None => println!("   🗑️  {}", op.from.display()),
                        }
                    }
                }
            }

            JournalCmd::Undo { path, record, all } => {
                let selection = match (record, all) {
                    (_, true) => UndoSelection::All,
                    (Some(index), false) => UndoSelection::Record(index),
                    (None, false) => UndoSelection::Latest,
                };
                let report = journal::undo(&path, selection)
                    .with_context(|| format!("Failed to undo journal in {}", path.display()))?;

                for (from, to) in &report.restored {
                    println!("🔄 Restored {} → {}", from.display(), to.display());
                }
                for (file, reason) in &report.skipped {
                    eprintln!("⚠️ Skipping {}: {}", file.display(), reason);
                }
                println!(
                    "🧹 Updated journal, removed {} record(s)",
                    report.records_removed
                );
            }
        },

        Commands::Training { command } => match command {
            TrainingCmd::Summary { input } => {
                let history = load_history(&input)?;
                let names: Vec<&str> = history.metric_names().collect();
                println!("Metrics: {}", names.join(", "));
                println!("{}", history.summary());
            }

            TrainingCmd::Plot {
                input,
                output,
                chart,
                width,
                height,
            } => {
                let history = load_history(&input)?;
                let (default_w, default_h) = chart.default_size();
                let size = (
                    width.or(config.plot.width).unwrap_or(default_w),
                    height.or(config.plot.height).unwrap_or(default_h),
                );
                render_chart(&history, chart, &output, Some(size))
                    .with_context(|| format!("Failed to draw chart to {}", output.display()))?;

                println!("✅ Saved {:?} chart to {}", chart, output.display());
                if chart == Chart::Both {
                    println!("{}", history.summary());
                }
            }

            TrainingCmd::Decode {
                word_index,
                indices,
                offset,
            } => {
                let index = WordIndex::load(&word_index).with_context(|| {
                    format!("Failed to load word index {}", word_index.display())
                })?;
                println!("{}", index.decode(&indices, offset));
            }
        },
    }

    Ok(())
}

fn load_history(input: &Path) -> Result<TrainingHistory> {
    TrainingHistory::load(input)
        .with_context(|| format!("Failed to load training history {}", input.display()))
}

/// `announce` prints the scanned directories; off when stdout carries JSON.
fn build_index(paths: &[PathBuf], options: &IndexOptions, announce: bool) -> Result<DuplicateIndex> {
    if announce {
        for path in paths {
            println!("▶ Scanning for duplicates in: {}", path.display());
        }
    }
    let index = DuplicateIndex::build(paths, options).context("Failed to index files")?;
    for (file, reason) in &index.skipped {
        eprintln!("⚠️ Skipped {}: {}", file.display(), reason);
    }
    log::info!(
        "Indexed {} file(s), hashed {} with {}",
        index.files_scanned,
        index.files_hashed,
        options.algorithm
    );
    Ok(index)
}

fn run_rename(path: &Path, options: &RenameOptions) -> Result<()> {
    println!("▶ Renaming files by capture date in: {}", path.display());

    let mut journal = if options.dry_run {
        Journal::disabled(JournalAction::Renamed)
    } else {
        Journal::open(path, JournalAction::Renamed)
    };
    let report = rename_by_date(path, options, &mut journal)
        .with_context(|| format!("Failed to rename files in {}", path.display()))?;
    let journal_file = journal.commit().context("Failed to write journal")?;

    for outcome in &report.renamed {
        if options.dry_run {
            println!(
                "   📦 [dry-run] RENAME {} → {} ({})",
                outcome.from.display(),
                outcome.to.display(),
                outcome.source
            );
        } else {
            println!(
                "   ✏️  Renamed {} → {} ({})",
                outcome.from.display(),
                outcome.to.display(),
                outcome.source
            );
        }
    }
    for (file, reason) in &report.failed {
        eprintln!("⚠️ Failed {}: {}", file.display(), reason);
    }

    println!(
        "\n{} renamed, {} already named, {} failed",
        report.renamed.len(),
        report.unchanged,
        report.failed.len()
    );
    if options.dry_run {
        println!("\n⚠️  Dry-run only; no files were changed.");
    } else if let Some(file) = journal_file {
        println!("\n✅ Recorded renames in {}", file.display());
    }
    Ok(())
}

fn run_dedupe(
    paths: &[PathBuf],
    options: &IndexOptions,
    policy: &DeletionPolicy,
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    let index = build_index(paths, options, true)?;
    if index.groups().is_empty() {
        println!("No duplicates found.");
        return Ok(());
    }

    let mut planned = 0;
    for (i, group) in index.groups().iter().enumerate() {
        let selected = policy.select(group);
        planned += selected.len();

        println!("\n✨ Group {}:", i + 1);
        for member in group.members() {
            if selected.contains(&member.as_path()) {
                println!("   🗑️  Delete  → {}", member.display());
            } else {
                println!("   🏆 Keeping → {}", member.display());
            }
        }
    }

    if planned == 0 {
        println!("\nNo duplicates match the deletion policy.");
        return Ok(());
    }

    if !dry_run && !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Permanently delete {} file(s)?", planned))
            .default(false)
            .interact()
            .context("Confirmation failed; pass --yes to skip it")?;
        if !confirmed {
            println!("Aborted; no files were changed.");
            return Ok(());
        }
    }

    // Deletions are journalled next to the first scanned directory
    let mut journal = if dry_run {
        Journal::disabled(JournalAction::Deleted)
    } else {
        Journal::open(&paths[0], JournalAction::Deleted)
    };
    let report = remove_duplicates(&index, policy, dry_run, &mut journal);
    let journal_file = journal.commit().context("Failed to write journal")?;

    for file in &report.deleted {
        if dry_run {
            println!("   📦 [dry-run] DELETE {}", file.display());
        } else {
            println!("   🗑️  Deleted {}", file.display());
        }
    }
    for (file, reason) in &report.skipped {
        eprintln!("⚠️ Skipped {}: {}", file.display(), reason);
    }
    for (file, reason) in &report.failed {
        eprintln!("⚠️ Failed {}: {}", file.display(), reason);
    }

    if dry_run {
        println!("\n⚠️  Dry-run only; no files were changed.");
    } else if let Some(file) = journal_file {
        println!("\n✅ Recorded deletions in {}", file.display());
    }
    Ok(())
}
