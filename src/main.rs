//! # docsort CLI
//!
//! The `docsort` binary runs the staging → archive pipeline and the operator
//! commands around it.
//!
//! ## Usage
//!
//! ```bash
//! docsort --config ./config/docsort.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsort init` | Create archive root, staging dir and ledger schema |
//! | `docsort run` | Watch staging and archive stable files until Ctrl-C |
//! | `docsort classify <file>` | Classify one file without side effects |
//! | `docsort ledger list` | Query processed fingerprints |
//! | `docsort ledger show <fp>` | One ledger entry with its records |
//! | `docsort stats` | Ledger, record and archive totals |
//! | `docsort audit` | Check the metadata log for anomalies |
//! | `docsort check` | Health of staging, archive, ledger and lexicon |

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use docsort::pipeline::{LoopController, Pipeline};
use docsort::{audit, check, classify_cmd, config, db, migrate, query, stats};

/// docsort — deduplicate, classify and archive downloaded documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docsort.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docsort",
    about = "docsort — deduplicate, classify and archive downloaded documents",
    version,
    long_about = "docsort watches a staging directory, fingerprints each stable file, \
    classifies its leading pages by vendor, document type, topic and topology, and moves \
    it into a hierarchical archive while appending a JSON Lines metadata record."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsort.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the archive root, the staging directory and the ledger schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Run the scan loop.
    ///
    /// Files are processed once they have been unchanged for
    /// `watch.stable_secs`. Ctrl-C stops the loop after the files in flight.
    Run {
        /// One priming pass, wait for stability, one processing pass, exit.
        #[arg(long)]
        once: bool,

        /// Classify and print destinations without claiming, moving or recording.
        #[arg(long)]
        dry_run: bool,
    },

    /// Extract and classify a single file and print the result as JSON.
    Classify {
        /// Document to classify.
        file: PathBuf,
    },

    /// Query the fingerprint ledger.
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Show ledger, record and archive totals.
    Stats,

    /// Check the metadata log and ledger for anomalies. Exits 1 if any.
    Audit,

    /// Check staging, archive, ledger and lexicon. Exits 1 if any is unhealthy.
    Check,
}

#[derive(Subcommand)]
enum LedgerAction {
    /// List ledger entries, most recently updated first.
    List {
        /// Filter by status: claimed, released, completed, failed.
        #[arg(long)]
        status: Option<String>,

        /// Only entries completed on or after this date (YYYY-MM-DD, UTC).
        #[arg(long)]
        since: Option<String>,

        /// Maximum number of entries.
        #[arg(long)]
        limit: Option<i64>,

        /// One JSON object per line.
        #[arg(long)]
        json: bool,
    },

    /// Show one entry and every metadata record for it.
    Show {
        /// Fingerprint or unique prefix (at least 4 hex characters).
        fingerprint: String,
    },
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "docsort=info",
        1 => "docsort=debug",
        _ => "docsort=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout carries command output; logs go to stderr.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(&cfg.paths.archive)?;
            std::fs::create_dir_all(&cfg.paths.staging)?;
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Initialized docsort.");
            println!("  staging: {}", cfg.paths.staging.display());
            println!("  archive: {}", cfg.paths.archive.display());
            println!("  ledger:  {}", cfg.ledger_path().display());
        }
        Commands::Run { once, dry_run } => {
            let pipeline = match Pipeline::open(cfg).await {
                Ok(p) => p.with_dry_run(dry_run),
                Err(e) => {
                    tracing::error!(kind = %e.kind(), error = %e, "startup failed");
                    return Err(e.into());
                }
            };
            tracing::info!(worker = %pipeline.worker_id(), dry_run, "pipeline started");
            let mut controller = LoopController::new(Arc::new(pipeline));

            let shutdown = controller.shutdown_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown requested; finishing files in flight");
                    shutdown.store(true, Ordering::SeqCst);
                }
            });

            let title = if dry_run { "run (dry-run)" } else { "run" };
            let report = if once {
                controller.run_once().await?
            } else {
                controller.run().await?
            };
            report.print_summary(title);
        }
        Commands::Classify { file } => {
            classify_cmd::run_classify(&cfg, &file).await?;
        }
        Commands::Ledger { action } => match action {
            LedgerAction::List {
                status,
                since,
                limit,
                json,
            } => {
                query::run_list(&cfg, status, since, limit, json).await?;
            }
            LedgerAction::Show { fingerprint } => {
                query::run_show(&cfg, &fingerprint).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Audit => {
            if !audit::run_audit(&cfg).await? {
                std::process::exit(1);
            }
        }
        Commands::Check => {
            if !check::run_check(&cfg)? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
