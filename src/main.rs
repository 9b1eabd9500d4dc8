use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use weekly_qa::{
    list_audio_files, load_email_file, normalize, render_report, write_report, NormalizerConfig,
    Pipeline, PipelineConfig, RawInputs, ReportFormat, SourceKind,
};

#[derive(Parser)]
#[command(name = "weekly-qa")]
#[command(author, version, about = "Weekly QA report for email and phone interactions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe, grade and write the weekly report
    Run {
        /// Email log (JSON array of rows); may be given more than once
        #[arg(short, long)]
        emails: Vec<PathBuf>,

        /// Directory of call recordings
        #[arg(short, long)]
        audio_dir: Option<PathBuf>,

        /// Report file; overwritten if it exists
        #[arg(short, long, default_value = "weekly_report.md")]
        output: PathBuf,

        /// Report format (markdown or json)
        #[arg(short, long, default_value = "markdown")]
        format: ReportFormat,

        /// Maximum records in flight (overrides PIPELINE_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Stop after this many seconds and report what finished (overrides RUN_TIMEOUT_SECS)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Normalize the inputs and list what would be processed, without remote calls
    Check {
        /// Email log (JSON array of rows); may be given more than once
        #[arg(short, long)]
        emails: Vec<PathBuf>,

        /// Directory of call recordings
        #[arg(short, long)]
        audio_dir: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            emails,
            audio_dir,
            output,
            format,
            concurrency,
            timeout_secs,
            verbose,
        } => {
            setup_logging(verbose);
            run_report(emails, audio_dir, output, format, concurrency, timeout_secs).await
        }
        Commands::Check {
            emails,
            audio_dir,
            verbose,
        } => {
            setup_logging(verbose);
            check_inputs(emails, audio_dir)
        }
    }
}

/// `RUST_LOG` wins over `--verbose` when set
fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_inputs(emails: &[PathBuf], audio_dir: Option<&PathBuf>) -> Result<RawInputs> {
    let mut email_sources = Vec::with_capacity(emails.len());
    for path in emails {
        info!("Loading email log from {:?}", path);
        let source = load_email_file(path).context("Failed to load email log")?;
        info!("Loaded {} rows from {}", source.rows.len(), source.label);
        email_sources.push(source);
    }

    let audio_files = match audio_dir {
        Some(dir) => {
            let files = list_audio_files(dir).context("Failed to list call recordings")?;
            info!("Found {} recordings in {:?}", files.len(), dir);
            files
        }
        None => Vec::new(),
    };

    Ok(RawInputs {
        email_sources,
        audio_files,
    })
}

async fn run_report(
    emails: Vec<PathBuf>,
    audio_dir: Option<PathBuf>,
    output: PathBuf,
    format: ReportFormat,
    concurrency: Option<usize>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let mut config = PipelineConfig::from_env().context("Invalid configuration")?;
    if let Some(concurrency) = concurrency {
        config.concurrency = concurrency;
    }
    if let Some(secs) = timeout_secs {
        config.run_timeout = Some(std::time::Duration::from_secs(secs));
    }
    config.validate().context("Invalid configuration")?;

    let providers: Vec<_> = config.providers.iter().map(|p| p.kind.name()).collect();
    info!("Providers: {}", providers.join(" -> "));

    let inputs = load_inputs(&emails, audio_dir.as_ref())?;
    if inputs.is_empty() {
        warn!("No inputs given; the report will be empty");
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing with a partial report");
            ctrl_c.cancel();
        }
    });

    let pipeline = Pipeline::from_config(&config).context("Failed to set up providers")?;
    let report = pipeline.run(inputs, cancel, Utc::now()).await;

    let document = render_report(&report, format)?;
    write_report(&output, &document)?;
    info!("Report written to {:?}", output);

    Ok(())
}

fn check_inputs(emails: Vec<PathBuf>, audio_dir: Option<PathBuf>) -> Result<()> {
    let normalizer = NormalizerConfig::from_env().context("Invalid configuration")?;
    let inputs = load_inputs(&emails, audio_dir.as_ref())?;
    let normalized = normalize(&inputs, &normalizer);

    println!("Input Check");
    println!("===========");
    println!("Total inputs: {}", normalized.len());

    for kind in [SourceKind::Email, SourceKind::Phone] {
        let records = normalized
            .iter()
            .filter_map(|item| item.as_ref().ok())
            .filter(|r| r.source_kind == kind)
            .count();
        let rejected = normalized
            .iter()
            .filter_map(|item| item.as_ref().err())
            .filter(|e| e.source_kind == kind)
            .count();
        println!("{}: {} records, {} rejected", kind, records, rejected);
    }
    println!();

    println!("Records");
    println!("-------");
    for (position, item) in normalized.iter().enumerate() {
        match item {
            Ok(record) => {
                let timestamp = record
                    .timestamp
                    .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let note = if record.needs_transcript() {
                    "needs transcript"
                } else if record.has_content() {
                    "ready"
                } else {
                    "empty content"
                };
                println!(
                    "{:>4}. {} [{}] {} {} ({})",
                    position + 1,
                    record.id,
                    record.source_kind,
                    record.participants.join(", "),
                    timestamp,
                    note
                );
            }
            Err(err) => println!("{:>4}. REJECTED {}", position + 1, err),
        }
    }

    Ok(())
}
