//! Feed Dispatch - scheduled feed ingestion trigger

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use feed_dispatch::config::DispatchConfig;
use feed_dispatch::invoker::LambdaInvoker;
use feed_dispatch::recorder::{CommitStatus, ResultRecorder};
use feed_dispatch::registry::{FeedRecord, SocrataRegistry};
use feed_dispatch::run::{self, DispatchRun, RunReport};
use feed_dispatch::run_log::{RunLogSink, S3RunLog};
use feed_dispatch::EligibilityDecision;
use feed_dispatch_common::logging::{init_logging, LogConfig, LogLevel};
use feed_dispatch_common::FeedId;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "feed-dispatch")]
#[command(author, version, about = "Trigger ingestion for feeds that are due in the registry")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one dispatch pass (default)
    Run {
        /// Evaluate eligibility only; invoke nothing and write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Record that the downstream finished ingesting a feed
    Confirm {
        /// Registry row id (`:id`)
        feed_id: String,

        /// Ingestion time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("feed-dispatch")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _guard = init_logging(&log_config)?;

    let config = match DispatchConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        },
    };
    config.log_summary();

    let registry = SocrataRegistry::new(config.socrata_config())?;

    match cli.command.unwrap_or(Command::Run { dry_run: false }) {
        Command::Run { dry_run: true } => {
            let evaluated = run::preview(&registry, config.registry.filter.as_deref()).await?;
            print_preview(&evaluated, cli.format)?;
        },
        Command::Run { dry_run: false } => {
            let invoker = LambdaInvoker::from_env(config.lambda_to_trigger.clone()).await;
            let run_log = match config.run_log.clone() {
                Some(run_log_config) => Some(S3RunLog::new(run_log_config).await),
                None => None,
            };

            let mut run = DispatchRun::new(&registry, &invoker, config.run_settings());
            if let Some(sink) = &run_log {
                run = run.with_run_log(sink as &dyn RunLogSink);
            }

            let report = run.execute().await?;
            print_report(&report, cli.format)?;
        },
        Command::Confirm { feed_id, at } => {
            let feed_id = FeedId::new(feed_id);
            let at = at.unwrap_or_else(Utc::now);
            let recorder = ResultRecorder::new(&registry, config.write_retry(), 1);

            let entry = recorder.confirm_ingestion(&feed_id, at).await?;
            if entry.status != CommitStatus::Committed {
                bail!(
                    "could not confirm ingestion of {feed_id}: {}",
                    entry.error.unwrap_or_else(|| entry.status.to_string())
                );
            }
            info!(feed_id = %feed_id, at = %at, "Confirmation recorded");
        },
    }

    Ok(())
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Feed", "Status", "Reason", "Invocation", "Error"]);
    for feed in &report.feeds {
        table.add_row(vec![
            feed.feed_name.clone().unwrap_or_else(|| feed.feed_id.to_string()),
            feed.final_status.to_string(),
            feed.reason.to_string(),
            feed.invocation_id.clone().unwrap_or_default(),
            feed.error
                .clone()
                .or_else(|| feed.write_error.clone())
                .unwrap_or_default(),
        ]);
    }

    let summary = &report.summary;
    println!("{table}");
    println!(
        "Run {}: {} feed(s), {} triggered, {} skipped, {} invocation-failed, {} write-failed",
        report.run_id,
        summary.total,
        summary.triggered,
        summary.skipped,
        summary.invocation_failed,
        summary.write_failed
    );
    Ok(())
}

fn print_preview(evaluated: &[(FeedRecord, EligibilityDecision)], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let decisions: Vec<_> = evaluated
            .iter()
            .map(|(record, decision)| {
                serde_json::json!({
                    "feed_id": decision.feed_id,
                    "feed_name": record.name,
                    "due": decision.due,
                    "reason": decision.reason,
                    "frequency": record.update_frequency(),
                    "last_success_at": record.last_success_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&decisions)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Feed", "Due", "Reason", "Frequency", "Last success"]);
    for (record, decision) in evaluated {
        table.add_row(vec![
            record.label().to_string(),
            if decision.due { "yes" } else { "no" }.to_string(),
            decision.reason.to_string(),
            record.declared_frequency.clone().unwrap_or_default(),
            record
                .last_success_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
        ]);
    }

    let due = evaluated.iter().filter(|(_, d)| d.due).count();
    println!("{table}");
    println!("Dry run: {due} of {} feed(s) due", evaluated.len());
    Ok(())
}
