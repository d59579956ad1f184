//! cimatrix - matrix CI/CD pipeline CLI
//!
//! The `cimatrix` command runs an interpreter x concurrency test matrix and
//! the gated post-build stages.
//!
//! ## Commands
//!
//! - `run`: Run the whole matrix, then docs publish and release deploy
//! - `leg`: Run a single leg (the CI provider fans out the matrix)
//! - `plan`: Show the expanded matrix without running anything
//! - `validate`: Check a configuration file

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn, Level};

use cimatrix_ci::{cancel_pair, CancelToken, Pipeline, PipelineServices};
use cimatrix_core::{BuildReport, DocsPublishState, EventType, MatrixLeg, PipelineConfig, Trigger};

const DEFAULT_CONFIG: &str = "cimatrix.toml";

#[derive(Parser)]
#[command(name = "cimatrix")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Matrix CI/CD pipeline orchestrator", long_about = None)]
struct Cli {
    /// Pipeline configuration file [default: <workdir>/cimatrix.toml, or
    /// built-in defaults when that does not exist]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Checkout the pipeline runs in
    #[arg(short, long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every matrix leg, then publish docs and deploy releases
    Run {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Write the JSON build report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run one matrix leg, then the post-build stages if it is the leg of record
    Leg {
        /// Interpreter version of the leg
        #[arg(long = "version")]
        interpreter_version: String,

        /// Whether the concurrency backend is enabled for the leg
        #[arg(long, action = ArgAction::Set)]
        concurrency: bool,

        /// This leg is the leg of record
        #[arg(long, env = "CIMATRIX_RECORD")]
        record: bool,

        #[command(flatten)]
        trigger: TriggerArgs,

        /// Write the JSON build report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the expanded matrix, the leg of record and install sets
    Plan {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate the configuration file
    Validate {
        /// Print the effective configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[derive(Args)]
struct TriggerArgs {
    /// Event that started the build (push, pull_request, tag)
    #[arg(long, env = "CIMATRIX_EVENT", default_value = "push", value_parser = parse_event)]
    event: EventType,

    /// Branch the build runs on
    #[arg(long, env = "CIMATRIX_BRANCH")]
    branch: String,

    /// Version tag of a tag build
    #[arg(long, env = "CIMATRIX_TAG")]
    tag: Option<String>,
}

impl TriggerArgs {
    fn to_trigger(&self, record: bool) -> Trigger {
        Trigger {
            event_type: self.event,
            branch: self.branch.clone(),
            tag: self.tag.clone().filter(|t| !t.trim().is_empty()),
            matrix_position_is_record: record,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_event(s: &str) -> std::result::Result<EventType, String> {
    EventType::from_str(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    cimatrix_core::init_tracing(cli.json, level);

    let path = config_path(cli.config.as_deref(), &cli.workdir);
    let config = load_config(&path, cli.config.is_none())?;

    match cli.command {
        Commands::Run { trigger, report } => {
            cmd_run(config, &cli.workdir, &trigger.to_trigger(false), report.as_deref()).await
        }
        Commands::Leg {
            interpreter_version,
            concurrency,
            record,
            trigger,
            report,
        } => {
            let leg = MatrixLeg::new(interpreter_version, concurrency);
            cmd_leg(
                config,
                &cli.workdir,
                &trigger.to_trigger(record),
                leg,
                report.as_deref(),
            )
            .await
        }
        Commands::Plan { format } => cmd_plan(config, &cli.workdir, format),
        Commands::Validate { show } => cmd_validate(&config, &path, show),
    }
}

/// The default configuration lives in the checkout, not the current directory.
fn config_path(explicit: Option<&Path>, workdir: &Path) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => workdir.join(DEFAULT_CONFIG),
    }
}

/// Load the configuration, falling back to defaults when the default file
/// is absent. An explicitly named missing file is an error.
fn load_config(path: &Path, is_default: bool) -> Result<PipelineConfig> {
    if is_default && !path.exists() {
        info!(path = %path.display(), "no configuration file, using defaults");
        return Ok(PipelineConfig::default());
    }
    PipelineConfig::load(path).context(format!("Failed to load configuration {:?}", path))
}

fn build_pipeline(config: PipelineConfig, workdir: &Path) -> Result<Pipeline> {
    let services = PipelineServices::local(&config, workdir);
    Pipeline::new(config, services, workdir).context("Invalid pipeline configuration")
}

/// Cancel the build on Ctrl-C.
fn cancel_on_interrupt() -> CancelToken {
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            handle.cancel();
        }
    });
    token
}

/// Run the full matrix
async fn cmd_run(
    config: PipelineConfig,
    workdir: &Path,
    trigger: &Trigger,
    report_path: Option<&Path>,
) -> Result<()> {
    let pipeline = build_pipeline(config, workdir)?;

    println!("Running matrix for {} on '{}'", trigger.event_type, trigger.branch);
    let report = pipeline
        .run(trigger, cancel_on_interrupt())
        .await
        .context("Pipeline failed to run")?;

    finish(report, report_path)
}

/// Run one leg of the matrix
async fn cmd_leg(
    config: PipelineConfig,
    workdir: &Path,
    trigger: &Trigger,
    leg: MatrixLeg,
    report_path: Option<&Path>,
) -> Result<()> {
    let pipeline = build_pipeline(config, workdir)?;

    println!(
        "Running leg {}{}",
        leg,
        if trigger.matrix_position_is_record {
            " (leg of record)"
        } else {
            ""
        }
    );
    let report = pipeline
        .run_leg(trigger, leg, cancel_on_interrupt())
        .await
        .context("Pipeline failed to run")?;

    finish(report, report_path)
}

fn finish(report: BuildReport, report_path: Option<&Path>) -> Result<()> {
    if let Some(path) = report_path {
        write_report(&report, path)?;
    }
    print_report(&report);

    let report = report.into_result().context("Release deploy failed")?;
    if !report.status.is_success() {
        anyhow::bail!("Build {} {}", report.build_id(), report.status);
    }
    Ok(())
}

fn write_report(report: &BuildReport, path: &Path) -> Result<()> {
    let json = report.to_json().context("Failed to serialize build report")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create report directory {:?}", parent))?;
    }
    std::fs::write(path, json).context(format!("Failed to write build report {:?}", path))?;
    info!(path = %path.display(), "build report written");
    Ok(())
}

fn print_report(report: &BuildReport) {
    let outcome = &report.outcome;
    println!();
    println!("Build ID: {}", report.build_id());
    println!("Matrix:   {}", &outcome.matrix_digest[..12.min(outcome.matrix_digest.len())]);
    println!(
        "Status:   {}",
        if report.succeeded() { "✓ PASSED" } else { "✗ FAILED" }
    );
    println!("Duration: {}ms", report.duration_ms);
    println!();

    for leg in &outcome.legs {
        let status = if leg.is_success() { "✓" } else { "✗" };
        let record = if leg.index == outcome.leg_index_of_record {
            " [record]"
        } else {
            ""
        };
        println!("  {} {}{} ({}ms)", status, leg.leg, record, leg.duration_ms);
        for step in &leg.steps {
            println!(
                "      {} (exit code: {}, {}ms)",
                step.step_name, step.exit_code, step.duration_ms
            );
        }
        if let Some(failure) = &leg.failure {
            println!("      {}", failure.message);
        }
    }

    println!();
    println!(
        "Summary: {}/{} legs passed",
        outcome.passed_count(),
        outcome.legs.len()
    );
    println!("Docs:    {}", describe_docs(&report.docs));
    for attempt in &report.deploys {
        let leg = attempt
            .leg
            .as_ref()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "build".to_string());
        println!("Deploy:  {} -> {:?}", leg, attempt.state);
    }
    if let Some(reason) = &report.deploy_error {
        println!("Deploy error: {}", reason);
    }
}

fn describe_docs(state: &DocsPublishState) -> String {
    match state {
        DocsPublishState::NotEvaluated => "not evaluated".to_string(),
        DocsPublishState::GateFalse { reasons } => format!("skipped ({})", reasons.join("; ")),
        DocsPublishState::Pushed { branch } => format!("pushed to {}", branch),
        DocsPublishState::Failed { reason } => format!("failed: {}", reason),
    }
}

/// Print the expanded matrix
fn cmd_plan(config: PipelineConfig, workdir: &Path, format: OutputFormat) -> Result<()> {
    let pipeline = build_pipeline(config, workdir)?;
    let plan = pipeline.plan().context("Failed to plan matrix")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Text => {
            println!("Matrix digest: {}", plan.matrix_digest);
            println!("Legs: {}", plan.legs.len());
            println!();
            for planned in &plan.legs {
                let marker = if planned.is_record { "*" } else { " " };
                println!("{} [{}] {}", marker, planned.index, planned.leg);
                println!("      install: {}", planned.install.join(" "));
            }
            println!();
            println!("* leg of record");
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ValidationSummary {
    package: String,
    legs: usize,
    record: String,
    matrix_digest: String,
}

fn validation_summary(config: &PipelineConfig) -> Result<ValidationSummary> {
    config.validate().context("Invalid pipeline configuration")?;
    let legs = config.legs()?;
    let record_index = config.matrix.record.select(&legs)?;
    Ok(ValidationSummary {
        package: config.package.clone(),
        legs: legs.len(),
        record: legs[record_index].to_string(),
        matrix_digest: cimatrix_core::matrix_digest(&legs),
    })
}

/// Validate the configuration
fn cmd_validate(config: &PipelineConfig, path: &Path, show: bool) -> Result<()> {
    let summary = validation_summary(config)?;
    println!("Configuration OK: {:?}", path);
    println!("Package:       {}", summary.package);
    println!("Legs:          {}", summary.legs);
    println!("Leg of record: {}", summary.record);
    println!("Matrix digest: {}", summary.matrix_digest);

    if show {
        println!();
        println!("{}", config.to_toml_string()?);
    }
    Ok(())
}
