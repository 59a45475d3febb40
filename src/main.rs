use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use buildfixer::advisor::LlmFixAdvisor;
use buildfixer::checkout::{Checkout, RepoManager, write_atomic};
use buildfixer::classify::{Classifier, error_excerpt};
use buildfixer::engine::{AbortReason, FixOutcome, Orchestrator, RunConfig, RunReport, RunResult};
use buildfixer::llm::AnthropicClient;
use buildfixer::prompt::{FIX_REQUEST_TEMPLATE, FIX_SYSTEM_PROMPT};
use buildfixer::properties::PropertyEditor;

mod cli;
mod config;

use cli::Cli;
use cli::commands::{Commands, RunArgs};
use config::Config;

fn setup_logging(level: &str, to_stderr: bool) -> Result<()> {
    let env = env_logger::Env::default().default_filter_or(level);
    let mut builder = env_logger::Builder::from_env(env);

    if to_stderr {
        builder.target(env_logger::Target::Stderr).init();
        return Ok(());
    }

    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("buildfixer")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("buildfixer.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<ExitCode> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run(args) => handle_run_command(args, config).await,
        Commands::SetProperty {
            checkout,
            key,
            value,
            file,
        } => handle_set_property_command(checkout, key, value, file.as_deref(), config),
        Commands::Classify {
            log,
            exit_code,
            checkout,
        } => handle_classify_command(log, *exit_code, checkout.as_deref(), config),
    }
}

async fn resolve_checkout(args: &RunArgs, config: &Config) -> Result<PathBuf> {
    match (&args.checkout, &args.repo) {
        (Some(path), _) => Ok(path.clone()),
        (None, Some(url)) => {
            println!("{} {}", "Cloning:".cyan(), url);
            let manager = RepoManager::new(&config.checkout.clone_base);
            let url = url.clone();
            let path = tokio::task::spawn_blocking(move || manager.clone_repo(&url))
                .await
                .context("Clone task failed")?
                .context("Failed to clone repository")?;
            Ok(path)
        }
        (None, None) => bail!("Either --checkout or --repo is required"),
    }
}

fn build_advisor(config: &Config) -> Result<LlmFixAdvisor> {
    let client = AnthropicClient::new(config.anthropic()).context("Failed to create LLM client")?;

    let system = match &config.advisor.system_template {
        Some(path) => fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?,
        None => FIX_SYSTEM_PROMPT.to_string(),
    };
    let request = match &config.advisor.request_template {
        Some(path) => fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?,
        None => FIX_REQUEST_TEMPLATE.to_string(),
    };

    let advisor = LlmFixAdvisor::with_templates(Arc::new(client), config.advisor.max_tokens, &system, &request)
        .context("Failed to prepare advisor prompts")?
        .with_property_file(&config.build.property_file);
    Ok(advisor)
}

fn run_config(args: &RunArgs, config: &Config, checkout: &Path) -> RunConfig {
    RunConfig::new(checkout, &args.key, &args.value)
        .with_max_retries(args.max_retries.unwrap_or(config.run.max_retries))
        .with_build_timeout(
            args.build_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.build_timeout()),
        )
        .with_advisor_timeout(
            args.advisor_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.advisor_timeout()),
        )
}

async fn handle_run_command(args: &RunArgs, config: &Config) -> Result<ExitCode> {
    let checkout = match resolve_checkout(args, config).await {
        Ok(path) => path,
        Err(e) => {
            // The run never started; still report it as an input abort
            let target = args
                .repo
                .as_deref()
                .and_then(|url| RepoManager::new(&config.checkout.clone_base).path(url).ok())
                .unwrap_or_default();
            let reason = AbortReason::Input(format!("{:#}", e));
            let report = RunReport::aborted(&run_config(args, config, &target), reason);
            return finish_run(args, &report);
        }
    };
    let advisor = build_advisor(config)?;

    let orchestrator = Orchestrator::with_config(
        Arc::new(advisor),
        PropertyEditor::new(&config.build.property_file),
        config.orchestrator(args.build_command.as_deref()),
    );
    let run_config = run_config(args, config, &checkout);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            trigger.cancel();
        }
    });

    println!(
        "{} {}={} in {}",
        "Running:".cyan(),
        args.key,
        args.value,
        checkout.display()
    );
    let report = orchestrator.run(&run_config, &cancel).await;
    finish_run(args, &report)
}

fn finish_run(args: &RunArgs, report: &RunReport) -> Result<ExitCode> {
    print_report(report);

    if let Some(path) = &args.report {
        write_report(path, report)?;
        println!("{} {}", "Report:".cyan(), path.display());
    }

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &RunReport) {
    for attempt in &report.history {
        let signature = attempt
            .failure_signature
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "ok".to_string());
        println!(
            "  #{} exit {} in {}ms: {}",
            attempt.index, attempt.exit_code, attempt.duration_ms, signature
        );
    }
    for record in &report.fixes {
        match &record.outcome {
            FixOutcome::Applied { .. } => println!("  {} {}", "applied".green(), record.fix),
            FixOutcome::Rejected { reason } => println!("  {} {}: {}", "rejected".red(), record.fix, reason),
        }
    }

    match &report.result {
        RunResult::Succeeded(_) => println!("{} {}", "Success:".green(), report.result),
        RunResult::ExhaustedRetries(_) => println!("{} {}", "Gave up:".yellow(), report.result),
        RunResult::FatalAbort(_) => println!("{} {}", "Aborted:".red(), report.result),
    }

    if let Some(value) = &report.final_property_value {
        if !report.intent_preserved() {
            println!(
                "{} {} is now {} (requested {})",
                "Note:".yellow(),
                report.property_key,
                value,
                report.property_value
            );
        }
    }
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    write_atomic(path, json.as_bytes()).context(format!("Failed to write report to {}", path.display()))
}

fn handle_set_property_command(
    checkout: &Path,
    key: &str,
    value: &str,
    file: Option<&Path>,
    config: &Config,
) -> Result<ExitCode> {
    let checkout = Checkout::open(checkout).context("Invalid checkout")?;
    let editor = PropertyEditor::new(file.unwrap_or(config.build.property_file.as_path()));
    let update = editor
        .set(&checkout, key, value)
        .context(format!("Failed to set {}", key))?;

    match update.previous {
        Some(previous) => println!("{} {}: {} -> {}", "Updated:".green(), update.key, previous, update.value),
        None => println!("{} {}={}", "Added:".green(), update.key, update.value),
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_classify_command(log: &Path, exit_code: i32, checkout: Option<&Path>, config: &Config) -> Result<ExitCode> {
    let bytes = fs::read(log).context(format!("Failed to read {}", log.display()))?;
    let output = String::from_utf8_lossy(&bytes);

    let classifier = match checkout {
        Some(root) => Classifier::with_root(Checkout::open(root).context("Invalid checkout")?.root()),
        None => Classifier::new(),
    };

    match classifier.classify_output(exit_code, &output) {
        Some(signature) => {
            println!("{} {}", "Signature:".red(), signature);
            println!("{}", error_excerpt(&output, config.advisor.excerpt_bytes));
        }
        None => println!("{}", "No failure (exit code 0)".green()),
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let level = if cli.is_verbose() {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };
    setup_logging(level, cli.log_stderr).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")
}
