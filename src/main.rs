use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use coderunner_grader::config::{Config, RunnerStrategy};
use coderunner_grader::core::adapters::TestingFramework;
use coderunner_grader::core::aggregator::ScoreAggregator;
use coderunner_grader::core::domain::{ExecutionEnvironment, Submission, SubmissionScore};
use coderunner_grader::core::pipeline::scoring::GradingOrchestrator;
use coderunner_grader::core::traits::runner_pool::{ExecutionEvent, RunnerPool};
use coderunner_grader::grpc::pool::GrpcRunnerPool;
use coderunner_grader::null::pool::NullRunnerPool;
use coderunner_grader::stubs::notifier::LogNotifier;
use coderunner_grader::stubs::runner_pool::RunnerPoolStub;
use coderunner_grader::stubs::sink::{GradingRecords, MemorySink};

#[derive(Parser)]
#[command(name = "coderunner-grader")]
#[command(about = "Runs submissions in sandboxes and grades their test output", long_about = None)]
#[command(
    after_help = "Testruns and structured errors are kept in memory only and never persisted: `score` prints them next to the score, `run` writes them to --records."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every test and linter file of a submission and print the score
    /// together with the recorded testruns and structured errors
    Score {
        /// Submission as JSON
        #[arg(short, long)]
        submission: PathBuf,
    },

    /// Execute the run command for one file and stream its output
    Run {
        /// Submission as JSON
        #[arg(short, long)]
        submission: PathBuf,

        /// Path of the file inside the submission, e.g. `src/main.py`
        #[arg(short, long)]
        file: String,

        /// Write the recorded testrun as JSON to this file
        #[arg(short, long)]
        records: Option<PathBuf>,
    },

    /// Match failure text against the error templates of an environment
    Classify {
        /// Execution environment as JSON
        #[arg(short, long)]
        environment: PathBuf,

        /// File holding the failure text
        #[arg(short, long)]
        text: PathBuf,
    },

    /// List supported testing frameworks
    Frameworks,
}

#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!("Configuration: {:?}", config);

    match cli.command {
        Commands::Score { submission } => {
            let submission: Submission = read_json(&submission)?;
            let sink = Arc::new(MemorySink::new());
            let orchestrator = build_orchestrator(&config, sink.clone())?;
            let cancel = cancel_on_ctrl_c();

            let score = orchestrator.score_submission(&submission, &cancel).await?;
            let report = ScoreReport {
                score,
                records: sink.records(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Run {
            submission,
            file,
            records,
        } => {
            let submission: Submission = read_json(&submission)?;
            let sink = Arc::new(MemorySink::new());
            let orchestrator = build_orchestrator(&config, sink.clone())?;
            let cancel = cancel_on_ctrl_c();

            let (tx, mut rx) = mpsc::channel(128);
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        ExecutionEvent::Stdout(chunk) => print!("{}", chunk),
                        ExecutionEvent::Stderr(chunk) => eprint!("{}", chunk),
                        ExecutionEvent::Exit(code) => tracing::info!("Exited with {}", code),
                    }
                }
            });

            let durations = orchestrator.run_file(&submission, &file, tx, &cancel).await;
            printer.await?;
            if let Some(path) = records {
                std::fs::write(path, serde_json::to_string_pretty(&sink.records())?)?;
            }
            let durations = durations?;
            tracing::info!(
                waiting_ms = durations.waiting_duration.as_millis() as u64,
                execution_ms = durations.execution_duration.as_millis() as u64,
                "Run finished"
            );
        }
        Commands::Classify { environment, text } => {
            let environment: ExecutionEnvironment = read_json(&environment)?;
            let text = std::fs::read_to_string(text)?;
            let orchestrator = build_orchestrator(&config, Arc::new(MemorySink::new()))?;

            let errors = orchestrator.classify_failure(&environment, &text)?;
            println!("{}", serde_json::to_string_pretty(&errors)?);
        }
        Commands::Frameworks => {
            for framework in TestingFramework::all() {
                println!("{}\t{}", framework.framework_name(), framework.adapter_key());
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct ScoreReport {
    #[serde(flatten)]
    score: SubmissionScore,
    #[serde(flatten)]
    records: GradingRecords,
}

fn build_orchestrator(
    config: &Config,
    sink: Arc<MemorySink>,
) -> Result<GradingOrchestrator, Box<dyn std::error::Error>> {
    let pool: Arc<dyn RunnerPool> = match config.runner_strategy {
        RunnerStrategy::Grpc => Arc::new(GrpcRunnerPool::connect_lazy(&config.runner_management_url)?),
        RunnerStrategy::Null => Arc::new(NullRunnerPool),
        RunnerStrategy::Stub => Arc::new(RunnerPoolStub::new(Duration::from_millis(100))),
    };
    let catalog = config.load_catalog()?;

    Ok(GradingOrchestrator::new(
        pool,
        sink,
        ScoreAggregator::new(Arc::new(LogNotifier)),
    )
    .with_catalog(catalog.linter)
    .with_feedback(catalog.feedback)
    .with_regex_budget(config.regex_budget))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling running commands");
            token.cancel();
        }
    });
    cancel
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
