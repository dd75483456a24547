use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use eyre::Result;
use tokio_util::sync::CancellationToken;

use groundwork_core::Document;
use groundwork_engine::{
    ApplyOutcome, EngineConfig, EngineError, ProviderRegistry, RollbackPolicy, SimProvider,
};
use groundwork_state::{Outcome, StateStore};

/// Exit codes: 0 success, 1 partial failure (with or without rollback),
/// 2 validation error.
const EXIT_PARTIAL: u8 = 1;
const EXIT_VALIDATION: u8 = 2;

#[derive(Parser)]
#[command(
    name = "groundwork",
    version,
    about = "Dependency-ordered declarative resource provisioning"
)]
struct Cli {
    /// Directory holding state snapshots and execution logs.
    #[arg(long, global = true, default_value = ".groundwork")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show what an apply would change, without side effects.
    Plan {
        doc: PathBuf,
        /// Describe recorded resources against the target while planning.
        #[arg(long)]
        refresh: bool,
    },
    /// Create, update, and delete resources to match the document.
    Apply {
        doc: PathBuf,
        #[command(flatten)]
        opts: ExecOpts,
    },
    /// Delete every resource recorded for the document.
    Destroy {
        doc: PathBuf,
        #[command(flatten)]
        opts: ExecOpts,
    },
}

#[derive(Args)]
struct ExecOpts {
    /// Permit replacing resources that other resources depend on.
    #[arg(long)]
    allow_replace: bool,

    /// What to do with committed work after a partial failure.
    #[arg(long, value_enum, default_value_t = RollbackArg::Auto)]
    rollback: RollbackArg,

    /// Per-resource bound on reaching a terminal state.
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Attempts per action, counting the first.
    #[arg(long, default_value_t = 4)]
    max_attempts: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum RollbackArg {
    Auto,
    Manual,
}

impl ExecOpts {
    fn config(&self, refresh: bool) -> EngineConfig {
        EngineConfig {
            allow_replace: self.allow_replace,
            refresh,
            max_attempts: self.max_attempts,
            resource_timeout: Duration::from_secs(self.timeout_secs),
            rollback: match self.rollback {
                RollbackArg::Auto => RollbackPolicy::Automatic,
                RollbackArg::Manual => RollbackPolicy::Manual,
            },
            ..EngineConfig::default()
        }
    }
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let store = StateStore::new(&cli.state_dir);

    match cli.command {
        Command::Plan { doc, refresh } => {
            let document = match load_document(&doc) {
                Ok(d) => d,
                Err(code) => return Ok(code),
            };
            let registry = sim_registry(&document, &store).await?;
            let config = EngineConfig {
                refresh,
                ..EngineConfig::default()
            };
            match groundwork_engine::plan(&document, &registry, &store, &config).await {
                Ok(plan) => {
                    print!("{plan}");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report_engine_error(e)),
            }
        }
        Command::Apply { doc, opts } => {
            let document = match load_document(&doc) {
                Ok(d) => d,
                Err(code) => return Ok(code),
            };
            let registry = sim_registry(&document, &store).await?;
            let config = opts.config(false);
            let cancel = cancel_on_ctrl_c();
            match groundwork_engine::apply(&document, &registry, &store, &config, cancel).await {
                Ok(report) => Ok(print_report(&report)),
                Err(e) => Ok(report_engine_error(e)),
            }
        }
        Command::Destroy { doc, opts } => {
            let document = match load_document(&doc) {
                Ok(d) => d,
                Err(code) => return Ok(code),
            };
            let registry = sim_registry(&document, &store).await?;
            let config = opts.config(false);
            let cancel = cancel_on_ctrl_c();
            match groundwork_engine::destroy(&document, &registry, &store, &config, cancel).await {
                Ok(report) => Ok(print_report(&report)),
                Err(e) => Ok(report_engine_error(e)),
            }
        }
    }
}

fn load_document(path: &PathBuf) -> Result<Document, ExitCode> {
    Document::from_path(path).map_err(|e| {
        eprintln!("error: {e}");
        ExitCode::from(EXIT_VALIDATION)
    })
}

/// One simulated provider per resource type the document (or its recorded
/// state) names. Real cloud targets would plug in here instead.
async fn sim_registry(document: &Document, store: &StateStore) -> Result<ProviderRegistry> {
    let mut types: BTreeSet<String> = document
        .resources
        .values()
        .map(|r| r.resource_type.clone())
        .collect();
    if let Ok(snapshot) = store.load(&document.name).await {
        types.extend(
            snapshot
                .resources
                .values()
                .map(|rs| rs.resource_type.clone()),
        );
    }

    let mut registry = ProviderRegistry::new();
    for resource_type in types {
        registry.register(Arc::new(SimProvider::new(resource_type)));
    }
    Ok(registry)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn print_report(report: &groundwork_engine::ApplyReport) -> ExitCode {
    for record in &report.records {
        let status = match &record.outcome {
            Outcome::Succeeded => "ok".to_string(),
            Outcome::Failed { cause } => format!("failed: {cause}"),
            Outcome::RolledBack => "rolled back".to_string(),
            Outcome::RollbackFailed { cause } => format!("rollback failed: {cause}"),
            Outcome::Skipped => "skipped".to_string(),
        };
        println!("{} {}: {status}", record.action, record.resource_id);
    }

    if !report.outputs.is_empty() {
        println!("\nOutputs:");
        for (name, value) in &report.outputs {
            println!("  {name} = {value}");
        }
    }

    match report.outcome {
        ApplyOutcome::Applied => ExitCode::SUCCESS,
        ApplyOutcome::RolledBack => {
            eprintln!("apply failed; this run's changes were rolled back");
            ExitCode::from(EXIT_PARTIAL)
        }
        ApplyOutcome::PartiallyApplied => {
            eprintln!("apply failed; some changes remain (see records above)");
            ExitCode::from(EXIT_PARTIAL)
        }
        ApplyOutcome::Cancelled => {
            eprintln!("cancelled; completed changes were left in place");
            ExitCode::from(EXIT_PARTIAL)
        }
    }
}

fn report_engine_error(e: EngineError) -> ExitCode {
    eprintln!("error: {e}");
    if e.is_validation() {
        ExitCode::from(EXIT_VALIDATION)
    } else {
        ExitCode::from(EXIT_PARTIAL)
    }
}
