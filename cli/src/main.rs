//! Tamma binary: run the issue-to-merge engine continuously, once, or as a
//! dry-run planner.
//!
//! Exit codes: 0 clean, 1 generic failure, 2 configuration error, 3 agent
//! unavailable, 4 platform unavailable.

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tamma::aggregator::ContextAggregator;
use tamma::engine::{ApprovalMode, Engine, EngineEvent, IterationOutcome};
use tamma::mcp::ServerRegistry;
use tamma::platform::{GitHubPlatform, GitPlatform};
use tamma::provider::{AgentProvider, SubprocessProvider};
use tamma::source::McpResourceSource;
use tamma::TammaConfig;

const EXIT_GENERIC: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_AGENT_UNAVAILABLE: u8 = 3;
const EXIT_PLATFORM_UNAVAILABLE: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "tamma")]
#[command(about = "Tamma — autonomous issue-to-merge agent")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Config file path
    #[arg(long, value_name = "PATH", default_value = "tamma.toml")]
    config: PathBuf,

    /// Working directory for the coding subprocess
    #[arg(long, value_name = "PATH")]
    workdir: Option<PathBuf>,

    /// Log level: trace|debug|info|warn|error
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Override the CI/idle poll interval
    #[arg(long, value_name = "N")]
    poll_interval_ms: Option<u64>,

    /// Override the supervisor retry budget
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Override the approval mode
    #[arg(long, value_enum)]
    approval_mode: Option<ApprovalModeArg>,

    /// Plan without mutating the platform
    #[arg(long)]
    dry_run: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ApprovalModeArg {
    Auto,
    Manual,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Continuous loop: pick up issues until interrupted
    Run,
    /// One iteration: at most one issue, then exit
    Once,
    /// Dry-run plan for a specific issue, printed as JSON
    Plan { issue: u64 },
}

fn load_config(args: &Args) -> Result<TammaConfig, u8> {
    let mut config = TammaConfig::load(&args.config).map_err(|e| {
        error!(error = %e, "configuration error");
        EXIT_CONFIG
    })?;
    if let Some(dir) = &args.workdir {
        config.engine.working_directory = dir.clone();
    }
    if let Some(ms) = args.poll_interval_ms {
        config.engine.poll_interval_ms = ms;
    }
    if let Some(retries) = args.max_retries {
        config.engine.max_retries = retries;
    }
    if let Some(mode) = args.approval_mode {
        config.engine.approval_mode = match mode {
            ApprovalModeArg::Auto => ApprovalMode::Auto,
            ApprovalModeArg::Manual => ApprovalMode::Manual,
        };
    }
    Ok(config)
}

fn subscribe_logging(engine: &Engine) {
    engine.events().subscribe(|event| match event {
        EngineEvent::StateChanged { from, to } => info!(?from, ?to, "state"),
        EngineEvent::IssueSelected { number, title } => {
            info!(issue = number, title = %title, "issue selected")
        }
        EngineEvent::PlanGenerated {
            issue, complexity, ..
        } => info!(issue, ?complexity, "plan generated"),
        EngineEvent::AwaitingApproval { issue } => {
            warn!(issue, "awaiting external approval")
        }
        EngineEvent::BranchCreated { name } => info!(branch = %name, "branch created"),
        EngineEvent::Progress(progress) => info!(?progress, "agent progress"),
        EngineEvent::PrOpened { number, url } => info!(pr = number, url = %url, "pr opened"),
        EngineEvent::CiPoll { pr, state } => info!(pr, ?state, "ci poll"),
        EngineEvent::Merged { pr } => info!(pr, "merged"),
        EngineEvent::IssueClosed { number } => info!(issue = number, "issue closed"),
        EngineEvent::Error { state, message } => error!(?state, %message, "engine error"),
    });
}

async fn run(args: Args) -> u8 {
    if let Err(e) = config::load_and_apply("tamma", None) {
        warn!(error = %e, "env bootstrap failed; continuing with process env");
    }
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let provider = Arc::new(SubprocessProvider::new(TammaConfig::agent_binary()));
    if !provider.is_available().await {
        error!(binary = %TammaConfig::agent_binary(), "coding agent CLI is not available");
        return EXIT_AGENT_UNAVAILABLE;
    }

    let platform = Arc::new(GitHubPlatform::new(
        config.platform.token.clone(),
        config.platform.owner.clone(),
        config.platform.repo.clone(),
    ));
    if let Err(e) = platform.get_repository().await {
        error!(error = %e, "platform is not reachable");
        return EXIT_PLATFORM_UNAVAILABLE;
    }

    // Context aggregation is optional: it lights up when MCP servers are
    // configured.
    let registry = Arc::new(ServerRegistry::default());
    let aggregator = if config.mcp.servers.is_empty() {
        None
    } else {
        registry.connect_all(config.mcp.servers.clone()).await;
        let mut aggregator = ContextAggregator::new(
            config.aggregator.clone(),
            config.rag.ranking.clone(),
        );
        aggregator.add_source(Arc::new(McpResourceSource::new(Arc::clone(&registry), 20)));
        Some(Arc::new(aggregator))
    };

    let engine_config = config.engine_config(args.dry_run);
    let mut engine = Engine::new(platform, provider.clone(), aggregator, engine_config);
    subscribe_logging(&engine);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; shutting down");
                cancel.cancel();
            }
        });
    }

    let code = match args.cmd {
        Command::Run => match engine.run(&cancel).await {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "engine stopped");
                EXIT_GENERIC
            }
        },
        Command::Once => match engine.run_once(&cancel).await {
            Ok(IterationOutcome::NoWork) => {
                info!("no qualifying issue");
                0
            }
            Ok(IterationOutcome::PlanOnly(plan)) => {
                print_plan(&plan);
                0
            }
            Ok(IterationOutcome::Completed { issue, pr }) => {
                info!(issue, pr, "iteration complete");
                0
            }
            Err(e) => {
                error!(error = %e, "iteration failed");
                EXIT_GENERIC
            }
        },
        Command::Plan { issue } => match engine.plan_issue(issue, &cancel).await {
            Ok(plan) => {
                print_plan(&plan);
                0
            }
            Err(e) => {
                error!(issue, error = %e, "planning failed");
                EXIT_GENERIC
            }
        },
    };

    registry.dispose_all().await;
    provider.dispose().await;
    code
}

fn print_plan(plan: &tamma::DevelopmentPlan) {
    match serde_json::to_string_pretty(plan) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "plan serialization failed"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(&args.log_level);
    ExitCode::from(run(args).await)
}
