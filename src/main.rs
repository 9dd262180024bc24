use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use duet::agent::ClaudeAgent;
use duet::artifacts::{ArtifactKind, ArtifactStore};
use duet::config::{AppConfig, SolverErrorPolicy, TaskSourceKind};
use duet::platform::github::GitHubPlatform;
use duet::platform::local::LocalTaskSource;
use duet::platform::TaskSource;
use duet::workflow::types::{RunId, WorkflowOutcome};
use duet::workflow::{Orchestrator, WorkflowSettings};
use duet::workspace::{GitGateway, LineHandle, RepositoryGateway};

#[derive(Parser)]
#[command(
    name = "duet",
    about = "Two solvers, a cross-review, and one change request"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full workflow for one task
    Run {
        task_id: String,

        /// continue_with_empty or abort_run
        #[arg(long)]
        on_solver_error: Option<SolverErrorPolicy>,

        /// Per-invocation timeout in seconds
        #[arg(long)]
        phase_timeout: Option<u64>,

        /// Run the two solvers (and the two reviews) one after the other
        #[arg(long)]
        sequential: bool,
    },
    /// Print the artifacts of a run and their status
    Show {
        run_id: RunId,

        /// Only print this artifact (e.g. decision, review-of-a)
        #[arg(long)]
        kind: Option<ArtifactKind>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            task_id,
            on_solver_error,
            phase_timeout,
            sequential,
        } => {
            if let Some(policy) = on_solver_error {
                config.workflow.on_solver_error = policy;
            }
            if let Some(seconds) = phase_timeout {
                config.workflow.phase_timeout_seconds = seconds;
            }
            if sequential {
                config.workflow.concurrent_implementation = false;
            }
            config.validate()?;
            run(&config, &task_id).await
        }
        Command::Show { run_id, kind } => show(&config, run_id, kind).await,
    }
}

async fn run(config: &AppConfig, task_id: &str) -> anyhow::Result<ExitCode> {
    tracing::info!(workflow = ?config.workflow, repo = %config.workspace.repo_path.display(), "Starting duet");

    let mut gateway = GitGateway::new(&config.workspace);
    let mut github = None;
    if let Some(github_config) = &config.github {
        let platform = Arc::new(GitHubPlatform::new(github_config)?);
        gateway = gateway.with_remote(
            platform.clone(),
            &github_config.remote,
            &github_config.token,
        );
        github = Some(platform);
    }

    let tasks: Arc<dyn TaskSource> = match (&config.tasks.source, github) {
        (TaskSourceKind::Github, Some(platform)) => platform,
        (TaskSourceKind::Github, None) => {
            anyhow::bail!("tasks.source = \"github\" requires a [github] section")
        }
        (TaskSourceKind::Local, _) => Arc::new(LocalTaskSource::new(&config.tasks.local_dir)),
    };

    if let Some(base) = &config.workspace.base_branch {
        gateway
            .switch(&LineHandle {
                name: base.clone(),
                path: config.workspace.repo_path.clone(),
            })
            .await?;
    }

    let orchestrator = Orchestrator::new(
        tasks,
        Arc::new(gateway),
        Arc::new(ClaudeAgent::new(config.claude.clone(), config.agent.clone())),
        Arc::new(ArtifactStore::new(&config.workspace.artifacts_dir)),
        WorkflowSettings::from(&config.workflow),
    );

    match orchestrator.execute(task_id).await? {
        WorkflowOutcome::Submitted { run_id, request } => {
            println!("Submitted: {request}");
            println!("Run: {run_id}");
            Ok(ExitCode::SUCCESS)
        }
        WorkflowOutcome::Aborted {
            run_id,
            phase,
            kind,
            reason,
        } => {
            println!("Aborted in {phase} ({kind}): {reason}");
            println!("Run: {run_id}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn show(
    config: &AppConfig,
    run_id: RunId,
    only: Option<ArtifactKind>,
) -> anyhow::Result<ExitCode> {
    let store = ArtifactStore::new(&config.workspace.artifacts_dir);
    if !store.run_exists(&run_id).await {
        anyhow::bail!("No artifacts for run {run_id}");
    }

    if let Some(kind) = only {
        match store.inspect(&run_id, kind).await? {
            Some((record, content)) => {
                println!("# {kind} ({:?}, revision {})\n", record.status, record.revision);
                println!("{content}");
            }
            None => anyhow::bail!("{kind} was never written for run {run_id}"),
        }
        return Ok(ExitCode::SUCCESS);
    }

    for kind in ArtifactKind::ALL {
        match store.record(&run_id, kind).await? {
            Some(record) => println!(
                "{:<22} {:<10} {}  {}{}",
                kind.to_string(),
                format!("{:?}", record.status).to_lowercase(),
                record.written_at.to_rfc3339(),
                &record.sha256[..12],
                record
                    .note
                    .as_deref()
                    .map(|n| format!("  ({n})"))
                    .unwrap_or_default()
            ),
            None => println!("{:<22} missing", kind.to_string()),
        }
    }

    println!();
    for entry in store.read_audit_log(&run_id).await? {
        let from = entry.from.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {from} -> {}  {}",
            entry.at.to_rfc3339(),
            entry.to,
            entry.outcome
        );
    }
    Ok(ExitCode::SUCCESS)
}
