//! `wfe` — runs a workflow definition through the engine (spec §4.6, §6).
//!
//! Two subcommands: `run` starts a fresh session from phase zero; `resume`
//! reloads a session's `checkpoint.json` and continues from a named phase.
//! Neither subcommand talks to a real LLM: `--scripted-responses` points at
//! a recorded-response script (see `scripted_query`); without one, every
//! agent step gets a generic empty success, enough to smoke-test a
//! workflow's control flow end to end.

mod scripted_query;

use clap::{Args, Parser, Subcommand};
use scripted_query::ScriptedQuery;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wfe_core::query::QueryFunction;
use wfe_engine::{Engine, EngineConfig, EngineDefaults, Status};
use wfe_session::SessionManager;

#[derive(Parser)]
#[command(name = "wfe", about = "Deterministic, resumable multi-phase workflow engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a fresh session and run a workflow from its first phase.
    Run(RunArgs),
    /// Reload a session's checkpoint and continue from a named phase.
    Resume(ResumeArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Directory holding `.wfe/{workflows,agents,prompts}` project-tier definitions.
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Directory holding the builtin-tier `{workflows,agents,prompts}` definitions.
    #[arg(long)]
    plugin_root: Option<PathBuf>,

    /// Scope name used for both the project-tier dotdir and the session store (`.<scope>/...`).
    #[arg(long, default_value = "wfe")]
    scope: String,

    /// A step name to unconditionally skip (repeatable).
    #[arg(long = "skip-step")]
    skip_step: Vec<String>,

    /// Skip review/check-shaped agent steps.
    #[arg(long)]
    skip_checks: bool,

    /// Suppress the phase literally named `execute`.
    #[arg(long)]
    dry_run: bool,

    /// JSON-lines file of canned query responses (see `scripted_query`).
    #[arg(long)]
    scripted_responses: Option<PathBuf>,

    /// Default model when no step/agent/workflow model is given.
    #[arg(long)]
    default_model: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    /// Workflow name to resolve via the project/builtin tiers.
    workflow: String,
    /// Path to the spec document bound as `specPath`.
    spec_path: String,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct ResumeArgs {
    /// Session ID to resume (as minted by a previous `run`).
    session_id: String,
    /// Workflow name to resolve via the project/builtin tiers.
    workflow: String,
    /// Phase name to resume from.
    from_phase: String,
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Resume(args) => resume(args).await,
    };

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            std::process::exit(match result.status {
                Status::Completed => 0,
                Status::Paused => 3,
                Status::Failed => 1,
            });
        }
        Err(e) => {
            tracing::error!(error = %e, "wfe run failed");
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "wfe=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn build_engine(common: CommonArgs) -> anyhow::Result<Engine> {
    let plugin_root = common.plugin_root.unwrap_or_else(|| common.project_root.clone());
    let config = EngineConfig {
        working_directory: common.project_root.clone(),
        workflow_base_dir: common.project_root.clone(),
        plugin_root,
        scope: common.scope.clone(),
        defaults: EngineDefaults {
            model: common.default_model,
            agent: None,
            permission_mode: None,
            setting_sources: Vec::new(),
        },
        dry_run: common.dry_run,
        mcp_servers: None,
        skip_checks: common.skip_checks,
        skip_step_names: common.skip_step,
    };

    let query_fn: Arc<dyn QueryFunction> = match common.scripted_responses {
        Some(path) => Arc::new(ScriptedQuery::from_file(&path).await?),
        None => Arc::new(ScriptedQuery::empty()),
    };
    let session = Arc::new(SessionManager::new(common.project_root, common.scope));

    Ok(Engine::new(config, query_fn, session))
}

async fn run(args: RunArgs) -> anyhow::Result<wfe_engine::WorkflowResult> {
    let engine = build_engine(args.common).await?;
    tracing::info!(workflow = %args.workflow, spec = %args.spec_path, "starting workflow run");
    Ok(engine.run(&args.workflow, &args.spec_path).await?)
}

async fn resume(args: ResumeArgs) -> anyhow::Result<wfe_engine::WorkflowResult> {
    let base = args.common.project_root.clone();
    let scope = args.common.scope.clone();
    let engine = build_engine(args.common).await?;

    let session = SessionManager::new(base, scope);
    let checkpoint = session
        .load_checkpoint(&args.session_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no checkpoint found for session \"{}\"", args.session_id))?;

    tracing::info!(session = %args.session_id, from_phase = %args.from_phase, "resuming workflow run");
    Ok(engine.resume(&args.workflow, &checkpoint, &args.from_phase).await?)
}
