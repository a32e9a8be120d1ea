//! The interpreter: step dispatch for all five variants, run/resume
//! (spec §4.6). Grounded primarily on `agenticlaw-kg::executor::Executor`'s
//! recursive tree-walking descent (manifest-driven audit writes at every
//! node, sequential context-narrowing child descent) and enriched by the
//! bounded-retry/escalation controller idiom from the `dmuso-direclaw`
//! workflow-engine reference file for the Loop step, which the teacher
//! itself has no counterpart for.

use crate::topo::{self, TaskLike};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use wfe_context::{Context, SessionContextFields};
use wfe_core::query::{AgentQueryOptions, OutputFormat, QueryFunction, QueryMessage, ResultMessage};
use wfe_core::{Error, Result};
use wfe_handlers::{Deps, HandlerRegistry};
use wfe_resolve::loader::{load_agent_definition, load_prompt_definition, AgentStep, CodeStep, LoopStep, OnExhausted, ParallelStep, PerTaskStep, Step, WorkflowDefinition};
use wfe_resolve::{template, Kind, Resolver, SchemaRegistry};
use wfe_session::{now_timestamp, AuditEntry, NewSessionOptions, RunOutcome, SessionManager};

/// Static engine-wide defaults, the bottom of the model/agent/permission
/// precedence chain (spec §4.6.2, §6).
#[derive(Clone, Debug, Default)]
pub struct EngineDefaults {
    pub model: Option<String>,
    pub agent: Option<String>,
    pub permission_mode: Option<String>,
    pub setting_sources: Vec<String>,
}

/// Config knobs (spec §6). Never mutated by a run — `Engine` is reusable
/// across multiple `run`/`resume` invocations.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub working_directory: PathBuf,
    pub workflow_base_dir: PathBuf,
    pub plugin_root: PathBuf,
    pub scope: String,
    pub defaults: EngineDefaults,
    pub dry_run: bool,
    pub mcp_servers: Option<Value>,
    pub skip_checks: bool,
    pub skip_step_names: Vec<String>,
}

/// Fired once per completed top-level phase (spec §4.6, initialization
/// step 3). A thrown error propagates as a run-level failure, unwrapped.
#[async_trait]
pub trait PhaseCompleteHook: Send + Sync {
    async fn on_phase_complete(&self, phase_name: &str, ctx: &Context) -> Result<()>;
}

/// Mirrors every audit entry the engine writes to the session, for a
/// caller that wants a live view (e.g. `RUST_LOG=info` tracing spans)
/// without re-reading `audit.jsonl`.
#[async_trait]
pub trait AuditObserver: Send + Sync {
    async fn on_audit_entry(&self, entry: &AuditEntry);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Completed,
    Paused,
    Failed,
}

/// `run`/`resume`'s return value (spec §4.6 "Run contract").
#[derive(Clone, Debug, serde::Serialize)]
pub struct WorkflowResult {
    pub status: Status,
    pub outputs: Map<String, Value>,
    pub completed_phases: Vec<String>,
    pub changed_files: Option<Vec<String>>,
    pub error: Option<String>,
    pub paused_at_phase: Option<String>,
    pub blocker_details: Option<String>,
}

impl WorkflowResult {
    fn completed(ctx: &Context) -> Self {
        Self {
            status: Status::Completed,
            outputs: ctx.variables_snapshot().into_iter().collect(),
            completed_phases: ctx.completed_phases(),
            changed_files: Some(ctx.changed_files()),
            error: None,
            paused_at_phase: None,
            blocker_details: None,
        }
    }

    fn from_control_flow(err: Error, ctx: &Context) -> Self {
        let outputs: Map<String, Value> = ctx.variables_snapshot().into_iter().collect();
        let completed_phases = ctx.completed_phases();
        let changed_files = Some(ctx.changed_files());
        match err {
            Error::WorkflowPaused {
                paused_at_phase,
                blocker_details,
            } => Self {
                status: Status::Paused,
                outputs,
                completed_phases,
                changed_files,
                error: None,
                paused_at_phase: Some(paused_at_phase),
                blocker_details: Some(blocker_details),
            },
            Error::WorkflowFailure { reason, .. } => Self {
                status: Status::Failed,
                outputs,
                completed_phases,
                changed_files,
                error: Some(reason),
                paused_at_phase: None,
                blocker_details: None,
            },
            other => unreachable!("from_control_flow called on a non-control-flow error: {other}"),
        }
    }
}

/// A lightweight view over a `serde_json::Value` task for the
/// topological sort (spec §4.6.7): tasks with no `id` field get a
/// synthetic one so the sort never panics, but such a task can never be
/// the *target* of a declared dependency (no one else will know its
/// synthetic ID).
struct JsonTask {
    value: Value,
    id: String,
    deps: Vec<String>,
}

impl JsonTask {
    fn new(value: Value, index: usize) -> Self {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("__task_{index}"));
        let deps = value
            .get("dependencies")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Self { value, id, deps }
    }
}

impl TaskLike for JsonTask {
    fn id(&self) -> &str {
        &self.id
    }
    fn dependencies(&self) -> &[String] {
        &self.deps
    }
}

/// The interpreter over a typed phase tree (spec §4.6).
pub struct Engine {
    config: EngineConfig,
    resolver: Resolver,
    handlers: HandlerRegistry,
    schemas: SchemaRegistry,
    query_fn: Arc<dyn QueryFunction>,
    session: Arc<SessionManager>,
    on_phase_complete: Option<Arc<dyn PhaseCompleteHook>>,
    on_audit_entry: Option<Arc<dyn AuditObserver>>,
}

impl Engine {
    pub fn new(config: EngineConfig, query_fn: Arc<dyn QueryFunction>, session: Arc<SessionManager>) -> Self {
        let resolver = Resolver::new(
            config.workflow_base_dir.clone(),
            config.plugin_root.clone(),
            config.scope.clone(),
        );
        Self {
            config,
            resolver,
            handlers: wfe_handlers::default_registry(),
            schemas: SchemaRegistry::builtin(),
            query_fn,
            session,
            on_phase_complete: None,
            on_audit_entry: None,
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_phase_complete_hook(mut self, hook: Arc<dyn PhaseCompleteHook>) -> Self {
        self.on_phase_complete = Some(hook);
        self
    }

    pub fn with_audit_observer(mut self, hook: Arc<dyn AuditObserver>) -> Self {
        self.on_audit_entry = Some(hook);
        self
    }

    // -- run / resume -------------------------------------------------------------

    pub async fn run(&self, workflow_ref: &str, spec_path: &str) -> Result<WorkflowResult> {
        let definition = self.load_workflow(workflow_ref).await?;

        let mut ctx = Context::new();
        ctx.set("specPath", Value::String(spec_path.to_string()));
        let session_id = self
            .session
            .create_session(NewSessionOptions {
                spec_file: Some(spec_path.to_string()),
                ..Default::default()
            })
            .await?;
        ctx.set_session_context(SessionContextFields {
            spec: Some(spec_path.to_string()),
            session_id: Some(session_id),
            ..Default::default()
        });

        let outcome = self.run_phases(&definition, &mut ctx, 0).await?;
        self.finalize(&outcome).await?;
        Ok(outcome)
    }

    pub async fn resume(&self, workflow_ref: &str, checkpoint_data: &Value, from_phase_name: &str) -> Result<WorkflowResult> {
        let definition = self.load_workflow(workflow_ref).await?;
        let start_index = definition
            .phases
            .iter()
            .position(|p| p.name() == from_phase_name)
            .ok_or_else(|| Error::PhaseNotFound(from_phase_name.to_string()))?;

        let mut ctx = Context::from_checkpoint(checkpoint_data);

        match checkpoint_data.get("sessionId").and_then(Value::as_str) {
            Some(id) => self.session.attach(id).await?,
            None => {
                self.session.create_session(NewSessionOptions::default()).await?;
            }
        }

        let outcome = self.run_phases(&definition, &mut ctx, start_index).await?;
        self.finalize(&outcome).await?;
        Ok(outcome)
    }

    async fn finalize(&self, outcome: &WorkflowResult) -> Result<()> {
        match outcome.status {
            Status::Paused => {
                self.session
                    .write_blocker(outcome.blocker_details.clone().unwrap_or_default())
                    .await
            }
            Status::Completed => {
                self.session
                    .complete_session(RunOutcome {
                        status: "completed".to_string(),
                        completed_phases: outcome.completed_phases.clone(),
                    })
                    .await
            }
            Status::Failed => {
                self.session
                    .complete_session(RunOutcome {
                        status: "failed".to_string(),
                        completed_phases: outcome.completed_phases.clone(),
                    })
                    .await
            }
        }
    }

    async fn load_workflow(&self, workflow_ref: &str) -> Result<WorkflowDefinition> {
        let resolved = self.resolver.resolve(Kind::Workflow, workflow_ref)?;
        let yaml = tokio::fs::read_to_string(&resolved.path).await?;
        wfe_resolve::load_workflow_definition(&yaml)
    }

    /// Drives top-level phases starting at `start_index`. Control-flow
    /// outcomes (pause/fail) are captured into `Ok(WorkflowResult)`; any
    /// other error propagates unchanged out of `run`/`resume` (spec §7).
    async fn run_phases(&self, definition: &WorkflowDefinition, ctx: &mut Context, start_index: usize) -> Result<WorkflowResult> {
        for phase in definition.phases.iter().skip(start_index) {
            ctx.set_current_phase(Some(phase.name().to_string()));
            match self.execute_step(phase, ctx, definition).await {
                Ok(()) => {
                    ctx.mark_phase_completed(phase.name());
                    if let Some(hook) = self.on_phase_complete.clone() {
                        hook.on_phase_complete(phase.name(), ctx).await?;
                    }
                }
                Err(e) if e.is_control_flow() => return Ok(WorkflowResult::from_control_flow(e, ctx)),
                Err(e) => return Err(e),
            }
        }
        Ok(WorkflowResult::completed(ctx))
    }

    /// Runs a nested step list (per-task/parallel/loop bodies) in order.
    /// Unlike `run_phases`, this never records a name into `completedPhases`
    /// — that list tracks top-level workflow phases only (spec §8 "universal
    /// invariants": `completedPhases` is a prefix of the workflow's phase
    /// names), and a nested step's name is not a phase name. Stops and
    /// propagates the first error.
    async fn execute_steps(&self, steps: &[Step], ctx: &mut Context, workflow: &WorkflowDefinition) -> Result<()> {
        for step in steps {
            self.execute_step(step, ctx, workflow).await?;
        }
        Ok(())
    }

    // -- step dispatch (spec §4.6.1) -----------------------------------------------

    async fn execute_step(&self, step: &Step, ctx: &mut Context, workflow: &WorkflowDefinition) -> Result<()> {
        if let Some(reason) = self.skip_reason(step) {
            self.audit(step.name(), "skipped", Some(json!({ "reason": reason }))).await;
            return Ok(());
        }

        self.audit(step.name(), "started", None).await;

        let outcome = self.dispatch_step(step, ctx, workflow).await;

        match &outcome {
            Ok(metadata) => {
                self.audit(step.name(), "completed", metadata.clone()).await;
            }
            Err(Error::WorkflowPaused { blocker_details, .. }) => {
                self.audit(step.name(), "paused", Some(json!({ "blockerDetails": blocker_details })))
                    .await;
            }
            Err(e) => {
                self.audit(step.name(), "failed", Some(json!({ "error": e.to_string() }))).await;
            }
        }

        outcome.map(|_| ())
    }

    /// Escape-hatch precedence (spec §4.6.1, §6): `enabled:false` >
    /// `skipStepNames` > `skipChecks`. `dryRun`'s `execute`-phase
    /// suppression (spec §4.7) is folded in here so it applies uniformly
    /// at any nesting depth.
    fn skip_reason(&self, step: &Step) -> Option<String> {
        if !step.enabled() {
            return Some("disabled in workflow definition".to_string());
        }
        if self.config.skip_step_names.iter().any(|n| n == step.name()) {
            return Some(format!("--skip-step={}", step.name()));
        }
        if self.config.skip_checks {
            if let Step::Agent(a) = step {
                let name_lc = step.name().to_lowercase();
                let agent_lc = a.agent.as_deref().unwrap_or("").to_lowercase();
                if name_lc.contains("review") || name_lc.contains("check") || agent_lc.contains("reviewer") {
                    return Some("--skip-checks".to_string());
                }
            }
        }
        if self.config.dry_run && step.name() == "execute" {
            return Some("dry run".to_string());
        }
        None
    }

    async fn dispatch_step(&self, step: &Step, ctx: &mut Context, workflow: &WorkflowDefinition) -> Result<Option<Value>> {
        match step {
            Step::Agent(s) => self.execute_agent_step(s, ctx, workflow).await,
            Step::Code(s) => self.execute_code_step(s, ctx).await,
            Step::PerTask(s) => self.execute_per_task_step(s, ctx, workflow).await,
            Step::Parallel(s) => self.execute_parallel_step(s, ctx, workflow).await,
            Step::Loop(s) => self.execute_loop_step(s, ctx, workflow).await,
        }
    }

    // -- agent step (spec §4.6.2) -----------------------------------------------------

    async fn execute_agent_step(&self, step: &AgentStep, ctx: &mut Context, workflow: &WorkflowDefinition) -> Result<Option<Value>> {
        let agent_name = step
            .agent
            .clone()
            .or_else(|| workflow.defaults.agent.clone())
            .ok_or_else(|| Error::SchemaError(format!("agent step \"{}\": no agent resolvable", step.name)))?;

        let agent_resolved = self.resolver.resolve(Kind::Agent, &agent_name)?;
        let agent_content = tokio::fs::read_to_string(&agent_resolved.path).await?;
        let agent_def = load_agent_definition(&agent_content)?;

        let prompt_name = step.prompt.clone().unwrap_or_else(|| agent_name.clone());
        let prompt_resolved = self.resolver.resolve(Kind::Prompt, &prompt_name)?;
        let prompt_content = tokio::fs::read_to_string(&prompt_resolved.path).await?;
        let prompt_def = load_prompt_definition(&prompt_content)?;

        let model = step
            .model
            .clone()
            .or_else(|| agent_def.model.clone())
            .or_else(|| workflow.defaults.model.clone())
            .or_else(|| self.config.defaults.model.clone())
            .unwrap_or_default();

        let permission_mode = workflow
            .defaults
            .permission_mode
            .clone()
            .or_else(|| self.config.defaults.permission_mode.clone());
        let setting_sources = workflow
            .defaults
            .setting_sources
            .clone()
            .unwrap_or_else(|| self.config.defaults.setting_sources.clone());

        let schema = agent_def.output_schema.as_deref().and_then(|r| self.schemas.resolve(r));
        let allow_bypass = permission_mode.as_deref() == Some("bypassPermissions");

        let template_vars = ctx.get_template_vars();
        let rendered_prompt = template::render(&prompt_def.body, &template_vars);

        let options = AgentQueryOptions {
            prompt: rendered_prompt,
            system_prompt: agent_def.system_prompt.clone(),
            allowed_tools: agent_def.tools.clone(),
            model,
            cwd: self.config.working_directory.display().to_string(),
            permission_mode: permission_mode.clone(),
            setting_sources,
            allow_dangerously_skip_permissions: allow_bypass,
            mcp_servers: self.config.mcp_servers.clone(),
            output_format: schema.map(|s| OutputFormat {
                kind: "json_schema".to_string(),
                schema: s,
            }),
        };

        let mut stream = self.query_fn.query(options, None).await?;
        let mut last_structured: Option<Value> = None;
        let mut files_changed: Vec<Value> = Vec::new();

        while let Some(msg) = stream.next().await {
            match msg? {
                QueryMessage::Result(ResultMessage::Success {
                    structured_output,
                    files_changed: changed,
                    ..
                }) => {
                    if let Some(v) = structured_output {
                        last_structured = Some(v);
                    }
                    files_changed.extend(changed.into_iter().map(|f| json!({ "path": f.path })));
                }
                QueryMessage::Result(ResultMessage::Error { subtype, errors, .. }) => {
                    return Err(Error::failure(
                        ctx.current_phase().unwrap_or(&step.name).to_string(),
                        format!("Agent \"{}\" failed: {subtype} - {}", step.name, errors.join(", ")),
                    ));
                }
                QueryMessage::Other => {}
            }
        }

        if let Some(output_key) = &step.output {
            if let Some(v) = &last_structured {
                if !v.is_null() {
                    ctx.set(output_key.clone(), v.clone());
                }
            }
        }
        ctx.add_changed_files_from_result(&json!({ "filesChanged": files_changed }));

        Ok(Some(json!({
            "agentSource": agent_resolved.source.as_str(),
            "promptSource": prompt_resolved.source.as_str(),
        })))
    }

    // -- code step (spec §4.6.3) -------------------------------------------------------

    async fn execute_code_step(&self, step: &CodeStep, ctx: &mut Context) -> Result<Option<Value>> {
        let handler = self.handlers.get(&step.handler)?;
        let input = step.input.as_deref().and_then(|p| ctx.resolve(p));
        let deps = Deps {
            query_fn: Some(self.query_fn.clone()),
            mcp_servers: self.config.mcp_servers.clone(),
            dry_run: self.config.dry_run,
        };
        handler.call(ctx, input, &deps).await?;
        Ok(None)
    }

    // -- per-task step (spec §4.6.4) ---------------------------------------------------

    async fn execute_per_task_step(&self, step: &PerTaskStep, ctx: &mut Context, workflow: &WorkflowDefinition) -> Result<Option<Value>> {
        let tasks = match ctx.resolve(&step.source) {
            Some(Value::Array(items)) => items,
            _ => return Err(Error::PerTaskSourceNotArray(step.source.clone())),
        };

        let wrapped: Vec<JsonTask> = tasks.into_iter().enumerate().map(|(i, v)| JsonTask::new(v, i)).collect();
        let order = topo::topological_sort(&wrapped)?;
        let phase_name = ctx.current_phase().map(str::to_string);
        let count = wrapped.len();

        for index in order {
            let mut child = ctx.with_task(&wrapped[index].value, index, count);
            child.set_current_phase(phase_name.clone());

            let outcome = self.execute_steps(&step.steps, &mut child, workflow).await;
            // Merge unconditionally: a pause/failure raised partway
            // through a task must still preserve whatever pending→completed
            // transition happened inside it (spec §4.6.4).
            ctx.merge_task_results(&child);
            // `merge_task_results` only ever *adds* keys the parent lacks
            // (spec §3 selective merge), but `tasksCompleted`/`tasksPending`
            // are seeded into the parent by `create-issues` before this loop
            // ever runs, so the selective merge alone would silently drop
            // every pending→completed transition `save-checkpoint` makes
            // inside the child. Those two keys are the per-task progress
            // ledger, not task-authored output, so they overwrite here
            // regardless of outcome.
            for key in ["tasksCompleted", "tasksPending"] {
                if let Some(v) = child.get(key) {
                    ctx.set(key, v.clone());
                }
            }
            outcome?;
        }
        Ok(None)
    }

    // -- parallel step (spec §4.6.5) ---------------------------------------------------

    async fn execute_parallel_step(&self, step: &ParallelStep, ctx: &mut Context, workflow: &WorkflowDefinition) -> Result<Option<Value>> {
        let base = ctx.clone();
        let futures = step.steps.iter().map(|s| {
            let mut child = base.clone();
            async move {
                let outcome = self.execute_step(s, &mut child, workflow).await;
                (child, outcome)
            }
        });

        // `join_all` polls every future to its first suspension point
        // before any one of them is polled a second time, giving the
        // "no child observes another child's mutations" / "all children
        // begin before any child finishes" property (spec §4.6.5/§5)
        // without needing native threads.
        let results = futures::future::join_all(futures).await;

        let mut first_err: Option<Error> = None;
        for (child, outcome) in results {
            match outcome {
                Ok(()) => ctx.merge_task_results(&child),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    // -- loop step (spec §4.6.6) -------------------------------------------------------

    async fn execute_loop_step(&self, step: &LoopStep, ctx: &mut Context, workflow: &WorkflowDefinition) -> Result<Option<Value>> {
        for attempt in 1..=step.max_retries {
            self.execute_steps(&step.steps, ctx, workflow).await?;
            if attempt == step.max_retries {
                break;
            }
            if !ctx.evaluate(&step.condition) {
                return Ok(None);
            }
        }

        if !ctx.evaluate(&step.condition) {
            return Ok(None);
        }

        let phase = ctx.current_phase().unwrap_or(&step.name).to_string();
        match step.on_exhausted {
            OnExhausted::Escalate => Err(Error::paused(
                phase,
                format!(
                    "Loop exhausted {} retries. Manual intervention required for step \"{}\".",
                    step.max_retries, step.name
                ),
            )),
            OnExhausted::Fail => Err(Error::failure(phase, format!("Loop exhausted {} retries", step.max_retries))),
            OnExhausted::Warn => Ok(Some(json!({
                "warning": format!("Loop exhausted {} retries", step.max_retries),
            }))),
        }
    }

    // -- audit -----------------------------------------------------------------------

    async fn audit(&self, step: &str, status: &str, metadata: Option<Value>) {
        let entry = AuditEntry {
            step: step.to_string(),
            status: status.to_string(),
            timestamp: now_timestamp(),
            metadata,
        };
        if let Some(hook) = &self.on_audit_entry {
            hook.on_audit_entry(&entry).await;
        }
        self.session.append_audit_entry(entry).await;
    }
}
