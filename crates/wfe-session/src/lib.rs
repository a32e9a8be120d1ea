//! Session directory lifecycle (spec §4.5, §6).
//!
//! Grounded on `agenticlaw-agent::ctx_file`'s append-only session-file
//! idiom (`find_latest`/`find_by_id`/`now_timestamp`) and
//! `agenticlaw-kg::resource::LocalFsDriver`'s `tokio::fs`-based artifact
//! path construction and append-mode event log writing. A single session
//! directory holds `context.json`, `audit.jsonl`, `checkpoint.json`, and
//! `blocker.json` under `<basePath>/.<scope>/sessions/<sessionId>/`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use wfe_core::{new_checkpoint_id, new_session_id, Error, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub step: String,
    pub status: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// `status ∈ {running, paused, completed, failed}` (spec §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionContext {
    pub id: String,
    pub status: String,
    #[serde(rename = "currentPhase")]
    pub current_phase: Option<String>,
    #[serde(rename = "specFile")]
    pub spec_file: Option<String>,
    #[serde(rename = "worktreePath")]
    pub worktree_path: Option<String>,
    #[serde(rename = "branchName")]
    pub branch_name: Option<String>,
    #[serde(rename = "phasesCompleted")]
    pub phases_completed: Vec<String>,
    #[serde(rename = "tasksCompleted", default, skip_serializing_if = "Option::is_none")]
    pub tasks_completed: Option<Vec<String>>,
    #[serde(rename = "tasksPending", default, skip_serializing_if = "Option::is_none")]
    pub tasks_pending: Option<Vec<String>>,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
    #[serde(rename = "completedAt", default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Parameters for `createSession` (spec §4.5).
#[derive(Clone, Debug, Default)]
pub struct NewSessionOptions {
    pub spec_file: Option<String>,
    pub worktree_path: Option<String>,
    pub branch_name: Option<String>,
}

/// Parameters for `saveCheckpoint` (spec §4.5).
#[derive(Clone, Debug)]
pub struct CheckpointInput {
    pub current_phase: String,
    pub variables: Value,
    pub tasks_completed: Vec<String>,
    pub tasks_pending: Vec<String>,
    pub completed_phases: Option<Vec<String>>,
    pub changed_files: Option<Vec<String>>,
}

/// The terminal outcome passed to `completeSession` (spec §4.5/§7).
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub status: String,
    pub completed_phases: Vec<String>,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Owns the on-disk lifecycle of a single run's session directory.
///
/// Interior state is behind a `tokio::sync::RwLock`, the same idiom
/// `agenticlaw_agent::session::Session` uses for shared mutable state
/// accessed through small async accessors.
pub struct SessionManager {
    base_path: PathBuf,
    scope: String,
    session_id: RwLock<Option<String>>,
}

impl SessionManager {
    pub fn new(base_path: impl Into<PathBuf>, scope: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            scope: scope.into(),
            session_id: RwLock::new(None),
        }
    }

    pub fn sessions_root(&self) -> PathBuf {
        self.base_path.join(format!(".{}", self.scope)).join("sessions")
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_root().join(session_id)
    }

    pub async fn current_session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn context_path(dir: &Path) -> PathBuf {
        dir.join("context.json")
    }
    fn audit_path(dir: &Path) -> PathBuf {
        dir.join("audit.jsonl")
    }
    fn checkpoint_path(dir: &Path) -> PathBuf {
        dir.join("checkpoint.json")
    }
    fn blocker_path(dir: &Path) -> PathBuf {
        dir.join("blocker.json")
    }

    /// Binds to an existing session directory (used by `resume`) without
    /// recreating `context.json`. Fails loudly if the directory is gone,
    /// same contract as `save_checkpoint`.
    pub async fn attach(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        if !dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("session directory missing: {}", dir.display()),
            )));
        }
        *self.session_id.write().await = Some(session_id.to_string());
        Ok(())
    }

    /// Mints a new session, creates its directory, writes the initial
    /// `context.json` (`status: running`, `currentPhase: "init"`), and
    /// appends the `init` audit entry.
    pub async fn create_session(&self, opts: NewSessionOptions) -> Result<String> {
        let id = new_session_id();
        let dir = self.session_dir(&id);
        tokio::fs::create_dir_all(&dir).await?;

        let now = now_iso();
        let ctx = SessionContext {
            id: id.clone(),
            status: "running".to_string(),
            current_phase: Some("init".to_string()),
            spec_file: opts.spec_file.clone(),
            worktree_path: opts.worktree_path,
            branch_name: opts.branch_name,
            phases_completed: Vec::new(),
            tasks_completed: None,
            tasks_pending: None,
            started_at: now.clone(),
            updated_at: now,
            completed_at: None,
        };
        write_json_atomic(&Self::context_path(&dir), &ctx).await?;

        *self.session_id.write().await = Some(id.clone());

        self.append_audit_entry(AuditEntry {
            step: "init".to_string(),
            status: "completed".to_string(),
            timestamp: now_iso(),
            metadata: Some(json!({"session_id": id, "spec_file": opts.spec_file})),
        })
        .await;

        tracing::info!(session_id = %id, "session created");
        Ok(id)
    }

    /// Appends one JSON line to `audit.jsonl`. Silent no-op when no
    /// session has been created; transparently recreates the file if it
    /// was removed out from under the run (spec §4.5 "idempotent
    /// resilience").
    pub async fn append_audit_entry(&self, entry: AuditEntry) {
        let Some(id) = self.current_session_id().await else {
            return;
        };
        let dir = self.session_dir(&id);
        if let Err(e) = self.append_audit_entry_for(&dir, &entry).await {
            tracing::warn!(error = %e, "failed to append audit entry");
        }
    }

    async fn append_audit_entry_for(&self, dir: &Path, entry: &AuditEntry) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::audit_path(dir))
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Writes `checkpoint.json` and updates `context.json`. Propagates
    /// (does not swallow) a missing session directory — spec §4.5 "must
    /// fail loudly when the session directory no longer exists".
    pub async fn save_checkpoint(&self, input: CheckpointInput) -> Result<()> {
        let id = self
            .current_session_id()
            .await
            .ok_or_else(|| Error::Internal("save_checkpoint: no active session".to_string()))?;
        let dir = self.session_dir(&id);
        if !dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("session directory missing: {}", dir.display()),
            )));
        }

        let checkpoint_id = new_checkpoint_id();
        let resume_instructions = format!(
            "Resume with: wfe resume {id} --from-phase \"{}\". Tasks pending: {}.",
            input.current_phase,
            input.tasks_pending.len()
        );
        let checkpoint = json!({
            "checkpointId": checkpoint_id,
            "sessionId": id,
            "currentPhase": input.current_phase,
            "variables": input.variables,
            "tasksCompleted": input.tasks_completed,
            "tasksPending": input.tasks_pending,
            "completedPhases": input.completed_phases,
            "changedFiles": input.changed_files,
            "lastAction": "checkpoint",
            "resumeInstructions": resume_instructions,
        });
        write_json_atomic(&Self::checkpoint_path(&dir), &checkpoint).await?;

        let mut ctx = self.read_context(&dir).await?;
        ctx.current_phase = Some(input.current_phase);
        ctx.tasks_completed = Some(input.tasks_completed);
        ctx.tasks_pending = Some(input.tasks_pending);
        if let Some(phases) = input.completed_phases {
            ctx.phases_completed = phases;
        }
        ctx.updated_at = now_iso();
        write_json_atomic(&Self::context_path(&dir), &ctx).await?;
        Ok(())
    }

    /// Returns `None` when no checkpoint exists; propagates parse errors
    /// on a corrupted file.
    pub async fn load_checkpoint(&self, session_id: &str) -> Result<Option<Value>> {
        let path = Self::checkpoint_path(&self.session_dir(session_id));
        if !path.is_file() {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        let value: Value = serde_json::from_str(&raw)?;
        Ok(Some(value))
    }

    /// Writes `blocker.json` and sets `context.json.status = "paused"`.
    pub async fn write_blocker(&self, details: impl Into<String>) -> Result<()> {
        let id = self
            .current_session_id()
            .await
            .ok_or_else(|| Error::Internal("write_blocker: no active session".to_string()))?;
        let dir = self.session_dir(&id);
        let details = details.into();
        let blocker = json!({
            "sessionId": id,
            "details": details,
            "timestamp": now_iso(),
        });
        write_json_atomic(&Self::blocker_path(&dir), &blocker).await?;

        let mut ctx = self.read_context(&dir).await?;
        ctx.status = "paused".to_string();
        ctx.updated_at = now_iso();
        write_json_atomic(&Self::context_path(&dir), &ctx).await?;
        Ok(())
    }

    /// Maps `result.status == "completed"` to `completed`, else `failed`;
    /// writes `phasesCompleted`; appends the final `complete` audit entry.
    /// Idempotent: repeat invocations overwrite `context.json` identically
    /// and append one more (identical-shaped) audit entry per call.
    pub async fn complete_session(&self, result: RunOutcome) -> Result<()> {
        let id = self
            .current_session_id()
            .await
            .ok_or_else(|| Error::Internal("complete_session: no active session".to_string()))?;
        let dir = self.session_dir(&id);
        let mapped_status = if result.status == "completed" {
            "completed"
        } else {
            "failed"
        };

        let mut ctx = self.read_context(&dir).await?;
        ctx.status = mapped_status.to_string();
        ctx.phases_completed = result.completed_phases.clone();
        let now = now_iso();
        ctx.updated_at = now.clone();
        ctx.completed_at = Some(now);
        write_json_atomic(&Self::context_path(&dir), &ctx).await?;

        self.append_audit_entry(AuditEntry {
            step: "complete".to_string(),
            status: mapped_status.to_string(),
            timestamp: now_iso(),
            metadata: Some(json!({"completedPhases": result.completed_phases})),
        })
        .await;
        Ok(())
    }

    /// Empty sequence when no session exists or on a nonexistent ID.
    pub async fn get_audit_entries(&self, session_id: Option<&str>) -> Vec<AuditEntry> {
        let id = match session_id {
            Some(s) => Some(s.to_string()),
            None => self.current_session_id().await,
        };
        let Some(id) = id else {
            return Vec::new();
        };
        let path = Self::audit_path(&self.session_dir(&id));
        let Ok(raw) = tokio::fs::read_to_string(&path).await else {
            return Vec::new();
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    async fn read_context(&self, dir: &Path) -> Result<SessionContext> {
        let raw = tokio::fs::read_to_string(Self::context_path(dir)).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Write-then-rename so concurrent readers never observe a half-written
/// status file (spec §5: "Session status file is overwritten atomically").
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension(format!(
        "{}.tmp-{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json"),
        std::process::id()
    ));
    tokio::fs::write(&tmp_path, body).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Start-of-run timestamp formatting helper shared by callers that need
/// to stamp ad-hoc artifacts outside the session lifecycle above.
pub fn now_timestamp() -> String {
    now_iso()
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_session_writes_context_and_init_audit() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(tmp.path(), "wfe");
        let id = mgr
            .create_session(NewSessionOptions {
                spec_file: Some("spec.md".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(id.starts_with("wf-"));

        let entries = mgr.get_audit_entries(None).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].step, "init");
        assert_eq!(entries[0].status, "completed");

        let ctx_raw = tokio::fs::read_to_string(mgr.session_dir(&id).join("context.json"))
            .await
            .unwrap();
        let ctx: SessionContext = serde_json::from_str(&ctx_raw).unwrap();
        assert_eq!(ctx.status, "running");
        assert_eq!(ctx.current_phase.as_deref(), Some("init"));
    }

    #[tokio::test]
    async fn append_audit_recreates_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(tmp.path(), "wfe");
        let id = mgr.create_session(NewSessionOptions::default()).await.unwrap();
        tokio::fs::remove_file(mgr.session_dir(&id).join("audit.jsonl"))
            .await
            .unwrap();

        mgr.append_audit_entry(AuditEntry {
            step: "analyze".to_string(),
            status: "started".to_string(),
            timestamp: now_iso(),
            metadata: None,
        })
        .await;

        let entries = mgr.get_audit_entries(Some(&id)).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].step, "analyze");
    }

    #[tokio::test]
    async fn save_checkpoint_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(tmp.path(), "wfe");
        let id = mgr.create_session(NewSessionOptions::default()).await.unwrap();

        mgr.save_checkpoint(CheckpointInput {
            current_phase: "plan".to_string(),
            variables: json!({"a": 1}),
            tasks_completed: vec!["t1".to_string()],
            tasks_pending: vec!["t2".to_string()],
            completed_phases: Some(vec!["analyze".to_string(), "plan".to_string()]),
            changed_files: Some(vec!["src/a.rs".to_string()]),
        })
        .await
        .unwrap();

        let loaded = mgr.load_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(loaded["currentPhase"], json!("plan"));
        assert_eq!(loaded["tasksPending"], json!(["t2"]));
        assert!(loaded["resumeInstructions"].as_str().unwrap().contains("plan"));

        let missing = mgr.load_checkpoint("wf-nonexistent").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn save_checkpoint_fails_loudly_when_dir_gone() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(tmp.path(), "wfe");
        let id = mgr.create_session(NewSessionOptions::default()).await.unwrap();
        tokio::fs::remove_dir_all(mgr.session_dir(&id)).await.unwrap();

        let err = mgr
            .save_checkpoint(CheckpointInput {
                current_phase: "plan".to_string(),
                variables: json!({}),
                tasks_completed: vec![],
                tasks_pending: vec![],
                completed_phases: None,
                changed_files: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn write_blocker_sets_paused_status() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(tmp.path(), "wfe");
        let id = mgr.create_session(NewSessionOptions::default()).await.unwrap();
        mgr.write_blocker("Loop exhausted 3 retries").await.unwrap();

        let raw = tokio::fs::read_to_string(mgr.session_dir(&id).join("blocker.json"))
            .await
            .unwrap();
        let blocker: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(blocker["details"], json!("Loop exhausted 3 retries"));

        let ctx_raw = tokio::fs::read_to_string(mgr.session_dir(&id).join("context.json"))
            .await
            .unwrap();
        let ctx: SessionContext = serde_json::from_str(&ctx_raw).unwrap();
        assert_eq!(ctx.status, "paused");
    }

    #[tokio::test]
    async fn complete_session_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(tmp.path(), "wfe");
        let id = mgr.create_session(NewSessionOptions::default()).await.unwrap();

        let outcome = RunOutcome {
            status: "completed".to_string(),
            completed_phases: vec!["analyze".to_string()],
        };
        mgr.complete_session(outcome.clone()).await.unwrap();
        mgr.complete_session(outcome).await.unwrap();

        let entries = mgr.get_audit_entries(Some(&id)).await;
        let completes: Vec<_> = entries.iter().filter(|e| e.step == "complete").collect();
        assert_eq!(completes.len(), 2);
        assert!(completes.iter().all(|e| e.status == "completed"));

        let ctx_raw = tokio::fs::read_to_string(mgr.session_dir(&id).join("context.json"))
            .await
            .unwrap();
        let ctx: SessionContext = serde_json::from_str(&ctx_raw).unwrap();
        assert_eq!(ctx.status, "completed");
    }

    #[tokio::test]
    async fn attach_binds_to_existing_session_without_recreating_context() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(tmp.path(), "wfe");
        let id = mgr.create_session(NewSessionOptions::default()).await.unwrap();

        let other = SessionManager::new(tmp.path(), "wfe");
        other.attach(&id).await.unwrap();
        assert_eq!(other.current_session_id().await.as_deref(), Some(id.as_str()));

        let err = other.attach("wf-does-not-exist").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn get_audit_entries_empty_for_nonexistent_session() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(tmp.path(), "wfe");
        assert!(mgr.get_audit_entries(Some("wf-nope")).await.is_empty());
        assert!(mgr.get_audit_entries(None).await.is_empty());
    }
}
