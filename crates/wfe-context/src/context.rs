//! The per-run variable store (spec §3 "Context", §4.3).
//!
//! Mirrors the shape of `agenticlaw-agent::session::Session`: state lives
//! behind a small set of accessor methods that hand back copies, never
//! references into the live store, so callers (the engine, template
//! rendering) can never accidentally mutate state out from under a run.

use crate::expr;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Standard session variables seeded by `setSessionContext` (§4.3).
#[derive(Clone, Debug, Default)]
pub struct SessionContextFields {
    pub spec: Option<String>,
    pub worktree_path: Option<String>,
    pub session_id: Option<String>,
    pub branch_name: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Context {
    variables: Map<String, Value>,
    completed_phases: Vec<String>,
    current_task_id: Option<String>,
    changed_files: Vec<String>,
    current_phase: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    // -- basic variable access -------------------------------------------------

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Dot-notated lookup across objects and array-like (numeric) indices.
    /// Returns `None` as soon as an intermediate segment is null, missing,
    /// or a primitive that can't be descended into further.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        if is_unsafe_segment(first) {
            return None;
        }
        let mut cur = self.variables.get(first)?.clone();
        for seg in segments {
            if is_unsafe_segment(seg) {
                return None;
            }
            cur = resolve_segment(&cur, seg)?;
        }
        Some(cur)
    }

    pub fn evaluate(&self, condition: &str) -> bool {
        match expr::parse(condition) {
            Ok(parsed) => expr::evaluate(&parsed, &|p| self.resolve(p)),
            Err(_) => false,
        }
    }

    pub fn validate_condition(condition: &str) -> Vec<String> {
        expr::validate_condition(condition)
    }

    // -- phases -----------------------------------------------------------------

    pub fn mark_phase_completed(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.completed_phases.contains(&name) {
            self.completed_phases.push(name);
        }
    }

    pub fn completed_phases(&self) -> Vec<String> {
        self.completed_phases.clone()
    }

    pub fn set_current_phase(&mut self, name: Option<String>) {
        self.current_phase = name;
    }

    pub fn current_phase(&self) -> Option<&str> {
        self.current_phase.as_deref()
    }

    // -- changed files ------------------------------------------------------------

    pub fn add_changed_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.changed_files.contains(&path) {
            self.changed_files.push(path);
        }
    }

    pub fn set_changed_files(&mut self, paths: Vec<String>) {
        self.changed_files.clear();
        for p in paths {
            self.add_changed_file(p);
        }
    }

    /// Extracts `result.filesChanged[*].path`, ignoring non-string paths.
    pub fn add_changed_files_from_result(&mut self, result: &Value) {
        if let Some(Value::Array(items)) = result.get("filesChanged") {
            for item in items {
                if let Some(Value::String(path)) = item.get("path") {
                    self.add_changed_file(path.clone());
                }
            }
        }
    }

    pub fn changed_files(&self) -> Vec<String> {
        self.changed_files.clone()
    }

    // -- per-task child contexts --------------------------------------------------

    /// Creates a per-task child: a deep clone of this context's variables,
    /// completed phases and changed files, plus the `task`/`taskIndex`/
    /// `taskCount` bindings and `currentTaskId` (spec §3).
    pub fn with_task(&self, task: &Value, index: usize, count: usize) -> Context {
        let mut child = self.clone();
        let task_id = task.get("id").and_then(Value::as_str).map(str::to_string);
        child.variables.insert("task".to_string(), task.clone());
        child.variables.insert("taskIndex".to_string(), Value::from(index));
        child.variables.insert("taskCount".to_string(), Value::from(count));
        child.current_task_id = task_id;
        child
    }

    pub fn current_task_id(&self) -> Option<&str> {
        self.current_task_id.as_deref()
    }

    /// Selective merge of a per-task/parallel child back into this
    /// (parent) context, per spec §3:
    /// - child keys absent in the parent are added; existing parent keys
    ///   are never overwritten;
    /// - `task` is explicitly excluded;
    /// - `changedFiles` and `completedPhases` union-merge, preserving
    ///   order and deduplicating.
    pub fn merge_task_results(&mut self, child: &Context) {
        for (k, v) in child.variables.iter() {
            if k == "task" {
                continue;
            }
            self.variables.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for f in &child.changed_files {
            self.add_changed_file(f.clone());
        }
        for p in &child.completed_phases {
            self.mark_phase_completed(p.clone());
        }
    }

    // -- template vars / checkpoints -----------------------------------------------

    /// A snapshot copy suitable for template rendering. Never leaks the
    /// internal store.
    pub fn get_template_vars(&self) -> Value {
        let mut map = self.variables.clone();
        map.insert(
            "changedFiles".to_string(),
            Value::Array(self.changed_files.iter().cloned().map(Value::String).collect()),
        );
        Value::Object(map)
    }

    /// A copy of a single resolved path, suitable for returning to
    /// external callers (`getResult`-style accessors never leak internal
    /// references).
    pub fn get_result(&self, path: &str) -> Option<Value> {
        self.resolve(path)
    }

    pub fn to_checkpoint(&self) -> Value {
        let mut out = Map::new();
        out.insert("variables".to_string(), Value::Object(self.variables.clone()));
        out.insert(
            "completedPhases".to_string(),
            Value::Array(self.completed_phases.iter().cloned().map(Value::String).collect()),
        );
        out.insert(
            "currentTaskId".to_string(),
            self.current_task_id.clone().map(Value::String).unwrap_or(Value::Null),
        );
        out.insert(
            "changedFiles".to_string(),
            Value::Array(self.changed_files.iter().cloned().map(Value::String).collect()),
        );
        out.insert(
            "currentPhase".to_string(),
            self.current_phase.clone().map(Value::String).unwrap_or(Value::Null),
        );
        Value::Object(out)
    }

    pub fn from_checkpoint(data: &Value) -> Context {
        let mut ctx = Context::new();
        if let Some(Value::Object(vars)) = data.get("variables") {
            ctx.variables = vars.clone();
        }
        if let Some(Value::Array(phases)) = data.get("completedPhases") {
            for p in phases {
                if let Value::String(s) = p {
                    ctx.mark_phase_completed(s.clone());
                }
            }
        }
        ctx.current_task_id = data
            .get("currentTaskId")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(Value::Array(files)) = data.get("changedFiles") {
            for f in files {
                if let Value::String(s) = f {
                    ctx.add_changed_file(s.clone());
                }
            }
        }
        ctx.current_phase = data
            .get("currentPhase")
            .and_then(Value::as_str)
            .map(str::to_string);
        ctx
    }

    pub fn set_session_context(&mut self, fields: SessionContextFields) {
        if let Some(spec) = fields.spec {
            self.set("spec", Value::String(spec));
        }
        if let Some(wt) = fields.worktree_path {
            self.set("worktreePath", Value::String(wt));
        }
        if let Some(sid) = fields.session_id {
            self.set("sessionId", Value::String(sid));
        }
        if let Some(branch) = fields.branch_name {
            self.set("branchName", Value::String(branch));
        }
    }

    /// A raw BTreeMap view used by handlers that need deterministic
    /// iteration order over variable keys (e.g. `create-issues`).
    pub fn variables_snapshot(&self) -> BTreeMap<String, Value> {
        self.variables.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

fn is_unsafe_segment(segment: &str) -> bool {
    matches!(segment, "__proto__" | "prototype" | "constructor")
}

fn resolve_segment(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(segment).cloned(),
        Value::Array(arr) => segment.parse::<usize>().ok().and_then(|idx| arr.get(idx).cloned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_dot_and_array_paths() {
        let mut ctx = Context::new();
        ctx.set("tasks", json!([{"id": "a"}, {"id": "b"}]));
        assert_eq!(ctx.resolve("tasks.0.id"), Some(json!("a")));
        assert_eq!(ctx.resolve("tasks.5.id"), None);
        assert_eq!(ctx.resolve("missing.nested"), None);
    }

    #[test]
    fn resolve_refuses_dangerous_segments() {
        let mut ctx = Context::new();
        ctx.set("a", json!({"__proto__": {"x": 1}}));
        assert_eq!(ctx.resolve("a.__proto__.x"), None);
        assert_eq!(ctx.resolve("__proto__"), None);
    }

    #[test]
    fn changed_files_idempotent_no_duplicates() {
        let mut ctx = Context::new();
        ctx.add_changed_file("src/a.rs");
        ctx.add_changed_file("src/a.rs");
        ctx.add_changed_file("src/b.rs");
        assert_eq!(ctx.changed_files(), vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn with_task_and_merge_task_results() {
        let mut parent = Context::new();
        parent.set("existing", json!(1));
        let task = json!({"id": "task-1", "title": "t"});
        let mut child = parent.with_task(&task, 0, 3);
        assert_eq!(child.current_task_id(), Some("task-1"));
        child.set("newKey", json!("fromChild"));
        child.set("existing", json!(999)); // must not clobber parent
        child.add_changed_file("src/child.rs");

        parent.merge_task_results(&child);
        assert_eq!(parent.get("existing"), Some(&json!(1)));
        assert_eq!(parent.get("newKey"), Some(&json!("fromChild")));
        assert!(parent.get("task").is_none());
        assert_eq!(parent.changed_files(), vec!["src/child.rs"]);
    }

    #[test]
    fn template_vars_and_result_are_copies() {
        let mut ctx = Context::new();
        ctx.set("a", json!({"nested": [1, 2, 3]}));
        let mut snapshot = ctx.get_template_vars();
        if let Value::Object(map) = &mut snapshot {
            map.insert("a".to_string(), json!("mutated"));
        }
        assert_eq!(ctx.get("a"), Some(&json!({"nested": [1, 2, 3]})));

        let mut result = ctx.get_result("a").unwrap();
        if let Value::Object(map) = &mut result {
            map.insert("nested".to_string(), json!("mutated"));
        }
        assert_eq!(ctx.get("a"), Some(&json!({"nested": [1, 2, 3]})));
    }

    #[test]
    fn checkpoint_round_trip_preserves_nested_structures() {
        let mut ctx = Context::new();
        ctx.set("deep", json!({"a": {"b": [1, {"c": 2}]}}));
        ctx.mark_phase_completed("analyze");
        ctx.add_changed_file("src/auth.ts");
        ctx.set_current_phase(Some("plan".to_string()));

        let checkpoint = ctx.to_checkpoint();
        let restored = Context::from_checkpoint(&checkpoint);

        assert_eq!(restored.get("deep"), ctx.get("deep"));
        assert_eq!(restored.completed_phases(), ctx.completed_phases());
        assert_eq!(restored.changed_files(), ctx.changed_files());
        assert_eq!(restored.current_phase(), ctx.current_phase());
    }
}
