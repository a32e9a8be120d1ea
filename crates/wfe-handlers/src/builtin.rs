//! Default handlers shipped with every `HandlerRegistry` (spec §4.4).

use crate::registry::{Deps, Handler};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use wfe_context::Context;
use wfe_core::Result;

pub struct CreateIssuesHandler;

fn string_vec(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Handler for CreateIssuesHandler {
    async fn call(&self, ctx: &mut Context, _input: Option<Value>, deps: &Deps) -> Result<()> {
        let analysis = ctx.resolve("analysis").unwrap_or(json!({}));
        let mut tasks = analysis
            .get("tasks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut seen_ids: BTreeSet<String> = BTreeSet::new();
        let mut next_seq = 1u32;
        for task in tasks.iter_mut() {
            let has_id = task
                .get("id")
                .and_then(Value::as_str)
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if !has_id {
                let generated = loop {
                    let candidate = format!("task-{next_seq:03}");
                    next_seq += 1;
                    if !seen_ids.contains(&candidate) {
                        break candidate;
                    }
                };
                if let Some(obj) = task.as_object_mut() {
                    obj.insert("id".to_string(), Value::String(generated.clone()));
                }
                seen_ids.insert(generated);
            } else if let Some(id) = task.get("id").and_then(Value::as_str) {
                seen_ids.insert(id.to_string());
            }
        }

        let task_ids: Vec<Value> = tasks
            .iter()
            .filter_map(|t| t.get("id").and_then(Value::as_str))
            .map(|s| Value::String(s.to_string()))
            .collect();

        let mut analysis = analysis;
        if let Some(obj) = analysis.as_object_mut() {
            obj.insert("tasks".to_string(), Value::Array(tasks.clone()));
        } else {
            analysis = json!({ "tasks": tasks });
        }
        ctx.set("analysis", analysis);
        ctx.set("taskIds", Value::Array(task_ids.clone()));
        ctx.set("tasksCompleted", Value::Array(Vec::new()));
        ctx.set("tasksPending", Value::Array(task_ids.clone()));

        if let Some(query_fn) = &deps.query_fn {
            match create_external_issues(query_fn.as_ref(), &tasks).await {
                Ok(mapping) => ctx.set("mcpIssueIds", mapping),
                Err(e) => {
                    tracing::warn!(error = %e, "create-issues: external issue creation failed, mcpIssueIds left absent");
                }
            }
        }

        Ok(())
    }
}

async fn create_external_issues(
    query_fn: &dyn wfe_core::query::QueryFunction,
    tasks: &[Value],
) -> Result<Value> {
    use futures::StreamExt;
    use wfe_core::query::{AgentQueryOptions, QueryMessage, ResultMessage};

    let mut mapping = serde_json::Map::new();
    for task in tasks {
        let Some(id) = task.get("id").and_then(Value::as_str) else {
            continue;
        };
        let title = task.get("title").and_then(Value::as_str).unwrap_or(id);
        let options = AgentQueryOptions {
            prompt: format!("create-issue: {title}"),
            system_prompt: String::new(),
            allowed_tools: Vec::new(),
            model: String::new(),
            cwd: String::new(),
            permission_mode: None,
            setting_sources: Vec::new(),
            allow_dangerously_skip_permissions: false,
            mcp_servers: None,
            output_format: None,
        };
        let mut stream = query_fn.query(options, None).await?;
        let mut last_output: Option<Value> = None;
        while let Some(msg) = stream.next().await {
            if let QueryMessage::Result(ResultMessage::Success { structured_output, .. }) = msg? {
                if structured_output.is_some() {
                    last_output = structured_output;
                }
            } else if let QueryMessage::Result(ResultMessage::Error { subtype, errors, .. }) = msg? {
                return Err(wfe_core::Error::Internal(format!(
                    "create-issue for {id} failed: {subtype} - {}",
                    errors.join(", ")
                )));
            }
        }
        if let Some(out) = last_output {
            let issue_id = out
                .get("issueId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| out.to_string());
            mapping.insert(id.to_string(), Value::String(issue_id));
        }
    }
    Ok(Value::Object(mapping))
}

pub struct SaveCheckpointHandler;

#[async_trait]
impl Handler for SaveCheckpointHandler {
    async fn call(&self, ctx: &mut Context, _input: Option<Value>, _deps: &Deps) -> Result<()> {
        let Some(task_id) = ctx.current_task_id().map(str::to_string) else {
            return Ok(());
        };

        let mut pending = string_vec(ctx.resolve("tasksPending").as_ref());
        pending.retain(|t| t != &task_id);
        ctx.set("tasksPending", Value::Array(pending.into_iter().map(Value::String).collect()));

        let mut completed = string_vec(ctx.resolve("tasksCompleted").as_ref());
        if !completed.contains(&task_id) {
            completed.push(task_id);
        }
        ctx.set(
            "tasksCompleted",
            Value::Array(completed.into_iter().map(Value::String).collect()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_issues_generates_missing_ids_and_seeds_pending() {
        let mut ctx = Context::new();
        ctx.set(
            "analysis",
            json!({"tasks": [{"id": "task-existing"}, {"title": "no id here"}]}),
        );
        let handler = CreateIssuesHandler;
        handler.call(&mut ctx, None, &Deps::default()).await.unwrap();

        let ids = ctx.resolve("taskIds").unwrap();
        let ids: Vec<&str> = ids.as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(ids, vec!["task-existing", "task-001"]);
        assert_eq!(ctx.resolve("tasksCompleted"), Some(json!([])));
        assert_eq!(ctx.resolve("tasksPending"), Some(json!(["task-existing", "task-001"])));
    }

    #[tokio::test]
    async fn save_checkpoint_is_noop_outside_task_context() {
        let mut ctx = Context::new();
        ctx.set("tasksPending", json!(["a", "b"]));
        SaveCheckpointHandler.call(&mut ctx, None, &Deps::default()).await.unwrap();
        assert_eq!(ctx.resolve("tasksPending"), Some(json!(["a", "b"])));
    }

    #[tokio::test]
    async fn save_checkpoint_moves_current_task_to_completed() {
        let mut parent = Context::new();
        parent.set("tasksPending", json!(["a", "b"]));
        parent.set("tasksCompleted", json!([]));
        let task = json!({"id": "a"});
        let mut child = parent.with_task(&task, 0, 2);
        child.set("tasksPending", json!(["a", "b"]));
        child.set("tasksCompleted", json!([]));

        SaveCheckpointHandler.call(&mut child, None, &Deps::default()).await.unwrap();

        assert_eq!(child.resolve("tasksPending"), Some(json!(["b"])));
        assert_eq!(child.resolve("tasksCompleted"), Some(json!(["a"])));
    }
}
