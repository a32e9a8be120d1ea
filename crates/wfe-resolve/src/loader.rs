//! Workflow/agent/prompt deserialization and validation (spec §3, §4.2,
//! §6). Workflow definitions are YAML (`serde_yaml`, already an
//! `agenticlaw-kg` dependency); agent/prompt files are a hand-parsed
//! header-block-then-body format, in the same header-probing style as
//! `agenticlaw-core::openclaw_config`.

use serde::Deserialize;
use std::collections::BTreeMap;
use wfe_core::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnExhausted {
    Escalate,
    Warn,
    Fail,
}

impl OnExhausted {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "escalate" => Ok(OnExhausted::Escalate),
            "warn" => Ok(OnExhausted::Warn),
            "fail" => Ok(OnExhausted::Fail),
            other => Err(Error::SchemaError(format!(
                "unknown onExhausted value \"{other}\" (expected escalate|warn|fail)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AgentStep {
    pub name: String,
    pub enabled: bool,
    pub agent: Option<String>,
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CodeStep {
    pub name: String,
    pub enabled: bool,
    pub handler: String,
    pub input: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PerTaskStep {
    pub name: String,
    pub enabled: bool,
    pub source: String,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug)]
pub struct ParallelStep {
    pub name: String,
    pub enabled: bool,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug)]
pub struct LoopStep {
    pub name: String,
    pub enabled: bool,
    pub condition: String,
    pub max_retries: u32,
    pub on_exhausted: OnExhausted,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug)]
pub enum Step {
    Agent(AgentStep),
    Code(CodeStep),
    PerTask(PerTaskStep),
    Parallel(ParallelStep),
    Loop(LoopStep),
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Step::Agent(s) => &s.name,
            Step::Code(s) => &s.name,
            Step::PerTask(s) => &s.name,
            Step::Parallel(s) => &s.name,
            Step::Loop(s) => &s.name,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Step::Agent(s) => s.enabled,
            Step::Code(s) => s.enabled,
            Step::PerTask(s) => s.enabled,
            Step::Parallel(s) => s.enabled,
            Step::Loop(s) => s.enabled,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Step::Agent(_) => "agent",
            Step::Code(_) => "code",
            Step::PerTask(_) => "per-task",
            Step::Parallel(_) => "parallel",
            Step::Loop(_) => "loop",
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    name: String,
    #[serde(rename = "type")]
    type_: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    agent: Option<String>,
    prompt: Option<String>,
    model: Option<String>,
    input: Option<String>,
    output: Option<String>,
    handler: Option<String>,
    source: Option<String>,
    condition: Option<String>,
    #[serde(rename = "maxRetries")]
    max_retries: Option<u32>,
    #[serde(rename = "onExhausted")]
    on_exhausted: Option<String>,
    steps: Option<Vec<RawStep>>,
}

fn default_enabled() -> bool {
    true
}

fn convert_step(raw: RawStep) -> Result<Step> {
    if raw.name.trim().is_empty() {
        return Err(Error::SchemaError("step has an empty name".to_string()));
    }
    let name = raw.name.clone();
    let enabled = raw.enabled;

    // A step with no explicit `type` but with `agent`/`prompt` defaults to
    // the `agent` variant (spec §3); in practice any untyped step defaults
    // to `agent` regardless, since that's the only variant inferable from
    // a bare `name`.
    let kind = raw.type_.clone().unwrap_or_else(|| "agent".to_string());

    match kind.as_str() {
        "agent" => Ok(Step::Agent(AgentStep {
            name,
            enabled,
            agent: raw.agent,
            prompt: raw.prompt,
            model: raw.model,
            input: raw.input,
            output: raw.output,
        })),
        "code" => {
            let handler = raw
                .handler
                .ok_or_else(|| Error::SchemaError(format!("step \"{name}\": code step requires handler")))?;
            Ok(Step::Code(CodeStep {
                name,
                enabled,
                handler,
                input: raw.input,
            }))
        }
        "per-task" => {
            let source = raw
                .source
                .ok_or_else(|| Error::SchemaError(format!("step \"{name}\": per-task step requires source")))?;
            let steps = convert_steps(raw.steps.unwrap_or_default())?;
            Ok(Step::PerTask(PerTaskStep {
                name,
                enabled,
                source,
                steps,
            }))
        }
        "parallel" => {
            let steps = convert_steps(raw.steps.unwrap_or_default())?;
            Ok(Step::Parallel(ParallelStep { name, enabled, steps }))
        }
        "loop" => {
            let condition = raw
                .condition
                .ok_or_else(|| Error::SchemaError(format!("step \"{name}\": loop step requires condition")))?;
            let max_retries = raw
                .max_retries
                .ok_or_else(|| Error::SchemaError(format!("step \"{name}\": loop step requires maxRetries")))?;
            if max_retries < 1 {
                return Err(Error::SchemaError(format!(
                    "step \"{name}\": maxRetries must be >= 1"
                )));
            }
            let on_exhausted = OnExhausted::parse(
                raw.on_exhausted
                    .as_deref()
                    .ok_or_else(|| Error::SchemaError(format!("step \"{name}\": loop step requires onExhausted")))?,
            )?;
            let steps = convert_steps(raw.steps.unwrap_or_default())?;
            Ok(Step::Loop(LoopStep {
                name,
                enabled,
                condition,
                max_retries,
                on_exhausted,
                steps,
            }))
        }
        other => Err(Error::SchemaError(format!(
            "step \"{name}\": unknown step type \"{other}\""
        ))),
    }
}

fn convert_steps(raw: Vec<RawStep>) -> Result<Vec<Step>> {
    raw.into_iter().map(convert_step).collect()
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    pub model: Option<String>,
    pub agent: Option<String>,
    #[serde(rename = "permissionMode")]
    pub permission_mode: Option<String>,
    #[serde(rename = "settingSources")]
    pub setting_sources: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkflowDefinition {
    name: String,
    version: i64,
    #[serde(default)]
    defaults: Defaults,
    phases: Vec<RawStep>,
}

#[derive(Clone, Debug)]
pub struct WorkflowDefinition {
    pub name: String,
    pub version: i64,
    pub defaults: Defaults,
    pub phases: Vec<Step>,
}

pub fn load_workflow_definition(yaml: &str) -> Result<WorkflowDefinition> {
    let raw: RawWorkflowDefinition = serde_yaml::from_str(yaml).map_err(|e| Error::Yaml(e.to_string()))?;
    if raw.name.trim().is_empty() {
        return Err(Error::SchemaError("workflow name must be non-empty".to_string()));
    }
    if raw.phases.is_empty() {
        return Err(Error::SchemaError("workflow phases must be non-empty".to_string()));
    }
    let phases = convert_steps(raw.phases)?;
    Ok(WorkflowDefinition {
        name: raw.name,
        version: raw.version,
        defaults: raw.defaults,
        phases,
    })
}

// -- agent / prompt header+body format ---------------------------------------------

#[derive(Clone, Debug)]
pub struct AgentDefinition {
    pub name: String,
    pub description: Option<String>,
    pub tools: Vec<String>,
    pub model: Option<String>,
    pub output_schema: Option<String>,
    pub system_prompt: String,
}

#[derive(Clone, Debug)]
pub struct PromptDefinition {
    pub name: String,
    pub description: Option<String>,
    pub body: String,
}

/// Splits a header-block-then-body file on the first line that is
/// exactly `---`. Everything before is `key: value` header lines;
/// everything after is the free-text body.
fn split_header_body(content: &str) -> (BTreeMap<String, String>, String) {
    let mut header = BTreeMap::new();
    let mut lines = content.lines();
    let mut body_lines: Vec<&str> = Vec::new();
    let mut in_body = false;

    for line in lines.by_ref() {
        if !in_body && line.trim() == "---" {
            in_body = true;
            continue;
        }
        if in_body {
            body_lines.push(line);
        } else if let Some((k, v)) = line.split_once(':') {
            header.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    (header, body_lines.join("\n"))
}

fn parse_tools(raw: Option<&String>) -> Vec<String> {
    match raw {
        None => Vec::new(),
        Some(s) => {
            let inner = s.trim().trim_start_matches('[').trim_end_matches(']');
            if inner.trim().is_empty() {
                Vec::new()
            } else {
                inner.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect()
            }
        }
    }
}

pub fn load_agent_definition(content: &str) -> Result<AgentDefinition> {
    let (header, body) = split_header_body(content);
    let name = header
        .get("name")
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| Error::SchemaError("agent file missing required header field \"name\"".to_string()))?
        .clone();
    Ok(AgentDefinition {
        name,
        description: header.get("description").cloned(),
        tools: parse_tools(header.get("tools")),
        model: header.get("model").cloned(),
        output_schema: header.get("outputSchema").cloned(),
        system_prompt: body.trim().to_string(),
    })
}

pub fn load_prompt_definition(content: &str) -> Result<PromptDefinition> {
    let (header, body) = split_header_body(content);
    let name = header
        .get("name")
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| Error::SchemaError("prompt file missing required header field \"name\"".to_string()))?
        .clone();
    Ok(PromptDefinition {
        name,
        description: header.get("description").cloned(),
        body: body.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_WORKFLOW: &str = r#"
name: review
version: 1
defaults:
  model: claude-opus
phases:
  - name: analyze
    agent: analyst
    output: analysis
  - name: fix-loop
    type: loop
    condition: "review.hasActionableIssues"
    maxRetries: 3
    onExhausted: escalate
    steps:
      - name: fix
        agent: fixer
"#;

    #[test]
    fn parses_workflow_with_inferred_and_explicit_step_types() {
        let wf = load_workflow_definition(SAMPLE_WORKFLOW).unwrap();
        assert_eq!(wf.name, "review");
        assert_eq!(wf.phases.len(), 2);
        assert!(matches!(wf.phases[0], Step::Agent(_)));
        match &wf.phases[1] {
            Step::Loop(l) => {
                assert_eq!(l.max_retries, 3);
                assert_eq!(l.on_exhausted, OnExhausted::Escalate);
                assert_eq!(l.steps.len(), 1);
            }
            _ => panic!("expected loop step"),
        }
    }

    #[test]
    fn rejects_empty_phases() {
        let err = load_workflow_definition("name: x\nversion: 1\nphases: []").unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn rejects_unknown_step_type() {
        let yaml = "name: x\nversion: 1\nphases:\n  - name: s\n    type: bogus\n";
        let err = load_workflow_definition(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown step type"));
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let yaml = "name: x\nversion: 1\nphases: []\nbogus: true\n";
        assert!(load_workflow_definition(yaml).is_err());
    }

    #[test]
    fn agent_definition_parses_header_and_body() {
        let content = "name: reviewer\ntools: [read, grep]\nmodel: claude-opus\n---\nYou are a reviewer.\n";
        let def = load_agent_definition(content).unwrap();
        assert_eq!(def.name, "reviewer");
        assert_eq!(def.tools, vec!["read", "grep"]);
        assert_eq!(def.system_prompt, "You are a reviewer.");
    }

    #[test]
    fn agent_definition_requires_name() {
        let content = "description: no name here\n---\nbody\n";
        assert!(load_agent_definition(content).is_err());
    }

    #[test]
    fn empty_body_is_legal() {
        let content = "name: x\n---\n";
        let def = load_prompt_definition(content).unwrap();
        assert_eq!(def.body, "");
    }
}
