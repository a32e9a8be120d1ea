//! The injected transport boundary (`QueryFunction`, spec §3/§9).
//!
//! The engine never knows or cares which concrete LLM (or simulator)
//! answers an agent step; it only drives a `QueryFunction` to completion
//! and inspects the `result`-kind messages it yields. Mirrors how
//! `agenticlaw-llm::LlmProvider` is driven by `agenticlaw-agent` without
//! the agent runtime ever naming a concrete provider.

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Options passed to a single agent-step dispatch (§4.6.2).
#[derive(Clone, Debug, Serialize)]
pub struct AgentQueryOptions {
    pub prompt: String,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub model: String,
    pub cwd: String,
    pub permission_mode: Option<String>,
    pub setting_sources: Vec<String>,
    pub allow_dangerously_skip_permissions: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OutputFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub schema: Value,
}

/// One message yielded by a `QueryFunction`. Only `Result` messages are
/// ever inspected by the engine; every other kind is consumed and
/// discarded (spec §3: "the engine only inspects messages of kind
/// `result`; other message kinds are ignored").
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryMessage {
    Result(ResultMessage),
    #[serde(other)]
    Other,
}

/// The payload of a `kind: result` message.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ResultMessage {
    // Tried first: `subtype` is a required field, so only genuinely
    // error-shaped payloads match here; anything else falls through to
    // `Success`, whose fields are all optional.
    Error {
        #[serde(default)]
        error: bool,
        subtype: String,
        #[serde(default)]
        errors: Vec<String>,
    },
    Success {
        #[serde(default)]
        success: bool,
        #[serde(default)]
        structured_output: Option<Value>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        cost: Option<f64>,
        #[serde(default)]
        files_changed: Vec<FileChange>,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct FileChange {
    pub path: String,
}

impl ResultMessage {
    pub fn is_error(&self) -> bool {
        matches!(self, ResultMessage::Error { .. })
    }
}

pub type QueryStream = Pin<Box<dyn Stream<Item = Result<QueryMessage>> + Send>>;

/// The pluggable LLM dispatch capability (spec §1, §9). Implementations
/// produce a lazy, finite, non-restartable sequence of messages.
#[async_trait]
pub trait QueryFunction: Send + Sync {
    async fn query(
        &self,
        options: AgentQueryOptions,
        cancel: Option<CancellationToken>,
    ) -> Result<QueryStream>;
}
