//! A recorded-response `QueryFunction` for local runs without a live LLM
//! backend (spec §9: "testing replaces it with a recorded-response
//! simulator"). Each non-empty line of the script file is a JSON array
//! of wire-shaped messages (`{"kind":"result", ...}`) answering the next
//! agent-step call, in call order — a VCR-cassette read in sequence
//! rather than keyed by agent name, since `AgentQueryOptions` carries no
//! stable agent identifier of its own.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use wfe_core::query::{AgentQueryOptions, FileChange, QueryFunction, QueryMessage, QueryStream, ResultMessage};
use wfe_core::Result;

pub struct ScriptedQuery {
    responses: Mutex<VecDeque<Vec<QueryMessage>>>,
}

impl ScriptedQuery {
    /// No canned responses: every call falls through to the default
    /// success stub below.
    pub fn empty() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut responses = VecDeque::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let messages: Vec<QueryMessage> = serde_json::from_str(line)?;
            responses.push_back(messages);
        }
        tracing::debug!(count = responses.len(), "loaded scripted query responses");
        Ok(Self {
            responses: Mutex::new(responses),
        })
    }

    fn default_success() -> Vec<QueryMessage> {
        vec![QueryMessage::Result(ResultMessage::Success {
            success: true,
            structured_output: None,
            session_id: None,
            cost: None,
            files_changed: Vec::<FileChange>::new(),
        })]
    }
}

#[async_trait]
impl QueryFunction for ScriptedQuery {
    async fn query(&self, options: AgentQueryOptions, _cancel: Option<CancellationToken>) -> Result<QueryStream> {
        let messages = {
            let mut guard = self.responses.lock().await;
            guard.pop_front().unwrap_or_else(Self::default_success)
        };
        tracing::debug!(model = %options.model, message_count = messages.len(), "scripted query answered");
        Ok(Box::pin(futures::stream::iter(messages.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_script_falls_back_to_a_default_success() {
        use futures::StreamExt;

        let sq = ScriptedQuery::empty();
        let options = AgentQueryOptions {
            prompt: "hi".to_string(),
            system_prompt: String::new(),
            allowed_tools: vec![],
            model: "m".to_string(),
            cwd: ".".to_string(),
            permission_mode: None,
            setting_sources: vec![],
            allow_dangerously_skip_permissions: false,
            mcp_servers: None,
            output_format: None,
        };
        let mut stream = sq.query(options, None).await.unwrap();
        let msg = stream.next().await.unwrap().unwrap();
        match msg {
            QueryMessage::Result(ResultMessage::Success { success, .. }) => assert!(success),
            _ => panic!("expected a success message"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn scripted_lines_are_consumed_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("script.jsonl");
        tokio::fs::write(
            &path,
            "[{\"kind\":\"result\",\"success\":true,\"structured_output\":{\"a\":1}}]\n\
             [{\"kind\":\"result\",\"success\":true,\"structured_output\":{\"a\":2}}]\n",
        )
        .await
        .unwrap();

        let sq = ScriptedQuery::from_file(&path).await.unwrap();
        let options = AgentQueryOptions {
            prompt: String::new(),
            system_prompt: String::new(),
            allowed_tools: vec![],
            model: "m".to_string(),
            cwd: ".".to_string(),
            permission_mode: None,
            setting_sources: vec![],
            allow_dangerously_skip_permissions: false,
            mcp_servers: None,
            output_format: None,
        };

        use futures::StreamExt;
        let mut first = sq.query(options.clone(), None).await.unwrap();
        let QueryMessage::Result(ResultMessage::Success { structured_output, .. }) = first.next().await.unwrap().unwrap() else {
            panic!("expected success");
        };
        assert_eq!(structured_output.unwrap()["a"], 1);

        let mut second = sq.query(options, None).await.unwrap();
        let QueryMessage::Result(ResultMessage::Success { structured_output, .. }) = second.next().await.unwrap().unwrap() else {
            panic!("expected success");
        };
        assert_eq!(structured_output.unwrap()["a"], 2);
    }
}
