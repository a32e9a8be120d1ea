//! The code-step handler registry (spec §4.4).
//!
//! Grounded directly on `agenticlaw-tools::registry::ToolRegistry`: a
//! name-keyed map of trait objects, `register` is last-write-wins,
//! `get` fails with a message naming the missing handler.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use wfe_context::Context;
use wfe_core::query::QueryFunction;
use wfe_core::{Error, Result};

/// Capabilities available to a handler beyond the Context it mutates.
#[derive(Clone)]
pub struct Deps {
    pub query_fn: Option<Arc<dyn QueryFunction>>,
    pub mcp_servers: Option<Value>,
    pub dry_run: bool,
}

impl Default for Deps {
    fn default() -> Self {
        Self {
            query_fn: None,
            mcp_servers: None,
            dry_run: false,
        }
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut Context, input: Option<Value>, deps: &Deps) -> Result<()>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Handler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::HandlerNotFound(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        async fn call(&self, _ctx: &mut Context, _input: Option<Value>, _deps: &Deps) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn register_is_last_write_wins() {
        let mut reg = HandlerRegistry::new();
        reg.register("h", Arc::new(NoopHandler));
        reg.register("h", Arc::new(NoopHandler));
        assert_eq!(reg.list().iter().filter(|n| *n == "h").count(), 1);
    }

    #[test]
    fn get_missing_handler_names_it_in_the_error() {
        let reg = HandlerRegistry::new();
        let err = reg.get("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
