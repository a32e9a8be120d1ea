//! Built-in structured-output schema registry (spec §4.6.2).
//!
//! A step's `schemas/<file>#<name>` reference is resolved against this
//! fixed set. An unknown name, a missing `#` segment, or an empty string
//! all resolve to `None` (no schema constraint applied) rather than an
//! error — schema resolution is advisory, never load-bearing.

use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct SchemaRegistry {
    schemas: HashMap<(String, String), Value>,
}

impl SchemaRegistry {
    pub fn builtin() -> Self {
        let mut schemas = HashMap::new();
        schemas.insert(
            ("analysis.json".to_string(), "AnalysisResult".to_string()),
            json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": {"type": "string"},
                                "title": {"type": "string"},
                                "description": {"type": "string"},
                                "requirements": {"type": "array", "items": {"type": "string"}},
                                "dependencies": {"type": "array", "items": {"type": "string"}},
                                "estimatedComplexity": {"type": "string"},
                                "filePaths": {"type": "array", "items": {"type": "string"}}
                            },
                            "required": ["id", "title"]
                        }
                    }
                },
                "required": ["tasks"]
            }),
        );
        schemas.insert(
            ("review.json".to_string(), "ReviewResult".to_string()),
            json!({
                "type": "object",
                "properties": {
                    "hasActionableIssues": {"type": "boolean"},
                    "issues": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["hasActionableIssues"]
            }),
        );
        Self { schemas }
    }

    pub fn resolve(&self, reference: &str) -> Option<Value> {
        if reference.is_empty() {
            return None;
        }
        let mut parts = reference.splitn(2, '#');
        let file = parts.next()?;
        let name = parts.next()?;
        if file.is_empty() || name.is_empty() {
            return None;
        }
        // The canonical form (spec §4.6.2) is `schemas/<file>#<name>`, but
        // the registry is keyed on the bare filename — strip the directory
        // component so both the prefixed and bare forms resolve.
        let file = file.strip_prefix("schemas/").unwrap_or(file);
        self.schemas.get(&(file.to_string(), name.to_string())).cloned()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_schema() {
        let reg = SchemaRegistry::builtin();
        assert!(reg.resolve("analysis.json#AnalysisResult").is_some());
    }

    #[test]
    fn resolves_canonical_schemas_prefixed_reference() {
        let reg = SchemaRegistry::builtin();
        assert!(reg.resolve("schemas/analysis.json#AnalysisResult").is_some());
        assert!(reg.resolve("schemas/review.json#ReviewResult").is_some());
    }

    #[test]
    fn unknown_or_malformed_reference_yields_none() {
        let reg = SchemaRegistry::builtin();
        assert!(reg.resolve("analysis.json#Nope").is_none());
        assert!(reg.resolve("analysis.json").is_none());
        assert!(reg.resolve("").is_none());
        assert!(reg.resolve("#Name").is_none());
    }
}
