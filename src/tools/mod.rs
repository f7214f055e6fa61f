//! Tools the agent can call.
//!
//! Every tool takes a JSON argument object and returns text that is fed
//! back to the model verbatim.

mod sql;

pub use sql::{InfoSqlDatabase, ListSqlDatabase, QuerySqlChecker, QuerySqlDatabase};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::datasource::SqlBackend;
use crate::llm::{FunctionDefinition, LlmClient, ToolDefinition};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the argument object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> anyhow::Result<String>;
}

/// Name and description of a registered tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Tools in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The SQL toolkit: list tables, describe tables, run a query, and
    /// have the model double check a query before running it.
    pub fn sql_toolkit(backend: Arc<dyn SqlBackend>, llm: Arc<dyn LlmClient>, model: &str) -> Self {
        let mut registry = Self::new();
        registry.register(QuerySqlDatabase::new(Arc::clone(&backend)));
        registry.register(InfoSqlDatabase::new(Arc::clone(&backend)));
        registry.register(ListSqlDatabase::new(Arc::clone(&backend)));
        registry.register(QuerySqlChecker::new(backend, llm, model));
        registry
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        let tool: Arc<dyn Tool> = Arc::new(tool);
        match self.by_name.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    pub fn get_tool_schemas(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                kind: "function",
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, args: Value) -> anyhow::Result<String> {
        let tool = self
            .by_name
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", name))?;
        tool.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, args: Value) -> anyhow::Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    #[tokio::test]
    async fn executes_registered_tools_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        let out = registry
            .execute("echo", json!({"text": "hola"}))
            .await
            .expect("echo");
        assert_eq!(out, "hola");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry.execute("drop_db", json!({})).await.expect_err("unknown");
        assert_eq!(err.to_string(), "Unknown tool: drop_db");
    }

    #[test]
    fn re_registering_replaces_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        registry.register(Echo);
        assert_eq!(registry.list_tools().len(), 1);
        let schemas = registry.get_tool_schemas();
        assert_eq!(schemas[0].kind, "function");
        assert_eq!(schemas[0].function.name, "echo");
    }
}
