//! SQL toolkit: the four tools a SQL agent works with.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::Tool;
use crate::datasource::{format_rows, SqlBackend};
use crate::llm::{ChatMessage, LlmClient};

/// Longest tool output handed back to the model.
const MAX_OUTPUT_CHARS: usize = 10_000;

fn truncate_output(mut s: String) -> String {
    let Some((idx, _)) = s.char_indices().nth(MAX_OUTPUT_CHARS) else {
        return s;
    };
    s.truncate(idx);
    s.push_str("\n... [output truncated]");
    s
}

fn required_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", key))
}

/// Run a query against the database.
pub struct QuerySqlDatabase {
    backend: Arc<dyn SqlBackend>,
}

impl QuerySqlDatabase {
    pub fn new(backend: Arc<dyn SqlBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for QuerySqlDatabase {
    fn name(&self) -> &str {
        "sql_db_query"
    }

    fn description(&self) -> &str {
        "Execute a SQL query against the database and get back the result. If the query is \
         not correct, an error message will be returned; rewrite the query, check it, and try \
         again. If you get an error about an unknown column, use sql_db_schema to look up the \
         correct table fields."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A detailed and correct SQL query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let query = required_str(&args, "query")?;
        tracing::info!(dialect = self.backend.dialect(), "Running agent query: {}", query);
        let rows = self.backend.run(query).await?;
        Ok(truncate_output(format_rows(&rows)))
    }
}

/// Describe tables: columns plus a few sample rows.
pub struct InfoSqlDatabase {
    backend: Arc<dyn SqlBackend>,
}

impl InfoSqlDatabase {
    pub fn new(backend: Arc<dyn SqlBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for InfoSqlDatabase {
    fn name(&self) -> &str {
        "sql_db_schema"
    }

    fn description(&self) -> &str {
        "Get the schema and sample rows for the specified SQL tables. Be sure the tables \
         actually exist by calling sql_db_list_tables first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_names": {
                    "type": "string",
                    "description": "Comma-separated list of tables, e.g. 'procesadores, chips'"
                }
            },
            "required": ["table_names"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let tables: Vec<String> = required_str(&args, "table_names")?
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let info = self.backend.table_info(&tables).await?;
        Ok(truncate_output(info))
    }
}

/// List the tables in the database.
pub struct ListSqlDatabase {
    backend: Arc<dyn SqlBackend>,
}

impl ListSqlDatabase {
    pub fn new(backend: Arc<dyn SqlBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ListSqlDatabase {
    fn name(&self) -> &str {
        "sql_db_list_tables"
    }

    fn description(&self) -> &str {
        "List the tables in the database as a comma-separated string."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<String> {
        Ok(self.backend.list_tables().await?.join(", "))
    }
}

/// Ask the model to proofread a query before it runs.
pub struct QuerySqlChecker {
    backend: Arc<dyn SqlBackend>,
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl QuerySqlChecker {
    pub fn new(backend: Arc<dyn SqlBackend>, llm: Arc<dyn LlmClient>, model: &str) -> Self {
        Self {
            backend,
            llm,
            model: model.to_string(),
        }
    }
}

fn checker_prompt(query: &str, dialect: &str) -> String {
    format!(
        r#"{query}
Double check the {dialect} query above for common mistakes, including:
- Using NOT IN with NULL values
- Using UNION when UNION ALL should have been used
- Using BETWEEN for exclusive ranges
- Data type mismatch in predicates
- Properly quoting identifiers
- Using the correct number of arguments for functions
- Casting to the correct data type
- Using the proper columns for joins

If there are any of the above mistakes, rewrite the query. If there are no mistakes, just reproduce the original query.

Output the final SQL query only."#
    )
}

#[async_trait]
impl Tool for QuerySqlChecker {
    fn name(&self) -> &str {
        "sql_db_query_checker"
    }

    fn description(&self) -> &str {
        "Double check if your query is correct before executing it. Always use this tool \
         before executing a query with sql_db_query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A detailed and SQL query to be checked"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let query = required_str(&args, "query")?;
        let messages = [ChatMessage::user(checker_prompt(query, self.backend.dialect()))];
        let response = self.llm.chat_completion(&self.model, &messages, None).await?;
        let checked = response.content.unwrap_or_default().trim().to_string();
        if checked.is_empty() {
            return Ok(query.to_string());
        }
        Ok(checked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::testing::{seeded_sqlite, UnreachableBackend};
    use crate::llm::testing::{text, ScriptedLlm};

    async fn backend() -> Arc<dyn SqlBackend> {
        Arc::new(seeded_sqlite().await)
    }

    #[tokio::test]
    async fn list_tables_is_comma_separated() {
        let tool = ListSqlDatabase::new(backend().await);
        assert_eq!(tool.execute(json!({})).await.expect("list"), "chips, procesadores");
    }

    #[tokio::test]
    async fn schema_accepts_comma_separated_names() {
        let tool = InfoSqlDatabase::new(backend().await);
        let out = tool
            .execute(json!({"table_names": " chips , procesadores "}))
            .await
            .expect("schema");
        assert!(out.contains("CREATE TABLE chips ("));
        assert!(out.contains("CREATE TABLE procesadores ("));
    }

    #[tokio::test]
    async fn schema_of_unknown_table_is_an_error() {
        let tool = InfoSqlDatabase::new(backend().await);
        let err = tool
            .execute(json!({"table_names": "gpus"}))
            .await
            .expect_err("unknown");
        assert!(err.to_string().contains("gpus"));
    }

    #[tokio::test]
    async fn query_returns_formatted_rows() {
        let tool = QuerySqlDatabase::new(backend().await);
        let out = tool
            .execute(json!({"query": "SELECT Concepto FROM procesadores WHERE Campo = 'Litografia'"}))
            .await
            .expect("query");
        assert_eq!(out, "Concepto\nProceso de fabricacion en nm");
    }

    #[tokio::test]
    async fn query_requires_argument() {
        let tool = QuerySqlDatabase::new(backend().await);
        let err = tool.execute(json!({"query": "  "})).await.expect_err("empty");
        assert_eq!(err.to_string(), "Missing 'query' argument");
    }

    #[tokio::test]
    async fn query_errors_propagate() {
        let tool = QuerySqlDatabase::new(Arc::new(UnreachableBackend::default()));
        assert!(tool.execute(json!({"query": "SELECT 1"})).await.is_err());
    }

    #[tokio::test]
    async fn checker_returns_model_rewrite_with_dialect_in_prompt() {
        let llm = Arc::new(ScriptedLlm::new(vec![text(
            "  SELECT Modelo FROM chips WHERE ghz > 3.0  ",
        )]));
        let tool = QuerySqlChecker::new(backend().await, llm.clone(), "llama3.2:3b");
        let out = tool
            .execute(json!({"query": "SELECT Modelo FROM chips WHERE ghz > '3.0'"}))
            .await
            .expect("check");
        assert_eq!(out, "SELECT Modelo FROM chips WHERE ghz > 3.0");

        let seen = llm.seen.lock().expect("seen");
        let prompt = seen[0][0].content.as_deref().expect("prompt");
        assert!(prompt.contains("Double check the sqlite query above"));
    }

    #[tokio::test]
    async fn checker_falls_back_to_original_on_empty_reply() {
        let llm = Arc::new(ScriptedLlm::new(vec![text("   ")]));
        let tool = QuerySqlChecker::new(backend().await, llm, "llama3.2:3b");
        let out = tool.execute(json!({"query": "SELECT 1"})).await.expect("check");
        assert_eq!(out, "SELECT 1");
    }

    #[test]
    fn output_limit_counts_characters_not_bytes() {
        let exact = "ñ".repeat(MAX_OUTPUT_CHARS);
        assert_eq!(truncate_output(exact.clone()), exact);

        let out = truncate_output("ñ".repeat(MAX_OUTPUT_CHARS + 1));
        let (kept, marker) = out.split_once('\n').expect("marker line");
        assert_eq!(kept.chars().count(), MAX_OUTPUT_CHARS);
        assert_eq!(marker, "... [output truncated]");
    }
}
