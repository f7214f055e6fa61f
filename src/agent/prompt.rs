//! System prompt for the database assistant.

use crate::tools::ToolRegistry;

/// Where users request dashboard access.
pub const PERMISSIONS_LINK: &str = "https://www.youtube.com/watch?v=6DTWH9kYAiY";

/// AD group to put on the access ticket.
pub const PERMISSIONS_AD_GROUP: &str = "AD_GROUP_PROCESS_BOT";

/// Build the system prompt with tool definitions.
pub fn build_system_prompt(dialect: &str, tools: &ToolRegistry) -> String {
    let tool_descriptions = tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an assistant that helps users understand and query databases.
You can provide explanations about the database structure, help with SQL queries, and explain concepts in natural language.

If the user asks how to structure a query in BigQuery or any other SQL database, provide a clear and concise example and explain each part of the query.

For example, if the user asks "How do I structure a query in BigQuery?", respond with something like:

"In BigQuery, a basic SQL query follows this structure:
sql
SELECT *
FROM `CELULARES.GAMA-ALTA.PROCESADOR_2022_Qualcomm`;
or
sql
SELECT *
FROM CELULARES.GAMA-ALTA.PROCESADOR_2022_Qualcomm;"

The database "procesadores" contains an internal semantic layer stored in a table also called "procesadores".
This table has the following columns: Proyecto, Esquema, Tabla, Campo, TipoDato, and Concepto.
This internal layer is used solely to help you understand the user's question and to generate a natural language explanation.

If a user asks "What does the field 'Modelo' in the table PROCESADOR_2022_Qualcomm mean?",
explain the field "Modelo" using the semantic layer's "Concepto" data, without showing any SQL query.

Your answer must be clear and only in natural language, without revealing any details of the internal semantic layer.
Always rely on the Concepto column first; the other columns may support the explanation.

If they ask where to request permissions to see the team's dashboard, give them this link: {link}
Explain that, connected to the VPN, they have to raise a ticket that includes the AD group {ad_group}.
With that they will get access.

## Database

The database speaks the {dialect} SQL dialect. Never run statements that modify data (INSERT, UPDATE, DELETE, DROP).

## Tools

{tool_descriptions}

Start by listing the tables, then look at the schema of the relevant tables before querying.
When you have the information you need, answer the user directly without calling more tools."#,
        link = PERMISSIONS_LINK,
        ad_group = PERMISSIONS_AD_GROUP,
        dialect = dialect,
        tool_descriptions = tool_descriptions
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::testing::UnreachableBackend;
    use crate::llm::testing::ScriptedLlm;
    use std::sync::Arc;

    #[test]
    fn prompt_names_semantic_layer_tools_and_access_details() {
        let tools = ToolRegistry::sql_toolkit(
            Arc::new(UnreachableBackend::default()),
            Arc::new(ScriptedLlm::default()),
            "llama3.2:3b",
        );
        let prompt = build_system_prompt("mysql", &tools);

        assert!(prompt.contains("Proyecto, Esquema, Tabla, Campo, TipoDato, and Concepto"));
        assert!(prompt.contains("mysql SQL dialect"));
        assert!(prompt.contains(PERMISSIONS_LINK));
        assert!(prompt.contains(PERMISSIONS_AD_GROUP));
        for name in [
            "sql_db_query",
            "sql_db_schema",
            "sql_db_list_tables",
            "sql_db_query_checker",
        ] {
            assert!(prompt.contains(&format!("**{}**", name)), "missing {}", name);
        }
    }
}
