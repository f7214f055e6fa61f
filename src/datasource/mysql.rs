//! MySQL backend over a lazily connecting `sqlx` pool.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, Row as _, TypeInfo, ValueRef};

use super::{
    push_column, render_table_info, resolve_tables, sample_limit, DataSourceError, Row,
    SqlBackend,
};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MySqlBackend {
    pool: MySqlPool,
    preview_table: String,
}

impl MySqlBackend {
    /// Build the pool without touching the server; an unreachable database
    /// shows up on the first query instead of at startup.
    pub fn connect_lazy(database_url: &str, preview_table: &str) -> Result<Self, DataSourceError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(database_url)?;
        Ok(Self {
            pool,
            preview_table: preview_table.to_string(),
        })
    }

    /// Plain-text protocol so any statement the model writes can run,
    /// including ones MySQL refuses to prepare.
    async fn fetch(&self, sql: &str) -> Result<Vec<MySqlRow>, DataSourceError> {
        Ok(self.pool.fetch_all(sql).await?)
    }
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn row_to_json(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for col in row.columns() {
        let i = col.ordinal();
        push_column(&mut out, col.name(), cell_to_json(row, i, col.type_info().name()));
    }
    out
}

fn cell_to_json(row: &MySqlRow, i: usize, type_name: &str) -> Value {
    match row.try_get_raw(i) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Err(_) => return Value::Null,
        Ok(_) => {}
    }

    let decoded = match type_name {
        "BOOLEAN" => row.try_get::<bool, _>(i).ok().map(Value::Bool),
        t if t.contains("INT") && t.ends_with("UNSIGNED") => {
            row.try_get::<u64, _>(i).ok().map(Value::from)
        }
        t if t.contains("INT") => row.try_get::<i64, _>(i).ok().map(Value::from),
        "FLOAT" => row
            .try_get::<f32, _>(i)
            .ok()
            .and_then(|f| serde_json::Number::from_f64(f as f64))
            .map(Value::Number),
        "DOUBLE" => row
            .try_get::<f64, _>(i)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(i)
            .ok()
            .map(|d| Value::String(d.to_string())),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(i)
            .ok()
            .map(|d| Value::String(d.to_string())),
        t if t.contains("BLOB") || t.contains("BINARY") => row
            .try_get::<Vec<u8>, _>(i)
            .ok()
            .map(|b| match String::from_utf8(b) {
                Ok(s) => Value::String(s),
                Err(e) => Value::String(format!("<{} bytes>", e.as_bytes().len())),
            }),
        _ => None,
    };

    // DECIMAL, TIME, JSON and friends arrive as text either way.
    decoded
        .or_else(|| row.try_get_unchecked::<String, _>(i).ok().map(Value::String))
        .unwrap_or(Value::Null)
}

fn first_column_text(row: &MySqlRow) -> Option<String> {
    row.try_get_unchecked::<String, _>(0).ok()
}

#[async_trait]
impl SqlBackend for MySqlBackend {
    fn dialect(&self) -> &str {
        "mysql"
    }

    async fn list_tables(&self) -> Result<Vec<String>, DataSourceError> {
        let rows = self.fetch("SHOW TABLES").await?;
        let mut tables: Vec<String> = rows.iter().filter_map(first_column_text).collect();
        tables.sort();
        Ok(tables)
    }

    async fn table_info(&self, tables: &[String]) -> Result<String, DataSourceError> {
        let tables = resolve_tables(&self.list_tables().await?, tables)?;
        let mut blocks = Vec::with_capacity(tables.len());
        for table in tables {
            let columns = sqlx::query(
                "SELECT COLUMN_NAME, COLUMN_TYPE FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
            )
            .bind(&table)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| {
                (
                    r.try_get_unchecked::<String, _>(0).unwrap_or_default(),
                    r.try_get_unchecked::<String, _>(1).unwrap_or_default().to_uppercase(),
                )
            })
            .collect::<Vec<_>>();
            let sample = self
                .fetch(&format!(
                    "SELECT * FROM {} LIMIT {}",
                    quote_ident(&table),
                    sample_limit()
                ))
                .await?
                .iter()
                .map(row_to_json)
                .collect::<Vec<_>>();
            blocks.push(render_table_info(&table, &columns, &sample));
        }
        Ok(blocks.join("\n\n"))
    }

    async fn run(&self, sql: &str) -> Result<Vec<Row>, DataSourceError> {
        let rows = self.fetch(sql).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn preview(&self) -> Result<Vec<Row>, DataSourceError> {
        self.run(&format!("SELECT * FROM {} LIMIT 5", quote_ident(&self.preview_table)))
            .await
    }
}
