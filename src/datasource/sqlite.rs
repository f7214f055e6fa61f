//! SQLite backend (local development and tests).

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;

use super::{
    push_column, render_table_info, resolve_tables, sample_limit, DataSourceError, Row,
    SqlBackend,
};

#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    preview_table: String,
}

impl SqliteBackend {
    pub async fn open(path: impl AsRef<Path>, preview_table: &str) -> Result<Self, DataSourceError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || Connection::open(path)).await??;
        Ok(Self::from_connection(conn, preview_table))
    }

    pub fn in_memory(preview_table: &str) -> Result<Self, DataSourceError> {
        Ok(Self::from_connection(Connection::open_in_memory()?, preview_table))
    }

    fn from_connection(conn: Connection, preview_table: &str) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            preview_table: preview_table.to_string(),
        }
    }

    /// Run several `;`-separated statements (schema setup, seeding).
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DataSourceError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| Ok(conn.execute_batch(&sql)?)).await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, DataSourceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DataSourceError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| DataSourceError::Poisoned)?;
            f(&guard)
        })
        .await?
    }
}

fn query_rows(conn: &Connection, sql: &str) -> Result<Vec<Row>, DataSourceError> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        stmt.execute([])?;
        return Ok(Vec::new());
    }
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        let mut row = Row::new();
        for (i, name) in names.iter().enumerate() {
            push_column(&mut row, name, cell_to_json(r.get_ref(i)?));
        }
        out.push(row);
    }
    Ok(out)
}

fn cell_to_json(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

fn table_names(conn: &Connection) -> Result<Vec<String>, DataSourceError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl SqlBackend for SqliteBackend {
    fn dialect(&self) -> &str {
        "sqlite"
    }

    async fn list_tables(&self) -> Result<Vec<String>, DataSourceError> {
        self.with_conn(table_names).await
    }

    async fn table_info(&self, tables: &[String]) -> Result<String, DataSourceError> {
        let requested = tables.to_vec();
        self.with_conn(move |conn| {
            let tables = resolve_tables(&table_names(conn)?, &requested)?;
            let mut blocks = Vec::with_capacity(tables.len());
            for table in tables {
                let mut stmt =
                    conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&table)))?;
                let columns = stmt
                    .query_map([], |r| Ok((r.get::<_, String>(1)?, r.get::<_, String>(2)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                let sample = query_rows(
                    conn,
                    &format!("SELECT * FROM {} LIMIT {}", quote_ident(&table), sample_limit()),
                )?;
                blocks.push(render_table_info(&table, &columns, &sample));
            }
            Ok(blocks.join("\n\n"))
        })
        .await
    }

    async fn run(&self, sql: &str) -> Result<Vec<Row>, DataSourceError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| query_rows(conn, &sql)).await
    }

    async fn preview(&self) -> Result<Vec<Row>, DataSourceError> {
        let sql = format!("SELECT * FROM {} LIMIT 5", quote_ident(&self.preview_table));
        self.run(&sql).await
    }
}
