//! Data access: one capability interface over MySQL, SQLite and BigQuery.
//!
//! The agent's SQL tools and the connectivity preview both go through
//! [`SqlBackend`], so the rest of the crate never knows which engine is
//! behind it.

mod bigquery;
mod credentials;
mod mysql;
mod sqlite;

pub use bigquery::BigQueryBackend;
pub use credentials::ServiceAccountKey;
pub use mysql::MySqlBackend;
pub use sqlite::SqliteBackend;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::{BackendKind, DataSourceConfig};

/// One result row: column name to scalar, in select order. Repeated
/// column names are kept apart with a numeric suffix.
pub type Row = serde_json::Map<String, Value>;

/// Prefix of the message shown when the preview query fails.
pub const CONNECTIVITY_ERROR_PREFIX: &str = "Error al conectar con la base de datos: ";

/// Rows shown under each table in `table_info`.
const SAMPLE_ROWS: usize = 3;

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("BigQuery request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("BigQuery returned {status}: {message}")]
    BigQuery { status: u16, message: String },

    #[error("invalid service account credentials: {0}")]
    Credentials(String),

    #[error("table_names {{{0}}} not found in database")]
    UnknownTable(String),

    #[error("database worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("database connection lock poisoned")]
    Poisoned,
}

#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// SQL dialect name handed to the model.
    fn dialect(&self) -> &str;

    async fn list_tables(&self) -> Result<Vec<String>, DataSourceError>;

    /// Column listing plus a few sample rows for each named table.
    async fn table_info(&self, tables: &[String]) -> Result<String, DataSourceError>;

    /// Execute arbitrary SQL. Statements without a result set yield no rows.
    async fn run(&self, sql: &str) -> Result<Vec<Row>, DataSourceError>;

    /// Fixed five-row preview of the reference table.
    async fn preview(&self) -> Result<Vec<Row>, DataSourceError>;
}

/// Run the preview query, turning any failure into display text.
pub async fn check_connectivity(backend: &dyn SqlBackend) -> Result<Vec<Row>, String> {
    match backend.preview().await {
        Ok(rows) => {
            tracing::debug!(rows = rows.len(), "Data source reachable");
            Ok(rows)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Data source unreachable");
            Err(format!("{}{}", CONNECTIVITY_ERROR_PREFIX, e))
        }
    }
}

/// Build the backend named by the configuration.
pub async fn connect(config: &DataSourceConfig) -> anyhow::Result<Arc<dyn SqlBackend>> {
    let backend: Arc<dyn SqlBackend> = match config.kind {
        BackendKind::MySql => Arc::new(MySqlBackend::connect_lazy(
            &config.database_url,
            &config.preview_table,
        )?),
        BackendKind::Sqlite => Arc::new(
            SqliteBackend::open(&config.database_url, &config.preview_table).await?,
        ),
        BackendKind::BigQuery => {
            let bq = config
                .bigquery
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("bigquery backend selected without settings"))?;
            let key = ServiceAccountKey::load(&bq.credentials)?;
            Arc::new(BigQueryBackend::new(
                key,
                bq.project.clone(),
                bq.dataset.clone(),
                config.preview_table.clone(),
            )?)
        }
    };
    tracing::info!(backend = backend.dialect(), "Data source configured");
    Ok(backend)
}

/// Pick the requested tables out of the known ones, failing on the first
/// name the database does not have.
pub(crate) fn resolve_tables(
    known: &[String],
    requested: &[String],
) -> Result<Vec<String>, DataSourceError> {
    let missing: Vec<&str> = requested
        .iter()
        .filter(|name| !known.iter().any(|k| k == *name))
        .map(|s| s.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(DataSourceError::UnknownTable(missing.join(", ")));
    }
    Ok(requested.to_vec())
}

/// Render one table's description in the `CREATE TABLE` + sample rows shape
/// SQL agents are used to.
pub(crate) fn render_table_info(
    table: &str,
    columns: &[(String, String)],
    sample: &[Row],
) -> String {
    let mut out = format!("CREATE TABLE {} (\n", table);
    let cols = columns
        .iter()
        .map(|(name, ty)| format!("\t{} {}", name, ty))
        .collect::<Vec<_>>()
        .join(",\n");
    out.push_str(&cols);
    out.push_str("\n)\n\n/*\n");
    out.push_str(&format!(
        "{} rows from {} table:\n",
        sample.len().min(SAMPLE_ROWS),
        table
    ));
    out.push_str(
        &columns
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join("\t"),
    );
    out.push('\n');
    for row in sample.iter().take(SAMPLE_ROWS) {
        let line = row
            .values()
            .map(render_cell)
            .collect::<Vec<_>>()
            .join("\t");
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str("*/");
    out
}

/// Append a column to a row. A name already present gets the first free
/// `_1`, `_2`... suffix so `SELECT a.nombre, b.nombre` keeps both values.
pub(crate) fn push_column(row: &mut Row, name: &str, value: Value) {
    let mut key = name.to_string();
    let mut n = 0;
    while row.contains_key(&key) {
        n += 1;
        key = format!("{}_{}", name, n);
    }
    row.insert(key, value);
}

pub(crate) fn sample_limit() -> usize {
    SAMPLE_ROWS
}

/// Render rows as a header line plus one tab-separated line per row.
pub fn format_rows(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return "(no rows)".to_string();
    };
    let mut out = first.keys().cloned().collect::<Vec<_>>().join("\t");
    for row in rows {
        out.push('\n');
        out.push_str(
            &row.values()
                .map(render_cell)
                .collect::<Vec<_>>()
                .join("\t"),
        );
    }
    out
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Backends for exercising callers without a database server.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Backend whose every call fails as if the server were down.
    #[derive(Default)]
    pub struct UnreachableBackend {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl SqlBackend for UnreachableBackend {
        fn dialect(&self) -> &str {
            "mysql"
        }

        async fn list_tables(&self) -> Result<Vec<String>, DataSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DataSourceError::Sqlx(sqlx::Error::PoolTimedOut))
        }

        async fn table_info(&self, _tables: &[String]) -> Result<String, DataSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DataSourceError::Sqlx(sqlx::Error::PoolTimedOut))
        }

        async fn run(&self, _sql: &str) -> Result<Vec<Row>, DataSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DataSourceError::Sqlx(sqlx::Error::PoolTimedOut))
        }

        async fn preview(&self) -> Result<Vec<Row>, DataSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DataSourceError::Sqlx(sqlx::Error::PoolTimedOut))
        }
    }

    /// In-memory SQLite seeded with a small procesadores semantic layer.
    pub async fn seeded_sqlite() -> SqliteBackend {
        let backend = SqliteBackend::in_memory("procesadores").expect("in-memory sqlite");
        backend
            .execute_batch(
                "CREATE TABLE procesadores (
                    Proyecto TEXT, Esquema TEXT, Tabla TEXT,
                    Campo TEXT, TipoDato TEXT, Concepto TEXT
                );
                INSERT INTO procesadores VALUES
                    ('CELULARES', 'GAMA-ALTA', 'PROCESADOR_2022_Qualcomm', 'Modelo', 'STRING', 'Nombre comercial del procesador'),
                    ('CELULARES', 'GAMA-ALTA', 'PROCESADOR_2022_Qualcomm', 'Nucleos', 'INTEGER', 'Cantidad de nucleos de CPU'),
                    ('CELULARES', 'GAMA-ALTA', 'PROCESADOR_2022_Qualcomm', 'Frecuencia', 'FLOAT', 'Frecuencia maxima en GHz'),
                    ('CELULARES', 'GAMA-MEDIA', 'PROCESADOR_2022_MediaTek', 'Modelo', 'STRING', 'Nombre comercial del procesador'),
                    ('CELULARES', 'GAMA-MEDIA', 'PROCESADOR_2022_MediaTek', 'Litografia', 'INTEGER', 'Proceso de fabricacion en nm'),
                    ('CELULARES', 'GAMA-MEDIA', 'PROCESADOR_2022_MediaTek', 'GPU', 'STRING', 'Unidad grafica integrada');
                CREATE TABLE chips (id INTEGER PRIMARY KEY, nombre TEXT, nucleos INTEGER, ghz REAL);
                INSERT INTO chips (nombre, nucleos, ghz) VALUES
                    ('Snapdragon 8 Gen 1', 8, 3.0),
                    ('Dimensity 9000', 8, 3.05);",
            )
            .await
            .expect("seed sqlite");
        backend
    }
}
