//! Configuration management for the procesadores assistant.
//!
//! Configuration is read from environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8501`.
//! - `OLLAMA_MODEL` - Optional. Model name. Defaults to `llama3.2:3b`.
//! - `OLLAMA_BASE_URL` - Optional. Model endpoint. Defaults to `http://localhost:11434`.
//! - `MAX_ITERATIONS` - Optional. Maximum agent loop iterations. Defaults to `25`.
//! - `SESSION_IDLE_MINUTES` - Optional. Idle minutes before a session's history is dropped. Defaults to `60`; `0` keeps sessions forever.
//! - `DATA_BACKEND` - Optional. One of `mysql`, `sqlite`, `bigquery`. Defaults to `mysql`.
//! - `DATABASE_URL` - Connection string (mysql) or file path (sqlite).
//! - `PREVIEW_TABLE` - Optional. Table used for the connectivity preview. Defaults to `procesadores`.
//! - `BIGQUERY_PROJECT` - Optional. Defaults to the credentials' `project_id`.
//! - `BIGQUERY_DATASET` - Required for bigquery.
//! - `GOOGLE_CREDENTIALS_JSON` - Service account key contents (secret store).
//! - `GOOGLE_APPLICATION_CREDENTIALS` - Path to a service account key file.

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::session::DEFAULT_IDLE_MINUTES;

pub const DEFAULT_MODEL: &str = "llama3.2:3b";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MYSQL_URL: &str = "mysql://root@localhost:3306/procesadores";
pub const DEFAULT_PREVIEW_TABLE: &str = "procesadores";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Which relational source answers the agent's SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    MySql,
    Sqlite,
    BigQuery,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::BigQuery => "bigquery",
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            "bigquery" | "bq" => Ok(Self::BigQuery),
            other => Err(format!("expected mysql, sqlite or bigquery, got: {}", other)),
        }
    }
}

/// Where the BigQuery service account key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsSource {
    /// Key JSON injected by a secret store.
    Inline(String),
    /// Local key file (development).
    File(PathBuf),
}

/// BigQuery settings.
#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    /// Project to bill and query; falls back to the key's `project_id`
    pub project: Option<String>,

    /// Dataset holding the procesadores tables
    pub dataset: String,

    /// Service account key location
    pub credentials: CredentialsSource,
}

/// Data source configuration.
#[derive(Debug, Clone)]
pub struct DataSourceConfig {
    pub kind: BackendKind,

    /// MySQL connection string or SQLite file path
    pub database_url: String,

    /// Table read by the five-row connectivity preview
    pub preview_table: String,

    /// Present only when `kind` is `BigQuery`
    pub bigquery: Option<BigQueryConfig>,
}

/// Assistant configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Model name as known by the model endpoint
    pub model: String,

    /// Base URL of the Ollama-compatible endpoint
    pub ollama_base_url: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum iterations for the agent loop
    pub max_iterations: usize,

    /// Idle minutes before a session is dropped (0 = never)
    pub session_idle_minutes: u64,

    pub data_source: DataSourceConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model = lookup("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let ollama_base_url =
            lookup("OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        url::Url::parse(&ollama_base_url).map_err(|e| {
            ConfigError::InvalidValue("OLLAMA_BASE_URL".to_string(), format!("{}", e))
        })?;

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "8501".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let max_iterations: usize = lookup("MAX_ITERATIONS")
            .unwrap_or_else(|| "25".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("MAX_ITERATIONS".to_string(), format!("{}", e))
            })?;
        if max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let session_idle_minutes = lookup("SESSION_IDLE_MINUTES")
            .map(|v| {
                v.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidValue("SESSION_IDLE_MINUTES".to_string(), format!("{}", e))
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_IDLE_MINUTES);

        let kind = lookup("DATA_BACKEND")
            .map(|v| {
                v.parse::<BackendKind>()
                    .map_err(|e| ConfigError::InvalidValue("DATA_BACKEND".to_string(), e))
            })
            .transpose()?
            .unwrap_or(BackendKind::MySql);

        let database_url = match kind {
            BackendKind::MySql => {
                lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_MYSQL_URL.to_string())
            }
            BackendKind::Sqlite => lookup("DATABASE_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?,
            BackendKind::BigQuery => String::new(),
        };

        let preview_table =
            lookup("PREVIEW_TABLE").unwrap_or_else(|| DEFAULT_PREVIEW_TABLE.to_string());
        if !is_plain_identifier(&preview_table) {
            return Err(ConfigError::InvalidValue(
                "PREVIEW_TABLE".to_string(),
                format!("not a plain table name: {}", preview_table),
            ));
        }

        let bigquery = if kind == BackendKind::BigQuery {
            let dataset = lookup("BIGQUERY_DATASET")
                .ok_or_else(|| ConfigError::MissingEnvVar("BIGQUERY_DATASET".to_string()))?;
            // Secret-store injection wins over a key file on disk.
            let credentials = match (
                lookup("GOOGLE_CREDENTIALS_JSON"),
                lookup("GOOGLE_APPLICATION_CREDENTIALS"),
            ) {
                (Some(json), _) => CredentialsSource::Inline(json),
                (None, Some(path)) => CredentialsSource::File(PathBuf::from(path)),
                (None, None) => {
                    return Err(ConfigError::MissingEnvVar(
                        "GOOGLE_CREDENTIALS_JSON or GOOGLE_APPLICATION_CREDENTIALS".to_string(),
                    ))
                }
            };
            Some(BigQueryConfig {
                project: lookup("BIGQUERY_PROJECT"),
                dataset,
                credentials,
            })
        } else {
            None
        };

        Ok(Self {
            model,
            ollama_base_url,
            host,
            port,
            max_iterations,
            session_idle_minutes,
            data_source: DataSourceConfig {
                kind,
                database_url,
                preview_table,
                bigquery,
            },
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(model: String, kind: BackendKind, database_url: String) -> Self {
        Self {
            model,
            ollama_base_url: DEFAULT_OLLAMA_URL.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8501,
            max_iterations: 25,
            session_idle_minutes: DEFAULT_IDLE_MINUTES,
            data_source: DataSourceConfig {
                kind,
                database_url,
                preview_table: DEFAULT_PREVIEW_TABLE.to_string(),
                bigquery: None,
            },
        }
    }
}

/// Letters, digits and underscores only; safe to splice into a query.
pub(crate) fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
