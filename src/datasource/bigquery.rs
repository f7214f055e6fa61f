//! BigQuery backend over the REST `jobs.query` endpoint.
//!
//! Access tokens are minted from the service account key with a signed
//! JWT-bearer assertion and reused until shortly before they expire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{
    push_column, render_table_info, resolve_tables, sample_limit, DataSourceError, Row,
    ServiceAccountKey, SqlBackend,
};
use crate::config::is_plain_identifier;

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires.
const TOKEN_SLACK_SECS: i64 = 60;
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);
/// Server-side wait per `getQueryResults` poll; stays under the client timeout.
const POLL_WAIT_MS: u64 = 10_000;
const MAX_POLLS: usize = 30;
/// Results larger than this are refused so the model adds a LIMIT.
const MAX_RESULT_ROWS: usize = 5_000;

pub struct BigQueryBackend {
    client: reqwest::Client,
    api_base: String,
    key: Arc<ServiceAccountKey>,
    signing_key: EncodingKey,
    project: String,
    dataset: String,
    preview_table: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: i64,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Shared shape of `jobs.query` and `jobs.getQueryResults` responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    /// Decimal string, as BigQuery encodes int64.
    #[serde(default)]
    total_rows: Option<String>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

impl BigQueryBackend {
    pub fn new(
        key: ServiceAccountKey,
        project: Option<String>,
        dataset: String,
        preview_table: String,
    ) -> Result<Self, DataSourceError> {
        let project = project
            .or_else(|| key.project_id.clone())
            .ok_or_else(|| {
                DataSourceError::Credentials(
                    "no BIGQUERY_PROJECT set and key has no project_id".to_string(),
                )
            })?;
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| DataSourceError::Credentials(e.to_string()))?;
        let client = reqwest::Client::builder().timeout(QUERY_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: API_BASE.to_string(),
            key: Arc::new(key),
            signing_key,
            project,
            dataset,
            preview_table,
            token: Mutex::new(None),
        })
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn qualified(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset, table)
    }

    fn information_schema(&self, view: &str) -> String {
        format!("`{}.{}`.INFORMATION_SCHEMA.{}", self.project, self.dataset, view)
    }

    async fn access_token(&self) -> Result<String, DataSourceError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now().timestamp();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - TOKEN_SLACK_SECS > now {
                return Ok(token.access_token.clone());
            }
        }

        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
                .map_err(|e| DataSourceError::Credentials(e.to_string()))?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DataSourceError::BigQuery {
                status: status.as_u16(),
                message: body,
            });
        }
        let token: TokenResponse = response.json().await?;
        tracing::debug!(client_email = %self.key.client_email, "Minted BigQuery access token");

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: now + token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS),
        });
        Ok(access_token)
    }

    /// Authorize and send one API request, decoding the job response.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<QueryResponse, DataSourceError> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(DataSourceError::BigQuery {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }
        serde_json::from_str(&text).map_err(|e| DataSourceError::BigQuery {
            status: status.as_u16(),
            message: format!("unreadable response: {}", e),
        })
    }

    /// `jobs.getQueryResults`: wait for the job, or fetch a later page.
    async fn results_page(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, DataSourceError> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.api_base, self.project, job.job_id
        );
        let mut params = vec![("timeoutMs", POLL_WAIT_MS.to_string())];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.send(self.client.get(url).query(&params)).await
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, DataSourceError> {
        let url = format!("{}/projects/{}/queries", self.api_base, self.project);
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_TIMEOUT.as_millis() as u64,
            "defaultDataset": {"projectId": self.project, "datasetId": self.dataset},
        });

        let mut page = self.send(self.client.post(url).json(&body)).await?;
        let job = page.job_reference.clone();

        let mut polls = 0;
        while page.job_complete == Some(false) {
            polls += 1;
            let job = match job.as_ref() {
                Some(job) if polls <= MAX_POLLS => job,
                _ => return Err(unfinished()),
            };
            tracing::debug!(job_id = %job.job_id, polls, "BigQuery job still running");
            page = self.results_page(job, None).await?;
        }
        check_result_size(page.total_rows.as_deref(), 0)?;

        let fields = page.schema.take().map(|s| s.fields).unwrap_or_default();
        let mut rows = convert_rows(&fields, std::mem::take(&mut page.rows));
        let mut next = page.page_token.take();
        while let Some(token) = next {
            let job = job.as_ref().ok_or_else(|| DataSourceError::BigQuery {
                status: 200,
                message: "paged result without a job reference".to_string(),
            })?;
            let more = self.results_page(job, Some(&token)).await?;
            rows.extend(convert_rows(&fields, more.rows));
            check_result_size(None, rows.len())?;
            next = more.page_token;
        }
        Ok(rows)
    }
}

fn unfinished() -> DataSourceError {
    DataSourceError::BigQuery {
        status: 200,
        message: "query did not finish before the timeout".to_string(),
    }
}

/// Refuse results that would not fit in the agent's context anyway.
fn check_result_size(total_rows: Option<&str>, fetched: usize) -> Result<(), DataSourceError> {
    let total = total_rows
        .and_then(|t| t.parse::<usize>().ok())
        .unwrap_or(fetched)
        .max(fetched);
    if total > MAX_RESULT_ROWS {
        return Err(DataSourceError::BigQuery {
            status: 200,
            message: format!(
                "result has {} rows, more than the {} allowed; add a LIMIT or aggregate",
                total, MAX_RESULT_ROWS
            ),
        });
    }
    Ok(())
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| body.to_string())
}

fn convert_rows(fields: &[FieldSchema], rows: Vec<TableRow>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            let mut out = Row::new();
            for (field, cell) in fields.iter().zip(row.f) {
                push_column(&mut out, &field.name, convert_cell(&field.kind, cell.v));
            }
            out
        })
        .collect()
}

/// BigQuery sends every scalar as a string; restore numbers and booleans.
fn convert_cell(kind: &str, value: Value) -> Value {
    let Value::String(s) = value else {
        return value;
    };
    match kind {
        "INTEGER" | "INT64" => s.parse::<i64>().map(Value::from).unwrap_or(Value::String(s)),
        "FLOAT" | "FLOAT64" => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(s)),
        "BOOLEAN" | "BOOL" => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s),
        },
        _ => Value::String(s),
    }
}

#[async_trait]
impl SqlBackend for BigQueryBackend {
    fn dialect(&self) -> &str {
        "bigquery"
    }

    async fn list_tables(&self) -> Result<Vec<String>, DataSourceError> {
        let rows = self
            .query(&format!(
                "SELECT table_name FROM {} ORDER BY table_name",
                self.information_schema("TABLES")
            ))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("table_name").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .collect())
    }

    async fn table_info(&self, tables: &[String]) -> Result<String, DataSourceError> {
        let tables = resolve_tables(&self.list_tables().await?, tables)?;
        let mut blocks = Vec::with_capacity(tables.len());
        for table in tables {
            let columns = self
                .query(&format!(
                    "SELECT column_name, data_type FROM {} WHERE table_name = '{}' \
                     ORDER BY ordinal_position",
                    self.information_schema("COLUMNS"),
                    table.replace('\'', "\\'")
                ))
                .await?
                .iter()
                .map(|r| {
                    let text = |k: &str| r.get(k).and_then(|v| v.as_str()).unwrap_or("").to_string();
                    (text("column_name"), text("data_type"))
                })
                .collect::<Vec<_>>();
            let sample = self
                .query(&format!(
                    "SELECT * FROM {} LIMIT {}",
                    self.qualified(&table),
                    sample_limit()
                ))
                .await?;
            blocks.push(render_table_info(&table, &columns, &sample));
        }
        Ok(blocks.join("\n\n"))
    }

    async fn run(&self, sql: &str) -> Result<Vec<Row>, DataSourceError> {
        self.query(sql).await
    }

    async fn preview(&self) -> Result<Vec<Row>, DataSourceError> {
        if !is_plain_identifier(&self.preview_table) {
            return Err(DataSourceError::UnknownTable(self.preview_table.clone()));
        }
        self.query(&format!("SELECT * FROM {} LIMIT 5", self.qualified(&self.preview_table)))
            .await
    }
}
