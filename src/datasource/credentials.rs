//! BigQuery service account key loading.

use serde::Deserialize;

use super::DataSourceError;
use crate::config::CredentialsSource;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// The parts of a Google service account key we use. Loaded once at startup
/// and shared read-only afterwards.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn load(source: &CredentialsSource) -> Result<Self, DataSourceError> {
        let raw = match source {
            CredentialsSource::Inline(json) => json.clone(),
            CredentialsSource::File(path) => std::fs::read_to_string(path).map_err(|e| {
                DataSourceError::Credentials(format!("cannot read {}: {}", path.display(), e))
            })?,
        };
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, DataSourceError> {
        let key: Self =
            serde_json::from_str(raw).map_err(|e| DataSourceError::Credentials(e.to_string()))?;
        if !key.private_key.contains("PRIVATE KEY") {
            return Err(DataSourceError::Credentials(
                "private_key is not a PEM block".to_string(),
            ));
        }
        Ok(key)
    }
}
