//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::session::Exchange;

/// Body of `POST /` (HTML form) and `POST /api/ask` (JSON).
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    /// The user's question
    #[serde(default)]
    pub question: String,
}

/// Session history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<Exchange>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Data source dialect in use
    pub backend: String,
}
