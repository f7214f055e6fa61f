//! # procesadores-bot
//!
//! A web assistant that answers natural-language questions about the
//! "procesadores" database.
//!
//! This library provides:
//! - A data access layer over MySQL, SQLite or BigQuery
//! - A SQL agent driven by a locally hosted model (Ollama)
//! - An HTTP server with a chat page and per-session history
//!
//! ## Architecture
//!
//! Each question goes through three stages:
//! 1. Run a five-row preview query to confirm the database is reachable
//! 2. Hand the question to the agent, which calls SQL tools in a loop
//! 3. Record the exchange in the session history and render it newest first
//!
//! ## Example
//!
//! ```rust,ignore
//! use procesadores_bot::{api, config::Config};
//!
//! let config = Config::from_env()?;
//! api::serve(config).await?;
//! ```

pub mod agent;
pub mod api;
pub mod assistant;
pub mod config;
pub mod datasource;
pub mod llm;
pub mod session;
pub mod tools;

pub use config::Config;
