//! In-memory per-session question/answer history (non-persistent).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One question and the answer shown for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    /// RFC 3339 timestamp
    pub asked_at: String,
}

/// Sessions idle this long are dropped by [`SessionStore::purge_idle`].
pub const DEFAULT_IDLE_MINUTES: u64 = 60;

struct Session {
    history: Vec<Exchange>,
    last_active: DateTime<Utc>,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            history: Vec::new(),
            last_active: now,
        }
    }
}

/// Histories keyed by session id. A session lives until it is reset or
/// has been idle longer than the store's TTL.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    /// `None` keeps sessions forever
    idle_ttl: Option<Duration>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl: Some(Duration::minutes(DEFAULT_IDLE_MINUTES as i64)),
        }
    }

    /// Set the idle TTL; zero disables expiry.
    pub fn with_idle_minutes(mut self, minutes: u64) -> Self {
        self.idle_ttl = (minutes > 0).then(|| Duration::minutes(minutes as i64));
        self
    }

    /// Start an empty session.
    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.write().await.insert(id, Session::new(Utc::now()));
        id
    }

    /// Mark a session as active. Returns false for ids the store does not
    /// know (never issued, reset or expired).
    pub async fn touch(&self, id: Uuid) -> bool {
        match self.sessions.write().await.get_mut(&id) {
            Some(session) => {
                session.last_active = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Record an exchange; unknown ids start a new session.
    pub async fn append(&self, id: Uuid, question: &str, answer: &str) -> Exchange {
        let now = Utc::now();
        let exchange = Exchange {
            question: question.to_string(),
            answer: answer.to_string(),
            asked_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id).or_insert_with(|| Session::new(now));
        session.history.push(exchange.clone());
        session.last_active = now;
        exchange
    }

    /// History in submission order.
    pub async fn history(&self, id: Uuid) -> Vec<Exchange> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// History newest first, the order it is displayed in.
    pub async fn recent_first(&self, id: Uuid) -> Vec<Exchange> {
        let mut history = self.history(id).await;
        history.reverse();
        history
    }

    pub async fn len(&self, id: Uuid) -> usize {
        self.sessions
            .read()
            .await
            .get(&id)
            .map_or(0, |s| s.history.len())
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop a session's history.
    pub async fn reset(&self, id: Uuid) {
        self.sessions.write().await.remove(&id);
    }

    /// Drop every session idle longer than the TTL. Returns how many went.
    pub async fn purge_idle(&self) -> usize {
        self.purge_idle_at(Utc::now()).await
    }

    async fn purge_idle_at(&self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.idle_ttl else {
            return 0;
        };
        let cutoff = now - ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_active >= cutoff);
        before - sessions.len()
    }
}

/// Background task that periodically drops idle sessions.
pub async fn idle_cleanup_loop(store: SessionStore, every: std::time::Duration) {
    tracing::info!(
        "Session cleanup task started: checking every {} s",
        every.as_secs()
    );
    loop {
        tokio::time::sleep(every).await;
        let removed = store.purge_idle().await;
        if removed > 0 {
            tracing::info!(removed, "Dropped idle sessions");
        }
    }
}
