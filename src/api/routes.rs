//! HTTP routes and handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::page::render_page;
use super::types::{AskRequest, HealthResponse, HistoryResponse};
use crate::assistant::Assistant;
use crate::session::{Exchange, SessionStore};

/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "procesadores_session";

/// Shared application state.
pub struct AppState {
    pub assistant: Assistant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index).post(submit))
        .route("/reset", post(reset))
        .route("/api/ask", post(api_ask))
        .route("/api/history", get(api_history))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Session id from the request cookie, if present and well formed.
pub fn session_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

/// The caller's session, plus the cookie to set when a new one was issued.
/// A cookie naming an expired session keeps its id; the history starts over.
async fn resolve_session(
    sessions: &SessionStore,
    headers: &HeaderMap,
) -> (Uuid, Option<HeaderValue>) {
    match session_from_headers(headers) {
        Some(id) => {
            sessions.touch(id).await;
            (id, None)
        }
        None => {
            let id = sessions.create().await;
            let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
            // A hyphenated UUID is always a valid header value.
            let value = HeaderValue::from_str(&cookie).ok();
            (id, value)
        }
    }
}

fn with_cookie(mut response: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(cookie) = cookie {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

async fn render(state: &AppState, session: Uuid, latest: Option<&Exchange>) -> Response {
    let history = state.assistant.sessions().recent_first(session).await;
    Html(render_page(latest, &history)).into_response()
}

/// Render the form and the session history.
pub async fn index(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let (session, cookie) = resolve_session(state.assistant.sessions(), &headers).await;
    with_cookie(render(&state, session, None).await, cookie)
}

/// Handle a form submission and render the answer with the history.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(req): Form<AskRequest>,
) -> Response {
    let (session, cookie) = resolve_session(state.assistant.sessions(), &headers).await;
    let question = req.question.trim();
    if question.is_empty() {
        return with_cookie(render(&state, session, None).await, cookie);
    }

    let exchange = state.assistant.ask(session, question).await;
    with_cookie(render(&state, session, Some(&exchange)).await, cookie)
}

/// Clear the session history and go back to the form.
pub async fn reset(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(session) = session_from_headers(&headers) {
        tracing::info!(session = %session, "Resetting history");
        state.assistant.sessions().reset(session).await;
    }
    Redirect::to("/").into_response()
}

/// JSON variant of the form submission.
pub async fn api_ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AskRequest>,
) -> Result<Response, (StatusCode, String)> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "question is required".to_string()));
    }
    let (session, cookie) = resolve_session(state.assistant.sessions(), &headers).await;
    let exchange = state.assistant.ask(session, question).await;
    Ok(with_cookie(Json(exchange).into_response(), cookie))
}

/// The session's history, newest first.
pub async fn api_history(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let (session, cookie) = resolve_session(state.assistant.sessions(), &headers).await;
    let history = state.assistant.sessions().recent_first(session).await;
    with_cookie(Json(HistoryResponse { history }).into_response(), cookie)
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.assistant.dialect().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::datasource::testing::seeded_sqlite;
    use crate::datasource::SqlBackend;
    use crate::llm::testing::{text, ScriptedLlm};

    async fn state(llm: Arc<ScriptedLlm>) -> Arc<AppState> {
        let backend: Arc<dyn SqlBackend> = Arc::new(seeded_sqlite().await);
        let agent = Agent::new(llm, Arc::clone(&backend), "llama3.2:3b", 10);
        Arc::new(AppState {
            assistant: Assistant::new(backend, agent, SessionStore::new()),
        })
    }

    fn cookie_headers(id: Uuid) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {}={}", SESSION_COOKIE, id))
                .expect("cookie header"),
        );
        headers
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let id = Uuid::new_v4();
        assert_eq!(session_from_headers(&cookie_headers(id)), Some(id));

        let mut bad = HeaderMap::new();
        bad.insert(COOKIE, HeaderValue::from_static("procesadores_session=not-a-uuid"));
        assert_eq!(session_from_headers(&bad), None);
        assert_eq!(session_from_headers(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn first_visit_issues_a_session_cookie() {
        let state = state(Arc::new(ScriptedLlm::default())).await;
        let response = index(State(state), HeaderMap::new()).await;
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .expect("set-cookie")
            .to_str()
            .expect("ascii");
        assert!(cookie.starts_with("procesadores_session="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn cookieless_calls_register_sessions_in_the_store() {
        let llm = Arc::new(ScriptedLlm::new(vec![text("uno"), text("dos")]));
        let backend: Arc<dyn SqlBackend> = Arc::new(seeded_sqlite().await);
        let agent = Agent::new(llm, Arc::clone(&backend), "llama3.2:3b", 10);
        let sessions = SessionStore::new().with_idle_minutes(1);
        let state = Arc::new(AppState {
            assistant: Assistant::new(backend, agent, sessions.clone()),
        });

        for q in ["uno", "dos"] {
            let response = api_ask(
                State(Arc::clone(&state)),
                HeaderMap::new(),
                Json(AskRequest {
                    question: q.to_string(),
                }),
            )
            .await
            .expect("answer");
            assert!(response.headers().get(SET_COOKIE).is_some());
        }
        assert_eq!(sessions.session_count().await, 2);
        assert_eq!(sessions.purge_idle().await, 0);
    }

    #[tokio::test]
    async fn form_submission_renders_answer_and_history() {
        let state = state(Arc::new(ScriptedLlm::new(vec![
            text("Primera respuesta"),
            text("Segunda respuesta"),
        ])))
        .await;
        let id = Uuid::new_v4();

        submit(
            State(Arc::clone(&state)),
            cookie_headers(id),
            Form(AskRequest {
                question: "primera".to_string(),
            }),
        )
        .await;
        let response = submit(
            State(Arc::clone(&state)),
            cookie_headers(id),
            Form(AskRequest {
                question: "segunda".to_string(),
            }),
        )
        .await;

        assert!(response.headers().get(SET_COOKIE).is_none());
        let html = body_text(response).await;
        assert!(html.contains("<div class=\"answer\">Segunda respuesta</div>"));
        let newest = html.find("Pregunta: segunda").expect("newest");
        let oldest = html.find("Pregunta: primera").expect("oldest");
        assert!(newest < oldest);
    }

    #[tokio::test]
    async fn blank_submission_does_not_touch_history() {
        let llm = Arc::new(ScriptedLlm::default());
        let state = state(llm.clone()).await;
        let id = Uuid::new_v4();

        let response = submit(
            State(Arc::clone(&state)),
            cookie_headers(id),
            Form(AskRequest {
                question: "   ".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.assistant.sessions().len(id).await, 0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn api_ask_rejects_blank_and_answers_questions() {
        let state = state(Arc::new(ScriptedLlm::new(vec![text("Son 2 chips.")]))).await;
        let id = Uuid::new_v4();

        let blank = api_ask(
            State(Arc::clone(&state)),
            cookie_headers(id),
            Json(AskRequest {
                question: String::new(),
            }),
        )
        .await;
        let Err((status, _)) = blank else {
            panic!("blank question should be rejected");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let response = api_ask(
            State(Arc::clone(&state)),
            cookie_headers(id),
            Json(AskRequest {
                question: "¿Cuántos chips?".to_string(),
            }),
        )
        .await
        .expect("answer");
        let body: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("json");
        assert_eq!(body["question"], "¿Cuántos chips?");
        assert_eq!(body["answer"], "Son 2 chips.");

        let history = body_text(api_history(State(Arc::clone(&state)), cookie_headers(id)).await).await;
        let history: serde_json::Value = serde_json::from_str(&history).expect("json");
        assert_eq!(history["history"].as_array().map(|h| h.len()), Some(1));
    }

    #[tokio::test]
    async fn reset_clears_history_and_redirects() {
        let state = state(Arc::new(ScriptedLlm::new(vec![text("ok")]))).await;
        let id = Uuid::new_v4();
        state.assistant.ask(id, "hola").await;

        let response = reset(State(Arc::clone(&state)), cookie_headers(id)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(state.assistant.sessions().len(id).await, 0);
    }

    #[tokio::test]
    async fn health_reports_backend() {
        let state = state(Arc::new(ScriptedLlm::default())).await;
        let Json(report) = health(State(state)).await;
        assert_eq!(report.status, "ok");
        assert_eq!(report.backend, "sqlite");
    }
}
