//! Operator HTTP surface.
//!
//! Reads the current dashboard view and forwards operator actions to the
//! event loop. Every response uses the `{code, message, data}` envelope.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use crate::protocol::{ApiEnvelope, ConfigureSequenceRequest, DashboardView};
use crate::runtime::{Command, CommandResult};
use crate::types::WordPair;

/// Handles shared by all operator endpoints
pub struct ApiState {
    pub commands: mpsc::Sender<Command>,
    pub view: watch::Receiver<DashboardView>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/view", get(get_view))
        .route("/api/sequence", post(configure_sequence))
        .route("/api/single", post(start_single))
        .route("/api/round", post(start_round))
        .route("/api/reset", post(reset))
        .route("/api/clear_all", post(clear_all))
        .with_state(state)
}

/// Current dashboard view.
///
/// GET /api/view
pub async fn get_view(State(state): State<Arc<ApiState>>) -> Json<ApiEnvelope<DashboardView>> {
    let view = state.view.borrow().clone();
    Json(ApiEnvelope::ok("ok", Some(view)))
}

/// Configure a multi-round sequence and start its first game.
///
/// POST /api/sequence
pub async fn configure_sequence(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ConfigureSequenceRequest>,
) -> Response {
    let rounds: Vec<WordPair> = request.rounds.into_iter().map(WordPair::trimmed).collect();
    dispatch(&state, |reply| Command::ConfigureSequence { rounds, reply })
    .await
}

/// Start a single game outside any sequence.
///
/// POST /api/single
pub async fn start_single(
    State(state): State<Arc<ApiState>>,
    Json(words): Json<WordPair>,
) -> Response {
    let words = words.trimmed();
    dispatch(&state, |reply| Command::StartSingle { words, reply }).await
}

/// Begin the next round of the current game.
///
/// POST /api/round
pub async fn start_round(State(state): State<Arc<ApiState>>) -> Response {
    dispatch(&state, |reply| Command::StartRound { reply }).await
}

/// Soft reset: game data only.
///
/// POST /api/reset
pub async fn reset(State(state): State<Arc<ApiState>>) -> Response {
    dispatch(&state, |reply| Command::Reset { reply }).await
}

/// Hard clear: everything.
///
/// POST /api/clear_all
pub async fn clear_all(State(state): State<Arc<ApiState>>) -> Response {
    dispatch(&state, |reply| Command::ClearAll { reply }).await
}

async fn dispatch(
    state: &ApiState,
    build: impl FnOnce(oneshot::Sender<CommandResult>) -> Command,
) -> Response {
    let (reply, rx) = oneshot::channel();
    if state.commands.send(build(reply)).await.is_err() {
        tracing::error!("Event loop is gone, cannot forward command");
        return unavailable();
    }

    match rx.await {
        Ok(Ok(message)) => Json(ApiEnvelope::<()>::ok(message, None)).into_response(),
        Ok(Err(message)) => {
            tracing::warn!(%message, "Operator command failed");
            (
                StatusCode::BAD_REQUEST,
                Json(ApiEnvelope::<()>::error(400, message)),
            )
                .into_response()
        }
        Err(_) => unavailable(),
    }
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiEnvelope::<()>::error(503, "Dashboard is shutting down")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, mpsc::Receiver<Command>) {
        let (commands, rx) = mpsc::channel(4);
        let (_view_tx, view) = watch::channel(DashboardView::default());
        let state = Arc::new(ApiState { commands, view });
        (router(state), rx)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_view() {
        let (app, _rx) = app();
        let response = app
            .oneshot(Request::get("/api/view").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["code"], 200);
        assert_eq!(json["data"]["sequence"]["phase"], "idle");
    }

    #[tokio::test]
    async fn test_configure_forwards_command() {
        let (app, mut rx) = app();
        tokio::spawn(async move {
            if let Some(Command::ConfigureSequence { rounds, reply }) = rx.recv().await {
                assert_eq!(rounds.len(), 2);
                let _ = reply.send(Ok("Game 1 started".to_string()));
            }
        });

        let body = r#"{"rounds": [
            {"undercover_word": "cat", "civilian_word": "dog"},
            {"undercover_word": "tea", "civilian_word": "coffee"}
        ]}"#;
        let response = app
            .oneshot(
                Request::post("/api/sequence")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "Game 1 started");
    }

    #[tokio::test]
    async fn test_start_round_forwards_command() {
        let (app, mut rx) = app();
        tokio::spawn(async move {
            if let Some(Command::StartRound { reply }) = rx.recv().await {
                let _ = reply.send(Ok("Round started".to_string()));
            }
        });

        let response = app
            .oneshot(Request::post("/api/round").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["code"], 200);
        assert_eq!(json["message"], "Round started");
    }

    #[tokio::test]
    async fn test_single_trims_words() {
        let (app, mut rx) = app();
        tokio::spawn(async move {
            if let Some(Command::StartSingle { words, reply }) = rx.recv().await {
                let message = format!("[{}|{}]", words.undercover_word, words.civilian_word);
                let _ = reply.send(Ok(message));
            }
        });

        let body = r#"{"undercover_word": "  cat ", "civilian_word": "   "}"#;
        let response = app
            .oneshot(
                Request::post("/api/single")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(body_json(response).await["message"], "[cat|]");
    }

    #[tokio::test]
    async fn test_command_failure_is_bad_request() {
        let (app, mut rx) = app();
        tokio::spawn(async move {
            if let Some(Command::Reset { reply }) = rx.recv().await {
                let _ = reply.send(Err("forbidden".to_string()));
            }
        });

        let response = app
            .oneshot(Request::post("/api/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["code"], 400);
        assert_eq!(json["message"], "forbidden");
    }

    #[tokio::test]
    async fn test_event_loop_gone() {
        let (app, rx) = app();
        drop(rx);

        let response = app
            .oneshot(Request::post("/api/clear_all").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
