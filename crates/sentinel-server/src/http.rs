use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use sentinel_observability::{emit_event, ObservabilityEvent, ProcessKind};
use sentinel_types::{
    details_from_value, ActionResult, GroomingInput, LogLevel, RefineIdeaInput,
};

use crate::AppState;

const LIST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

fn error_response(status: StatusCode, error: impl Into<String>, code: Option<&str>) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            error: error.into(),
            code: code.map(str::to_string),
        }),
    )
        .into_response()
}

fn validation_error(error: impl Into<String>) -> Response {
    error_response(StatusCode::BAD_REQUEST, error, Some("VALIDATION"))
}

fn invalid_body(rejection: JsonRejection) -> Response {
    tracing::debug!(error = %rejection.body_text(), "rejected request body");
    error_response(
        StatusCode::BAD_REQUEST,
        "Malformed JSON body",
        Some("INVALID_BODY"),
    )
}

#[derive(Debug, Deserialize)]
struct AppendLogInput {
    message: Option<String>,
    level: Option<String>,
    details: Option<Value>,
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, state, async {
        if tokio::signal::ctrl_c().await.is_err() {
            futures::future::pending::<()>().await;
        }
    })
    .await
}

/// Serves on an already-bound listener until `shutdown` resolves.
pub async fn serve_listener<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "sentinel server listening");
    let app = app_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!(addr = %local, "sentinel server stopped");
    Ok(())
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/global/health", get(global_health))
        .route("/api/logs", get(list_logs).post(append_log))
        .route("/api/ideas/refine", post(refine_idea))
        .route("/api/grooming/suggest", post(suggest_grooming))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    emit_event(
        tracing::Level::ERROR,
        ProcessKind::Engine,
        ObservabilityEvent {
            event: "http.handler.panic",
            component: "server.http",
            status: Some("failed"),
            error_code: Some("INTERNAL_PANIC"),
            detail: Some(&detail),
            ..Default::default()
        },
    );
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        None,
    )
}

async fn global_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeMs": state.uptime_ms(),
        "logCount": state.logs.len().await,
    }))
}

async fn list_logs(State(state): State<AppState>) -> Response {
    match tokio::time::timeout(LIST_TIMEOUT, state.logs.list()).await {
        Ok(records) => {
            emit_event(
                tracing::Level::DEBUG,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "logs.list",
                    component: "server.http",
                    status: Some("ok"),
                    record_count: Some(records.len() as u64),
                    ..Default::default()
                },
            );
            Json(records).into_response()
        }
        Err(_) => {
            emit_event(
                tracing::Level::ERROR,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "logs.list.timeout",
                    component: "server.http",
                    status: Some("failed"),
                    error_code: Some("LIST_TIMEOUT"),
                    ..Default::default()
                },
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching logs",
                None,
            )
        }
    }
}

async fn append_log(
    State(state): State<AppState>,
    payload: Result<Json<AppendLogInput>, JsonRejection>,
) -> Response {
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_body(rejection),
    };

    let message = input
        .message
        .filter(|m| !m.trim().is_empty());
    let level = input
        .level
        .filter(|l| !l.trim().is_empty());
    let (Some(message), Some(level)) = (message, level) else {
        return validation_error("Missing message or level");
    };
    let Some(level) = LogLevel::parse_strict(&level) else {
        emit_event(
            tracing::Level::WARN,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "logs.append.rejected",
                component: "server.http",
                status: Some("rejected"),
                error_code: Some("UNKNOWN_LEVEL"),
                log_level: Some(level.trim()),
                ..Default::default()
            },
        );
        return validation_error(format!("Unknown log level: {}", level.trim()));
    };
    let details = match input.details {
        None | Some(Value::Null) => None,
        Some(value @ Value::Object(_)) => details_from_value(value),
        Some(_) => return validation_error("details must be a JSON object"),
    };

    state.logs.append(message, level, details).await;
    (
        StatusCode::CREATED,
        Json(json!({ "message": "Log added successfully" })),
    )
        .into_response()
}

async fn refine_idea(
    State(state): State<AppState>,
    payload: Result<Json<RefineIdeaInput>, JsonRejection>,
) -> Response {
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_body(rejection),
    };
    if input.idea_text.trim().is_empty() {
        return validation_error("Missing ideaText");
    }
    match state.assist.refine_idea(input).await {
        Ok(output) => Json(ActionResult::ok(output)).into_response(),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(ActionResult::<()>::failed(err.to_string())),
        )
            .into_response(),
    }
}

async fn suggest_grooming(
    State(state): State<AppState>,
    payload: Result<Json<GroomingInput>, JsonRejection>,
) -> Response {
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_body(rejection),
    };
    if input.code_review_summary.trim().is_empty() {
        return validation_error("Missing codeReviewSummary");
    }
    match state.assist.suggest_grooming(input).await {
        Ok(output) => Json(ActionResult::ok(output)).into_response(),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(ActionResult::<()>::failed(err.to_string())),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use sentinel_core::{AssistService, GenerationRequest, ServerLogStore, StructuredGenerator};
    use sentinel_types::LogRecord;
    use tower::ServiceExt;

    struct CannedGenerator(Option<Value>);

    #[async_trait]
    impl StructuredGenerator for CannedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<Value> {
            match &self.0 {
                Some(value) => Ok(value.clone()),
                None => anyhow::bail!("no completion for {}", request.flow),
            }
        }
    }

    fn test_state_with(response: Option<Value>) -> AppState {
        let logs = ServerLogStore::new(200);
        let assist = AssistService::new(Arc::new(CannedGenerator(response)), logs.clone());
        AppState::new(logs, assist)
    }

    fn test_state() -> AppState {
        test_state_with(None)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(resp: Response) -> Value {
        let body = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&body).expect("json")
    }

    #[tokio::test]
    async fn global_health_route_returns_healthy_shape() {
        let state = test_state();
        state.logs.seed_startup_entries().await;
        let app = app_router(state);
        let req = Request::builder()
            .method("GET")
            .uri("/global/health")
            .body(Body::empty())
            .expect("request");
        let resp = app.oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let payload = body_json(resp).await;
        assert_eq!(payload.get("healthy").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(payload.get("logCount").and_then(|v| v.as_u64()), Some(2));
        assert!(payload.get("version").and_then(|v| v.as_str()).is_some());
    }

    #[tokio::test]
    async fn post_then_get_returns_record_in_order() {
        let state = test_state();
        state.logs.append("earlier", LogLevel::Info, None).await;
        let app = app_router(state);

        let resp = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/logs",
                json!({"message": "deploy finished", "level": "success", "details": {"env": "prod"}}),
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(
            body_json(resp).await,
            json!({"message": "Log added successfully"})
        );

        let req = Request::builder()
            .uri("/api/logs")
            .body(Body::empty())
            .expect("request");
        let resp = app.oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let records: Vec<LogRecord> =
            serde_json::from_value(body_json(resp).await).expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].message, "deploy finished");
        assert_eq!(records[1].level, LogLevel::Success);
        assert_eq!(
            records[1].details.as_ref().and_then(|d| d.get("env")),
            Some(&json!("prod"))
        );
    }

    #[tokio::test]
    async fn post_without_level_is_rejected_and_not_logged() {
        let state = test_state();
        let app = app_router(state.clone());

        for body in [
            json!({"message": "no level"}),
            json!({"level": "info"}),
            json!({"message": "  ", "level": "info"}),
        ] {
            let resp = app
                .clone()
                .oneshot(json_request("POST", "/api/logs", body))
                .await
                .expect("response");
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let payload = body_json(resp).await;
            assert_eq!(payload["error"], "Missing message or level");
            assert_eq!(payload["code"], "VALIDATION");
        }
        assert!(state.logs.is_empty().await);
    }

    #[tokio::test]
    async fn post_with_unknown_level_is_rejected() {
        let state = test_state();
        let resp = app_router(state.clone())
            .oneshot(json_request(
                "POST",
                "/api/logs",
                json!({"message": "hello", "level": "critical"}),
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.logs.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_json_is_a_client_error() {
        let req = Request::builder()
            .method("POST")
            .uri("/api/logs")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        let resp = app_router(test_state()).oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["code"], "INVALID_BODY");
    }

    #[tokio::test]
    async fn refine_idea_returns_action_result() {
        let state = test_state_with(Some(json!({
            "issueTitle": "Add dark mode toggle",
            "issueBody": "...",
            "labels": ["enhancement"],
            "milestone": "Q3"
        })));
        let resp = app_router(state.clone())
            .oneshot(json_request(
                "POST",
                "/api/ideas/refine",
                json!({"ideaText": "Add dark mode", "projectContext": "dashboard"}),
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let payload = body_json(resp).await;
        assert_eq!(payload["success"], true);
        assert_eq!(payload["data"]["issueTitle"], "Add dark mode toggle");

        let successes = state
            .logs
            .list()
            .await
            .into_iter()
            .filter(|r| r.level == LogLevel::Success)
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn grooming_failure_maps_to_bad_gateway() {
        let resp = app_router(test_state())
            .oneshot(json_request(
                "POST",
                "/api/grooming/suggest",
                json!({"codeReviewSummary": "Refactored auth", "currentTasks": ["A", "B"]}),
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let payload = body_json(resp).await;
        assert_eq!(payload["success"], false);
        assert!(payload["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn panics_become_generic_server_errors() {
        async fn boom() -> &'static str {
            panic!("secret internal detail")
        }
        let app = Router::new()
            .route("/boom", get(boom))
            .layer(CatchPanicLayer::custom(handle_panic));
        let req = Request::builder()
            .uri("/boom")
            .body(Body::empty())
            .expect("request");
        let resp = app.oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let payload = body_json(resp.into_response()).await;
        assert_eq!(payload, json!({"error": "Internal server error"}));
    }
}
