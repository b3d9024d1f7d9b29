//! `GET /health` endpoint backed by the connectivity state.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use crate::connectivity::{ConnectivityState, ConnectivityStateMachine};

/// GET /health
///
/// `{"status":"UP"}` with 200 while the remote is reachable, otherwise the
/// current state name with 503.
async fn health_check(
    State(machine): State<Arc<ConnectivityStateMachine>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let state = machine.state();
    let code = match state {
        ConnectivityState::Up => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(serde_json::json!({ "status": state.as_str() })))
}

pub fn create_health_router(machine: Arc<ConnectivityStateMachine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(machine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_health(machine: Arc<ConnectivityStateMachine>) -> (StatusCode, serde_json::Value) {
        let response = create_health_router(machine)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_reports_up() {
        let machine = Arc::new(ConnectivityStateMachine::new());
        machine.begin_connecting();
        machine.check_succeeded();

        let (status, body) = get_health(machine).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "status": "UP" }));
    }

    #[tokio::test]
    async fn test_reports_down_as_unavailable() {
        let machine = Arc::new(ConnectivityStateMachine::new());
        machine.begin_connecting();
        machine.check_succeeded();
        machine.check_failed();

        let (status, body) = get_health(machine).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "DOWN");
    }

    #[tokio::test]
    async fn test_not_up_before_first_check() {
        let machine = Arc::new(ConnectivityStateMachine::new());
        let (status, body) = get_health(Arc::clone(&machine)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "INIT");

        machine.begin_connecting();
        let (status, body) = get_health(machine).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "CONNECTING");
    }
}
