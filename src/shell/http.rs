// Operator HTTP surface: enqueue entries and inspect or requeue them.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::application::errors::EnqueueError;
use crate::core::outbox_entry::{EntryId, EntryStatus, OutboxEntry};
use crate::core::ports::{OutboxStore, StoreError};
use crate::shell::state::AppState;

#[derive(Deserialize)]
pub struct EnqueueBody {
    pub topic: String,
    pub key: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub id: EntryId,
}

#[derive(Serialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: OutboxEntry,
    pub status: EntryStatus,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/outbox", post(enqueue))
        .route("/outbox/stats", get(stats))
        .route("/outbox/{id}", get(entry))
        .route("/outbox/{id}/requeue", post(requeue))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn store_error_response(error: StoreError) -> Response {
    match error {
        StoreError::NotFound(_) => error_response(StatusCode::NOT_FOUND, error),
        StoreError::Conflict(_) => error_response(StatusCode::CONFLICT, error),
        StoreError::Backend(_) => {
            tracing::error!(error = %error, "Outbox store unavailable");
            error_response(StatusCode::SERVICE_UNAVAILABLE, error)
        }
    }
}

fn parse_id(raw: &str) -> Result<EntryId, Response> {
    raw.parse()
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("invalid entry id {raw:?}")))
}

async fn enqueue(
    State(state): State<AppState>,
    body: Result<Json<EnqueueBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(_) => return StatusCode::UNPROCESSABLE_ENTITY.into_response(),
    };

    match state
        .enqueue_handler
        .enqueue(&body.topic, &body.key, &body.payload)
        .await
    {
        Ok(id) => (StatusCode::ACCEPTED, Json(EnqueueResponse { id })).into_response(),
        Err(e @ (EnqueueError::Validation(_) | EnqueueError::Serialization(_))) => {
            error_response(StatusCode::BAD_REQUEST, e)
        }
        Err(EnqueueError::Storage(e)) => store_error_response(e),
    }
}

async fn stats(State(state): State<AppState>) -> Response {
    match state.store.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn entry(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.store.get(id).await {
        Ok(Some(entry)) => Json(EntryView {
            status: entry.status(),
            entry,
        })
        .into_response(),
        Ok(None) => store_error_response(StoreError::NotFound(id)),
        Err(e) => store_error_response(e),
    }
}

async fn requeue(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.store.requeue(id).await {
        Ok(()) => {
            tracing::info!(entry_id = %id, "Outbox entry requeued");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error_response(e),
    }
}

#[cfg(test)]
mod http_tests {
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use rstest::{fixture, rstest};
    use std::sync::Arc;
    use tower::ServiceExt;

    use super::router;
    use crate::adapters::in_memory::in_memory_outbox_store::InMemoryOutboxStore;
    use crate::core::outbox_entry::OutboxEntry;
    use crate::core::ports::OutboxStore;
    use crate::shell::state::AppState;

    type BeforeEachReturn = (Arc<InMemoryOutboxStore>, Router);

    #[fixture]
    fn before_each() -> BeforeEachReturn {
        let store = Arc::new(InMemoryOutboxStore::new());
        let app = router(AppState::new(store.clone()));
        (store, app)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_return_202_with_the_entry_id(before_each: BeforeEachReturn) {
        let (store, app) = before_each;
        let body = r#"{"topic":"users","key":"user-123","payload":{"name":"John Doe"}}"#;

        let response = app.oneshot(post_json("/outbox", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = json_body(response).await;
        let id = json["id"].as_str().unwrap().parse().unwrap();
        let entry = store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.topic, "users");
        assert_eq!(entry.payload, r#"{"name":"John Doe"}"#);
    }

    #[rstest]
    #[case::blank_topic(r#"{"topic":" ","key":"k","payload":1}"#)]
    #[case::empty_key(r#"{"topic":"users","key":"","payload":1}"#)]
    #[case::missing_payload(r#"{"topic":"users","key":"k"}"#)]
    #[tokio::test]
    async fn it_should_return_400_on_validation_errors(
        before_each: BeforeEachReturn,
        #[case] body: &str,
    ) {
        let (store, app) = before_each;
        let response = app.oneshot(post_json("/outbox", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty().await);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_return_422_on_invalid_json(before_each: BeforeEachReturn) {
        let (_, app) = before_each;
        let response = app.oneshot(post_json("/outbox", "not-json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_return_503_when_the_store_is_offline(before_each: BeforeEachReturn) {
        let (store, app) = before_each;
        store.set_offline(true);
        let body = r#"{"topic":"users","key":"user-123","payload":{}}"#;
        let response = app.oneshot(post_json("/outbox", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_report_stats(before_each: BeforeEachReturn) {
        let (store, app) = before_each;
        store.save(OutboxEntry::new("users", "a", "{}")).await.unwrap();

        let response = app
            .oneshot(Request::get("/outbox/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["pending"], 1);
        assert_eq!(json["delivered"], 0);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_return_an_entry_with_its_status(before_each: BeforeEachReturn) {
        let (store, app) = before_each;
        let entry = OutboxEntry::new("users", "a", "{}");
        let id = entry.id;
        store.save(entry).await.unwrap();

        let response = app
            .oneshot(
                Request::get(format!("/outbox/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["id"], id.to_string());
        assert_eq!(json["status"], "pending");
    }

    #[rstest]
    #[case::unknown(format!("/outbox/{}", uuid::Uuid::now_v7()), StatusCode::NOT_FOUND)]
    #[case::malformed("/outbox/not-a-uuid".to_string(), StatusCode::BAD_REQUEST)]
    #[tokio::test]
    async fn it_should_reject_unknown_or_malformed_ids(
        before_each: BeforeEachReturn,
        #[case] uri: String,
        #[case] expected: StatusCode,
    ) {
        let (_, app) = before_each;
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_requeue_a_dead_lettered_entry(before_each: BeforeEachReturn) {
        let (store, app) = before_each;
        let entry = OutboxEntry::new("users", "a", "{}");
        let id = entry.id;
        store.save(entry).await.unwrap();
        store.mark_failed(id, "failed to publish: down").await.unwrap();
        store.mark_dead_lettered(id, "attempts exhausted").await.unwrap();

        let response = app
            .oneshot(post_json(&format!("/outbox/{id}/requeue"), ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let entry = store.get(id).await.unwrap().unwrap();
        assert!(entry.is_pending());
        assert_eq!(entry.retry_count, 1);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_show_why_an_entry_was_dead_lettered(before_each: BeforeEachReturn) {
        let (store, app) = before_each;
        let entry = OutboxEntry::new("users", "a", "{}");
        let id = entry.id;
        store.save(entry).await.unwrap();
        store.mark_failed(id, "failed to publish: down").await.unwrap();
        store.mark_dead_lettered(id, "failed to publish: down").await.unwrap();

        let response = app
            .oneshot(
                Request::get(format!("/outbox/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = json_body(response).await;
        assert_eq!(json["status"], "dead_lettered");
        assert_eq!(json["dead_letter_reason"], "failed to publish: down");
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_return_404_when_requeueing_an_unknown_entry(before_each: BeforeEachReturn) {
        let (_, app) = before_each;
        let uri = format!("/outbox/{}/requeue", uuid::Uuid::now_v7());
        let response = app.oneshot(post_json(&uri, "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
