//! Key handlers: put, get, delete.
//!
//! Values travel as raw request and response bodies; keys are the last
//! path segment.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use axum::routing::put;

use crate::app_state::AppState;
use crate::error::{ErrorResponse, StoreError};

/// `PUT /key/{key}`: Store a value.
///
/// # Errors
///
/// Returns [`StoreError`] if the key or value exceeds its size limit, or
/// the transaction log is no longer accepting writes.
#[utoipa::path(
    put,
    path = "/api/v1/key/{key}",
    tag = "Keys",
    summary = "Store a value",
    description = "Stores the request body under the given key, replacing any previous value. The mutation is logged asynchronously.",
    params(
        ("key" = String, Path, description = "Key to store under"),
    ),
    request_body(content = String, content_type = "application/octet-stream"),
    responses(
        (status = 201, description = "Value stored"),
        (status = 400, description = "Key or value too large", body = ErrorResponse),
        (status = 503, description = "Transaction log unavailable", body = ErrorResponse),
    )
)]
pub async fn put_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, StoreError> {
    state
        .kv_service
        .put(key.into_bytes(), body.to_vec())
        .await?;
    Ok(StatusCode::CREATED)
}

/// `GET /key/{key}`: Fetch a value.
///
/// # Errors
///
/// Returns [`StoreError::NoSuchKey`] if nothing is stored under the key.
#[utoipa::path(
    get,
    path = "/api/v1/key/{key}",
    tag = "Keys",
    summary = "Fetch a value",
    description = "Returns the stored value as the raw response body.",
    params(
        ("key" = String, Path, description = "Key to look up"),
    ),
    responses(
        (status = 200, description = "Stored value", body = String, content_type = "application/octet-stream"),
        (status = 404, description = "No such key", body = ErrorResponse),
    )
)]
pub async fn get_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, StoreError> {
    let value = state.kv_service.get(key.as_bytes()).await?;
    Ok((StatusCode::OK, value))
}

/// `DELETE /key/{key}`: Remove a value.
///
/// # Errors
///
/// Returns [`StoreError`] if the key exceeds its size limit or the
/// transaction log is no longer accepting writes.
#[utoipa::path(
    delete,
    path = "/api/v1/key/{key}",
    tag = "Keys",
    summary = "Delete a value",
    description = "Removes the key. Deleting an absent key succeeds.",
    params(
        ("key" = String, Path, description = "Key to delete"),
    ),
    responses(
        (status = 204, description = "Key deleted"),
        (status = 400, description = "Key too large", body = ErrorResponse),
        (status = 503, description = "Transaction log unavailable", body = ErrorResponse),
    )
)]
pub async fn delete_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, StoreError> {
    state.kv_service.delete(key.into_bytes()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Key routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/key/{key}", put(put_key).get(get_key).delete(delete_key))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::{FileLogConfig, LogBackendConfig, LogConfig};
    use crate::domain::{KvStore, StoreLimits};
    use crate::persistence::init_logger;
    use crate::service::KvService;

    async fn make_app(dir: &tempfile::TempDir) -> (Router, AppState) {
        let config = LogConfig {
            backend: LogBackendConfig::File(FileLogConfig::new(dir.path().join("tx.log"))),
            queue_capacity: 4,
        };
        let store = Arc::new(KvStore::new(StoreLimits {
            max_key_size: 16,
            max_value_size: 64,
        }));
        let Ok((logger, _)) = init_logger(&config, store.as_ref()).await else {
            panic!("logger startup failed");
        };
        let state = AppState {
            kv_service: Arc::new(KvService::new(store, logger)),
        };
        let app = crate::api::build_router().with_state(state.clone());
        (app, state)
    }

    fn request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
        let Ok(req) = Request::builder().method(method).uri(uri).body(body.into()) else {
            panic!("bad request");
        };
        req
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let Ok(resp) = app.clone().oneshot(req).await;
        let status = resp.status();
        let Ok(body) = axum::body::to_bytes(resp.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn put_get_delete_cycle() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let (app, state) = make_app(&dir).await;

        let (status, _) = send(&app, request("PUT", "/api/v1/key/a", "hello")).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, request("GET", "/api/v1/key/a", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello".to_vec());

        let (status, _) = send(&app, request("DELETE", "/api/v1/key/a", Body::empty())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, request("GET", "/api/v1/key/a", Body::empty())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(String::from_utf8_lossy(&body).contains("no such key"));

        let _ = state.kv_service.logger().close().await;
    }

    #[tokio::test]
    async fn oversized_value_is_bad_request() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let (app, state) = make_app(&dir).await;

        let (status, body) = send(&app, request("PUT", "/api/v1/key/a", vec![b'x'; 65])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
        assert_eq!(json.pointer("/error/code").and_then(|c| c.as_u64()), Some(1002));

        let _ = state.kv_service.logger().close().await;
    }

    #[tokio::test]
    async fn writes_after_close_are_unavailable() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let (app, state) = make_app(&dir).await;
        let _ = state.kv_service.logger().close().await;

        let (status, _) = send(&app, request("PUT", "/api/v1/key/a", "1")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn values_survive_restart() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let (app, state) = make_app(&dir).await;
        let _ = send(&app, request("PUT", "/api/v1/key/k", vec![0u8, 10, 255])).await;
        let _ = state.kv_service.logger().close().await;

        let (app, state) = make_app(&dir).await;
        let (status, body) = send(&app, request("GET", "/api/v1/key/k", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, vec![0u8, 10, 255]);
        let _ = state.kv_service.logger().close().await;
    }
}
