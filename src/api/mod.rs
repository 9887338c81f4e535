//! REST API layer: route handlers, OpenAPI document, and router composition.
//!
//! Key endpoints are mounted under `/api/v1`; `/health` sits at the root.

pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::error::{ErrorBody, ErrorResponse};

/// OpenAPI description of every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "durakv",
        description = "Key-value store backed by a crash-recoverable transaction log"
    ),
    paths(
        handlers::key::put_key,
        handlers::key::get_key,
        handlers::key::delete_key,
        handlers::system::health_handler,
    ),
    components(schemas(ErrorResponse, ErrorBody, handlers::system::HealthResponse)),
    tags(
        (name = "Keys", description = "Store, fetch and delete values"),
        (name = "System", description = "Service status"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
