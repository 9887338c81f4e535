//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::KvService;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Key-value service for all business logic.
    pub kv_service: Arc<KvService>,
}
