//! Service layer: business logic orchestration.
//!
//! [`KvService`] applies mutations to the [`super::domain::KvStore`] and
//! hands them to the transaction logger.

pub mod kv_service;

pub use kv_service::KvService;
