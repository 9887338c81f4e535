//! # durakv
//!
//! Single-node key-value store served over HTTP and backed by a
//! crash-recoverable transaction log.
//!
//! Every successful mutation is applied to an in-memory map and then
//! handed to a [`persistence::TransactionLogger`], which persists it in the
//! background to an append-only file or a PostgreSQL table. On startup the
//! log is replayed into the map before any new write is accepted.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── KvService (service/)
//!     │
//!     ├── KvStore (domain/)            ◄── replay at startup
//!     ├── TransactionLogger (persistence/)
//!     │       bounded queue → single writer task
//!     │
//!     └── File log │ PostgreSQL `transactions` table
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
