/// Content Graph Library
///
/// Posts, threaded comments (up to level 3) and the two like ledgers, with
/// denormalized counters kept consistent by transactional cascades.
///
/// # Modules
///
/// - `models`: Row types, read models and input validation
/// - `db`: Store abstraction with PostgreSQL and in-memory backends
/// - `services`: Post and comment operations
/// - `error`: Error types and classification
/// - `config`: Configuration management
/// - `metrics`: Prometheus counters
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{ContentError, ErrorKind, Result, StoreError};
pub use services::{CommentService, ContentGraph, PostService};
