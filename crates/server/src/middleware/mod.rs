//! HTTP middleware and extractors.
//!
//! Tracing and Sentry layers are applied in `main`; this module holds
//! the request guards used by handlers.

pub mod auth;

pub use auth::{Actor, RequireTaskforce};
