//! HTTP middleware

pub mod tracing;

pub use self::tracing::request_tracing;
