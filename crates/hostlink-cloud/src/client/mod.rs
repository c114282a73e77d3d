//! Ingestion service client module

mod http;

pub use http::ApiClient;
