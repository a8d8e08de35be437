//! File persistence and HTTP fetch utilities for reel.

mod files;
mod http;

pub use files::{sha256_hex, write_atomic, ReportStore, RunManifest, StoredFile};
pub use http::{FetchError, FetchedResponse, HttpClientConfig, HttpFetcher, RetryPolicy};
