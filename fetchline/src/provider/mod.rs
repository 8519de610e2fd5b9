//! Reference network fetcher.

mod http;

pub use http::HttpFetcher;
