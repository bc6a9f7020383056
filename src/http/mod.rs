//! Blocking HTTP client with retry logic, used to fetch channel indexes.

mod client;
mod retry;

pub use client::HttpClient;
pub use retry::NonRetryableError;
