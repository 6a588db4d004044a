//! Resilient request client: single HTTP calls with bounded, jittered retry.

mod client;
mod retry;

pub use client::{HttpResponse, RequestOptions, ResilientClient};
pub use retry::RetryPolicy;
