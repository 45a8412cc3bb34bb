//! Outbound HTTP calls to the agent backend.

mod client;
mod retry;

pub use client::{describe_status, AnalyzeResponse, Backend, FailureKind, RequestClient};
pub use retry::{retry_with_backoff, RetryPolicy, Sleeper, TokioSleeper};

#[cfg(test)]
pub(crate) use retry::tests::RecordingSleeper;
