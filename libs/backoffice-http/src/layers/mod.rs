//! Tower layers for the transport stack
//!
//! - [`RetryLayer`] - retries transient failures with exponential backoff

mod retry;

pub use retry::{RetryLayer, RetryService, calculate_backoff};
