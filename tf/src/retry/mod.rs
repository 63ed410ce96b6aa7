//! Retry execution with exponential backoff
//!
//! Runs a fallible async operation up to a budget of attempts, backing
//! off exponentially (with jitter) between them, failing fast when an
//! attached circuit breaker is open, and consulting the error classifier
//! for stop/continue decisions.

mod executor;
mod policy;

pub use executor::{RetryError, RetryExecutor, RetryStats};
pub use policy::{RetryPolicy, backoff_delay};
