//! Timing policies shared by the lifecycle loops.

pub mod backoff;

pub use backoff::{with_jitter, RedialBackoff, RedialBackoffConfig};
