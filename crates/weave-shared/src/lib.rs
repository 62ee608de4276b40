//! Shared configuration, observability and retry utilities for weave

pub mod config;
pub mod observability;
pub mod retry;

pub use config::*;
pub use observability::*;
pub use retry::*;
