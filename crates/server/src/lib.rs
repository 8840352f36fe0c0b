//! HTTP surface of the quarantine release service.

pub mod api;
pub mod metrics;
pub mod state;
