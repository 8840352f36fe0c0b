//! Email security gateway abstraction.
//!
//! This module provides a `ReleaseGateway` trait for releasing quarantined
//! messages, plus an HTTP JSON client implementation.

mod http;
mod traits;
mod types;

pub use http::HttpReleaseGateway;
pub use traits::ReleaseGateway;
pub use types::*;
