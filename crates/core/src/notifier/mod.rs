//! Failure notification.
//!
//! This module provides a `Notifier` trait plus an SMTP implementation for the
//! team distribution list and a log-only fallback.

mod log_notifier;
mod smtp;
mod types;

pub use log_notifier::LogNotifier;
pub use smtp::SmtpNotifier;
pub use types::*;
