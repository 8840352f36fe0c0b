//! ServiceNow integration: ticket queue, attachments and outcome write-back.

mod client;
mod wire;

pub use client::ServiceNowClient;
