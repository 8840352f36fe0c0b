//! SMTP notifier for the team distribution list.

use std::time::Instant;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::config::SmtpConfig;
use crate::metrics;

use super::{Notification, Notifier, NotifyError};

/// Port that speaks TLS from the first byte; every other port uses STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Sends alerts through an SMTP relay.
///
/// lettre's `SmtpTransport` is blocking, so each send runs on the blocking pool.
pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| NotifyError::InvalidAddress(format!("from address: {e}")))?;

        let builder = if config.port == SMTPS_PORT {
            SmtpTransport::relay(&config.host)
        } else {
            SmtpTransport::starttls_relay(&config.host)
        }
        .map_err(|e| NotifyError::DeliveryFailed(format!("SMTP relay error: {e}")))?
        .port(config.port);

        let builder = match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        build_message(&self.from, notification)
    }
}

fn build_message(from: &Mailbox, notification: &Notification) -> Result<Message, NotifyError> {
    let mut builder = Message::builder()
        .from(from.clone())
        .subject(notification.subject.clone());

    let mut recipients = 0;
    for address in notification.recipients() {
        let mailbox: Mailbox = address
            .parse()
            .map_err(|e| NotifyError::InvalidAddress(format!("{address}: {e}")))?;
        builder = builder.to(mailbox);
        recipients += 1;
    }
    if recipients == 0 {
        return Err(NotifyError::InvalidAddress(
            "distribution list has no addresses".to_string(),
        ));
    }

    builder
        .body(notification.body.clone())
        .map_err(|e| NotifyError::DeliveryFailed(format!("Failed to build email: {e}")))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = self.build_message(notification)?;
        let transport = self.transport.clone();
        let start = Instant::now();

        let result = tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| NotifyError::DeliveryFailed(format!("send task failed: {e}")))?
            .map(|_| ())
            .map_err(|e| NotifyError::DeliveryFailed(format!("SMTP send failed: {e}")));

        metrics::observe_external("smtp", "send", start.elapsed().as_secs_f64(), result.is_ok());

        if result.is_ok() {
            info!(
                to = %notification.distribution_list,
                subject = %notification.subject,
                "Failure alert sent"
            );
        }
        result
    }
}
