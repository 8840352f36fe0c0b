use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::AuditEvent;

/// Envelope wrapping an audit event with metadata
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEventEnvelope {
    fn now(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Handle for emitting audit events.
///
/// Cheaply cloneable; every ticket pipeline holds its own clone. Events go
/// through a bounded channel to the `AuditWriter`.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEventEnvelope>,
}

impl AuditHandle {
    /// Create a new audit handle from a channel sender
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an audit event, waiting for channel capacity.
    ///
    /// A closed channel is logged; the caller never fails because of auditing.
    pub async fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.tx.send(AuditEventEnvelope::now(event)).await {
            tracing::error!("Failed to emit audit event: {}", e);
        }
    }

    /// Emit without waiting. Returns false if the channel is full or closed.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        match self.tx.try_send(AuditEventEnvelope::now(event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit audit event: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopped() -> AuditEvent {
        AuditEvent::ServiceStopped {
            reason: "test".to_string(),
        }
    }

    fn requested(attempt: u32) -> AuditEvent {
        AuditEvent::ReleaseRequested {
            ticket_id: "sys-1".to_string(),
            guid: "g-1".to_string(),
            attempt,
        }
    }

    #[tokio::test]
    async fn test_emit_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        handle.emit(requested(1)).await;

        let envelope = rx.recv().await.expect("Should receive event");
        assert!(matches!(
            envelope.event,
            AuditEvent::ReleaseRequested { attempt: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_cloned_handles_share_channel() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle1 = AuditHandle::new(tx);
        let handle2 = handle1.clone();

        handle1.emit(requested(1)).await;
        handle2.emit(stopped()).await;

        let e1 = rx.recv().await.expect("Should receive first event");
        let e2 = rx.recv().await.expect("Should receive second event");
        assert!(matches!(e1.event, AuditEvent::ReleaseRequested { .. }));
        assert!(matches!(e2.event, AuditEvent::ServiceStopped { .. }));
    }

    #[test]
    fn test_try_emit_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = AuditHandle::new(tx);

        assert!(handle.try_emit(requested(1)));
        assert!(!handle.try_emit(requested(2)));
    }

    #[tokio::test]
    async fn test_emit_closed_channel_does_not_panic() {
        let (tx, rx) = mpsc::channel::<AuditEventEnvelope>(10);
        let handle = AuditHandle::new(tx);
        drop(rx);

        handle.emit(stopped()).await;
        assert!(!handle.try_emit(stopped()));
    }

    #[test]
    fn test_envelope_has_timestamp() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        let before = Utc::now();
        handle.try_emit(stopped());
        let after = Utc::now();

        let envelope = rx.try_recv().expect("Should receive event");
        assert!(envelope.timestamp >= before);
        assert!(envelope.timestamp <= after);
    }
}
