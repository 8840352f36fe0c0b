use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Background task that drains the audit channel into storage.
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Consume events until every `AuditHandle` has been dropped.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord {
                id: 0,
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                ticket_id: envelope.event.ticket_id().map(String::from),
                actor: envelope.event.actor().map(String::from),
                data: envelope.event,
            };

            if let Err(e) = self.store.insert(&record) {
                tracing::error!(event_type = %record.event_type, "Failed to write audit event: {}", e);
            }
        }

        tracing::info!("Audit writer shutting down");
    }
}

/// Create a handle/writer pair sharing a channel of `buffer_size` events.
///
/// Spawn the writer with `tokio::spawn(writer.run())`; it exits once the
/// last handle clone is dropped.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = AuditHandle::new(tx);
    let writer = AuditWriter::new(rx, store);
    (handle, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, AuditFilter, SqliteAuditStore};

    fn started() -> AuditEvent {
        AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        }
    }

    #[tokio::test]
    async fn test_writer_stores_events_with_extracted_columns() {
        let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, writer) = create_audit_system(store.clone(), 10);
        let writer_task = tokio::spawn(writer.run());

        handle.emit(started()).await;
        handle
            .emit(AuditEvent::TicketRetryRequested {
                ticket_id: "sys-1".to_string(),
                requested_by: "alice".to_string(),
                previous_state: "failed".to_string(),
                resume_state: "new".to_string(),
            })
            .await;
        drop(handle);
        writer_task.await.unwrap();

        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 2);
        let retry = store
            .query(&AuditFilter::new().with_event_type("ticket_retry_requested"))
            .unwrap();
        assert_eq!(retry[0].ticket_id.as_deref(), Some("sys-1"));
        assert_eq!(retry[0].actor.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles_to_drop() {
        let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (main_handle, writer) = create_audit_system(store.clone(), 10);
        let engine_handle = main_handle.clone();
        let writer_task = tokio::spawn(writer.run());

        engine_handle
            .emit(AuditEvent::TicketStateChanged {
                ticket_id: "t-1".to_string(),
                from_state: "new".to_string(),
                to_state: "inspecting".to_string(),
                reason: None,
            })
            .await;
        drop(main_handle);

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert!(
            !writer_task.is_finished(),
            "Writer should still be running with handles alive"
        );

        drop(engine_handle);
        let result = tokio::time::timeout(tokio::time::Duration::from_secs(1), writer_task).await;
        assert!(result.is_ok(), "Writer should exit after all handles dropped");
        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_event_emitted_just_before_drop_is_captured() {
        let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, writer) = create_audit_system(store.clone(), 100);
        let writer_task = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;
        drop(handle);
        writer_task.await.unwrap();

        let records = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "service_stopped");
    }
}
