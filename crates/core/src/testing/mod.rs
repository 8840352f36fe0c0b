//! Testing utilities and mock implementations for E2E tests.
//!
//! This module provides mock implementations of all external service traits,
//! allowing the whole ticket pipeline to be driven without ServiceNow, a mail
//! gateway or an SMTP relay.
//!
//! # Example
//!
//! ```rust,ignore
//! use qrelease_core::testing::{fixtures, MockServices, MockRelease};
//!
//! let mocks = MockServices::new();
//! mocks.source.set_tickets(vec![fixtures::protected_ticket("INC001", "guid-1")]).await;
//! mocks.inspector.set_protected("INC001", fixtures::extracted("alice", fixtures::APPROVED_CODE, "guid-1")).await;
//! mocks.gateway.script(vec![MockRelease::Released]).await;
//!
//! let engine = mocks.engine(store);
//! engine.run_once().await;
//! ```

mod mock_gateway;
mod mock_inspector;
mod mock_notifier;
mod mock_ticketing;

pub use mock_gateway::{MockRelease, MockReleaseGateway, MockStatusMode, RecordedRelease};
pub use mock_inspector::MockInspector;
pub use mock_notifier::MockNotifier;
pub use mock_ticketing::{MockTicketSource, MockTicketUpdater, RecordedUpdate};

use std::sync::Arc;

use crate::engine::{Collaborators, EngineConfig, WorkflowEngine};
use crate::policy::JustificationPolicy;
use crate::progress::ProgressStore;

/// One of each mock, shared so tests can script and inspect them while the
/// engine holds its own handles.
#[derive(Clone, Default)]
pub struct MockServices {
    pub source: Arc<MockTicketSource>,
    pub inspector: Arc<MockInspector>,
    pub gateway: Arc<MockReleaseGateway>,
    pub updater: Arc<MockTicketUpdater>,
    pub notifier: Arc<MockNotifier>,
}

impl MockServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            source: self.source.clone(),
            inspector: self.inspector.clone(),
            gateway: self.gateway.clone(),
            updater: self.updater.clone(),
            notifier: self.notifier.clone(),
        }
    }

    /// Engine wired to these mocks with [`fixtures::fast_engine_config`] and
    /// [`fixtures::vendor_policy`].
    pub fn engine(&self, store: Arc<dyn ProgressStore>) -> Arc<WorkflowEngine> {
        self.engine_with(fixtures::fast_engine_config(), store)
    }

    pub fn engine_with(
        &self,
        config: EngineConfig,
        store: Arc<dyn ProgressStore>,
    ) -> Arc<WorkflowEngine> {
        Arc::new(WorkflowEngine::new(
            config,
            JustificationPolicy::new(fixtures::vendor_policy()),
            fixtures::alert_target(),
            store,
            self.collaborators(),
        ))
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::engine::{AlertTarget, EngineConfig, TimeoutConfig};
    use crate::inspector::ExtractedJustification;
    use crate::policy::{JustificationField, PolicyConfig};
    use crate::ticket::{AttachmentRef, Ticket, TicketKind};

    /// Distribution list used by [`alert_target`].
    pub const ALERT_LIST: &str = "mail-ops@example.com";

    /// The only reason code [`vendor_policy`] approves.
    pub const APPROVED_CODE: &str = "APPROVED_VENDOR";

    /// A bare incident whose sys_id and number are both `number`.
    pub fn ticket(number: &str) -> Ticket {
        Ticket::new(number, number, TicketKind::Incident)
            .with_description("Please release the email I am waiting for.")
            .with_requester("jdoe")
    }

    /// An incident with a zip attachment and a message GUID.
    pub fn protected_ticket(number: &str, guid: &str) -> Ticket {
        ticket(number)
            .with_attachment(AttachmentRef {
                id: format!("att-{}", number),
                file_name: "quarantined.zip".to_string(),
                content_type: Some("application/zip".to_string()),
                size_bytes: Some(2048),
            })
            .with_message_guid(guid)
    }

    /// A complete justification.
    pub fn extracted(requester: &str, reason_code: &str, guid: &str) -> ExtractedJustification {
        ExtractedJustification {
            requester: Some(requester.to_string()),
            reason_code: Some(reason_code.to_string()),
            message_guid: Some(guid.to_string()),
            justification_text: Some("Invoice from a known vendor".to_string()),
            manager_approval: None,
        }
    }

    /// Requires requester and reason code, and only approves [`APPROVED_CODE`].
    pub fn vendor_policy() -> PolicyConfig {
        PolicyConfig::default()
            .with_required(JustificationField::Requester)
            .with_required(JustificationField::ReasonCode)
            .with_approved_code(APPROVED_CODE)
    }

    /// Three attempts, no backoff, one second per call.
    pub fn fast_engine_config() -> EngineConfig {
        EngineConfig {
            enabled: false,
            poll_interval_seconds: 1,
            max_concurrent_tickets: 4,
            retry_max_attempts: 3,
            retry_backoff_base_seconds: 0.0,
            retry_backoff_max_seconds: 0.0,
            timeouts: TimeoutConfig {
                poll_seconds: 1,
                inspect_seconds: 1,
                release_seconds: 1,
                update_seconds: 1,
                notify_seconds: 1,
            },
        }
    }

    pub fn alert_target() -> AlertTarget {
        AlertTarget {
            distribution_list: ALERT_LIST.to_string(),
            subject_prefix: "[qrelease]".to_string(),
        }
    }
}
