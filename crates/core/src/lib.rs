pub mod audit;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod inspector;
pub mod metrics;
pub mod notifier;
pub mod policy;
pub mod progress;
pub mod servicenow;
pub mod testing;
pub mod ticket;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, AuditWriter, SqliteAuditStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use engine::{
    AlertTarget, Collaborators, EngineConfig, EngineError, EngineStatus, ErrorKind, FailureEvent,
    PollSummary, Stage, WorkflowEngine,
};
pub use gateway::{GatewayError, HttpReleaseGateway, ReleaseGateway};
pub use inspector::{AttachmentInspector, TicketAttachmentInspector};
pub use notifier::{LogNotifier, Notification, Notifier, SmtpNotifier};
pub use policy::{JustificationDecision, JustificationPolicy, PolicyConfig};
pub use progress::{ProgressRecord, ProgressStore, SqliteProgressStore, WorkflowState};
pub use servicenow::ServiceNowClient;
pub use ticket::{Ticket, TicketKind, TicketOutcome, TicketSource, TicketStatus, TicketUpdater};
