use std::sync::Arc;

use qrelease_core::{
    AuditHandle, AuditStore, Config, ProgressStore, SanitizedConfig, WorkflowEngine,
};

/// Shared application state
pub struct AppState {
    config: Config,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
    progress_store: Arc<dyn ProgressStore>,
    /// Absent when the ticketing system or the gateway is not configured.
    engine: Option<Arc<WorkflowEngine>>,
}

impl AppState {
    pub fn new(
        config: Config,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
        progress_store: Arc<dyn ProgressStore>,
        engine: Option<Arc<WorkflowEngine>>,
    ) -> Self {
        Self {
            config,
            audit,
            audit_store,
            progress_store,
            engine,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn progress_store(&self) -> &dyn ProgressStore {
        self.progress_store.as_ref()
    }

    pub fn engine(&self) -> Option<&Arc<WorkflowEngine>> {
        self.engine.as_ref()
    }
}
