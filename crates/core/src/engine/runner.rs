//! Workflow engine implementation.
//!
//! Drives each ticket through its pipeline, one stage after the other:
//! inspect, decide, release, update. Every state change is written to the
//! progress journal first, so a restarted engine resumes where the last one
//! stopped and never issues a second release call for a message it may
//! already have released.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::gateway::{GatewayError, GatewayReleaseStatus, ReleaseGateway, ReleaseRequest};
use crate::inspector::AttachmentInspector;
use crate::metrics;
use crate::notifier::{Notification, Notifier};
use crate::policy::{JustificationDecision, JustificationField, JustificationPolicy};
use crate::progress::{ProgressRecord, ProgressStore, StoreError, WorkflowState};
use crate::ticket::{
    Ticket, TicketOutcome, TicketSource, TicketStatus, TicketUpdate, TicketUpdater,
};

use super::config::EngineConfig;
use super::types::{
    AlertTarget, EngineError, EngineStatus, ErrorKind, FailureEvent, PollSummary, Stage,
};

/// External services the engine drives.
///
/// Each is shared behind an `Arc` so that concurrent pipelines use the same
/// connection pools.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn TicketSource>,
    pub inspector: Arc<dyn AttachmentInspector>,
    pub gateway: Arc<dyn ReleaseGateway>,
    pub updater: Arc<dyn TicketUpdater>,
    pub notifier: Arc<dyn Notifier>,
}

/// How one pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunResult {
    Completed(TicketOutcome),
    Failed,
    /// Stopped by shutdown with no release call outstanding.
    Halted,
    /// The journal record was already terminal.
    AlreadyTerminal,
    /// Another pipeline holds the ticket.
    Busy,
}

/// Why a pipeline stopped before reaching `Updated`.
#[derive(Debug)]
struct Failure {
    stage: Stage,
    kind: ErrorKind,
    detail: String,
    release_confirmed: bool,
    release_in_doubt: bool,
    guid: Option<String>,
}

impl Failure {
    fn new(stage: Stage, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            detail: detail.into(),
            release_confirmed: false,
            release_in_doubt: false,
            guid: None,
        }
    }

    fn journal(stage: Stage, e: StoreError) -> Self {
        Self::new(stage, ErrorKind::JournalError, format!("progress journal: {}", e))
    }

    fn with_guid(mut self, guid: &str) -> Self {
        self.guid = Some(guid.to_string());
        self
    }

    fn confirmed(mut self) -> Self {
        self.release_confirmed = true;
        self
    }

    /// The last release call may have released the message.
    fn in_doubt(mut self) -> Self {
        self.release_in_doubt = true;
        self
    }
}

/// Control flow between pipeline stages.
enum Step {
    Next(WorkflowState),
    Halt,
}

/// Removes a ticket from the in-flight set when its pipeline ends.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    ticket_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.ticket_id);
        }
    }
}

/// The workflow engine: polls the ticket queue and runs ticket pipelines.
pub struct WorkflowEngine {
    config: EngineConfig,
    policy: JustificationPolicy,
    alerts: AlertTarget,
    store: Arc<dyn ProgressStore>,
    services: Collaborators,
    audit: Option<AuditHandle>,

    // Runtime state
    running: AtomicBool,
    shutting_down: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    in_flight: Mutex<HashSet<String>>,
    /// Serialises poll cycles from the loop and from manual triggers.
    cycle_lock: tokio::sync::Mutex<()>,
    last_poll: RwLock<Option<(DateTime<Utc>, PollSummary)>>,
    loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkflowEngine {
    /// Create a new engine.
    pub fn new(
        config: EngineConfig,
        policy: JustificationPolicy,
        alerts: AlertTarget,
        store: Arc<dyn ProgressStore>,
        services: Collaborators,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            policy,
            alerts,
            store,
            services,
            audit: None,
            running: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
            in_flight: Mutex::new(HashSet::new()),
            cycle_lock: tokio::sync::Mutex::new(()),
            last_poll: RwLock::new(None),
            loop_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Emit audit events through this handle.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start the poll loop: one cycle right away, then every poll interval.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Workflow engine already running");
            return;
        }
        self.shutting_down.store(false, Ordering::SeqCst);

        info!(
            poll_interval_secs = self.config.poll_interval_seconds,
            max_concurrent = self.config.max_concurrent_tickets,
            "Starting workflow engine"
        );

        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            info!("Poll loop started");
            let mut interval = tokio::time::interval(engine.config.poll_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Poll loop received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if !engine.running.load(Ordering::Relaxed) {
                            break;
                        }
                        let summary = engine.run_once().await;
                        debug!(
                            polled = summary.polled,
                            processed = summary.processed,
                            failed = summary.failed,
                            "Poll cycle finished"
                        );
                    }
                }
            }
            info!("Poll loop stopped");
        });

        *self.loop_handle.lock().await = Some(handle);
    }

    /// Stop gracefully.
    ///
    /// Pipelines halt before starting a release call; a release call already
    /// in flight is finished along with its ticket update. Pipelines waiting
    /// to retry a failed release roll back to `Justified` and halt. Returns
    /// once the running cycle has finished.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        if was_running {
            info!("Stopping workflow engine");
        }

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Poll loop task failed: {}", e);
            }
        }

        // Waits out a manually triggered cycle.
        let _cycle = self.cycle_lock.lock().await;

        if was_running {
            info!("Workflow engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Current engine status.
    pub async fn status(&self) -> EngineStatus {
        let journal = match self.store.counts_by_state() {
            Ok(counts) => counts,
            Err(e) => {
                warn!("Failed to count journal records: {}", e);
                Default::default()
            }
        };
        let last_poll = self.last_poll.read().await.clone();

        EngineStatus {
            running: self.is_running(),
            in_flight: self.in_flight_count(),
            last_poll_at: last_poll.as_ref().map(|(at, _)| *at),
            last_poll: last_poll.map(|(_, summary)| summary),
            journal,
        }
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }

    fn is_in_flight(&self, ticket_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(ticket_id))
            .unwrap_or(false)
    }

    fn claim(&self, ticket_id: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(ticket_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: &self.in_flight,
            ticket_id: ticket_id.to_string(),
        })
    }

    /// Reopen a failed ticket; the next cycle that sees it resumes its pipeline.
    pub async fn retry_ticket(
        &self,
        ticket_id: &str,
        actor: &str,
    ) -> Result<ProgressRecord, EngineError> {
        if self.is_in_flight(ticket_id) {
            return Err(EngineError::TicketBusy(ticket_id.to_string()));
        }

        let record = self
            .store
            .get(ticket_id)?
            .ok_or_else(|| EngineError::TicketNotFound(ticket_id.to_string()))?;

        if !matches!(record.state, WorkflowState::Failed { .. }) {
            return Err(EngineError::InvalidState {
                expected: "failed".to_string(),
                actual: record.state.state_type().to_string(),
            });
        }

        let reset = self.store.reset_for_retry(ticket_id)?;

        info!(
            ticket_id = %ticket_id,
            actor = %actor,
            resume_state = reset.state.state_type(),
            "Ticket reset for retry"
        );
        self.emit(AuditEvent::TicketRetryRequested {
            ticket_id: ticket_id.to_string(),
            requested_by: actor.to_string(),
            previous_state: record.state.state_type().to_string(),
            resume_state: reset.state.state_type().to_string(),
        })
        .await;

        Ok(reset)
    }

    // =========================================================================
    // Poll cycle
    // =========================================================================

    /// Run one poll cycle and wait for every pipeline it started.
    pub async fn run_once(self: &Arc<Self>) -> PollSummary {
        let _cycle = self.cycle_lock.lock().await;
        let mut summary = PollSummary::default();

        let source = Arc::clone(&self.services.source);
        let polled = self
            .with_retry(Stage::Polling, self.config.timeouts.poll(), || source.poll())
            .await;

        let tickets = match polled {
            Ok(tickets) => tickets,
            Err(detail) => {
                metrics::POLL_CYCLES.with_label_values(&["failed"]).inc();
                error!(source = source.name(), "Ticket poll failed: {}", detail);
                summary.poll_failed = true;
                self.report(FailureEvent::for_poll(ErrorKind::SourceUnavailable, detail))
                    .await;
                self.record_poll(&summary).await;
                return summary;
            }
        };
        metrics::POLL_CYCLES.with_label_values(&["ok"]).inc();

        let mut seen = HashSet::new();
        let tickets: Vec<Ticket> = tickets
            .into_iter()
            .filter(|t| seen.insert(t.id.clone()))
            .collect();
        summary.polled = tickets.len();
        metrics::TICKETS_POLLED.inc_by(tickets.len() as u64);

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tickets.max(1)));
        let mut pipelines = JoinSet::new();
        let mut dispatched = 0;

        for ticket in tickets {
            if self.is_shutting_down() {
                info!("Shutdown requested; not starting further tickets this cycle");
                break;
            }

            match self.store.get(&ticket.id) {
                Ok(Some(record)) if record.state.is_terminal() => {
                    summary.already_terminal += 1;
                    continue;
                }
                Ok(_) => {}
                // The pipeline reports journal failures itself.
                Err(e) => warn!(ticket_id = %ticket.id, "Journal lookup failed: {}", e),
            }

            if self.is_in_flight(&ticket.id) {
                summary.in_flight += 1;
                continue;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let engine = Arc::clone(self);
            dispatched += 1;
            pipelines.spawn(async move {
                let _permit = permit;
                engine.run_pipeline(ticket).await.1
            });
        }

        while let Some(joined) = pipelines.join_next().await {
            match joined {
                Ok(result) => record_result(&mut summary, result),
                Err(e) => {
                    error!("Ticket pipeline task failed: {}", e);
                    record_result(&mut summary, RunResult::Failed);
                }
            }
        }

        info!(
            polled = summary.polled,
            processed = summary.processed,
            released = summary.released,
            rejected = summary.rejected,
            skipped = summary.skipped,
            failed = summary.failed,
            halted = summary.halted,
            "Poll cycle complete"
        );
        self.emit(AuditEvent::TicketsPolled {
            source: source.name().to_string(),
            polled: summary.polled,
            dispatched,
        })
        .await;
        self.record_poll(&summary).await;
        summary
    }

    async fn record_poll(&self, summary: &PollSummary) {
        *self.last_poll.write().await = Some((Utc::now(), summary.clone()));
    }

    // =========================================================================
    // Ticket pipeline
    // =========================================================================

    /// Run one ticket's pipeline from wherever its journal record stands.
    ///
    /// Never fails: errors end as a `Failed` record plus one notification.
    /// The returned ticket carries the resulting status.
    pub async fn process_ticket(&self, ticket: Ticket) -> Ticket {
        self.run_pipeline(ticket).await.0
    }

    async fn run_pipeline(&self, mut ticket: Ticket) -> (Ticket, RunResult) {
        let Some(_guard) = self.claim(&ticket.id) else {
            debug!(ticket_id = %ticket.id, "Ticket already in flight");
            return (ticket, RunResult::Busy);
        };

        let record = match self.store.begin(&ticket) {
            Ok(record) => record,
            Err(e) => {
                let failure = Failure::journal(Stage::Inspecting, e);
                self.fail(&mut ticket, failure).await;
                return (ticket, RunResult::Failed);
            }
        };

        ticket.status = record.status();
        if record.state.is_terminal() {
            debug!(
                ticket_id = %ticket.id,
                state = record.state.state_type(),
                "Ticket already finished"
            );
            return (ticket, RunResult::AlreadyTerminal);
        }

        let mut state = record.state;
        loop {
            let step = match &state {
                WorkflowState::New | WorkflowState::Inspecting { .. } => {
                    self.inspect_stage(&mut ticket, &state).await
                }
                WorkflowState::Justified { guid, .. } => {
                    if self.is_shutting_down() {
                        info!(
                            ticket_id = %ticket.id,
                            "Shutdown requested; halting before release"
                        );
                        Ok(Step::Halt)
                    } else {
                        self.release_stage(&mut ticket, &state, guid).await
                    }
                }
                WorkflowState::Releasing { guid, .. } => {
                    self.resume_release(&mut ticket, &state, guid).await
                }
                WorkflowState::Skipped { .. }
                | WorkflowState::Rejected { .. }
                | WorkflowState::Released { .. } => self.update_stage(&mut ticket, &state).await,
                WorkflowState::Updated { outcome, .. } => {
                    return (ticket, RunResult::Completed(*outcome));
                }
                WorkflowState::Failed { .. } => return (ticket, RunResult::Failed),
            };

            state = match step {
                Ok(Step::Next(next)) => next,
                Ok(Step::Halt) => return (ticket, RunResult::Halted),
                Err(failure) => {
                    self.fail(&mut ticket, failure).await;
                    return (ticket, RunResult::Failed);
                }
            };
        }
    }

    /// Write a state change to the journal and mirror it on the ticket.
    async fn advance(
        &self,
        ticket: &mut Ticket,
        from: &WorkflowState,
        next: WorkflowState,
        stage: Stage,
        reason: Option<String>,
    ) -> Result<WorkflowState, Failure> {
        let record = self
            .store
            .transition(&ticket.id, next)
            .map_err(|e| Failure::journal(stage, e))?;

        ticket.status = record.status();
        debug!(
            ticket_id = %ticket.id,
            from = from.state_type(),
            to = record.state.state_type(),
            "Ticket state changed"
        );
        self.emit(AuditEvent::TicketStateChanged {
            ticket_id: ticket.id.clone(),
            from_state: from.state_type().to_string(),
            to_state: record.state.state_type().to_string(),
            reason,
        })
        .await;

        Ok(record.state)
    }

    /// Inspect the attachment and evaluate the justification.
    async fn inspect_stage(
        &self,
        ticket: &mut Ticket,
        from: &WorkflowState,
    ) -> Result<Step, Failure> {
        let start = Instant::now();
        let inspecting = self
            .advance(
                ticket,
                from,
                WorkflowState::Inspecting {
                    started_at: Utc::now(),
                },
                Stage::Inspecting,
                None,
            )
            .await?;

        let inspector = Arc::clone(&self.services.inspector);
        let snapshot = ticket.clone();
        let inspection = self
            .with_retry(Stage::Inspecting, self.config.timeouts.inspect(), || {
                inspector.inspect(&snapshot)
            })
            .await
            .map_err(|detail| Failure::new(Stage::Inspecting, ErrorKind::InspectionError, detail))?;

        let next = match inspection.extracted {
            None => {
                let reason = if ticket.attachment.is_some() {
                    "attachment is not password protected"
                } else {
                    "ticket has no attachment"
                };
                WorkflowState::Skipped {
                    reason: reason.to_string(),
                }
            }
            Some(extracted) => {
                if let Some(text) = extracted.field(JustificationField::JustificationText) {
                    ticket.justification_text = Some(text.to_string());
                }
                let guid = extracted
                    .field(JustificationField::MessageGuid)
                    .map(String::from)
                    .or_else(|| ticket.message_guid.clone());
                ticket.message_guid = guid.clone();

                let decision = self.policy.evaluate(&extracted);
                let label = if decision.accepted() { "accepted" } else { "rejected" };
                metrics::JUSTIFICATION_DECISIONS
                    .with_label_values(&[label])
                    .inc();
                info!(
                    ticket_id = %ticket.id,
                    accepted = decision.accepted(),
                    reason = %decision.reason(),
                    "Justification evaluated"
                );
                self.emit(AuditEvent::JustificationEvaluated {
                    ticket_id: ticket.id.clone(),
                    accepted: decision.accepted(),
                    reason: decision.reason().to_string(),
                })
                .await;

                match (decision.accepted(), guid) {
                    (true, Some(guid)) => WorkflowState::Justified { guid, decision },
                    (true, None) => WorkflowState::Rejected {
                        decision: JustificationDecision::reject("no message GUID to release"),
                    },
                    (false, _) => WorkflowState::Rejected { decision },
                }
            }
        };

        let next = self
            .advance(ticket, &inspecting, next, Stage::Inspecting, None)
            .await?;
        observe_stage(Stage::Inspecting, start);
        Ok(Step::Next(next))
    }

    /// Issue release calls for `guid`, writing a marker before each one.
    async fn release_stage(
        &self,
        ticket: &mut Ticket,
        from: &WorkflowState,
        guid: &str,
    ) -> Result<Step, Failure> {
        let start = Instant::now();
        let max_attempts = self.config.retry_max_attempts.max(1);
        let mut current = from.clone();
        let mut attempt = 1;

        loop {
            current = self
                .advance(
                    ticket,
                    &current,
                    WorkflowState::Releasing {
                        guid: guid.to_string(),
                        attempt,
                        requested_at: Utc::now(),
                    },
                    Stage::Releasing,
                    None,
                )
                .await
                .map_err(|f| f.with_guid(guid))?;

            info!(ticket_id = %ticket.id, guid = %guid, attempt, "Requesting release");
            self.emit(AuditEvent::ReleaseRequested {
                ticket_id: ticket.id.clone(),
                guid: guid.to_string(),
                attempt,
            })
            .await;

            let error = match self.call_release(guid).await {
                Ok(()) => {
                    metrics::RELEASE_CALLS.with_label_values(&["success"]).inc();
                    let next = self.mark_released(ticket, &current, guid, false).await?;
                    observe_stage(Stage::Releasing, start);
                    return Ok(Step::Next(next));
                }
                Err(e) => e,
            };

            match &error {
                GatewayError::Rejected { code, detail } => {
                    metrics::RELEASE_CALLS.with_label_values(&["rejected"]).inc();
                    self.release_failed(ticket, guid, attempt, &error, false).await;
                    observe_stage(Stage::Releasing, start);
                    return Err(Failure::new(
                        Stage::Releasing,
                        ErrorKind::GatewayRejected,
                        format!("gateway rejected release ({}): {}", code, detail),
                    )
                    .with_guid(guid));
                }
                GatewayError::Unavailable { ambiguous: true, .. } => {
                    metrics::RELEASE_CALLS.with_label_values(&["ambiguous"]).inc();
                    warn!(
                        ticket_id = %ticket.id,
                        guid = %guid,
                        attempt,
                        "Release outcome unknown ({}); querying gateway status",
                        error
                    );
                    match self.query_release_status(guid).await {
                        Ok(GatewayReleaseStatus::Released) => {
                            let next = self.mark_released(ticket, &current, guid, true).await?;
                            observe_stage(Stage::Releasing, start);
                            return Ok(Step::Next(next));
                        }
                        Ok(GatewayReleaseStatus::Quarantined) => {
                            debug!(ticket_id = %ticket.id, "Message still quarantined");
                        }
                        Ok(GatewayReleaseStatus::Unknown) | Err(_) => {
                            self.release_failed(ticket, guid, attempt, &error, false).await;
                            observe_stage(Stage::Releasing, start);
                            return Err(Failure::new(
                                Stage::Releasing,
                                ErrorKind::ReleaseUnconfirmed,
                                format!(
                                    "release outcome unknown and gateway status could not confirm it: {}",
                                    error
                                ),
                            )
                            .with_guid(guid)
                            .in_doubt());
                        }
                    }
                }
                GatewayError::Unavailable { .. } => {
                    metrics::RELEASE_CALLS.with_label_values(&["unavailable"]).inc();
                }
            }

            let will_retry = attempt < max_attempts;
            self.release_failed(ticket, guid, attempt, &error, will_retry).await;
            if !will_retry {
                observe_stage(Stage::Releasing, start);
                return Err(Failure::new(
                    Stage::Releasing,
                    ErrorKind::GatewayUnavailable,
                    format!("release failed after {} attempts: {}", attempt, error),
                )
                .with_guid(guid));
            }

            let delay = self.config.backoff_delay(attempt);
            metrics::STAGE_RETRIES
                .with_label_values(&[Stage::Releasing.as_str()])
                .inc();
            warn!(
                ticket_id = %ticket.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Release failed ({}); retrying",
                error
            );
            if self.sleep_unless_shutdown(delay).await {
                info!(
                    ticket_id = %ticket.id,
                    guid = %guid,
                    attempt,
                    "Shutdown requested; deferring release retry"
                );
                self.defer_release(ticket, from, &current, guid).await?;
                observe_stage(Stage::Releasing, start);
                return Ok(Step::Halt);
            }
            attempt += 1;
        }
    }

    /// Sleep for `delay`, waking early on shutdown. Returns true if the
    /// engine is shutting down.
    async fn sleep_unless_shutdown(&self, delay: Duration) -> bool {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if self.is_shutting_down() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => {}
        }
        self.is_shutting_down()
    }

    /// Roll a release marker back to `Justified`. Only valid when the gateway
    /// is known to still hold the message, so the next run releases without
    /// a status query.
    async fn defer_release(
        &self,
        ticket: &mut Ticket,
        origin: &WorkflowState,
        current: &WorkflowState,
        guid: &str,
    ) -> Result<WorkflowState, Failure> {
        let decision = match origin {
            WorkflowState::Justified { decision, .. } => decision.clone(),
            _ => JustificationDecision::accept("release deferred by shutdown"),
        };
        self.advance(
            ticket,
            current,
            WorkflowState::Justified {
                guid: guid.to_string(),
                decision,
            },
            Stage::Releasing,
            Some("release deferred by shutdown".to_string()),
        )
        .await
        .map_err(|f| f.with_guid(guid))
    }

    /// A release marker was found on entry: the previous run's release call
    /// may or may not have gone through. Ask the gateway before doing anything.
    async fn resume_release(
        &self,
        ticket: &mut Ticket,
        from: &WorkflowState,
        guid: &str,
    ) -> Result<Step, Failure> {
        info!(ticket_id = %ticket.id, guid = %guid, "Found release marker; querying gateway status");

        match self.query_release_status(guid).await {
            Ok(GatewayReleaseStatus::Released) => {
                let next = self.mark_released(ticket, from, guid, true).await?;
                Ok(Step::Next(next))
            }
            Ok(GatewayReleaseStatus::Quarantined) if self.is_shutting_down() => {
                info!(
                    ticket_id = %ticket.id,
                    "Message still quarantined; shutdown requested, deferring release"
                );
                self.defer_release(ticket, from, from, guid).await?;
                Ok(Step::Halt)
            }
            Ok(GatewayReleaseStatus::Quarantined) => {
                info!(ticket_id = %ticket.id, "Message still quarantined; releasing");
                self.release_stage(ticket, from, guid).await
            }
            Ok(GatewayReleaseStatus::Unknown) => Err(Failure::new(
                Stage::Releasing,
                ErrorKind::ReleaseUnconfirmed,
                "release was attempted before and the gateway cannot report the message status",
            )
            .with_guid(guid)
            .in_doubt()),
            Err(detail) => Err(Failure::new(
                Stage::Releasing,
                ErrorKind::ReleaseUnconfirmed,
                format!(
                    "release was attempted before and the status query failed: {}",
                    detail
                ),
            )
            .with_guid(guid)
            .in_doubt()),
        }
    }

    async fn call_release(&self, guid: &str) -> Result<(), GatewayError> {
        let request = ReleaseRequest::new(guid);
        let timeout = self.config.timeouts.release();
        match tokio::time::timeout(timeout, self.services.gateway.release(&request)).await {
            Ok(Ok(result)) => result.into_outcome(),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GatewayError::ambiguous(format!(
                "release call timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn query_release_status(&self, guid: &str) -> Result<GatewayReleaseStatus, String> {
        let timeout = self.config.timeouts.release();
        let result =
            match tokio::time::timeout(timeout, self.services.gateway.release_status(guid)).await {
                Ok(Ok(status)) => Ok(status),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("status query timed out after {}s", timeout.as_secs())),
            };

        let label = match &result {
            Ok(status) => status.as_str(),
            Err(_) => "error",
        };
        metrics::RELEASE_STATUS_QUERIES
            .with_label_values(&[label])
            .inc();
        if let Err(detail) = &result {
            warn!(guid = %guid, "Release status query failed: {}", detail);
        }
        result
    }

    async fn mark_released(
        &self,
        ticket: &mut Ticket,
        from: &WorkflowState,
        guid: &str,
        via_status_query: bool,
    ) -> Result<WorkflowState, Failure> {
        info!(ticket_id = %ticket.id, guid = %guid, via_status_query, "Message released");
        self.emit(AuditEvent::ReleaseCompleted {
            ticket_id: ticket.id.clone(),
            guid: guid.to_string(),
            via_status_query,
        })
        .await;

        self.advance(
            ticket,
            from,
            WorkflowState::Released {
                guid: guid.to_string(),
                released_at: Utc::now(),
            },
            Stage::Releasing,
            None,
        )
        .await
        .map_err(|f| f.with_guid(guid).confirmed())
    }

    async fn release_failed(
        &self,
        ticket: &Ticket,
        guid: &str,
        attempt: u32,
        error: &GatewayError,
        will_retry: bool,
    ) {
        self.emit(AuditEvent::ReleaseFailed {
            ticket_id: ticket.id.clone(),
            guid: guid.to_string(),
            attempt,
            error_kind: error.kind().to_string(),
            detail: error.to_string(),
            will_retry,
        })
        .await;
    }

    /// Record the outcome on the originating ticket.
    async fn update_stage(
        &self,
        ticket: &mut Ticket,
        from: &WorkflowState,
    ) -> Result<Step, Failure> {
        let start = Instant::now();
        let (outcome, detail, released_guid) = match from {
            WorkflowState::Skipped { reason } => (
                TicketOutcome::Skipped,
                format!("No action required: {}.", reason),
                None,
            ),
            WorkflowState::Rejected { decision } => (
                TicketOutcome::Rejected,
                format!("Release not justified: {}.", decision.reason()),
                None,
            ),
            WorkflowState::Released { guid, .. } => (
                TicketOutcome::Released,
                format!("Quarantined message {} has been released.", guid),
                Some(guid.clone()),
            ),
            other => {
                return Err(Failure::new(
                    Stage::Updating,
                    ErrorKind::JournalError,
                    format!("no ticket outcome for state {}", other.state_type()),
                ))
            }
        };

        let update = TicketUpdate {
            ticket_id: ticket.id.clone(),
            kind: ticket.kind,
            outcome,
            detail: detail.clone(),
        };

        let updater = Arc::clone(&self.services.updater);
        let result = self
            .with_retry(Stage::Updating, self.config.timeouts.update(), || {
                updater.update(&update)
            })
            .await;
        observe_stage(Stage::Updating, start);

        if let Err(detail) = result {
            let failure = Failure::new(Stage::Updating, ErrorKind::UpdateFailed, detail);
            return Err(match released_guid {
                Some(guid) => failure.with_guid(&guid).confirmed(),
                None => failure,
            });
        }

        self.emit(AuditEvent::TicketUpdated {
            ticket_id: ticket.id.clone(),
            outcome: outcome.as_str().to_string(),
            detail: detail.clone(),
        })
        .await;

        let next = WorkflowState::Updated {
            outcome,
            detail,
            updated_at: Utc::now(),
        };
        let next = self
            .advance(ticket, from, next, Stage::Updating, None)
            .await
            .map_err(|f| match &released_guid {
                Some(guid) => f.with_guid(guid).confirmed(),
                None => f,
            })?;
        Ok(Step::Next(next))
    }

    // =========================================================================
    // Failure handling
    // =========================================================================

    /// Close a failure episode: journal, one notification, best-effort write-back.
    async fn fail(&self, ticket: &mut Ticket, failure: Failure) {
        error!(
            ticket_id = %ticket.id,
            stage = failure.stage.as_str(),
            error_kind = failure.kind.as_str(),
            "Ticket pipeline failed: {}",
            failure.detail
        );

        let failed = WorkflowState::Failed {
            stage: failure.stage,
            error_kind: failure.kind,
            detail: failure.detail.clone(),
            release_confirmed: failure.release_confirmed,
            guid: failure.guid.clone(),
            release_in_doubt: failure.release_in_doubt,
            failed_at: Utc::now(),
        };
        match self.store.get(&ticket.id) {
            Ok(Some(record)) if !record.state.is_terminal() => {
                if let Err(f) = self
                    .advance(
                        ticket,
                        &record.state,
                        failed,
                        failure.stage,
                        Some(failure.detail.clone()),
                    )
                    .await
                {
                    error!(ticket_id = %ticket.id, "Failed to journal failure: {}", f.detail);
                }
            }
            Ok(_) => warn!(ticket_id = %ticket.id, "No open journal record; failure not persisted"),
            Err(e) => error!(ticket_id = %ticket.id, "Failed to journal failure: {}", e),
        }
        ticket.status = TicketStatus::Failed;

        let event = FailureEvent::for_ticket(ticket, failure.stage, failure.kind, &failure.detail);
        self.report(event).await;

        if failure.stage != Stage::Updating {
            let update = TicketUpdate {
                ticket_id: ticket.id.clone(),
                kind: ticket.kind,
                outcome: TicketOutcome::Failed,
                detail: format!(
                    "Automated release failed while {}: {}",
                    failure.stage.as_str(),
                    failure.detail
                ),
            };
            let timeout = self.config.timeouts.update();
            match tokio::time::timeout(timeout, self.services.updater.update(&update)).await {
                Ok(Ok(())) => debug!(ticket_id = %ticket.id, "Failure recorded on ticket"),
                Ok(Err(e)) => warn!(ticket_id = %ticket.id, "Failed to record failure on ticket: {}", e),
                Err(_) => warn!(ticket_id = %ticket.id, "Recording failure on ticket timed out"),
            }
        }
    }

    /// Send exactly one notification for a failure episode. Never fails.
    async fn report(&self, event: FailureEvent) {
        let notification = Notification::for_failure(
            &event,
            self.alerts.distribution_list.clone(),
            &self.alerts.subject_prefix,
        );

        let timeout = self.config.timeouts.notify();
        let delivered =
            match tokio::time::timeout(timeout, self.services.notifier.notify(&notification)).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!(episode = %event.episode_id, "Failure notification not sent: {}", e);
                    false
                }
                Err(_) => {
                    error!(episode = %event.episode_id, "Failure notification timed out");
                    false
                }
            };

        let label = if delivered { "sent" } else { "failed" };
        metrics::NOTIFICATIONS.with_label_values(&[label]).inc();
        self.emit(AuditEvent::FailureNotified {
            ticket_id: event.ticket_id.clone(),
            episode_id: event.episode_id.to_string(),
            stage: event.stage.as_str().to_string(),
            error_kind: event.error_kind.as_str().to_string(),
            delivered,
        })
        .await;
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Run `op` with a per-attempt timeout, retrying with exponential backoff.
    ///
    /// Returns the last error's description once the attempts are used up.
    async fn with_retry<T, E, F, Fut>(
        &self,
        stage: Stage,
        timeout: Duration,
        mut op: F,
    ) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.config.retry_max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let detail = match tokio::time::timeout(timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("{} timed out after {}s", stage.as_str(), timeout.as_secs()),
            };

            if attempt >= max_attempts {
                return Err(if max_attempts > 1 {
                    format!("{} (after {} attempts)", detail, attempt)
                } else {
                    detail
                });
            }

            let delay = self.config.backoff_delay(attempt);
            metrics::STAGE_RETRIES
                .with_label_values(&[stage.as_str()])
                .inc();
            warn!(
                stage = stage.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Transient failure: {}; retrying",
                detail
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }
}

fn observe_stage(stage: Stage, start: Instant) {
    metrics::STAGE_DURATION
        .with_label_values(&[stage.as_str()])
        .observe(start.elapsed().as_secs_f64());
}

fn record_result(summary: &mut PollSummary, result: RunResult) {
    let label = match result {
        RunResult::Completed(outcome) => {
            summary.processed += 1;
            match outcome {
                TicketOutcome::Released => summary.released += 1,
                TicketOutcome::Rejected => summary.rejected += 1,
                TicketOutcome::Skipped => summary.skipped += 1,
                TicketOutcome::Failed => summary.failed += 1,
            }
            outcome.as_str()
        }
        RunResult::Failed => {
            summary.processed += 1;
            summary.failed += 1;
            "failed"
        }
        RunResult::Halted => {
            summary.processed += 1;
            summary.halted += 1;
            "halted"
        }
        RunResult::AlreadyTerminal => {
            summary.already_terminal += 1;
            return;
        }
        RunResult::Busy => {
            summary.in_flight += 1;
            return;
        }
    };
    metrics::TICKETS_PROCESSED.with_label_values(&[label]).inc();
}
