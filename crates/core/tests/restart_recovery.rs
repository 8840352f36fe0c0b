//! Restart, resume and operator retry integration tests.
//!
//! Each test seeds the progress journal as a crashed process would have left
//! it, then checks that a fresh engine resumes without a duplicate release.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use qrelease_core::{
    engine::{EngineConfig, EngineError, ErrorKind, Stage},
    gateway::GatewayError,
    policy::JustificationDecision,
    progress::{ProgressStore, SqliteProgressStore, WorkflowState},
    testing::{fixtures, MockRelease, MockServices, MockStatusMode},
    ticket::{Ticket, TicketOutcome, TicketStatus},
};

fn inspecting() -> WorkflowState {
    WorkflowState::Inspecting {
        started_at: Utc::now(),
    }
}

fn justified(guid: &str) -> WorkflowState {
    WorkflowState::Justified {
        guid: guid.to_string(),
        decision: JustificationDecision::accept("justification accepted"),
    }
}

fn releasing(guid: &str) -> WorkflowState {
    WorkflowState::Releasing {
        guid: guid.to_string(),
        attempt: 1,
        requested_at: Utc::now(),
    }
}

fn released(guid: &str) -> WorkflowState {
    WorkflowState::Released {
        guid: guid.to_string(),
        released_at: Utc::now(),
    }
}

/// Walk a fresh journal record through `states`.
fn seed(store: &dyn ProgressStore, ticket: &Ticket, states: Vec<WorkflowState>) {
    store.begin(ticket).expect("Failed to begin record");
    for state in states {
        store
            .transition(&ticket.id, state)
            .expect("Failed to seed journal");
    }
}

fn in_memory() -> Arc<SqliteProgressStore> {
    Arc::new(SqliteProgressStore::in_memory().expect("Failed to create store"))
}

/// Backoff long enough that a shutdown lands between release attempts.
fn slow_backoff_config() -> EngineConfig {
    EngineConfig {
        retry_backoff_base_seconds: 10.0,
        retry_backoff_max_seconds: 60.0,
        ..fixtures::fast_engine_config()
    }
}

#[tokio::test]
async fn test_crash_between_release_and_update_resumes_at_update() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("progress.db");
    let ticket = fixtures::protected_ticket("INC100", "guid-100");

    {
        let store = SqliteProgressStore::new(&db_path).expect("Failed to create store");
        seed(
            &store,
            &ticket,
            vec![
                inspecting(),
                justified("guid-100"),
                releasing("guid-100"),
                released("guid-100"),
            ],
        );
    }

    let mocks = MockServices::new();
    mocks.gateway.mark_released("guid-100").await;
    let store = Arc::new(SqliteProgressStore::new(&db_path).expect("Failed to reopen store"));
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);

    let result = engine.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Released);
    assert!(mocks.gateway.releases().await.is_empty());
    assert_eq!(mocks.gateway.status_query_count("guid-100").await, 0);

    let updates = mocks.updater.updates_for("INC100").await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].outcome, TicketOutcome::Released);
}

#[tokio::test]
async fn test_release_marker_with_released_message_is_not_released_again() {
    let store = in_memory();
    let ticket = fixtures::protected_ticket("INC101", "guid-101");
    seed(
        store.as_ref(),
        &ticket,
        vec![inspecting(), justified("guid-101"), releasing("guid-101")],
    );

    let mocks = MockServices::new();
    mocks.gateway.mark_released("guid-101").await;
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);

    let result = engine.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Released);
    assert_eq!(mocks.gateway.status_query_count("guid-101").await, 1);
    assert_eq!(mocks.gateway.release_count("guid-101").await, 0);
    assert_eq!(mocks.notifier.count().await, 0);
}

#[tokio::test]
async fn test_release_marker_with_quarantined_message_releases_once() {
    let store = in_memory();
    let ticket = fixtures::protected_ticket("INC102", "guid-102");
    seed(
        store.as_ref(),
        &ticket,
        vec![inspecting(), justified("guid-102"), releasing("guid-102")],
    );

    let mocks = MockServices::new();
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);

    let result = engine.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Released);
    assert_eq!(mocks.gateway.status_query_count("guid-102").await, 1);
    assert_eq!(mocks.gateway.release_count("guid-102").await, 1);

    let record = store.get("INC102").unwrap().unwrap();
    assert_eq!(record.release_attempts, 2);
}

#[tokio::test]
async fn test_release_marker_without_status_support_escalates() {
    let store = in_memory();
    let ticket = fixtures::protected_ticket("INC103", "guid-103");
    seed(
        store.as_ref(),
        &ticket,
        vec![inspecting(), justified("guid-103"), releasing("guid-103")],
    );

    let mocks = MockServices::new();
    mocks
        .gateway
        .set_status_mode(MockStatusMode::Unsupported)
        .await;
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);

    let result = engine.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Failed);
    assert!(mocks.gateway.releases().await.is_empty());
    assert_eq!(mocks.notifier.count().await, 1);

    match store.get("INC103").unwrap().unwrap().state {
        WorkflowState::Failed {
            stage,
            error_kind,
            guid,
            release_confirmed,
            release_in_doubt,
            ..
        } => {
            assert_eq!(stage, Stage::Releasing);
            assert_eq!(error_kind, ErrorKind::ReleaseUnconfirmed);
            assert_eq!(guid.as_deref(), Some("guid-103"));
            assert!(!release_confirmed);
            assert!(release_in_doubt);
        }
        other => panic!("Expected failed state, got {:?}", other),
    }
}

#[tokio::test]
async fn test_interrupted_inspection_starts_over() {
    let store = in_memory();
    let ticket = fixtures::protected_ticket("INC104", "guid-104");
    seed(store.as_ref(), &ticket, vec![inspecting()]);

    let mocks = MockServices::new();
    mocks
        .inspector
        .set_protected(
            "INC104",
            fixtures::extracted("alice", fixtures::APPROVED_CODE, "guid-104"),
        )
        .await;
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);

    let result = engine.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Released);
    assert_eq!(mocks.inspector.call_count("INC104").await, 1);
    assert_eq!(mocks.gateway.release_count("guid-104").await, 1);
}

#[tokio::test]
async fn test_retry_after_update_failure_skips_release() {
    let store = in_memory();
    let mocks = MockServices::new();
    mocks
        .inspector
        .set_protected(
            "INC105",
            fixtures::extracted("alice", fixtures::APPROVED_CODE, "guid-105"),
        )
        .await;
    mocks.updater.set_always_fail(true).await;
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);
    let ticket = fixtures::protected_ticket("INC105", "guid-105");

    let first = engine.process_ticket(ticket.clone()).await;
    assert_eq!(first.status, TicketStatus::Failed);
    assert_eq!(mocks.gateway.release_count("guid-105").await, 1);

    let reset = engine
        .retry_ticket("INC105", "operator")
        .await
        .expect("Retry should be accepted");
    assert!(matches!(reset.state, WorkflowState::Released { .. }));

    mocks.updater.set_always_fail(false).await;
    let second = engine.process_ticket(ticket).await;

    assert_eq!(second.status, TicketStatus::Released);
    assert_eq!(mocks.gateway.release_count("guid-105").await, 1);
    assert_eq!(mocks.updater.updates_for("INC105").await.len(), 1);
    // One notification for the one failure episode.
    assert_eq!(mocks.notifier.count().await, 1);
}

#[tokio::test]
async fn test_retry_after_gateway_rejection_releases_without_status_query() {
    let store = in_memory();
    let mocks = MockServices::new();
    mocks
        .inspector
        .set_protected(
            "INC106",
            fixtures::extracted("alice", fixtures::APPROVED_CODE, "guid-106"),
        )
        .await;
    mocks
        .gateway
        .script(vec![MockRelease::Failure {
            code: "POLICY_BLOCKED".to_string(),
            detail: "message held by policy".to_string(),
        }])
        .await;
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);
    let ticket = fixtures::protected_ticket("INC106", "guid-106");

    assert_eq!(
        engine.process_ticket(ticket.clone()).await.status,
        TicketStatus::Failed
    );

    match store.get("INC106").unwrap().unwrap().state {
        WorkflowState::Failed {
            error_kind,
            release_in_doubt,
            ..
        } => {
            assert_eq!(error_kind, ErrorKind::GatewayRejected);
            assert!(!release_in_doubt);
        }
        other => panic!("Expected failed state, got {:?}", other),
    }

    let reset = engine.retry_ticket("INC106", "operator").await.unwrap();
    assert!(matches!(reset.state, WorkflowState::Justified { ref guid, .. } if guid == "guid-106"));

    let result = engine.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Released);
    assert_eq!(mocks.gateway.status_query_count("guid-106").await, 0);
    assert_eq!(mocks.gateway.release_count("guid-106").await, 2);
    assert_eq!(mocks.gateway.effective_release_count("guid-106").await, 1);
}

#[tokio::test]
async fn test_retry_after_rejection_works_without_status_support() {
    let store = in_memory();
    let mocks = MockServices::new();
    mocks
        .inspector
        .set_protected(
            "INC110",
            fixtures::extracted("alice", fixtures::APPROVED_CODE, "guid-110"),
        )
        .await;
    mocks
        .gateway
        .set_status_mode(MockStatusMode::Unsupported)
        .await;
    mocks
        .gateway
        .script(vec![MockRelease::Failure {
            code: "POLICY_BLOCKED".to_string(),
            detail: "message held by policy".to_string(),
        }])
        .await;
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);
    let ticket = fixtures::protected_ticket("INC110", "guid-110");

    assert_eq!(
        engine.process_ticket(ticket.clone()).await.status,
        TicketStatus::Failed
    );
    engine.retry_ticket("INC110", "operator").await.unwrap();

    let result = engine.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Released);
    assert_eq!(mocks.gateway.status_query_count("guid-110").await, 0);
    assert_eq!(mocks.gateway.effective_release_count("guid-110").await, 1);
    assert_eq!(mocks.notifier.count().await, 1);
}

#[tokio::test]
async fn test_retry_after_unconfirmed_release_checks_status_first() {
    let store = in_memory();
    let ticket = fixtures::protected_ticket("INC111", "guid-111");
    seed(
        store.as_ref(),
        &ticket,
        vec![inspecting(), justified("guid-111"), releasing("guid-111")],
    );

    let mocks = MockServices::new();
    mocks.gateway.set_status_mode(MockStatusMode::Failing).await;
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);
    assert_eq!(
        engine.process_ticket(ticket.clone()).await.status,
        TicketStatus::Failed
    );

    let reset = engine.retry_ticket("INC111", "operator").await.unwrap();
    assert!(matches!(reset.state, WorkflowState::Releasing { attempt: 0, .. }));

    mocks.gateway.set_status_mode(MockStatusMode::Truthful).await;
    let result = engine.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Released);
    assert_eq!(mocks.gateway.status_query_count("guid-111").await, 2);
    assert_eq!(mocks.gateway.release_count("guid-111").await, 1);
}

#[tokio::test]
async fn test_retried_ticket_is_picked_up_by_next_poll() {
    let store = in_memory();
    let mocks = MockServices::new();
    for _ in 0..3 {
        mocks
            .inspector
            .fail_next(
                "INC107",
                qrelease_core::inspector::InspectionError::Timeout,
            )
            .await;
    }
    mocks
        .source
        .set_tickets(vec![fixtures::protected_ticket("INC107", "guid-107")])
        .await;
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);

    assert_eq!(engine.run_once().await.failed, 1);
    assert_eq!(engine.run_once().await.already_terminal, 1);

    let reset = engine.retry_ticket("INC107", "operator").await.unwrap();
    assert_eq!(reset.state, WorkflowState::New);

    let summary = engine.run_once().await;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn test_retry_rejects_unknown_and_unfinished_tickets() {
    let store = in_memory();
    let ticket = fixtures::protected_ticket("INC108", "guid-108");
    seed(store.as_ref(), &ticket, vec![inspecting()]);

    let mocks = MockServices::new();
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);

    assert!(matches!(
        engine.retry_ticket("INC999", "operator").await,
        Err(EngineError::TicketNotFound(_))
    ));
    match engine.retry_ticket("INC108", "operator").await {
        Err(EngineError::InvalidState { expected, actual }) => {
            assert_eq!(expected, "failed");
            assert_eq!(actual, "inspecting");
        }
        other => panic!("Expected invalid state, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_halts_before_release_and_resumes_later() {
    let store = in_memory();
    let mocks = MockServices::new();
    mocks
        .inspector
        .set_protected(
            "INC109",
            fixtures::extracted("alice", fixtures::APPROVED_CODE, "guid-109"),
        )
        .await;
    let ticket = fixtures::protected_ticket("INC109", "guid-109");

    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);
    engine.stop().await;
    let halted = engine.process_ticket(ticket.clone()).await;

    assert_eq!(halted.status, TicketStatus::Justified);
    assert!(mocks.gateway.releases().await.is_empty());
    assert!(matches!(
        store.get("INC109").unwrap().unwrap().state,
        WorkflowState::Justified { .. }
    ));

    let restarted = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);
    let result = restarted.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Released);
    assert_eq!(mocks.gateway.release_count("guid-109").await, 1);
    // Inspection is not repeated.
    assert_eq!(mocks.inspector.call_count("INC109").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_release_backoff_defers_retry() {
    let store = in_memory();
    let mocks = MockServices::new();
    mocks
        .inspector
        .set_protected(
            "INC112",
            fixtures::extracted("alice", fixtures::APPROVED_CODE, "guid-112"),
        )
        .await;
    mocks
        .gateway
        .script(vec![
            MockRelease::Error(GatewayError::unavailable("503")),
            MockRelease::Released,
        ])
        .await;
    let ticket = fixtures::protected_ticket("INC112", "guid-112");

    let engine = mocks.engine_with(
        slow_backoff_config(),
        Arc::clone(&store) as Arc<dyn ProgressStore>,
    );
    let pipeline = {
        let engine = Arc::clone(&engine);
        let ticket = ticket.clone();
        tokio::spawn(async move { engine.process_ticket(ticket).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    let stop_started = tokio::time::Instant::now();
    engine.stop().await;
    let halted = pipeline.await.expect("Pipeline task panicked");

    assert!(stop_started.elapsed() < Duration::from_secs(10));
    assert_eq!(halted.status, TicketStatus::Justified);
    assert_eq!(mocks.gateway.release_count("guid-112").await, 1);
    assert!(!mocks.gateway.is_released("guid-112").await);
    assert!(matches!(
        store.get("INC112").unwrap().unwrap().state,
        WorkflowState::Justified { .. }
    ));
    assert_eq!(mocks.notifier.count().await, 0);

    let restarted = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);
    let result = restarted.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Released);
    assert_eq!(mocks.gateway.release_count("guid-112").await, 2);
    assert_eq!(mocks.gateway.status_query_count("guid-112").await, 0);
    assert_eq!(mocks.gateway.effective_release_count("guid-112").await, 1);
}

#[tokio::test]
async fn test_shutdown_defers_resumed_release_of_quarantined_message() {
    let store = in_memory();
    let ticket = fixtures::protected_ticket("INC113", "guid-113");
    seed(
        store.as_ref(),
        &ticket,
        vec![inspecting(), justified("guid-113"), releasing("guid-113")],
    );

    let mocks = MockServices::new();
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);
    engine.stop().await;
    let halted = engine.process_ticket(ticket.clone()).await;

    assert_eq!(halted.status, TicketStatus::Justified);
    assert_eq!(mocks.gateway.status_query_count("guid-113").await, 1);
    assert!(mocks.gateway.releases().await.is_empty());
    assert!(matches!(
        store.get("INC113").unwrap().unwrap().state,
        WorkflowState::Justified { .. }
    ));

    let restarted = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);
    let result = restarted.process_ticket(ticket).await;

    assert_eq!(result.status, TicketStatus::Released);
    assert_eq!(mocks.gateway.status_query_count("guid-113").await, 1);
    assert_eq!(mocks.gateway.release_count("guid-113").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_release_call_finishes_update() {
    let store = in_memory();
    let mocks = MockServices::new();
    mocks
        .inspector
        .set_protected(
            "INC114",
            fixtures::extracted("alice", fixtures::APPROVED_CODE, "guid-114"),
        )
        .await;
    mocks
        .gateway
        .script(vec![MockRelease::Delayed(Duration::from_millis(500))])
        .await;
    let ticket = fixtures::protected_ticket("INC114", "guid-114");

    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);
    let pipeline = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.process_ticket(ticket).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mocks.gateway.release_count("guid-114").await, 1);
    engine.stop().await;
    let result = pipeline.await.expect("Pipeline task panicked");

    assert_eq!(result.status, TicketStatus::Released);
    assert_eq!(mocks.gateway.release_count("guid-114").await, 1);
    assert_eq!(mocks.gateway.effective_release_count("guid-114").await, 1);

    let updates = mocks.updater.updates_for("INC114").await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].outcome, TicketOutcome::Released);

    assert!(matches!(
        store.get("INC114").unwrap().unwrap().state,
        WorkflowState::Updated {
            outcome: TicketOutcome::Released,
            ..
        }
    ));
}

#[tokio::test]
async fn test_stopped_engine_dispatches_nothing() {
    let store = in_memory();
    let mocks = MockServices::new();
    mocks
        .source
        .set_tickets(vec![fixtures::ticket("INC110")])
        .await;
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);

    engine.stop().await;
    let summary = engine.run_once().await;

    assert_eq!(summary.polled, 1);
    assert_eq!(summary.processed, 0);
    assert!(store.get("INC110").unwrap().is_none());
}

#[tokio::test]
async fn test_start_and_stop_poll_loop() {
    let store = in_memory();
    let mocks = MockServices::new();
    mocks
        .source
        .set_tickets(vec![fixtures::ticket("INC111")])
        .await;
    let engine = mocks.engine(Arc::clone(&store) as Arc<dyn ProgressStore>);

    engine.start().await;
    assert!(engine.is_running());

    // The first tick fires immediately.
    let mut finished = false;
    for _ in 0..50 {
        if let Some(record) = store.get("INC111").unwrap() {
            if record.state.is_terminal() {
                finished = true;
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    engine.stop().await;

    assert!(finished, "poll loop did not process the ticket");
    assert!(!engine.is_running());
    assert!(mocks.source.poll_count().await >= 1);
}
