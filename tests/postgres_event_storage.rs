//! Integration tests for the PostgreSQL storage adapter
//!
//! These tests run against the database named by `DATABASE_URL` and are
//! skipped when it is not set. Every test uses fresh agent ids, so no cleanup
//! is needed between runs.

use agent_ledger::clock::{Clock, ManualClock};
use agent_ledger::domain::event::{EventDraft, EventType, StateMap};
use agent_ledger::domain::projection::{AGENT_STATES, TOOL_USAGE};
use agent_ledger::event_log::{EventLog, EventLogConfig, EventLogError};
use agent_ledger::infrastructure::repositories::PostgresEventStorage;
use chrono::{Duration, DurationRound, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Set up test database connection pool, or None when no database is configured
async fn setup_test_db() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL tests");
        return None;
    };

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test database");
    PostgresEventStorage::new(pool.clone())
        .migrate()
        .await
        .expect("Failed to run migrations");
    Some(pool)
}

fn setup_log(pool: PgPool) -> (EventLog, Arc<ManualClock>) {
    // Postgres keeps microseconds; truncate so round-tripped timestamps compare equal
    let start = Utc::now()
        .duration_trunc(Duration::milliseconds(1))
        .expect("truncate timestamp");
    let clock = Arc::new(ManualClock::new(start));
    let log = EventLog::new(
        Arc::new(PostgresEventStorage::new(pool)),
        clock.clone(),
        EventLogConfig::default(),
    );
    (log, clock)
}

fn agent_id() -> String {
    format!("agent-{}", Uuid::new_v4())
}

fn status_delta(status: &str) -> StateMap {
    let mut delta = StateMap::new();
    delta.insert("status".to_string(), json!(status));
    delta
}

#[tokio::test]
async fn test_append_and_read_back_events() {
    let Some(pool) = setup_test_db().await else {
        return;
    };
    let (log, clock) = setup_log(pool);
    let agent = agent_id();

    let first = log
        .emit(EventDraft::new(&agent, EventType::AgentRegistered).data(json!({ "tools": ["mailer"] })))
        .await
        .expect("emit registered");
    clock.advance(Duration::seconds(1));
    let second = log
        .emit(EventDraft::new(&agent, EventType::StateUpdated).state_delta(status_delta("idle")))
        .await
        .expect("emit state");

    let events = log.get_events(&agent, None, None).await.expect("read events");

    assert_eq!(events, vec![first.clone(), second]);
    let after_first = log
        .get_events(&agent, Some(first.timestamp()), None)
        .await
        .expect("read window");
    assert_eq!(after_first.len(), 1);
}

#[tokio::test]
async fn test_ordering_violation_is_rejected() {
    let Some(pool) = setup_test_db().await else {
        return;
    };
    let (log, clock) = setup_log(pool);
    let agent = agent_id();
    log.emit(EventDraft::new(&agent, EventType::AgentStarted))
        .await
        .expect("emit started");

    let late = EventDraft::new(&agent, EventType::AgentStopped).into_event(
        clock.now() - Duration::seconds(5),
        "1.0.0",
        "test",
    );
    let result = log.append(&late).await;

    assert!(matches!(result, Err(EventLogError::OrderingViolation { .. })));
    assert_eq!(log.get_events(&agent, None, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_projections_are_persisted() {
    let Some(pool) = setup_test_db().await else {
        return;
    };
    let (log, _) = setup_log(pool);
    let agent = agent_id();

    for tool in ["mail.send", "mail.send", "search"] {
        log.emit(EventDraft::new(&agent, EventType::ToolAccessed).data(json!({ "toolId": tool })))
            .await
            .expect("emit tool access");
    }
    log.emit(EventDraft::new(&agent, EventType::StateUpdated).state_delta(status_delta("executing")))
        .await
        .expect("emit state");

    let usage = log
        .projection(TOOL_USAGE, &agent)
        .await
        .expect("read usage")
        .expect("usage exists");
    assert_eq!(usage["total"], 3);
    assert_eq!(usage["byTool"]["mail_send"], 2);

    let states = log
        .projection(AGENT_STATES, &agent)
        .await
        .expect("read states")
        .expect("states exist");
    assert_eq!(states["status"], "executing");
}

#[tokio::test]
async fn test_snapshot_round_trip_and_reconstruction() {
    let Some(pool) = setup_test_db().await else {
        return;
    };
    let (log, clock) = setup_log(pool);
    let agent = agent_id();

    log.emit(EventDraft::new(&agent, EventType::StateUpdated).state_delta(status_delta("executing")))
        .await
        .expect("emit executing");
    let snapshot = log.create_snapshot(&agent).await.expect("snapshot");
    clock.advance(Duration::seconds(1));
    let idle = log
        .emit(EventDraft::new(&agent, EventType::StateUpdated).state_delta(status_delta("idle")))
        .await
        .expect("emit idle");

    let at_snapshot = log
        .reconstruct_state(&agent, Some(snapshot.timestamp))
        .await
        .expect("reconstruct at snapshot");
    let latest = log.reconstruct_state(&agent, None).await.expect("reconstruct latest");
    let at_idle = log
        .reconstruct_state(&agent, Some(idle.timestamp()))
        .await
        .expect("reconstruct at idle");

    assert_eq!(at_snapshot["status"], "executing");
    assert_eq!(latest["status"], "idle");
    assert_eq!(at_idle, latest);
}
