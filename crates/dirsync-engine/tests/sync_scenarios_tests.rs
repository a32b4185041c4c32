//! End-to-end synchronization scenarios over a two-source chain.
//!
//! Source "A" has precedence 0 and outranks source "B" (precedence 1).

mod common;

use std::sync::Arc;

use common::{directory, future, test_config, user, user_with_email, Harness, ScriptedDirectory};
use dirsync_core::{PrincipalKind, SourceId};
use dirsync_directory::RemoteRecord;
use dirsync_engine::{init_test_logging, OnDemandOutcome, RunState, Source, SourceStatus, SyncConfig};

fn two_sources(
    a: Arc<ScriptedDirectory>,
    b: Arc<ScriptedDirectory>,
    config: SyncConfig,
) -> Harness {
    init_test_logging();
    Harness::new(
        vec![(Source::new("A", 0), a), (Source::new("B", 1), b)],
        config,
    )
}

fn email(principal: &dirsync_engine::Principal) -> Option<&str> {
    principal.attributes.get("email").and_then(|v| v.as_str())
}

// =============================================================================
// Full synchronization
// =============================================================================

#[tokio::test]
async fn test_full_sync_higher_precedence_wins_collision() {
    let a = directory("A", vec![user_with_email("jdoe", "a@x", 1)]);
    let b = directory(
        "B",
        vec![user_with_email("jdoe", "b@y", 2), user("asmith", 2)],
    );
    let h = two_sources(a, b, test_config());

    let run = h.orchestrator.full(h.tenant).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    let jdoe = h.user("jdoe").await.unwrap();
    assert_eq!(email(&jdoe), Some("a@x"));
    assert_eq!(jdoe.owner_source_id, SourceId::new("A"));
    let asmith = h.user("asmith").await.unwrap();
    assert_eq!(asmith.owner_source_id, SourceId::new("B"));

    let b_stats = run.statistics.source(&SourceId::new("B"));
    assert_eq!(b_stats.collisions_ignored, 1);
    assert_eq!(b_stats.created, 1);
}

#[tokio::test]
async fn test_full_sync_restarts_cursors_at_run_start() {
    let h = two_sources(
        directory("A", vec![user("jdoe", 1)]),
        directory("B", vec![user("asmith", 2)]),
        test_config(),
    );

    let run = h.orchestrator.full(h.tenant).await.unwrap();

    assert!(run.deletions_detected);
    assert_eq!(h.cursor("A").await, Some(run.started_at));
    assert_eq!(h.cursor("B").await, Some(run.started_at));
}

#[tokio::test]
async fn test_full_sync_tombstones_principal_missing_from_owner() {
    let b = directory("B", vec![user("bob", 1), user("asmith", 1)]);
    let h = two_sources(directory("A", vec![]), b.clone(), test_config());
    h.orchestrator.full(h.tenant).await.unwrap();
    assert!(h.user("bob").await.is_some());

    b.set_records(vec![user("asmith", 1)]);
    let run = h.orchestrator.full(h.tenant).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert!(h.user("bob").await.is_none());
    assert!(h.user_row("bob").await.unwrap().tombstoned);
    assert!(h.user("asmith").await.is_some());
    assert_eq!(run.statistics.source(&SourceId::new("B")).tombstoned, 1);
}

#[tokio::test]
async fn test_failed_source_blocks_all_deletions() {
    let a = directory("A", vec![user("alice", 1)]);
    let b = directory("B", vec![user("bob", 1), user("carol", 1)]);
    let h = two_sources(a.clone(), b.clone(), test_config());
    let first = h.orchestrator.full(h.tenant).await.unwrap();

    a.set_unavailable(true);
    b.set_records(vec![user("bob", 1)]);
    let run = h.orchestrator.full(h.tenant).await.unwrap();

    assert_eq!(run.state, RunState::PartiallyFailed);
    assert_eq!(run.source_status(&SourceId::new("A")), Some(SourceStatus::Failed));
    assert_eq!(run.source_status(&SourceId::new("B")), Some(SourceStatus::Ok));
    assert!(!run.deletions_detected);
    assert!(run.source_errors.contains_key(&SourceId::new("A")));

    // Nothing is deleted anywhere, not even what B stopped reporting.
    assert!(h.user("carol").await.is_some());
    assert!(h.user("alice").await.is_some());
    assert_eq!(h.cursor("A").await, Some(first.started_at));
}

#[tokio::test]
async fn test_full_sync_is_idempotent() {
    let group = RemoteRecord::group("admins", common::ts(1))
        .with_member(dirsync_core::PrincipalRef::user("jdoe"));
    let h = two_sources(
        directory("A", vec![user_with_email("jdoe", "a@x", 1), group]),
        directory("B", vec![user_with_email("jdoe", "b@y", 1), user("asmith", 1)]),
        test_config(),
    );

    h.orchestrator.full(h.tenant).await.unwrap();
    let first = h.identities.snapshot(h.tenant).await;
    let run = h.orchestrator.full(h.tenant).await.unwrap();
    let second = h.identities.snapshot(h.tenant).await;

    assert_eq!(first, second);
    assert_eq!(run.statistics.totals().created, 0);
    assert_eq!(run.statistics.totals().tombstoned, 0);
}

#[tokio::test]
async fn test_groups_fetched_before_users() {
    let a = directory("A", vec![user("jdoe", 1)]);
    let h = two_sources(a.clone(), directory("B", vec![]), test_config());

    h.orchestrator.full(h.tenant).await.unwrap();

    let kinds: Vec<PrincipalKind> = a.requested().into_iter().map(|(kind, _)| kind).collect();
    assert_eq!(kinds, vec![PrincipalKind::Group, PrincipalKind::User]);
}

#[tokio::test]
async fn test_membership_cycle_is_pruned() {
    let g1 = RemoteRecord::group("g1", common::ts(1))
        .with_member(dirsync_core::PrincipalRef::group("g2"));
    let g2 = RemoteRecord::group("g2", common::ts(1))
        .with_member(dirsync_core::PrincipalRef::group("g1"));
    let h = two_sources(directory("A", vec![g1, g2]), directory("B", vec![]), test_config());

    let run = h.orchestrator.full(h.tenant).await.unwrap();

    assert_eq!(run.statistics.source(&SourceId::new("A")).memberships_pruned, 1);
    let g1 = h.principal(PrincipalKind::Group, "g1").await.unwrap();
    let g2 = h.principal(PrincipalKind::Group, "g2").await.unwrap();
    assert_eq!(g1.members.len() + g2.members.len(), 1);
}

// =============================================================================
// Differential synchronization
// =============================================================================

#[tokio::test]
async fn test_differential_takeover_by_higher_precedence_source() {
    let a = directory("A", vec![]);
    let b = directory("B", vec![user_with_email("jdoe", "b@y", 1)]);
    let h = two_sources(a.clone(), b.clone(), test_config());
    h.orchestrator.full(h.tenant).await.unwrap();
    assert_eq!(h.user("jdoe").await.unwrap().owner_source_id, SourceId::new("B"));

    let changed_at = future(1);
    let carol_at = future(2);
    a.set_records(vec![RemoteRecord::user("jdoe", changed_at).with_attribute("email", "a2@x")]);
    b.set_records(vec![
        user_with_email("jdoe", "b@y", 1),
        RemoteRecord::user("carol", carol_at),
    ]);
    let run = h.orchestrator.differential(h.tenant).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    let jdoe = h.user("jdoe").await.unwrap();
    assert_eq!(jdoe.owner_source_id, SourceId::new("A"));
    assert_eq!(email(&jdoe), Some("a2@x"));
    assert_eq!(run.statistics.source(&SourceId::new("A")).taken_over, 1);
    assert_eq!(run.statistics.totals().tombstoned, 0);
    assert!(!run.deletions_detected);

    assert_eq!(h.cursor("A").await, Some(changed_at));
    assert_eq!(h.cursor("B").await, Some(carol_at));
}

#[tokio::test]
async fn test_differential_passes_stored_cursor() {
    let a = directory("A", vec![user("jdoe", 1)]);
    let h = two_sources(a.clone(), directory("B", vec![]), test_config());
    let full = h.orchestrator.full(h.tenant).await.unwrap();

    h.orchestrator.differential(h.tenant).await.unwrap();

    let requested = a.requested();
    assert_eq!(requested[0].1, None);
    assert_eq!(requested.last().unwrap().1, Some(full.started_at));
}

#[tokio::test]
async fn test_differential_never_deletes() {
    let b = directory("B", vec![user("bob", 1)]);
    let h = two_sources(directory("A", vec![]), b.clone(), test_config());
    h.orchestrator.full(h.tenant).await.unwrap();

    b.set_records(vec![]);
    let run = h.orchestrator.differential(h.tenant).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert!(!run.deletions_detected);
    assert!(h.user("bob").await.is_some());
}

// =============================================================================
// On-demand synchronization
// =============================================================================

#[tokio::test]
async fn test_on_demand_unknown_identity_is_not_found() {
    let a = directory("A", vec![user("jdoe", 1)]);
    let b = directory("B", vec![user("asmith", 1)]);
    let h = two_sources(a.clone(), b.clone(), test_config());

    let outcome = h
        .orchestrator
        .ensure_principal(h.tenant, PrincipalKind::User, "newuser")
        .await
        .unwrap();

    assert_eq!(outcome, OnDemandOutcome::NotFound);
    assert!(h.identities.snapshot(h.tenant).await.is_empty());
    assert_eq!(h.cursor("A").await, None);
    assert_eq!(h.cursor("B").await, None);
    assert_eq!(a.fetch_one_calls(), 1);
    assert_eq!(b.fetch_one_calls(), 1);

    let runs = h.runs.list(h.tenant).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].state, RunState::Completed);
}

#[tokio::test]
async fn test_invalid_records_are_skipped() {
    let bad_user = user("jdoe", 1).with_member(dirsync_core::PrincipalRef::user("asmith"));
    let h = two_sources(
        directory("A", vec![bad_user, user("  ", 1), user("asmith", 1)]),
        directory("B", vec![]),
        test_config(),
    );

    let run = h.orchestrator.full(h.tenant).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.statistics.source(&SourceId::new("A")).invalid_records, 2);
    assert!(h.user("jdoe").await.is_none());
    assert!(h.user("asmith").await.is_some());
}
