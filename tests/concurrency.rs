//! Per-group serialization, racing clients and lock release on every exit
//! path.

mod common;

use std::time::Duration;

use common::*;
use groupv2::{GroupChangeFailureReason, GroupStore, Role};
use tokio::time::timeout;

#[tokio::test]
async fn test_racing_clients_one_wins_one_conflicts() {
    let server = TestGroupServer::new();
    let alice = client(&server, aci(1));
    let bob = client(&server, aci(2));
    let group_id = seed_group(
        &server,
        MASTER_KEY,
        group_at(7, vec![member(1, Role::Administrator), member(2, Role::Administrator)]),
        &[&alice, &bob],
    );

    let mut a = alice.editor.edit(group_id).await.unwrap();
    a.set_title("Alice's title");
    let mut b = bob.editor.edit(group_id).await.unwrap();
    b.set_title("Bob's title");

    let (ra, rb) = tokio::join!(a.commit(), b.commit());

    let (winner, loser) = match (ra, rb) {
        (Ok(w), Err(l)) => (w, l),
        (Err(l), Ok(w)) => (w, l),
        (ra, rb) => panic!("expected exactly one winner: {:?} / {:?}", ra, rb),
    };
    assert_eq!(winner.revision(), 8);
    assert_eq!(loser.reason(), GroupChangeFailureReason::LocalRevisionMismatch);
    assert!(loser.is_retryable());

    // The loser never wrote anything.
    let revisions = [
        alice.store.get(&group_id).unwrap().unwrap().revision(),
        bob.store.get(&group_id).unwrap().unwrap().revision(),
    ];
    assert!(revisions.contains(&8));
    assert!(revisions.contains(&7));
    assert_eq!(server.group(&group_id).unwrap().revision, 8);
    assert_eq!(server.calls(), 2);
}

#[tokio::test]
async fn test_conflict_then_refetch_then_new_session() {
    let server = TestGroupServer::new();
    let alice = client(&server, aci(1));
    let bob = client(&server, aci(2));
    let group_id = seed_group(
        &server,
        MASTER_KEY,
        group_at(1, vec![member(1, Role::Administrator), member(2, Role::Administrator)]),
        &[&alice, &bob],
    );

    let mut session = bob.editor.edit(group_id).await.unwrap();
    session.set_title("Bob first");
    session.commit().await.unwrap();

    let mut session = alice.editor.edit(group_id).await.unwrap();
    session.set_description("Alice second");
    let err = session.commit().await.unwrap_err();
    assert_eq!(err.reason(), GroupChangeFailureReason::LocalRevisionMismatch);

    for change in server.changes_since(&group_id, 1) {
        alice.editor.apply_remote_change(&group_id, &change).unwrap();
    }
    let mut session = alice.editor.edit(group_id).await.unwrap();
    session.set_description("Alice second");
    let outcome = session.commit().await.unwrap();

    assert_eq!(outcome.revision(), 3);
    assert_eq!(outcome.group().title, "Bob first");
    assert_eq!(outcome.group().description, "Alice second");
}

#[tokio::test]
async fn test_sessions_on_same_group_are_serialized() {
    let server = TestGroupServer::new();
    server.set_delay(Duration::from_millis(30));
    let me = client(&server, aci(1));
    let group_id = seed_group(
        &server,
        MASTER_KEY,
        group_at(1, vec![member(1, Role::Administrator)]),
        &[&me],
    );

    let tasks: Vec<_> = (0..3)
        .map(|i| {
            let editor = me.editor.clone();
            tokio::spawn(async move {
                let mut session = editor.edit(group_id).await.unwrap();
                session.set_title(format!("Title {}", i));
                session.commit().await
            })
        })
        .collect();

    let mut revisions = Vec::new();
    for task in tasks {
        revisions.push(task.await.unwrap().unwrap().revision());
    }
    revisions.sort_unstable();

    // Each session saw the previous one's result, so none conflicted.
    assert_eq!(revisions, vec![2, 3, 4]);
    assert_eq!(server.calls(), 3);
}

#[tokio::test]
async fn test_unrelated_group_not_blocked() {
    let server = TestGroupServer::new();
    let me = client(&server, aci(1));
    let first = seed_group(
        &server,
        MASTER_KEY,
        group_at(1, vec![member(1, Role::Administrator)]),
        &[&me],
    );
    let second = seed_group(
        &server,
        OTHER_MASTER_KEY,
        group_at(1, vec![member(1, Role::Administrator)]),
        &[&me],
    );

    let _held = me.editor.edit(first).await.unwrap();

    let mut session = timeout(Duration::from_millis(500), me.editor.edit(second))
        .await
        .expect("second group must not wait")
        .unwrap();
    session.set_title("Independent");
    assert_eq!(session.commit().await.unwrap().revision(), 2);
}

#[tokio::test]
async fn test_panic_while_recording_releases_lock() {
    let server = TestGroupServer::new();
    let me = client(&server, aci(1));
    let group_id = seed_group(
        &server,
        MASTER_KEY,
        group_at(1, vec![member(1, Role::Administrator)]),
        &[&me],
    );

    let editor = me.editor.clone();
    let result = tokio::spawn(async move {
        let mut session = editor.edit(group_id).await.unwrap();
        session.set_title("never sent");
        panic!("caller bug while recording intents");
    })
    .await;
    assert!(result.unwrap_err().is_panic());

    let mut session = timeout(Duration::from_millis(500), me.editor.edit(group_id))
        .await
        .expect("lock must be released after panic")
        .unwrap();
    session.set_title("after panic");
    assert_eq!(session.commit().await.unwrap().revision(), 2);
    assert_eq!(server.calls(), 1);
}

#[tokio::test]
async fn test_cancelled_commit_releases_lock() {
    let server = TestGroupServer::new();
    server.set_delay(Duration::from_secs(60));
    let me = client(&server, aci(1));
    let group_id = seed_group(
        &server,
        MASTER_KEY,
        group_at(1, vec![member(1, Role::Administrator)]),
        &[&me],
    );

    let mut session = me.editor.edit(group_id).await.unwrap();
    session.set_title("in flight");
    let cancelled = timeout(Duration::from_millis(50), session.commit()).await;
    assert!(cancelled.is_err());

    let relock = timeout(Duration::from_millis(500), me.editor.edit(group_id)).await;
    assert!(relock.is_ok());
    assert_eq!(me.store.get(&group_id).unwrap().unwrap().revision(), 1);
}

#[tokio::test]
async fn test_join_request_side_channel_shares_lock() {
    let server = TestGroupServer::new();
    let me = client(&server, aci(1));
    let group_id = seed_group(
        &server,
        MASTER_KEY,
        group_at(1, vec![member(1, Role::Administrator)]),
        &[&me],
    );

    let guard = me.editor.lock(group_id).await;
    assert!(me.editor.locks().is_locked(&group_id));
    let blocked = timeout(Duration::from_millis(50), me.editor.edit(group_id)).await;
    assert!(blocked.is_err());

    drop(guard);
    assert!(timeout(Duration::from_millis(500), me.editor.edit(group_id)).await.is_ok());
}

#[tokio::test]
async fn test_remote_change_mid_session_is_picked_up() {
    let server = TestGroupServer::new();
    let alice = client(&server, aci(1));
    let bob = client(&server, aci(2));
    let group_id = seed_group(
        &server,
        MASTER_KEY,
        group_at(3, vec![member(1, Role::Administrator), member(2, Role::Administrator)]),
        &[&alice, &bob],
    );

    // Alice's session is open while Bob's change lands on the server and is
    // pushed to Alice outside the edit lock.
    let mut session = alice.editor.edit(group_id).await.unwrap();
    session.set_title("Alice");

    let mut bobs = bob.editor.edit(group_id).await.unwrap();
    bobs.set_disappearing_timer(3600);
    bobs.commit().await.unwrap();

    let pushed = server.changes_since(&group_id, 3);
    assert!(alice.editor.apply_remote_change(&group_id, &pushed[0]).unwrap().is_applied());

    // The session reads the store at commit time, so it proposes on top of
    // the pushed revision and lands cleanly.
    let outcome = session.commit().await.unwrap();
    assert_eq!(outcome.revision(), 5);
    assert_eq!(outcome.group().disappearing_message_timer_seconds, 3600);
}
