//! View-state synchronization scenarios against the in-memory backend
//!
//! Covers the observable guarantees of the synchronizer:
//!
//! - the list is shown iff a session is present,
//! - a successful create puts the confirmed row first,
//! - a deleted id is gone immediately, and restored only if the remote
//!   delete fails,
//! - a refresh after a change notification matches the backend exactly,
//! - blank input never reaches the backend,
//! - sign-in followed by a fetch renders rows newest first.

mod common;

use std::sync::Arc;

use smartmark::backend::fake::FakeBackend;
use smartmark::backend::{BookmarkStore, ChangeFeed, EventFilter, Order};
use smartmark::sync::{NoticeLevel, Phase, SessionTransition, Synchronizer};
use smartmark::SmartmarkError;

use common::{at, wait_for_view};

fn ids(sync: &Synchronizer) -> Vec<String> {
    sync.snapshot()
        .bookmarks()
        .iter()
        .map(|b| b.id.clone())
        .collect()
}

#[tokio::test]
async fn test_list_shown_iff_session_present() {
    let fake = FakeBackend::new();
    let sync = Synchronizer::new(fake.backend());

    sync.establish_session().await.unwrap();
    let view = sync.snapshot();
    assert!(!view.shows_list());
    assert_eq!(view.phase(), Phase::Unauthenticated);

    sync.sign_in("google").await.unwrap();
    assert!(sync.snapshot().shows_list());

    sync.sign_out().await.unwrap();
    assert!(!sync.snapshot().shows_list());
}

#[tokio::test]
async fn test_sign_in_then_fetch_orders_newest_first() {
    let fake = FakeBackend::new();
    let t1 = fake.seed("older", "https://one", "user-1", at(10));
    let t2 = fake.seed("newer", "https://two", "user-1", at(20));
    let sync = Synchronizer::new(fake.backend());

    assert!(sync.establish_session().await.unwrap().is_none());
    assert_eq!(fake.calls().select, 0);

    let transition = sync.sign_in("google").await.unwrap();
    assert_eq!(transition, SessionTransition::SignedIn);
    assert!(sync.snapshot().session().is_some());

    sync.refresh().await.unwrap();
    assert_eq!(fake.calls().select, 1);
    assert_eq!(ids(&sync), vec![t2.id, t1.id]);
    assert_eq!(sync.snapshot().phase(), Phase::Populated);
}

#[tokio::test]
async fn test_create_puts_confirmed_row_first() {
    let fake = FakeBackend::signed_in("alice");
    fake.remote_insert("existing", "https://existing", "alice");
    let sync = Synchronizer::new(fake.backend());
    sync.establish_session().await.unwrap();
    sync.refresh().await.unwrap();

    let created = sync
        .create("  Tokio  ", " https://tokio.rs ")
        .await
        .unwrap();

    let view = sync.snapshot();
    let first = &view.bookmarks()[0];
    assert_eq!(first.title, "Tokio");
    assert_eq!(first.url, "https://tokio.rs");
    assert_eq!(first.id, created.id);
    assert_eq!(first.created_at, created.created_at);
    assert_eq!(view.bookmarks().len(), 2);
}

#[tokio::test]
async fn test_blank_input_sends_nothing_and_keeps_list() {
    let fake = FakeBackend::signed_in("alice");
    fake.remote_insert("existing", "https://existing", "alice");
    let sync = Synchronizer::new(fake.backend());
    sync.establish_session().await.unwrap();
    sync.refresh().await.unwrap();
    let before = ids(&sync);

    for (title, url) in [("", "https://x"), ("title", ""), ("   ", "  ")] {
        let err = sync.create(title, url).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SmartmarkError>(),
            Some(SmartmarkError::InvalidInput(_))
        ));
    }

    assert_eq!(fake.calls().insert, 0);
    assert_eq!(ids(&sync), before);
}

#[tokio::test]
async fn test_create_failure_leaves_list_and_records_notice() {
    let fake = FakeBackend::signed_in("alice");
    let sync = Synchronizer::new(fake.backend());
    sync.establish_session().await.unwrap();
    sync.refresh().await.unwrap();

    fake.fail_insert(Some("disk full"));
    assert!(sync.create("t", "https://t").await.is_err());

    let view = sync.snapshot();
    assert!(view.bookmarks().is_empty());
    let notice = view.notice().expect("notice recorded");
    assert_eq!(notice.level, NoticeLevel::Error);
    assert!(notice.message.contains("disk full"));
}

#[tokio::test]
async fn test_delete_removes_immediately_while_in_flight() {
    let fake = FakeBackend::signed_in("alice");
    let keep = fake.remote_insert("keep", "https://keep", "alice");
    let doomed = fake.remote_insert("doomed", "https://doomed", "alice");

    let sync = Arc::new(Synchronizer::new(fake.backend()));
    sync.establish_session().await.unwrap();
    sync.refresh().await.unwrap();

    let gate = fake.hold_deletes();
    let mut view = sync.subscribe();

    let task = {
        let sync = Arc::clone(&sync);
        let id = doomed.id.clone();
        tokio::spawn(async move { sync.delete(&id).await })
    };

    let during = wait_for_view(&mut view, |v| v.is_pending_delete(&doomed.id)).await;
    assert!(during.bookmarks().iter().all(|b| b.id != doomed.id));
    assert_eq!(during.bookmarks().len(), 1);

    // A refresh while the delete is held must not resurrect the row.
    sync.refresh().await.unwrap();
    assert_eq!(ids(&sync), vec![keep.id.clone()]);

    gate.notify_one();
    task.await.unwrap().unwrap();

    let after = sync.snapshot();
    assert!(!after.is_pending_delete(&doomed.id));
    assert_eq!(ids(&sync), vec![keep.id]);
    assert!(fake.rows().iter().all(|b| b.id != doomed.id));
}

#[tokio::test]
async fn test_failed_delete_is_absent_then_restored() {
    let fake = FakeBackend::signed_in("alice");
    let a = fake.remote_insert("a", "https://a", "alice");
    let b = fake.remote_insert("b", "https://b", "alice");
    let c = fake.remote_insert("c", "https://c", "alice");

    let sync = Arc::new(Synchronizer::new(fake.backend()));
    sync.establish_session().await.unwrap();
    sync.refresh().await.unwrap();

    fake.fail_delete(Some("offline"));
    let gate = fake.hold_deletes();
    let mut view = sync.subscribe();

    let task = {
        let sync = Arc::clone(&sync);
        let id = b.id.clone();
        tokio::spawn(async move { sync.delete(&id).await })
    };

    let during = wait_for_view(&mut view, |v| v.is_pending_delete(&b.id)).await;
    assert!(during.bookmarks().iter().all(|x| x.id != b.id));

    gate.notify_one();
    let err = task.await.unwrap().unwrap_err();
    match err.downcast_ref::<SmartmarkError>() {
        Some(SmartmarkError::DeleteFailed { id, reason }) => {
            assert_eq!(id, &b.id);
            assert!(reason.contains("offline"));
        }
        other => panic!("expected DeleteFailed, got {other:?}"),
    }

    assert_eq!(ids(&sync), vec![c.id, b.id, a.id]);
    let after = sync.snapshot();
    assert_eq!(
        after.notice().map(|n| n.level),
        Some(NoticeLevel::Error)
    );
}

#[tokio::test]
async fn test_change_notification_refresh_matches_backend() {
    let fake = FakeBackend::signed_in("alice");
    fake.remote_insert("mine", "https://mine", "alice");
    let sync = Synchronizer::new(fake.backend());
    sync.establish_session().await.unwrap();
    sync.refresh().await.unwrap();

    let mut sub = fake
        .backend()
        .feed
        .subscribe("bookmarks", EventFilter::All)
        .await
        .unwrap();

    // Another device adds one row and removes another.
    let added = fake.remote_insert("from phone", "https://phone", "alice");
    let first_id = ids(&sync)[0].clone();
    fake.remote_delete(&first_id);

    assert!(sub.next().await.is_some());
    sync.refresh().await.unwrap();

    let expected: Vec<String> = fake
        .select_all(&Order::newest_first())
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids(&sync), expected);
    assert_eq!(ids(&sync), vec![added.id]);
}

#[tokio::test]
async fn test_delete_of_unknown_id_still_reaches_backend() {
    let fake = FakeBackend::signed_in("alice");
    let sync = Synchronizer::new(fake.backend());
    sync.establish_session().await.unwrap();

    sync.delete("not-in-list").await.unwrap();
    assert_eq!(fake.calls().delete, 1);
    assert!(sync.snapshot().bookmarks().is_empty());
}

#[tokio::test]
async fn test_duplicates_are_allowed() {
    let fake = FakeBackend::signed_in("alice");
    let sync = Synchronizer::new(fake.backend());
    sync.establish_session().await.unwrap();

    sync.create("same", "https://same").await.unwrap();
    sync.create("same", "https://same").await.unwrap();
    assert_eq!(sync.snapshot().bookmarks().len(), 2);
}
