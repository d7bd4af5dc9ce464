//! Integration tests for committing entity changes together with their
//! domain events.

mod common;

use std::sync::Arc;

use codelet_outbox::context::CommitMode;
use codelet_outbox::entity::{DatabaseEntityWithModel, DomainModelDatabaseEntity};
use codelet_outbox::error::OutboxError;
use codelet_outbox::memory::InMemoryDatabase;
use codelet_outbox::serializer::JsonDomainEventsSerializer;
use codelet_outbox::session::OutboxSession;
use codelet_test_support::{FailingSerializer, FixedClock};
use common::{OrderRecord, context, context_with, describe};
use serde_json::json;

#[tokio::test]
async fn test_commit_stores_event_raised_after_identity_assigned() {
    // Arrange
    let database = InMemoryDatabase::new();
    let mut context = context(&database);
    let order = context.session_mut().add(OrderRecord::new("ada"));
    assert_eq!(context.commit().await.unwrap(), 0);

    // Act
    order.with(OrderRecord::place);
    let written = context.commit().await.unwrap();

    // Assert
    assert_eq!(written, 1);
    let stored = database.domain_events();
    assert_eq!(stored.len(), 1);
    let (event, entity_id, args) = describe(&stored[0]);
    assert_eq!(event, "OrderPlaced");
    assert_eq!(entity_id, json!(1));
    assert_eq!(args, json!({"lines": 0}));
    assert!(database.load::<OrderRecord>(&1).unwrap().unwrap().model().placed);
}

#[tokio::test]
async fn test_constructor_event_is_transferred_by_second_pass() {
    // Arrange
    let database = InMemoryDatabase::new();
    let mut context = context(&database);
    context.session_mut().add(OrderRecord::open("grace"));

    // Act
    let written = context.commit().await.unwrap();

    // Assert
    assert_eq!(written, 1);
    assert_eq!(database.commit_count(), 2);
    let (event, entity_id, _) = describe(&database.domain_events()[0]);
    assert_eq!(event, "OrderOpened");
    assert_eq!(entity_id, json!(1));
}

#[tokio::test]
async fn test_single_pass_defers_constructor_event_to_next_commit() {
    // Arrange
    let database = InMemoryDatabase::new();
    let mut context = context_with(
        &database,
        Arc::new(JsonDomainEventsSerializer),
        CommitMode::SinglePass,
    );
    let order = context.session_mut().add(OrderRecord::open("linus"));

    // Act
    let first = context.commit().await.unwrap();
    let stored_after_first = database.domain_events().len();
    let second = context.commit().await.unwrap();

    // Assert
    assert_eq!(first, 0);
    assert_eq!(stored_after_first, 0);
    assert_eq!(order.id(), Some(1));
    assert_eq!(second, 1);
    assert_eq!(describe(&database.domain_events()[0]).1, json!(1));
    assert_eq!(database.commit_count(), 2);
}

#[tokio::test]
async fn test_second_commit_only_when_second_pass_has_events() {
    let database = InMemoryDatabase::new();
    let mut context = context(&database);
    context.session_mut().add(OrderRecord::new("barbara"));

    context.commit().await.unwrap();

    assert_eq!(database.commit_count(), 1);
    assert!(database.domain_events().is_empty());
}

#[tokio::test]
async fn test_events_of_one_entity_are_stamped_in_raise_order() {
    // Arrange
    let database = InMemoryDatabase::new();
    let mut context = context(&database);
    let clock = FixedClock::at("2026-01-15T10:00:00Z");
    let order = context
        .session_mut()
        .add(OrderRecord::open_at(&clock, "edsger"));
    order.with(|record| {
        record.add_line("apple");
        record.add_line("pear");
        record.place();
    });

    // Act
    context.commit().await.unwrap();

    // Assert
    let stored = database.domain_events();
    let events: Vec<(String, serde_json::Value)> = stored
        .iter()
        .map(|record| {
            let (event, _, args) = describe(record);
            (event, args)
        })
        .collect();
    assert_eq!(
        events,
        vec![
            ("OrderOpened".to_owned(), json!({"customer": "edsger"})),
            ("LineAdded".to_owned(), json!({"sku": "apple"})),
            ("LineAdded".to_owned(), json!({"sku": "pear"})),
            ("OrderPlaced".to_owned(), json!({"lines": 2})),
        ]
    );
    assert!(stored[0].occurred_at() >= clock.0);
    for pair in stored.windows(2) {
        assert!(pair[0].occurred_at() < pair[1].occurred_at());
    }
}

#[tokio::test]
async fn test_serialization_failure_persists_nothing() {
    // Arrange
    let database = InMemoryDatabase::new();
    let mut setup = context(&database);
    setup.session_mut().add(OrderRecord::new("ken"));
    setup.commit().await.unwrap();
    let commits_before = database.commit_count();

    let mut context = context_with(
        &database,
        Arc::new(FailingSerializer::rejecting("OrderPlaced")),
        CommitMode::TwoPass,
    );
    let order = context
        .session_mut()
        .find::<OrderRecord>(&1)
        .unwrap()
        .get_or_throw(|| "order 1 missing")
        .unwrap();
    order.with(|record| {
        record.add_line("plum");
        record.place();
    });

    // Act
    let result = context.commit().await;

    // Assert
    match result {
        Err(OutboxError::Serialization(message)) => assert!(message.contains("OrderPlaced")),
        other => panic!("expected Serialization, got {other:?}"),
    }
    assert!(database.domain_events().is_empty());
    assert_eq!(database.commit_count(), commits_before);
    let stored = database.load::<OrderRecord>(&1).unwrap().unwrap();
    assert!(stored.model().lines.is_empty());
    assert_eq!(order.lock().domain_events().pending_count(), 2);
}

#[tokio::test]
async fn test_constructor_event_serialization_failure_persists_nothing() {
    // Arrange
    let database = InMemoryDatabase::new();
    let mut context = context_with(
        &database,
        Arc::new(FailingSerializer::rejecting("OrderOpened")),
        CommitMode::TwoPass,
    );
    let order = context.session_mut().add(OrderRecord::open("grace"));

    // Act
    let result = context.commit().await;

    // Assert
    match result {
        Err(OutboxError::Serialization(message)) => assert!(message.contains("OrderOpened")),
        other => panic!("expected Serialization, got {other:?}"),
    }
    assert!(database.load::<OrderRecord>(&1).unwrap().is_none());
    assert!(database.domain_events().is_empty());
    assert_eq!(database.commit_count(), 0);
    assert_eq!(order.id(), None);
    assert_eq!(order.lock().domain_events().pending_count(), 1);
}

#[tokio::test]
async fn test_failed_storage_commit_keeps_events_for_retry() {
    // Arrange
    let database = InMemoryDatabase::new();
    let mut context = context(&database);
    let order = context.session_mut().add(OrderRecord::open("barbara"));
    database.fail_next_commits(1);

    // Act
    let failed = context.commit().await;
    let retried = context.commit().await;

    // Assert
    assert!(matches!(failed, Err(OutboxError::Storage(_))));
    assert_eq!(retried.unwrap(), 1);
    assert_eq!(order.id(), Some(1));
    let (event, entity_id, _) = describe(&database.domain_events()[0]);
    assert_eq!((event.as_str(), entity_id), ("OrderOpened", json!(1)));
}

#[tokio::test]
async fn test_committing_again_without_new_events_writes_nothing() {
    let database = InMemoryDatabase::new();
    let mut context = context(&database);
    context.session_mut().add(OrderRecord::open("niklaus"));
    context.commit().await.unwrap();

    let written = context.commit().await.unwrap();

    assert_eq!(written, 0);
    assert_eq!(database.domain_events().len(), 1);
}

#[tokio::test]
async fn test_envelopes_are_detached_after_commit() {
    let database = InMemoryDatabase::new();
    let mut context = context(&database);
    context.session_mut().add(OrderRecord::open("john"));

    context.commit().await.unwrap();

    assert_eq!(context.session().tracked_domain_event_count(), 0);
    assert_eq!(context.session().domain_event_sources().len(), 1);
}

#[tokio::test]
async fn test_failed_second_pass_commit_returns_constructor_event_to_buffer() {
    // Arrange
    let database = InMemoryDatabase::new();
    let mut context = context(&database);
    let order = context.session_mut().add(OrderRecord::open("radia"));
    database.fail_commits_after(1, 1);

    // Act
    let failed = context.commit().await;

    // Assert
    assert!(matches!(failed, Err(OutboxError::Storage(_))));
    assert_eq!(database.commit_count(), 1);
    assert_eq!(order.id(), Some(1));
    assert_eq!(order.lock().domain_events().pending_count(), 1);
    assert!(database.domain_events().is_empty());

    let written = context.commit().await.unwrap();

    assert_eq!(written, 1);
    let stored = database.domain_events();
    assert_eq!(stored.len(), 1);
    let (event, entity_id, args) = describe(&stored[0]);
    assert_eq!(event, "OrderOpened");
    assert_eq!(entity_id, json!(1));
    assert_eq!(args, json!({"customer": "radia"}));
}
