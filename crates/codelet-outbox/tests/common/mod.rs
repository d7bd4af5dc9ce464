//! Shared order fixture for outbox integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use codelet_core::clock::Clock;
use codelet_core::domain::{DomainEventArgs, DomainModel};
use codelet_outbox::context::{CommitMode, ContextConfig, DomainEventsContext};
use codelet_outbox::entity::{DatabaseEntity, DatabaseEntityWithModel, DomainModelDatabaseEntity};
use codelet_outbox::events::{DomainEventSource, DomainEvents};
use codelet_outbox::memory::{InMemoryDatabase, InMemoryEntity, InMemorySession, Tracked};
use codelet_outbox::serializer::{DomainEventsSerializer, JsonDomainEventsSerializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub customer: String,
    pub lines: Vec<String>,
    pub placed: bool,
}

impl DomainModel for Order {
    const TYPE_NAME: &'static str = "Order";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOpened {
    pub customer: String,
}

impl DomainEventArgs<Order> for OrderOpened {
    const EVENT_NAME: &'static str = "OrderOpened";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineAdded {
    pub sku: String,
}

impl DomainEventArgs<Order> for LineAdded {
    const EVENT_NAME: &'static str = "LineAdded";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub lines: usize,
}

impl DomainEventArgs<Order> for OrderPlaced {
    const EVENT_NAME: &'static str = "OrderPlaced";
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderRecord {
    id: Option<i64>,
    order: Order,
    #[serde(skip)]
    events: DomainEvents<OrderRecord>,
}

impl OrderRecord {
    /// A new order that raises nothing until it is changed.
    pub fn new(customer: &str) -> Self {
        Self {
            id: None,
            order: Order {
                customer: customer.to_owned(),
                lines: Vec::new(),
                placed: false,
            },
            events: DomainEvents::awaiting_identity(),
        }
    }

    /// A new order that raises `OrderOpened` while being constructed.
    pub fn open(customer: &str) -> Self {
        Self::open_at(&codelet_core::clock::SystemClock, customer)
    }

    /// Like [`open`](Self::open), with the event buffer stamped by `clock`.
    pub fn open_at(clock: &dyn Clock, customer: &str) -> Self {
        let mut record = Self::new(customer);
        record.events = DomainEvents::new(clock, true);
        record.events.raise(OrderOpened {
            customer: customer.to_owned(),
        });
        record
    }

    pub fn add_line(&mut self, sku: &str) {
        self.order.lines.push(sku.to_owned());
        self.events.raise(LineAdded {
            sku: sku.to_owned(),
        });
    }

    pub fn place(&mut self) {
        self.order.placed = true;
        self.events.raise(OrderPlaced {
            lines: self.order.lines.len(),
        });
    }
}

impl DatabaseEntity for OrderRecord {
    type Id = i64;
    const TYPE_NAME: &'static str = "OrderRecord";

    fn id(&self) -> Option<i64> {
        self.id
    }
}

impl DatabaseEntityWithModel for OrderRecord {
    type Model = Order;

    fn model(&self) -> &Order {
        &self.order
    }

    fn into_model(self) -> Order {
        self.order
    }
}

impl DomainModelDatabaseEntity for OrderRecord {
    fn domain_events(&self) -> &DomainEvents<Self> {
        &self.events
    }
}

impl InMemoryEntity for OrderRecord {
    fn assign_identity(&mut self, identity: i64) {
        self.id = Some(identity);
    }

    fn domain_event_source(tracked: &Tracked<Self>) -> Option<Arc<dyn DomainEventSource>> {
        Some(tracked.as_domain_event_source())
    }
}

/// A context over a fresh session using JSON serialization.
pub fn context(database: &InMemoryDatabase) -> DomainEventsContext<InMemorySession> {
    context_with(database, Arc::new(JsonDomainEventsSerializer), CommitMode::TwoPass)
}

pub fn context_with(
    database: &InMemoryDatabase,
    serializer: Arc<dyn DomainEventsSerializer>,
    commit_mode: CommitMode,
) -> DomainEventsContext<InMemorySession> {
    DomainEventsContext::with_config(database.session(), serializer, ContextConfig { commit_mode })
}

/// Decoded `(event name, entity id, args)` of a stored envelope.
pub fn describe(record: &codelet_outbox::record::DomainEventRecord) -> (String, serde_json::Value, serde_json::Value) {
    let content: serde_json::Value = serde_json::from_str(record.content()).unwrap();
    let args: serde_json::Value = serde_json::from_str(content["args"].as_str().unwrap()).unwrap();
    (
        content["type"]["event"].as_str().unwrap().to_owned(),
        content["entity_id"].clone(),
        args,
    )
}

/// Polls `condition` every 10 ms until it holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
