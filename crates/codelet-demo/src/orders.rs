//! Orders: a small domain whose events are delivered through the outbox.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use codelet_core::cancellation::Cancellation;
use codelet_core::cqrs::{Command, CommandHandler, Query, QueryHandler};
use codelet_core::domain::{
    DomainEventArgs, DomainEventHandler, DomainEventPipeline, DomainModel, DomainModelScopeProvider,
    Scope,
};
use codelet_core::error::DomainError;
use codelet_core::maybe::{HasContent, Maybe};
use codelet_outbox::context::{ContextConfig, DomainEventsContext};
use codelet_outbox::dispatcher::DomainEventsDispatcherFactory;
use codelet_outbox::entity::{DatabaseEntity, DatabaseEntityWithModel, DomainModelDatabaseEntity};
use codelet_outbox::error::OutboxError;
use codelet_outbox::events::{DomainEventSource, DomainEvents};
use codelet_outbox::memory::{
    InMemoryDatabase, InMemoryEntity, InMemoryModelResolver, InMemorySession, Tracked,
};
use codelet_outbox::repository::Repository;
use codelet_outbox::serializer::DomainEventsSerializer;
use codelet_outbox::session::DatabaseAccess;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Who placed the order.
    pub customer: String,
    /// Ordered SKUs.
    pub lines: Vec<String>,
    /// Whether the order has been placed or cancelled.
    pub status: OrderStatus,
}

/// Lifecycle of an [`Order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Draft,
    Placed,
    Cancelled,
}

impl DomainModel for Order {
    const TYPE_NAME: &'static str = "Order";
}

impl HasContent for Order {
    fn has_content(&self) -> bool {
        true
    }
}

/// Raised when an order is placed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub lines: Vec<String>,
}

impl DomainEventArgs<Order> for OrderPlaced {
    const EVENT_NAME: &'static str = "OrderPlaced";
}

/// Raised when an order is cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub reason: String,
}

impl DomainEventArgs<Order> for OrderCancelled {
    const EVENT_NAME: &'static str = "OrderCancelled";
}

/// Storage form of an [`Order`].
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderRecord {
    id: Option<i64>,
    order: Order,
    #[serde(skip)]
    events: DomainEvents<OrderRecord>,
}

impl OrderRecord {
    fn draft(customer: String, lines: Vec<String>) -> Self {
        Self {
            id: None,
            order: Order {
                customer,
                lines,
                status: OrderStatus::Draft,
            },
            events: DomainEvents::awaiting_identity(),
        }
    }

    fn place(&mut self) {
        self.order.status = OrderStatus::Placed;
        self.events.raise(OrderPlaced {
            lines: self.order.lines.clone(),
        });
    }

    fn cancel(&mut self, reason: String) -> Result<(), DomainError> {
        if self.order.status == OrderStatus::Cancelled {
            return Err(DomainError::Validation("order is already cancelled".into()));
        }
        self.order.status = OrderStatus::Cancelled;
        self.events.raise(OrderCancelled { reason });
        Ok(())
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

/// Places a new order.
#[derive(Debug)]
pub struct PlaceOrder {
    pub customer: String,
    pub lines: Vec<String>,
}

impl Command for PlaceOrder {
    fn command_type(&self) -> &'static str {
        "orders.place"
    }
}

/// Cancels a placed order.
#[derive(Debug)]
pub struct CancelOrder {
    pub order_id: i64,
    pub reason: String,
}

impl Command for CancelOrder {
    fn command_type(&self) -> &'static str {
        "orders.cancel"
    }
}

/// Looks up an order by id.
#[derive(Debug)]
pub struct FindOrder {
    pub order_id: i64,
}

impl Query for FindOrder {
    type Output = Maybe<Order>;
}

fn infrastructure(error: OutboxError) -> DomainError {
    if error.is_cancellation() {
        DomainError::Cancelled
    } else {
        DomainError::Infrastructure(error.to_string())
    }
}

/// Handles order commands and queries; every commit goes through the
/// outbox.
pub struct OrderService {
    database: InMemoryDatabase,
    serializer: Arc<dyn DomainEventsSerializer>,
    config: ContextConfig,
}

impl OrderService {
    #[must_use]
    pub fn new(
        database: InMemoryDatabase,
        serializer: Arc<dyn DomainEventsSerializer>,
        config: ContextConfig,
    ) -> Self {
        Self {
            database,
            serializer,
            config,
        }
    }

    fn context(&self) -> DomainEventsContext<InMemorySession> {
        DomainEventsContext::with_config(
            self.database.session(),
            Arc::clone(&self.serializer),
            self.config,
        )
    }
}

#[async_trait]
impl CommandHandler<PlaceOrder> for OrderService {
    async fn execute(&self, command: PlaceOrder, cancellation: &Cancellation) -> Result<(), DomainError> {
        cancellation.check()?;
        let customer = Maybe::of(command.customer)
            .get_or_throw(|| DomainError::Validation("customer must not be blank".into()))?;
        if command.lines.is_empty() {
            return Err(DomainError::Validation("an order needs at least one line".into()));
        }

        let mut context = self.context();
        let order = context
            .session_mut()
            .add(OrderRecord::draft(customer, command.lines));
        context.commit().await.map_err(infrastructure)?;

        order.with(OrderRecord::place);
        let written = context.commit().await.map_err(infrastructure)?;
        info!(order_id = ?order.id(), events = written, "order placed");
        Ok(())
    }
}

#[async_trait]
impl CommandHandler<CancelOrder> for OrderService {
    async fn execute(&self, command: CancelOrder, cancellation: &Cancellation) -> Result<(), DomainError> {
        cancellation.check()?;
        let mut context = self.context();
        let order = context
            .session_mut()
            .find::<OrderRecord>(&command.order_id)
            .map_err(|e| DomainError::Infrastructure(e.to_string()))?
            .get_or_throw(|| DomainError::EntityNotFound(format!("order {}", command.order_id)))?;
        order.with(|record| record.cancel(command.reason))?;
        context.commit().await.map_err(infrastructure)?;
        info!(order_id = command.order_id, "order cancelled");
        Ok(())
    }
}

#[async_trait]
impl QueryHandler<FindOrder> for OrderService {
    async fn execute(&self, query: FindOrder, cancellation: &Cancellation) -> Result<Maybe<Order>, DomainError> {
        let mut session = self.database.session_with_access(DatabaseAccess::ReadOnly);
        Repository::<OrderRecord>::find_by_id(&mut session, &query.order_id, cancellation)
            .await
            .map_err(infrastructure)
    }
}

/// Messages sent by the order event handlers.
#[derive(Debug, Clone, Default)]
pub struct Outbound(Arc<Mutex<Vec<String>>>);

impl Outbound {
    fn send(&self, message: String) {
        info!(%message, "outbound message");
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// Every message sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Asks the warehouse to reserve the ordered lines.
pub struct ReserveStock(pub Outbound);

#[async_trait]
impl DomainEventHandler<Order, OrderPlaced> for ReserveStock {
    async fn handle(
        &self,
        sender: &Order,
        args: &OrderPlaced,
        _cancellation: &Cancellation,
    ) -> Result<(), DomainError> {
        if sender.status == OrderStatus::Cancelled {
            debug!(customer = %sender.customer, "order cancelled before reservation");
            return Ok(());
        }
        self.0.send(format!("reserve {}", args.lines.join(",")));
        Ok(())
    }
}

/// Emails the customer a confirmation.
pub struct SendConfirmation(pub Outbound);

#[async_trait]
impl DomainEventHandler<Order, OrderPlaced> for SendConfirmation {
    async fn handle(
        &self,
        sender: &Order,
        args: &OrderPlaced,
        _cancellation: &Cancellation,
    ) -> Result<(), DomainError> {
        self.0.send(format!(
            "confirm {} line(s) to {}",
            args.lines.len(),
            sender.customer
        ));
        Ok(())
    }
}

/// Brackets each handler invocation with debug log lines naming the
/// customer.
pub struct CustomerScope;

impl DomainModelScopeProvider<Order> for CustomerScope {
    fn create_scope(&self, model: &Order) -> Scope {
        let customer = model.customer.clone();
        debug!(%customer, "handler scope opened");
        Scope::new(move || debug!(%customer, "handler scope closed"))
    }
}

/// Registers the order event handlers.
#[must_use]
pub fn dispatcher_factory(
    database: &InMemoryDatabase,
    serializer: Arc<dyn DomainEventsSerializer>,
    outbound: &Outbound,
) -> DomainEventsDispatcherFactory {
    let mut factory = DomainEventsDispatcherFactory::new(serializer);
    factory
        .register::<OrderRecord, OrderPlaced>(
            DomainEventPipeline::new()
                .with_handler(ReserveStock(outbound.clone()))
                .with_handler(SendConfirmation(outbound.clone()))
                .with_model_scope(CustomerScope),
            Arc::new(InMemoryModelResolver::<OrderRecord>::new(database.clone())),
        )
        .register_ignored::<OrderRecord, OrderCancelled>();
    factory
}
