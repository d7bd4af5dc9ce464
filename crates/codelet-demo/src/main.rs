//! Places an order, lets the background processor deliver its events, then
//! reads the order back.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use codelet_core::cancellation::Cancellation;
use codelet_core::cqrs::{CommandHandler, QueryHandler};
use codelet_demo::error::DemoError;
use codelet_demo::orders::{self, FindOrder, OrderService, Outbound, PlaceOrder};
use codelet_outbox::context::{ContextConfig, DomainEventsContext};
use codelet_outbox::memory::InMemoryDatabase;
use codelet_outbox::processor::{DomainEventsProcessor, ProcessorConfig};
use codelet_outbox::serializer::{DomainEventsSerializer, JsonDomainEventsSerializer};
use tracing_subscriber::EnvFilter;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let processor_config = ProcessorConfig::from_env().map_err(DemoError::from)?;
    let context_config = ContextConfig::from_env().map_err(DemoError::from)?;
    tracing::info!(
        poll_interval = ?processor_config.poll_interval,
        commit_mode = %context_config.commit_mode,
        "Starting Codelet outbox demo"
    );

    let database = InMemoryDatabase::new();
    let serializer: Arc<dyn DomainEventsSerializer> = Arc::new(JsonDomainEventsSerializer);
    let outbound = Outbound::default();

    let mut processor = DomainEventsProcessor::new(
        DomainEventsContext::with_config(database.session(), Arc::clone(&serializer), context_config),
        orders::dispatcher_factory(&database, Arc::clone(&serializer), &outbound),
    )
    .with_config(processor_config);
    processor.start();

    let service = OrderService::new(database.clone(), serializer, context_config);
    CommandHandler::execute(
        &service,
        PlaceOrder {
            customer: "ada".to_owned(),
            lines: vec!["tea".to_owned(), "biscuits".to_owned()],
        },
        &Cancellation::none(),
    )
    .await
    .map_err(DemoError::from)?;

    let drained = wait_for_drain(&database, DRAIN_TIMEOUT).await;
    processor.stop().await;
    drained?;

    let order = QueryHandler::execute(&service, FindOrder { order_id: 1 }, &Cancellation::none())
        .await
        .map_err(DemoError::from)?;
    tracing::info!(?order, messages = ?outbound.sent(), "Demo finished");

    Ok(())
}

async fn wait_for_drain(database: &InMemoryDatabase, timeout: Duration) -> Result<(), DemoError> {
    let poll = async {
        while !database.domain_events().is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| DemoError::DrainTimeout(timeout))
}
