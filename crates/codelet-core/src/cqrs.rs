//! Command and query abstractions.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::cancellation::Cancellation;
use crate::error::DomainError;

/// Trait that all commands implement.
pub trait Command: Send + Sync + Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;
}

/// Executes a command, mutating state without returning a result.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    /// Executes `command`.
    async fn execute(&self, command: C, cancellation: &Cancellation) -> Result<(), DomainError>;
}

/// Trait that all queries implement.
pub trait Query: Send + Sync + Debug {
    /// The value the query produces.
    type Output: Send;
}

/// Executes a query without mutating state.
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    /// Executes `query` and returns its result.
    async fn execute(&self, query: Q, cancellation: &Cancellation)
    -> Result<Q::Output, DomainError>;
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::maybe::{Maybe, MaybeMapExt};

    #[derive(Debug)]
    struct RenameCustomer {
        customer_id: u32,
        name: String,
    }

    impl Command for RenameCustomer {
        fn command_type(&self) -> &'static str {
            "customers.rename"
        }
    }

    #[derive(Debug)]
    struct CustomerName {
        customer_id: u32,
    }

    impl Query for CustomerName {
        type Output = Maybe<String>;
    }

    #[derive(Default)]
    struct Customers {
        names: Mutex<HashMap<u32, String>>,
    }

    #[async_trait]
    impl CommandHandler<RenameCustomer> for Customers {
        async fn execute(
            &self,
            command: RenameCustomer,
            cancellation: &Cancellation,
        ) -> Result<(), DomainError> {
            cancellation.check()?;
            if command.name.trim().is_empty() {
                return Err(DomainError::Validation("name must not be blank".into()));
            }
            self.names
                .lock()
                .unwrap()
                .insert(command.customer_id, command.name);
            Ok(())
        }
    }

    #[async_trait]
    impl QueryHandler<CustomerName> for Customers {
        async fn execute(
            &self,
            query: CustomerName,
            _cancellation: &Cancellation,
        ) -> Result<Maybe<String>, DomainError> {
            Ok(self.names.lock().unwrap().get_maybe(&query.customer_id))
        }
    }

    #[tokio::test]
    async fn test_command_then_query_round_trip() {
        // Arrange
        let customers = Customers::default();
        let command = RenameCustomer {
            customer_id: 7,
            name: "Ada".to_owned(),
        };
        assert_eq!(command.command_type(), "customers.rename");

        // Act
        CommandHandler::execute(&customers, command, &Cancellation::none())
            .await
            .unwrap();
        let found = QueryHandler::execute(&customers, CustomerName { customer_id: 7 }, &Cancellation::none())
            .await
            .unwrap();
        let missing =
            QueryHandler::execute(&customers, CustomerName { customer_id: 8 }, &Cancellation::none())
                .await
                .unwrap();

        // Assert
        assert_eq!(found, Maybe::of("Ada".to_owned()));
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_command_validation_error() {
        let customers = Customers::default();

        let result = CommandHandler::execute(
            &customers,
            RenameCustomer {
                customer_id: 1,
                name: "  ".to_owned(),
            },
            &Cancellation::none(),
        )
        .await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }
}
