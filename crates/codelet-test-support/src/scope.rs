//! Scope provider double.

use codelet_core::domain::{
    DomainEventArgs, DomainEventScopeProvider, DomainModel, DomainModelScopeProvider, Scope,
};

use crate::handlers::InvocationLog;

/// Records `"{name}+"` when a scope opens and `"{name}-"` when it closes.
///
/// Usable both as a model and as an event scope provider.
#[derive(Debug, Clone)]
pub struct RecordingScopeProvider {
    name: String,
    log: InvocationLog,
}

impl RecordingScopeProvider {
    /// Creates a provider writing to `log`.
    #[must_use]
    pub fn new(name: &str, log: &InvocationLog) -> Self {
        Self {
            name: name.to_owned(),
            log: log.clone(),
        }
    }

    fn open(&self) -> Scope {
        self.log.push(format!("{}+", self.name));
        let log = self.log.clone();
        let closed = format!("{}-", self.name);
        Scope::new(move || log.push(closed))
    }
}

impl<M: DomainModel> DomainModelScopeProvider<M> for RecordingScopeProvider {
    fn create_scope(&self, _model: &M) -> Scope {
        self.open()
    }
}

impl<M: DomainModel, A: DomainEventArgs<M>> DomainEventScopeProvider<M, A> for RecordingScopeProvider {
    fn create_scope(&self, _args: &A) -> Scope {
        self.open()
    }
}
