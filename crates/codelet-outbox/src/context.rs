//! Unit-of-work wrapper that co-commits entity changes and their domain
//! events.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::error::{ConfigError, OutboxError};
use crate::events::DomainEventSource;
use crate::record::DomainEventRecord;
use crate::serializer::DomainEventsSerializer;
use crate::session::OutboxSession;

/// Environment variable selecting the [`CommitMode`].
pub const COMMIT_MODE_ENV: &str = "CODELET_OUTBOX_COMMIT_MODE";

/// How many transfer passes surround the storage commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Transfer before the commit and again after it, committing a second
    /// time only if the second pass produced envelopes. Needed when the
    /// storage engine assigns identifiers during the commit.
    #[default]
    TwoPass,
    /// Transfer once before the commit. Enough when identifiers exist before
    /// the first save.
    SinglePass,
}

impl FromStr for CommitMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "two-pass" => Ok(Self::TwoPass),
            "single-pass" => Ok(Self::SinglePass),
            _ => Err(ConfigError::InvalidCommitMode(s.to_owned())),
        }
    }
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TwoPass => f.write_str("two-pass"),
            Self::SinglePass => f.write_str("single-pass"),
        }
    }
}

/// Configuration for [`DomainEventsContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextConfig {
    /// Transfer passes per commit.
    pub commit_mode: CommitMode,
}

impl ContextConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidCommitMode` for an unrecognised mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; unset keys keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidCommitMode` for an unrecognised mode.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let commit_mode = match lookup(COMMIT_MODE_ENV) {
            Some(value) => value.parse()?,
            None => CommitMode::default(),
        };
        Ok(Self { commit_mode })
    }
}

/// Drains every source into envelopes.
///
/// If any source fails, every source is told to abort, so all drained events
/// return to their buffers and nothing from this pass is kept.
///
/// # Errors
///
/// Returns the first transfer failure.
pub fn transfer_domain_events(
    sources: &[Arc<dyn DomainEventSource>],
    serializer: &dyn DomainEventsSerializer,
) -> Result<Vec<DomainEventRecord>, OutboxError> {
    let mut records = Vec::new();
    for source in sources {
        match source.transfer_domain_events(serializer) {
            Ok(transferred) => records.extend(transferred),
            Err(error) => {
                abort(sources);
                return Err(error);
            }
        }
    }
    Ok(records)
}

fn complete(sources: &[Arc<dyn DomainEventSource>]) {
    for source in sources {
        source.complete_domain_events_transfer();
    }
}

fn abort(sources: &[Arc<dyn DomainEventSource>]) {
    for source in sources {
        source.abort_domain_events_transfer();
    }
}

/// Wraps an [`OutboxSession`] so that every commit also persists the domain
/// events raised by its tracked entities.
pub struct DomainEventsContext<S> {
    session: S,
    serializer: Arc<dyn DomainEventsSerializer>,
    config: ContextConfig,
}

impl<S: OutboxSession> DomainEventsContext<S> {
    /// Creates a context with the default configuration.
    pub fn new(session: S, serializer: Arc<dyn DomainEventsSerializer>) -> Self {
        Self::with_config(session, serializer, ContextConfig::default())
    }

    /// Creates a context with an explicit configuration.
    pub fn with_config(
        session: S,
        serializer: Arc<dyn DomainEventsSerializer>,
        config: ContextConfig,
    ) -> Self {
        Self {
            session,
            serializer,
            config,
        }
    }

    /// Borrows the underlying session.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Mutably borrows the underlying session, e.g. to track entities.
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// The configured commit mode.
    pub fn commit_mode(&self) -> CommitMode {
        self.config.commit_mode
    }

    /// Commits tracked changes together with the domain events they raised.
    ///
    /// Returns the number of envelopes written. Envelope records are detached
    /// from the session afterwards, whether the commit succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns a serialization error, leaving storage untouched, or the
    /// storage error of a failed commit. In both cases the drained events are
    /// returned to their buffers.
    pub async fn commit(&mut self) -> Result<usize, OutboxError> {
        let sources = self.session.domain_event_sources();
        let written = self.commit_pass(&sources, 1).await?;
        let written = match self.config.commit_mode {
            CommitMode::SinglePass => written,
            CommitMode::TwoPass => {
                let sources = self.session.domain_event_sources();
                written + self.commit_pass(&sources, 2).await?
            }
        };
        self.session.detach_domain_events();
        Ok(written)
    }

    async fn commit_pass(
        &mut self,
        sources: &[Arc<dyn DomainEventSource>],
        pass: u8,
    ) -> Result<usize, OutboxError> {
        let records = match transfer_domain_events(sources, self.serializer.as_ref()) {
            Ok(records) => records,
            Err(error) => {
                self.session.detach_domain_events();
                return Err(error);
            }
        };
        let count = records.len();
        debug!(pass, count, "transferred domain events");

        // The first pass always commits: it carries the entity changes.
        if pass > 1 && count == 0 {
            return Ok(0);
        }
        self.session.stage_domain_events(records);
        if let Err(error) = self.session.save_changes().await {
            abort(sources);
            self.session.detach_domain_events();
            return Err(error.into());
        }
        complete(sources);
        Ok(count)
    }

    /// Reads the oldest stored envelope.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the query fails.
    pub async fn oldest_domain_event(&mut self) -> Result<Option<DomainEventRecord>, OutboxError> {
        Ok(self.session.oldest_domain_event().await?)
    }

    /// Stages the deletion of a dispatched envelope; [`commit`](Self::commit)
    /// applies it.
    pub fn remove_domain_event(&mut self, record: &DomainEventRecord) {
        self.session.remove_domain_event(record);
    }

    /// Drops every envelope tracked by the session without writing it.
    pub fn detach_domain_events(&mut self) {
        self.session.detach_domain_events();
    }
}

impl<S> fmt::Debug for DomainEventsContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainEventsContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
