//! Progress and error event sinks
//!
//! Publication never blocks: events go through `try_send`, and an event that
//! does not fit (bounded channel full, receiver dropped) is logged and lost.

use crate::migration::{MigrateError, Migration};
use crossbeam_channel::{Sender, TrySendError};

/// Optional channels a migrator reports to while it runs
///
/// `applied` receives every migration that was executed, with its direction;
/// `errors` receives failures the run recovered from (skipped missing or empty
/// down migrations). Errors that stop a run are returned, not published.
#[derive(Debug, Clone, Default)]
pub struct EventSinks {
    pub applied: Option<Sender<Migration>>,
    pub errors: Option<Sender<MigrateError>>,
}

impl EventSinks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_applied(mut self, tx: Sender<Migration>) -> Self {
        self.applied = Some(tx);
        self
    }

    #[must_use]
    pub fn with_errors(mut self, tx: Sender<MigrateError>) -> Self {
        self.errors = Some(tx);
        self
    }

    pub(crate) fn applied(&self, migration: &Migration) {
        if let Some(tx) = &self.applied {
            publish(tx, migration.clone(), "applied");
        }
    }

    pub(crate) fn error(&self, err: MigrateError) {
        if let Some(tx) = &self.errors {
            publish(tx, err, "error");
        }
    }
}

fn publish<T>(tx: &Sender<T>, event: T, kind: &str) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => log::warn!("{kind} event dropped: channel is full"),
        Err(TrySendError::Disconnected(_)) => log::warn!("{kind} event dropped: receiver is gone"),
    }
}
