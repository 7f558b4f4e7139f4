//! Operation version stamping and conditional-fetch checks.
//!
//! # Responsibility
//! - Advance an operation's `modified` stamp after a committed mutation.
//! - Emit the matching change event once the stamp is stored.
//! - Decide whether a client copy is still current.
//!
//! # Invariants
//! - `modified` is strictly increasing per operation, even when the clock
//!   stalls or steps backwards.
//! - Conditional checks compare at whole-second precision, the precision of
//!   the HTTP date the client echoes back.

use crate::model::ids::OperationId;
use crate::model::operation::OpStat;
use crate::model::timestamp::{now_epoch_ms, parse_http_date};
use crate::notify::{ChangeEvent, ChangeNotifier};
use crate::repo::OperationStore;
use crate::service::error::{OpError, OpResult};
use chrono::{DateTime, Utc};
use log::{debug, warn};

/// Result of comparing a client copy against the stored stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The client copy is current; skip the document transfer.
    Unchanged { modified: DateTime<Utc> },
    /// The stored operation changed since the supplied instant.
    Modified(OpStat),
}

/// Version stamping and change announcement for operations.
pub struct VersionTracker<'a, S: OperationStore> {
    store: &'a S,
    notifier: &'a dyn ChangeNotifier,
}

impl<'a, S: OperationStore> VersionTracker<'a, S> {
    pub fn new(store: &'a S, notifier: &'a dyn ChangeNotifier) -> Self {
        Self { store, notifier }
    }

    /// Stamps `op_id` as modified now and announces the change.
    ///
    /// Must run after the mutation it describes has committed.
    pub fn touch(&self, op_id: &OperationId) -> OpResult<DateTime<Utc>> {
        let modified = self.store.touch_operation(op_id, now_epoch_ms())?;
        debug!(
            "event=op_touch module=version status=ok op_id={op_id} modified_ms={}",
            modified.timestamp_millis()
        );
        self.announce(&ChangeEvent::Changed {
            op_id: op_id.clone(),
            modified,
        });
        Ok(modified)
    }

    /// Returns the lightweight staleness projection.
    pub fn stat(&self, op_id: &OperationId) -> OpResult<OpStat> {
        let record = self
            .store
            .get_operation(op_id)?
            .ok_or_else(|| OpError::OperationNotFound(op_id.clone()))?;
        Ok(OpStat {
            id: record.id,
            name: record.name,
            owner: record.owner,
            modified: record.modified,
        })
    }

    /// Compares the stored stamp with an `If-Modified-Since` style value.
    ///
    /// `Unchanged` only when the stored stamp is strictly earlier than the
    /// supplied instant. Empty, `"null"` or unparsable values always yield
    /// `Modified`.
    pub fn check_freshness(&self, op_id: &OperationId, since: Option<&str>) -> OpResult<Freshness> {
        let stat = self.stat(op_id)?;
        let Some(since) = since.and_then(parse_http_date) else {
            return Ok(Freshness::Modified(stat));
        };
        if stat.modified.timestamp() < since.timestamp() {
            return Ok(Freshness::Unchanged {
                modified: stat.modified,
            });
        }
        Ok(Freshness::Modified(stat))
    }

    /// Delivers `event`; delivery failures are logged, never returned.
    pub(crate) fn announce(&self, event: &ChangeEvent) {
        if let Err(err) = self.notifier.notify(event) {
            warn!(
                "event=change_notify module=version status=error op_id={} error={err}",
                event.op_id()
            );
        }
    }
}
