//! Operation use-case service.
//!
//! # Responsibility
//! - Provide the entry points hosts call per request: create, update, fetch,
//!   delete, rename, chown, set-info, copy and key reports.
//! - Gate each call on the caller's access tier before touching the store.
//! - Stamp and announce changes after the store work committed.
//!
//! # Invariants
//! - Access is checked before any write.
//! - Change events are emitted only after a successful commit.
//! - Fetch never returns tasks outside the caller's view.

use crate::model::ids::{AgentId, OperationId};
use crate::model::operation::{KeyOnHand, OpStat, Operation, UpdateMode};
use crate::model::timestamp::{format_http_date, from_epoch_ms, now_epoch_ms};
use crate::notify::{ChangeEvent, ChangeNotifier};
use crate::repo::OperationStore;
use crate::roster::TeamRoster;
use crate::service::access_service::{AccessLevel, AccessResolver};
use crate::service::error::{OpError, OpResult};
use crate::service::permission_service::PermissionManager;
use crate::service::reconcile_service::{ReconcileReport, Reconciler};
use crate::service::version_service::{Freshness, VersionTracker};
use chrono::{DateTime, Utc};
use log::info;
use std::collections::HashSet;
use uuid::Uuid;

const COPY_NAME_SUFFIX: &str = " COPY";

/// Result of a (possibly conditional) fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The caller's copy is current.
    Unchanged { modified: DateTime<Utc> },
    /// Full document, or the assigned-only view for restricted callers.
    Document(Operation),
}

/// Use-case service wrapper for operation documents.
pub struct OperationService<'a, S: OperationStore> {
    store: &'a S,
    roster: &'a dyn TeamRoster,
    notifier: &'a dyn ChangeNotifier,
}

impl<'a, S: OperationStore> OperationService<'a, S> {
    /// Creates a service over one store handle and its collaborators.
    pub fn new(
        store: &'a S,
        roster: &'a dyn TeamRoster,
        notifier: &'a dyn ChangeNotifier,
    ) -> Self {
        Self {
            store,
            roster,
            notifier,
        }
    }

    pub fn access(&self) -> AccessResolver<'a, S> {
        AccessResolver::new(self.store, self.roster)
    }

    pub fn tracker(&self) -> VersionTracker<'a, S> {
        VersionTracker::new(self.store, self.notifier)
    }

    pub fn permissions(&self) -> PermissionManager<'a, S> {
        PermissionManager::new(self.store, self.roster, self.notifier)
    }

    /// Creates an operation from a raw JSON snapshot, owned by `agent`.
    ///
    /// # Errors
    /// - `Snapshot` for unparsable or structurally invalid input.
    /// - `AlreadyExists` when the snapshot ID is taken.
    pub fn create(&self, agent: &AgentId, raw: &[u8]) -> OpResult<ReconcileReport> {
        let snapshot = Operation::from_json(raw)?;
        self.create_from(agent, &snapshot)
    }

    /// Typed form of `create`.
    pub fn create_from(
        &self,
        agent: &AgentId,
        snapshot: &Operation,
    ) -> OpResult<ReconcileReport> {
        let report = Reconciler::new(self.store).insert(agent, snapshot)?;
        self.tracker().touch(&snapshot.id)?;
        Ok(report)
    }

    /// Replaces the stored operation with a full raw JSON snapshot.
    ///
    /// The snapshot's `mode` selects design or active semantics.
    pub fn update(
        &self,
        agent: &AgentId,
        op_id: &OperationId,
        raw: &[u8],
    ) -> OpResult<ReconcileReport> {
        let snapshot = Operation::from_json(raw)?;
        self.update_from(agent, op_id, &snapshot, snapshot.mode)
    }

    /// Typed form of `update` with an explicit mode.
    ///
    /// # Errors
    /// - `MalformedInput` when `snapshot.id` differs from `op_id`.
    /// - `OperationNotFound` when the target does not exist.
    /// - `PermissionDenied` without write access.
    pub fn update_from(
        &self,
        agent: &AgentId,
        op_id: &OperationId,
        snapshot: &Operation,
        mode: UpdateMode,
    ) -> OpResult<ReconcileReport> {
        if snapshot.id != *op_id {
            return Err(OpError::MalformedInput(format!(
                "snapshot ID {} does not match operation {op_id}",
                snapshot.id
            )));
        }
        self.access()
            .require(agent, op_id, "update", AccessLevel::can_write)?;
        let report = Reconciler::new(self.store).reconcile(op_id, snapshot, mode)?;
        self.tracker().touch(op_id)?;
        Ok(report)
    }

    /// Returns the caller's view of the operation.
    ///
    /// With `if_modified_since`, returns `Unchanged` when the stored stamp is
    /// strictly earlier than the supplied RFC 1123 instant.
    pub fn fetch(
        &self,
        agent: &AgentId,
        op_id: &OperationId,
        if_modified_since: Option<&str>,
    ) -> OpResult<FetchOutcome> {
        let level = self.access().require(agent, op_id, "read", |level| {
            level >= AccessLevel::AssignedOnly
        })?;

        if let Freshness::Unchanged { modified } =
            self.tracker().check_freshness(op_id, if_modified_since)?
        {
            return Ok(FetchOutcome::Unchanged { modified });
        }

        let document = self.load_document(op_id)?;
        if level == AccessLevel::AssignedOnly {
            return Ok(FetchOutcome::Document(assigned_view(document, agent)));
        }
        Ok(FetchOutcome::Document(document))
    }

    /// Staleness projection for any caller that can see the operation.
    pub fn stat(&self, agent: &AgentId, op_id: &OperationId) -> OpResult<OpStat> {
        self.access().require(agent, op_id, "read", |level| {
            level >= AccessLevel::AssignedOnly
        })?;
        self.tracker().stat(op_id)
    }

    /// Removes the operation and everything it contains. Owner only.
    pub fn delete(&self, agent: &AgentId, op_id: &OperationId) -> OpResult<()> {
        self.require_owner(agent, op_id, "delete")?;
        self.store.delete_operation(op_id)?;
        info!("event=op_delete module=operation status=ok op_id={op_id}");
        self.tracker().announce(&ChangeEvent::Deleted {
            op_id: op_id.clone(),
        });
        Ok(())
    }

    /// Renames the operation. Owner only.
    pub fn rename(&self, agent: &AgentId, op_id: &OperationId, name: &str) -> OpResult<()> {
        self.require_owner(agent, op_id, "rename")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(OpError::InvalidArgument(
                "operation name must not be empty".to_string(),
            ));
        }
        self.store.rename_operation(op_id, name)?;
        self.tracker().touch(op_id)?;
        Ok(())
    }

    /// Transfers ownership. Owner only.
    pub fn chown(
        &self,
        agent: &AgentId,
        op_id: &OperationId,
        new_owner: &AgentId,
    ) -> OpResult<()> {
        self.require_owner(agent, op_id, "change owner of")?;
        if new_owner.is_blank() {
            return Err(OpError::InvalidArgument("new owner must not be empty".to_string()));
        }
        self.store.set_operation_owner(op_id, new_owner)?;
        info!("event=op_chown module=operation status=ok op_id={op_id} owner={new_owner}");
        self.tracker().touch(op_id)?;
        Ok(())
    }

    /// Replaces the operation comment. Requires write access.
    pub fn set_info(&self, agent: &AgentId, op_id: &OperationId, comment: &str) -> OpResult<()> {
        self.access()
            .require(agent, op_id, "set info on", AccessLevel::can_write)?;
        self.store.set_operation_comment(op_id, comment)?;
        self.tracker().touch(op_id)?;
        Ok(())
    }

    /// Clones the operation under a fresh ID owned by `agent`.
    ///
    /// Without `complete`, assignments and task states are reset and key
    /// records are left behind. Team bindings are never copied.
    pub fn copy(
        &self,
        agent: &AgentId,
        op_id: &OperationId,
        complete: bool,
    ) -> OpResult<OperationId> {
        self.access()
            .require(agent, op_id, "copy", AccessLevel::can_read)?;
        let mut document = self.load_document(op_id)?;

        document.id = OperationId::new(Uuid::new_v4().to_string());
        document.name.push_str(COPY_NAME_SUFFIX);
        document.teams.clear();
        if !complete {
            document.keys.clear();
            for marker in &mut document.markers {
                marker.task.clear_assignment();
            }
            for link in &mut document.links {
                link.task.clear_assignment();
            }
        }

        self.create_from(agent, &document)?;
        info!(
            "event=op_copy module=operation status=ok source_op_id={op_id} op_id={} complete={complete}",
            document.id
        );
        Ok(document.id)
    }

    /// Records how many keys `agent` holds for one waypoint.
    ///
    /// Any caller who can see the operation may report their own keys.
    pub fn set_key_on_hand(
        &self,
        agent: &AgentId,
        op_id: &OperationId,
        key: &KeyOnHand,
    ) -> OpResult<()> {
        self.access().require(agent, op_id, "report keys on", |level| {
            level >= AccessLevel::AssignedOnly
        })?;
        if key.count < 0 {
            return Err(OpError::InvalidArgument(
                "key count must not be negative".to_string(),
            ));
        }
        if !self.store.waypoint_ids(op_id)?.contains(&key.waypoint_id) {
            return Err(OpError::InvalidArgument(format!(
                "waypoint {} is not part of operation {op_id}",
                key.waypoint_id
            )));
        }
        let own = KeyOnHand {
            agent: agent.clone(),
            ..key.clone()
        };
        self.store.upsert_key(op_id, &own)?;
        self.tracker().touch(op_id)?;
        Ok(())
    }

    fn require_owner(
        &self,
        agent: &AgentId,
        op_id: &OperationId,
        action: &'static str,
    ) -> OpResult<()> {
        self.access()
            .require(agent, op_id, action, |level| level == AccessLevel::Owner)?;
        Ok(())
    }

    fn load_document(&self, op_id: &OperationId) -> OpResult<Operation> {
        let record = self
            .store
            .get_operation(op_id)?
            .ok_or_else(|| OpError::OperationNotFound(op_id.clone()))?;

        let mut document = Operation {
            id: record.id,
            name: record.name,
            owner: record.owner,
            color: record.color,
            comment: record.comment,
            waypoints: self.store.list_waypoints(op_id)?,
            markers: self.store.list_markers(op_id)?,
            links: self.store.list_links(op_id)?,
            teams: self.store.team_bindings(op_id)?,
            keys: self.store.list_keys(op_id)?,
            modified: format_http_date(record.modified),
            fetched: format_http_date(from_epoch_ms(now_epoch_ms())),
            ..Operation::default()
        };
        document.anchors = document.derive_anchors();
        Ok(document)
    }
}

/// Narrows a full document to the tasks assigned to `agent` and the
/// waypoints those tasks reference.
fn assigned_view(mut document: Operation, agent: &AgentId) -> Operation {
    document.markers.retain(|marker| marker.task.is_assigned_to(agent));
    document.links.retain(|link| link.task.is_assigned_to(agent));

    let referenced: HashSet<_> = document
        .markers
        .iter()
        .map(|marker| marker.waypoint_id.clone())
        .chain(
            document
                .links
                .iter()
                .flat_map(|link| [link.from.clone(), link.to.clone()]),
        )
        .collect();
    document
        .waypoints
        .retain(|waypoint| referenced.contains(&waypoint.id));
    document
        .keys
        .retain(|key| referenced.contains(&key.waypoint_id));
    document.teams.clear();
    document.anchors = document.derive_anchors();
    document
}
