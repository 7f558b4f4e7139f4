//! Snapshot reconciliation against the stored operation.
//!
//! # Responsibility
//! - Create an operation from a client snapshot (`insert`).
//! - Converge a stored operation onto a full client snapshot (`reconcile`)
//!   by diffing per kind: waypoints, then markers, then links.
//!
//! # Invariants
//! - Each kind pass runs inside one atomic store unit; each entity upsert is
//!   a nested unit in the store, so one failing entity never rolls back its
//!   siblings.
//! - Entities referencing a waypoint absent from the snapshot are skipped and
//!   reported, never stored. A stored entity skipped this way is deleted.
//! - A waypoint with an unparsable coordinate counts as absent.
//! - Dependencies are trimmed to the tasks this snapshot stores, so an
//!   identical resubmission is a no-op.
//! - An entity whose upsert fails at the store is reported and kept.
//! - Team bindings in an update snapshot are ignored; they change only
//!   through the permission service.

use crate::model::ids::{AgentId, OperationId, TaskId, WaypointId};
use crate::model::operation::{Operation, OperationRecord, UpdateMode};
use crate::model::task::{Link, Marker, Task};
use crate::model::timestamp::{from_epoch_ms, now_epoch_ms};
use crate::repo::{OperationStore, RepoError, RepoResult, UpsertOutcome};
use crate::service::error::{OpError, OpResult};
use log::{debug, error, info, warn};
use std::borrow::Cow;
use std::collections::HashSet;
use std::time::Instant;

/// Entity category named in a reconcile report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Waypoint,
    Marker,
    Link,
    Key,
    Team,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waypoint => "waypoint",
            Self::Marker => "marker",
            Self::Link => "link",
            Self::Key => "key",
            Self::Team => "team",
        }
    }
}

/// Why an incoming entity was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The entity references a waypoint absent from the snapshot.
    MissingWaypoint(WaypointId),
    /// The waypoint carries this unparsable coordinate.
    InvalidCoordinate(String),
    /// The store rejected the single-entity write.
    Store(String),
}

/// One entity left out of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntity {
    pub kind: EntityKind,
    pub id: String,
    pub reason: SkipReason,
}

/// Per-kind change counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl KindCounts {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.inserted + self.updated + self.deleted > 0
    }
}

/// Outcome of `insert` or `reconcile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub op_id: OperationId,
    pub waypoints: KindCounts,
    pub markers: KindCounts,
    pub links: KindCounts,
    pub skipped: Vec<SkippedEntity>,
}

impl ReconcileReport {
    fn new(op_id: &OperationId) -> Self {
        Self {
            op_id: op_id.clone(),
            waypoints: KindCounts::default(),
            markers: KindCounts::default(),
            links: KindCounts::default(),
            skipped: Vec::new(),
        }
    }

    /// Whether any entity was inserted, updated or deleted.
    pub fn has_changes(&self) -> bool {
        self.waypoints.has_changes() || self.markers.has_changes() || self.links.has_changes()
    }

    pub fn skipped_ids(&self, kind: EntityKind) -> Vec<&str> {
        self.skipped
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.id.as_str())
            .collect()
    }

    fn skip(&mut self, kind: EntityKind, id: &str, reason: SkipReason) {
        match &reason {
            SkipReason::MissingWaypoint(waypoint) => debug!(
                "event=reconcile_entity module=reconcile status=skip op_id={} kind={} id={id} missing_waypoint={waypoint}",
                self.op_id,
                kind.as_str()
            ),
            SkipReason::InvalidCoordinate(value) => debug!(
                "event=reconcile_entity module=reconcile status=skip op_id={} kind={} id={id} invalid_coordinate={value}",
                self.op_id,
                kind.as_str()
            ),
            SkipReason::Store(message) => warn!(
                "event=reconcile_entity module=reconcile status=error op_id={} kind={} id={id} error={message}",
                self.op_id,
                kind.as_str()
            ),
        }
        self.skipped.push(SkippedEntity {
            kind,
            id: id.to_string(),
            reason,
        });
    }
}

/// Applies client snapshots to the operation store.
pub struct Reconciler<'a, S: OperationStore> {
    store: &'a S,
}

impl<'a, S: OperationStore> Reconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Creates the operation described by `snapshot`, owned by `owner`.
    ///
    /// # Contract
    /// - Fails with `AlreadyExists` when the ID is in use; nothing is written.
    /// - Applies valid team bindings and key records whose waypoint is present.
    /// - Does not stamp or notify; the caller announces the creation.
    pub fn insert(&self, owner: &AgentId, snapshot: &Operation) -> OpResult<ReconcileReport> {
        snapshot.validate()?;
        if owner.is_blank() {
            return Err(OpError::InvalidArgument("owner must not be empty".to_string()));
        }
        let op_id = &snapshot.id;
        let started_at = Instant::now();
        info!("event=op_insert module=reconcile status=start op_id={op_id}");

        let mut report = ReconcileReport::new(op_id);
        let result = self.store.within_unit(|| {
            if self.store.operation_exists(op_id)? {
                return Err(RepoError::AlreadyExists(op_id.clone()));
            }
            self.store.insert_operation(&OperationRecord {
                id: op_id.clone(),
                name: snapshot.name.clone(),
                owner: owner.clone(),
                color: snapshot.color,
                comment: snapshot.comment.clone(),
                modified: from_epoch_ms(now_epoch_ms()),
            })?;

            for binding in &snapshot.teams {
                if let Err(err) = self.store.add_team_binding(op_id, binding) {
                    report.skip(
                        EntityKind::Team,
                        binding.team_id.as_str(),
                        SkipReason::Store(err.to_string()),
                    );
                }
            }

            let plan = Plan::new(snapshot);
            let present = &plan.present;
            self.apply_waypoints(op_id, snapshot, HashSet::new(), &mut report)?;
            let design = UpdateMode::Design;
            self.apply_markers(op_id, snapshot, &plan, design, HashSet::new(), &mut report)?;
            self.apply_links(op_id, snapshot, &plan, design, HashSet::new(), &mut report)?;

            for key in &snapshot.keys {
                if !present.contains(&key.waypoint_id) {
                    report.skip(
                        EntityKind::Key,
                        key.waypoint_id.as_str(),
                        SkipReason::MissingWaypoint(key.waypoint_id.clone()),
                    );
                    continue;
                }
                if let Err(err) = self.store.upsert_key(op_id, key) {
                    report.skip(
                        EntityKind::Key,
                        key.waypoint_id.as_str(),
                        SkipReason::Store(err.to_string()),
                    );
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                info!(
                    "event=op_insert module=reconcile status=ok op_id={op_id} duration_ms={} skipped={}",
                    started_at.elapsed().as_millis(),
                    report.skipped.len()
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=op_insert module=reconcile status=error op_id={op_id} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err.into())
            }
        }
    }

    /// Converges the stored operation `op_id` onto `snapshot`.
    ///
    /// # Contract
    /// - `snapshot.id` must equal `op_id` (`MalformedInput` otherwise).
    /// - `mode` selects whether assignee sets and states are overwritten.
    /// - Does not check access, stamp or notify; the caller does.
    pub fn reconcile(
        &self,
        op_id: &OperationId,
        snapshot: &Operation,
        mode: UpdateMode,
    ) -> OpResult<ReconcileReport> {
        snapshot.validate()?;
        if snapshot.id != *op_id {
            return Err(OpError::MalformedInput(format!(
                "snapshot ID {} does not match operation {op_id}",
                snapshot.id
            )));
        }
        let started_at = Instant::now();
        info!(
            "event=op_reconcile module=reconcile status=start op_id={op_id} mode={}",
            mode.as_str()
        );

        let mut report = ReconcileReport::new(op_id);
        let result = self.reconcile_kinds(op_id, snapshot, mode, &mut report);
        match result {
            Ok(()) => {
                info!(
                    "event=op_reconcile module=reconcile status=ok op_id={op_id} mode={} duration_ms={} changed={} skipped={}",
                    mode.as_str(),
                    started_at.elapsed().as_millis(),
                    report.has_changes(),
                    report.skipped.len()
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=op_reconcile module=reconcile status=error op_id={op_id} mode={} duration_ms={} error={err}",
                    mode.as_str(),
                    started_at.elapsed().as_millis()
                );
                Err(err.into())
            }
        }
    }

    fn reconcile_kinds(
        &self,
        op_id: &OperationId,
        snapshot: &Operation,
        mode: UpdateMode,
        report: &mut ReconcileReport,
    ) -> RepoResult<()> {
        self.store.update_operation_fields(
            op_id,
            &snapshot.name,
            snapshot.color,
            &snapshot.comment,
        )?;

        let plan = Plan::new(snapshot);
        self.store.within_unit(|| {
            let stale = self.store.waypoint_ids(op_id)?;
            self.apply_waypoints(op_id, snapshot, stale, report)
        })?;
        self.store.within_unit(|| {
            let stale = self.store.marker_ids(op_id)?;
            self.apply_markers(op_id, snapshot, &plan, mode, stale, report)
        })?;
        self.store.within_unit(|| {
            let stale = self.store.link_ids(op_id)?;
            self.apply_links(op_id, snapshot, &plan, mode, stale, report)
        })?;
        Ok(())
    }

    fn apply_waypoints(
        &self,
        op_id: &OperationId,
        snapshot: &Operation,
        mut stale: HashSet<WaypointId>,
        report: &mut ReconcileReport,
    ) -> RepoResult<()> {
        for waypoint in &snapshot.waypoints {
            if let Some(value) = waypoint.invalid_coordinate() {
                report.skip(
                    EntityKind::Waypoint,
                    waypoint.id.as_str(),
                    SkipReason::InvalidCoordinate(value.to_string()),
                );
                continue;
            }
            match self.store.upsert_waypoint(op_id, waypoint) {
                Ok(outcome) => report.waypoints.record(outcome),
                Err(err) => report.skip(
                    EntityKind::Waypoint,
                    waypoint.id.as_str(),
                    SkipReason::Store(err.to_string()),
                ),
            }
            stale.remove(&waypoint.id);
        }

        for waypoint_id in sorted(stale) {
            match self.store.delete_waypoint(op_id, &waypoint_id) {
                Ok(true) => report.waypoints.deleted += 1,
                Ok(false) => {}
                Err(err) => report.skip(
                    EntityKind::Waypoint,
                    waypoint_id.as_str(),
                    SkipReason::Store(err.to_string()),
                ),
            }
        }
        Ok(())
    }

    fn apply_markers(
        &self,
        op_id: &OperationId,
        snapshot: &Operation,
        plan: &Plan<'_>,
        mode: UpdateMode,
        mut stale: HashSet<TaskId>,
        report: &mut ReconcileReport,
    ) -> RepoResult<()> {
        for marker in &snapshot.markers {
            if let Some(missing) = missing_marker_waypoint(marker, &plan.present) {
                report.skip(
                    EntityKind::Marker,
                    marker.task.id.as_str(),
                    SkipReason::MissingWaypoint(missing.clone()),
                );
                continue;
            }
            let marker = plan.with_live_dependencies(marker);
            match self.store.upsert_marker(op_id, &marker, mode) {
                Ok(outcome) => report.markers.record(outcome),
                Err(err) => report.skip(
                    EntityKind::Marker,
                    marker.task.id.as_str(),
                    SkipReason::Store(err.to_string()),
                ),
            }
            stale.remove(&marker.task.id);
        }

        self.delete_stale_tasks(op_id, EntityKind::Marker, stale, report);
        Ok(())
    }

    fn apply_links(
        &self,
        op_id: &OperationId,
        snapshot: &Operation,
        plan: &Plan<'_>,
        mode: UpdateMode,
        mut stale: HashSet<TaskId>,
        report: &mut ReconcileReport,
    ) -> RepoResult<()> {
        for link in &snapshot.links {
            if let Some(missing) = missing_link_waypoint(link, &plan.present) {
                report.skip(
                    EntityKind::Link,
                    link.task.id.as_str(),
                    SkipReason::MissingWaypoint(missing.clone()),
                );
                continue;
            }
            let link = plan.with_live_dependencies(link);
            match self.store.upsert_link(op_id, &link, mode) {
                Ok(outcome) => report.links.record(outcome),
                Err(err) => report.skip(
                    EntityKind::Link,
                    link.task.id.as_str(),
                    SkipReason::Store(err.to_string()),
                ),
            }
            stale.remove(&link.task.id);
        }

        self.delete_stale_tasks(op_id, EntityKind::Link, stale, report);
        Ok(())
    }

    fn delete_stale_tasks(
        &self,
        op_id: &OperationId,
        kind: EntityKind,
        stale: HashSet<TaskId>,
        report: &mut ReconcileReport,
    ) {
        for task_id in sorted(stale) {
            match self.store.delete_task(op_id, &task_id) {
                Ok(true) => match kind {
                    EntityKind::Marker => report.markers.deleted += 1,
                    _ => report.links.deleted += 1,
                },
                Ok(false) => {}
                Err(err) => {
                    report.skip(kind, task_id.as_str(), SkipReason::Store(err.to_string()))
                }
            }
        }
    }
}

/// What one snapshot will actually store.
struct Plan<'s> {
    present: HashSet<&'s WaypointId>,
    live_tasks: HashSet<&'s TaskId>,
}

impl<'s> Plan<'s> {
    fn new(snapshot: &'s Operation) -> Self {
        let present = snapshot.usable_waypoint_ids();
        let markers = snapshot
            .markers
            .iter()
            .filter(|marker| missing_marker_waypoint(marker, &present).is_none())
            .map(|marker| &marker.task.id);
        let links = snapshot
            .links
            .iter()
            .filter(|link| missing_link_waypoint(link, &present).is_none())
            .map(|link| &link.task.id);
        let live_tasks = markers.chain(links).collect();
        Self {
            present,
            live_tasks,
        }
    }

    /// Drops dependencies on tasks this snapshot does not store.
    fn with_live_dependencies<'e, E: TaskEntity>(&self, entity: &'e E) -> Cow<'e, E> {
        let live = |dep: &TaskId| self.live_tasks.contains(dep);
        if entity.task().depends_on.iter().all(live) {
            return Cow::Borrowed(entity);
        }
        let mut owned = entity.clone();
        owned.task_mut().depends_on.retain(live);
        Cow::Owned(owned)
    }
}

trait TaskEntity: Clone {
    fn task(&self) -> &Task;
    fn task_mut(&mut self) -> &mut Task;
}

impl TaskEntity for Marker {
    fn task(&self) -> &Task {
        &self.task
    }

    fn task_mut(&mut self) -> &mut Task {
        &mut self.task
    }
}

impl TaskEntity for Link {
    fn task(&self) -> &Task {
        &self.task
    }

    fn task_mut(&mut self) -> &mut Task {
        &mut self.task
    }
}

fn missing_marker_waypoint<'m>(
    marker: &'m Marker,
    present: &HashSet<&WaypointId>,
) -> Option<&'m WaypointId> {
    Some(&marker.waypoint_id).filter(|id| !present.contains(id))
}

fn missing_link_waypoint<'l>(
    link: &'l Link,
    present: &HashSet<&WaypointId>,
) -> Option<&'l WaypointId> {
    [&link.from, &link.to]
        .into_iter()
        .find(|id| !present.contains(id))
}

/// Deletions run in ID order so logs and reports are deterministic.
fn sorted<T: Ord>(ids: HashSet<T>) -> Vec<T> {
    let mut ids: Vec<T> = ids.into_iter().collect();
    ids.sort();
    ids
}
