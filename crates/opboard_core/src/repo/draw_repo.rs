//! Waypoint, marker, link and key persistence for reconciliation.
//!
//! # Responsibility
//! - Expose per-kind current ID sets for the set-difference pass.
//! - Upsert single entities, reporting whether they were inserted, changed
//!   or already identical.
//! - Delete entities with their cascades.
//!
//! # Invariants
//! - Each upsert runs inside its own atomic unit.
//! - A changed waypoint reference on an existing marker/link is applied as
//!   delete + insert; inbound dependency edges survive the replacement.
//! - Deleting a waypoint removes the markers/links that reference it and its
//!   key records.

use super::task_repo::{
    assignments_by_task, dependencies_by_task, inbound_dependencies, insert_task_row,
    parse_state, restore_inbound_dependencies, update_task_row, TaskWritePolicy,
};
use super::{non_empty, RepoResult, SqliteOperationStore};
use crate::db::atomic;
use crate::model::ids::{AgentId, OperationId, TaskId, WaypointId};
use crate::model::operation::{KeyOnHand, OpColor, UpdateMode};
use crate::model::task::{Link, Marker, Task, TaskKind};
use crate::model::waypoint::Waypoint;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};

/// Result of a single-entity upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Stored row already matched the incoming entity.
    Unchanged,
}

/// Repository interface for the entities reconciled from a snapshot.
pub trait DrawRepository {
    fn waypoint_ids(&self, op_id: &OperationId) -> RepoResult<HashSet<WaypointId>>;
    fn upsert_waypoint(&self, op_id: &OperationId, waypoint: &Waypoint)
        -> RepoResult<UpsertOutcome>;
    /// Returns `false` when the waypoint was already gone.
    fn delete_waypoint(&self, op_id: &OperationId, waypoint_id: &WaypointId) -> RepoResult<bool>;
    fn list_waypoints(&self, op_id: &OperationId) -> RepoResult<Vec<Waypoint>>;

    fn marker_ids(&self, op_id: &OperationId) -> RepoResult<HashSet<TaskId>>;
    fn upsert_marker(
        &self,
        op_id: &OperationId,
        marker: &Marker,
        mode: UpdateMode,
    ) -> RepoResult<UpsertOutcome>;
    fn list_markers(&self, op_id: &OperationId) -> RepoResult<Vec<Marker>>;

    fn link_ids(&self, op_id: &OperationId) -> RepoResult<HashSet<TaskId>>;
    fn upsert_link(
        &self,
        op_id: &OperationId,
        link: &Link,
        mode: UpdateMode,
    ) -> RepoResult<UpsertOutcome>;
    fn list_links(&self, op_id: &OperationId) -> RepoResult<Vec<Link>>;

    /// Deletes a marker or link with its assignments and dependency edges.
    fn delete_task(&self, op_id: &OperationId, task_id: &TaskId) -> RepoResult<bool>;

    fn upsert_key(&self, op_id: &OperationId, key: &KeyOnHand) -> RepoResult<()>;
    fn list_keys(&self, op_id: &OperationId) -> RepoResult<Vec<KeyOnHand>>;
}

impl DrawRepository for SqliteOperationStore<'_> {
    fn waypoint_ids(&self, op_id: &OperationId) -> RepoResult<HashSet<WaypointId>> {
        let ids = collect_ids(
            self.conn,
            "SELECT waypoint_id FROM waypoints WHERE op_id = ?1;",
            op_id,
        )?;
        Ok(ids.into_iter().map(WaypointId::new).collect())
    }

    fn upsert_waypoint(
        &self,
        op_id: &OperationId,
        waypoint: &Waypoint,
    ) -> RepoResult<UpsertOutcome> {
        atomic(self.conn, |conn| {
            let exists: i64 = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM waypoints WHERE op_id = ?1 AND waypoint_id = ?2
                );",
                params![op_id.as_str(), waypoint.id.as_str()],
                |row| row.get(0),
            )?;

            let (id, name, lat, lon) = (
                waypoint.id.as_str(),
                waypoint.name.as_str(),
                waypoint.lat.trim(),
                waypoint.lon.trim(),
            );
            let (comment, hardness) = (non_empty(&waypoint.comment), non_empty(&waypoint.hardness));
            if exists == 0 {
                conn.execute(
                    "INSERT INTO waypoints (op_id, waypoint_id, name, lat, lon, comment, hardness)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                    params![op_id.as_str(), id, name, lat, lon, comment, hardness],
                )?;
                return Ok(UpsertOutcome::Inserted);
            }

            let changed = conn.execute(
                "UPDATE waypoints
                 SET name = ?3, lat = ?4, lon = ?5, comment = ?6, hardness = ?7
                 WHERE op_id = ?1 AND waypoint_id = ?2
                   AND (name IS NOT ?3
                        OR lat IS NOT ?4
                        OR lon IS NOT ?5
                        OR comment IS NOT ?6
                        OR hardness IS NOT ?7);",
                params![op_id.as_str(), id, name, lat, lon, comment, hardness],
            )?;
            Ok(changed_outcome(changed > 0))
        })
    }

    fn delete_waypoint(&self, op_id: &OperationId, waypoint_id: &WaypointId) -> RepoResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM waypoints WHERE op_id = ?1 AND waypoint_id = ?2;",
            params![op_id.as_str(), waypoint_id.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn list_waypoints(&self, op_id: &OperationId) -> RepoResult<Vec<Waypoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT waypoint_id, name, lat, lon, comment, hardness
             FROM waypoints
             WHERE op_id = ?1
             ORDER BY waypoint_id ASC;",
        )?;
        let waypoints = stmt
            .query_map([op_id.as_str()], parse_waypoint_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(waypoints)
    }

    fn marker_ids(&self, op_id: &OperationId) -> RepoResult<HashSet<TaskId>> {
        let ids = collect_ids(
            self.conn,
            "SELECT task_id FROM markers WHERE op_id = ?1;",
            op_id,
        )?;
        Ok(ids.into_iter().map(TaskId::new).collect())
    }

    fn upsert_marker(
        &self,
        op_id: &OperationId,
        marker: &Marker,
        mode: UpdateMode,
    ) -> RepoResult<UpsertOutcome> {
        atomic(self.conn, |conn| {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT waypoint_id FROM markers WHERE op_id = ?1 AND task_id = ?2;",
                    params![op_id.as_str(), marker.task.id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            match stored {
                None => {
                    // The ID may still be held by a link; the kind change replaces it.
                    drop_task_row(conn, op_id, &marker.task.id)?;
                    insert_marker(conn, op_id, marker)?;
                    Ok(UpsertOutcome::Inserted)
                }
                Some(waypoint_id) if waypoint_id != marker.waypoint_id.as_str() => {
                    replace_task(conn, op_id, &marker.task.id, |conn| {
                        insert_marker(conn, op_id, marker)
                    })?;
                    Ok(UpsertOutcome::Updated)
                }
                Some(_) => {
                    let mut changed =
                        update_task_row(conn, op_id, &marker.task, write_policy(mode))?;
                    changed |= conn.execute(
                        "UPDATE markers SET marker_type = ?3
                         WHERE op_id = ?1 AND task_id = ?2 AND marker_type IS NOT ?3;",
                        params![
                            op_id.as_str(),
                            marker.task.id.as_str(),
                            marker.marker_type.as_str()
                        ],
                    )? > 0;
                    Ok(changed_outcome(changed))
                }
            }
        })
    }

    fn list_markers(&self, op_id: &OperationId) -> RepoResult<Vec<Marker>> {
        let mut assignments = assignments_by_task(self.conn, op_id)?;
        let mut dependencies = dependencies_by_task(self.conn, op_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT t.task_id AS task_id, t.state AS state, t.sort_order AS sort_order,
                    t.comment AS comment, t.zone AS zone, t.delta_minutes AS delta_minutes,
                    m.waypoint_id AS waypoint_id, m.marker_type AS marker_type
             FROM markers m
             JOIN tasks t ON t.op_id = m.op_id AND t.task_id = m.task_id
             WHERE m.op_id = ?1
             ORDER BY t.sort_order ASC, t.task_id ASC;",
        )?;
        let mut rows = stmt.query([op_id.as_str()])?;
        let mut markers = Vec::new();
        while let Some(row) = rows.next()? {
            let task = parse_task_row(row, &mut assignments, &mut dependencies)?;
            markers.push(Marker {
                task,
                waypoint_id: WaypointId::new(row.get::<_, String>("waypoint_id")?),
                marker_type: row.get("marker_type")?,
            });
        }
        Ok(markers)
    }

    fn link_ids(&self, op_id: &OperationId) -> RepoResult<HashSet<TaskId>> {
        let ids = collect_ids(self.conn, "SELECT task_id FROM links WHERE op_id = ?1;", op_id)?;
        Ok(ids.into_iter().map(TaskId::new).collect())
    }

    fn upsert_link(
        &self,
        op_id: &OperationId,
        link: &Link,
        mode: UpdateMode,
    ) -> RepoResult<UpsertOutcome> {
        atomic(self.conn, |conn| {
            let stored: Option<(String, String)> = conn
                .query_row(
                    "SELECT from_id, to_id FROM links WHERE op_id = ?1 AND task_id = ?2;",
                    params![op_id.as_str(), link.task.id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match stored {
                None => {
                    drop_task_row(conn, op_id, &link.task.id)?;
                    insert_link(conn, op_id, link)?;
                    Ok(UpsertOutcome::Inserted)
                }
                Some((from, to)) if from != link.from.as_str() || to != link.to.as_str() => {
                    replace_task(conn, op_id, &link.task.id, |conn| {
                        insert_link(conn, op_id, link)
                    })?;
                    Ok(UpsertOutcome::Updated)
                }
                Some(_) => {
                    let mut changed =
                        update_task_row(conn, op_id, &link.task, write_policy(mode))?;
                    changed |= conn.execute(
                        "UPDATE links SET color = ?3
                         WHERE op_id = ?1 AND task_id = ?2 AND color IS NOT ?3;",
                        params![op_id.as_str(), link.task.id.as_str(), link.color.as_str()],
                    )? > 0;
                    Ok(changed_outcome(changed))
                }
            }
        })
    }

    fn list_links(&self, op_id: &OperationId) -> RepoResult<Vec<Link>> {
        let mut assignments = assignments_by_task(self.conn, op_id)?;
        let mut dependencies = dependencies_by_task(self.conn, op_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT t.task_id AS task_id, t.state AS state, t.sort_order AS sort_order,
                    t.comment AS comment, t.zone AS zone, t.delta_minutes AS delta_minutes,
                    l.from_id AS from_id, l.to_id AS to_id, l.color AS color
             FROM links l
             JOIN tasks t ON t.op_id = l.op_id AND t.task_id = l.task_id
             WHERE l.op_id = ?1
             ORDER BY t.sort_order ASC, t.task_id ASC;",
        )?;
        let mut rows = stmt.query([op_id.as_str()])?;
        let mut links = Vec::new();
        while let Some(row) = rows.next()? {
            let task = parse_task_row(row, &mut assignments, &mut dependencies)?;
            let color: String = row.get("color")?;
            links.push(Link {
                task,
                from: WaypointId::new(row.get::<_, String>("from_id")?),
                to: WaypointId::new(row.get::<_, String>("to_id")?),
                color: OpColor::from_wire(&color),
            });
        }
        Ok(links)
    }

    fn delete_task(&self, op_id: &OperationId, task_id: &TaskId) -> RepoResult<bool> {
        drop_task_row(self.conn, op_id, task_id)
    }

    fn upsert_key(&self, op_id: &OperationId, key: &KeyOnHand) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO keys_on_hand (op_id, waypoint_id, agent, onhand, capsule)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (op_id, waypoint_id, agent)
             DO UPDATE SET onhand = excluded.onhand, capsule = excluded.capsule;",
            params![
                op_id.as_str(),
                key.waypoint_id.as_str(),
                key.agent.as_str(),
                key.count,
                non_empty(&key.capsule_label),
            ],
        )?;
        Ok(())
    }

    fn list_keys(&self, op_id: &OperationId) -> RepoResult<Vec<KeyOnHand>> {
        let mut stmt = self.conn.prepare(
            "SELECT waypoint_id, agent, onhand, capsule
             FROM keys_on_hand
             WHERE op_id = ?1
             ORDER BY waypoint_id ASC, agent ASC;",
        )?;
        let keys = stmt
            .query_map([op_id.as_str()], |row| {
                let capsule: Option<String> = row.get(3)?;
                Ok(KeyOnHand {
                    waypoint_id: WaypointId::new(row.get::<_, String>(0)?),
                    agent: AgentId::new(row.get::<_, String>(1)?),
                    count: row.get(2)?,
                    capsule_label: capsule.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }
}

fn write_policy(mode: UpdateMode) -> TaskWritePolicy {
    match mode {
        UpdateMode::Design => TaskWritePolicy::Full,
        UpdateMode::Active => TaskWritePolicy::KeepAssignment,
    }
}

fn changed_outcome(changed: bool) -> UpsertOutcome {
    if changed {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Unchanged
    }
}

fn collect_ids(conn: &Connection, sql: &str, op_id: &OperationId) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([op_id.as_str()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

fn drop_task_row(conn: &Connection, op_id: &OperationId, task_id: &TaskId) -> RepoResult<bool> {
    let removed = conn.execute(
        "DELETE FROM tasks WHERE op_id = ?1 AND task_id = ?2;",
        params![op_id.as_str(), task_id.as_str()],
    )?;
    Ok(removed > 0)
}

/// Deletes and re-inserts one task, keeping the edges that point at it.
fn replace_task(
    conn: &Connection,
    op_id: &OperationId,
    task_id: &TaskId,
    insert: impl FnOnce(&Connection) -> RepoResult<()>,
) -> RepoResult<()> {
    let dependents = inbound_dependencies(conn, op_id, task_id)?;
    drop_task_row(conn, op_id, task_id)?;
    insert(conn)?;
    restore_inbound_dependencies(conn, op_id, task_id, &dependents)
}

fn insert_marker(conn: &Connection, op_id: &OperationId, marker: &Marker) -> RepoResult<()> {
    insert_task_row(conn, op_id, &marker.task, TaskKind::Marker)?;
    conn.execute(
        "INSERT INTO markers (op_id, task_id, waypoint_id, marker_type)
         VALUES (?1, ?2, ?3, ?4);",
        params![
            op_id.as_str(),
            marker.task.id.as_str(),
            marker.waypoint_id.as_str(),
            marker.marker_type.as_str(),
        ],
    )?;
    Ok(())
}

fn insert_link(conn: &Connection, op_id: &OperationId, link: &Link) -> RepoResult<()> {
    insert_task_row(conn, op_id, &link.task, TaskKind::Link)?;
    conn.execute(
        "INSERT INTO links (op_id, task_id, from_id, to_id, color)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            op_id.as_str(),
            link.task.id.as_str(),
            link.from.as_str(),
            link.to.as_str(),
            link.color.as_str(),
        ],
    )?;
    Ok(())
}

fn parse_waypoint_row(row: &Row<'_>) -> rusqlite::Result<Waypoint> {
    let comment: Option<String> = row.get("comment")?;
    let hardness: Option<String> = row.get("hardness")?;
    Ok(Waypoint {
        id: WaypointId::new(row.get::<_, String>("waypoint_id")?),
        name: row.get("name")?,
        lat: row.get("lat")?,
        lon: row.get("lon")?,
        comment: comment.unwrap_or_default(),
        hardness: hardness.unwrap_or_default(),
    })
}

fn parse_task_row(
    row: &Row<'_>,
    assignments: &mut HashMap<TaskId, Vec<AgentId>>,
    dependencies: &mut HashMap<TaskId, Vec<TaskId>>,
) -> RepoResult<Task> {
    let id = TaskId::new(row.get::<_, String>("task_id")?);
    let state_text: String = row.get("state")?;
    let comment: Option<String> = row.get("comment")?;
    Ok(Task {
        assignments: assignments.remove(&id).unwrap_or_default(),
        depends_on: dependencies.remove(&id).unwrap_or_default(),
        zone: row.get("zone")?,
        delta_minutes: row.get("delta_minutes")?,
        state: parse_state(&state_text)?,
        comment: comment.unwrap_or_default(),
        order: row.get("sort_order")?,
        id,
    })
}
