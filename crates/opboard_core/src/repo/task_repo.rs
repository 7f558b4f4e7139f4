//! Task assignment, dependency and field persistence.
//!
//! # Responsibility
//! - Persist task rows shared by markers and links.
//! - Replace assignee and dependency sets atomically.
//! - Answer assignment lookups used by access resolution.
//!
//! # Invariants
//! - An assignee set is replaced delete-all-then-insert-all inside one atomic
//!   unit, so readers never observe a transient empty set.
//! - Dependency edges never point at their own task.

use super::{non_empty, RepoError, RepoResult, SqliteOperationStore};
use crate::db::atomic;
use crate::model::ids::{AgentId, OperationId, TaskId};
use crate::model::task::{Task, TaskKind, TaskState, TaskSummary};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

/// Single-field task mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFieldUpdate {
    State(TaskState),
    Comment(String),
    Zone(Option<i64>),
    Order(i64),
    DeltaMinutes(i64),
}

/// Repository interface for per-task mutations and assignment queries.
pub trait TaskRepository {
    fn task_summary(&self, op_id: &OperationId, task_id: &TaskId)
        -> RepoResult<Option<TaskSummary>>;
    /// Replaces the assignee set and sets `state` in one atomic unit.
    fn assign_task(
        &self,
        op_id: &OperationId,
        task_id: &TaskId,
        agents: &[AgentId],
        state: TaskState,
    ) -> RepoResult<()>;
    fn update_task_field(
        &self,
        op_id: &OperationId,
        task_id: &TaskId,
        update: &TaskFieldUpdate,
    ) -> RepoResult<()>;
    fn task_dependencies(&self, op_id: &OperationId, task_id: &TaskId) -> RepoResult<Vec<TaskId>>;
    /// Returns `true` when the edge was newly added.
    fn add_dependency(
        &self,
        op_id: &OperationId,
        task_id: &TaskId,
        depends_on: &TaskId,
    ) -> RepoResult<bool>;
    /// Returns `true` when an existing edge was removed.
    fn remove_dependency(
        &self,
        op_id: &OperationId,
        task_id: &TaskId,
        depends_on: &TaskId,
    ) -> RepoResult<bool>;
    /// Whether `agent` holds at least one assignment in the operation.
    fn has_any_assignment(&self, op_id: &OperationId, agent: &AgentId) -> RepoResult<bool>;
    fn assigned_task_ids(&self, op_id: &OperationId, agent: &AgentId) -> RepoResult<Vec<TaskId>>;
}

impl TaskRepository for SqliteOperationStore<'_> {
    fn task_summary(
        &self,
        op_id: &OperationId,
        task_id: &TaskId,
    ) -> RepoResult<Option<TaskSummary>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT kind, state FROM tasks WHERE op_id = ?1 AND task_id = ?2;",
                params![op_id.as_str(), task_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((kind_text, state_text)) = row else {
            return Ok(None);
        };

        let kind = TaskKind::parse(&kind_text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid task kind `{kind_text}` in tasks.kind"))
        })?;
        let state = parse_state(&state_text)?;
        Ok(Some(TaskSummary {
            id: task_id.clone(),
            kind,
            state,
            assignments: load_assignments(self.conn, op_id, task_id)?,
        }))
    }

    fn assign_task(
        &self,
        op_id: &OperationId,
        task_id: &TaskId,
        agents: &[AgentId],
        state: TaskState,
    ) -> RepoResult<()> {
        atomic(self.conn, |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET state = ?3 WHERE op_id = ?1 AND task_id = ?2;",
                params![op_id.as_str(), task_id.as_str(), state.as_str()],
            )?;
            if changed == 0 {
                return Err(RepoError::TaskNotFound(task_id.clone()));
            }
            write_assignments(conn, op_id, task_id, agents)?;
            Ok(())
        })
    }

    fn update_task_field(
        &self,
        op_id: &OperationId,
        task_id: &TaskId,
        update: &TaskFieldUpdate,
    ) -> RepoResult<()> {
        let (op, task) = (op_id.as_str(), task_id.as_str());
        let changed = match update {
            TaskFieldUpdate::State(state) => self.conn.execute(
                "UPDATE tasks SET state = ?3 WHERE op_id = ?1 AND task_id = ?2;",
                params![op, task, state.as_str()],
            )?,
            TaskFieldUpdate::Comment(comment) => self.conn.execute(
                "UPDATE tasks SET comment = ?3 WHERE op_id = ?1 AND task_id = ?2;",
                params![op, task, non_empty(comment)],
            )?,
            TaskFieldUpdate::Zone(zone) => self.conn.execute(
                "UPDATE tasks SET zone = ?3 WHERE op_id = ?1 AND task_id = ?2;",
                params![op, task, zone],
            )?,
            TaskFieldUpdate::Order(order) => self.conn.execute(
                "UPDATE tasks SET sort_order = ?3 WHERE op_id = ?1 AND task_id = ?2;",
                params![op, task, order],
            )?,
            TaskFieldUpdate::DeltaMinutes(delta) => self.conn.execute(
                "UPDATE tasks SET delta_minutes = ?3 WHERE op_id = ?1 AND task_id = ?2;",
                params![op, task, delta],
            )?,
        };
        if changed == 0 {
            return Err(RepoError::TaskNotFound(task_id.clone()));
        }
        Ok(())
    }

    fn task_dependencies(&self, op_id: &OperationId, task_id: &TaskId) -> RepoResult<Vec<TaskId>> {
        let mut stmt = self.conn.prepare(
            "SELECT depends_on FROM depends
             WHERE op_id = ?1 AND task_id = ?2
             ORDER BY depends_on ASC;",
        )?;
        let ids = stmt
            .query_map(params![op_id.as_str(), task_id.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .map(|value| value.map(TaskId::new))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn add_dependency(
        &self,
        op_id: &OperationId,
        task_id: &TaskId,
        depends_on: &TaskId,
    ) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO depends (op_id, task_id, depends_on) VALUES (?1, ?2, ?3);",
            params![op_id.as_str(), task_id.as_str(), depends_on.as_str()],
        )?;
        Ok(inserted > 0)
    }

    fn remove_dependency(
        &self,
        op_id: &OperationId,
        task_id: &TaskId,
        depends_on: &TaskId,
    ) -> RepoResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM depends WHERE op_id = ?1 AND task_id = ?2 AND depends_on = ?3;",
            params![op_id.as_str(), task_id.as_str(), depends_on.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn has_any_assignment(&self, op_id: &OperationId, agent: &AgentId) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM assignments WHERE op_id = ?1 AND agent = ?2);",
            params![op_id.as_str(), agent.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn assigned_task_ids(&self, op_id: &OperationId, agent: &AgentId) -> RepoResult<Vec<TaskId>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.task_id
             FROM assignments a
             JOIN tasks t ON t.op_id = a.op_id AND t.task_id = a.task_id
             WHERE a.op_id = ?1 AND a.agent = ?2
             ORDER BY t.sort_order ASC, a.task_id ASC;",
        )?;
        let ids = stmt
            .query_map(params![op_id.as_str(), agent.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .map(|value| value.map(TaskId::new))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

/// Which task fields an in-place update may overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TaskWritePolicy {
    /// Every field, assignee set and state included.
    Full,
    /// Positional/descriptive fields only.
    KeepAssignment,
}

pub(super) fn insert_task_row(
    conn: &Connection,
    op_id: &OperationId,
    task: &Task,
    kind: TaskKind,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO tasks (op_id, task_id, kind, state, sort_order, comment, zone, delta_minutes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
        params![
            op_id.as_str(),
            task.id.as_str(),
            kind.as_str(),
            task.state.as_str(),
            task.order,
            non_empty(&task.comment),
            task.zone,
            task.delta_minutes,
        ],
    )?;
    write_assignments(conn, op_id, &task.id, &task.assignee_set())?;
    write_dependencies(conn, op_id, &task.id, &task.dependency_set())?;
    Ok(())
}

/// Updates an existing task row in place; returns whether anything changed.
pub(super) fn update_task_row(
    conn: &Connection,
    op_id: &OperationId,
    task: &Task,
    policy: TaskWritePolicy,
) -> RepoResult<bool> {
    let mut changed = conn.execute(
        "UPDATE tasks
         SET sort_order = ?3, comment = ?4, zone = ?5, delta_minutes = ?6
         WHERE op_id = ?1 AND task_id = ?2
           AND (sort_order IS NOT ?3
                OR comment IS NOT ?4
                OR zone IS NOT ?5
                OR delta_minutes IS NOT ?6);",
        params![
            op_id.as_str(),
            task.id.as_str(),
            task.order,
            non_empty(&task.comment),
            task.zone,
            task.delta_minutes,
        ],
    )? > 0;

    if policy == TaskWritePolicy::Full {
        changed |= conn.execute(
            "UPDATE tasks SET state = ?3
             WHERE op_id = ?1 AND task_id = ?2 AND state IS NOT ?3;",
            params![op_id.as_str(), task.id.as_str(), task.state.as_str()],
        )? > 0;
        changed |= sync_assignments(conn, op_id, &task.id, &task.assignee_set())?;
    }
    changed |= sync_dependencies(conn, op_id, &task.id, &task.dependency_set())?;
    Ok(changed)
}

/// Tasks whose dependency sets name `task_id`.
pub(super) fn inbound_dependencies(
    conn: &Connection,
    op_id: &OperationId,
    task_id: &TaskId,
) -> RepoResult<Vec<TaskId>> {
    let mut stmt = conn.prepare(
        "SELECT task_id FROM depends WHERE op_id = ?1 AND depends_on = ?2;",
    )?;
    let ids = stmt
        .query_map(params![op_id.as_str(), task_id.as_str()], |row| {
            row.get::<_, String>(0)
        })?
        .map(|value| value.map(TaskId::new))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub(super) fn restore_inbound_dependencies(
    conn: &Connection,
    op_id: &OperationId,
    task_id: &TaskId,
    dependents: &[TaskId],
) -> RepoResult<()> {
    for dependent in dependents {
        conn.execute(
            "INSERT OR IGNORE INTO depends (op_id, task_id, depends_on)
             SELECT op_id, task_id, ?3 FROM tasks WHERE op_id = ?1 AND task_id = ?2;",
            params![op_id.as_str(), dependent.as_str(), task_id.as_str()],
        )?;
    }
    Ok(())
}

/// Loads all assignee sets of an operation keyed by task.
pub(super) fn assignments_by_task(
    conn: &Connection,
    op_id: &OperationId,
) -> RepoResult<HashMap<TaskId, Vec<AgentId>>> {
    let mut stmt = conn.prepare(
        "SELECT task_id, agent FROM assignments WHERE op_id = ?1 ORDER BY task_id, agent;",
    )?;
    let mut rows = stmt.query([op_id.as_str()])?;
    let mut map: HashMap<TaskId, Vec<AgentId>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let task_id = TaskId::new(row.get::<_, String>(0)?);
        let agent = AgentId::new(row.get::<_, String>(1)?);
        map.entry(task_id).or_default().push(agent);
    }
    Ok(map)
}

/// Loads all dependency sets of an operation keyed by task.
pub(super) fn dependencies_by_task(
    conn: &Connection,
    op_id: &OperationId,
) -> RepoResult<HashMap<TaskId, Vec<TaskId>>> {
    let mut stmt = conn.prepare(
        "SELECT task_id, depends_on FROM depends WHERE op_id = ?1 ORDER BY task_id, depends_on;",
    )?;
    let mut rows = stmt.query([op_id.as_str()])?;
    let mut map: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let task_id = TaskId::new(row.get::<_, String>(0)?);
        let depends_on = TaskId::new(row.get::<_, String>(1)?);
        map.entry(task_id).or_default().push(depends_on);
    }
    Ok(map)
}

pub(super) fn parse_state(value: &str) -> RepoResult<TaskState> {
    TaskState::parse(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid task state `{value}` in tasks.state"))
    })
}

fn load_assignments(
    conn: &Connection,
    op_id: &OperationId,
    task_id: &TaskId,
) -> RepoResult<Vec<AgentId>> {
    let mut stmt = conn.prepare(
        "SELECT agent FROM assignments
         WHERE op_id = ?1 AND task_id = ?2
         ORDER BY agent ASC;",
    )?;
    let agents = stmt
        .query_map(params![op_id.as_str(), task_id.as_str()], |row| {
            row.get::<_, String>(0)
        })?
        .map(|value| value.map(AgentId::new))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(agents)
}

/// Delete-all-then-insert-all; callers provide the surrounding atomic unit.
fn write_assignments(
    conn: &Connection,
    op_id: &OperationId,
    task_id: &TaskId,
    agents: &[AgentId],
) -> RepoResult<()> {
    conn.execute(
        "DELETE FROM assignments WHERE op_id = ?1 AND task_id = ?2;",
        params![op_id.as_str(), task_id.as_str()],
    )?;
    for agent in agents.iter().filter(|agent| !agent.is_blank()) {
        conn.execute(
            "INSERT OR IGNORE INTO assignments (op_id, task_id, agent) VALUES (?1, ?2, ?3);",
            params![op_id.as_str(), task_id.as_str(), agent.as_str()],
        )?;
    }
    Ok(())
}

fn sync_assignments(
    conn: &Connection,
    op_id: &OperationId,
    task_id: &TaskId,
    agents: &[AgentId],
) -> RepoResult<bool> {
    if load_assignments(conn, op_id, task_id)? == agents {
        return Ok(false);
    }
    write_assignments(conn, op_id, task_id, agents)?;
    Ok(true)
}

fn write_dependencies(
    conn: &Connection,
    op_id: &OperationId,
    task_id: &TaskId,
    depends_on: &[TaskId],
) -> RepoResult<()> {
    conn.execute(
        "DELETE FROM depends WHERE op_id = ?1 AND task_id = ?2;",
        params![op_id.as_str(), task_id.as_str()],
    )?;
    for target in depends_on.iter().filter(|target| *target != task_id) {
        conn.execute(
            "INSERT OR IGNORE INTO depends (op_id, task_id, depends_on) VALUES (?1, ?2, ?3);",
            params![op_id.as_str(), task_id.as_str(), target.as_str()],
        )?;
    }
    Ok(())
}

fn sync_dependencies(
    conn: &Connection,
    op_id: &OperationId,
    task_id: &TaskId,
    depends_on: &[TaskId],
) -> RepoResult<bool> {
    let mut stmt = conn.prepare(
        "SELECT depends_on FROM depends
         WHERE op_id = ?1 AND task_id = ?2
         ORDER BY depends_on ASC;",
    )?;
    let current = stmt
        .query_map(params![op_id.as_str(), task_id.as_str()], |row| {
            row.get::<_, String>(0)
        })?
        .map(|value| value.map(TaskId::new))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if current == depends_on {
        return Ok(false);
    }
    write_dependencies(conn, op_id, task_id, depends_on)?;
    Ok(true)
}
