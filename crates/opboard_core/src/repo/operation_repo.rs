//! Operation header, team binding and version stamp persistence.
//!
//! # Responsibility
//! - Create, read, mutate and delete top-level operation rows.
//! - Persist team bindings and the monotonic `modified` stamp.
//!
//! # Invariants
//! - `insert_operation` never overwrites an existing row.
//! - `touch_operation` always moves `modified` strictly forward.
//! - Deleting an operation cascades to every contained row.

use super::{ensure_store_connection_ready, non_empty, OperationStore, RepoError, RepoResult};
use crate::db::atomic;
use crate::model::ids::{AgentId, OperationId, TeamId};
use crate::model::operation::{OpColor, OperationRecord, TeamBinding, TeamRole};
use crate::model::timestamp::from_epoch_ms;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

/// Repository interface for operation rows and team bindings.
pub trait OperationRepository {
    fn operation_exists(&self, op_id: &OperationId) -> RepoResult<bool>;
    /// Inserts a new operation row; `AlreadyExists` when the ID is taken.
    fn insert_operation(&self, record: &OperationRecord) -> RepoResult<()>;
    fn get_operation(&self, op_id: &OperationId) -> RepoResult<Option<OperationRecord>>;
    /// Overwrites name, color and comment.
    fn update_operation_fields(
        &self,
        op_id: &OperationId,
        name: &str,
        color: OpColor,
        comment: &str,
    ) -> RepoResult<()>;
    fn rename_operation(&self, op_id: &OperationId, name: &str) -> RepoResult<()>;
    fn set_operation_owner(&self, op_id: &OperationId, owner: &AgentId) -> RepoResult<()>;
    fn set_operation_comment(&self, op_id: &OperationId, comment: &str) -> RepoResult<()>;
    fn delete_operation(&self, op_id: &OperationId) -> RepoResult<()>;
    /// Stamps `modified` with `max(now_ms, previous + 1)` and returns it.
    fn touch_operation(&self, op_id: &OperationId, now_ms: i64) -> RepoResult<DateTime<Utc>>;
    fn team_bindings(&self, op_id: &OperationId) -> RepoResult<Vec<TeamBinding>>;
    /// Returns `true` when the binding was newly added.
    fn add_team_binding(&self, op_id: &OperationId, binding: &TeamBinding) -> RepoResult<bool>;
    /// Returns `true` when an existing binding was removed.
    fn remove_team_binding(&self, op_id: &OperationId, binding: &TeamBinding)
        -> RepoResult<bool>;
}

/// SQLite-backed operation store.
///
/// One value implements every repository contract so services can run
/// several calls inside one atomic unit on the same connection.
pub struct SqliteOperationStore<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> SqliteOperationStore<'conn> {
    /// Creates the store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl OperationStore for SqliteOperationStore<'_> {
    fn within_unit<T>(&self, body: impl FnOnce() -> RepoResult<T>) -> RepoResult<T> {
        atomic(self.conn, |_| body())
    }
}

impl OperationRepository for SqliteOperationStore<'_> {
    fn operation_exists(&self, op_id: &OperationId) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM operations WHERE op_id = ?1);",
            [op_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn insert_operation(&self, record: &OperationRecord) -> RepoResult<()> {
        let result = self.conn.execute(
            "INSERT INTO operations (op_id, name, owner, color, comment, modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                record.id.as_str(),
                record.name.as_str(),
                record.owner.as_str(),
                record.color.as_str(),
                non_empty(&record.comment),
                record.modified.timestamp_millis(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(RepoError::AlreadyExists(record.id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn get_operation(&self, op_id: &OperationId) -> RepoResult<Option<OperationRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT op_id, name, owner, color, comment, modified
                 FROM operations
                 WHERE op_id = ?1;",
                [op_id.as_str()],
                parse_operation_row,
            )
            .optional()?;
        Ok(record)
    }

    fn update_operation_fields(
        &self,
        op_id: &OperationId,
        name: &str,
        color: OpColor,
        comment: &str,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE operations
             SET name = ?2, color = ?3, comment = ?4
             WHERE op_id = ?1;",
            params![op_id.as_str(), name, color.as_str(), non_empty(comment)],
        )?;
        require_changed(changed, op_id)
    }

    fn rename_operation(&self, op_id: &OperationId, name: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE operations SET name = ?2 WHERE op_id = ?1;",
            params![op_id.as_str(), name],
        )?;
        require_changed(changed, op_id)
    }

    fn set_operation_owner(&self, op_id: &OperationId, owner: &AgentId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE operations SET owner = ?2 WHERE op_id = ?1;",
            params![op_id.as_str(), owner.as_str()],
        )?;
        require_changed(changed, op_id)
    }

    fn set_operation_comment(&self, op_id: &OperationId, comment: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE operations SET comment = ?2 WHERE op_id = ?1;",
            params![op_id.as_str(), non_empty(comment)],
        )?;
        require_changed(changed, op_id)
    }

    fn delete_operation(&self, op_id: &OperationId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM operations WHERE op_id = ?1;", [op_id.as_str()])?;
        require_changed(changed, op_id)
    }

    fn touch_operation(&self, op_id: &OperationId, now_ms: i64) -> RepoResult<DateTime<Utc>> {
        let modified: Option<i64> = self
            .conn
            .query_row(
                "UPDATE operations
                 SET modified = MAX(modified + 1, ?2)
                 WHERE op_id = ?1
                 RETURNING modified;",
                params![op_id.as_str(), now_ms],
                |row| row.get(0),
            )
            .optional()?;
        modified
            .map(from_epoch_ms)
            .ok_or_else(|| RepoError::OperationNotFound(op_id.clone()))
    }

    fn team_bindings(&self, op_id: &OperationId) -> RepoResult<Vec<TeamBinding>> {
        let mut stmt = self.conn.prepare(
            "SELECT team_id, role
             FROM op_teams
             WHERE op_id = ?1
             ORDER BY team_id ASC, role ASC;",
        )?;
        let mut rows = stmt.query([op_id.as_str()])?;
        let mut bindings = Vec::new();
        while let Some(row) = rows.next()? {
            let team_id: String = row.get(0)?;
            let role_text: String = row.get(1)?;
            let role = TeamRole::parse(&role_text).ok_or_else(|| {
                RepoError::InvalidData(format!("invalid role `{role_text}` in op_teams.role"))
            })?;
            bindings.push(TeamBinding {
                team_id: TeamId::new(team_id),
                role,
            });
        }
        Ok(bindings)
    }

    fn add_team_binding(&self, op_id: &OperationId, binding: &TeamBinding) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO op_teams (op_id, team_id, role) VALUES (?1, ?2, ?3);",
            params![
                op_id.as_str(),
                binding.team_id.as_str(),
                binding.role.as_str()
            ],
        )?;
        Ok(inserted > 0)
    }

    fn remove_team_binding(
        &self,
        op_id: &OperationId,
        binding: &TeamBinding,
    ) -> RepoResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM op_teams WHERE op_id = ?1 AND team_id = ?2 AND role = ?3;",
            params![
                op_id.as_str(),
                binding.team_id.as_str(),
                binding.role.as_str()
            ],
        )?;
        Ok(removed > 0)
    }
}

fn require_changed(changed: usize, op_id: &OperationId) -> RepoResult<()> {
    if changed == 0 {
        return Err(RepoError::OperationNotFound(op_id.clone()));
    }
    Ok(())
}

fn parse_operation_row(row: &Row<'_>) -> rusqlite::Result<OperationRecord> {
    let color: String = row.get("color")?;
    let comment: Option<String> = row.get("comment")?;
    Ok(OperationRecord {
        id: OperationId::new(row.get::<_, String>("op_id")?),
        name: row.get("name")?,
        owner: AgentId::new(row.get::<_, String>("owner")?),
        color: OpColor::from_wire(&color),
        comment: comment.unwrap_or_default(),
        modified: from_epoch_ms(row.get("modified")?),
    })
}
