//! Repository layer abstractions and SQLite persistence.
//!
//! # Responsibility
//! - Define the store contracts consumed by the reconciliation and access
//!   services (`OperationRepository`, `DrawRepository`, `TaskRepository`).
//! - Keep SQL details and cascade behavior inside the persistence boundary.
//!
//! # Invariants
//! - Repositories only accept connections migrated to the latest schema.
//! - Multi-statement writes run inside one atomic unit.
//! - Semantic errors (`OperationNotFound`, `AlreadyExists`) are distinct from
//!   transport errors (`Db`).

use crate::db::migrations::{current_version, latest_version};
use crate::db::DbError;
use crate::model::ids::{OperationId, TaskId};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod draw_repo;
pub mod operation_repo;
pub mod task_repo;

pub use draw_repo::{DrawRepository, UpsertOutcome};
pub use operation_repo::{OperationRepository, SqliteOperationStore};
pub use task_repo::{TaskFieldUpdate, TaskRepository};

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from operation store queries and mutations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    OperationNotFound(OperationId),
    TaskNotFound(TaskId),
    /// Operation ID already in use on create.
    AlreadyExists(OperationId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::OperationNotFound(id) => write!(f, "operation not found: {id}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::AlreadyExists(id) => write!(f, "operation already exists: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "operation store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted operation data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Full store contract required by the operation services.
///
/// `within_unit` groups several repository calls into one atomic unit; calls
/// nested inside it become savepoints.
pub trait OperationStore: OperationRepository + DrawRepository + TaskRepository {
    fn within_unit<T>(&self, body: impl FnOnce() -> RepoResult<T>) -> RepoResult<T>;
}

fn ensure_store_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

/// Empty strings are stored as SQL `NULL`.
fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
