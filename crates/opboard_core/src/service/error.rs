//! Operation service error taxonomy.
//!
//! # Responsibility
//! - Map repository, snapshot and collaborator failures onto the categories
//!   callers branch on (`ErrorKind`).
//!
//! # Invariants
//! - `PermissionDenied` never reveals more than the denied action.
//! - Store failures stay opaque to callers; the source error is kept for
//!   logging only.

use crate::model::ids::{AgentId, OperationId, TaskId};
use crate::model::operation::SnapshotError;
use crate::repo::RepoError;
use crate::roster::RosterError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type OpResult<T> = Result<T, OpError>;

/// Coarse failure category, stable across error detail changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    MalformedInput,
    InvalidArgument,
    Store,
}

/// Errors surfaced by operation, task and permission services.
#[derive(Debug)]
pub enum OpError {
    OperationNotFound(OperationId),
    TaskNotFound {
        op_id: OperationId,
        task_id: TaskId,
    },
    AlreadyExists(OperationId),
    PermissionDenied {
        agent: AgentId,
        op_id: OperationId,
        action: &'static str,
    },
    MalformedInput(String),
    InvalidArgument(String),
    /// Snapshot parse or structural failure.
    Snapshot(SnapshotError),
    Roster(RosterError),
    Store(RepoError),
}

impl OpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OperationNotFound(_) | Self::TaskNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::MalformedInput(_) | Self::Snapshot(_) => ErrorKind::MalformedInput,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Roster(_) | Self::Store(_) => ErrorKind::Store,
        }
    }

    pub(crate) fn denied(agent: &AgentId, op_id: &OperationId, action: &'static str) -> Self {
        Self::PermissionDenied {
            agent: agent.clone(),
            op_id: op_id.clone(),
            action,
        }
    }

    /// Attaches the operation to a repository `TaskNotFound`.
    pub(crate) fn in_operation(self, op_id: &OperationId) -> Self {
        match self {
            Self::Store(RepoError::TaskNotFound(task_id)) => Self::TaskNotFound {
                op_id: op_id.clone(),
                task_id,
            },
            other => other,
        }
    }
}

impl Display for OpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OperationNotFound(id) => write!(f, "operation not found: {id}"),
            Self::TaskNotFound { op_id, task_id } => {
                write!(f, "task {task_id} not found in operation {op_id}")
            }
            Self::AlreadyExists(id) => write!(f, "operation already exists: {id}"),
            Self::PermissionDenied {
                agent,
                op_id,
                action,
            } => write!(f, "agent {agent} may not {action} operation {op_id}"),
            Self::MalformedInput(message) => write!(f, "malformed input: {message}"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::Snapshot(err) => write!(f, "{err}"),
            Self::Roster(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "operation store failure: {err}"),
        }
    }
}

impl Error for OpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Snapshot(err) => Some(err),
            Self::Roster(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for OpError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::OperationNotFound(id) => Self::OperationNotFound(id),
            RepoError::AlreadyExists(id) => Self::AlreadyExists(id),
            other => Self::Store(other),
        }
    }
}

impl From<SnapshotError> for OpError {
    fn from(value: SnapshotError) -> Self {
        Self::Snapshot(value)
    }
}

impl From<RosterError> for OpError {
    fn from(value: RosterError) -> Self {
        Self::Roster(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, OpError};
    use crate::model::ids::{OperationId, TaskId};
    use crate::repo::RepoError;

    #[test]
    fn repo_errors_map_to_semantic_kinds() {
        let not_found: OpError = RepoError::OperationNotFound(OperationId::new("op")).into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let exists: OpError = RepoError::AlreadyExists(OperationId::new("op")).into();
        assert_eq!(exists.kind(), ErrorKind::AlreadyExists);

        let invalid: OpError = RepoError::InvalidData("bad".to_string()).into();
        assert_eq!(invalid.kind(), ErrorKind::Store);
    }

    #[test]
    fn task_not_found_gains_operation_context() {
        let err: OpError = RepoError::TaskNotFound(TaskId::new("t1")).into();
        let err = err.in_operation(&OperationId::new("op"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(err, OpError::TaskNotFound { .. }));
    }
}
