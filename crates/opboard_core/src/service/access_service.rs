//! Access tier resolution for one agent on one operation.
//!
//! # Responsibility
//! - Resolve the highest access tier an agent holds on an operation.
//! - Answer the owner/write/read/assigned-only predicates used as gates.
//!
//! # Invariants
//! - Ownership is exclusive and always outranks team bindings.
//! - A team binding only counts when the roster confirms membership.
//! - `AssignedOnly` never applies when a read-or-better binding matches.
//! - Predicates on a missing operation answer `false`; `resolve` reports
//!   `OperationNotFound`.

use crate::model::ids::{AgentId, OperationId};
use crate::model::operation::TeamRole;
use crate::repo::OperationStore;
use crate::roster::TeamRoster;
use crate::service::error::{OpError, OpResult};
use log::{debug, warn};

/// Access tier, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    None,
    /// Restricted read of the agent's own assigned tasks.
    AssignedOnly,
    Read,
    Write,
    Owner,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AssignedOnly => "assignedonly",
            Self::Read => "read",
            Self::Write => "write",
            Self::Owner => "owner",
        }
    }

    pub fn can_read(self) -> bool {
        self >= Self::Read
    }

    pub fn can_write(self) -> bool {
        self >= Self::Write
    }

    fn granted_by(role: TeamRole) -> Self {
        match role {
            TeamRole::Read => Self::Read,
            TeamRole::Write => Self::Write,
            TeamRole::AssignedOnly => Self::AssignedOnly,
        }
    }
}

/// Resolves access tiers from ownership, team bindings and assignments.
pub struct AccessResolver<'a, S: OperationStore> {
    store: &'a S,
    roster: &'a dyn TeamRoster,
}

impl<'a, S: OperationStore> AccessResolver<'a, S> {
    pub fn new(store: &'a S, roster: &'a dyn TeamRoster) -> Self {
        Self { store, roster }
    }

    /// Returns the highest tier `agent` holds on `op_id`.
    ///
    /// # Errors
    /// - `OperationNotFound` when the operation does not exist.
    /// - `Store`/`Roster` when a lookup fails.
    pub fn resolve(&self, agent: &AgentId, op_id: &OperationId) -> OpResult<AccessLevel> {
        let record = self
            .store
            .get_operation(op_id)?
            .ok_or_else(|| OpError::OperationNotFound(op_id.clone()))?;
        if !agent.is_blank() && record.owner == *agent {
            return Ok(AccessLevel::Owner);
        }

        let mut level = AccessLevel::None;
        for binding in self.store.team_bindings(op_id)? {
            let granted = AccessLevel::granted_by(binding.role);
            if granted <= level {
                continue;
            }
            if self.roster.is_agent_on_team(agent, &binding.team_id)? {
                level = granted;
            }
        }

        if level == AccessLevel::None && self.store.has_any_assignment(op_id, agent)? {
            level = AccessLevel::AssignedOnly;
        }
        debug!(
            "event=access_resolve module=access status=ok op_id={op_id} level={}",
            level.as_str()
        );
        Ok(level)
    }

    pub fn is_owner(&self, agent: &AgentId, op_id: &OperationId) -> OpResult<bool> {
        self.check(agent, op_id, |level| level == AccessLevel::Owner)
    }

    /// Owner or a member of a team bound with `write`.
    pub fn has_write_access(&self, agent: &AgentId, op_id: &OperationId) -> OpResult<bool> {
        self.check(agent, op_id, AccessLevel::can_write)
    }

    /// Write access or a member of a team bound with `read`.
    pub fn has_read_access(&self, agent: &AgentId, op_id: &OperationId) -> OpResult<bool> {
        self.check(agent, op_id, AccessLevel::can_read)
    }

    /// True only when the agent's best tier is exactly `AssignedOnly`.
    pub fn has_assigned_only_access(
        &self,
        agent: &AgentId,
        op_id: &OperationId,
    ) -> OpResult<bool> {
        self.check(agent, op_id, |level| level == AccessLevel::AssignedOnly)
    }

    /// Resolves the tier and fails with `PermissionDenied` unless `allowed`.
    pub(crate) fn require(
        &self,
        agent: &AgentId,
        op_id: &OperationId,
        action: &'static str,
        allowed: impl Fn(AccessLevel) -> bool,
    ) -> OpResult<AccessLevel> {
        let level = self.resolve(agent, op_id)?;
        if allowed(level) {
            return Ok(level);
        }
        warn!(
            "event=access_denied module=access status=denied op_id={op_id} agent={agent} action={action} level={}",
            level.as_str()
        );
        Err(OpError::denied(agent, op_id, action))
    }

    fn check(
        &self,
        agent: &AgentId,
        op_id: &OperationId,
        predicate: impl Fn(AccessLevel) -> bool,
    ) -> OpResult<bool> {
        match self.resolve(agent, op_id) {
            Ok(level) => Ok(predicate(level)),
            Err(OpError::OperationNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
