//! Team binding management for operations.
//!
//! # Responsibility
//! - Add and remove (team, role) bindings on behalf of the owner.
//!
//! # Invariants
//! - Only the owner may change bindings; everyone else is denied before any
//!   argument is inspected.
//! - Adding an existing binding or removing a missing one is a no-op that
//!   leaves `modified` untouched.

use crate::model::ids::{AgentId, OperationId, TeamId};
use crate::model::operation::{TeamBinding, TeamRole};
use crate::notify::ChangeNotifier;
use crate::repo::OperationStore;
use crate::roster::TeamRoster;
use crate::service::access_service::{AccessLevel, AccessResolver};
use crate::service::error::{OpError, OpResult};
use crate::service::version_service::VersionTracker;
use log::info;

/// Owner-only team binding service.
pub struct PermissionManager<'a, S: OperationStore> {
    store: &'a S,
    access: AccessResolver<'a, S>,
    tracker: VersionTracker<'a, S>,
}

impl<'a, S: OperationStore> PermissionManager<'a, S> {
    pub fn new(
        store: &'a S,
        roster: &'a dyn TeamRoster,
        notifier: &'a dyn ChangeNotifier,
    ) -> Self {
        Self {
            store,
            access: AccessResolver::new(store, roster),
            tracker: VersionTracker::new(store, notifier),
        }
    }

    /// Binds `team_id` to the operation with `role`.
    ///
    /// Returns `true` when the binding was newly added.
    ///
    /// # Errors
    /// - `PermissionDenied` unless `actor` owns the operation.
    /// - `InvalidArgument` for an empty team or unknown role.
    pub fn add_perm(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        team_id: &TeamId,
        role: &str,
    ) -> OpResult<bool> {
        let binding = self.authorize(actor, op_id, team_id, role, "add permission on")?;
        let added = self.store.add_team_binding(op_id, &binding)?;
        self.finish(op_id, &binding, "add", added)?;
        Ok(added)
    }

    /// Removes the (`team_id`, `role`) binding.
    ///
    /// Returns `true` when an existing binding was removed.
    pub fn del_perm(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        team_id: &TeamId,
        role: &str,
    ) -> OpResult<bool> {
        let binding = self.authorize(actor, op_id, team_id, role, "remove permission on")?;
        let removed = self.store.remove_team_binding(op_id, &binding)?;
        self.finish(op_id, &binding, "remove", removed)?;
        Ok(removed)
    }

    /// Current bindings; visible to readers.
    pub fn list_perms(&self, actor: &AgentId, op_id: &OperationId) -> OpResult<Vec<TeamBinding>> {
        self.access
            .require(actor, op_id, "list permissions on", AccessLevel::can_read)?;
        Ok(self.store.team_bindings(op_id)?)
    }

    fn authorize(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        team_id: &TeamId,
        role: &str,
        action: &'static str,
    ) -> OpResult<TeamBinding> {
        self.access
            .require(actor, op_id, action, |level| level == AccessLevel::Owner)?;
        if team_id.is_blank() {
            return Err(OpError::InvalidArgument("team ID must not be empty".to_string()));
        }
        let role = TeamRole::parse(role)
            .ok_or_else(|| OpError::InvalidArgument(format!("unknown team role `{role}`")))?;
        Ok(TeamBinding::new(team_id.clone(), role))
    }

    fn finish(
        &self,
        op_id: &OperationId,
        binding: &TeamBinding,
        change: &str,
        changed: bool,
    ) -> OpResult<()> {
        info!(
            "event=perm_{change} module=permission status=ok op_id={op_id} team_id={} role={} changed={changed}",
            binding.team_id,
            binding.role.as_str()
        );
        if changed {
            self.tracker.touch(op_id)?;
        }
        Ok(())
    }
}
