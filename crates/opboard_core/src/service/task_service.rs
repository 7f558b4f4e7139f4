//! Per-task mutations on markers and links.
//!
//! # Responsibility
//! - Assign, claim and transition tasks.
//! - Edit task fields and dependency edges.
//! - List the tasks assigned to one agent.
//!
//! # Invariants
//! - Field and assignment edits require write access.
//! - Progress transitions are open to the task's assignees and to writers.
//! - A claim succeeds only on an unassigned task (or one already held by the
//!   claimant).
//! - Every successful mutation stamps the operation.

use crate::model::ids::{AgentId, OperationId, TaskId};
use crate::model::task::{TaskState, TaskSummary};
use crate::notify::ChangeNotifier;
use crate::repo::{OperationStore, TaskFieldUpdate};
use crate::roster::TeamRoster;
use crate::service::access_service::{AccessLevel, AccessResolver};
use crate::service::error::{OpError, OpResult};
use crate::service::version_service::VersionTracker;
use log::{info, warn};

/// Progress step requested by an assignee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Acknowledge,
    Complete,
    /// Reopens a completed task.
    Incomplete,
    Reject,
}

impl Transition {
    fn as_str(self) -> &'static str {
        match self {
            Self::Acknowledge => "acknowledge",
            Self::Complete => "complete",
            Self::Incomplete => "incomplete",
            Self::Reject => "reject",
        }
    }

    fn target_state(self, summary: &TaskSummary) -> TaskState {
        match self {
            Self::Acknowledge => TaskState::Acknowledged,
            Self::Complete => TaskState::Completed,
            Self::Incomplete if summary.assignments.is_empty() => TaskState::Pending,
            Self::Incomplete => TaskState::Assigned,
            Self::Reject => TaskState::Rejected,
        }
    }
}

/// Use-case service for task-level edits.
pub struct TaskService<'a, S: OperationStore> {
    store: &'a S,
    access: AccessResolver<'a, S>,
    tracker: VersionTracker<'a, S>,
}

impl<'a, S: OperationStore> TaskService<'a, S> {
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

    /// Replaces the assignee set of a task.
    ///
    /// # Contract
    /// - Blank and duplicate agents are dropped.
    /// - State becomes `assigned`, or `pending` when the set is empty.
    pub fn assign(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
        agents: &[AgentId],
    ) -> OpResult<()> {
        self.access
            .require(actor, op_id, "assign tasks in", AccessLevel::can_write)?;
        let mut agents: Vec<AgentId> = agents
            .iter()
            .filter(|agent| !agent.is_blank())
            .cloned()
            .collect();
        agents.sort();
        agents.dedup();
        let state = if agents.is_empty() {
            TaskState::Pending
        } else {
            TaskState::Assigned
        };

        self.store
            .assign_task(op_id, task_id, &agents, state)
            .map_err(|err| OpError::from(err).in_operation(op_id))?;
        info!(
            "event=task_assign module=task status=ok op_id={op_id} task_id={task_id} assignees={}",
            agents.len()
        );
        self.tracker.touch(op_id)?;
        Ok(())
    }

    /// Takes an unassigned task for `actor`. Requires read access.
    pub fn claim(&self, actor: &AgentId, op_id: &OperationId, task_id: &TaskId) -> OpResult<()> {
        self.access
            .require(actor, op_id, "claim tasks in", AccessLevel::can_read)?;
        let summary = self.summary(op_id, task_id)?;
        if !summary.assignments.is_empty() && !summary.is_assigned_to(actor) {
            return Err(OpError::InvalidArgument(format!(
                "task {task_id} is already assigned"
            )));
        }

        self.store
            .assign_task(op_id, task_id, std::slice::from_ref(actor), TaskState::Assigned)
            .map_err(|err| OpError::from(err).in_operation(op_id))?;
        info!("event=task_claim module=task status=ok op_id={op_id} task_id={task_id}");
        self.tracker.touch(op_id)?;
        Ok(())
    }

    pub fn acknowledge(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
    ) -> OpResult<()> {
        self.transition(actor, op_id, task_id, Transition::Acknowledge)
    }

    pub fn complete(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
    ) -> OpResult<()> {
        self.transition(actor, op_id, task_id, Transition::Complete)
    }

    pub fn incomplete(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
    ) -> OpResult<()> {
        self.transition(actor, op_id, task_id, Transition::Incomplete)
    }

    pub fn reject(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
    ) -> OpResult<()> {
        self.transition(actor, op_id, task_id, Transition::Reject)
    }

    /// Applies a progress step. Open to assignees and writers.
    pub fn transition(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
        transition: Transition,
    ) -> OpResult<()> {
        let level = self.access.resolve(actor, op_id)?;
        let summary = self.summary(op_id, task_id)?;
        if !level.can_write() && !summary.is_assigned_to(actor) {
            warn!(
                "event=access_denied module=task status=denied op_id={op_id} task_id={task_id} action={}",
                transition.as_str()
            );
            return Err(OpError::denied(actor, op_id, "change task state in"));
        }

        let state = transition.target_state(&summary);
        self.update_field(op_id, task_id, TaskFieldUpdate::State(state))?;
        info!(
            "event=task_transition module=task status=ok op_id={op_id} task_id={task_id} transition={} state={}",
            transition.as_str(),
            state.as_str()
        );
        self.tracker.touch(op_id)?;
        Ok(())
    }

    pub fn set_comment(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
        comment: &str,
    ) -> OpResult<()> {
        let update = TaskFieldUpdate::Comment(comment.to_string());
        self.edit(actor, op_id, task_id, update)
    }

    /// Sets or clears the task's zone.
    pub fn set_zone(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
        zone: Option<i64>,
    ) -> OpResult<()> {
        self.edit(actor, op_id, task_id, TaskFieldUpdate::Zone(zone))
    }

    pub fn set_order(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
        order: i64,
    ) -> OpResult<()> {
        self.edit(actor, op_id, task_id, TaskFieldUpdate::Order(order))
    }

    /// Sets the start offset in minutes relative to the operation start.
    pub fn set_delta(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
        delta_minutes: i64,
    ) -> OpResult<()> {
        if delta_minutes < 0 {
            return Err(OpError::InvalidArgument(
                "delta minutes must not be negative".to_string(),
            ));
        }
        let update = TaskFieldUpdate::DeltaMinutes(delta_minutes);
        self.edit(actor, op_id, task_id, update)
    }

    /// Makes `task_id` depend on `depends_on`.
    ///
    /// Returns `true` when the edge was newly added.
    pub fn add_depend(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
        depends_on: &TaskId,
    ) -> OpResult<bool> {
        self.access
            .require(actor, op_id, "edit dependencies in", AccessLevel::can_write)?;
        if task_id == depends_on {
            return Err(OpError::InvalidArgument(format!(
                "task {task_id} cannot depend on itself"
            )));
        }
        self.summary(op_id, task_id)?;
        self.summary(op_id, depends_on)?;

        let added = self.store.add_dependency(op_id, task_id, depends_on)?;
        if added {
            self.tracker.touch(op_id)?;
        }
        Ok(added)
    }

    /// Returns `true` when an existing edge was removed.
    pub fn del_depend(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
        depends_on: &TaskId,
    ) -> OpResult<bool> {
        self.access
            .require(actor, op_id, "edit dependencies in", AccessLevel::can_write)?;
        let removed = self.store.remove_dependency(op_id, task_id, depends_on)?;
        if removed {
            self.tracker.touch(op_id)?;
        }
        Ok(removed)
    }

    pub fn dependencies(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
    ) -> OpResult<Vec<TaskId>> {
        self.access
            .require(actor, op_id, "read", AccessLevel::can_read)?;
        self.summary(op_id, task_id)?;
        Ok(self.store.task_dependencies(op_id, task_id)?)
    }

    /// Task IDs assigned to `agent`, visible to any caller who can see the
    /// operation.
    pub fn assigned_tasks(&self, agent: &AgentId, op_id: &OperationId) -> OpResult<Vec<TaskId>> {
        self.access.require(agent, op_id, "read", |level| {
            level >= AccessLevel::AssignedOnly
        })?;
        Ok(self.store.assigned_task_ids(op_id, agent)?)
    }

    fn edit(
        &self,
        actor: &AgentId,
        op_id: &OperationId,
        task_id: &TaskId,
        update: TaskFieldUpdate,
    ) -> OpResult<()> {
        self.access
            .require(actor, op_id, "edit tasks in", AccessLevel::can_write)?;
        self.update_field(op_id, task_id, update)?;
        self.tracker.touch(op_id)?;
        Ok(())
    }

    fn update_field(
        &self,
        op_id: &OperationId,
        task_id: &TaskId,
        update: TaskFieldUpdate,
    ) -> OpResult<()> {
        self.store
            .update_task_field(op_id, task_id, &update)
            .map_err(|err| OpError::from(err).in_operation(op_id))
    }

    fn summary(&self, op_id: &OperationId, task_id: &TaskId) -> OpResult<TaskSummary> {
        self.store
            .task_summary(op_id, task_id)?
            .ok_or_else(|| OpError::TaskNotFound {
                op_id: op_id.clone(),
                task_id: task_id.clone(),
            })
    }
}
