//! Task model shared by markers and links.
//!
//! # Responsibility
//! - Define the assignable unit of work and its two concrete kinds.
//! - Normalize wire task state values at the boundary.
//!
//! # Invariants
//! - Unknown or empty wire states read as `TaskState::Pending`.
//! - A task never depends on itself; blank IDs are dropped from sets.

use crate::model::ids::{AgentId, TaskId, WaypointId};
use crate::model::operation::OpColor;
use serde::{Deserialize, Serialize};

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum TaskState {
    #[default]
    Pending,
    Assigned,
    Acknowledged,
    Completed,
    Rejected,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Acknowledged => "acknowledged",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    /// Strict parse used for persisted values.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "acknowledged" => Some(Self::Acknowledged),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Lenient parse used for wire values.
    pub fn from_wire(value: &str) -> Self {
        Self::parse(value.trim().to_ascii_lowercase().as_str()).unwrap_or_default()
    }
}

impl From<Option<String>> for TaskState {
    fn from(value: Option<String>) -> Self {
        value.as_deref().map(Self::from_wire).unwrap_or_default()
    }
}

impl From<TaskState> for String {
    fn from(value: TaskState) -> Self {
        value.as_str().to_string()
    }
}

/// Concrete task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Marker,
    Link,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Marker => "marker",
            Self::Link => "link",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "marker" => Some(Self::Marker),
            "link" => Some(Self::Link),
            _ => None,
        }
    }
}

/// Fields common to every task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "ID")]
    pub id: TaskId,
    #[serde(default)]
    pub assignments: Vec<AgentId>,
    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<i64>,
    #[serde(rename = "deltaminutes", default)]
    pub delta_minutes: i64,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default)]
    pub order: i64,
}

impl Task {
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Sorted, de-duplicated assignee set without blank entries.
    pub fn assignee_set(&self) -> Vec<AgentId> {
        normalize_set(&self.assignments, |agent| agent.is_blank())
    }

    /// Sorted, de-duplicated dependency set without blanks or self-edges.
    pub fn dependency_set(&self) -> Vec<TaskId> {
        normalize_set(&self.depends_on, |task| task.is_blank() || *task == self.id)
    }

    pub fn is_assigned_to(&self, agent: &AgentId) -> bool {
        self.assignments.iter().any(|assignee| assignee == agent)
    }

    /// Drops assignment metadata, as done for a non-complete copy.
    pub fn clear_assignment(&mut self) {
        self.assignments.clear();
        self.state = TaskState::Pending;
    }
}

fn normalize_set<T: Clone + Ord>(values: &[T], drop: impl Fn(&T) -> bool) -> Vec<T> {
    let mut set: Vec<T> = values.iter().filter(|value| !drop(*value)).cloned().collect();
    set.sort();
    set.dedup();
    set
}

/// Task targeting exactly one waypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    #[serde(flatten)]
    pub task: Task,
    #[serde(rename = "portalId")]
    pub waypoint_id: WaypointId,
    #[serde(rename = "type", default)]
    pub marker_type: String,
}

impl Marker {
    pub fn new(
        id: impl Into<TaskId>,
        waypoint_id: impl Into<WaypointId>,
        marker_type: impl Into<String>,
    ) -> Self {
        Self {
            task: Task::new(id),
            waypoint_id: waypoint_id.into(),
            marker_type: marker_type.into(),
        }
    }
}

/// Task connecting two waypoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(flatten)]
    pub task: Task,
    #[serde(rename = "fromPortalId")]
    pub from: WaypointId,
    #[serde(rename = "toPortalId")]
    pub to: WaypointId,
    #[serde(default)]
    pub color: OpColor,
}

impl Link {
    pub fn new(
        id: impl Into<TaskId>,
        from: impl Into<WaypointId>,
        to: impl Into<WaypointId>,
    ) -> Self {
        Self {
            task: Task::new(id),
            from: from.into(),
            to: to.into(),
            color: OpColor::default(),
        }
    }
}

/// Stored task projection used by the targeted task mutators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub id: TaskId,
    pub kind: TaskKind,
    pub state: TaskState,
    pub assignments: Vec<AgentId>,
}

impl TaskSummary {
    pub fn is_assigned_to(&self, agent: &AgentId) -> bool {
        self.assignments.iter().any(|assignee| assignee == agent)
    }
}

#[cfg(test)]
mod tests {
    use super::{Link, Marker, Task, TaskState};
    use crate::model::ids::{AgentId, TaskId};
    use crate::model::operation::OpColor;

    #[test]
    fn wire_state_normalizes_to_pending() {
        let marker: Marker = serde_json::from_str(
            r#"{"ID":"m1","portalId":"p1","type":"DestroyPortalAlert","state":"bogus"}"#,
        )
        .unwrap();
        assert_eq!(marker.task.state, TaskState::Pending);

        let marker: Marker =
            serde_json::from_str(r#"{"ID":"m1","portalId":"p1","state":"Completed"}"#).unwrap();
        assert_eq!(marker.task.state, TaskState::Completed);
    }

    #[test]
    fn link_parses_flattened_task_fields() {
        let link: Link = serde_json::from_str(
            r#"{"ID":"l1","fromPortalId":"a","toPortalId":"b","color":"groupc",
                "assignments":["g1"],"dependsOn":["l0"],"order":4,"zone":2}"#,
        )
        .unwrap();
        assert_eq!(link.task.id, TaskId::new("l1"));
        assert_eq!(link.task.order, 4);
        assert_eq!(link.task.zone, Some(2));
        assert_eq!(link.color, OpColor::GroupC);
        assert!(link.task.is_assigned_to(&AgentId::new("g1")));
    }

    #[test]
    fn normalized_sets_drop_blanks_duplicates_and_self_edges() {
        let mut task = Task::new("t1");
        task.assignments = vec!["g2".into(), "".into(), "g1".into(), "g2".into()];
        task.depends_on = vec!["t1".into(), "t0".into(), " ".into()];

        assert_eq!(task.assignee_set(), vec![AgentId::new("g1"), AgentId::new("g2")]);
        assert_eq!(task.dependency_set(), vec![TaskId::new("t0")]);
    }
}
