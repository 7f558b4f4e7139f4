//! Operation document model.
//!
//! # Responsibility
//! - Define the full-document snapshot clients submit and fetch.
//! - Validate snapshot structure before it reaches the store.
//! - Carry the closed palette/role/mode enums and their wire normalization.
//!
//! # Invariants
//! - Invalid colors normalize to `OpColor::Main`.
//! - Any mode other than `"active"` is `UpdateMode::Design`.
//! - Roles are strict: unknown values fail to parse.

use crate::model::ids::{AgentId, OperationId, TaskId, TeamId, WaypointId};
use crate::model::task::{Link, Marker};
use crate::model::timestamp::format_http_date;
use crate::model::waypoint::Waypoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Fixed drawing palette shared by operations and links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum OpColor {
    #[default]
    Main,
    GroupA,
    GroupB,
    GroupC,
    GroupD,
    GroupE,
    GroupF,
}

impl OpColor {
    pub const ALL: [OpColor; 7] = [
        Self::Main,
        Self::GroupA,
        Self::GroupB,
        Self::GroupC,
        Self::GroupD,
        Self::GroupE,
        Self::GroupF,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::GroupA => "groupa",
            Self::GroupB => "groupb",
            Self::GroupC => "groupc",
            Self::GroupD => "groupd",
            Self::GroupE => "groupe",
            Self::GroupF => "groupf",
        }
    }

    /// Hex RGB used when rendering the palette.
    pub fn hex(self) -> &'static str {
        match self {
            Self::Main => "ff0000",
            Self::GroupA => "ff6600",
            Self::GroupB => "ff9900",
            Self::GroupC => "bb9900",
            Self::GroupD => "bb22cc",
            Self::GroupE => "33cccc",
            Self::GroupF => "ff55ff",
        }
    }

    /// Returns the matching palette entry, or `Main` for anything unknown.
    pub fn from_wire(value: &str) -> Self {
        let normalized = value.trim();
        Self::ALL
            .into_iter()
            .find(|color| color.as_str() == normalized)
            .unwrap_or_default()
    }
}

impl From<Option<String>> for OpColor {
    fn from(value: Option<String>) -> Self {
        value.as_deref().map(Self::from_wire).unwrap_or_default()
    }
}

impl From<OpColor> for String {
    fn from(value: OpColor) -> Self {
        value.as_str().to_string()
    }
}

/// Per-request reconciliation policy. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum UpdateMode {
    /// Assignment and state are overwritten from the snapshot.
    #[default]
    Design,
    /// Assignment and state already stored are left untouched.
    Active,
}

impl UpdateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Design => "design",
            Self::Active => "active",
        }
    }
}

impl From<Option<String>> for UpdateMode {
    fn from(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("active") => Self::Active,
            _ => Self::Design,
        }
    }
}

impl From<UpdateMode> for String {
    fn from(value: UpdateMode) -> Self {
        value.as_str().to_string()
    }
}

/// Role granted to a team bound to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Read,
    Write,
    #[serde(rename = "assignedonly")]
    AssignedOnly,
}

impl TeamRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::AssignedOnly => "assignedonly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "assignedonly" => Some(Self::AssignedOnly),
            _ => None,
        }
    }
}

/// (team, role) grant attached to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamBinding {
    #[serde(rename = "teamid")]
    pub team_id: TeamId,
    pub role: TeamRole,
}

impl TeamBinding {
    pub fn new(team_id: impl Into<TeamId>, role: TeamRole) -> Self {
        Self {
            team_id: team_id.into(),
            role,
        }
    }
}

/// Per-agent key inventory for one waypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOnHand {
    #[serde(rename = "portalId")]
    pub waypoint_id: WaypointId,
    #[serde(rename = "gid")]
    pub agent: AgentId,
    #[serde(rename = "onhand", default)]
    pub count: i64,
    #[serde(rename = "capsule", default)]
    pub capsule_label: String,
}

/// Full operation document as exchanged with clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "ID")]
    pub id: OperationId,
    #[serde(default)]
    pub name: String,
    /// Owner on fetch. Ignored on submit: the caller becomes owner at creation.
    #[serde(rename = "creator", default)]
    pub owner: AgentId,
    #[serde(default)]
    pub color: OpColor,
    #[serde(rename = "opportals", default)]
    pub waypoints: Vec<Waypoint>,
    /// Derived from links on fetch; ignored on submit.
    #[serde(default)]
    pub anchors: Vec<WaypointId>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub markers: Vec<Marker>,
    #[serde(rename = "teamlist", default)]
    pub teams: Vec<TeamBinding>,
    #[serde(default)]
    pub comment: String,
    #[serde(rename = "keysonhand", default)]
    pub keys: Vec<KeyOnHand>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub modified: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fetched: String,
    #[serde(default, skip_serializing)]
    pub mode: UpdateMode,
}

impl Operation {
    pub fn new(id: impl Into<OperationId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parses a raw JSON snapshot and validates its structure.
    pub fn from_json(raw: &[u8]) -> Result<Self, SnapshotError> {
        let op: Operation = serde_json::from_slice(raw).map_err(SnapshotError::Parse)?;
        op.validate()?;
        Ok(op)
    }

    /// Validates structural invariants that must hold before reconciliation.
    ///
    /// Dangling waypoint references and unparsable coordinates are not
    /// checked here; the reconciler skips those entities individually.
    /// Markers and links share one task ID space.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.id.is_blank() {
            return Err(SnapshotError::EmptyField("ID"));
        }
        if self.name.trim().is_empty() {
            return Err(SnapshotError::EmptyField("name"));
        }
        for waypoint in &self.waypoints {
            if waypoint.id.is_blank() {
                return Err(SnapshotError::EmptyField("opportals.id"));
            }
        }
        if self.markers.iter().any(|marker| marker.task.id.is_blank()) {
            return Err(SnapshotError::EmptyField("markers.ID"));
        }
        if self.links.iter().any(|link| link.task.id.is_blank()) {
            return Err(SnapshotError::EmptyField("links.ID"));
        }
        if self.teams.iter().any(|binding| binding.team_id.is_blank()) {
            return Err(SnapshotError::EmptyField("teamlist.teamid"));
        }
        let mut task_ids = HashSet::new();
        let tasks = self.markers.iter().map(|marker| &marker.task);
        for task in tasks.chain(self.links.iter().map(|link| &link.task)) {
            if !task_ids.insert(&task.id) {
                return Err(SnapshotError::DuplicateTaskId(task.id.clone()));
            }
        }
        Ok(())
    }

    /// IDs of the waypoints whose coordinates parse.
    pub fn usable_waypoint_ids(&self) -> HashSet<&WaypointId> {
        self.waypoints
            .iter()
            .filter(|waypoint| waypoint.invalid_coordinate().is_none())
            .map(|waypoint| &waypoint.id)
            .collect()
    }

    /// Distinct link endpoints in first-seen order.
    pub fn derive_anchors(&self) -> Vec<WaypointId> {
        let mut seen = HashSet::new();
        let mut anchors = Vec::new();
        for link in &self.links {
            for endpoint in [&link.from, &link.to] {
                if seen.insert(endpoint.clone()) {
                    anchors.push(endpoint.clone());
                }
            }
        }
        anchors
    }
}

/// Stored top-level operation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub id: OperationId,
    pub name: String,
    pub owner: AgentId,
    pub color: OpColor,
    pub comment: String,
    pub modified: DateTime<Utc>,
}

/// Lightweight projection for staleness checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpStat {
    #[serde(rename = "ID")]
    pub id: OperationId,
    pub name: String,
    #[serde(rename = "creator")]
    pub owner: AgentId,
    #[serde(serialize_with = "serialize_http_date")]
    pub modified: DateTime<Utc>,
}

fn serialize_http_date<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_http_date(*value))
}

/// Structural snapshot errors.
#[derive(Debug)]
pub enum SnapshotError {
    Parse(serde_json::Error),
    EmptyField(&'static str),
    /// A marker or link ID appears more than once.
    DuplicateTaskId(TaskId),
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "snapshot is not valid operation JSON: {err}"),
            Self::EmptyField(field) => write!(f, "snapshot field `{field}` must not be empty"),
            Self::DuplicateTaskId(id) => {
                write!(f, "task ID {id} is used by more than one marker or link")
            }
        }
    }
}

impl Error for SnapshotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::EmptyField(_) | Self::DuplicateTaskId(_) => None,
        }
    }
}
