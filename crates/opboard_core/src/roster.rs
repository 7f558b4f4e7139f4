//! Team roster collaborator.
//!
//! Team membership is owned by an external identity/community service; the
//! core only asks whether an agent is on a team.

use crate::model::ids::{AgentId, TeamId};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Roster lookup failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterError(pub String);

impl Display for RosterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "roster lookup failed: {}", self.0)
    }
}

impl Error for RosterError {}

/// Membership query consumed by access resolution.
pub trait TeamRoster: Send + Sync {
    fn is_agent_on_team(&self, agent: &AgentId, team: &TeamId) -> Result<bool, RosterError>;
}

/// Roster held in process memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRoster {
    teams: HashMap<TeamId, HashSet<AgentId>>,
}

impl InMemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `agent` to `team`; returns `false` when already a member.
    pub fn add_member(&mut self, team: impl Into<TeamId>, agent: impl Into<AgentId>) -> bool {
        self.teams.entry(team.into()).or_default().insert(agent.into())
    }

    /// Removes `agent` from `team`; returns `false` when not a member.
    pub fn remove_member(&mut self, team: &TeamId, agent: &AgentId) -> bool {
        self.teams
            .get_mut(team)
            .map(|members| members.remove(agent))
            .unwrap_or(false)
    }

    /// Builder form of `add_member`.
    pub fn with_member(mut self, team: impl Into<TeamId>, agent: impl Into<AgentId>) -> Self {
        self.add_member(team, agent);
        self
    }
}

impl TeamRoster for InMemoryRoster {
    fn is_agent_on_team(&self, agent: &AgentId, team: &TeamId) -> Result<bool, RosterError> {
        Ok(self
            .teams
            .get(team)
            .is_some_and(|members| members.contains(agent)))
    }
}
