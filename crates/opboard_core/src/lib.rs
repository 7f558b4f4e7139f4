//! Core domain logic for opboard.
//! This crate owns operation storage, reconciliation and access rules.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod roster;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::ids::{AgentId, OperationId, TaskId, TeamId, WaypointId};
pub use model::operation::{
    KeyOnHand, OpColor, OpStat, Operation, TeamBinding, TeamRole, UpdateMode,
};
pub use model::task::{Link, Marker, Task, TaskState};
pub use model::waypoint::Waypoint;
pub use notify::{change_feed, ChangeEvent, ChangeNotifier, NoopNotifier};
pub use repo::{OperationStore, RepoError, RepoResult, SqliteOperationStore};
pub use roster::{InMemoryRoster, TeamRoster};
pub use service::access_service::{AccessLevel, AccessResolver};
pub use service::error::{ErrorKind, OpError, OpResult};
pub use service::operation_service::{FetchOutcome, OperationService};
pub use service::reconcile_service::{ReconcileReport, SkipReason, SkippedEntity};
pub use service::task_service::TaskService;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
