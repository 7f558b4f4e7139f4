//! Domain model for collaboratively edited operations.
//!
//! # Responsibility
//! - Define the wire/document shapes exchanged with clients.
//! - Normalize stringly-typed wire values into closed enums at the boundary.
//!
//! # Invariants
//! - Every entity is identified by a stable, client-supplied ID scoped to one
//!   operation.
//! - Markers and links only reference waypoints of the same snapshot.

pub mod ids;
pub mod operation;
pub mod task;
pub mod timestamp;
pub mod waypoint;
