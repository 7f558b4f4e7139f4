//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into access-checked use cases.
//! - Stamp and announce changes once store work has committed.
//! - Keep hosts decoupled from storage details.

pub mod access_service;
pub mod error;
pub mod operation_service;
pub mod permission_service;
pub mod reconcile_service;
pub mod task_service;
pub mod version_service;
