//! Change notification seam.
//!
//! # Responsibility
//! - Define the events emitted after an operation mutation commits.
//! - Offer a channel-backed notifier so delivery runs off the request worker.
//!
//! # Invariants
//! - Events are emitted only after the store write they describe committed.
//! - Notification failure never fails the mutation that triggered it.

use crate::model::ids::OperationId;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{channel, Receiver, Sender};

/// Committed change to one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// The operation was created or mutated and stamped `modified`.
    Changed {
        op_id: OperationId,
        modified: DateTime<Utc>,
    },
    /// The operation and everything it contained were removed.
    Deleted { op_id: OperationId },
}

impl ChangeEvent {
    pub fn op_id(&self) -> &OperationId {
        match self {
            Self::Changed { op_id, .. } | Self::Deleted { op_id } => op_id,
        }
    }
}

/// Delivery failure reported by a notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "change notification failed: {}", self.0)
    }
}

impl Error for NotifyError {}

/// Consumer of committed change events (push, chat bots, caches).
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError>;
}

/// Notifier that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _event: &ChangeEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Notifier that forwards events to a receiver drained elsewhere.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: Sender<ChangeEvent>,
}

impl ChannelNotifier {
    pub fn new(sender: Sender<ChangeEvent>) -> Self {
        Self { sender }
    }
}

impl ChangeNotifier for ChannelNotifier {
    fn notify(&self, event: &ChangeEvent) -> Result<(), NotifyError> {
        self.sender
            .send(event.clone())
            .map_err(|_| NotifyError("change feed receiver dropped".to_string()))
    }
}

/// Creates a notifier and the receiving end of its change feed.
pub fn change_feed() -> (ChannelNotifier, Receiver<ChangeEvent>) {
    let (sender, receiver) = channel();
    (ChannelNotifier::new(sender), receiver)
}
