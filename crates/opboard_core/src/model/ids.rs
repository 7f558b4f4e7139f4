//! Typed string identifiers.
//!
//! All identifiers are opaque client-chosen strings; the newtypes only keep
//! an operation ID from being passed where a task ID is expected.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            /// True when the ID is empty after trimming.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Operation identity. Immutable and globally unique.
    OperationId
);
string_id!(
    /// Waypoint identity, unique within one operation.
    WaypointId
);
string_id!(
    /// Task (marker or link) identity, unique within one operation.
    TaskId
);
string_id!(
    /// Authenticated agent identity.
    AgentId
);
string_id!(TeamId);
