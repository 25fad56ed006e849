//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::CoreError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new id from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the inner string reference.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Identifier of a workspace (the tenant a scan runs within).
    WorkspaceId
);
string_id!(
    /// Identifier of a channel or thread.
    ChannelId
);
string_id!(
    /// Identifier of a single message.
    MessageId
);
string_id!(
    /// Identifier of a user who started a task.
    UserId
);
string_id!(
    /// Unique identifier for a cleanup Task.
    TaskId
);

impl TaskId {
    /// Generate a new random TaskId.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ChannelId {
    /// Parse a channel reference given either as a raw id or as a `<#id>` mention.
    pub fn parse_reference(input: &str) -> Result<Self, CoreError> {
        let trimmed = input.trim();
        let inner = trimmed
            .strip_prefix("<#")
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(trimmed);

        if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(CoreError::InvalidInput(format!(
                "not a channel reference: '{input}'"
            )));
        }

        Ok(Self(inner.to_owned()))
    }
}
