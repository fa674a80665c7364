//! Typed identifiers for skills and sessions.
//!
//! IDs are opaque String wrappers (serde-transparent). Session ids are
//! generated as UUID v4; skill ids are chosen by whoever loads the skill.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Correlation token threaded through every message of one
    /// request/response cycle.
    SessionId
);
typed_id!(
    /// Identifier of a loaded skill, e.g. `stop.mark2`.
    SkillId
);

impl SessionId {
    /// Allocate a fresh session id (UUID v4).
    pub fn new_uuid() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new_uuid()
    }
}

impl SkillId {
    /// The id with every non-alphanumeric character replaced by `_`.
    ///
    /// Intent parsers prefix entity names with this form, so it is also the
    /// prefix stripped from inbound request data.
    pub fn alphanumeric(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_new_is_unique() {
        let a = SessionId::new_uuid();
        let b = SessionId::new_uuid();
        assert_ne!(a, b);
    }

    #[test]
    fn session_id_from_string() {
        let id = SessionId::from_string("req-1");
        assert_eq!(id.as_str(), "req-1");
        assert_eq!(id.to_string(), "req-1");
    }

    #[test]
    fn skill_id_alphanumeric_replaces_separators() {
        let id: SkillId = "stop.mark2".into();
        assert_eq!(id.alphanumeric(), "stop_mark2");
    }

    #[test]
    fn typed_id_serializes_transparently() {
        let id = SessionId::from_string("S1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"S1\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
