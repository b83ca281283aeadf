//! Group record model for fan-out dispatch destinations.

use serde::{Deserialize, Serialize};

/// Lifetime class of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Durable, defined in the server directory
    #[default]
    Server,
    /// Durable, defined privately by the administrator
    Private,
    /// One-shot: consumed on first use as a dispatch destination
    Temporary,
}

/// A named, ordered set of dispatch destinations
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Group name
    pub name: String,
    /// Administrative domain the group belongs to
    #[serde(default)]
    pub domain: String,
    /// Lifetime class
    #[serde(default)]
    pub kind: GroupKind,
    /// Member server names, in definition order
    #[serde(default)]
    pub members: Vec<String>,
}

impl GroupRecord {
    /// Creates a durable server-directory group
    #[must_use]
    pub fn new(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            domain: String::new(),
            kind: GroupKind::Server,
            members,
        }
    }

    /// Creates a one-shot temporary group
    #[must_use]
    pub fn temporary(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            domain: String::new(),
            kind: GroupKind::Temporary,
            members,
        }
    }

    /// Returns true if the group is consumed after a single dispatch
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self.kind, GroupKind::Temporary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_flag() {
        let group = GroupRecord::temporary("batch", vec!["s1".into(), "s2".into()]);
        assert!(group.is_temporary());
        assert!(!GroupRecord::new("all", vec![]).is_temporary());
    }
}
