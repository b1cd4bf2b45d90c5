//! Verified caller identity.

use std::fmt;

/// A caller identity established by a trusted verifier.
///
/// Only built after successful verification; "no identity" is `Option::None`
/// at the call sites. The username is redacted in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    username: String,
    groups: Vec<String>,
}

impl Identity {
    /// Build an identity, or `None` when `username` is empty.
    ///
    /// Group order is kept; duplicate and empty group names are dropped.
    pub fn new(username: impl Into<String>, groups: impl IntoIterator<Item = String>) -> Option<Self> {
        let username = username.into();
        if username.is_empty() {
            return None;
        }

        let mut unique: Vec<String> = Vec::new();
        for group in groups {
            if !group.is_empty() && !unique.contains(&group) {
                unique.push(group);
            }
        }

        Some(Self {
            username,
            groups: unique,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("username", &"[REDACTED]")
            .field("groups", &self.groups)
            .finish()
    }
}
