use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A set of granted permission strings (e.g. `fs:read`, `net:outbound`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    permissions: BTreeSet<String>,
}

impl PermissionSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `permission`; granting twice is a no-op.
    pub fn grant(&mut self, permission: impl Into<String>) {
        self.permissions.insert(permission.into());
    }

    /// Remove `permission` if present.
    pub fn revoke(&mut self, permission: &str) {
        self.permissions.remove(permission);
    }

    /// Exact-match lookup; no wildcards.
    pub fn has(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// True when every permission in `required` is granted.
    pub fn has_all(&self, required: &[String]) -> bool {
        required.iter().all(|p| self.has(p))
    }

    /// Required permissions that are not granted.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|p| !self.has(p))
            .map(String::as_str)
            .collect()
    }

    /// True when nothing is granted.
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Number of granted permissions.
    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    /// Granted permissions in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.permissions.iter()
    }
}

impl FromIterator<String> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            permissions: iter.into_iter().collect(),
        }
    }
}
