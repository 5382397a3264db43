//! Object references shared between peering CRDs
//!
//! A namespaced key lets one record point at another without carrying the
//! whole object, mirroring the `NamespacedName` convention of Kubernetes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace-qualified name of a Kubernetes object.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectKey {
    /// Name of the referenced object
    pub name: String,

    /// Namespace of the referenced object
    pub namespace: String,
}

impl ObjectKey {
    /// Create a key from a name and a namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// A key is usable only when both parts are set
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.namespace.is_empty()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_display() {
        let key = ObjectKey::new("cluster-a-tunendpoint", "peering-system");
        assert_eq!(key.to_string(), "peering-system/cluster-a-tunendpoint");
    }

    #[test]
    fn test_object_key_is_complete() {
        assert!(ObjectKey::new("a", "b").is_complete());
        assert!(!ObjectKey::new("a", "").is_complete());
        assert!(!ObjectKey::default().is_complete());
    }
}
