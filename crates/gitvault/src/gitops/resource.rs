//! Resource identity and its location in the repository.
//!
//! `<kind>/<namespace>/<name>.yaml` for namespaced resources and
//! `<kind>/<name>.yaml` for cluster-scoped ones. The same path is the git
//! identity and the status key, so both directions live here.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File extension of resource manifests.
pub const MANIFEST_EXTENSION: &str = "yaml";

/// Kind directory holding namespace manifests.
pub const NAMESPACES_KIND: &str = "namespaces";

/// Identifies one cluster resource.
///
/// `kind` is the lower-case plural API resource name (`deployments`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKey {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    /// An empty namespace means cluster-scoped.
    pub fn new(kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn is_namespaced(&self) -> bool {
        self.namespace.is_some()
    }

    /// Path relative to the repository root.
    pub fn relative_path(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}.{}", self.kind, ns, self.name, MANIFEST_EXTENSION),
            None => format!("{}/{}.{}", self.kind, self.name, MANIFEST_EXTENSION),
        }
    }

    pub fn absolute_path(&self, data_path: &Path) -> PathBuf {
        data_path.join(self.relative_path())
    }

    /// Inverse of [`relative_path`](Self::relative_path).
    ///
    /// Returns `None` for anything that is not a resource manifest.
    pub fn from_relative_path(path: &str) -> Option<Self> {
        let stem = path.strip_suffix(&format!(".{}", MANIFEST_EXTENSION))?;
        let parts: Vec<&str> = stem.split('/').collect();
        let key = match parts.as_slice() {
            [kind, namespace, name] => Self::new(kind, Some(*namespace), name),
            [kind, name] => Self::new(kind, None, name),
            _ => return None,
        };
        if key.is_valid() && key.namespace.is_some() == (parts.len() == 3) {
            Some(key)
        } else {
            None
        }
    }

    /// Every component must be a single, non-traversing path segment.
    pub fn is_valid(&self) -> bool {
        let segment_ok = |s: &str| {
            !s.is_empty() && s != "." && s != ".." && !s.contains('/') && !s.contains('\\')
        };
        segment_ok(self.kind.as_str())
            && segment_ok(self.name.as_str())
            && self.namespace.as_deref().map_or(true, segment_ok)
    }

    /// `namespace/name`, or just `name` when cluster-scoped.
    pub fn label(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    pub fn is_namespace(&self) -> bool {
        self.kind == NAMESPACES_KIND
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_path_roundtrip() {
        let key = ResourceKey::new("deployments", Some("web"), "api");
        assert_eq!(key.relative_path(), "deployments/web/api.yaml");
        assert_eq!(
            ResourceKey::from_relative_path("deployments/web/api.yaml"),
            Some(key)
        );
    }

    #[test]
    fn test_cluster_scoped_path() {
        let key = ResourceKey::new("namespaces", Some(""), "web");
        assert!(!key.is_namespaced());
        assert!(key.is_namespace());
        assert_eq!(key.relative_path(), "namespaces/web.yaml");
        assert_eq!(key.to_string(), "[namespaces] web");
    }

    #[test]
    fn test_distinct_keys_have_distinct_paths() {
        let keys = [
            ResourceKey::new("services", Some("a"), "b"),
            ResourceKey::new("services", Some("b"), "a"),
            ResourceKey::new("services", None, "a"),
            ResourceKey::new("configmaps", Some("a"), "b"),
        ];
        let paths: std::collections::HashSet<_> = keys.iter().map(|k| k.relative_path()).collect();
        assert_eq!(paths.len(), keys.len());
    }

    #[test]
    fn test_rejects_non_manifests() {
        assert!(ResourceKey::from_relative_path("README.md").is_none());
        assert!(ResourceKey::from_relative_path("a/b/c/d.yaml").is_none());
        assert!(ResourceKey::from_relative_path("deployments/../x.yaml").is_none());
        assert!(ResourceKey::from_relative_path("deployments//x.yaml").is_none());
        assert!(ResourceKey::from_relative_path("x.yaml").is_none());
    }

    #[test]
    fn test_invalid_segments() {
        assert!(!ResourceKey::new("deployments", Some("web"), "../etc").is_valid());
        assert!(!ResourceKey::new("", None, "x").is_valid());
        assert!(ResourceKey::new("deployments", Some("web"), "api").is_valid());
    }
}
