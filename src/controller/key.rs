//! # Resource Keys
//!
//! Stable identifiers for watched objects. A key is `namespace/name` for
//! namespaced objects and `name` for cluster-scoped ones, matching the
//! format used by `kubectl` and client-go's `MetaNamespaceKeyFunc`.

use kube::Resource;
use std::fmt;
use std::str::FromStr;

/// Error returned when no key can be derived for an object
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("object has no metadata.name")]
    MissingName,
    #[error("invalid resource key {0:?}")]
    Invalid(String),
}

/// Identifier of a watched object, derived from its namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    namespace: Option<String>,
    name: String,
}

impl ResourceKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Derive the key for an object from its metadata
    ///
    /// An empty namespace is treated the same as a missing one so that
    /// cluster-scoped objects never produce a leading slash.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::MissingName`] when the object has no name.
    pub fn from_object<K: Resource>(obj: &K) -> Result<Self, KeyError> {
        let meta = obj.meta();
        let name = meta
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or(KeyError::MissingName)?;
        let namespace = meta.namespace.as_deref().filter(|ns| !ns.is_empty());
        Ok(Self {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ResourceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::namespaced(ns, name))
            }
            None if !s.is_empty() => Ok(Self::cluster_scoped(s)),
            _ => Err(KeyError::Invalid(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
    use kube::api::ObjectMeta;

    fn config_map(namespace: Option<&str>, name: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                namespace: namespace.map(str::to_string),
                name: name.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_namespaced_key_format() {
        let key = ResourceKey::from_object(&config_map(Some("default"), Some("foo"))).unwrap();
        assert_eq!(key.to_string(), "default/foo");
        assert_eq!(key.namespace(), Some("default"));
        assert_eq!(key.name(), "foo");
    }

    #[test]
    fn test_cluster_scoped_key_has_no_slash() {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some("kube-system".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let key = ResourceKey::from_object(&ns).unwrap();
        assert_eq!(key.to_string(), "kube-system");

        let empty_ns = ResourceKey::from_object(&config_map(Some(""), Some("bar"))).unwrap();
        assert_eq!(empty_ns, ResourceKey::cluster_scoped("bar"));
    }

    #[test]
    fn test_missing_name_is_an_error() {
        assert_eq!(
            ResourceKey::from_object(&config_map(Some("default"), None)),
            Err(KeyError::MissingName)
        );
    }

    #[test]
    fn test_same_object_same_key() {
        let a = ResourceKey::from_object(&config_map(Some("default"), Some("foo"))).unwrap();
        let mut changed = config_map(Some("default"), Some("foo"));
        changed.metadata.resource_version = Some("42".to_string());
        let b = ResourceKey::from_object(&changed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "default/foo".parse::<ResourceKey>().unwrap(),
            ResourceKey::namespaced("default", "foo")
        );
        assert_eq!(
            "node-1".parse::<ResourceKey>().unwrap(),
            ResourceKey::cluster_scoped("node-1")
        );
        assert!("".parse::<ResourceKey>().is_err());
        assert!("/foo".parse::<ResourceKey>().is_err());
        assert!("a/b/c".parse::<ResourceKey>().is_err());
    }
}
