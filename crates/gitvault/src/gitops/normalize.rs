//! Canonical form of a resource for storage and comparison.
//!
//! Server-populated fields are stripped so that two semantically equal
//! objects serialize to byte-identical YAML. Keys come out sorted because
//! `serde_json::Map` is ordered.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::gitops::error::{GitOpsError, Result};
use crate::secrets::SecretCipher;

/// What to do with the `data` values of a Secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretTreatment {
    Nothing,
    /// Encrypt plaintext values before they are written to the repository.
    Encrypt,
    /// Decrypt values read from the repository. Values that do not decrypt are kept.
    Decrypt,
}

/// Removed from every `metadata` map, at any depth.
const METADATA_FIELDS: &[&str] = &["uid", "selfLink", "generation", "managedFields"];

/// Removed from every `annotations` map, at any depth.
const NOISY_ANNOTATIONS: &[&str] = &[
    "deployment.kubernetes.io/revision",
    "kubectl.kubernetes.io/last-applied-configuration",
];

/// Removed wherever they appear.
const VOLATILE_FIELDS: &[&str] = &["creationTimestamp", "resourceVersion"];

/// Secret maps subject to the secret treatment.
const SECRET_DATA_FIELDS: &[&str] = &["data", "stringData"];

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    cipher: Option<Arc<SecretCipher>>,
}

impl Normalizer {
    pub fn new(cipher: Option<Arc<SecretCipher>>) -> Self {
        Self { cipher }
    }

    pub fn has_cipher(&self) -> bool {
        self.cipher.is_some()
    }

    /// Returns the canonical form of `object`.
    pub fn normalize(&self, object: &Value, treatment: SecretTreatment) -> Result<Value> {
        let mut value = object.clone();
        let Value::Object(root) = &mut value else {
            return Err(GitOpsError::SerializeYaml(
                "resource must be a mapping".to_string(),
            ));
        };

        root.remove("status");
        strip(root, None);

        let kind = root.get("kind").and_then(Value::as_str).unwrap_or_default().to_string();
        match kind.as_str() {
            "Service" => {
                if let Some(Value::Object(spec)) = root.get_mut("spec") {
                    spec.remove("clusterIP");
                    spec.remove("clusterIPs");
                    if spec.is_empty() {
                        root.remove("spec");
                    }
                }
            }
            "Secret" => self.treat_secret(root, treatment)?,
            _ => {}
        }

        Ok(value)
    }

    /// Canonical YAML for `object`.
    pub fn to_yaml(&self, object: &Value, treatment: SecretTreatment) -> Result<String> {
        let normalized = self.normalize(object, treatment)?;
        serde_yaml::to_string(&normalized).map_err(|e| GitOpsError::SerializeYaml(e.to_string()))
    }

    /// Parses a manifest and returns its canonical YAML.
    pub fn yaml_from_str(&self, manifest: &str, treatment: SecretTreatment) -> Result<String> {
        let value = parse_manifest(manifest)?;
        self.to_yaml(&value, treatment)
    }

    /// True for a Secret with at least one value that is not encrypted yet.
    ///
    /// Always false without a cipher.
    pub fn has_plaintext_secret_values(&self, object: &Value) -> bool {
        let Some(cipher) = &self.cipher else {
            return false;
        };
        if object.get("kind").and_then(Value::as_str) != Some("Secret") {
            return false;
        }
        SECRET_DATA_FIELDS.iter().any(|field| {
            object
                .get(*field)
                .and_then(Value::as_object)
                .is_some_and(|data| {
                    data.values()
                        .filter_map(Value::as_str)
                        .any(|v| !cipher.is_encrypted(v))
                })
        })
    }

    fn treat_secret(&self, root: &mut Map<String, Value>, treatment: SecretTreatment) -> Result<()> {
        let Some(cipher) = &self.cipher else {
            return Ok(());
        };
        if treatment == SecretTreatment::Nothing {
            return Ok(());
        }

        for field in SECRET_DATA_FIELDS {
            let Some(Value::Object(data)) = root.get_mut(*field) else {
                continue;
            };
            for value in data.values_mut() {
                let Value::String(current) = value else {
                    continue;
                };
                match treatment {
                    SecretTreatment::Encrypt if !cipher.is_encrypted(current) => {
                        *current = cipher.encrypt(current)?;
                    }
                    SecretTreatment::Decrypt => {
                        if let Ok(plain) = cipher.decrypt(current) {
                            *current = plain;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Parses a YAML manifest into a JSON value.
pub fn parse_manifest(manifest: &str) -> Result<Value> {
    let value: Value = serde_yaml::from_str(manifest)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(GitOpsError::ParseYaml {
            path: Default::default(),
            message: "manifest is not a mapping".to_string(),
        })
    }
}

/// Strips server-populated fields and prunes values left empty.
///
/// Maps that were already empty (e.g. `emptyDir: {}`) are kept; only maps
/// emptied by stripping are dropped.
fn strip(map: &mut Map<String, Value>, parent_key: Option<&str>) {
    match parent_key {
        Some("metadata") => {
            for field in METADATA_FIELDS {
                map.remove(*field);
            }
        }
        Some("annotations") => {
            for field in NOISY_ANNOTATIONS {
                map.remove(*field);
            }
        }
        _ => {}
    }
    for field in VOLATILE_FIELDS {
        map.remove(*field);
    }

    map.retain(|key, value| !prune(key, value));
}

/// Returns true when the value should be removed from its parent.
fn prune(key: &str, value: &mut Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => {
            if items.is_empty() {
                return true;
            }
            for item in items.iter_mut() {
                if let Value::Object(inner) = item {
                    strip(inner, None);
                }
            }
            false
        }
        Value::Object(inner) => {
            let was_empty = inner.is_empty();
            strip(inner, Some(key));
            !was_empty && inner.is_empty()
        }
        _ => false,
    }
}
