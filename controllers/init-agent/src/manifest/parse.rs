//! YAML stream parsing

use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors turning a rendered stream into objects
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The stream is not valid YAML
    #[error("invalid YAML in document #{index}: {source}")]
    Yaml {
        /// Position of the document in the stream
        index: usize,
        /// Underlying failure
        #[source]
        source: serde_yaml::Error,
    },

    /// A document is valid YAML but not a Kubernetes object
    #[error("document #{index} is not a valid object: {reason}")]
    InvalidObject {
        /// Position of the document in the stream
        index: usize,
        /// What is wrong with it
        reason: String,
    },
}

/// Splits a multi-document YAML stream into objects.
///
/// Empty documents (e.g. produced by a template branch that rendered
/// nothing) are skipped. Every other document needs `apiVersion`, `kind`
/// and `metadata.name`.
pub fn parse_manifests(stream: &str) -> Result<Vec<DynamicObject>, ManifestError> {
    let mut objects = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(stream).enumerate() {
        let value = Value::deserialize(document).map_err(|source| ManifestError::Yaml { index, source })?;
        if value.is_null() {
            continue;
        }

        objects.push(to_object(index, value)?);
    }

    Ok(objects)
}

fn to_object(index: usize, value: Value) -> Result<DynamicObject, ManifestError> {
    let invalid = |reason: &str| ManifestError::InvalidObject {
        index,
        reason: reason.to_string(),
    };

    if !value.is_object() {
        return Err(invalid("expected a mapping"));
    }
    for (pointer, field) in [("/apiVersion", "apiVersion"), ("/kind", "kind"), ("/metadata/name", "metadata.name")] {
        if !value.pointer(pointer).and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
            return Err(invalid(&format!("missing {field}")));
        }
    }

    serde_json::from_value(value).map_err(|e| invalid(&e.to_string()))
}
