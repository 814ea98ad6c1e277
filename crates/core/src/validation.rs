//! Synchronous input checks run before any remote registration.

use std::collections::BTreeMap;

use crate::error::Error;
use crate::result::Result;

/// Name under which a contract is written to source control.
pub const CONTRACT_FILENAME: &str = "swagger.yaml";

/// Alternative name accepted when reading a contract back.
pub const CONTRACT_FALLBACK_FILENAME: &str = "swagger.yml";

/// A file handed to a workflow, held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub filename: String,
    pub content: Vec<u8>,
}

impl ArtifactFile {
    /// Create a file.
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// Whether the file has no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Fetch a required, non-blank metadata value.
///
/// # Errors
///
/// Returns [`Error::MissingMetadata`] if the key is absent or blank.
pub fn require_metadata<'a>(metadata: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    metadata
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::missing_metadata(key))
}

/// Require a non-blank identifier.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `value` is blank.
pub fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::invalid_input(format!("'{field}' must not be empty")))
    } else {
        Ok(())
    }
}

/// Check that a contract file looks like an OpenAPI/Swagger document.
///
/// Only the top level is inspected: it must be a YAML (or JSON) mapping
/// with an `openapi` or `swagger` key.
///
/// # Errors
///
/// Returns [`Error::InvalidContract`] if the file is empty or malformed.
pub fn validate_contract(file: &ArtifactFile) -> Result<()> {
    if file.is_empty() {
        return Err(Error::invalid_contract(&file.filename, "file is empty"));
    }

    let document: serde_yaml::Value = serde_yaml::from_slice(&file.content)
        .map_err(|e| Error::invalid_contract(&file.filename, e.to_string()))?;

    let mapping = document
        .as_mapping()
        .ok_or_else(|| Error::invalid_contract(&file.filename, "top level is not a mapping"))?;

    let has_marker = ["openapi", "swagger"]
        .iter()
        .any(|key| mapping.contains_key(*key));

    if has_marker {
        Ok(())
    } else {
        Err(Error::invalid_contract(
            &file.filename,
            "neither 'openapi' nor 'swagger' is declared",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{META_ARTIFACT_NAME, META_GROUP_ID};

    #[test]
    fn test_require_metadata_rejects_blank() {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_GROUP_ID.to_string(), "  ".to_string());

        let err = require_metadata(&metadata, META_GROUP_ID).err();
        assert!(matches!(err, Some(Error::MissingMetadata { .. })));

        let err = require_metadata(&metadata, META_ARTIFACT_NAME).err();
        assert!(matches!(err, Some(Error::MissingMetadata { key }) if key == META_ARTIFACT_NAME));
    }

    #[test]
    fn test_require_metadata_trims() {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_GROUP_ID.to_string(), " com.acme ".to_string());
        assert_eq!(require_metadata(&metadata, META_GROUP_ID).ok(), Some("com.acme"));
    }

    #[test]
    fn test_openapi_contract_is_accepted() {
        let file = ArtifactFile::new("orders.yaml", "openapi: 3.0.1\ninfo:\n  title: Orders\n");
        assert!(validate_contract(&file).is_ok());
    }

    #[test]
    fn test_swagger_json_contract_is_accepted() {
        let file = ArtifactFile::new("orders.json", r#"{"swagger": "2.0", "paths": {}}"#);
        assert!(validate_contract(&file).is_ok());
    }

    #[test]
    fn test_empty_contract_is_rejected() {
        let file = ArtifactFile::new("orders.yaml", "");
        assert!(matches!(
            validate_contract(&file),
            Err(Error::InvalidContract { .. })
        ));
    }

    #[test]
    fn test_contract_without_marker_is_rejected() {
        let file = ArtifactFile::new("orders.yaml", "title: not a contract\n");
        assert!(validate_contract(&file).is_err());
    }

    #[test]
    fn test_scalar_contract_is_rejected() {
        let file = ArtifactFile::new("orders.yaml", "just a string");
        assert!(validate_contract(&file).is_err());
    }
}
