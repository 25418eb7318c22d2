//! Storage configuration attached to catalogs and namespaces.
//!
//! The configuration is stored as JSON under the
//! [`STORAGE_CONFIGURATION_INFO`](crate::entity::keys::STORAGE_CONFIGURATION_INFO)
//! internal property. It is inherited by lookup: an object uses the
//! configuration of its nearest enclosing ancestor.
//!
//! ```rust
//! use strata_core::storage_config::{StorageConfigInfo, StorageType};
//!
//! let config = StorageConfigInfo::new(StorageType::S3, ["s3://bucket/warehouse"]);
//! assert!(config.validate_location("s3://bucket/warehouse/db/t").is_ok());
//! assert!(config.validate_location("s3://bucket/warehouse2/t").is_err());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Backing object store family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageType {
    /// Amazon S3 and compatible stores.
    S3,
    /// Google Cloud Storage.
    Gcs,
    /// Azure Data Lake / Blob storage.
    Azure,
    /// Local filesystem.
    File,
}

impl StorageType {
    /// URI schemes a location may use with this storage type.
    #[must_use]
    pub const fn schemes(self) -> &'static [&'static str] {
        match self {
            Self::S3 => &["s3", "s3a"],
            Self::Gcs => &["gs"],
            Self::Azure => &["abfs", "abfss", "wasb", "wasbs"],
            Self::File => &["file"],
        }
    }
}

/// Storage policy for objects under one catalog or namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfigInfo {
    /// Object store family.
    pub storage_type: StorageType,
    /// Location prefixes objects may live under.
    #[serde(default)]
    pub allowed_locations: Vec<String>,
    /// Storage client implementation override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_io_impl: Option<String>,
}

impl StorageConfigInfo {
    /// Creates a configuration.
    #[must_use]
    pub fn new<I, S>(storage_type: StorageType, allowed_locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            storage_type,
            allowed_locations: allowed_locations.into_iter().map(Into::into).collect(),
            file_io_impl: None,
        }
    }

    /// Parses the JSON form stored in an internal property.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] when the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes to the JSON form stored in an internal property.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Checks that `location` is permitted by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] with the reason when the scheme does
    /// not belong to the storage type or the location is outside every
    /// allowed location.
    pub fn validate_location(&self, location: &str) -> Result<()> {
        let scheme = scheme_of(location).ok_or_else(|| {
            Error::InvalidInput(format!("location '{location}' has no scheme"))
        })?;
        if !self.storage_type.schemes().contains(&scheme) {
            return Err(Error::InvalidInput(format!(
                "scheme '{scheme}' is not supported by storage type {:?}",
                self.storage_type
            )));
        }
        if self
            .allowed_locations
            .iter()
            .any(|allowed| is_child_location(allowed, location))
        {
            return Ok(());
        }
        Err(Error::InvalidInput(format!(
            "location is not in the list of allowed locations: {:?}",
            self.allowed_locations
        )))
    }
}

/// Checks a location that has no configured ancestor policy.
///
/// Local filesystem and HTTP locations are rejected outright.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for `file:` or `http(s):` locations.
pub fn validate_unconfigured_location(location: &str) -> Result<()> {
    if location.starts_with("file:") || location.starts_with("http") {
        return Err(Error::InvalidInput(
            "file and http locations require an explicit storage configuration".to_string(),
        ));
    }
    Ok(())
}

/// Returns the URI scheme of `location`, if it has one.
#[must_use]
pub fn scheme_of(location: &str) -> Option<&str> {
    location
        .split_once(':')
        .map(|(scheme, _)| scheme)
        .filter(|s| !s.is_empty() && !s.contains('/'))
}

/// True when `location` equals `parent` or lies below it as a path child.
///
/// Trailing slashes are ignored, and `s3://bucket/ab` is not a child of
/// `s3://bucket/a`.
#[must_use]
pub fn is_child_location(parent: &str, location: &str) -> bool {
    let parent = parent.trim_end_matches('/');
    let location = location.trim_end_matches('/');
    match location.strip_prefix(parent) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_field_names() {
        let json = r#"{"storageType":"S3","allowedLocations":["s3://bucket/a"]}"#;
        let config = StorageConfigInfo::from_json(json).expect("parse");
        assert_eq!(config.storage_type, StorageType::S3);
        assert_eq!(config.allowed_locations, vec!["s3://bucket/a"]);
        assert!(config.file_io_impl.is_none());
        assert!(config.to_json().expect("json").contains("allowedLocations"));
    }

    #[test]
    fn test_child_location_is_separator_aware() {
        assert!(is_child_location("s3://bucket/a", "s3://bucket/a"));
        assert!(is_child_location("s3://bucket/a/", "s3://bucket/a/b/c"));
        assert!(!is_child_location("s3://bucket/a", "s3://bucket/ab"));
        assert!(!is_child_location("s3://bucket/a", "gs://bucket/a/b"));
    }

    #[test]
    fn test_scheme_must_match_storage_type() {
        let config = StorageConfigInfo::new(StorageType::Gcs, ["gs://bucket"]);
        assert!(config.validate_location("gs://bucket/t").is_ok());
        let err = config.validate_location("s3://bucket/t").expect_err("wrong scheme");
        assert!(err.to_string().contains("scheme 's3'"));
    }

    #[test]
    fn test_location_outside_allowed_list() {
        let config = StorageConfigInfo::new(StorageType::S3, ["s3://bucket/a", "s3://other"]);
        assert!(config.validate_location("s3://other/x").is_ok());
        assert!(config.validate_location("s3://bucket/b/t").is_err());
    }

    #[test]
    fn test_unconfigured_rejects_file_and_http() {
        assert!(validate_unconfigured_location("file:/tmp/t").is_err());
        assert!(validate_unconfigured_location("https://host/t").is_err());
        assert!(validate_unconfigured_location("s3://bucket/t").is_ok());
    }
}
