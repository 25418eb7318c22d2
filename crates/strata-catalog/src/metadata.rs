//! Table and view metadata documents.
//!
//! Tables and views share one commit protocol and differ only in how their
//! metadata document is parsed. Fields the catalog does not interpret
//! (schemas, snapshots, view versions) are carried through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strata_core::{EntitySubKind, TableIdent};
use uuid::Uuid;

use crate::error::{CatalogError, CatalogResult};

/// Distinguishes tables from views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableLikeKind {
    /// Table.
    Table,
    /// View.
    View,
}

impl TableLikeKind {
    /// Entity sub-kind for this kind.
    #[must_use]
    pub const fn sub_kind(self) -> EntitySubKind {
        match self {
            Self::Table => EntitySubKind::Table,
            Self::View => EntitySubKind::View,
        }
    }

    /// Kind for an entity sub-kind.
    #[must_use]
    pub const fn from_sub_kind(sub_kind: EntitySubKind) -> Option<Self> {
        match sub_kind {
            EntitySubKind::Table => Some(Self::Table),
            EntitySubKind::View => Some(Self::View),
            EntitySubKind::None => None,
        }
    }

    /// The other kind.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Table => Self::View,
            Self::View => Self::Table,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
        }
    }

    /// Not-found error for this kind.
    #[must_use]
    pub fn not_found(self, ident: &TableIdent) -> CatalogError {
        match self {
            Self::Table => CatalogError::table_not_found(ident),
            Self::View => CatalogError::view_not_found(ident),
        }
    }

    /// Already-exists error for this kind.
    #[must_use]
    pub fn already_exists(self, ident: &TableIdent) -> CatalogError {
        match self {
            Self::Table => CatalogError::table_already_exists(ident),
            Self::View => CatalogError::view_already_exists(ident),
        }
    }
}

/// Table metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableMetadata {
    /// Format version.
    pub format_version: u8,
    /// Table UUID.
    pub table_uuid: Uuid,
    /// Base location of the table.
    pub location: String,
    /// Last update time in epoch milliseconds.
    #[serde(default)]
    pub last_updated_ms: i64,
    /// Table properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Uninterpreted fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TableMetadata {
    /// Creates minimal metadata for a new table at `location`.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            format_version: 2,
            table_uuid: Uuid::new_v4(),
            location: location.into(),
            last_updated_ms: chrono::Utc::now().timestamp_millis(),
            properties: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

/// View metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ViewMetadata {
    /// Format version.
    pub format_version: u8,
    /// View UUID.
    pub view_uuid: Uuid,
    /// Base location of the view.
    pub location: String,
    /// View properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Uninterpreted fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ViewMetadata {
    /// Creates minimal metadata for a new view at `location`.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            format_version: 1,
            view_uuid: Uuid::new_v4(),
            location: location.into(),
            properties: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

/// A table or view metadata document.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataObject {
    /// Table metadata.
    Table(TableMetadata),
    /// View metadata.
    View(ViewMetadata),
}

impl MetadataObject {
    /// Parses a document of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::BadRequest`] for malformed documents.
    pub fn parse(kind: TableLikeKind, bytes: &[u8]) -> CatalogResult<Self> {
        Ok(match kind {
            TableLikeKind::Table => Self::Table(serde_json::from_slice(bytes)?),
            TableLikeKind::View => Self::View(serde_json::from_slice(bytes)?),
        })
    }

    /// Serializes the document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> CatalogResult<Vec<u8>> {
        let bytes = match self {
            Self::Table(t) => serde_json::to_vec_pretty(t),
            Self::View(v) => serde_json::to_vec_pretty(v),
        };
        bytes.map_err(|e| CatalogError::Internal {
            message: format!("failed to serialize metadata: {e}"),
        })
    }

    /// Kind of the document.
    #[must_use]
    pub const fn kind(&self) -> TableLikeKind {
        match self {
            Self::Table(_) => TableLikeKind::Table,
            Self::View(_) => TableLikeKind::View,
        }
    }

    /// Base location.
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::Table(t) => &t.location,
            Self::View(v) => &v.location,
        }
    }

    /// Replaces the base location.
    pub fn set_location(&mut self, location: impl Into<String>) {
        match self {
            Self::Table(t) => t.location = location.into(),
            Self::View(v) => v.location = location.into(),
        }
    }

    /// Declared properties.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        match self {
            Self::Table(t) => &t.properties,
            Self::View(v) => &v.properties,
        }
    }
}

/// Directory holding the metadata file at `pointer`.
#[must_use]
pub fn metadata_dir(pointer: &str) -> &str {
    pointer.rsplit_once('/').map_or(pointer, |(dir, _)| dir)
}

/// Version number encoded in a metadata file name (`00003-<uuid>.metadata.json`).
#[must_use]
pub fn parse_version(pointer: &str) -> Option<u32> {
    let file = pointer.rsplit_once('/').map_or(pointer, |(_, f)| f);
    let (digits, _) = file.split_once('-')?;
    digits.parse().ok()
}

/// Location for the next metadata file of an object based at `location`.
#[must_use]
pub fn new_metadata_location(location: &str, previous: Option<&str>) -> String {
    let version = previous.and_then(parse_version).map_or(0, |v| v + 1);
    format!(
        "{}/metadata/{version:05}-{}.metadata.json",
        location.trim_end_matches('/'),
        Uuid::new_v4()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_survive_roundtrip() {
        let json = br#"{
            "format-version": 2,
            "table-uuid": "9c12d441-03fe-4693-9a96-a0705ddf69c1",
            "location": "s3://b/a/t",
            "current-snapshot-id": 42,
            "properties": {"owner": "etl"}
        }"#;
        let parsed = MetadataObject::parse(TableLikeKind::Table, json).expect("parse");
        assert_eq!(parsed.location(), "s3://b/a/t");
        assert_eq!(parsed.properties().get("owner").map(String::as_str), Some("etl"));

        let bytes = parsed.to_json().expect("json");
        let reparsed = MetadataObject::parse(TableLikeKind::Table, &bytes).expect("parse");
        let MetadataObject::Table(t) = reparsed else {
            panic!("expected table");
        };
        assert_eq!(t.extra.get("current-snapshot-id"), Some(&Value::from(42)));
    }

    #[test]
    fn test_view_document_is_rejected_as_table() {
        let view = MetadataObject::View(ViewMetadata::new("s3://b/v"));
        let bytes = view.to_json().expect("json");
        assert!(MetadataObject::parse(TableLikeKind::Table, &bytes).is_err());
    }

    #[test]
    fn test_metadata_locations() {
        let first = new_metadata_location("s3://b/a/t/", None);
        assert!(first.starts_with("s3://b/a/t/metadata/00000-"));
        assert!(first.ends_with(".metadata.json"));
        assert_eq!(parse_version(&first), Some(0));

        let second = new_metadata_location("s3://b/a/t", Some(&first));
        assert_eq!(parse_version(&second), Some(1));
        assert_eq!(metadata_dir(&second), "s3://b/a/t/metadata");
    }

    #[test]
    fn test_kind_helpers() {
        let ident = TableIdent::from_dotted("a.t");
        assert_eq!(TableLikeKind::Table.opposite(), TableLikeKind::View);
        assert_eq!(TableLikeKind::View.not_found(&ident).error_type(), "NoSuchViewException");
        assert_eq!(
            TableLikeKind::from_sub_kind(EntitySubKind::Table),
            Some(TableLikeKind::Table)
        );
    }
}
