use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entities::common::MetaData;
use crate::entities::line::Line;
use crate::error::{Error, Result};
use crate::mapping;
use crate::registry::EntityType;

/// Lifecycle state of an entity record as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Not yet created; has no `Id`.
    Draft,
    Persisted,
    /// The service rejected this record's `SyncToken`; read it again before updating.
    StaleLocal,
}

/// A record of any entity type.
///
/// Only the fields the engine itself needs are typed; everything else lives
/// in `fields`. Build one with [`mapping::map_entity`] or by hand for a create.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Optimistic concurrency version, bumped by the service on every change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,

    #[serde(rename = "sparse", skip_serializing_if = "Option::is_none")]
    pub sparse: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<MetaData>,

    /// Typed lines, for entity types with line variants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<Vec<Line>>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_lines(mut self, lines: Vec<Line>) -> Self {
        self.line = Some(lines);
        self
    }

    #[must_use]
    pub fn with_identity(mut self, id: impl Into<String>, sync_token: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self.sync_token = Some(sync_token.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn sync_token(&self) -> Option<&str> {
        self.sync_token.as_deref()
    }

    /// `Draft` or `Persisted`. Staleness is only known to the client that saw
    /// the conflict, see `EntityApi::state`.
    #[must_use]
    pub fn state(&self) -> EntityState {
        if self.id.is_some() {
            EntityState::Persisted
        } else {
            EntityState::Draft
        }
    }

    /// Strips the server-assigned and read-only fields of `entity_type` so
    /// the record can be used as a create payload.
    #[must_use]
    pub fn into_draft(mut self, entity_type: EntityType) -> Self {
        let schema = entity_type.schema();
        self.id = None;
        self.sync_token = None;
        self.meta_data = None;
        self.sparse = None;
        self.fields.retain(|key, _| !schema.is_read_only(key));
        self
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(Error::from)
    }

    /// Converts a typed record into a generic one.
    pub fn from_typed<T: TypedEntity>(record: &T) -> Result<Self> {
        let value = serde_json::to_value(record)
            .map_err(|e| Error::deserialization(T::ENTITY_TYPE.name(), e, None))?;
        mapping::map_entity(T::ENTITY_TYPE, value)
    }

    /// Converts into the typed record for `T`.
    pub fn into_typed<T: TypedEntity>(self) -> Result<T> {
        let value = self.to_value()?;
        serde_json::from_value(value)
            .map_err(|e| Error::deserialization(T::ENTITY_TYPE.name(), e, None))
    }
}

/// A typed record for one entity type.
pub trait TypedEntity: Serialize + DeserializeOwned {
    const ENTITY_TYPE: EntityType;
}

/// One page of query results.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult {
    pub start_position: u32,
    /// Number of entities actually returned.
    pub max_results: u32,
    /// Only set for `count(*)` queries.
    pub total_count: Option<u64>,
    pub entities: Vec<Entity>,
}

/// Acknowledgement returned for a delete.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Deleted {
    #[serde(rename = "Id")]
    pub id: String,
    /// `Deleted`
    pub status: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_draft_strips_server_fields() {
        let entity = mapping::map_entity(
            EntityType::Invoice,
            json!({
                "Id": "130",
                "SyncToken": "3",
                "MetaData": {"CreateTime": "2024-01-01T10:00:00-08:00"},
                "TotalAmt": 100.0,
                "Balance": 100.0,
                "CustomerRef": {"value": "1"},
                "Line": [{"DetailType": "DescriptionOnly", "Description": "hello"}]
            }),
        )
        .unwrap();
        assert_eq!(entity.state(), EntityState::Persisted);

        let draft = entity.into_draft(EntityType::Invoice);
        assert_eq!(draft.state(), EntityState::Draft);
        assert!(draft.meta_data.is_none());
        assert!(draft.get("TotalAmt").is_none());
        assert!(draft.get("Balance").is_none());
        assert_eq!(draft.get("CustomerRef"), Some(&json!({"value": "1"})));
        assert_eq!(draft.line.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_serializes_flat() {
        let entity = Entity::new()
            .with_identity("1", "0")
            .with_field("DisplayName", "Bill's Windsurf Shop");
        assert_eq!(
            entity.to_value().unwrap(),
            json!({"Id": "1", "SyncToken": "0", "DisplayName": "Bill's Windsurf Shop"})
        );
    }
}
