//! Conversion of raw service JSON into [`Entity`] records and typed lines.
//!
//! Line mapping dispatches on `DetailType` against the variants the entity
//! type permits. An unknown or unpermitted tag is always an
//! [`Error::UnknownLineVariant`]; there is no fallback variant.

use serde_json::{Map, Value};

use crate::entities::common::MetaData;
use crate::entities::entity::{Deleted, Entity, QueryResult};
use crate::entities::line::Line;
use crate::error::{Error, Result};
use crate::registry::{DetailType, EntityType, GROUP_LINE_VARIANTS};

/// Maps one raw line of `entity_type` into a [`Line`].
pub fn map_line_item(entity_type: EntityType, raw: &Value) -> Result<Line> {
    map_line_at(entity_type, 0, raw)
}

/// Maps a raw entity object (already unwrapped from its envelope).
pub fn map_entity(entity_type: EntityType, value: Value) -> Result<Entity> {
    let Value::Object(mut map) = value else {
        return Err(not_an_object(entity_type, &value));
    };

    let id = take_string(&mut map, "Id");
    let sync_token = take_string(&mut map, "SyncToken");
    let sparse = map.remove("sparse").and_then(|v| v.as_bool());
    let meta_data = match map.remove("MetaData") {
        Some(Value::Null) | None => None,
        Some(raw) => Some(
            serde_json::from_value::<MetaData>(raw)
                .map_err(|e| Error::deserialization(entity_type.name(), e, None))?,
        ),
    };

    let line = if entity_type.schema().has_line_variants() {
        match map.remove("Line") {
            Some(Value::Array(raw_lines)) => Some(
                raw_lines
                    .iter()
                    .enumerate()
                    .map(|(index, raw)| map_line_at(entity_type, index, raw))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(Value::Null) | None => None,
            Some(other) => return Err(not_an_array(entity_type, "Line", &other)),
        }
    } else {
        None
    };

    Ok(Entity {
        id,
        sync_token,
        sparse,
        meta_data,
        line,
        fields: map,
    })
}

/// Takes the entity object out of a `{"<EntityName>": {...}}` envelope.
pub fn unwrap_envelope(entity_type: EntityType, body: Value) -> Result<Value> {
    match body {
        Value::Object(mut map) => match map.remove(entity_type.name()) {
            Some(inner) => Ok(inner),
            None => Err(missing_key(entity_type, entity_type.name(), &Value::Object(map))),
        },
        other => Err(not_an_object(entity_type, &other)),
    }
}

/// Maps a `{"QueryResponse": {...}}` body into a [`QueryResult`].
///
/// The service omits every key for an empty page, so `requested_start` is
/// used when `startPosition` is missing.
pub fn map_query_response(
    entity_type: EntityType,
    body: Value,
    requested_start: u32,
) -> Result<QueryResult> {
    let Value::Object(mut envelope) = body else {
        return Err(not_an_object(entity_type, &body));
    };
    let Some(Value::Object(mut response)) = envelope.remove("QueryResponse") else {
        return Err(missing_key(
            entity_type,
            "QueryResponse",
            &Value::Object(envelope),
        ));
    };

    let entities = match response.remove(entity_type.name()) {
        Some(Value::Array(raw)) => raw
            .into_iter()
            .map(|value| map_entity(entity_type, value))
            .collect::<Result<Vec<_>>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => return Err(not_an_array(entity_type, entity_type.name(), &other)),
    };

    let start_position = read_u64(&response, "startPosition")
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(requested_start);
    let max_results = read_u64(&response, "maxResults")
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or_else(|| u32::try_from(entities.len()).unwrap_or(u32::MAX));

    Ok(QueryResult {
        start_position,
        max_results,
        total_count: read_u64(&response, "totalCount"),
        entities,
    })
}

/// Maps a delete or void acknowledgement.
pub fn map_deleted(entity_type: EntityType, body: Value) -> Result<Deleted> {
    let raw = unwrap_envelope(entity_type, body)?;
    let text = raw.to_string();
    serde_json::from_value(raw)
        .map_err(|e| Error::deserialization(entity_type.name(), e, Some(text)))
}

/// Resolves the `DetailType` of a raw line and checks it against `permitted`.
pub(crate) fn permitted_detail_type(
    entity_type: EntityType,
    index: usize,
    raw: &Value,
    permitted: &[DetailType],
) -> Result<DetailType> {
    let tag = raw.get("DetailType").and_then(Value::as_str);
    tag.and_then(DetailType::from_tag)
        .filter(|detail| permitted.contains(detail))
        .ok_or_else(|| Error::UnknownLineVariant {
            entity: entity_type,
            line: index,
            detail_type: tag.map(str::to_string),
        })
}

/// Raw nested lines of a group line, if any.
pub(crate) fn group_lines(raw: &Value) -> &[Value] {
    raw.get(DetailType::Group.detail_field())
        .and_then(|detail| detail.get("Line"))
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

fn map_line_at(entity_type: EntityType, index: usize, raw: &Value) -> Result<Line> {
    let detail =
        permitted_detail_type(entity_type, index, raw, entity_type.schema().line_variants)?;
    if detail == DetailType::Group {
        for nested in group_lines(raw) {
            permitted_detail_type(entity_type, index, nested, GROUP_LINE_VARIANTS)?;
        }
    }
    trace!(%entity_type, index, %detail, "mapping line");
    serde_json::from_value(raw.clone())
        .map_err(|e| Error::deserialization(entity_type.name(), e, Some(raw.to_string())))
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn read_u64(map: &Map<String, Value>, key: &str) -> Option<u64> {
    map.get(key).and_then(Value::as_u64)
}

fn shape_error(entity_type: EntityType, message: String, body: &Value) -> Error {
    Error::deserialization(
        entity_type.name(),
        <serde_json::Error as serde::de::Error>::custom(message),
        Some(body.to_string()),
    )
}

fn not_an_object(entity_type: EntityType, body: &Value) -> Error {
    shape_error(entity_type, "expected a JSON object".to_string(), body)
}

fn not_an_array(entity_type: EntityType, key: &str, body: &Value) -> Error {
    shape_error(entity_type, format!("expected `{key}` to be an array"), body)
}

fn missing_key(entity_type: EntityType, key: &str, body: &Value) -> Error {
    shape_error(entity_type, format!("missing `{key}`"), body)
}
