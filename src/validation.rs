//! Client-side payload checks run before any request is sent.
//!
//! Every rule comes from the entity type's [`EntitySchema`]. Line variant
//! errors abort immediately with [`Error::UnknownLineVariant`]; everything
//! else is collected into a single [`Error::Validation`].
//!
//! [`EntitySchema`]: crate::registry::EntitySchema

use serde_json::{Map, Value};

use crate::entities::line::Line;
use crate::error::{Error, Result, Violation};
use crate::mapping::{group_lines, permitted_detail_type};
use crate::registry::{DetailType, EntityType, GROUP_LINE_VARIANTS, Requirement, SERVER_ASSIGNED};

/// Largest page the query endpoint accepts.
pub const MAX_QUERY_RESULTS: u32 = 1000;

/// How an update is applied by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Replaces the whole record; omitted writable fields are cleared.
    #[default]
    Full,
    /// Changes only the fields present in the body.
    Sparse,
}

pub fn validate_create(entity_type: EntityType, payload: &Value) -> Result<()> {
    let obj = as_object(entity_type, payload)?;
    let schema = entity_type.schema();
    let mut violations = check_lines(entity_type, obj)?;

    check_requirements(entity_type, obj, &mut violations);
    for field in SERVER_ASSIGNED.iter().chain(schema.read_only) {
        if is_present(obj, field) {
            violations.push(Violation::ReadOnlyField((*field).to_string()));
        }
    }
    check_lengths(entity_type, obj, &mut violations);

    finish(entity_type, violations)
}

pub fn validate_update(entity_type: EntityType, payload: &Value, mode: UpdateMode) -> Result<()> {
    let obj = as_object(entity_type, payload)?;
    let mut violations = check_lines(entity_type, obj)?;

    for field in ["Id", "SyncToken"] {
        if !is_present(obj, field) {
            violations.push(Violation::MissingField(field.to_string()));
        }
    }
    if mode == UpdateMode::Full {
        check_requirements(entity_type, obj, &mut violations);
    }
    check_lengths(entity_type, obj, &mut violations);

    finish(entity_type, violations)
}

/// Checks a query page window.
pub fn validate_page(entity_type: EntityType, start_position: u32, max_results: u32) -> Result<()> {
    let mut violations = Vec::new();
    if start_position == 0 {
        violations.push(Violation::InvalidQuery(
            "start position is 1-based".to_string(),
        ));
    }
    if !(1..=MAX_QUERY_RESULTS).contains(&max_results) {
        violations.push(Violation::InvalidQuery(format!(
            "max results must be between 1 and {MAX_QUERY_RESULTS}, got {max_results}"
        )));
    }
    finish(entity_type, violations)
}

fn as_object(entity_type: EntityType, payload: &Value) -> Result<&Map<String, Value>> {
    payload.as_object().ok_or_else(|| Error::Validation {
        entity: entity_type,
        violations: vec![Violation::NotAnObject],
    })
}

fn finish(entity_type: EntityType, violations: Vec<Violation>) -> Result<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        debug!(%entity_type, count = violations.len(), "payload rejected");
        Err(Error::Validation {
            entity: entity_type,
            violations,
        })
    }
}

fn is_present(obj: &Map<String, Value>, field: &str) -> bool {
    obj.get(field).is_some_and(|v| !v.is_null())
}

fn check_requirements(
    entity_type: EntityType,
    obj: &Map<String, Value>,
    violations: &mut Vec<Violation>,
) {
    for requirement in entity_type.schema().requirements {
        match requirement {
            Requirement::Field(field) => {
                if !is_present(obj, field) {
                    violations.push(Violation::MissingField((*field).to_string()));
                }
            }
            Requirement::AnyOf(fields) => {
                if !fields.iter().any(|f| is_present(obj, f)) {
                    violations.push(Violation::MissingOneOf(
                        fields.iter().map(|f| (*f).to_string()).collect(),
                    ));
                }
            }
        }
    }
}

fn check_lengths(
    entity_type: EntityType,
    obj: &Map<String, Value>,
    violations: &mut Vec<Violation>,
) {
    for (field, max) in entity_type.schema().max_lengths {
        if let Some(Value::String(s)) = obj.get(*field) {
            let actual = s.chars().count();
            if actual > *max {
                violations.push(Violation::TooLong {
                    field: (*field).to_string(),
                    max: *max,
                    actual,
                });
            }
        }
    }
}

/// Checks the `Line` array of entity types with line variants.
fn check_lines(entity_type: EntityType, obj: &Map<String, Value>) -> Result<Vec<Violation>> {
    let schema = entity_type.schema();
    let mut violations = Vec::new();
    if !schema.has_line_variants() {
        return Ok(violations);
    }
    let raw_lines = match obj.get("Line") {
        None | Some(Value::Null) => return Ok(violations),
        Some(Value::Array(lines)) => lines,
        Some(_) => {
            violations.push(Violation::InvalidLine {
                line: 0,
                reason: "`Line` must be an array".to_string(),
            });
            return Ok(violations);
        }
    };

    for (index, raw) in raw_lines.iter().enumerate() {
        let detail = permitted_detail_type(entity_type, index, raw, schema.line_variants)?;
        let before = violations.len();
        check_detail_present(index, raw, detail, &mut violations);

        if detail == DetailType::Group {
            for nested in group_lines(raw) {
                let nested_detail =
                    permitted_detail_type(entity_type, index, nested, GROUP_LINE_VARIANTS)?;
                check_detail_present(index, nested, nested_detail, &mut violations);
            }
        }

        if violations.len() == before {
            if let Err(e) = serde_json::from_value::<Line>(raw.clone()) {
                violations.push(Violation::InvalidLine {
                    line: index,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(violations)
}

fn check_detail_present(
    index: usize,
    raw: &Value,
    detail: DetailType,
    violations: &mut Vec<Violation>,
) {
    let field = detail.detail_field();
    if detail.detail_required() && raw.get(field).is_none_or(Value::is_null) {
        violations.push(Violation::MissingLineDetail {
            line: index,
            field: field.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn violations(result: Result<()>) -> Vec<Violation> {
        match result {
            Err(Error::Validation { violations, .. }) => violations,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_create_requires_fields() {
        let found = violations(validate_create(EntityType::Account, &json!({"Description": "x"})));
        assert!(found.contains(&Violation::MissingField("Name".to_string())));
        assert!(found.iter().any(|v| matches!(v, Violation::MissingOneOf(_))));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let found = violations(validate_create(
            EntityType::Account,
            &json!({"Name": null, "AccountType": "Bank"}),
        ));
        assert_eq!(found, vec![Violation::MissingField("Name".to_string())]);
    }

    #[test]
    fn test_any_of_requirement() {
        assert!(validate_create(EntityType::Customer, &json!({"GivenName": "Amy"})).is_ok());
        assert!(validate_create(EntityType::Customer, &json!({"Notes": "no name"})).is_err());
    }

    #[test]
    fn test_create_rejects_server_fields() {
        let found = violations(validate_create(
            EntityType::Customer,
            &json!({"DisplayName": "Amy", "Id": "1", "Balance": 10.0}),
        ));
        assert!(found.contains(&Violation::ReadOnlyField("Id".to_string())));
        assert!(found.contains(&Violation::ReadOnlyField("Balance".to_string())));
    }

    #[test]
    fn test_max_length_counts_characters() {
        let name = "é".repeat(100);
        let account = json!({"Name": name, "AccountType": "Bank"});
        assert!(validate_create(EntityType::Account, &account).is_ok());

        let found = violations(validate_create(
            EntityType::Account,
            &json!({"Name": "x".repeat(101), "AccountType": "Bank"}),
        ));
        assert_eq!(
            found,
            vec![Violation::TooLong {
                field: "Name".to_string(),
                max: 100,
                actual: 101
            }]
        );
    }

    #[test]
    fn test_sparse_update_skips_requirements() {
        let payload = json!({"Id": "1", "SyncToken": "0", "Notes": "updated"});
        assert!(validate_update(EntityType::Customer, &payload, UpdateMode::Sparse).is_ok());
        assert!(validate_update(EntityType::Customer, &payload, UpdateMode::Full).is_err());
    }

    #[test]
    fn test_update_requires_identity() {
        let found = violations(validate_update(
            EntityType::Customer,
            &json!({"DisplayName": "Amy"}),
            UpdateMode::Sparse,
        ));
        assert_eq!(
            found,
            vec![
                Violation::MissingField("Id".to_string()),
                Violation::MissingField("SyncToken".to_string())
            ]
        );
    }

    #[test]
    fn test_missing_line_detail() {
        let payload = json!({
            "CustomerRef": {"value": "1"},
            "Line": [{"Amount": 10.0, "DetailType": "SalesItemLineDetail"}]
        });
        let found = violations(validate_create(EntityType::Invoice, &payload));
        assert_eq!(
            found,
            vec![Violation::MissingLineDetail {
                line: 0,
                field: "SalesItemLineDetail".to_string()
            }]
        );
    }

    #[test]
    fn test_description_only_needs_no_detail() {
        let payload = json!({
            "CustomerRef": {"value": "1"},
            "Line": [{"DetailType": "DescriptionOnly", "Description": "thanks"}]
        });
        assert!(validate_create(EntityType::Invoice, &payload).is_ok());
    }

    #[test]
    fn test_unknown_line_variant_wins() {
        let payload = json!({"Line": [{"DetailType": "UnknownType"}]});
        assert!(matches!(
            validate_create(EntityType::Invoice, &payload),
            Err(Error::UnknownLineVariant { line: 0, .. })
        ));
    }

    #[test]
    fn test_page_bounds() {
        assert!(validate_page(EntityType::Invoice, 1, 1000).is_ok());
        assert!(validate_page(EntityType::Invoice, 1, 0).is_err());
        assert!(validate_page(EntityType::Invoice, 1, 1001).is_err());
        assert!(validate_page(EntityType::Invoice, 0, 10).is_err());
    }
}
