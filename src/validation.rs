//! Schema validation helpers.
//!
//! Configuration arrives from the host as `serde_json::Value`. These helpers
//! check it against a [`Schema`] so that malformed input is reported as
//! diagnostics before any call reaches Slack.
//!
//! # Example
//!
//! ```
//! use slack_provider::schema::{Schema, Attribute};
//! use slack_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::optional_string())
//!     .with_attribute("email", Attribute::optional_string())
//!     .with_exactly_one_of(["name", "email"]);
//!
//! assert!(validate(&schema, &json!({"name": "alice"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "alice", "email": "a@example.com"}));
//! assert_eq!(diagnostics.len(), 1);
//! ```

use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped (the provider sets these)
/// - Attribute types must match the schema
/// - Restricted strings must be one of the allowed values
/// - Strings must not exceed their maximum length
/// - Exactly one attribute of each exactly-one-of group must be set
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match value {
        Value::Object(map) => map,
        Value::Null => {
            // Treat a null configuration as an empty object
            let empty = serde_json::Map::new();
            validate_object(schema, &empty, &mut diagnostics);
            return diagnostics;
        },
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value))),
            );
            return diagnostics;
        },
    };

    validate_object(schema, obj, &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Validate and turn the first problem into a [`ProviderError::Validation`].
///
/// Used on paths that must fail before any remote call is issued.
pub fn ensure_valid(schema: &Schema, value: &Value) -> Result<(), ProviderError> {
    match validate(schema, value).into_iter().next() {
        None => Ok(()),
        Some(diag) => {
            let message = match diag.detail {
                Some(detail) => format!("{}: {}", diag.summary, detail),
                None => diag.summary,
            };
            Err(ProviderError::Validation(message))
        },
    }
}

fn validate_object(
    schema: &Schema,
    obj: &serde_json::Map<String, Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut names: Vec<&String> = schema.attributes.keys().collect();
    names.sort();

    for name in names {
        let attr = &schema.attributes[name];
        validate_attribute(attr, obj.get(name), name, diagnostics);
    }

    for group in &schema.exactly_one_of {
        validate_exactly_one_of(group, obj, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            if validate_attribute_type(&attr.attr_type, v, path, diagnostics) {
                validate_string_constraints(attr, v, path, diagnostics);
            }
        },
    }
}

/// Returns whether the value had the expected type.
fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
                return false;
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
                return false;
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
                return false;
            }
        },
        AttributeType::Set(element_type) => {
            // Sets are represented as arrays in JSON
            let Some(arr) = value.as_array() else {
                diagnostics.push(type_error(path, "set", value));
                return false;
            };
            let mut ok = true;
            for (i, elem) in arr.iter().enumerate() {
                let elem_path = format!("{}.{}", path, i);
                ok &= validate_attribute_type(element_type, elem, &elem_path, diagnostics);
            }
            return ok;
        },
    }
    true
}

fn validate_string_constraints(
    attr: &Attribute,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(s) = value.as_str() else {
        return;
    };

    if !attr.allowed_values.is_empty() && !attr.allowed_values.iter().any(|v| v == s) {
        diagnostics.push(
            Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                .with_detail(format!(
                    "Expected one of [{}], got \"{}\"",
                    attr.allowed_values.join(", "),
                    s
                ))
                .with_attribute(path),
        );
    }

    if let Some(max) = attr.max_length {
        let len = s.chars().count();
        if len > max {
            diagnostics.push(
                Diagnostic::error(format!("Attribute '{}' is too long", path))
                    .with_detail(format!("At most {} characters allowed, got {}", max, len))
                    .with_attribute(path),
            );
        }
    }
}

fn validate_exactly_one_of(
    group: &[String],
    obj: &serde_json::Map<String, Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let set: Vec<&String> = group
        .iter()
        .filter(|name| !matches!(obj.get(name.as_str()), None | Some(Value::Null)))
        .collect();

    let quoted = group
        .iter()
        .map(|n| format!("'{}'", n))
        .collect::<Vec<_>>()
        .join(", ");

    match set.len() {
        1 => {},
        0 => diagnostics.push(
            Diagnostic::error("Invalid Attribute Combination")
                .with_detail(format!("Exactly one of {} must be specified", quoted)),
        ),
        _ => diagnostics.push(
            Diagnostic::error("Invalid Attribute Combination")
                .with_detail(format!(
                    "Only one of {} can be specified, got {}",
                    quoted,
                    set.iter()
                        .map(|n| format!("'{}'", n))
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
                .with_attribute(set[1].as_str()),
        ),
    }
}

// Helper functions

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        ))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Schema};
    use serde_json::json;

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &json!({"name": "general"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        let diagnostics = validate(&schema, &json!({"name": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("created", Attribute::computed_int64());

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"created": "yesterday"})).is_empty());
    }

    #[test]
    fn test_validate_string_set() {
        let schema = Schema::v0().with_attribute("users", Attribute::optional_string_set());

        assert!(validate(&schema, &json!({"users": ["U1", "U2"]})).is_empty());
        assert!(validate(&schema, &json!({"users": []})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());

        let diagnostics = validate(&schema, &json!({"users": "U1"}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"users": ["U1", 2]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("users.1".to_string()));
    }

    #[test]
    fn test_validate_allowed_values() {
        let schema = Schema::v0().with_attribute(
            "action_on_destroy",
            Attribute::optional_computed_string().with_allowed_values(["none", "archive"]),
        );

        assert!(validate(&schema, &json!({"action_on_destroy": "none"})).is_empty());

        let diagnostics = validate(&schema, &json!({"action_on_destroy": "delete"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("[none, archive]"));
    }

    #[test]
    fn test_validate_max_length() {
        let schema = Schema::v0().with_attribute(
            "topic",
            Attribute::optional_computed_string().with_max_length(250),
        );

        assert!(validate(&schema, &json!({"topic": "x".repeat(250)})).is_empty());

        let diagnostics = validate(&schema, &json!({"topic": "x".repeat(251)}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("topic".to_string()));
    }

    #[test]
    fn test_validate_exactly_one_of() {
        let schema = Schema::v0()
            .with_attribute("id", Attribute::optional_string())
            .with_attribute("name", Attribute::optional_string())
            .with_exactly_one_of(["id", "name"]);

        assert!(is_valid(&schema, &json!({"id": "S123"})));
        assert!(is_valid(&schema, &json!({"name": "oncall", "id": null})));

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Invalid Attribute Combination");

        let diagnostics = validate(&schema, &json!({"id": "S123", "name": "oncall"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0]
            .detail
            .as_deref()
            .unwrap()
            .starts_with("Only one of"));
    }

    #[test]
    fn test_validate_null_config() {
        let schema = Schema::v0().with_attribute("token", Attribute::optional_string());
        assert!(validate(&schema, &Value::Null).is_empty());

        let diagnostics = validate(&schema, &json!([1, 2]));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Expected object");
    }

    #[test]
    fn test_ensure_valid() {
        let schema = Schema::v0()
            .with_attribute("id", Attribute::optional_string())
            .with_attribute("name", Attribute::optional_string())
            .with_exactly_one_of(["id", "name"]);

        assert!(ensure_valid(&schema, &json!({"name": "oncall"})).is_ok());

        let err = ensure_valid(&schema, &json!({})).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(err.message().contains("Exactly one of 'id', 'name'"));
    }

    #[test]
    fn test_validate_result() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate_result(&schema, &json!({"name": "eng"})).is_ok());
        let errs = validate_result(&schema, &json!({})).unwrap_err();
        assert_eq!(errs.len(), 1);
    }
}
