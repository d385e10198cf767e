//! Generic filter/sort/paginate query engine.
//!
//! Every list endpoint goes through the same pipeline: parse the request
//! into [`ListParams`], validate the requested filters against the entity's
//! [`FilterSchema`] (accumulating *all* problems before failing), then build
//! and run a scoped, parameterised SQLite query via [`ListQuery`].
//!
//! Scoping rules, in order of application:
//! 1. owner scope (`user_id = ?`) — applied first, never overridable;
//! 2. fixed equality filters injected by the calling route;
//! 3. validated request filters.

pub mod builder;
pub mod params;
pub mod schema;

pub use builder::{ListQuery, Paginated};
pub use params::{ListParams, SortOrder};
pub use schema::{FieldSchema, FilterSchema, ValueType};

use std::collections::BTreeMap;

// ─── Validation ──────────────────────────────────────────────────────────────

/// Aggregated per-field validation failures. The whole request fails when
/// any error accumulates — a partial filter set is never applied.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationErrors {
    #[serde(flatten)]
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(|k| k.as_str())
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.errors.get(field).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// A filter that passed validation. `column` comes from the schema, so it is
/// safe to interpolate into SQL; the value is always bound.
#[derive(Debug, Clone)]
pub struct ValidFilter {
    pub column: &'static str,
    pub operator: String,
    pub value: Option<String>,
}

/// Validate every requested filter against `schema`.
///
/// Returns the full set of valid filters, or the full set of errors — never
/// a partial application. Operators default to `=` when omitted.
pub fn validate_filters(
    schema: &'static FilterSchema,
    params: &ListParams,
) -> Result<Vec<ValidFilter>, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let mut valid = Vec::new();

    for (field, clause) in &params.filters {
        let Some(field_schema) = schema.field(field) else {
            errors.add(field, "is not a filterable field");
            continue;
        };

        let operator = clause.operator.clone().unwrap_or_else(|| "=".to_string());
        if !field_schema.operators.contains(&operator.as_str()) {
            errors.add(
                field,
                format!("operator '{operator}' is not permitted for this field"),
            );
            continue;
        }

        // Presence checks need no value and bypass type validation.
        if operator == "null" || operator == "notnull" {
            valid.push(ValidFilter {
                column: field_schema.column,
                operator,
                value: None,
            });
            continue;
        }

        let Some(value) = clause.value.as_deref() else {
            errors.add(field, "filter value is required");
            continue;
        };

        match operator.as_str() {
            "between" => {
                let parts: Vec<&str> = value.split(',').collect();
                if parts.len() != 2 {
                    errors.add(
                        field,
                        "'between' requires exactly two comma-separated values",
                    );
                    continue;
                }
                let mut ok = true;
                for part in &parts {
                    if let Some(msg) = check_scalar(field_schema, part.trim()) {
                        errors.add(field, msg);
                        ok = false;
                    }
                }
                if !ok {
                    continue;
                }
            }
            "in" | "notin" => {
                let mut ok = true;
                for part in value.split(',') {
                    if let Some(msg) = check_scalar(field_schema, part.trim()) {
                        errors.add(field, msg);
                        ok = false;
                    }
                }
                if !ok {
                    continue;
                }
            }
            _ => {
                if let Some(msg) = check_scalar(field_schema, value) {
                    errors.add(field, msg);
                    continue;
                }
            }
        }

        valid.push(ValidFilter {
            column: field_schema.column,
            operator,
            value: Some(value.to_string()),
        });
    }

    if errors.is_empty() {
        Ok(valid)
    } else {
        Err(errors)
    }
}

/// Validate one scalar value against the field's declared type.
/// Returns an error message, or None when the value is acceptable.
fn check_scalar(field: &FieldSchema, value: &str) -> Option<String> {
    match field.value_type {
        ValueType::String => None,
        ValueType::Enum => {
            if field.enum_values.contains(&value) {
                None
            } else {
                Some(format!(
                    "value '{}' is not one of: {}",
                    value,
                    field.enum_values.join(", ")
                ))
            }
        }
        ValueType::Date => {
            if is_valid_date(value) {
                None
            } else {
                Some(format!("value '{value}' is not a valid date"))
            }
        }
    }
}

/// Accept calendar dates and common date-time renderings.
pub fn is_valid_date(value: &str) -> bool {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").is_ok()
        || chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").is_ok()
        || chrono::DateTime::parse_from_rfc3339(value).is_ok()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
