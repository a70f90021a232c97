//! Field validator compiler
//!
//! Compiles a schema's field list into a [`RecordValidator`] that checks
//! record payloads at runtime. Each field becomes a [`FieldRule`]; the single
//! [`validate`] function dispatches on the rule's variant.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{EngineError, Result, ValidationErrors};
use crate::record::is_reserved_key;
use crate::schema::{FieldDefinition, FieldType};

/// Runtime rule for one field type
#[derive(Debug, Clone)]
pub enum FieldRule {
    Text {
        min_length: Option<usize>,
        max_length: Option<usize>,
        pattern: Option<Regex>,
        pattern_message: Option<String>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean,
    /// `None` accepts any string
    Select {
        options: Option<Vec<String>>,
    },
    MultiSelect {
        options: Option<Vec<String>>,
    },
    Date,
    DateTime,
    /// Reference id; the target record is not checked
    Relation,
    Json,
}

impl FieldRule {
    /// Compile the rule for a field; computed fields have none
    pub fn compile(field: &FieldDefinition) -> Result<Option<Self>> {
        let validation = field.validation.clone().unwrap_or_default();
        let rule = match field.field_type {
            FieldType::Text | FieldType::Textarea => {
                let pattern = match validation.pattern.as_deref() {
                    Some(p) => Some(Regex::new(p).map_err(|e| {
                        EngineError::Configuration(format!(
                            "field '{}' has an invalid pattern: {}",
                            field.key, e
                        ))
                    })?),
                    None => None,
                };
                FieldRule::Text {
                    min_length: validation.min_length,
                    max_length: validation.max_length,
                    pattern,
                    pattern_message: validation.pattern_message,
                }
            }
            FieldType::Number => FieldRule::Number {
                min: validation.min,
                max: validation.max,
            },
            FieldType::Boolean => FieldRule::Boolean,
            FieldType::Select => FieldRule::Select {
                options: field.option_values(),
            },
            FieldType::Multiselect => FieldRule::MultiSelect {
                options: field.option_values(),
            },
            FieldType::Date => FieldRule::Date,
            FieldType::Datetime => FieldRule::DateTime,
            FieldType::Relation => FieldRule::Relation,
            FieldType::Json => FieldRule::Json,
            FieldType::Computed => return Ok(None),
        };
        Ok(Some(rule))
    }
}

fn is_date_like(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(s).is_ok()
}

fn format_options(options: &[String]) -> String {
    options.join(", ")
}

/// Check one non-null value against a rule
pub fn validate(rule: &FieldRule, value: &Value) -> std::result::Result<(), String> {
    match rule {
        FieldRule::Text {
            min_length,
            max_length,
            pattern,
            pattern_message,
        } => {
            let Value::String(s) = value else {
                return Err("must be a string".to_string());
            };
            let len = s.chars().count();
            if let Some(min) = min_length {
                if len < *min {
                    return Err(format!("must be at least {} characters", min));
                }
            }
            if let Some(max) = max_length {
                if len > *max {
                    return Err(format!("must be at most {} characters", max));
                }
            }
            if let Some(re) = pattern {
                if !re.is_match(s) {
                    return Err(pattern_message
                        .clone()
                        .unwrap_or_else(|| "does not match the required format".to_string()));
                }
            }
            Ok(())
        }
        FieldRule::Number { min, max } => {
            let Some(n) = value.as_f64() else {
                return Err("must be a number".to_string());
            };
            if let Some(min) = min {
                if n < *min {
                    return Err(format!("must be at least {}", min));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(format!("must be at most {}", max));
                }
            }
            Ok(())
        }
        FieldRule::Boolean => match value {
            Value::Bool(_) => Ok(()),
            _ => Err("must be a boolean".to_string()),
        },
        FieldRule::Select { options } => match (value, options) {
            (Value::String(s), Some(options)) if !options.contains(s) => {
                Err(format!("must be one of: {}", format_options(options)))
            }
            (Value::String(_), _) => Ok(()),
            _ => Err("must be a string".to_string()),
        },
        FieldRule::MultiSelect { options } => {
            let Value::Array(items) = value else {
                return Err("must be an array".to_string());
            };
            for item in items {
                match (item, options) {
                    (Value::String(s), Some(options)) if !options.contains(s) => {
                        return Err(format!(
                            "contains '{}', expected one of: {}",
                            s,
                            format_options(options)
                        ));
                    }
                    (Value::String(_), _) => {}
                    _ => return Err("must contain only strings".to_string()),
                }
            }
            Ok(())
        }
        FieldRule::Date | FieldRule::DateTime => match value {
            Value::String(s) if is_date_like(s) => Ok(()),
            _ => Err("must be a valid date".to_string()),
        },
        FieldRule::Relation => match value {
            Value::String(_) => Ok(()),
            _ => Err("must be a string".to_string()),
        },
        FieldRule::Json => Ok(()),
    }
}

/// Absent, null, empty string and empty array all count as missing
fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Create: required fields must be present
    Full,
    /// Update: every field optional, present values checked
    Partial,
}

#[derive(Debug, Clone)]
pub struct CompiledField {
    pub key: String,
    pub required: bool,
    pub rule: FieldRule,
}

/// Compiled validator for one field list
#[derive(Debug, Clone)]
pub struct RecordValidator {
    fields: Vec<CompiledField>,
    /// Readonly and computed keys, dropped from payloads
    stripped: HashSet<String>,
}

impl RecordValidator {
    pub fn compile(definitions: &[FieldDefinition]) -> Result<Self> {
        let mut fields = Vec::with_capacity(definitions.len());
        let mut stripped = HashSet::new();

        for def in definitions {
            if !def.accepts_input() {
                stripped.insert(def.key.clone());
                continue;
            }
            if let Some(rule) = FieldRule::compile(def)? {
                fields.push(CompiledField {
                    key: def.key.clone(),
                    required: def.required,
                    rule,
                });
            }
        }

        Ok(Self { fields, stripped })
    }

    pub fn fields(&self) -> &[CompiledField] {
        &self.fields
    }

    pub fn rule(&self, key: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.rule)
    }

    /// Validate a payload, returning the cleaned copy.
    ///
    /// Reserved, readonly and computed keys are dropped; unknown keys pass
    /// through untouched. Every violation is collected before failing.
    pub fn validate(&self, payload: &Map<String, Value>, mode: ValidationMode) -> Result<Map<String, Value>> {
        let mut errors = ValidationErrors::new();

        for field in &self.fields {
            let value = payload.get(&field.key);
            let present = value.is_some();

            if field.required && is_missing(value) && (mode == ValidationMode::Full || present) {
                errors.push(&field.key, "is required");
                continue;
            }

            match value {
                None | Some(Value::Null) => {}
                Some(v) => {
                    if let Err(message) = validate(&field.rule, v) {
                        errors.push(&field.key, message);
                    }
                }
            }
        }

        errors.into_result()?;

        Ok(payload
            .iter()
            .filter(|(key, _)| !is_reserved_key(key) && !self.stripped.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldValidation;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn incident_fields() -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("status", "Status", FieldType::Select)
                .required()
                .with_options(["open", "closed"]),
            FieldDefinition::new("priority", "Priority", FieldType::Number).with_validation(
                FieldValidation {
                    min: Some(1.0),
                    max: Some(5.0),
                    ..Default::default()
                },
            ),
            FieldDefinition::new("ticket", "Ticket", FieldType::Text).readonly(),
        ]
    }

    #[test]
    fn test_required_field_missing_forms() {
        let validator = RecordValidator::compile(&incident_fields()).unwrap();
        for bad in [json!({}), json!({ "status": null }), json!({ "status": "" })] {
            let err = validator.validate(&payload(bad), ValidationMode::Full).unwrap_err();
            assert!(err.validation_issues().unwrap().mentions("status"));
        }
    }

    #[test]
    fn test_optional_absent_or_null_is_fine() {
        let validator = RecordValidator::compile(&incident_fields()).unwrap();
        let ok = validator.validate(&payload(json!({ "status": "open", "priority": null })), ValidationMode::Full);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_partial_mode_skips_absent_required_but_rejects_null() {
        let validator = RecordValidator::compile(&incident_fields()).unwrap();
        assert!(validator
            .validate(&payload(json!({ "priority": 2 })), ValidationMode::Partial)
            .is_ok());
        assert!(validator
            .validate(&payload(json!({ "status": null })), ValidationMode::Partial)
            .is_err());
    }

    #[test]
    fn test_all_violations_reported_together() {
        let validator = RecordValidator::compile(&incident_fields()).unwrap();
        let err = validator
            .validate(&payload(json!({ "status": "pending", "priority": 9 })), ValidationMode::Full)
            .unwrap_err();
        let issues = err.validation_issues().unwrap();
        assert_eq!(issues.len(), 2);
        assert!(err.to_string().contains("priority: must be at most 5"));
    }

    #[test]
    fn test_strips_reserved_and_readonly_keeps_extras() {
        let validator = RecordValidator::compile(&incident_fields()).unwrap();
        let cleaned = validator
            .validate(
                &payload(json!({ "status": "open", "_id": "x", "createdBy": "evil", "ticket": "T-1", "extra": 1 })),
                ValidationMode::Full,
            )
            .unwrap();
        assert_eq!(cleaned, payload(json!({ "status": "open", "extra": 1 })));
    }

    #[test]
    fn test_text_length_counts_characters() {
        let rule = FieldRule::Text {
            min_length: None,
            max_length: Some(3),
            pattern: None,
            pattern_message: None,
        };
        assert!(validate(&rule, &json!("héé")).is_ok());
        assert!(validate(&rule, &json!("abcd")).is_err());
    }

    #[test]
    fn test_pattern_uses_custom_message() {
        let field = FieldDefinition::new("code", "Code", FieldType::Text).with_validation(FieldValidation {
            pattern: Some("^[A-Z]{3}$".into()),
            pattern_message: Some("three capitals".into()),
            ..Default::default()
        });
        let rule = FieldRule::compile(&field).unwrap().unwrap();
        assert_eq!(validate(&rule, &json!("abc")), Err("three capitals".to_string()));
    }

    #[test]
    fn test_bad_pattern_is_configuration_error() {
        let field = FieldDefinition::new("code", "Code", FieldType::Text).with_validation(FieldValidation {
            pattern: Some("([".into()),
            ..Default::default()
        });
        assert!(matches!(
            RecordValidator::compile(&[field]),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_dates_and_booleans() {
        assert!(validate(&FieldRule::Date, &json!("2024-02-29")).is_ok());
        assert!(validate(&FieldRule::DateTime, &json!("2024-02-29T10:00:00Z")).is_ok());
        assert!(validate(&FieldRule::Date, &json!("2023-02-29")).is_err());
        assert!(validate(&FieldRule::Boolean, &json!("true")).is_err());
    }

    #[test]
    fn test_multiselect_checks_each_option() {
        let rule = FieldRule::MultiSelect {
            options: Some(vec!["a".into(), "b".into()]),
        };
        assert!(validate(&rule, &json!(["a", "b"])).is_ok());
        assert!(validate(&rule, &json!(["a", "c"])).is_err());
        assert!(validate(&rule, &json!("a")).is_err());
    }
}
