//! Tool Schema Linting
//!
//! Checks a complete tool definition before it is stored or published.
//!
//! ## Lints
//! 1. **Shape errors**: identifiers, required sections, bounds, unique keys.
//!    Any error blocks create and publish.
//! 2. **Reference warnings**: views, audit config and actions that point at
//!    fields or handlers that do not exist. Warnings never block.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;

use crate::actions::is_known_handler;
use crate::error::{EngineError, Result, ValidationErrors};
use crate::expr::Expression;
use crate::record::{is_reserved_key, RESERVED_KEYS};
use crate::schema::{FieldDefinition, FieldType, ToolSchemaInput};

/// Result of linting a schema
#[derive(Debug, Default)]
pub struct LintResult {
    pub schema_id: String,
    pub errors: Vec<LintError>,
    pub warnings: Vec<LintWarning>,
}

impl LintResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Errors rendered as `path: message`
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings
            .iter()
            .map(|w| format!("{}: {}", w.path, w.message))
            .collect()
    }

    /// Fail with every error path when the schema is not clean
    pub fn into_result(self) -> Result<()> {
        let mut issues = ValidationErrors::new();
        for error in self.errors {
            issues.push(error.path, error.message);
        }
        issues.into_result()
    }

    fn error(&mut self, code: &'static str, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(LintError {
            code,
            message: message.into(),
            path: path.into(),
        });
    }

    fn warn(&mut self, code: &'static str, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(LintWarning {
            code,
            message: message.into(),
            path: path.into(),
        });
    }
}

#[derive(Debug)]
pub struct LintError {
    pub code: &'static str,
    pub message: String,
    pub path: String,
}

#[derive(Debug)]
pub struct LintWarning {
    pub code: &'static str,
    pub message: String,
    pub path: String,
}

/// The tool schema linter
pub struct SchemaLinter {
    tool_id_re: Regex,
    resource_re: Regex,
    field_key_re: Regex,
    max_page_size: u32,
}

impl Default for SchemaLinter {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaLinter {
    pub fn new() -> Self {
        Self {
            tool_id_re: Regex::new(r"^[a-z][a-z0-9-]*$").unwrap(),
            resource_re: Regex::new(r"^[a-z][a-z0-9_]*$").unwrap(),
            field_key_re: Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap(),
            max_page_size: 100,
        }
    }

    pub fn with_max_page_size(mut self, max_page_size: u32) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    /// Lint raw JSON: shape problems that stop deserialization are reported
    /// as a single error
    pub fn lint_value(&self, schema_id: &str, value: &Value) -> LintResult {
        match serde_json::from_value::<ToolSchemaInput>(value.clone()) {
            Ok(input) => self.lint(schema_id, &input),
            Err(err) => {
                let mut result = LintResult {
                    schema_id: schema_id.to_string(),
                    ..Default::default()
                };
                result.error("INVALID_SHAPE", "", err.to_string());
                result
            }
        }
    }

    /// Lint a tool definition
    pub fn lint(&self, schema_id: &str, input: &ToolSchemaInput) -> LintResult {
        let mut result = LintResult {
            schema_id: schema_id.to_string(),
            ..Default::default()
        };

        if !self.tool_id_re.is_match(&input.tool_id) {
            result.error(
                "INVALID_TOOL_ID",
                "toolId",
                "Tool ID must be lowercase with hyphens",
            );
        }
        if input.name.trim().is_empty() {
            result.error("EMPTY_NAME", "name", "Name is required");
        }
        if !self.resource_re.is_match(&input.resource) {
            result.error(
                "INVALID_RESOURCE",
                "resource",
                "Resource must be lowercase with underscores",
            );
        }

        let declared = self.lint_fields(&input.fields, &mut result);
        self.lint_list_view(input, &declared, &mut result);
        self.lint_form_view(input, &declared, &mut result);
        self.lint_actions(input, &mut result);

        if let Some(audited) = input.audit.fields.as_ref() {
            for (i, key) in audited.iter().enumerate() {
                if !declared.contains(key.as_str()) {
                    result.warn(
                        "UNKNOWN_FIELD_REFERENCE",
                        format!("audit.fields[{}]", i),
                        format!("Audited field '{}' is not declared", key),
                    );
                }
            }
        }

        result
    }

    fn lint_fields<'a>(&self, fields: &'a [FieldDefinition], result: &mut LintResult) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        if fields.is_empty() {
            result.error("NO_FIELDS", "fields", "At least one field is required");
        }

        for (i, field) in fields.iter().enumerate() {
            let path = format!("fields[{}]", i);

            if !self.field_key_re.is_match(&field.key) {
                result.error("INVALID_FIELD_KEY", format!("{}.key", path), "Invalid field key");
            } else if is_reserved_key(&field.key) {
                result.error(
                    "RESERVED_FIELD_KEY",
                    format!("{}.key", path),
                    format!(
                        "'{}' is reserved (reserved keys: {})",
                        field.key,
                        RESERVED_KEYS.join(", ")
                    ),
                );
            }
            if !seen.insert(field.key.as_str()) {
                result.error(
                    "DUPLICATE_FIELD_KEY",
                    format!("{}.key", path),
                    format!("Duplicate field key '{}'", field.key),
                );
            }
            if field.label.trim().is_empty() {
                result.error("EMPTY_LABEL", format!("{}.label", path), "Label is required");
            }

            if let Some(validation) = field.validation.as_ref() {
                if let Some(pattern) = validation.pattern.as_deref() {
                    if let Err(err) = Regex::new(pattern) {
                        result.error(
                            "INVALID_PATTERN",
                            format!("{}.validation.pattern", path),
                            format!("Invalid pattern: {}", err),
                        );
                    }
                }
                if let (Some(min), Some(max)) = (validation.min, validation.max) {
                    if min > max {
                        result.error(
                            "INVALID_RANGE",
                            format!("{}.validation.min", path),
                            "min must not exceed max",
                        );
                    }
                }
                if let (Some(min), Some(max)) = (validation.min_length, validation.max_length) {
                    if min > max {
                        result.error(
                            "INVALID_RANGE",
                            format!("{}.validation.minLength", path),
                            "minLength must not exceed maxLength",
                        );
                    }
                }
            }

            if field.field_type == FieldType::Select && field.option_values().is_none() {
                result.warn(
                    "SELECT_WITHOUT_OPTIONS",
                    format!("{}.options", path),
                    "Select field has no options; any string will be accepted",
                );
            }
            if field.field_type == FieldType::Relation && field.relation_to.is_none() {
                result.warn(
                    "RELATION_WITHOUT_TARGET",
                    format!("{}.relationTo", path),
                    "Relation field does not name a target tool",
                );
            }
            self.check_expression(field.visibility.as_deref(), format!("{}.visibility", path), result);
        }

        seen
    }

    fn lint_list_view(&self, input: &ToolSchemaInput, declared: &HashSet<&str>, result: &mut LintResult) {
        let view = &input.list_view;
        if view.columns.is_empty() {
            result.error("NO_COLUMNS", "listView.columns", "At least one column is required");
        }
        if let Some(page_size) = view.page_size {
            if page_size < 1 || page_size > self.max_page_size {
                result.error(
                    "INVALID_PAGE_SIZE",
                    "listView.pageSize",
                    format!("Page size must be between 1 and {}", self.max_page_size),
                );
            }
        }
        if let Some(sort) = view.default_sort.as_ref() {
            if !declared.contains(sort.field.as_str()) && !is_reserved_key(&sort.field) {
                result.warn(
                    "UNKNOWN_FIELD_REFERENCE",
                    "listView.defaultSort.field",
                    format!("Default sort field '{}' is not declared", sort.field),
                );
            }
        }
        for (i, key) in view.searchable_fields.iter().flatten().enumerate() {
            if !declared.contains(key.as_str()) {
                result.warn(
                    "UNKNOWN_FIELD_REFERENCE",
                    format!("listView.searchableFields[{}]", i),
                    format!("Searchable field '{}' is not declared", key),
                );
            }
        }
    }

    fn lint_form_view(&self, input: &ToolSchemaInput, declared: &HashSet<&str>, result: &mut LintResult) {
        let sections = &input.form_view.sections;
        if sections.is_empty() {
            result.error("NO_SECTIONS", "formView.sections", "At least one section is required");
        }
        for (i, section) in sections.iter().enumerate() {
            let path = format!("formView.sections[{}]", i);
            if section.fields.is_empty() {
                result.error(
                    "EMPTY_SECTION",
                    format!("{}.fields", path),
                    "Section must list at least one field",
                );
            }
            for (j, key) in section.fields.iter().enumerate() {
                if !declared.contains(key.as_str()) {
                    result.warn(
                        "UNKNOWN_FIELD_REFERENCE",
                        format!("{}.fields[{}]", path, j),
                        format!("Section field '{}' is not declared", key),
                    );
                }
            }
            self.check_expression(section.visibility.as_deref(), format!("{}.visibility", path), result);
        }
    }

    fn lint_actions(&self, input: &ToolSchemaInput, result: &mut LintResult) {
        let mut seen = HashSet::new();
        for (i, action) in input.actions.iter().flatten().enumerate() {
            let path = format!("actions[{}]", i);
            if action.id.trim().is_empty() {
                result.error("EMPTY_ACTION_ID", format!("{}.id", path), "Action id is required");
            } else if !seen.insert(action.id.as_str()) {
                result.error(
                    "DUPLICATE_ACTION_ID",
                    format!("{}.id", path),
                    format!("Duplicate action id '{}'", action.id),
                );
            }
            if !is_known_handler(&action.handler) {
                result.warn(
                    "UNKNOWN_HANDLER",
                    format!("{}.handler", path),
                    format!("Unknown action handler '{}'; running it will fail", action.handler),
                );
            }
            self.check_expression(action.visibility.as_deref(), format!("{}.visibility", path), result);
        }
    }

    fn check_expression(&self, expr: Option<&str>, path: String, result: &mut LintResult) {
        let Some(source) = expr.map(str::trim).filter(|s| !s.is_empty()) else {
            return;
        };
        if let Err(err) = Expression::parse(source) {
            result.warn(
                "INVALID_EXPRESSION",
                path,
                format!("Visibility expression will be ignored: {}", err),
            );
        }
    }
}

/// Lint every `*.json` schema file under a path (file or directory)
pub fn lint_schemas(schema_dir: &Path) -> Result<Vec<(PathBuf, LintResult)>> {
    let linter = SchemaLinter::new();
    let mut results = Vec::new();

    for entry in walkdir::WalkDir::new(schema_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
    {
        let path = entry.path();
        let content = std::fs::read_to_string(path)?;
        let schema_id = path
            .strip_prefix(schema_dir)
            .ok()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        let result = match serde_json::from_str::<Value>(&content) {
            Ok(value) => linter.lint_value(&schema_id, &value),
            Err(err) => {
                let mut result = LintResult {
                    schema_id,
                    ..Default::default()
                };
                result.error("INVALID_JSON", "", err.to_string());
                result
            }
        };
        results.push((path.to_path_buf(), result));
    }

    if results.is_empty() && !schema_dir.exists() {
        return Err(EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", schema_dir.display()),
        )));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn incidents() -> Value {
        json!({
            "toolId": "incidents",
            "name": "Incidents",
            "resource": "incidents",
            "fields": [
                { "key": "status", "label": "Status", "type": "select", "required": true,
                  "options": [{ "value": "open", "label": "Open" }, { "value": "closed", "label": "Closed" }] },
                { "key": "priority", "label": "Priority", "type": "number",
                  "validation": { "min": 1, "max": 5 } }
            ],
            "listView": { "columns": [{ "key": "status", "label": "Status" }], "searchableFields": ["status"] },
            "formView": { "sections": [{ "title": "Main", "fields": ["status", "priority"] }] },
            "permissions": {
                "canAccessTool": ["admin"], "canCreate": ["admin"], "canRead": ["admin"],
                "canUpdate": ["admin"], "canDelete": ["admin"], "canViewAuditLog": ["admin"]
            },
            "audit": { "enabled": true }
        })
    }

    #[test]
    fn test_valid_schema() {
        let result = SchemaLinter::new().lint_value("incidents", &incidents());
        assert!(result.is_clean(), "{:?}", result.errors);
        assert!(!result.has_warnings(), "{:?}", result.warnings);
    }

    #[test]
    fn test_reports_every_violated_path() {
        let mut schema = incidents();
        schema["toolId"] = json!("Incidents!");
        schema["listView"]["columns"] = json!([]);
        schema["listView"]["pageSize"] = json!(500);
        schema["fields"][1]["key"] = json!("status");
        schema["formView"]["sections"][0]["fields"] = json!([]);

        let result = SchemaLinter::new().lint_value("incidents", &schema);
        let paths: Vec<_> = result.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "toolId",
                "fields[1].key",
                "listView.columns",
                "listView.pageSize",
                "formView.sections[0].fields",
            ]
        );
    }

    #[test]
    fn test_reserved_and_malformed_keys() {
        let mut schema = incidents();
        schema["fields"][0]["key"] = json!("createdAt");
        schema["fields"][1]["key"] = json!("1st");
        let result = SchemaLinter::new().lint_value("incidents", &schema);
        assert!(result.errors.iter().any(|e| e.code == "RESERVED_FIELD_KEY"));
        assert!(result.errors.iter().any(|e| e.code == "INVALID_FIELD_KEY"));
    }

    #[test]
    fn test_bad_pattern_is_an_error() {
        let mut schema = incidents();
        schema["fields"][1] = json!({ "key": "code", "label": "Code", "type": "text",
                                      "validation": { "pattern": "([" } });
        let result = SchemaLinter::new().lint_value("incidents", &schema);
        assert!(result.errors.iter().any(|e| e.path == "fields[1].validation.pattern"));
    }

    #[test]
    fn test_reference_problems_are_warnings() {
        let mut schema = incidents();
        schema["formView"]["sections"][0]["fields"] = json!(["status", "ghost"]);
        schema["audit"]["fields"] = json!(["nope"]);
        schema["actions"] = json!([{ "id": "zap", "label": "Zap", "type": "row",
                                     "handler": "launchMissiles", "permissions": ["admin"] }]);
        schema["fields"][0]["visibility"] = json!("record.status ==");

        let result = SchemaLinter::new().lint_value("incidents", &schema);
        assert!(result.is_clean());
        let codes: Vec<_> = result.warnings.iter().map(|w| w.code).collect();
        assert!(codes.contains(&"UNKNOWN_HANDLER"));
        assert!(codes.contains(&"INVALID_EXPRESSION"));
        assert_eq!(codes.iter().filter(|c| **c == "UNKNOWN_FIELD_REFERENCE").count(), 2);
    }

    #[test]
    fn test_undeserializable_input() {
        let result = SchemaLinter::new().lint_value("broken", &json!({ "toolId": 3 }));
        assert!(result.errors.iter().any(|e| e.code == "INVALID_SHAPE"));
    }
}
