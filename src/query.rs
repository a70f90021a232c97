//! Record queries
//!
//! Translates a caller-facing [`RecordQuery`] into a store-level [`StoreQuery`]:
//! filters become [`Predicate`]s, free-text search becomes an OR over the
//! schema's searchable fields, and sort/pagination fall back to schema and
//! engine defaults.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::deep_equal;
use crate::error::{Result, ValidationErrors, ValidationIssue};
use crate::record::{DataRecord, CREATED_AT_KEY};
use crate::schema::{FilterOperator, SortDirection, SortSpec, ToolSchema};

/// One caller-supplied filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterQuery {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl FilterQuery {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Filtered, sorted, paginated listing request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_filter(mut self, filter: FilterQuery) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(SortSpec::new(field, direction));
        self
    }

    pub fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl Pagination {
    /// `total_pages` is computed over the filtered, pre-pagination set
    pub fn new(page: u32, page_size: u32, total: u64) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total.div_ceil(u64::from(page_size))
        };
        Self {
            page,
            page_size,
            total,
            total_pages,
        }
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

/// Page size bounds applied to every query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl PageLimits {
    /// Resolve and bound-check page/page size, collecting every violation
    pub fn resolve(
        &self,
        page: Option<u32>,
        page_size: Option<u32>,
        schema_default: Option<u32>,
    ) -> Result<(u32, u32)> {
        let mut errors = ValidationErrors::new();
        let page = page.unwrap_or(1);
        let page_size = page_size
            .or(schema_default)
            .unwrap_or(self.default_page_size);

        if page < 1 {
            errors.push("page", "must be at least 1");
        }
        if page_size < 1 || page_size > self.max_page_size {
            errors.push(
                "pageSize",
                format!("must be between 1 and {}", self.max_page_size),
            );
        }
        errors.into_result()?;
        Ok((page, page_size))
    }
}

/// A store-level predicate over one field
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals { field: String, value: Value },
    /// Case-insensitive literal substring; `needle` is stored lowercased
    Contains { field: String, needle: String },
    In { field: String, values: Vec<Value> },
    Gte { field: String, value: Value },
    Lte { field: String, value: Value },
    /// Inclusive on both ends
    Between { field: String, low: Value, high: Value },
}

impl Predicate {
    pub fn contains(field: impl Into<String>, needle: &str) -> Self {
        Predicate::Contains {
            field: field.into(),
            needle: needle.to_lowercase(),
        }
    }

    /// Translate one filter, rejecting values the operator cannot use
    pub fn from_filter(filter: &FilterQuery) -> std::result::Result<Self, String> {
        let field = filter.field.clone();
        match filter.operator {
            FilterOperator::Equals => Ok(Predicate::Equals {
                field,
                value: filter.value.clone(),
            }),
            FilterOperator::Contains => match &filter.value {
                Value::String(s) => Ok(Predicate::contains(field, s)),
                Value::Number(n) => Ok(Predicate::contains(field, &n.to_string())),
                _ => Err("contains expects a string value".to_string()),
            },
            FilterOperator::In => match &filter.value {
                Value::Array(values) => Ok(Predicate::In {
                    field,
                    values: values.clone(),
                }),
                _ => Err("in expects an array value".to_string()),
            },
            FilterOperator::Gte => Ok(Predicate::Gte {
                field,
                value: filter.value.clone(),
            }),
            FilterOperator::Lte => Ok(Predicate::Lte {
                field,
                value: filter.value.clone(),
            }),
            FilterOperator::Between => match &filter.value {
                Value::Array(bounds) if bounds.len() == 2 => Ok(Predicate::Between {
                    field,
                    low: bounds[0].clone(),
                    high: bounds[1].clone(),
                }),
                _ => Err("between expects a two-element array".to_string()),
            },
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Predicate::Equals { field, .. }
            | Predicate::Contains { field, .. }
            | Predicate::In { field, .. }
            | Predicate::Gte { field, .. }
            | Predicate::Lte { field, .. }
            | Predicate::Between { field, .. } => field,
        }
    }

    /// Evaluate against a record's value for this predicate's field.
    /// Array-valued fields match when any element matches.
    pub fn matches(&self, candidate: Option<&Value>) -> bool {
        if let (Some(Value::Array(items)), false) = (candidate, self.targets_whole_array()) {
            if items.iter().any(|item| self.matches_scalar(Some(item))) {
                return true;
            }
        }
        self.matches_scalar(candidate)
    }

    fn targets_whole_array(&self) -> bool {
        matches!(self, Predicate::Equals { value: Value::Array(_), .. })
    }

    fn matches_scalar(&self, candidate: Option<&Value>) -> bool {
        match self {
            Predicate::Equals { value, .. } => deep_equal(candidate, Some(value)),
            Predicate::Contains { needle, .. } => match candidate {
                Some(Value::String(s)) => s.to_lowercase().contains(needle.as_str()),
                Some(Value::Number(n)) => n.to_string().contains(needle.as_str()),
                _ => false,
            },
            Predicate::In { values, .. } => values.iter().any(|v| deep_equal(candidate, Some(v))),
            Predicate::Gte { value, .. } => matches!(
                partial_compare(candidate, Some(value)),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Lte { value, .. } => matches!(
                partial_compare(candidate, Some(value)),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Predicate::Between { low, high, .. } => {
                matches!(
                    partial_compare(candidate, Some(low)),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    partial_compare(candidate, Some(high)),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
        }
    }
}

/// Order two values of the same comparable kind: numbers numerically,
/// strings lexicographically. Anything else is unordered.
pub fn partial_compare(a: Option<&Value>, b: Option<&Value>) -> Option<Ordering> {
    match (a?, b?) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn sort_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order used for sorting: missing/null first, then booleans,
/// numbers, strings, arrays, objects.
pub fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (sort_rank(a), sort_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => partial_compare(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Stable sort of records by one field
pub fn sort_records(records: &mut [DataRecord], sort: &SortSpec) {
    records.sort_by(|a, b| {
        let left = a.get(&sort.field);
        let right = b.get(&sort.field);
        let ord = compare_for_sort(left.as_deref(), right.as_deref());
        match sort.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

/// Query as handed to a [`crate::store::RecordStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQuery {
    /// Every predicate must hold
    pub all_of: Vec<Predicate>,
    /// At least one must hold when non-empty
    pub any_of: Vec<Predicate>,
    pub sort: SortSpec,
    pub skip: usize,
    pub limit: usize,
}

impl StoreQuery {
    pub fn matches(&self, record: &DataRecord) -> bool {
        let all = self
            .all_of
            .iter()
            .all(|p| p.matches(record.get(p.field()).as_deref()));
        let any = self.any_of.is_empty()
            || self
                .any_of
                .iter()
                .any(|p| p.matches(record.get(p.field()).as_deref()));
        all && any
    }
}

/// Result of [`translate`]: the store query plus the resolved page window
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub store_query: StoreQuery,
    pub page: u32,
    pub page_size: u32,
}

/// Translate a caller query against a schema into a store query
pub fn translate(schema: &ToolSchema, query: &RecordQuery, limits: &PageLimits) -> Result<QueryPlan> {
    let mut errors = ValidationErrors::new();

    let (page, page_size) = match limits.resolve(query.page, query.page_size, schema.list_view.page_size) {
        Ok(window) => window,
        Err(err) => {
            if let Some(issues) = err.validation_issues() {
                errors.issues.extend(issues.issues.iter().cloned());
            }
            (1, limits.default_page_size)
        }
    };

    let mut all_of = Vec::with_capacity(query.filters.len());
    for (i, filter) in query.filters.iter().enumerate() {
        match Predicate::from_filter(filter) {
            Ok(predicate) => all_of.push(predicate),
            Err(message) => errors
                .issues
                .push(ValidationIssue::new(format!("filters[{}].value", i), message)),
        }
    }
    errors.into_result()?;

    let any_of = match query.search.as_deref().map(str::trim) {
        Some(term) if !term.is_empty() => schema
            .list_view
            .searchable_fields
            .iter()
            .flatten()
            .map(|field| Predicate::contains(field.clone(), term))
            .collect(),
        _ => Vec::new(),
    };

    let sort = query
        .sort
        .clone()
        .or_else(|| schema.list_view.default_sort.clone())
        .unwrap_or_else(|| SortSpec::new(CREATED_AT_KEY, SortDirection::Desc));

    let skip = (page as usize - 1) * page_size as usize;

    Ok(QueryPlan {
        store_query: StoreQuery {
            all_of,
            any_of,
            sort,
            skip,
            limit: page_size as usize,
        },
        page,
        page_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_total_pages_rounds_up() {
        let p = Pagination::new(3, 20, 57);
        assert_eq!(p.total_pages, 3);
        assert_eq!(Pagination::new(1, 20, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 20, 40).total_pages, 2);
    }

    #[test]
    fn test_contains_is_case_insensitive_literal() {
        let p = Predicate::contains("title", "DISK.");
        assert!(p.matches(Some(&json!("Full disk. Again"))));
        assert!(!p.matches(Some(&json!("Full diskX"))));
        assert!(!p.matches(None));
    }

    #[test]
    fn test_between_is_inclusive() {
        let p = Predicate::from_filter(&FilterQuery::new(
            "priority",
            FilterOperator::Between,
            json!([2, 4]),
        ))
        .unwrap();
        assert!(p.matches(Some(&json!(2))));
        assert!(p.matches(Some(&json!(4.0))));
        assert!(!p.matches(Some(&json!(5))));
        assert!(!p.matches(Some(&json!("3"))));
    }

    #[test]
    fn test_in_requires_array() {
        let err = Predicate::from_filter(&FilterQuery::new("status", FilterOperator::In, json!("open")));
        assert!(err.is_err());

        let p = Predicate::from_filter(&FilterQuery::new(
            "status",
            FilterOperator::In,
            json!(["open", "pending"]),
        ))
        .unwrap();
        assert!(p.matches(Some(&json!("pending"))));
        assert!(!p.matches(Some(&json!("closed"))));
    }

    #[test]
    fn test_equals_matches_array_elements() {
        let p = Predicate::Equals {
            field: "tags".into(),
            value: json!("urgent"),
        };
        assert!(p.matches(Some(&json!(["minor", "urgent"]))));

        let whole = Predicate::Equals {
            field: "tags".into(),
            value: json!(["minor", "urgent"]),
        };
        assert!(whole.matches(Some(&json!(["minor", "urgent"]))));
        assert!(!whole.matches(Some(&json!(["urgent", "minor"]))));
    }

    #[test]
    fn test_date_strings_compare_lexicographically() {
        let p = Predicate::Gte {
            field: "due".into(),
            value: json!("2024-03-01"),
        };
        assert!(p.matches(Some(&json!("2024-03-15"))));
        assert!(!p.matches(Some(&json!("2024-02-28"))));
    }

    #[test]
    fn test_page_limits_reject_out_of_range() {
        let limits = PageLimits::default();
        assert_eq!(limits.resolve(None, None, None).unwrap(), (1, 20));
        assert_eq!(limits.resolve(None, None, Some(50)).unwrap(), (1, 50));

        let err = limits.resolve(Some(0), Some(101), None).unwrap_err();
        let issues = err.validation_issues().unwrap();
        assert!(issues.mentions("page"));
        assert!(issues.mentions("pageSize"));
    }

    #[test]
    fn test_sort_puts_missing_first_ascending() {
        let a = json!(1);
        assert_eq!(compare_for_sort(None, Some(&a)), Ordering::Less);
        assert_eq!(compare_for_sort(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(compare_for_sort(Some(&json!(10)), Some(&json!(9.5))), Ordering::Greater);
    }
}
