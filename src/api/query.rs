//! Search / filter / pagination parsing for issue listings.
//!
//! Translates the flat query-string map into a typed constraint list,
//! independent of the store's query representation, then renders it as a
//! parameterized WHERE clause. Keys of the form `field[op]` become comparison
//! constraints; bare keys become equality constraints. Unknown fields and
//! operators are dropped rather than erroring, matching lenient query-string
//! semantics.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

/// Fixed page size for issue listings
pub const PAGE_SIZE: i64 = 4;

/// Keys that are not filter terms
const RESERVED_KEYS: [&str; 3] = ["keyword", "page", "limit"];

/// Comparison operator in a filter term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "eq" => Some(FilterOp::Eq),
            "ne" => Some(FilterOp::Ne),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }
}

/// A filter value after type coercion
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// One typed constraint: column, operator, coerced value
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: &'static str,
    pub op: FilterOp,
    pub value: FilterValue,
}

/// Parsed listing parameters
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    /// Case-insensitive substring matched against title, description, pincode
    pub keyword: Option<String>,
    /// Constraints combined with AND
    pub filters: Vec<Filter>,
    /// 1-based page number
    pub page: i64,
}

/// Map an API field name to its column. Unknown fields are rejected so raw
/// query keys never reach the SQL text.
fn column_for(field: &str) -> Option<&'static str> {
    match field {
        "title" => Some("title"),
        "description" => Some("description"),
        "location" => Some("location"),
        "pincode" => Some("pincode"),
        "category" => Some("category"),
        "status" => Some("status"),
        "severity" => Some("severity"),
        "createdAt" => Some("created_at"),
        _ => None,
    }
}

/// Date-valued fields get date coercion instead of numeric coercion
fn is_date_column(column: &str) -> bool {
    column == "created_at"
}

/// Coerce a raw date value; RFC 3339 or plain `YYYY-MM-DD`.
/// Returns None for unparsable input, which drops the term.
fn coerce_date(raw: &str) -> Option<FilterValue> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(FilterValue::Text(dt.with_timezone(&Utc).to_rfc3339()));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let dt = date.and_hms_opt(0, 0, 0)?.and_utc();
        return Some(FilterValue::Text(dt.to_rfc3339()));
    }
    None
}

/// Numbers become numeric binds, everything else stays text
fn coerce_value(raw: &str) -> FilterValue {
    if let Ok(i) = raw.parse::<i64>() {
        FilterValue::Int(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        FilterValue::Float(f)
    } else {
        FilterValue::Text(raw.to_string())
    }
}

/// Split `field[op]` into its parts; a bare key is an equality constraint
fn parse_key(key: &str) -> Option<(&str, FilterOp)> {
    match key.split_once('[') {
        Some((field, rest)) => {
            let op = rest.strip_suffix(']')?;
            Some((field, FilterOp::parse(op)?))
        }
        None => Some((key, FilterOp::Eq)),
    }
}

impl ListParams {
    /// Parse the raw query-parameter map. Key order is irrelevant; the
    /// resulting constraint list is sorted so the rendered SQL is
    /// deterministic.
    pub fn parse(raw: &HashMap<String, String>) -> Self {
        let keyword = raw
            .get("keyword")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let page = raw
            .get("page")
            .and_then(|p| p.parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);

        let mut filters = Vec::new();
        for (key, value) in raw {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some((field, op)) = parse_key(key) else {
                continue;
            };
            let Some(column) = column_for(field) else {
                tracing::debug!(field, "Dropping filter on unknown field");
                continue;
            };
            let value = if is_date_column(column) {
                match coerce_date(value) {
                    Some(v) => v,
                    None => continue,
                }
            } else {
                coerce_value(value)
            };
            filters.push(Filter { column, op, value });
        }
        filters.sort_by_key(|f| (f.column, f.op.as_sql()));

        Self {
            keyword,
            filters,
            page,
        }
    }

    /// Row offset for the selected page
    pub fn offset(&self) -> i64 {
        PAGE_SIZE * (self.page - 1)
    }

    /// Render the predicate as a WHERE clause plus its ordered bind values.
    /// The same clause drives both the page query and the total count.
    pub fn where_clause(&self) -> (String, Vec<FilterValue>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        if let Some(keyword) = &self.keyword {
            conditions.push("(title LIKE ? OR description LIKE ? OR pincode LIKE ?)".to_string());
            let pattern = format!("%{}%", keyword);
            binds.push(FilterValue::Text(pattern.clone()));
            binds.push(FilterValue::Text(pattern.clone()));
            binds.push(FilterValue::Text(pattern));
        }

        for filter in &self.filters {
            conditions.push(format!("{} {} ?", filter.column, filter.op.as_sql()));
            binds.push(filter.value.clone());
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (clause, binds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_keyword_and_range_filter_with_pagination() {
        let params = ListParams::parse(&raw(&[
            ("keyword", "pothole"),
            ("severity[gte]", "3"),
            ("page", "2"),
        ]));

        assert_eq!(params.keyword.as_deref(), Some("pothole"));
        assert_eq!(params.page, 2);
        assert_eq!(params.offset(), 4);
        assert_eq!(
            params.filters,
            vec![Filter {
                column: "severity",
                op: FilterOp::Gte,
                value: FilterValue::Int(3),
            }]
        );

        let (clause, binds) = params.where_clause();
        assert_eq!(
            clause,
            "WHERE (title LIKE ? OR description LIKE ? OR pincode LIKE ?) AND severity >= ?"
        );
        assert_eq!(binds.len(), 4);
        assert_eq!(binds[0], FilterValue::Text("%pothole%".to_string()));
        assert_eq!(binds[3], FilterValue::Int(3));
    }

    #[test]
    fn test_blank_keyword_is_ignored() {
        let params = ListParams::parse(&raw(&[("keyword", "   ")]));
        assert!(params.keyword.is_none());

        let (clause, binds) = params.where_clause();
        assert!(clause.is_empty());
        assert!(binds.is_empty());
    }

    #[test]
    fn test_bare_key_is_equality() {
        let params = ListParams::parse(&raw(&[("status", "Pending")]));
        assert_eq!(
            params.filters,
            vec![Filter {
                column: "status",
                op: FilterOp::Eq,
                value: FilterValue::Text("Pending".to_string()),
            }]
        );
    }

    #[test]
    fn test_multiple_operators_on_same_field() {
        let params = ListParams::parse(&raw(&[
            ("severity[gte]", "2"),
            ("severity[lte]", "4"),
        ]));
        assert_eq!(params.filters.len(), 2);

        let (clause, _) = params.where_clause();
        assert!(clause.contains("severity >= ?"));
        assert!(clause.contains("severity <= ?"));
        assert!(clause.contains(" AND "));
    }

    #[test]
    fn test_unknown_field_and_operator_are_dropped() {
        let params = ListParams::parse(&raw(&[
            ("dropTables", "1"),
            ("severity[regex]", "3"),
        ]));
        assert!(params.filters.is_empty());
    }

    #[test]
    fn test_reserved_keys_are_not_filters() {
        let params = ListParams::parse(&raw(&[
            ("page", "3"),
            ("limit", "100"),
            ("keyword", "leak"),
        ]));
        assert!(params.filters.is_empty());
        assert_eq!(params.page, 3);
    }

    #[test]
    fn test_date_coercion() {
        let params = ListParams::parse(&raw(&[("createdAt[gte]", "2026-08-01")]));
        assert_eq!(params.filters.len(), 1);
        let filter = &params.filters[0];
        assert_eq!(filter.column, "created_at");
        match &filter.value {
            FilterValue::Text(v) => assert!(v.starts_with("2026-08-01T00:00:00")),
            other => panic!("expected text date, got {:?}", other),
        }
    }

    #[test]
    fn test_unparsable_date_drops_term() {
        let params = ListParams::parse(&raw(&[("createdAt[gte]", "yesterday")]));
        assert!(params.filters.is_empty());
    }

    #[test]
    fn test_numeric_coercion_falls_back_to_text() {
        let params = ListParams::parse(&raw(&[
            ("severity", "3"),
            ("pincode", "3.5"),
            ("category", "Road"),
        ]));
        let by_column: HashMap<_, _> = params
            .filters
            .iter()
            .map(|f| (f.column, f.value.clone()))
            .collect();
        assert_eq!(by_column["severity"], FilterValue::Int(3));
        assert_eq!(by_column["pincode"], FilterValue::Float(3.5));
        assert_eq!(by_column["category"], FilterValue::Text("Road".to_string()));
    }

    #[test]
    fn test_invalid_page_defaults_to_first() {
        for bad in ["0", "-2", "abc", ""] {
            let params = ListParams::parse(&raw(&[("page", bad)]));
            assert_eq!(params.page, 1, "page {:?}", bad);
            assert_eq!(params.offset(), 0);
        }
    }

    #[test]
    fn test_clause_is_deterministic_across_key_order() {
        let a = ListParams::parse(&raw(&[
            ("severity[gte]", "2"),
            ("status", "Pending"),
            ("category", "Road"),
        ]));
        let b = ListParams::parse(&raw(&[
            ("category", "Road"),
            ("status", "Pending"),
            ("severity[gte]", "2"),
        ]));
        assert_eq!(a.where_clause(), b.where_clause());
    }
}
