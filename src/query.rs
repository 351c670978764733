// The query engine (C1): pure functions over in-memory documents. Every provider
// that materialises documents before filtering (memory, file) runs its `query`
// through this module so that filter/sort/paginate semantics are identical across
// back-ends; the relational provider instead translates the same `QueryOptions`
// into SQL (see `providers::relational`) but must produce indistinguishable
// results under the contract.

use crate::contracts::{Document, FilterCondition, Operator, QueryOptions, SortDirection};
use serde_json::Value;
use std::cmp::Ordering;

/// Compare two JSON values by their natural ordering. Values of different
/// "orderable" kinds (e.g. number vs string) are incomparable and treated as
/// unordered; ordered comparisons against an incomparable pair are false.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

/// Render a value as a string for regex matching: strings pass through as-is,
/// other scalars use their JSON text representation.
fn as_match_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches_condition(field_value: Option<&Value>, condition: &FilterCondition) -> bool {
    match condition.operator {
        Operator::Eq => match field_value {
            Some(v) => values_equal(v, &condition.value),
            None => false,
        },
        Operator::Ne => match field_value {
            Some(v) => !values_equal(v, &condition.value),
            None => true,
        },
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let Some(field_value) = field_value else {
                return false;
            };
            let Some(ordering) = compare_values(field_value, &condition.value) else {
                return false;
            };
            match condition.operator {
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Gte => ordering != Ordering::Less,
                Operator::Lt => ordering == Ordering::Less,
                Operator::Lte => ordering != Ordering::Greater,
                _ => unreachable!(),
            }
        }
        Operator::In => {
            let Some(field_value) = field_value else {
                return false;
            };
            condition
                .value
                .as_array()
                .map(|seq| seq.iter().any(|v| values_equal(v, field_value)))
                .unwrap_or(false)
        }
        Operator::Nin => {
            let Some(field_value) = field_value else {
                return false;
            };
            condition
                .value
                .as_array()
                .map(|seq| !seq.iter().any(|v| values_equal(v, field_value)))
                .unwrap_or(true)
        }
        Operator::Regex => {
            let Some(field_value) = field_value else {
                return false;
            };
            let Some(pattern) = condition.value.as_str() else {
                return false;
            };
            match regex::RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
            {
                Ok(re) => re.is_match(&as_match_string(field_value)),
                Err(_) => as_match_string(field_value) == pattern,
            }
        }
    }
}

/// A document passes iff every filter entry passes (logical AND).
pub fn apply_filters(items: Vec<Document>, options: &QueryOptions) -> Vec<Document> {
    if options.filters.is_empty() {
        return items;
    }

    items
        .into_iter()
        .filter(|doc| {
            options
                .filters
                .iter()
                .all(|(field, condition)| matches_condition(doc.get(field), condition))
        })
        .collect()
}

/// Stable sort on the `sortBy` list; ties are broken by earlier sort entries,
/// then by preserved insertion order (guaranteed by using a stable sort).
pub fn apply_sorting(mut items: Vec<Document>, options: &QueryOptions) -> Vec<Document> {
    if options.sort_by.is_empty() {
        return items;
    }

    items.sort_by(|a, b| {
        for entry in &options.sort_by {
            let av = a.get(&entry.field);
            let bv = b.get(&entry.field);
            let ordering = match (av, bv) {
                (Some(av), Some(bv)) => compare_values(av, bv).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let ordering = match entry.order {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    items
}

/// Drop the first `offset` (default 0), then keep at most `limit` (absent =
/// unbounded). `offset >= len` yields empty; `limit == Some(0)` yields empty.
pub fn apply_pagination(items: Vec<Document>, options: &QueryOptions) -> Vec<Document> {
    let offset = options.offset.unwrap_or(0);
    let skipped: Vec<Document> = items.into_iter().skip(offset).collect();
    match options.limit {
        Some(limit) => skipped.into_iter().take(limit).collect(),
        None => skipped,
    }
}

/// Run the full filter -> sort -> paginate pipeline, as every provider that
/// materialises documents before returning them should.
pub fn run_query(items: Vec<Document>, options: &QueryOptions) -> Vec<Document> {
    let filtered = apply_filters(items, options);
    let sorted = apply_sorting(filtered, options);
    apply_pagination(sorted, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn filter_gt_operator() {
        let items = vec![
            doc(json!({"id": "a", "value": 100})),
            doc(json!({"id": "b", "value": 200})),
            doc(json!({"id": "c", "value": 300})),
        ];
        let opts = QueryOptions::new().with_filter(
            "value",
            FilterCondition {
                operator: Operator::Gt,
                value: json!(150),
            },
        );
        let result = apply_filters(items, &opts);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn sort_then_paginate() {
        let items = vec![
            doc(json!({"id": "a", "value": 100})),
            doc(json!({"id": "b", "value": 200})),
            doc(json!({"id": "c", "value": 300})),
            doc(json!({"id": "d", "value": 400})),
            doc(json!({"id": "e", "value": 500})),
        ];
        let opts = QueryOptions::new()
            .with_sort("value", SortDirection::Asc)
            .with_offset(1)
            .with_limit(2);
        let result = run_query(items, &opts);
        let values: Vec<i64> = result
            .iter()
            .map(|d| d.get("value").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![200, 300]);
    }

    #[test]
    fn in_with_empty_list_yields_no_results() {
        let items = vec![doc(json!({"id": "a", "value": 1}))];
        let opts = QueryOptions::new().with_filter(
            "value",
            FilterCondition {
                operator: Operator::In,
                value: json!([]),
            },
        );
        assert!(apply_filters(items, &opts).is_empty());
    }

    #[test]
    fn nin_with_empty_list_yields_all_results() {
        let items = vec![doc(json!({"id": "a", "value": 1}))];
        let opts = QueryOptions::new().with_filter(
            "value",
            FilterCondition {
                operator: Operator::Nin,
                value: json!([]),
            },
        );
        assert_eq!(apply_filters(items, &opts).len(), 1);
    }

    #[test]
    fn eq_against_missing_field_never_matches_even_with_null_value() {
        let items = vec![doc(json!({"id": "a"}))];
        let opts = QueryOptions::new().with_filter("missing", FilterCondition::eq(json!(null)));
        assert!(apply_filters(items, &opts).is_empty());
    }

    #[test]
    fn ne_against_missing_field_always_matches_even_with_null_value() {
        let items = vec![doc(json!({"id": "a"}))];
        let opts = QueryOptions::new().with_filter(
            "missing",
            FilterCondition {
                operator: Operator::Ne,
                value: json!(null),
            },
        );
        assert_eq!(apply_filters(items, &opts).len(), 1);
    }

    #[test]
    fn sort_is_stable() {
        let items = vec![
            doc(json!({"id": "a", "group": 1})),
            doc(json!({"id": "b", "group": 1})),
            doc(json!({"id": "c", "group": 1})),
        ];
        let opts =
            QueryOptions::new().with_sort("group", SortDirection::Asc);
        let result = apply_sorting(items, &opts);
        let ids: Vec<&str> = result.iter().map(|d| d.id().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn pagination_offset_beyond_len_is_empty() {
        let items = vec![doc(json!({"id": "a"}))];
        let opts = QueryOptions::new().with_offset(5);
        assert!(apply_pagination(items, &opts).is_empty());
    }

    #[test]
    fn pagination_limit_zero_is_empty() {
        let items = vec![doc(json!({"id": "a"}))];
        let opts = QueryOptions::new().with_limit(0);
        assert!(apply_pagination(items, &opts).is_empty());
    }
}
