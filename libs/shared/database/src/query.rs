// libs/shared/database/src/query.rs
//
// Filters and aggregation stages evaluated over JSON documents.
//

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    Gte(String, Value),
    Lte(String, Value),
    Regex(String, Regex),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(field.into(), value.into())
    }

    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(field.into(), values)
    }

    /// Case-insensitive substring match. The needle is escaped, so user input
    /// is never interpreted as a pattern. `None` only if the escaped needle
    /// exceeds the regex size limit.
    pub fn contains_ignore_case(field: impl Into<String>, needle: &str) -> Option<Self> {
        RegexBuilder::new(&regex::escape(needle))
            .case_insensitive(true)
            .build()
            .ok()
            .map(|regex| Filter::Regex(field.into(), regex))
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Filter::Eq(field, expected) => lookup_path(document, field)
                .map(|actual| values_equal(actual, expected))
                .unwrap_or(expected.is_null()),
            Filter::Ne(field, expected) => !Filter::Eq(field.clone(), expected.clone()).matches(document),
            Filter::In(field, candidates) => lookup_path(document, field)
                .map(|actual| candidates.iter().any(|c| values_equal(actual, c)))
                .unwrap_or(false),
            Filter::Gte(field, bound) => lookup_path(document, field)
                .and_then(|actual| compare_values(actual, bound))
                .map(|ord| ord != Ordering::Less)
                .unwrap_or(false),
            Filter::Lte(field, bound) => lookup_path(document, field)
                .and_then(|actual| compare_values(actual, bound))
                .map(|ord| ord != Ordering::Greater)
                .unwrap_or(false),
            Filter::Regex(field, regex) => lookup_path(document, field)
                .and_then(Value::as_str)
                .map(|s| regex.is_match(s))
                .unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(document)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Filter),
    /// Joins at most one document from `from` whose `foreign_field` equals the
    /// local value, stored under `as_field` (null when nothing matches).
    LookupOne {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    Sort(Vec<(String, SortOrder)>),
    Skip(u64),
    Limit(u64),
    Count(String),
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn push(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn match_filter(self, filter: Filter) -> Self {
        self.push(Stage::Match(filter))
    }

    pub fn lookup_one(self, from: &str, local_field: &str, foreign_field: &str, as_field: &str) -> Self {
        self.push(Stage::LookupOne {
            from: from.to_string(),
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            as_field: as_field.to_string(),
        })
    }

    pub fn sort(self, keys: Vec<(String, SortOrder)>) -> Self {
        self.push(Stage::Sort(keys))
    }

    pub fn skip(self, count: u64) -> Self {
        self.push(Stage::Skip(count))
    }

    pub fn limit(self, count: u64) -> Self {
        self.push(Stage::Limit(count))
    }

    pub fn count(self, field: &str) -> Self {
        self.push(Stage::Count(field.to_string()))
    }
}

/// Runs `pipeline` over `documents`. `collection` resolves the source of a
/// lookup stage.
pub(crate) fn run_pipeline<'a, F>(
    mut documents: Vec<Value>,
    pipeline: &Pipeline,
    collection: F,
) -> Vec<Value>
where
    F: Fn(&str) -> Vec<&'a Value>,
{
    for stage in pipeline.stages() {
        documents = match stage {
            Stage::Match(filter) => documents.into_iter().filter(|d| filter.matches(d)).collect(),
            Stage::LookupOne { from, local_field, foreign_field, as_field } => {
                let mut index: HashMap<String, &Value> = HashMap::new();
                for foreign in collection(from) {
                    if let Some(key) = lookup_path(foreign, foreign_field).and_then(join_key) {
                        index.entry(key).or_insert(foreign);
                    }
                }

                documents
                    .into_iter()
                    .map(|mut doc| {
                        let joined = lookup_path(&doc, local_field)
                            .and_then(join_key)
                            .and_then(|key| index.get(&key))
                            .map(|found| (*found).clone())
                            .unwrap_or(Value::Null);
                        if let Value::Object(map) = &mut doc {
                            map.insert(as_field.clone(), joined);
                        }
                        doc
                    })
                    .collect()
            }
            Stage::Sort(keys) => {
                documents.sort_by(|a, b| {
                    for (field, order) in keys {
                        let left = lookup_path(a, field).unwrap_or(&Value::Null);
                        let right = lookup_path(b, field).unwrap_or(&Value::Null);
                        let ord = sort_ordering(left, right);
                        let ord = match order {
                            SortOrder::Ascending => ord,
                            SortOrder::Descending => ord.reverse(),
                        };
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    Ordering::Equal
                });
                documents
            }
            Stage::Skip(count) => documents.into_iter().skip(*count as usize).collect(),
            Stage::Limit(count) => documents.into_iter().take(*count as usize).collect(),
            Stage::Count(field) => {
                if documents.is_empty() {
                    Vec::new()
                } else {
                    let mut map = Map::new();
                    map.insert(field.clone(), Value::from(documents.len() as u64));
                    vec![Value::Object(map)]
                }
            }
        };
    }

    documents
}

/// Resolves a dotted path such as `patientUser.firstName`.
pub fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |current, segment| current.get(segment))
}

fn join_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// Nulls and missing fields sort before any value, then by type rank.
fn sort_ordering(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
        }
    }

    compare_values(left, right).unwrap_or_else(|| rank(left).cmp(&rank(right)))
}
