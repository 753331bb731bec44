//! Document query layer: filter, projection and sort expressions.
//!
//! These are the store's native query types. The tree and experiment layers
//! forward them verbatim and never inspect them.
//!
//! Documents have the shape
//! `{"id", "path", "kind", "created_at", "data": {..}, "notes": {..}}`;
//! fields are addressed with dotted paths such as `data.metrics.acc`.
//!
//! ```rust
//! use serde_json::json;
//! use trueno_labdb::store::{Filter, FindOptions, Sort, SortOrder};
//!
//! let filter = Filter::from_value(json!({"data.score": {"$gte": 10}})).unwrap();
//! assert!(filter.matches(&json!({"data": {"score": 12}})));
//! assert!(!filter.matches(&json!({"data": {"score": 3}})));
//!
//! let options = FindOptions::new()
//!     .filter(filter)
//!     .sort(Sort::by("data.score", SortOrder::Descending))
//!     .limit(5);
//! assert_eq!(options.limit_value(), Some(5));
//! ```

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::node::Node;
use crate::{Error, Result};

const OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists",
];

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest first
    #[default]
    Ascending,
    /// Largest first
    Descending,
}

/// Predicate over node documents. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Map<String, Value>);

impl Filter {
    /// Match-all filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `value` is not an object or uses an
    /// unknown `$` operator.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                validate_clause(&map)?;
                Ok(Self(map))
            }
            other => Err(Error::InvalidInput(format!(
                "filter must be a JSON object, got {other}"
            ))),
        }
    }

    /// Add an equality condition on `field`.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    /// Conjunction of two filters.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let mut map = Map::new();
        map.insert(
            "$and".into(),
            Value::Array(vec![Value::Object(self.0), Value::Object(other.0)]),
        );
        Self(map)
    }

    /// True if the filter has no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Evaluate against a document.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        clause_matches(&self.0, doc)
    }
}

fn validate_clause(map: &Map<String, Value>) -> Result<()> {
    for (key, cond) in map {
        match key.as_str() {
            "$and" | "$or" => {
                let Value::Array(items) = cond else {
                    return Err(Error::InvalidInput(format!("{key} expects an array of filters")));
                };
                for item in items {
                    let Value::Object(sub) = item else {
                        return Err(Error::InvalidInput(format!("{key} items must be objects")));
                    };
                    validate_clause(sub)?;
                }
            }
            k if k.starts_with('$') => {
                return Err(Error::InvalidInput(format!("unknown top-level operator {k}")));
            }
            _ => {
                if let Value::Object(ops) = cond {
                    for op in ops.keys().filter(|op| op.starts_with('$')) {
                        if !OPERATORS.contains(&op.as_str()) {
                            return Err(Error::InvalidInput(format!(
                                "unknown operator {op} on field {key}"
                            )));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn clause_matches(map: &Map<String, Value>, doc: &Value) -> bool {
    map.iter().all(|(key, cond)| match key.as_str() {
        "$and" => sub_filters(cond).all(|sub| clause_matches(sub, doc)),
        "$or" => sub_filters(cond).any(|sub| clause_matches(sub, doc)),
        field => condition_matches(lookup(doc, field), cond),
    })
}

fn sub_filters(cond: &Value) -> impl Iterator<Item = &Map<String, Value>> {
    cond.as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn is_operator_object(cond: &Value) -> bool {
    cond.as_object()
        .is_some_and(|m| !m.is_empty() && m.keys().all(|k| k.starts_with('$')))
}

fn condition_matches(field: Option<&Value>, cond: &Value) -> bool {
    if !is_operator_object(cond) {
        return equals_or_contains(field, cond);
    }
    let Some(ops) = cond.as_object() else {
        return false;
    };
    ops.iter().all(|(op, arg)| match op.as_str() {
        "$eq" => equals_or_contains(field, arg),
        "$ne" => !equals_or_contains(field, arg),
        "$gt" => ordered(field, arg, |o| o == Ordering::Greater),
        "$gte" => ordered(field, arg, |o| o != Ordering::Less),
        "$lt" => ordered(field, arg, |o| o == Ordering::Less),
        "$lte" => ordered(field, arg, |o| o != Ordering::Greater),
        "$in" => arg
            .as_array()
            .is_some_and(|items| items.iter().any(|v| equals_or_contains(field, v))),
        "$nin" => arg
            .as_array()
            .is_some_and(|items| !items.iter().any(|v| equals_or_contains(field, v))),
        "$exists" => arg.as_bool().unwrap_or(true) == field.is_some(),
        _ => false,
    })
}

fn equals_or_contains(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(actual) if json_eq(actual, expected) => true,
        Some(Value::Array(items)) => items.iter().any(|item| json_eq(item, expected)),
        Some(_) => false,
    }
}

fn ordered(field: Option<&Value>, arg: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(actual) = field else {
        return false;
    };
    if type_rank(Some(actual)) != type_rank(Some(arg)) {
        return false;
    }
    accept(compare_values(Some(actual), Some(arg)))
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Resolve a dotted field path inside a document.
#[must_use]
pub fn lookup<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    field.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order over JSON values: null < number < string < object < array < bool.
#[must_use]
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => x
            .iter()
            .zip(y)
            .map(|(l, r)| compare_values(Some(l), Some(r)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => Ordering::Equal,
    }
}

/// Ordered list of sort keys. Ties fall back to path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort(Vec<(String, SortOrder)>);

impl Sort {
    /// Sort by a single field.
    #[must_use]
    pub fn by(field: impl Into<String>, order: SortOrder) -> Self {
        Self(vec![(field.into(), order)])
    }

    /// Append a secondary key.
    #[must_use]
    pub fn then(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.0.push((field.into(), order));
        self
    }

    /// Sort keys in priority order.
    #[must_use]
    pub fn keys(&self) -> &[(String, SortOrder)] {
        &self.0
    }

    /// True if no keys are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare two documents under this sort.
    #[must_use]
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (field, order) in &self.0 {
            let ord = compare_values(lookup(a, field), lookup(b, field));
            let ord = match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Fields to keep inside `data` / `notes`. Empty keeps everything.
///
/// Identity fields (`id`, `path`, `kind`, `created_at`) are always returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection(Vec<String>);

impl Projection {
    /// Keep only the listed dotted fields, e.g. `["data.loss", "notes"]`.
    #[must_use]
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    /// True if the projection keeps everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Prune a node's data and notes maps.
    pub fn apply(&self, node: &mut Node) {
        if self.is_empty() {
            return;
        }
        let data = self.paths_under("data");
        let notes = self.paths_under("notes");
        let pruned = prune(node.data(), data.as_deref());
        *node.data_mut() = pruned;
        let pruned = prune(node.notes(), notes.as_deref());
        *node.notes_mut() = pruned;
    }

    /// `None` = keep whole map, `Some(paths)` = keep those nested paths.
    fn paths_under(&self, root: &str) -> Option<Vec<&str>> {
        let mut paths = Vec::new();
        for field in &self.0 {
            if field == root {
                return None;
            }
            if let Some(rest) = field.strip_prefix(root).and_then(|r| r.strip_prefix('.')) {
                paths.push(rest);
            }
        }
        Some(paths)
    }
}

fn prune(map: &Map<String, Value>, paths: Option<&[&str]>) -> Map<String, Value> {
    let Some(paths) = paths else {
        return map.clone();
    };
    let mut out = Map::new();
    for (key, value) in map {
        let mut nested = Vec::new();
        let mut whole = false;
        for path in paths {
            match path.split_once('.') {
                None if path == key => whole = true,
                Some((head, rest)) if head == key => nested.push(rest),
                _ => {}
            }
        }
        if whole {
            out.insert(key.clone(), value.clone());
        } else if !nested.is_empty() {
            if let Value::Object(inner) = value {
                out.insert(key.clone(), Value::Object(prune(inner, Some(nested.as_slice()))));
            }
        }
    }
    out
}

/// Options for [`NodeStore::find_children`](super::NodeStore::find_children).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    filter: Filter,
    projection: Projection,
    sort: Sort,
    limit: Option<usize>,
}

impl FindOptions {
    /// No filter, projection, sort or limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the projection.
    #[must_use]
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Set the sort.
    #[must_use]
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    /// Set the maximum number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Conjoin an additional filter with the current one.
    #[must_use]
    pub fn and_filter(mut self, extra: Filter) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(extra);
        self
    }

    /// Current filter.
    #[must_use]
    pub const fn filter_ref(&self) -> &Filter {
        &self.filter
    }

    /// Current projection.
    #[must_use]
    pub const fn projection_ref(&self) -> &Projection {
        &self.projection
    }

    /// Current sort.
    #[must_use]
    pub const fn sort_ref(&self) -> &Sort {
        &self.sort
    }

    /// Current limit.
    #[must_use]
    pub const fn limit_value(&self) -> Option<usize> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NewNode, NodeId};
    use serde_json::json;

    #[test]
    fn test_equality_and_dotted_lookup() {
        let doc = json!({"data": {"algorithm": "A", "score": 10}});
        assert!(Filter::new().eq("data.algorithm", json!("A")).matches(&doc));
        assert!(!Filter::new().eq("data.algorithm", json!("B")).matches(&doc));
        assert!(Filter::new().eq("data.score", json!(10.0)).matches(&doc));
    }

    #[test]
    fn test_operators() {
        let doc = json!({"data": {"score": 15, "tags": ["x", "y"]}});
        let f = |v| Filter::from_value(v).unwrap();
        assert!(f(json!({"data.score": {"$gt": 10, "$lte": 15}})).matches(&doc));
        assert!(!f(json!({"data.score": {"$lt": 15}})).matches(&doc));
        assert!(f(json!({"data.score": {"$in": [1, 15]}})).matches(&doc));
        assert!(f(json!({"data.score": {"$nin": [1, 2]}})).matches(&doc));
        assert!(f(json!({"data.tags": "y"})).matches(&doc));
        assert!(f(json!({"data.missing": {"$exists": false}})).matches(&doc));
        assert!(f(json!({"data.score": {"$ne": 3}})).matches(&doc));
        assert!(!f(json!({"data.score": {"$gt": "a"}})).matches(&doc));
    }

    #[test]
    fn test_and_or() {
        let doc = json!({"notes": {"category": "A"}, "kind": "experiment"});
        let f = Filter::from_value(json!({
            "$or": [{"notes.category": "B"}, {"notes.category": "A"}]
        }))
        .unwrap();
        assert!(f.matches(&doc));
        let both = f.and(Filter::new().eq("kind", json!("directory")));
        assert!(!both.matches(&doc));
    }

    #[test]
    fn test_invalid_filters() {
        assert!(Filter::from_value(json!([1])).is_err());
        assert!(Filter::from_value(json!({"$where": "x"})).is_err());
        assert!(Filter::from_value(json!({"a": {"$regex": "x"}})).is_err());
    }

    #[test]
    fn test_compare_values_cross_type() {
        assert_eq!(compare_values(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(2)), Some(&json!("a"))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(2.5)), Some(&json!(2))), Ordering::Greater);
    }

    #[test]
    fn test_sort_compare() {
        let a = json!({"data": {"score": 1, "name": "b"}});
        let b = json!({"data": {"score": 1, "name": "a"}});
        let sort = Sort::by("data.score", SortOrder::Descending).then("data.name", SortOrder::Ascending);
        assert_eq!(sort.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_projection_prunes_data_and_notes() {
        let mut data = Map::new();
        data.insert("score".into(), json!(1));
        data.insert("algorithm".into(), json!("A"));
        data.insert("metrics".into(), json!({"acc": 0.9, "loss": 0.1}));
        let mut notes = Map::new();
        notes.insert("n".into(), json!("x"));
        let mut node = Node::from_new(
            NodeId::from_raw(1),
            NewNode::experiment("/e").with_data(data).with_notes(notes),
        );
        Projection::include(["data.score", "data.metrics.acc"]).apply(&mut node);
        assert!(node.data().contains_key("score"));
        assert!(!node.data().contains_key("algorithm"));
        assert_eq!(node.data()["metrics"], json!({"acc": 0.9}));
        assert!(node.notes().is_empty());
    }

    #[test]
    fn test_projection_whole_notes() {
        let mut notes = Map::new();
        notes.insert("n".into(), json!("x"));
        let mut node = Node::from_new(NodeId::from_raw(1), NewNode::experiment("/e").with_notes(notes));
        Projection::include(["notes"]).apply(&mut node);
        assert_eq!(node.notes().len(), 1);
    }
}
