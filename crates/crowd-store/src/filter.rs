use std::cmp::Ordering;

use serde_json::Value;

use crowd_types::EntityId;

use crate::{Document, ID_FIELD};

/// A predicate over stored documents.
///
/// A missing field compares as `null` for equality and never satisfies a
/// range bound. Range bounds compare numbers numerically and strings
/// lexicographically; values of different kinds never compare.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Value },
    Gte { field: String, value: Value },
    Lte { field: String, value: Value },
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Match a single document by identity.
    pub fn id(id: &EntityId) -> Self {
        Self::eq(ID_FIELD, id.to_hex())
    }

    /// Inclusive identity range. Returns `None` when both bounds are open.
    pub fn id_range(from: Option<&EntityId>, to: Option<&EntityId>) -> Option<Self> {
        let lower = from.map(|id| Self::gte(ID_FIELD, id.to_hex()));
        let upper = to.map(|id| Self::lte(ID_FIELD, id.to_hex()));
        match (lower, upper) {
            (Some(l), Some(u)) => Some(l.and(u)),
            (Some(l), None) => Some(l),
            (None, Some(u)) => Some(u),
            (None, None) => None,
        }
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        let mut clauses = match self {
            Self::And(clauses) => clauses,
            single => vec![single],
        };
        match other {
            Self::And(more) => clauses.extend(more),
            single => clauses.push(single),
        }
        Self::And(clauses)
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::Eq { field, value } => {
                document.get(field).unwrap_or(&Value::Null) == value
            }
            Self::Gte { field, value } => document
                .get(field)
                .and_then(|actual| compare(actual, value))
                .is_some_and(Ordering::is_ge),
            Self::Lte { field, value } => document
                .get(field)
                .and_then(|actual| compare(actual, value))
                .is_some_and(Ordering::is_le),
            Self::And(clauses) => clauses.iter().all(|c| c.matches(document)),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn eq_matches_field_value() {
        let d = doc(json!({ "username": "a", "n": 3 }));
        assert!(Filter::eq("username", "a").matches(&d));
        assert!(!Filter::eq("username", "b").matches(&d));
        assert!(Filter::eq("n", 3).matches(&d));
    }

    #[test]
    fn missing_field_equals_null() {
        let d = doc(json!({ "username": "a" }));
        assert!(Filter::eq("bio", Value::Null).matches(&d));
        assert!(!Filter::eq("bio", "x").matches(&d));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let d = doc(json!({ "n": 5, "s": "m" }));
        assert!(Filter::gte("n", 5).matches(&d));
        assert!(Filter::lte("n", 5).matches(&d));
        assert!(!Filter::gte("n", 6).matches(&d));
        assert!(Filter::gte("s", "a").and(Filter::lte("s", "z")).matches(&d));
    }

    #[test]
    fn range_never_matches_missing_or_mismatched_kinds() {
        let d = doc(json!({ "n": "5" }));
        assert!(!Filter::gte("n", 1).matches(&d));
        assert!(!Filter::lte("missing", 1).matches(&d));
    }

    #[test]
    fn id_range_shapes() {
        let a = EntityId::from_parts(1, [0; 5], 0);
        let b = EntityId::from_parts(2, [0; 5], 0);
        assert!(Filter::id_range(None, None).is_none());
        assert!(matches!(
            Filter::id_range(Some(&a), None),
            Some(Filter::Gte { .. })
        ));
        match Filter::id_range(Some(&a), Some(&b)) {
            Some(Filter::And(clauses)) => assert_eq!(clauses.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn id_range_follows_id_order() {
        let ids: Vec<EntityId> = (0..3).map(|c| EntityId::from_parts(9, [1; 5], c)).collect();
        let filter = Filter::id_range(Some(&ids[1]), Some(&ids[2])).unwrap();
        let hits: Vec<bool> = ids
            .iter()
            .map(|id| filter.matches(&doc(json!({ "_id": id.to_hex() }))))
            .collect();
        assert_eq!(hits, vec![false, true, true]);
    }

    #[test]
    fn and_flattens() {
        let f = Filter::eq("a", 1)
            .and(Filter::eq("b", 2))
            .and(Filter::eq("c", 3).and(Filter::eq("d", 4)));
        match f {
            Filter::And(clauses) => assert_eq!(clauses.len(), 4),
            other => panic!("unexpected {other:?}"),
        }
    }
}
