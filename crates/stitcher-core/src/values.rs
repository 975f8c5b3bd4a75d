//! # Value Algebra
//!
//! Set-based operations over scalar-or-array values. Every entity
//! mutation goes through these two functions, so they are strict about
//! element types: there is no implicit coercion.

use crate::types::{Scalar, StitchError, Value};
use std::collections::BTreeSet;

/// Result of subtracting one value from another.
///
/// The three cases must be handled separately by callers:
///
/// - `Removed`: every element of the new value was already present in the
///   old one, so nothing is left after subtraction.
/// - `Unchanged`: the subtraction removed nothing; the new value is
///   entirely novel with respect to the old one.
/// - `Changed(v)`: some elements were removed; `v` holds the remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Removed,
    Unchanged,
    Changed(Value),
}

/// Flatten, dedupe (first-seen order) and type-check `values`.
///
/// Returns the lone scalar when the result has exactly one element.
pub fn merge<'a, I>(values: I) -> Result<Value, StitchError>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut seen = BTreeSet::new();
    let mut out: Vec<Scalar> = Vec::new();
    for value in values {
        for element in value.elements() {
            check_type(out.first(), element)?;
            if seen.insert(element) {
                out.push(element.clone());
            }
        }
    }
    if out.is_empty() {
        return Err(StitchError::EmptyValue);
    }
    Ok(Value::from_elements(out))
}

/// Compute `new - old` as a set difference, preserving `new`'s order.
pub fn delta(new: &Value, old: &Value) -> Result<Delta, StitchError> {
    if let (Some(expected), Some(found)) = (old.scalar_type(), new.scalar_type()) {
        if expected != found {
            return Err(StitchError::TypeMismatch { expected, found });
        }
    }
    let old_set: BTreeSet<&Scalar> = old.elements().iter().collect();
    let remaining: Vec<Scalar> = new
        .elements()
        .iter()
        .filter(|e| !old_set.contains(e))
        .cloned()
        .collect();

    if remaining.is_empty() {
        Ok(Delta::Removed)
    } else if remaining.len() == new.len() {
        Ok(Delta::Unchanged)
    } else {
        Ok(Delta::Changed(Value::from_elements(remaining)))
    }
}

/// Elements of `value` not in `removed`, or `None` when nothing is left.
pub fn subtract(value: &Value, removed: &Value) -> Option<Value> {
    let gone: BTreeSet<&Scalar> = removed.elements().iter().collect();
    let left: Vec<Scalar> = value
        .elements()
        .iter()
        .filter(|e| !gone.contains(e))
        .cloned()
        .collect();
    (!left.is_empty()).then(|| Value::from_elements(left))
}

/// Set equality, ignoring element order.
#[must_use]
pub fn same_elements(a: &Value, b: &Value) -> bool {
    let left: BTreeSet<&Scalar> = a.elements().iter().collect();
    let right: BTreeSet<&Scalar> = b.elements().iter().collect();
    left == right
}

fn check_type(first: Option<&Scalar>, element: &Scalar) -> Result<(), StitchError> {
    match first {
        Some(head) if head.scalar_type() != element.scalar_type() => {
            Err(StitchError::TypeMismatch {
                expected: head.scalar_type(),
                found: element.scalar_type(),
            })
        }
        _ => Ok(()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn six() -> Value {
        Value::strings(&["one", "two", "three", "four", "five", "six"])
    }

    #[test]
    fn merge_flattens_and_dedupes_in_order() {
        let a = Value::strings(&["b", "a"]);
        let b = Value::strings(&["a", "c"]);
        let merged = merge([&a, &b]).unwrap();
        assert_eq!(merged, Value::strings(&["b", "a", "c"]));
    }

    #[test]
    fn merge_collapses_to_scalar() {
        let a = Value::from("x");
        assert_eq!(merge([&a, &a]).unwrap(), Value::from("x"));
    }

    #[test]
    fn merge_rejects_mixed_types() {
        let a = Value::from("x");
        let b = Value::from(1);
        assert!(matches!(
            merge([&a, &b]),
            Err(StitchError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn merge_of_nothing_is_an_error() {
        assert!(matches!(merge(std::iter::empty::<&Value>()), Err(StitchError::EmptyValue)));
    }

    #[test]
    fn delta_of_identical_is_removed() {
        assert_eq!(delta(&six(), &six()).unwrap(), Delta::Removed);
    }

    #[test]
    fn delta_of_novel_value_is_unchanged() {
        let d = delta(&Value::from("seven"), &six()).unwrap();
        assert_eq!(d, Delta::Unchanged);
    }

    #[test]
    fn delta_partial_keeps_remainder() {
        let new = Value::strings(&["one", "seven", "eight"]);
        let d = delta(&new, &six()).unwrap();
        assert_eq!(d, Delta::Changed(Value::strings(&["seven", "eight"])));
    }

    #[test]
    fn delta_type_mismatch() {
        assert!(delta(&Value::from(1), &six()).is_err());
    }

    #[test]
    fn subtract_and_same_elements() {
        let left = subtract(&six(), &Value::strings(&["one", "two"])).unwrap();
        assert_eq!(left.len(), 4);
        assert!(subtract(&Value::from("one"), &Value::from("one")).is_none());
        assert!(same_elements(
            &Value::strings(&["a", "b"]),
            &Value::strings(&["b", "a"])
        ));
    }
}
