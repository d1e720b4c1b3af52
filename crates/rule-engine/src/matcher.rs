use regex::Regex;

use crate::schema::ConditionOperator;
use crate::value::FieldValue;

/// Apply a built-in operator to a resolved field value.
///
/// A missing field (`Absent`) only satisfies `not_exists`; every other
/// operator, including the negated comparisons, is false for it.
/// `pattern` is the pre-compiled operand of a `regex` condition.
///
/// `custom` is not handled here and always yields false.
pub fn matches_operator(
    operator: ConditionOperator,
    actual: &FieldValue,
    expected: &FieldValue,
    pattern: Option<&Regex>,
) -> bool {
    if actual.is_absent() {
        return operator == ConditionOperator::NotExists;
    }

    match operator {
        ConditionOperator::Exists => true,
        ConditionOperator::NotExists => false,
        ConditionOperator::Equals => actual.loosely_equals(expected),
        ConditionOperator::NotEquals => !actual.loosely_equals(expected),
        ConditionOperator::Contains => contains(actual, expected),
        ConditionOperator::NotContains => !contains(actual, expected),
        ConditionOperator::StartsWith => match (actual.as_text(), expected.as_text()) {
            (Some(a), Some(e)) => a.starts_with(e),
            _ => false,
        },
        ConditionOperator::EndsWith => match (actual.as_text(), expected.as_text()) {
            (Some(a), Some(e)) => a.ends_with(e),
            _ => false,
        },
        ConditionOperator::GreaterThan => actual.compare(expected).is_some_and(|o| o.is_gt()),
        ConditionOperator::GreaterThanOrEqual => actual.compare(expected).is_some_and(|o| o.is_ge()),
        ConditionOperator::LessThan => actual.compare(expected).is_some_and(|o| o.is_lt()),
        ConditionOperator::LessThanOrEqual => actual.compare(expected).is_some_and(|o| o.is_le()),
        ConditionOperator::LengthGreaterThan => match (actual.len(), expected.as_number()) {
            (Some(len), Some(limit)) => (len as f64) > limit,
            _ => false,
        },
        ConditionOperator::LengthLessThan => match (actual.len(), expected.as_number()) {
            (Some(len), Some(limit)) => (len as f64) < limit,
            _ => false,
        },
        ConditionOperator::Regex => match (actual, pattern) {
            (FieldValue::Text(text), Some(re)) => re.is_match(text),
            (FieldValue::Number(n), Some(re)) => re.is_match(&n.to_string()),
            _ => false,
        },
        ConditionOperator::In => is_member(actual, expected),
        ConditionOperator::NotIn => !is_member(actual, expected),
        ConditionOperator::Custom => false,
    }
}

/// Substring for text, element membership for lists, key presence for maps.
fn contains(actual: &FieldValue, expected: &FieldValue) -> bool {
    match actual {
        FieldValue::Text(text) => expected.as_text().is_some_and(|e| text.contains(e)),
        FieldValue::List(items) => items.iter().any(|item| item.loosely_equals(expected)),
        FieldValue::Map(map) => expected.as_text().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

/// Membership of `actual` in the `expected` list. A list-valued field is a
/// member when any of its elements is.
fn is_member(actual: &FieldValue, expected: &FieldValue) -> bool {
    let Some(allowed) = expected.as_list() else {
        return actual.loosely_equals(expected);
    };
    match actual {
        FieldValue::List(items) => items
            .iter()
            .any(|item| allowed.iter().any(|a| a.loosely_equals(item))),
        _ => allowed.iter().any(|a| a.loosely_equals(actual)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(op: ConditionOperator, actual: impl Into<FieldValue>, expected: impl Into<FieldValue>) -> bool {
        matches_operator(op, &actual.into(), &expected.into(), None)
    }

    // ---- missing fields ----

    #[test]
    fn absent_only_satisfies_not_exists() {
        let absent = FieldValue::Absent;
        assert!(!matches_operator(ConditionOperator::Exists, &absent, &absent, None));
        assert!(matches_operator(ConditionOperator::NotExists, &absent, &absent, None));
        for op in [
            ConditionOperator::Equals,
            ConditionOperator::NotEquals,
            ConditionOperator::Contains,
            ConditionOperator::NotContains,
            ConditionOperator::GreaterThan,
            ConditionOperator::LessThan,
            ConditionOperator::In,
            ConditionOperator::NotIn,
            ConditionOperator::LengthGreaterThan,
        ] {
            assert!(
                !matches_operator(op, &absent, &FieldValue::from("x"), None),
                "{op:?} should be false for a missing field"
            );
        }
    }

    // ---- equality / text ----

    #[test]
    fn equals_and_not_equals() {
        assert!(check(ConditionOperator::Equals, "guest", "guest"));
        assert!(check(ConditionOperator::Equals, 3i64, "3"));
        assert!(check(ConditionOperator::NotEquals, "admin", "guest"));
    }

    #[test]
    fn text_prefix_suffix_contains() {
        assert!(check(ConditionOperator::StartsWith, "/api/admin/users", "/api/admin"));
        assert!(!check(ConditionOperator::StartsWith, "/api/content", "/api/admin"));
        assert!(check(ConditionOperator::EndsWith, "clip.mp4", ".mp4"));
        assert!(check(ConditionOperator::Contains, "free money now", "money"));
        assert!(check(ConditionOperator::NotContains, "hello", "money"));
    }

    #[test]
    fn contains_on_lists() {
        assert!(check(ConditionOperator::Contains, vec!["a", "b"], "b"));
        assert!(!check(ConditionOperator::Contains, vec!["a", "b"], "c"));
    }

    // ---- relational ----

    #[test]
    fn numeric_comparisons() {
        assert!(check(ConditionOperator::GreaterThan, 11i64, 10i64));
        assert!(!check(ConditionOperator::GreaterThan, 10i64, 10i64));
        assert!(check(ConditionOperator::GreaterThanOrEqual, 10i64, 10i64));
        assert!(check(ConditionOperator::LessThan, "12", 13i64));
        assert!(check(ConditionOperator::LessThanOrEqual, -1i64, 0i64));
        assert!(!check(ConditionOperator::GreaterThan, true, 0i64));
    }

    #[test]
    fn length_comparisons() {
        assert!(check(ConditionOperator::LengthGreaterThan, "abcdef", 5i64));
        assert!(!check(ConditionOperator::LengthGreaterThan, "abc", 5i64));
        assert!(check(ConditionOperator::LengthLessThan, vec!["a"], 2i64));
    }

    // ---- regex ----

    #[test]
    fn regex_uses_compiled_pattern() {
        let re = Regex::new(r"^[a-z0-9_]{3,30}$").unwrap();
        let op = ConditionOperator::Regex;
        assert!(matches_operator(op, &"play_nite".into(), &FieldValue::Absent, Some(&re)));
        assert!(!matches_operator(op, &"no spaces!".into(), &FieldValue::Absent, Some(&re)));
        // No compiled pattern means no match.
        assert!(!matches_operator(op, &"play_nite".into(), &FieldValue::Absent, None));
    }

    // ---- membership ----

    #[test]
    fn in_and_not_in() {
        let roles = FieldValue::from(vec!["admin", "super_admin"]);
        assert!(matches_operator(ConditionOperator::In, &"admin".into(), &roles, None));
        assert!(!matches_operator(ConditionOperator::In, &"guest".into(), &roles, None));
        assert!(matches_operator(ConditionOperator::NotIn, &"guest".into(), &roles, None));
        assert!(matches_operator(
            ConditionOperator::In,
            &FieldValue::from(vec!["guest", "admin"]),
            &roles,
            None
        ));
    }
}
