//! Condition evaluation: the comparator families of [`UserCondition`] and
//! segment membership.
//!
//! Every comparator resolves to a three-valued [`ConditionResult`]. Negated
//! comparators invert `Match`/`NoMatch` but never `NotEvaluable`: a condition
//! that cannot be evaluated (missing attribute, malformed comparison value)
//! stays not-evaluable under negation, so the enclosing rule is skipped rather
//! than accidentally matched.
use semver::Version;
use sha2::{Digest, Sha256};

use crate::model::{ConditionValue, Segment, SegmentComparator, UserCondition, UserComparator};
use crate::user::User;

/// Three-valued outcome of one condition.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConditionResult {
    /// The condition holds.
    Match,
    /// The condition does not hold.
    NoMatch,
    /// The condition could not be decided; the reason is logged and the
    /// enclosing rule is skipped.
    NotEvaluable(String),
}

impl From<bool> for ConditionResult {
    fn from(matched: bool) -> ConditionResult {
        if matched {
            ConditionResult::Match
        } else {
            ConditionResult::NoMatch
        }
    }
}

fn negate(result: ConditionResult) -> ConditionResult {
    match result {
        ConditionResult::Match => ConditionResult::NoMatch,
        ConditionResult::NoMatch => ConditionResult::Match,
        not_evaluable => not_evaluable,
    }
}

/// Evaluate one user condition.
///
/// `context_salt` scopes the sensitive-comparator hashes: the setting key for
/// conditions inside targeting rules, the segment name for conditions inside a
/// segment. The same cleartext therefore hashes differently per flag and per
/// segment.
pub(crate) fn eval_user_condition(
    condition: &UserCondition,
    user: &User,
    config_salt: &str,
    context_salt: &str,
) -> ConditionResult {
    let Some(attribute) = user.get(&condition.attribute) else {
        return ConditionResult::NotEvaluable(format!(
            "the user attribute `{}` is missing",
            condition.attribute
        ));
    };
    let value = &condition.value;

    use UserComparator::*;
    match condition.comparator {
        IsOneOf => with_list(value, |list| {
            let text = attribute.as_text();
            list.iter().any(|item| *item == text).into()
        }),
        IsNotOneOf => negate(with_list(value, |list| {
            let text = attribute.as_text();
            list.iter().any(|item| *item == text).into()
        })),
        ContainsAnyOf => with_list(value, |list| {
            let text = attribute.as_text();
            list.iter().any(|item| text.contains(item)).into()
        }),
        NotContainsAnyOf => negate(with_list(value, |list| {
            let text = attribute.as_text();
            list.iter().any(|item| text.contains(item)).into()
        })),

        SemVerIsOneOf => semver_is_one_of(&attribute.as_text(), value),
        SemVerIsNotOneOf => negate(semver_is_one_of(&attribute.as_text(), value)),
        SemVerLess => semver_compare(&attribute.as_text(), value, |o| o.is_lt()),
        SemVerLessOrEquals => semver_compare(&attribute.as_text(), value, |o| o.is_le()),
        SemVerGreater => semver_compare(&attribute.as_text(), value, |o| o.is_gt()),
        SemVerGreaterOrEquals => semver_compare(&attribute.as_text(), value, |o| o.is_ge()),

        NumberEquals => number_compare(attribute.as_number(), value, |a, b| a == b),
        NumberNotEquals => number_compare(attribute.as_number(), value, |a, b| a != b),
        NumberLess => number_compare(attribute.as_number(), value, |a, b| a < b),
        NumberLessOrEquals => number_compare(attribute.as_number(), value, |a, b| a <= b),
        NumberGreater => number_compare(attribute.as_number(), value, |a, b| a > b),
        NumberGreaterOrEquals => number_compare(attribute.as_number(), value, |a, b| a >= b),

        // Date-time attributes are Unix-epoch seconds; the comparison value on
        // the wire is the same representation, so this is a number comparison.
        DateTimeBefore => number_compare(attribute.as_number(), value, |a, b| a < b),
        DateTimeAfter => number_compare(attribute.as_number(), value, |a, b| a > b),

        SensitiveIsOneOf => with_list(value, |list| {
            let hash = hash_sensitive(attribute.as_text().as_bytes(), config_salt, context_salt);
            list.iter().any(|item| *item == hash).into()
        }),
        SensitiveIsNotOneOf => negate(with_list(value, |list| {
            let hash = hash_sensitive(attribute.as_text().as_bytes(), config_salt, context_salt);
            list.iter().any(|item| *item == hash).into()
        })),
        SensitiveTextEquals => with_text(value, |expected| {
            let hash = hash_sensitive(attribute.as_text().as_bytes(), config_salt, context_salt);
            (hash == expected).into()
        }),
        SensitiveTextNotEquals => negate(with_text(value, |expected| {
            let hash = hash_sensitive(attribute.as_text().as_bytes(), config_salt, context_salt);
            (hash == expected).into()
        })),
        SensitiveTextStartsWithAnyOf => {
            sensitive_slice_any(&attribute.as_text(), value, config_salt, context_salt, true)
        }
        SensitiveTextNotStartsWithAnyOf => negate(sensitive_slice_any(
            &attribute.as_text(),
            value,
            config_salt,
            context_salt,
            true,
        )),
        SensitiveTextEndsWithAnyOf => {
            sensitive_slice_any(&attribute.as_text(), value, config_salt, context_salt, false)
        }
        SensitiveTextNotEndsWithAnyOf => negate(sensitive_slice_any(
            &attribute.as_text(),
            value,
            config_salt,
            context_salt,
            false,
        )),
        SensitiveArrayContainsAnyOf => {
            sensitive_array_any(attribute.as_string_list(), value, config_salt, context_salt)
        }
        SensitiveArrayNotContainsAnyOf => negate(sensitive_array_any(
            attribute.as_string_list(),
            value,
            config_salt,
            context_salt,
        )),

        TextEquals => with_text(value, |expected| (attribute.as_text() == expected).into()),
        TextNotEquals => negate(with_text(value, |expected| {
            (attribute.as_text() == expected).into()
        })),
        TextStartsWithAnyOf => with_list(value, |list| {
            let text = attribute.as_text();
            list.iter().any(|item| text.starts_with(item)).into()
        }),
        TextNotStartsWithAnyOf => negate(with_list(value, |list| {
            let text = attribute.as_text();
            list.iter().any(|item| text.starts_with(item)).into()
        })),
        TextEndsWithAnyOf => with_list(value, |list| {
            let text = attribute.as_text();
            list.iter().any(|item| text.ends_with(item)).into()
        }),
        TextNotEndsWithAnyOf => negate(with_list(value, |list| {
            let text = attribute.as_text();
            list.iter().any(|item| text.ends_with(item)).into()
        })),

        ArrayContainsAnyOf => array_any(attribute.as_string_list(), value),
        ArrayNotContainsAnyOf => negate(array_any(attribute.as_string_list(), value)),
    }
}

/// Segment membership: all of the segment's conditions must hold, hashed with
/// the segment name as context salt. `IsNotIn` negates the membership result,
/// not the evaluability.
pub(crate) fn eval_segment(
    segment: &Segment,
    comparator: SegmentComparator,
    user: &User,
    config_salt: &str,
) -> ConditionResult {
    let mut membership = ConditionResult::Match;
    for condition in &segment.conditions {
        match eval_user_condition(condition, user, config_salt, &segment.name) {
            ConditionResult::Match => {}
            ConditionResult::NoMatch => {
                membership = ConditionResult::NoMatch;
                break;
            }
            not_evaluable => return not_evaluable,
        }
    }
    match comparator {
        SegmentComparator::IsIn => membership,
        SegmentComparator::IsNotIn => negate(membership),
    }
}

fn invalid_value() -> ConditionResult {
    ConditionResult::NotEvaluable("the comparison value is missing or invalid".to_owned())
}

fn with_text(value: &ConditionValue, f: impl FnOnce(&str) -> ConditionResult) -> ConditionResult {
    match value {
        ConditionValue::String(s) => f(s),
        _ => invalid_value(),
    }
}

fn with_list(
    value: &ConditionValue,
    f: impl FnOnce(&[String]) -> ConditionResult,
) -> ConditionResult {
    match value {
        ConditionValue::StringList(list) => f(list),
        _ => invalid_value(),
    }
}

fn number_compare(
    attribute: Option<f64>,
    value: &ConditionValue,
    compare: impl FnOnce(f64, f64) -> bool,
) -> ConditionResult {
    let Some(attribute) = attribute else {
        return ConditionResult::NotEvaluable(
            "the user attribute is not a valid number".to_owned(),
        );
    };
    let comparison = match value {
        ConditionValue::Number(n) => Some(*n),
        // Decimal commas are accepted, same as for attribute values.
        ConditionValue::String(s) => s.trim().replace(',', ".").parse().ok(),
        ConditionValue::StringList(_) => None,
    };
    match comparison {
        Some(comparison) => compare(attribute, comparison).into(),
        None => invalid_value(),
    }
}

fn parse_version(text: &str) -> Option<Version> {
    Version::parse(text.trim()).ok()
}

fn semver_is_one_of(attribute: &str, value: &ConditionValue) -> ConditionResult {
    let Some(version) = parse_version(attribute) else {
        return ConditionResult::NotEvaluable(
            "the user attribute is not a valid semantic version".to_owned(),
        );
    };
    with_list(value, |list| {
        let mut found = false;
        for item in list {
            let trimmed = item.trim();
            if trimmed.is_empty() {
                continue;
            }
            // One malformed entry invalidates the whole condition; a silently
            // skipped entry could flip a negated comparator.
            let Some(candidate) = parse_version(trimmed) else {
                return invalid_value();
            };
            found = found || candidate == version;
        }
        found.into()
    })
}

fn semver_compare(
    attribute: &str,
    value: &ConditionValue,
    accept: impl FnOnce(std::cmp::Ordering) -> bool,
) -> ConditionResult {
    let Some(version) = parse_version(attribute) else {
        return ConditionResult::NotEvaluable(
            "the user attribute is not a valid semantic version".to_owned(),
        );
    };
    with_text(value, |text| match parse_version(text) {
        Some(comparison) => accept(version.cmp(&comparison)).into(),
        None => invalid_value(),
    })
}

fn hash_sensitive(text: &[u8], config_salt: &str, context_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text);
    hasher.update(config_salt.as_bytes());
    hasher.update(context_salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sensitive starts/ends-with. Each comparison entry is `length_hash`: the
/// UTF-8 byte length of the cleartext prefix/suffix, an underscore, and the
/// salted hash of those bytes. The attribute slice is taken at byte
/// granularity, matching how the entries are produced.
fn sensitive_slice_any(
    attribute: &str,
    value: &ConditionValue,
    config_salt: &str,
    context_salt: &str,
    prefix: bool,
) -> ConditionResult {
    with_list(value, |list| {
        let bytes = attribute.as_bytes();
        for item in list {
            let Some((length, hash)) = item.split_once('_') else {
                return invalid_value();
            };
            let Ok(length) = length.parse::<usize>() else {
                return invalid_value();
            };
            if length > bytes.len() {
                continue;
            }
            let slice = if prefix {
                &bytes[..length]
            } else {
                &bytes[bytes.len() - length..]
            };
            if hash_sensitive(slice, config_salt, context_salt) == hash {
                return ConditionResult::Match;
            }
        }
        ConditionResult::NoMatch
    })
}

fn sensitive_array_any(
    attribute: Option<&[String]>,
    value: &ConditionValue,
    config_salt: &str,
    context_salt: &str,
) -> ConditionResult {
    let Some(elements) = attribute else {
        return ConditionResult::NotEvaluable(
            "the user attribute is not a string list".to_owned(),
        );
    };
    with_list(value, |list| {
        elements
            .iter()
            .any(|element| {
                let hash = hash_sensitive(element.as_bytes(), config_salt, context_salt);
                list.iter().any(|item| *item == hash)
            })
            .into()
    })
}

fn array_any(attribute: Option<&[String]>, value: &ConditionValue) -> ConditionResult {
    let Some(elements) = attribute else {
        return ConditionResult::NotEvaluable(
            "the user attribute is not a string list".to_owned(),
        );
    };
    with_list(value, |list| {
        elements
            .iter()
            .any(|element| list.iter().any(|item| item == element))
            .into()
    })
}
