use serde::{Deserialize, Serialize};

/// Comparison operators available to [`UserCondition`](super::UserCondition)s.
///
/// The "sensitive" families operate on salted SHA-256 hashes of the attribute
/// text instead of the cleartext; the comparison values of those conditions
/// are pre-hashed by the config author's tooling, so the cleartext never
/// travels in the config document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserComparator {
    /// Attribute text equals one of the listed values.
    IsOneOf,
    /// Attribute text equals none of the listed values.
    IsNotOneOf,
    /// Attribute text contains any of the listed values as a substring.
    ContainsAnyOf,
    /// Attribute text contains none of the listed values as a substring.
    NotContainsAnyOf,
    /// Attribute version equals one of the listed versions.
    SemVerIsOneOf,
    /// Attribute version equals none of the listed versions.
    SemVerIsNotOneOf,
    /// Attribute version < comparison version.
    SemVerLess,
    /// Attribute version <= comparison version.
    SemVerLessOrEquals,
    /// Attribute version > comparison version.
    SemVerGreater,
    /// Attribute version >= comparison version.
    SemVerGreaterOrEquals,
    /// Attribute number == comparison number.
    NumberEquals,
    /// Attribute number != comparison number.
    NumberNotEquals,
    /// Attribute number < comparison number.
    NumberLess,
    /// Attribute number <= comparison number.
    NumberLessOrEquals,
    /// Attribute number > comparison number.
    NumberGreater,
    /// Attribute number >= comparison number.
    NumberGreaterOrEquals,
    /// Hashed attribute text equals one of the listed hashes.
    SensitiveIsOneOf,
    /// Hashed attribute text equals none of the listed hashes.
    SensitiveIsNotOneOf,
    /// Attribute (Unix-epoch seconds) is before the comparison instant.
    DateTimeBefore,
    /// Attribute (Unix-epoch seconds) is after the comparison instant.
    DateTimeAfter,
    /// Hashed attribute text equals the comparison hash.
    SensitiveTextEquals,
    /// Hashed attribute text differs from the comparison hash.
    SensitiveTextNotEquals,
    /// Attribute text starts with any of the listed `length_hash` prefixes.
    SensitiveTextStartsWithAnyOf,
    /// Attribute text starts with none of the listed `length_hash` prefixes.
    SensitiveTextNotStartsWithAnyOf,
    /// Attribute text ends with any of the listed `length_hash` suffixes.
    SensitiveTextEndsWithAnyOf,
    /// Attribute text ends with none of the listed `length_hash` suffixes.
    SensitiveTextNotEndsWithAnyOf,
    /// Any hashed element of the attribute list appears in the listed hashes.
    SensitiveArrayContainsAnyOf,
    /// No hashed element of the attribute list appears in the listed hashes.
    SensitiveArrayNotContainsAnyOf,
    /// Attribute text equals the comparison text.
    TextEquals,
    /// Attribute text differs from the comparison text.
    TextNotEquals,
    /// Attribute text starts with any of the listed values.
    TextStartsWithAnyOf,
    /// Attribute text starts with none of the listed values.
    TextNotStartsWithAnyOf,
    /// Attribute text ends with any of the listed values.
    TextEndsWithAnyOf,
    /// Attribute text ends with none of the listed values.
    TextNotEndsWithAnyOf,
    /// Any element of the attribute list appears in the listed values.
    ArrayContainsAnyOf,
    /// No element of the attribute list appears in the listed values.
    ArrayNotContainsAnyOf,
}

/// Operator of a [`SegmentCondition`](super::SegmentCondition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentComparator {
    /// The user must be in the segment.
    IsIn,
    /// The user must not be in the segment.
    IsNotIn,
}

/// Operator of a [`PrerequisiteFlagCondition`](super::PrerequisiteFlagCondition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrerequisiteFlagComparator {
    /// The prerequisite's evaluated value must equal the comparison value.
    Equals,
    /// The prerequisite's evaluated value must differ from the comparison value.
    NotEquals,
}
