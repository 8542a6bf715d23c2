//! The parsed configuration document: an immutable graph of settings,
//! targeting rules, conditions and segments.
//!
//! The whole graph is plain data. It is parsed once, never mutated afterwards,
//! and shared between readers behind an `Arc`. Change detection compares this
//! parsed graph (`PartialEq`), not the raw document text, so re-serializations
//! of semantically identical documents never register as a change.
use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

mod comparators;

pub use comparators::{PrerequisiteFlagComparator, SegmentComparator, UserComparator};

/// One parsed configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Delivery preferences set by the config author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
    /// Ordered segment list. Segment conditions reference entries by index.
    #[serde(default)]
    pub segments: Vec<Segment>,
    /// Settings, keyed by flag key.
    #[serde(default)]
    pub settings: HashMap<String, Setting>,
}

impl Config {
    /// Parse a configuration document from its JSON wire format.
    pub fn parse(json: &str) -> Result<Config, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Salt used by percentage bucketing and the sensitive comparators.
    /// Absent in older documents; treated as empty.
    pub fn salt(&self) -> &str {
        self.preferences
            .as_ref()
            .and_then(|p| p.salt.as_deref())
            .unwrap_or("")
    }

    /// Look up a segment referenced by index. Returns `None` for an
    /// out-of-range index; the referencing condition then evaluates as not
    /// evaluable instead of panicking.
    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }
}

/// Delivery preferences carried inside the configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Base URL the server prefers clients to fetch from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// How the preferred base URL interacts with a caller-supplied one.
    #[serde(default)]
    pub redirect: RedirectMode,
    /// Per-config salt for hashing. Scoped further per setting/segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

/// Redirect behavior declared by configuration preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RedirectMode {
    /// Stay on the current base URL.
    #[default]
    No,
    /// The server asks clients to move to the preferred URL. A caller-supplied
    /// custom base URL takes precedence; a data-governance warning is logged.
    Should,
    /// Redirect regardless of any caller-supplied base URL.
    Force,
}

/// One flag/feature definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    /// Declared type of the setting. The stored values must match it at
    /// evaluation time.
    pub setting_type: SettingType,
    /// Value served when no targeting rule matches and no percentage options
    /// are defined (or the bucket falls through).
    pub value: SettingValue,
    /// Variation id of the plain value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<String>,
    /// User attribute used for percentage bucketing. Defaults to the context's
    /// identifier attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_attribute: Option<String>,
    /// Targeting rules, evaluated in order; the first full match wins.
    #[serde(default)]
    pub targeting_rules: Vec<TargetingRule>,
    /// Setting-level percentage options, evaluated when no rule matches.
    #[serde(default)]
    pub percentage_options: Vec<PercentageOption>,
}

/// Declared type of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingType {
    /// `true`/`false`.
    Boolean,
    /// Text.
    String,
    /// Whole number.
    Int,
    /// Decimal number.
    Double,
}

/// A setting value.
///
/// Untagged on the wire; the declared [`SettingType`] disambiguates. An `Int`
/// is acceptable where a `Double` is declared.
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// A boolean value.
    Bool(bool),
    /// A whole-number value.
    Int(i64),
    /// A decimal value.
    Double(f64),
    /// A text value.
    String(String),
}

impl SettingValue {
    /// Return `true` if this value's runtime type matches the declared type.
    pub fn matches_type(&self, setting_type: SettingType) -> bool {
        match (self, setting_type) {
            (SettingValue::Bool(_), SettingType::Boolean) => true,
            (SettingValue::String(_), SettingType::String) => true,
            (SettingValue::Int(_), SettingType::Int) => true,
            (SettingValue::Double(_), SettingType::Double) => true,
            // JSON has no int/double distinction; a whole number serves a
            // double-typed setting.
            (SettingValue::Int(_), SettingType::Double) => true,
            _ => false,
        }
    }

    /// The boolean payload, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The text payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The whole-number payload, if this is an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The numeric payload; integers coerce.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            SettingValue::Double(d) => Some(*d),
            SettingValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// One "if all conditions hold, then serve" clause.
///
/// The THEN-part is either a single served value or an ordered
/// percentage-option list, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetingRule {
    /// AND-ed conditions. An empty list matches unconditionally.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Single value served when the rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_value: Option<ServedValue>,
    /// Percentage options evaluated when the rule matches.
    #[serde(default)]
    pub percentage_options: Vec<PercentageOption>,
}

/// Value + variation id pair served by a matching targeting rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServedValue {
    /// The value to serve.
    pub value: SettingValue,
    /// Variation id for analytics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<String>,
}

/// One predicate inside a targeting rule.
///
/// A closed tagged union; the evaluator matches on it exhaustively, so adding
/// a variant is a compile-time-checked change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    /// Compare a user attribute against a comparison value.
    UserCondition(UserCondition),
    /// Test membership in a segment.
    SegmentCondition(SegmentCondition),
    /// Gate on the evaluated value of another flag.
    PrerequisiteFlagCondition(PrerequisiteFlagCondition),
}

/// A predicate over one user attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCondition {
    /// Name of the user attribute to compare.
    pub attribute: String,
    /// Comparison operator.
    pub comparator: UserComparator,
    /// Comparison value. Its expected shape depends on the comparator.
    pub value: ConditionValue,
}

/// Comparison value of a [`UserCondition`].
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    /// A string (text, semver and sensitive comparators).
    String(String),
    /// A number (numeric and date-time comparators).
    Number(f64),
    /// A list of strings ("any of" comparators).
    StringList(Vec<String>),
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// A predicate testing segment membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentCondition {
    /// Index of the segment in the config's ordered segment list.
    pub segment_index: usize,
    /// Whether the user must be in or not in the segment.
    pub comparator: SegmentComparator,
}

/// A predicate gating on another flag's evaluated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteFlagCondition {
    /// Key of the prerequisite flag.
    pub prerequisite_key: String,
    /// Whether the prerequisite's value must equal or differ from `value`.
    pub comparator: PrerequisiteFlagComparator,
    /// Value the prerequisite's evaluated value is compared against.
    pub value: SettingValue,
}

/// A reusable named predicate: AND-ed user conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Segment name. Also the hashing scope for sensitive comparisons inside
    /// the segment.
    pub name: String,
    /// AND-ed conditions.
    #[serde(default)]
    pub conditions: Vec<UserCondition>,
}

/// One bucket of a deterministic percentage rollout.
///
/// Option order matters: buckets are cumulative ranges over the list in order.
/// The shares do not have to sum to 100; a bucket value beyond the declared
/// ranges falls through to the rule's (or setting's) default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentageOption {
    /// Share of this bucket, 0–100.
    pub percentage: u8,
    /// Value served to users bucketed here.
    pub value: SettingValue,
    /// Variation id for analytics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<String>,
}
