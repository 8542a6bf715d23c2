//! Flag evaluation against a parsed [`Config`].
//!
//! Targeting rules are tried in order and the first full match wins. A rule
//! whose conditions cannot be decided (missing attribute, broken segment
//! reference, prerequisite cycle) is skipped, never matched. Evaluation always
//! terminates with a value or a typed [`EvaluationError`].
use crate::model::{
    Condition, Config, PercentageOption, PrerequisiteFlagCondition, PrerequisiteFlagComparator,
    SegmentCondition, Setting, SettingType, SettingValue, TargetingRule,
};
use crate::snapshot::Timestamp;
use crate::user::{User, IDENTIFIER_ATTRIBUTE};

mod bucketing;
mod conditions;

use conditions::{eval_segment, eval_user_condition, ConditionResult};

/// Why an evaluation fell back to the caller-supplied default.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvaluationError {
    /// No configuration has been fetched or restored from cache yet.
    #[error("configuration is not available yet")]
    ConfigMissing,
    /// The requested key does not exist in the configuration.
    #[error("no setting found for key `{key}`")]
    SettingNotFound {
        /// The requested flag key.
        key: String,
    },
    /// The value's runtime type does not match what was requested or declared.
    #[error("setting `{key}` is of type {actual}, not {requested}")]
    TypeMismatch {
        /// The requested flag key.
        key: String,
        /// Type requested by the caller (or declared by the setting).
        requested: &'static str,
        /// Runtime type of the value.
        actual: &'static str,
    },
}

impl EvaluationError {
    /// `true` for errors that occur in normal operation (startup races,
    /// stale flag keys). The rest point at a config/code mismatch and
    /// deserve attention.
    pub fn is_normal(&self) -> bool {
        match self {
            EvaluationError::ConfigMissing | EvaluationError::SettingNotFound { .. } => true,
            EvaluationError::TypeMismatch { .. } => false,
        }
    }
}

/// Everything produced by one flag evaluation. Passed to the
/// flag-evaluated hook and returned by the details getters.
#[derive(Debug, Clone)]
pub struct EvaluationDetails {
    /// The evaluated flag key.
    pub key: String,
    /// The evaluated value; `None` when evaluation failed.
    pub value: Option<SettingValue>,
    /// Variation id of the served value.
    pub variation_id: Option<String>,
    /// Whether the caller-supplied default was served.
    pub is_default_value: bool,
    /// The targeting rule that matched, if any.
    pub matched_targeting_rule: Option<TargetingRule>,
    /// The percentage option the user was bucketed into, if any.
    pub matched_percentage_option: Option<PercentageOption>,
    /// Why the default was served, if it was.
    pub error: Option<EvaluationError>,
    /// When the evaluated snapshot was fetched.
    pub fetch_time: Option<Timestamp>,
    /// The user the evaluation ran against.
    pub user: Option<User>,
}

impl EvaluationDetails {
    pub(crate) fn from_error(key: &str, user: Option<&User>, error: EvaluationError) -> Self {
        EvaluationDetails {
            key: key.to_owned(),
            value: None,
            variation_id: None,
            is_default_value: true,
            matched_targeting_rule: None,
            matched_percentage_option: None,
            error: Some(error),
            fetch_time: None,
            user: user.cloned(),
        }
    }
}

/// Successful outcome of [`evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The served value.
    pub value: SettingValue,
    /// Variation id of the served value.
    pub variation_id: Option<String>,
    /// The targeting rule that matched, if any.
    pub matched_targeting_rule: Option<TargetingRule>,
    /// The percentage option the user was bucketed into, if any.
    pub matched_percentage_option: Option<PercentageOption>,
}

/// Evaluate the setting under `key` for `user`.
pub fn evaluate(
    config: &Config,
    key: &str,
    user: Option<&User>,
) -> Result<Evaluation, EvaluationError> {
    Evaluator {
        config,
        user,
        visited: Vec::new(),
    }
    .evaluate_setting(key)
}

struct Evaluator<'a> {
    config: &'a Config,
    user: Option<&'a User>,
    /// Setting keys on the active prerequisite path, for cycle detection.
    visited: Vec<String>,
}

impl<'a> Evaluator<'a> {
    fn evaluate_setting(&mut self, key: &str) -> Result<Evaluation, EvaluationError> {
        let Some(setting) = self.config.settings.get(key) else {
            return Err(EvaluationError::SettingNotFound {
                key: key.to_owned(),
            });
        };

        self.visited.push(key.to_owned());
        let result = self.evaluate_rules(key, setting);
        self.visited.pop();
        result
    }

    fn evaluate_rules(
        &mut self,
        key: &str,
        setting: &'a Setting,
    ) -> Result<Evaluation, EvaluationError> {
        for rule in &setting.targeting_rules {
            match self.rule_matches(key, rule) {
                ConditionResult::NoMatch => continue,
                ConditionResult::NotEvaluable(reason) => {
                    log::warn!(target: "flagcast", key; "skipping targeting rule: {reason}");
                    continue;
                }
                ConditionResult::Match => {}
            }

            if let Some(served) = &rule.served_value {
                check_declared_type(key, setting.setting_type, &served.value)?;
                return Ok(Evaluation {
                    value: served.value.clone(),
                    variation_id: served.variation_id.clone(),
                    matched_targeting_rule: Some(rule.clone()),
                    matched_percentage_option: None,
                });
            }

            if let Some(option) = self.pick_percentage(key, setting, &rule.percentage_options) {
                check_declared_type(key, setting.setting_type, &option.value)?;
                return Ok(Evaluation {
                    value: option.value.clone(),
                    variation_id: option.variation_id.clone(),
                    matched_targeting_rule: Some(rule.clone()),
                    matched_percentage_option: Some(option.clone()),
                });
            }
            // The rule matched but could not serve anything (no bucketing
            // attribute, or the bucket fell beyond the declared shares):
            // continue with the next rule.
        }

        if let Some(option) = self.pick_percentage(key, setting, &setting.percentage_options) {
            check_declared_type(key, setting.setting_type, &option.value)?;
            return Ok(Evaluation {
                value: option.value.clone(),
                variation_id: option.variation_id.clone(),
                matched_targeting_rule: None,
                matched_percentage_option: Some(option.clone()),
            });
        }

        check_declared_type(key, setting.setting_type, &setting.value)?;
        Ok(Evaluation {
            value: setting.value.clone(),
            variation_id: setting.variation_id.clone(),
            matched_targeting_rule: None,
            matched_percentage_option: None,
        })
    }

    fn rule_matches(&mut self, key: &str, rule: &TargetingRule) -> ConditionResult {
        for condition in &rule.conditions {
            let result = match condition {
                Condition::UserCondition(condition) => match self.user {
                    Some(user) => {
                        eval_user_condition(condition, user, self.config.salt(), key)
                    }
                    None => ConditionResult::NotEvaluable(
                        "no user object was provided".to_owned(),
                    ),
                },
                Condition::SegmentCondition(condition) => self.segment_matches(condition),
                Condition::PrerequisiteFlagCondition(condition) => {
                    self.prerequisite_matches(condition)
                }
            };
            match result {
                ConditionResult::Match => {}
                other => return other,
            }
        }
        ConditionResult::Match
    }

    fn segment_matches(&self, condition: &SegmentCondition) -> ConditionResult {
        let Some(segment) = self.config.segment(condition.segment_index) else {
            return ConditionResult::NotEvaluable(format!(
                "segment reference {} is invalid",
                condition.segment_index
            ));
        };
        match self.user {
            Some(user) => eval_segment(segment, condition.comparator, user, self.config.salt()),
            None => ConditionResult::NotEvaluable("no user object was provided".to_owned()),
        }
    }

    fn prerequisite_matches(&mut self, condition: &PrerequisiteFlagCondition) -> ConditionResult {
        if self.visited.iter().any(|key| *key == condition.prerequisite_key) {
            return ConditionResult::NotEvaluable(format!(
                "circular dependency detected through prerequisite flag `{}`",
                condition.prerequisite_key
            ));
        }
        match self.evaluate_setting(&condition.prerequisite_key) {
            Ok(evaluation) => {
                let equals = evaluation.value == condition.value;
                match condition.comparator {
                    PrerequisiteFlagComparator::Equals => equals.into(),
                    PrerequisiteFlagComparator::NotEquals => (!equals).into(),
                }
            }
            Err(err) => ConditionResult::NotEvaluable(format!(
                "prerequisite flag `{}` could not be evaluated: {err}",
                condition.prerequisite_key
            )),
        }
    }

    /// Pick the percentage option the user's bucket falls into, if bucketing
    /// is possible. Shares are cumulative ranges over the option list in
    /// order; a bucket beyond the declared shares picks nothing.
    fn pick_percentage(
        &self,
        key: &str,
        setting: &'a Setting,
        options: &'a [PercentageOption],
    ) -> Option<&'a PercentageOption> {
        if options.is_empty() {
            return None;
        }
        let user = self.user?;
        let attribute = setting
            .percentage_attribute
            .as_deref()
            .unwrap_or(IDENTIFIER_ATTRIBUTE);
        let value = user.get(attribute)?;
        let bucket = bucketing::bucket(key, &value.as_text());

        let mut cumulative = 0u32;
        for option in options {
            cumulative += u32::from(option.percentage);
            if u32::from(bucket) < cumulative {
                return Some(option);
            }
        }
        None
    }
}

fn check_declared_type(
    key: &str,
    setting_type: SettingType,
    value: &SettingValue,
) -> Result<(), EvaluationError> {
    if value.matches_type(setting_type) {
        Ok(())
    } else {
        Err(EvaluationError::TypeMismatch {
            key: key.to_owned(),
            requested: type_name(setting_type),
            actual: value_type_name(value),
        })
    }
}

fn type_name(setting_type: SettingType) -> &'static str {
    match setting_type {
        SettingType::Boolean => "bool",
        SettingType::String => "string",
        SettingType::Int => "int",
        SettingType::Double => "double",
    }
}

pub(crate) fn value_type_name(value: &SettingValue) -> &'static str {
    match value {
        SettingValue::Bool(_) => "bool",
        SettingValue::Int(_) => "int",
        SettingValue::Double(_) => "double",
        SettingValue::String(_) => "string",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Config {
        Config::parse(json).unwrap()
    }

    #[test]
    fn first_matching_rule_wins() {
        let config = parse(
            r#"{
              "settings": {
                "greeting": {
                  "settingType": "string",
                  "value": "hello",
                  "variationId": "v_default",
                  "targetingRules": [
                    {"conditions": [{"userCondition":
                        {"attribute": "Country", "comparator": "isOneOf", "value": ["FR"]}}],
                     "servedValue": {"value": "bonjour", "variationId": "v_fr"}},
                    {"conditions": [{"userCondition":
                        {"attribute": "Country", "comparator": "isOneOf", "value": ["FR", "DE"]}}],
                     "servedValue": {"value": "hallo", "variationId": "v_de"}}
                  ]
                }
              }
            }"#,
        );

        let user = User::new("u").with("Country", "FR");
        let result = evaluate(&config, "greeting", Some(&user)).unwrap();
        assert_eq!(result.value, SettingValue::String("bonjour".to_owned()));
        assert_eq!(result.variation_id.as_deref(), Some("v_fr"));
        assert!(result.matched_targeting_rule.is_some());

        let user = User::new("u").with("Country", "DE");
        let result = evaluate(&config, "greeting", Some(&user)).unwrap();
        assert_eq!(result.value, SettingValue::String("hallo".to_owned()));

        let user = User::new("u").with("Country", "US");
        let result = evaluate(&config, "greeting", Some(&user)).unwrap();
        assert_eq!(result.value, SettingValue::String("hello".to_owned()));
        assert!(result.matched_targeting_rule.is_none());
    }

    #[test]
    fn rules_with_missing_attributes_are_skipped() {
        let config = parse(
            r#"{
              "settings": {
                "flag": {
                  "settingType": "boolean",
                  "value": false,
                  "targetingRules": [
                    {"conditions": [{"userCondition":
                        {"attribute": "Email", "comparator": "textEquals", "value": "x"}}],
                     "servedValue": {"value": true}}
                  ]
                }
              }
            }"#,
        );

        // Attribute missing, and no user at all: the rule never matches.
        let user = User::new("u");
        let result = evaluate(&config, "flag", Some(&user)).unwrap();
        assert_eq!(result.value, SettingValue::Bool(false));

        let result = evaluate(&config, "flag", None).unwrap();
        assert_eq!(result.value, SettingValue::Bool(false));
    }

    #[test]
    fn unknown_key_is_an_error() {
        let config = parse(r#"{"settings": {}}"#);
        assert_eq!(
            evaluate(&config, "nope", None).unwrap_err(),
            EvaluationError::SettingNotFound {
                key: "nope".to_owned()
            }
        );
    }

    #[test]
    fn percentage_options_split_deterministically() {
        let config = parse(
            r#"{
              "settings": {
                "bucketFlag": {
                  "settingType": "string",
                  "value": "fallback",
                  "percentageOptions": [
                    {"percentage": 50, "value": "first", "variationId": "v_a"},
                    {"percentage": 50, "value": "second", "variationId": "v_b"}
                  ]
                }
              }
            }"#,
        );

        // Buckets: alice=77, bob=49, carol=26 for this setting key.
        for (identifier, expected) in [("alice", "second"), ("bob", "first"), ("carol", "first")] {
            let user = User::new(identifier);
            let result = evaluate(&config, "bucketFlag", Some(&user)).unwrap();
            assert_eq!(
                result.value,
                SettingValue::String(expected.to_owned()),
                "{identifier}"
            );
            assert!(result.matched_percentage_option.is_some());
        }

        // Without a user there is no bucket; the plain value is served.
        let result = evaluate(&config, "bucketFlag", None).unwrap();
        assert_eq!(result.value, SettingValue::String("fallback".to_owned()));
        assert!(result.matched_percentage_option.is_none());
    }

    #[test]
    fn percentage_bucketing_can_use_a_custom_attribute() {
        let config = parse(
            r#"{
              "settings": {
                "bucketFlag": {
                  "settingType": "string",
                  "value": "fallback",
                  "percentageAttribute": "Tenant",
                  "percentageOptions": [
                    {"percentage": 50, "value": "first"},
                    {"percentage": 50, "value": "second"}
                  ]
                }
              }
            }"#,
        );

        // bucket("bucketFlag", "alice") = 77, regardless of the identifier.
        let user = User::new("someone-else").with("Tenant", "alice");
        let result = evaluate(&config, "bucketFlag", Some(&user)).unwrap();
        assert_eq!(result.value, SettingValue::String("second".to_owned()));

        // Attribute missing: bucketing is impossible, the plain value wins.
        let user = User::new("someone-else");
        let result = evaluate(&config, "bucketFlag", Some(&user)).unwrap();
        assert_eq!(result.value, SettingValue::String("fallback".to_owned()));
    }

    #[test]
    fn shares_below_hundred_fall_through() {
        let config = parse(
            r#"{
              "settings": {
                "pctFlag": {
                  "settingType": "boolean",
                  "value": false,
                  "percentageOptions": [
                    {"percentage": 10, "value": true}
                  ]
                }
              }
            }"#,
        );

        // bucket("pctFlag", "u42") = 90, beyond the declared 10% share.
        let user = User::new("u42");
        let result = evaluate(&config, "pctFlag", Some(&user)).unwrap();
        assert_eq!(result.value, SettingValue::Bool(false));
        assert!(result.matched_percentage_option.is_none());
    }

    #[test]
    fn rule_level_percentage_miss_falls_to_next_rule() {
        let config = parse(
            r#"{
              "settings": {
                "flag": {
                  "settingType": "string",
                  "value": "default",
                  "percentageAttribute": "Tenant",
                  "targetingRules": [
                    {"conditions": [],
                     "percentageOptions": [{"percentage": 100, "value": "bucketed"}]},
                    {"conditions": [],
                     "servedValue": {"value": "second-rule"}}
                  ]
                }
              }
            }"#,
        );

        // No Tenant attribute: the first rule matches but cannot bucket, so
        // the second rule serves.
        let user = User::new("u");
        let result = evaluate(&config, "flag", Some(&user)).unwrap();
        assert_eq!(result.value, SettingValue::String("second-rule".to_owned()));

        let user = User::new("u").with("Tenant", "t1");
        let result = evaluate(&config, "flag", Some(&user)).unwrap();
        assert_eq!(result.value, SettingValue::String("bucketed".to_owned()));
    }

    #[test]
    fn prerequisite_flags_gate_rules() {
        let config = parse(
            r#"{
              "settings": {
                "parent": {"settingType": "boolean", "value": true},
                "child": {
                  "settingType": "string",
                  "value": "off",
                  "targetingRules": [
                    {"conditions": [{"prerequisiteFlagCondition":
                        {"prerequisiteKey": "parent", "comparator": "equals", "value": true}}],
                     "servedValue": {"value": "on"}}
                  ]
                }
              }
            }"#,
        );

        let result = evaluate(&config, "child", None).unwrap();
        assert_eq!(result.value, SettingValue::String("on".to_owned()));
    }

    #[test]
    fn prerequisite_cycles_terminate() {
        let config = parse(
            r#"{
              "settings": {
                "a": {
                  "settingType": "boolean",
                  "value": false,
                  "targetingRules": [
                    {"conditions": [{"prerequisiteFlagCondition":
                        {"prerequisiteKey": "b", "comparator": "equals", "value": true}}],
                     "servedValue": {"value": true}}
                  ]
                },
                "b": {
                  "settingType": "boolean",
                  "value": false,
                  "targetingRules": [
                    {"conditions": [{"prerequisiteFlagCondition":
                        {"prerequisiteKey": "a", "comparator": "equals", "value": true}}],
                     "servedValue": {"value": true}}
                  ]
                }
              }
            }"#,
        );

        // The cycle makes both rules not evaluable; the defaults are served.
        let result = evaluate(&config, "a", None).unwrap();
        assert_eq!(result.value, SettingValue::Bool(false));
    }

    #[test]
    fn declared_type_is_enforced() {
        let config = parse(
            r#"{
              "settings": {
                "flag": {"settingType": "boolean", "value": "oops"}
              }
            }"#,
        );
        assert!(matches!(
            evaluate(&config, "flag", None).unwrap_err(),
            EvaluationError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn segment_conditions_resolve_by_index() {
        let config = parse(
            r#"{
              "segments": [
                {"name": "Beta",
                 "conditions": [
                   {"attribute": "Email", "comparator": "textEndsWithAnyOf", "value": ["@example.com"]}
                 ]}
              ],
              "settings": {
                "flag": {
                  "settingType": "boolean",
                  "value": false,
                  "targetingRules": [
                    {"conditions": [{"segmentCondition": {"segmentIndex": 0, "comparator": "isIn"}}],
                     "servedValue": {"value": true}},
                    {"conditions": [{"segmentCondition": {"segmentIndex": 9, "comparator": "isIn"}}],
                     "servedValue": {"value": true}}
                  ]
                }
              }
            }"#,
        );

        let member = User::new("u").with("Email", "a@example.com");
        let result = evaluate(&config, "flag", Some(&member)).unwrap();
        assert_eq!(result.value, SettingValue::Bool(true));

        // Outsiders miss rule one; rule two has a dangling segment index and
        // is skipped instead of panicking.
        let outsider = User::new("u").with("Email", "a@other.org");
        let result = evaluate(&config, "flag", Some(&outsider)).unwrap();
        assert_eq!(result.value, SettingValue::Bool(false));
    }
}
