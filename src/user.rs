use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Name of the attribute that holds the context's primary identifier. It is
/// the default attribute for percentage bucketing.
pub const IDENTIFIER_ATTRIBUTE: &str = "Identifier";

/// The evaluation context ("user") that targeting rules are matched against.
///
/// A `User` is a bag of named attributes with a distinguished identifier
/// attribute. Attribute lookup is exact (case-sensitive).
///
/// # Examples
/// ```
/// # use flagcast::User;
/// let user = User::new("user-42")
///     .with("Email", "jane@example.com")
///     .with("Age", 30.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    attributes: HashMap<String, UserValue>,
}

impl User {
    /// Create a new user with the given identifier.
    pub fn new(identifier: impl Into<String>) -> User {
        let mut attributes = HashMap::new();
        attributes.insert(
            IDENTIFIER_ATTRIBUTE.to_owned(),
            UserValue::String(identifier.into()),
        );
        User { attributes }
    }

    /// Attach an attribute, consuming and returning the user for chaining.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<UserValue>) -> User {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// The user's primary identifier.
    pub fn identifier(&self) -> &str {
        match self.attributes.get(IDENTIFIER_ATTRIBUTE) {
            Some(UserValue::String(s)) => s,
            _ => "",
        }
    }

    /// Look up an attribute by name.
    pub fn get(&self, attribute: &str) -> Option<&UserValue> {
        self.attributes.get(attribute)
    }
}

/// Possible values of a user attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64` and
/// `Vec<String>`.
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserValue {
    /// A string value.
    String(String),
    /// A numeric value. Date-time attributes are represented as Unix-epoch
    /// seconds.
    Number(f64),
    /// A list of strings, used by the array comparators.
    StringList(Vec<String>),
}

impl UserValue {
    /// Render the value as text for the text comparator family.
    ///
    /// Numbers use Rust's culture-invariant `Display`; lists are rendered as a
    /// JSON array, matching how they are transmitted on the wire.
    pub(crate) fn as_text(&self) -> String {
        match self {
            UserValue::String(s) => s.clone(),
            UserValue::Number(n) => n.to_string(),
            UserValue::StringList(l) => serde_json::to_string(l).unwrap_or_default(),
        }
    }

    /// Interpret the value as a number for the numeric and date-time
    /// comparator families. Strings are parsed culture-invariantly, accepting
    /// a comma as the decimal separator.
    pub(crate) fn as_number(&self) -> Option<f64> {
        match self {
            UserValue::Number(n) => Some(*n),
            UserValue::String(s) => s.trim().replace(',', ".").parse().ok(),
            UserValue::StringList(_) => None,
        }
    }

    /// Interpret the value as a string list for the array comparator family.
    pub(crate) fn as_string_list(&self) -> Option<&[String]> {
        match self {
            UserValue::StringList(l) => Some(l),
            _ => None,
        }
    }
}

impl From<&str> for UserValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<&[&str]> for UserValue {
    fn from(value: &[&str]) -> Self {
        Self::StringList(value.iter().map(|s| (*s).to_owned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_an_attribute() {
        let user = User::new("user-1");
        assert_eq!(user.identifier(), "user-1");
        assert_eq!(
            user.get(IDENTIFIER_ATTRIBUTE),
            Some(&UserValue::String("user-1".to_owned()))
        );
    }

    #[test]
    fn number_text_rendering_is_invariant() {
        assert_eq!(UserValue::Number(42.0).as_text(), "42");
        assert_eq!(UserValue::Number(3.14).as_text(), "3.14");
    }

    #[test]
    fn string_parses_as_number_with_comma_separator() {
        assert_eq!(UserValue::String("3,14".to_owned()).as_number(), Some(3.14));
        assert_eq!(UserValue::String(" 42 ".to_owned()).as_number(), Some(42.0));
        assert_eq!(UserValue::String("abc".to_owned()).as_number(), None);
    }
}
