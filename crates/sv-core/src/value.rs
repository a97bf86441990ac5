use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A session-state value. Author variables are loosely typed: numbers and
/// booleans written as text are coerced on read, never on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<StateValue>),
    Map(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Parses an authored parameter: numbers and `true`/`false` become typed,
    /// everything else stays a string.
    pub fn from_param(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(number) = trimmed.parse::<f64>() {
            if number.is_finite() {
                return Self::Number(number);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => Self::String(raw.to_string()),
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Numeric view used by arithmetic: numeric strings and booleans coerce,
    /// `Null` reads as zero.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            Self::Null => Some(0.0),
            Self::String(value) => value.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(value) => *value,
            Self::Number(value) => *value != 0.0 && !value.is_nan(),
            Self::String(value) => !value.is_empty() && !value.eq_ignore_ascii_case("false"),
            Self::Array(values) => !values.is_empty(),
            Self::Map(values) => !values.is_empty(),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Number(value) => format_number(*value),
            Self::String(value) => value.clone(),
            Self::Array(values) => values
                .iter()
                .map(StateValue::to_text)
                .collect::<Vec<_>>()
                .join(", "),
            Self::Map(values) => values
                .iter()
                .map(|(key, value)| format!("{} {}", value.to_text(), key))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn from_param_coerces_numbers_and_booleans_only() {
        assert_eq!(StateValue::from_param("3"), StateValue::Number(3.0));
        assert_eq!(StateValue::from_param(" 2.5 "), StateValue::Number(2.5));
        assert_eq!(StateValue::from_param("TRUE"), StateValue::Bool(true));
        assert_eq!(StateValue::from_param("false"), StateValue::Bool(false));
        assert_eq!(
            StateValue::from_param("golden key"),
            StateValue::String("golden key".to_string())
        );
        assert_eq!(StateValue::from_param(""), StateValue::String(String::new()));
    }

    #[test]
    fn numeric_view_coerces_strings_and_flags() {
        assert_eq!(StateValue::from("4").as_number(), Some(4.0));
        assert_eq!(StateValue::Bool(true).as_number(), Some(1.0));
        assert_eq!(StateValue::Null.as_number(), Some(0.0));
        assert_eq!(StateValue::from("four").as_number(), None);
        assert_eq!(StateValue::Array(Vec::new()).as_number(), None);
    }

    #[test]
    fn text_rendering_drops_integral_fraction() {
        assert_eq!(StateValue::Number(3.0).to_text(), "3");
        assert_eq!(StateValue::Number(3.5).to_text(), "3.5");
        assert_eq!(StateValue::Null.to_text(), "");
    }

    #[test]
    fn truthiness_matches_author_expectations() {
        assert!(!StateValue::from("false").is_truthy());
        assert!(!StateValue::from("").is_truthy());
        assert!(StateValue::from("yes").is_truthy());
        assert!(!StateValue::Number(0.0).is_truthy());
    }

    #[test]
    fn untagged_serde_roundtrip_keeps_shape() {
        let raw = r#"{"a":null,"b":true,"c":2,"d":"x","e":[1,"y"],"f":{"k":1}}"#;
        let parsed: BTreeMap<String, StateValue> =
            serde_json::from_str(raw).expect("values should deserialize");
        assert_eq!(parsed["a"], StateValue::Null);
        assert_eq!(parsed["c"], StateValue::Number(2.0));
        assert!(matches!(parsed["f"], StateValue::Map(_)));
    }
}
