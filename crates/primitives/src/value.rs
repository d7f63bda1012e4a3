use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Prefix used for evaluation error markers stored in a cell's value.
pub const ERROR_PREFIX: &str = "!ERR:";

/// Scalar stored in a cell's `value` slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    /// Evaluation failure, rendered as `!ERR:<reason>`.
    Error(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error(reason.into())
    }

    /// Interpret free-form user input: numeric text becomes a number, an
    /// `!ERR:` marker becomes an error, blank text becomes empty.
    pub fn from_input(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::Empty;
        }
        if let Some(reason) = raw.strip_prefix(ERROR_PREFIX) {
            return Self::Error(reason.to_string());
        }
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            if let Ok(n) = trimmed.parse::<f64>() {
                if n.is_finite() {
                    return Self::Number(n);
                }
            }
        }
        Self::Text(raw.to_string())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Numeric view of the value; numeric text counts, blanks do not.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
            }
            _ => None,
        }
    }

    pub fn to_number_or(&self, default: f64) -> f64 {
        self.as_number().unwrap_or(default)
    }

    /// Integer view, truncating toward zero.
    pub fn as_int(&self) -> Option<i64> {
        self.as_number().map(|n| n.trunc() as i64)
    }

    /// Truthiness used by `IF`, `AND`, `OR` and `NOT`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Empty | Self::Error(_) => false,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(s) => {
                if let Some(n) = self.as_number() {
                    return n != 0.0;
                }
                let lowered = s.trim().to_ascii_lowercase();
                !(lowered.is_empty() || lowered == "false" || lowered == "0")
            }
        }
    }

    /// Loose equality: numeric when both sides are numeric, textual otherwise.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }
}

fn format_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Number(n) => format_number(*n, f),
            Self::Text(s) => f.write_str(s),
            Self::Error(reason) => write!(f, "{ERROR_PREFIX}{reason}"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Number(if b { 1.0 } else { 0.0 })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                serializer.serialize_i64(*n as i64)
            }
            Self::Number(n) => serializer.serialize_f64(*n),
            other => serializer.collect_str(other),
        }
    }
}

struct ValueVisitor;

impl Visitor<'_> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, number, boolean or null")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        if v.is_empty() {
            return Ok(Value::Empty);
        }
        match v.strip_prefix(ERROR_PREFIX) {
            Some(reason) => Ok(Value::Error(reason.to_string())),
            None => Ok(Value::Text(v.to_string())),
        }
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Empty)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Empty)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_input_classifies_text() {
        assert_eq!(Value::from_input("42"), Value::Number(42.0));
        assert_eq!(Value::from_input(" 1.5 "), Value::Number(1.5));
        assert_eq!(Value::from_input("abc"), Value::text("abc"));
        assert_eq!(Value::from_input(""), Value::Empty);
        assert_eq!(Value::from_input("!ERR:CYCLE"), Value::error("CYCLE"));
    }

    #[test]
    fn test_display_drops_integral_fraction() {
        assert_eq!(Value::Number(11.0).to_string(), "11");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::error("CYCLE").to_string(), "!ERR:CYCLE");
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Number(2.0).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::text("false").is_truthy());
        assert!(!Value::text("0").is_truthy());
        assert!(!Value::text(" ").is_truthy());
        assert!(Value::text("yes").is_truthy());
        assert!(!Value::Empty.is_truthy());
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::text("5").loose_eq(&Value::Number(5.0)));
        assert!(Value::text("a").loose_eq(&Value::text("a")));
        assert!(!Value::text("a").loose_eq(&Value::Number(0.0)));
    }

    #[test]
    fn test_json_round_trip() {
        let values = vec![
            Value::Empty,
            Value::Number(3.0),
            Value::Number(0.25),
            Value::text("hi"),
            Value::error("X"),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"["",3,0.25,"hi","!ERR:X"]"#);
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }
}
