use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn empty_map() -> Self {
        Self::Map(BTreeMap::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
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

    /// Script truthiness: `null`, `false`, `0`, `NaN` and `""` are falsy,
    /// every array and map is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(value) => *value,
            Self::Number(value) => *value != 0.0 && !value.is_nan(),
            Self::String(value) => !value.is_empty(),
            Self::Array(_) | Self::Map(_) => true,
        }
    }

    /// Numeric coercion used by arithmetic and ordering operators.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Bool(value) => {
                if *value {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Number(value) => *value,
            Self::String(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Self::Array(_) | Self::Map(_) => f64::NAN,
        }
    }

    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in parse_path(path) {
            current = match current {
                Self::Map(entries) => entries.get(segment)?,
                Self::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Writes `value` at `path`, creating intermediate maps. Fails when an
    /// intermediate segment holds a non-map value.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<Option<Value>, String> {
        let segments = parse_path(path);
        if segments.is_empty() {
            return Err(format!("invalid path \"{}\"", path));
        }
        assign_nested_path(self, &segments, value)
    }

    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        let segments = parse_path(path);
        let (last, parents) = segments.split_last()?;
        let mut current = self;
        for segment in parents {
            current = match current {
                Self::Map(entries) => entries.get_mut(*segment)?,
                _ => return None,
            };
        }
        match current {
            Self::Map(entries) => entries.remove(*last),
            _ => None,
        }
    }
}

pub fn parse_path(path: &str) -> Vec<&str> {
    path.split('.')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn assign_nested_path(
    target: &mut Value,
    path: &[&str],
    value: Value,
) -> Result<Option<Value>, String> {
    if target.is_null() {
        *target = Value::empty_map();
    }
    let type_name = target.type_name();
    let Value::Map(entries) = target else {
        return Err(format!(
            "cannot write \"{}\" through a {} value",
            path.join("."),
            type_name
        ));
    };

    let head = path[0];
    if path.len() == 1 {
        return Ok(entries.insert(head.to_string(), value));
    }

    let next = entries
        .entry(head.to_string())
        .or_insert_with(Value::empty_map);
    assign_nested_path(next, &path[1..], value)
}

/// Integral numbers are written as JSON integers.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
                    serializer.serialize_i64(*value as i64)
                } else {
                    serializer.serialize_f64(*value)
                }
            }
            Self::String(value) => serializer.serialize_str(value),
            Self::Array(items) => items.serialize(serializer),
            Self::Map(entries) => entries.serialize(serializer),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{}", value),
            Self::Number(value) => {
                if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e15 {
                    write!(f, "{}", *value as i64)
                } else {
                    write!(f, "{}", value)
                }
            }
            Self::String(value) => f.write_str(value),
            Self::Array(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Self::Map(_) => f.write_str("[object]"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self::Map(value)
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn set_path_creates_intermediate_maps() {
        let mut root = Value::Null;
        root.set_path("vehicle.location.x", Value::from(3))
            .expect("set should pass");
        assert_eq!(root.get_path("vehicle.location.x"), Some(&Value::from(3)));
        assert!(root.get_path("vehicle.location.y").is_none());
    }

    #[test]
    fn set_path_rejects_scalar_parent() {
        let mut root = Value::Null;
        root.set_path("a", Value::from(1)).expect("set should pass");
        let error = root
            .set_path("a.b", Value::from(2))
            .expect_err("scalar parent should fail");
        assert!(error.contains("number"));
    }

    #[test]
    fn truthiness_follows_script_rules() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::empty_map().is_truthy());
    }

    #[test]
    fn deserializes_from_json() {
        let value: Value =
            serde_json::from_str(r#"{"a":[1,true,null,"x"]}"#).expect("json should parse");
        assert_eq!(
            value.get_path("a.0"),
            Some(&Value::Number(1.0)),
            "array index segments resolve"
        );
        assert_eq!(value.get_path("a.2"), Some(&Value::Null));
    }

    #[test]
    fn integral_numbers_display_without_fraction() {
        assert_eq!(Value::from(5).to_string(), "5");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
    }

    #[test]
    fn integral_numbers_serialize_as_json_integers() {
        let mut entries = BTreeMap::new();
        entries.insert("count".to_string(), Value::from(6));
        entries.insert("ratio".to_string(), Value::from(0.5));
        let json = serde_json::to_string(&Value::Map(entries)).expect("serialize");
        assert_eq!(json, r#"{"count":6,"ratio":0.5}"#);
    }
}
