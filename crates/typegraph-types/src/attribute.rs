//! Attribute specifications and primitive coercion.
//!
//! Each [`AttributeKind`] knows how to turn a native [`Value`] into the
//! primitive form stored in the graph (`to_primitive`) and back
//! (`to_native`). Both directions pass `Null` through untouched.

use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValueError;
use crate::value::{Properties, Value};
use crate::TYPE_TAG;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeKind {
    Bool,
    Integer,
    Float,
    String,
    Uuid,
    Decimal,
    DateTime,
    Tuple,
    Choice(Vec<String>),
}

impl AttributeKind {
    /// The type tag written on attribute nodes.
    pub fn tag(&self) -> &'static str {
        match self {
            AttributeKind::Bool => "Bool",
            AttributeKind::Integer => "Integer",
            AttributeKind::Float => "Float",
            AttributeKind::String => "String",
            AttributeKind::Uuid => "Uuid",
            AttributeKind::Decimal => "Decimal",
            AttributeKind::DateTime => "DateTime",
            AttributeKind::Tuple => "Tuple",
            AttributeKind::Choice(_) => "Choice",
        }
    }

    /// Inverse of [`AttributeKind::tag`]. `Choice` needs its choice list
    /// which lives in a separate property.
    pub fn from_tag(tag: &str, choices: Option<Vec<String>>) -> Option<Self> {
        let kind = match tag {
            "Bool" => AttributeKind::Bool,
            "Integer" => AttributeKind::Integer,
            "Float" => AttributeKind::Float,
            "String" => AttributeKind::String,
            "Uuid" => AttributeKind::Uuid,
            "Decimal" => AttributeKind::Decimal,
            "DateTime" => AttributeKind::DateTime,
            "Tuple" => AttributeKind::Tuple,
            "Choice" => AttributeKind::Choice(choices.unwrap_or_default()),
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_tag(tag: &str) -> bool {
        AttributeKind::from_tag(tag, None).is_some()
    }

    pub fn to_primitive(&self, value: &Value) -> Result<Value, ValueError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match (self, value) {
            (AttributeKind::Bool, Value::Bool(_))
            | (AttributeKind::Integer, Value::Int(_))
            | (AttributeKind::Float, Value::Float(_))
            | (AttributeKind::String, Value::String(_)) => Ok(value.clone()),
            (AttributeKind::Float, Value::Int(i)) => Ok(Value::Float(*i as f64)),
            (AttributeKind::Uuid, Value::Uuid(u)) => Ok(Value::String(u.hyphenated().to_string())),
            (AttributeKind::Uuid, Value::String(s)) => parse_uuid(s)
                .map(|u| Value::String(u.hyphenated().to_string())),
            (AttributeKind::Decimal, Value::Decimal(d)) => Ok(Value::String(d.clone())),
            (AttributeKind::Decimal, Value::Int(i)) => Ok(Value::String(i.to_string())),
            (AttributeKind::Decimal, Value::String(s)) => parse_decimal(s).map(Value::String),
            (AttributeKind::DateTime, Value::DateTime(dt)) => Ok(Value::String(dt.to_rfc3339())),
            (AttributeKind::DateTime, Value::String(s)) => {
                parse_datetime(s).map(|dt| Value::String(dt.to_rfc3339()))
            }
            (AttributeKind::Tuple, Value::List(items)) => items
                .iter()
                .map(|item| {
                    if item.is_primitive() {
                        Ok(item.clone())
                    } else {
                        Err(ValueError::WrongKind {
                            expected: "primitive",
                            actual: item.kind_name(),
                        })
                    }
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (AttributeKind::Choice(choices), Value::String(s)) => {
                check_choice(choices, s).map(|_| value.clone())
            }
            (kind, other) => Err(ValueError::WrongKind {
                expected: kind.tag(),
                actual: other.kind_name(),
            }),
        }
    }

    pub fn to_native(&self, value: &Value) -> Result<Value, ValueError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match (self, value) {
            (AttributeKind::Bool, Value::Bool(_))
            | (AttributeKind::Integer, Value::Int(_))
            | (AttributeKind::Float, Value::Float(_))
            | (AttributeKind::String, Value::String(_))
            | (AttributeKind::Uuid, Value::Uuid(_))
            | (AttributeKind::DateTime, Value::DateTime(_))
            | (AttributeKind::Decimal, Value::Decimal(_))
            | (AttributeKind::Tuple, Value::List(_)) => Ok(value.clone()),
            (AttributeKind::Float, Value::Int(i)) => Ok(Value::Float(*i as f64)),
            (AttributeKind::Uuid, Value::String(s)) => parse_uuid(s).map(Value::Uuid),
            (AttributeKind::Decimal, Value::String(s)) => parse_decimal(s).map(Value::Decimal),
            (AttributeKind::Decimal, Value::Int(i)) => Ok(Value::Decimal(i.to_string())),
            (AttributeKind::DateTime, Value::String(s)) => parse_datetime(s).map(Value::DateTime),
            (AttributeKind::Choice(choices), Value::String(s)) => {
                check_choice(choices, s).map(|_| value.clone())
            }
            (kind, other) => Err(ValueError::WrongKind {
                expected: kind.tag(),
                actual: other.kind_name(),
            }),
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, ValueError> {
    Uuid::parse_str(s).map_err(|_| ValueError::Parse {
        kind: "uuid",
        text: s.to_string(),
    })
}

fn parse_datetime(s: &str) -> Result<chrono::DateTime<chrono::FixedOffset>, ValueError> {
    DateTime::parse_from_rfc3339(s).map_err(|_| ValueError::Parse {
        kind: "datetime",
        text: s.to_string(),
    })
}

/// Validate decimal text: optional sign, digits, optional fraction.
fn parse_decimal(s: &str) -> Result<String, ValueError> {
    let err = || ValueError::Parse {
        kind: "decimal",
        text: s.to_string(),
    };
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || frac_part.is_some_and(|f| !all_digits(f)) {
        return Err(err());
    }
    Ok(s.strip_prefix('+').unwrap_or(s).to_string())
}

fn check_choice(choices: &[String], s: &str) -> Result<(), ValueError> {
    if choices.iter().any(|c| c == s) {
        Ok(())
    } else {
        Err(ValueError::InvalidChoice {
            value: s.to_string(),
            choices: choices.to_vec(),
        })
    }
}

// ============================================================================
// Attribute specs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub kind: AttributeKind,
    pub unique: bool,
    pub required: bool,
    /// Native default. `Null` means "no default" (uuid attributes then
    /// generate a fresh value on construction).
    pub default: Value,
}

impl AttributeSpec {
    pub fn new(kind: AttributeKind) -> Self {
        Self {
            kind,
            unique: false,
            required: false,
            default: Value::Null,
        }
    }

    pub fn bool() -> Self {
        Self::new(AttributeKind::Bool)
    }

    pub fn integer() -> Self {
        Self::new(AttributeKind::Integer)
    }

    pub fn float() -> Self {
        Self::new(AttributeKind::Float)
    }

    pub fn string() -> Self {
        Self::new(AttributeKind::String)
    }

    pub fn uuid() -> Self {
        Self::new(AttributeKind::Uuid)
    }

    pub fn decimal() -> Self {
        Self::new(AttributeKind::Decimal)
    }

    pub fn datetime() -> Self {
        Self::new(AttributeKind::DateTime)
    }

    pub fn tuple() -> Self {
        Self::new(AttributeKind::Tuple)
    }

    pub fn choice<S: Into<String>>(choices: impl IntoIterator<Item = S>) -> Self {
        Self::new(AttributeKind::Choice(
            choices.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    /// Value given to a freshly constructed instance.
    pub fn initial_value(&self) -> Value {
        match (&self.kind, &self.default) {
            (AttributeKind::Uuid, Value::Null) => Value::Uuid(Uuid::new_v4()),
            (_, default) => default.clone(),
        }
    }

    /// Name and kind equality, which is what reparenting compares.
    pub fn same_shape(&self, other: &AttributeSpec) -> bool {
        self.kind == other.kind
    }

    /// Property map of the attribute declaration node.
    pub fn to_properties(&self, name: &str) -> Result<Properties, ValueError> {
        let mut props = Properties::new();
        props.insert(TYPE_TAG.to_string(), Value::from(self.kind.tag()));
        props.insert("name".to_string(), Value::from(name));
        props.insert("unique".to_string(), Value::Bool(self.unique));
        props.insert("required".to_string(), Value::Bool(self.required));
        let default = self.kind.to_primitive(&self.default)?;
        if !default.is_null() {
            props.insert("default".to_string(), default);
        }
        if let AttributeKind::Choice(choices) = &self.kind {
            props.insert("choices".to_string(), Value::from(choices.clone()));
        }
        Ok(props)
    }

    /// Rebuild a spec from an attribute declaration node. Returns the
    /// attribute name alongside the `AttributeSpec`.
    pub fn from_properties(props: &Properties) -> Option<(String, AttributeSpec)> {
        let tag = props.get(TYPE_TAG)?.as_str()?;
        let choices = match props.get("choices") {
            Some(Value::List(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        };
        let kind = AttributeKind::from_tag(tag, choices)?;
        let name = props.get("name")?.as_str()?.to_string();
        let flag = |key: &str| props.get(key).and_then(Value::as_bool).unwrap_or(false);
        let default = props
            .get("default")
            .map(|v| kind.to_native(v).unwrap_or(Value::Null))
            .unwrap_or(Value::Null);
        Some((
            name,
            AttributeSpec {
                unique: flag("unique"),
                required: flag("required"),
                default,
                kind,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_passes_through_both_directions() {
        for kind in [AttributeKind::Uuid, AttributeKind::Decimal, AttributeKind::Bool] {
            assert_eq!(kind.to_primitive(&Value::Null).unwrap(), Value::Null);
            assert_eq!(kind.to_native(&Value::Null).unwrap(), Value::Null);
        }
    }

    #[test]
    fn uuid_travels_as_hyphenated_string() {
        let id = Uuid::new_v4();
        let prim = AttributeKind::Uuid.to_primitive(&Value::Uuid(id)).unwrap();
        assert_eq!(prim, Value::String(id.hyphenated().to_string()));
        assert_eq!(AttributeKind::Uuid.to_native(&prim).unwrap(), Value::Uuid(id));
    }

    #[test]
    fn decimal_validation() {
        assert!(AttributeKind::Decimal.to_native(&Value::from("-12.50")).is_ok());
        assert!(AttributeKind::Decimal.to_native(&Value::from("1.")).is_err());
        assert!(AttributeKind::Decimal.to_native(&Value::from("abc")).is_err());
    }

    #[test]
    fn datetime_round_trips_through_rfc3339() {
        let text = "2024-03-01T12:30:00+02:00";
        let native = AttributeKind::DateTime.to_native(&Value::from(text)).unwrap();
        let prim = AttributeKind::DateTime.to_primitive(&native).unwrap();
        assert_eq!(prim, Value::from(text));
    }

    #[test]
    fn choice_rejects_unknown_members() {
        let kind = AttributeKind::Choice(vec!["a".into(), "b".into()]);
        assert!(kind.to_primitive(&Value::from("a")).is_ok());
        assert!(matches!(
            kind.to_primitive(&Value::from("c")),
            Err(ValueError::InvalidChoice { .. })
        ));
    }

    #[test]
    fn wrong_kind_is_a_value_error() {
        let err = AttributeKind::Integer
            .to_primitive(&Value::from("seven"))
            .unwrap_err();
        assert_eq!(
            err,
            ValueError::WrongKind {
                expected: "Integer",
                actual: "string"
            }
        );
    }

    #[test]
    fn uuid_attributes_generate_fresh_defaults() {
        let spec = AttributeSpec::uuid();
        let a = spec.initial_value();
        let b = spec.initial_value();
        assert!(matches!(a, Value::Uuid(_)));
        assert_ne!(a, b);
        assert_eq!(spec.default, Value::Null);
    }

    #[test]
    fn declaration_properties_round_trip() {
        let spec = AttributeSpec::choice(["x", "y"]).unique().with_default("x");
        let props = spec.to_properties("mode").unwrap();
        let (name, back) = AttributeSpec::from_properties(&props).unwrap();
        assert_eq!(name, "mode");
        assert_eq!(back, spec);
    }
}
