//! Parameter values
//!
//! [`ParameterValue`] is the tagged union stored in the registry and in the
//! databases. Its JSON form is `{"type": "i32", "value": 1920}`; blobs are
//! written as uppercase hex.

use std::fmt;
use std::str::FromStr;

use common::serde_helpers::{hex_bytes, parse_bool_flexible};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{EconfError, Result};

/// Value type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
    Blob,
}

impl ValueType {
    pub const ALL: [ValueType; 9] = [
        ValueType::Bool,
        ValueType::I32,
        ValueType::U32,
        ValueType::I64,
        ValueType::U64,
        ValueType::F32,
        ValueType::F64,
        ValueType::String,
        ValueType::Blob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::I32 => "i32",
            ValueType::U32 => "u32",
            ValueType::I64 => "i64",
            ValueType::U64 => "u64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::String => "string",
            ValueType::Blob => "blob",
        }
    }

    /// Numeric types participate in range validation
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ValueType::Bool | ValueType::String | ValueType::Blob)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = EconfError;

    fn from_str(s: &str) -> Result<Self> {
        ValueType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EconfError::NotFound(format!("value type '{}'", s)))
    }
}

/// A typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Blob(#[serde(with = "hex_bytes")] Vec<u8>),
}

impl ParameterValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ParameterValue::Bool(_) => ValueType::Bool,
            ParameterValue::I32(_) => ValueType::I32,
            ParameterValue::U32(_) => ValueType::U32,
            ParameterValue::I64(_) => ValueType::I64,
            ParameterValue::U64(_) => ValueType::U64,
            ParameterValue::F32(_) => ValueType::F32,
            ParameterValue::F64(_) => ValueType::F64,
            ParameterValue::String(_) => ValueType::String,
            ParameterValue::Blob(_) => ValueType::Blob,
        }
    }

    /// Change detection; floats compare by bit pattern so NaN equals itself
    pub fn same_as(&self, other: &ParameterValue) -> bool {
        match (self, other) {
            (ParameterValue::F32(a), ParameterValue::F32(b)) => a.to_bits() == b.to_bits(),
            (ParameterValue::F64(a), ParameterValue::F64(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    /// Numeric view used by range checks
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ParameterValue::I32(v) => Some(f64::from(v)),
            ParameterValue::U32(v) => Some(f64::from(v)),
            ParameterValue::I64(v) => Some(v as f64),
            ParameterValue::U64(v) => Some(v as f64),
            ParameterValue::F32(v) => Some(f64::from(v)),
            ParameterValue::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Integer view used by allowed-value checks
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ParameterValue::I32(v) => Some(i64::from(v)),
            ParameterValue::U32(v) => Some(i64::from(v)),
            ParameterValue::I64(v) => Some(v),
            ParameterValue::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Untagged JSON form, used for exports
    pub fn to_plain_json(&self) -> JsonValue {
        match self {
            ParameterValue::Bool(v) => JsonValue::from(*v),
            ParameterValue::I32(v) => JsonValue::from(*v),
            ParameterValue::U32(v) => JsonValue::from(*v),
            ParameterValue::I64(v) => JsonValue::from(*v),
            ParameterValue::U64(v) => JsonValue::from(*v),
            ParameterValue::F32(v) => JsonValue::from(f64::from(*v)),
            ParameterValue::F64(v) => JsonValue::from(*v),
            ParameterValue::String(v) => JsonValue::from(v.as_str()),
            ParameterValue::Blob(v) => JsonValue::from(common::hex::encode_upper(v)),
        }
    }

    /// Parse operator text as a value of type `ty`
    ///
    /// Booleans accept `true/false/1/0/yes/no/on/off`, blobs accept hex.
    pub fn parse_str(ty: ValueType, input: &str) -> Result<Self> {
        let parse_err = || EconfError::Parse {
            input: input.to_string(),
            expected: ty,
        };
        let t = input.trim();
        let value = match ty {
            ValueType::Bool => ParameterValue::Bool(parse_bool_flexible(t).ok_or_else(parse_err)?),
            ValueType::I32 => ParameterValue::I32(t.parse().map_err(|_| parse_err())?),
            ValueType::U32 => ParameterValue::U32(t.parse().map_err(|_| parse_err())?),
            ValueType::I64 => ParameterValue::I64(t.parse().map_err(|_| parse_err())?),
            ValueType::U64 => ParameterValue::U64(t.parse().map_err(|_| parse_err())?),
            ValueType::F32 => ParameterValue::F32(t.parse().map_err(|_| parse_err())?),
            ValueType::F64 => ParameterValue::F64(t.parse().map_err(|_| parse_err())?),
            // Strings are taken verbatim, including surrounding whitespace
            ValueType::String => ParameterValue::String(input.to_string()),
            ValueType::Blob => {
                ParameterValue::Blob(common::hex::decode(t).map_err(|_| parse_err())?)
            },
        };
        Ok(value)
    }

    /// Convert an untagged JSON value into a value of type `ty`
    ///
    /// Integers are range-checked against the target width. A tagged
    /// `{"type":..,"value":..}` object is also accepted when its type matches.
    pub fn from_json(ty: ValueType, json: &JsonValue) -> Result<Self> {
        let parse_err = || EconfError::Parse {
            input: json.to_string(),
            expected: ty,
        };

        if let JsonValue::Object(map) = json {
            if map.contains_key("type") {
                let tagged: ParameterValue =
                    serde_json::from_value(json.clone()).map_err(|_| parse_err())?;
                return if tagged.value_type() == ty {
                    Ok(tagged)
                } else {
                    Err(parse_err())
                };
            }
        }

        let value = match ty {
            ValueType::Bool => match json {
                JsonValue::Bool(b) => ParameterValue::Bool(*b),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(0) => ParameterValue::Bool(false),
                    Some(1) => ParameterValue::Bool(true),
                    _ => return Err(parse_err()),
                },
                JsonValue::String(s) => {
                    ParameterValue::Bool(parse_bool_flexible(s).ok_or_else(parse_err)?)
                },
                _ => return Err(parse_err()),
            },
            ValueType::I32 => ParameterValue::I32(
                json.as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(parse_err)?,
            ),
            ValueType::U32 => ParameterValue::U32(
                json.as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(parse_err)?,
            ),
            ValueType::I64 => ParameterValue::I64(json.as_i64().ok_or_else(parse_err)?),
            ValueType::U64 => ParameterValue::U64(json.as_u64().ok_or_else(parse_err)?),
            ValueType::F32 => ParameterValue::F32(json.as_f64().ok_or_else(parse_err)? as f32),
            ValueType::F64 => ParameterValue::F64(json.as_f64().ok_or_else(parse_err)?),
            ValueType::String => {
                ParameterValue::String(json.as_str().ok_or_else(parse_err)?.to_string())
            },
            ValueType::Blob => match json {
                JsonValue::String(s) => {
                    ParameterValue::Blob(common::hex::decode(s).map_err(|_| parse_err())?)
                },
                JsonValue::Array(items) => ParameterValue::Blob(
                    items
                        .iter()
                        .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                        .collect::<Option<Vec<u8>>>()
                        .ok_or_else(parse_err)?,
                ),
                _ => return Err(parse_err()),
            },
        };
        Ok(value)
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(v) => write!(f, "{}", v),
            ParameterValue::I32(v) => write!(f, "{}", v),
            ParameterValue::U32(v) => write!(f, "{}", v),
            ParameterValue::I64(v) => write!(f, "{}", v),
            ParameterValue::U64(v) => write!(f, "{}", v),
            ParameterValue::F32(v) => write!(f, "{}", v),
            ParameterValue::F64(v) => write!(f, "{}", v),
            ParameterValue::String(v) => f.write_str(v),
            ParameterValue::Blob(v) => f.write_str(&common::hex::encode_upper(v)),
        }
    }
}

/// Rust types that map onto exactly one [`ValueType`]
///
/// Backs the generic `get_as` / `set_as` accessors and the generated typed
/// accessors.
pub trait ParameterType: Sized {
    const VALUE_TYPE: ValueType;

    fn into_value(self) -> ParameterValue;

    fn from_value(value: ParameterValue) -> Option<Self>;
}

macro_rules! impl_parameter_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ParameterType for $ty {
                const VALUE_TYPE: ValueType = ValueType::$variant;

                fn into_value(self) -> ParameterValue {
                    ParameterValue::$variant(self)
                }

                fn from_value(value: ParameterValue) -> Option<Self> {
                    match value {
                        ParameterValue::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for ParameterValue {
                fn from(v: $ty) -> Self {
                    ParameterValue::$variant(v)
                }
            }
        )*
    };
}

impl_parameter_type! {
    bool => Bool,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
    Vec<u8> => Blob,
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::String(v.to_string())
    }
}
