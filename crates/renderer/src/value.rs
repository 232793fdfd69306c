use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime-tagged value used for uniform contents and attribute arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
    Seq(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    Str,
    Seq,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Int => f.write_str("int"),
            ValueKind::Float => f.write_str("float"),
            ValueKind::Str => f.write_str("string"),
            ValueKind::Seq => f.write_str("sequence"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("expected {expected} value, found {found}")]
    TypeMismatch {
        expected: ValueKind,
        found: ValueKind,
    },
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Seq(_) => ValueKind::Seq,
        }
    }

    /// Numeric values coerce between int and float; anything else is a mismatch.
    pub fn as_int(&self) -> Result<i32, ValueError> {
        match self {
            Value::Int(value) => Ok(*value),
            Value::Float(value) => Ok(*value as i32),
            other => Err(other.mismatch(ValueKind::Int)),
        }
    }

    pub fn as_float(&self) -> Result<f32, ValueError> {
        match self {
            Value::Int(value) => Ok(*value as f32),
            Value::Float(value) => Ok(*value),
            other => Err(other.mismatch(ValueKind::Float)),
        }
    }

    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::Str(value) => Ok(value),
            other => Err(other.mismatch(ValueKind::Str)),
        }
    }

    pub fn as_seq(&self) -> Result<&[Value], ValueError> {
        match self {
            Value::Seq(values) => Ok(values),
            other => Err(other.mismatch(ValueKind::Seq)),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    fn mismatch(&self, expected: ValueKind) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:?}"),
            Value::Str(value) => f.write_str(value),
            Value::Seq(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Seq(values)
    }
}
