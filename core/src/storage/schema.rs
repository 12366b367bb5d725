//! Column types, values and the fixed-width row codec

use crate::error::{PineError, PineResult};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Name of the synthetic primary key column every table starts with.
pub const ROW_ID_COLUMN: &str = "row_id";

/// Largest string a STRING column can hold, in bytes. The length prefix is one byte.
pub const MAX_STRING_CAPACITY: usize = 255;

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Int,
    Float,
    Bool,
    String,
}

impl DataType {
    /// Bytes occupied by a value of this type, excluding any null flag.
    pub fn payload_width(self, capacity: usize) -> usize {
        match self {
            DataType::Int | DataType::Float => 8,
            DataType::Bool => 1,
            DataType::String => 1 + capacity,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int => "INT",
            DataType::Float => "FLOAT",
            DataType::Bool => "BOOL",
            DataType::String => "STRING",
        };
        f.write_str(name)
    }
}

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOL",
            Value::Int(_) => "INT",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub size_in_bytes: usize,
}

fn default_nullable() -> bool {
    true
}

fn default_capacity() -> usize {
    MAX_STRING_CAPACITY
}

impl Column {
    /// Create an optional, nullable column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let mut column = Self {
            name: name.into(),
            data_type,
            required: false,
            nullable: true,
            default_value: None,
            capacity: MAX_STRING_CAPACITY,
            size_in_bytes: 0,
        };
        column.size_in_bytes = column.computed_size();
        column
    }

    /// The synthetic row id column
    pub fn row_id() -> Self {
        Column::new(ROW_ID_COLUMN, DataType::Int).required().not_null()
    }

    /// Insert must supply a value
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Reject NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self.size_in_bytes = self.computed_size();
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Maximum string length in bytes (STRING columns only)
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self.size_in_bytes = self.computed_size();
        self
    }

    /// Width of the field on disk, including the null flag of nullable columns.
    pub fn computed_size(&self) -> usize {
        usize::from(self.nullable) + self.data_type.payload_width(self.capacity)
    }

    /// Check a value against this column and normalize it for encoding.
    /// INT values widen to FLOAT for FLOAT columns.
    pub fn check(&self, value: Value) -> PineResult<Value> {
        let value = match (self.data_type, value) {
            (_, Value::Null) => {
                if !self.nullable {
                    return Err(PineError::validation(&self.name, "NULL in non-nullable column"));
                }
                Value::Null
            }
            (DataType::Int, v @ Value::Int(_)) => v,
            (DataType::Float, Value::Int(i)) => Value::Float(i as f64),
            (DataType::Float, v @ Value::Float(_)) => v,
            (DataType::Bool, v @ Value::Bool(_)) => v,
            (DataType::String, Value::String(s)) => {
                if s.len() > self.capacity {
                    return Err(PineError::validation(
                        &self.name,
                        format!("string of {} bytes exceeds capacity {}", s.len(), self.capacity),
                    ));
                }
                Value::String(s)
            }
            (expected, other) => {
                return Err(PineError::validation(
                    &self.name,
                    format!("expected {}, got {}", expected, other.type_name()),
                ));
            }
        };
        Ok(value)
    }

    /// Value stored when an insert leaves this column out.
    pub fn resolve_missing(&self) -> PineResult<Value> {
        if self.required {
            return Err(PineError::validation(&self.name, "missing required value"));
        }
        match &self.default_value {
            Some(default) => self.check(default.clone()),
            None => self.check(Value::Null),
        }
    }

    /// Append the encoded field. `value` must already have passed [`Column::check`].
    pub fn encode(&self, value: &Value, out: &mut BytesMut) {
        if self.nullable {
            out.put_u8(u8::from(!value.is_null()));
        }

        match value {
            Value::Null => out.put_bytes(0, self.data_type.payload_width(self.capacity)),
            Value::Int(i) => out.put_i64(*i),
            Value::Float(x) => out.put_f64(*x),
            Value::Bool(b) => out.put_u8(u8::from(*b)),
            Value::String(s) => {
                out.put_u8(s.len() as u8);
                out.put_slice(s.as_bytes());
                out.put_bytes(0, self.capacity - s.len());
            }
        }
    }

    /// Decode a field slice of exactly `size_in_bytes` bytes.
    pub fn decode(&self, mut field: &[u8]) -> PineResult<Value> {
        if field.len() != self.size_in_bytes {
            return Err(corrupt_field(
                &self.name,
                format!("expected {} bytes, found {}", self.size_in_bytes, field.len()),
            ));
        }

        if self.nullable && field.get_u8() == 0 {
            return Ok(Value::Null);
        }

        let value = match self.data_type {
            DataType::Int => Value::Int(field.get_i64()),
            DataType::Float => Value::Float(field.get_f64()),
            DataType::Bool => match field.get_u8() {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(corrupt_field(&self.name, format!("bool byte {}", other))),
            },
            DataType::String => {
                let len = field.get_u8() as usize;
                if len > self.capacity {
                    return Err(corrupt_field(
                        &self.name,
                        format!("string length {} exceeds capacity {}", len, self.capacity),
                    ));
                }
                let text = std::str::from_utf8(&field[..len])
                    .map_err(|e| corrupt_field(&self.name, e.to_string()))?;
                Value::String(text.to_string())
            }
        };
        Ok(value)
    }
}

fn corrupt_field(column: &str, reason: String) -> PineError {
    PineError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("corrupt field '{}': {}", column, reason),
    ))
}

/// Validate user-supplied columns before the row id column is prepended.
pub fn validate_columns(columns: &[Column]) -> PineResult<()> {
    if columns.is_empty() {
        return Err(PineError::InvalidInput(
            "a table needs at least one column".into(),
        ));
    }

    let mut seen = HashSet::new();
    for column in columns {
        if column.name.is_empty() {
            return Err(PineError::InvalidInput("column names cannot be empty".into()));
        }
        if column.name == ROW_ID_COLUMN {
            return Err(PineError::validation(ROW_ID_COLUMN, "column name is reserved"));
        }
        if !seen.insert(column.name.as_str()) {
            return Err(PineError::validation(&column.name, "duplicate column name"));
        }
        if column.data_type == DataType::String
            && !(1..=MAX_STRING_CAPACITY).contains(&column.capacity)
        {
            return Err(PineError::validation(
                &column.name,
                format!("string capacity must be 1..={}", MAX_STRING_CAPACITY),
            ));
        }
        if let Some(default) = &column.default_value {
            column.check(default.clone())?;
        }
    }

    Ok(())
}

/// A decoded row, values in column order with the row id first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn row_id(&self) -> Option<i64> {
        self.0.first().and_then(Value::as_int)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roundtrip(column: &Column, value: Value) -> Value {
        let mut buf = BytesMut::new();
        column.encode(&value, &mut buf);
        assert_eq!(buf.len(), column.size_in_bytes);
        column.decode(&buf).unwrap()
    }

    #[test]
    fn test_field_widths() {
        assert_eq!(Column::row_id().size_in_bytes, 8);
        assert_eq!(Column::new("a", DataType::Int).size_in_bytes, 9);
        assert_eq!(Column::new("b", DataType::Bool).not_null().size_in_bytes, 1);
        assert_eq!(Column::new("s", DataType::String).size_in_bytes, 257);
        assert_eq!(
            Column::new("s", DataType::String).not_null().with_capacity(10).size_in_bytes,
            11
        );
    }

    #[test]
    fn test_string_layout() {
        let column = Column::new("name", DataType::String).not_null().with_capacity(6);
        let mut buf = BytesMut::new();
        column.encode(&Value::from("abc"), &mut buf);

        assert_eq!(&buf[..], &[3, b'a', b'b', b'c', 0, 0, 0]);
    }

    #[test]
    fn test_null_flag() {
        let column = Column::new("score", DataType::Float);
        let mut buf = BytesMut::new();
        column.encode(&Value::Null, &mut buf);

        assert_eq!(&buf[..], &[0; 9]);
        assert_eq!(column.decode(&buf).unwrap(), Value::Null);
        assert_eq!(roundtrip(&column, Value::Float(-1.5)), Value::Float(-1.5));
    }

    #[test]
    fn test_int_is_big_endian() {
        let mut buf = BytesMut::new();
        Column::row_id().encode(&Value::Int(258), &mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_check_widens_int_to_float() {
        let column = Column::new("ratio", DataType::Float);
        assert_eq!(column.check(Value::Int(3)).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_check_rejections() {
        let strict = Column::new("n", DataType::Int).not_null();
        assert!(matches!(
            strict.check(Value::Null),
            Err(PineError::Validation { column, .. }) if column == "n"
        ));
        assert!(matches!(
            strict.check(Value::from("7")),
            Err(PineError::Validation { .. })
        ));

        let short = Column::new("code", DataType::String).with_capacity(2);
        assert!(matches!(
            short.check(Value::from("abc")),
            Err(PineError::Validation { column, .. }) if column == "code"
        ));
    }

    #[test]
    fn test_resolve_missing() {
        let required = Column::new("a", DataType::Int).required();
        assert!(required.resolve_missing().is_err());

        let defaulted = Column::new("b", DataType::Bool).with_default(true);
        assert_eq!(defaulted.resolve_missing().unwrap(), Value::Bool(true));

        let optional = Column::new("c", DataType::String);
        assert_eq!(optional.resolve_missing().unwrap(), Value::Null);

        let no_fallback = Column::new("d", DataType::Int).not_null();
        assert!(no_fallback.resolve_missing().is_err());
    }

    #[test]
    fn test_decode_rejects_bad_utf8() {
        let column = Column::new("s", DataType::String).not_null().with_capacity(2);
        let err = column.decode(&[2, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, PineError::Io(_)));
    }

    #[test]
    fn test_validate_columns() {
        assert!(validate_columns(&[]).is_err());
        assert!(validate_columns(&[Column::new("row_id", DataType::Int)]).is_err());
        assert!(
            validate_columns(&[
                Column::new("a", DataType::Int),
                Column::new("a", DataType::Bool),
            ])
            .is_err()
        );
        assert!(validate_columns(&[Column::new("s", DataType::String).with_capacity(0)]).is_err());
        assert!(
            validate_columns(&[Column::new("n", DataType::Int).with_default("x")]).is_err()
        );
        assert!(
            validate_columns(&[
                Column::new("id", DataType::Int).required().not_null(),
                Column::new("label", DataType::String).with_capacity(32),
            ])
            .is_ok()
        );
    }

    #[test]
    fn test_value_json_shape() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 4, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(4),
                Value::Float(2.5),
                Value::from("x"),
            ]
        );
    }
}
