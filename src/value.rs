//! Values exchanged with the caller: bound parameters and fetched columns.

/// A column or parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Json(serde_json::Value),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// What a placeholder is bound to.
///
/// `Default` and `CurrentTimestamp` are spliced into the statement text as
/// `DEFAULT` / `CURRENT_TIMESTAMP`, which forces literal execution.
/// `InOut` binds a value and marks the placeholder so it is overwritten
/// from the result row after execution.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Value(Value),
    Default,
    CurrentTimestamp,
    InOut(Value),
}

impl From<Value> for BindValue {
    fn from(v: Value) -> Self {
        BindValue::Value(v)
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident as $conv:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(<$conv>::from(v))
                }
            }

            impl From<$ty> for BindValue {
                fn from(v: $ty) -> Self {
                    BindValue::Value(Value::from(v))
                }
            }
        )*
    };
}

value_from! {
    bool => Bool as bool,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float as f64,
    String => Text as String,
    &str => Text as String,
    &[u8] => Bytes as Vec<u8>,
    serde_json::Value => Json as serde_json::Value,
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Vec<Value>> for BindValue {
    fn from(items: Vec<Value>) -> Self {
        BindValue::Value(Value::Array(items))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Option<T>> for BindValue {
    fn from(v: Option<T>) -> Self {
        BindValue::Value(Value::from(v))
    }
}
