use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::types::NodeId;

pub const TYPE_BOOL: u8 = 0;
pub const TYPE_STR: u8 = 1;
pub const TYPE_I8: u8 = 2;
pub const TYPE_I16: u8 = 3;
pub const TYPE_I32: u8 = 4;
pub const TYPE_I64: u8 = 5;
pub const TYPE_F32: u8 = 6;
pub const TYPE_F64: u8 = 7;
pub const TYPE_LIST: u8 = 8;
pub const TYPE_NODE_REF: u8 = 9;
pub const TYPE_NULL: u8 = 10;
pub const TYPE_CHAR: u8 = 11;
pub const TYPE_ARRAY_I8: u8 = 12;
pub const TYPE_ARRAY_I16: u8 = 13;
pub const TYPE_ARRAY_I32: u8 = 14;
pub const TYPE_ARRAY_I64: u8 = 15;
pub const TYPE_ARRAY_F32: u8 = 16;
pub const TYPE_ARRAY_F64: u8 = 17;
pub const TYPE_ARRAY_CHAR: u8 = 18;
pub const TYPE_ARRAY_BOOL: u8 = 19;
pub const TYPE_ARRAY_OBJECT: u8 = 20;

/// Property value with its declared type.
///
/// Numeric widths are kept distinct: `I8(1)` and `I64(1)` are different values
/// and survive a round trip through storage as written.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absent / unknown value. Inside adjacency arrays it marks a removed edge.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Shared string.
    Str(Arc<str>),
    /// 8-bit signed integer.
    I8(i8),
    /// 16-bit signed integer.
    I16(i16),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Unicode scalar value.
    Char(char),
    /// Heterogeneous list (legacy multi-valued property).
    List(Vec<Value>),
    /// Reference to another node.
    NodeRef(NodeId),
    /// Boolean array.
    BoolArray(Vec<bool>),
    /// 8-bit integer array.
    I8Array(Vec<i8>),
    /// 16-bit integer array.
    I16Array(Vec<i16>),
    /// 32-bit integer array.
    I32Array(Vec<i32>),
    /// 64-bit integer array.
    I64Array(Vec<i64>),
    /// 32-bit float array.
    F32Array(Vec<f32>),
    /// 64-bit float array.
    F64Array(Vec<f64>),
    /// Character array.
    CharArray(Vec<char>),
    /// Array of arbitrary values.
    Array(Vec<Value>),
}

impl Value {
    /// Wire tag for this value.
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Null => TYPE_NULL,
            Value::Bool(_) => TYPE_BOOL,
            Value::Str(_) => TYPE_STR,
            Value::I8(_) => TYPE_I8,
            Value::I16(_) => TYPE_I16,
            Value::I32(_) => TYPE_I32,
            Value::I64(_) => TYPE_I64,
            Value::F32(_) => TYPE_F32,
            Value::F64(_) => TYPE_F64,
            Value::Char(_) => TYPE_CHAR,
            Value::List(_) => TYPE_LIST,
            Value::NodeRef(_) => TYPE_NODE_REF,
            Value::BoolArray(_) => TYPE_ARRAY_BOOL,
            Value::I8Array(_) => TYPE_ARRAY_I8,
            Value::I16Array(_) => TYPE_ARRAY_I16,
            Value::I32Array(_) => TYPE_ARRAY_I32,
            Value::I64Array(_) => TYPE_ARRAY_I64,
            Value::F32Array(_) => TYPE_ARRAY_F32,
            Value::F64Array(_) => TYPE_ARRAY_F64,
            Value::CharArray(_) => TYPE_ARRAY_CHAR,
            Value::Array(_) => TYPE_ARRAY_OBJECT,
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the referenced node, if this is a node reference.
    pub fn as_node_ref(&self) -> Option<NodeId> {
        match self {
            Value::NodeRef(id) => Some(*id),
            _ => None,
        }
    }

    /// Widens any integer variant to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(*v as i64),
            Value::I16(v) => Some(*v as i64),
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Approximate heap footprint beyond the enum itself.
    pub fn heap_bytes(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::List(items) | Value::Array(items) => items
                .iter()
                .map(|v| mem::size_of::<Value>() + v.heap_bytes())
                .sum(),
            Value::BoolArray(v) => v.len(),
            Value::I8Array(v) => v.len(),
            Value::I16Array(v) => v.len() * 2,
            Value::I32Array(v) => v.len() * 4,
            Value::F32Array(v) => v.len() * 4,
            Value::CharArray(v) => v.len() * 4,
            Value::I64Array(v) => v.len() * 8,
            Value::F64Array(v) => v.len() * 8,
            _ => 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}i8"),
            Value::I16(v) => write!(f, "{v}i16"),
            Value::I32(v) => write!(f, "{v}i32"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}f32"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "'{v}'"),
            Value::NodeRef(id) => write!(f, "node({id})"),
            Value::List(items) => write!(f, "list(len={})", items.len()),
            Value::Array(items) => write!(f, "array(len={})", items.len()),
            Value::BoolArray(v) => write!(f, "bool[{}]", v.len()),
            Value::I8Array(v) => write!(f, "i8[{}]", v.len()),
            Value::I16Array(v) => write!(f, "i16[{}]", v.len()),
            Value::I32Array(v) => write!(f, "i32[{}]", v.len()),
            Value::I64Array(v) => write!(f, "i64[{}]", v.len()),
            Value::F32Array(v) => write!(f, "f32[{}]", v.len()),
            Value::F64Array(v) => write!(f, "f64[{}]", v.len()),
            Value::CharArray(v) => write!(f, "char[{}]", v.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Value::Str(value)
    }
}

impl From<i8> for Value {
    fn from(value: i8) -> Self {
        Value::I8(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Value::I16(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::F32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<char> for Value {
    fn from(value: char) -> Self {
        Value::Char(value)
    }
}

impl From<NodeId> for Value {
    fn from(value: NodeId) -> Self {
        Value::NodeRef(value)
    }
}
