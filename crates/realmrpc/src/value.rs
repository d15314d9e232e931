//! # Wire values
//!
//! The closed set of values that may cross a realm boundary. There is no
//! variant for a live object: host objects travel as `Remote` ids and guest
//! functions as `Callback` ids.

use std::collections::BTreeMap;
use std::fmt;

use crate::buffer::Bitmap;
use crate::buffer::Buffer;
use crate::buffer::BufferView;

/// Opaque id naming a host instance or a guest callback.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefId(pub u64);

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref-{}", self.0)
    }
}

/// A structured-clone value.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Buffer(Buffer),
    View(BufferView),
    Bitmap(Bitmap),
    /// Stand-in for a host-side capability object.
    Remote(RefId),
    /// Stand-in for a guest-side function.
    Callback(RefId),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Buffer(_) => "buffer",
            Self::View(_) => "view",
            Self::Bitmap(_) => "bitmap",
            Self::Remote(_) => "remote-ref",
            Self::Callback(_) => "callback-ref",
        }
    }
}

/// Deep equality. Binary payloads compare by content, not by handle.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Buffer(a), Self::Buffer(b)) => a.ptr_eq(b) || a.to_vec() == b.to_vec(),
            (Self::View(a), Self::View(b)) => a.to_vec() == b.to_vec(),
            (Self::Bitmap(a), Self::Bitmap(b)) => a.ptr_eq(b) || a.data() == b.data(),
            (Self::Remote(a), Self::Remote(b)) => a == b,
            (Self::Callback(a), Self::Callback(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<Buffer> for Value {
    fn from(v: Buffer) -> Self {
        Self::Buffer(v)
    }
}
