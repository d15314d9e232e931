//! # Live values
//!
//! What host and guest code actually hold. The data variants mirror
//! [`realmrpc::Value`]; the live variants ([`Capability`], [`RemoteObject`],
//! [`Function`]) only ever cross the boundary as ids.

use std::collections::BTreeMap;

use realmrpc::Bitmap;
use realmrpc::Buffer;
use realmrpc::BufferView;

use crate::capability::Capability;
use crate::function::Function;
use crate::guest::RemoteObject;

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
    /// A host object exposed to the guest by reference.
    Capability(Capability),
    /// The guest's proxy for a host capability.
    Remote(RemoteObject),
    Function(Function),
}

impl Value {
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_capability(&self) -> Option<&Capability> {
        match self {
            Self::Capability(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteObject> {
        match self {
            Self::Remote(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

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
            Self::Capability(_) => "capability",
            Self::Remote(_) => "remote",
            Self::Function(_) => "function",
        }
    }
}

/// Deep equality on data; identity on live variants.
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
            (Self::Capability(a), Self::Capability(b)) => a.ptr_eq(b),
            (Self::Remote(a), Self::Remote(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::Null
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

impl From<Capability> for Value {
    fn from(v: Capability) -> Self {
        Self::Capability(v)
    }
}

impl From<Function> for Value {
    fn from(v: Function) -> Self {
        Self::Function(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
