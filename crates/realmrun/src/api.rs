//! # Host API table
//!
//! Everything a plugin may reach at its root: async methods, plain constants,
//! alias namespaces (`ns.prop` standing for a differently named root method)
//! and the legacy names copied into the guest's global scope on request.
//!
//! The guest learns the shape of the table through the handshake, so the
//! table itself never crosses the boundary.

use std::collections::BTreeMap;
use std::future::Future;

use crate::capability::HostFn;
use crate::capability::Methods;
use crate::error::Error;
use crate::error::Result;
use crate::value::Value;

/// Reserved root method answered with [`Handshake`] metadata.
pub const HANDSHAKE_METHOD: &str = "__handshake";

/// Reserved root method answered with the legacy global names.
pub const LEGACY_NAMES_METHOD: &str = "__legacyNames";

#[derive(Clone, Default)]
pub struct ApiTable {
    methods: Methods,
    constants: BTreeMap<String, Value>,
    aliases: BTreeMap<String, BTreeMap<String, String>>,
    legacy: Vec<String>,
}

impl ApiTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.methods = self.methods.method(name, f);
        self
    }

    pub fn constant(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constants.insert(name.into(), value.into());
        self
    }

    /// Exposes root method `method` as `namespace.prop` in the guest.
    pub fn alias(mut self, namespace: impl Into<String>, prop: impl Into<String>, method: impl Into<String>) -> Self {
        self.aliases
            .entry(namespace.into())
            .or_default()
            .insert(prop.into(), method.into());
        self
    }

    /// Marks a method or constant as part of the legacy global surface.
    pub fn legacy(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.legacy.contains(&name) {
            self.legacy.push(name);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&HostFn> {
        self.methods.get(name)
    }

    pub(crate) fn handshake(&self) -> Handshake {
        Handshake {
            methods: self.methods.names(),
            constants: self.constants.clone(),
            aliases: self.aliases.clone(),
        }
    }

    pub(crate) fn legacy_names(&self) -> Vec<String> {
        self.legacy.clone()
    }
}

/// The API shape announced to the guest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Handshake {
    pub methods: Vec<String>,
    pub constants: BTreeMap<String, Value>,
    pub aliases: BTreeMap<String, BTreeMap<String, String>>,
}

impl Handshake {
    pub fn to_value(&self) -> Value {
        let methods = self.methods.iter().map(|m| Value::from(m.as_str())).collect();
        let aliases = self.aliases.iter().map(|(ns, props)| {
            let props = props.iter().map(|(prop, method)| (prop.clone(), Value::from(method.as_str())));
            (ns.clone(), Value::object(props))
        });

        Value::object([
            ("methods", Value::Array(methods)),
            ("constants", Value::Object(self.constants.clone())),
            ("aliases", Value::object(aliases)),
        ])
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => return Err(Error::Handshake(format!("expected object, got {}", other.type_name()))),
        };

        let methods = match fields.remove("methods") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(name) => Ok(name),
                    other => Err(Error::Handshake(format!("method name is {}", other.type_name()))),
                })
                .collect::<Result<Vec<_>>>()?,
            _ => return Err(Error::Handshake("missing method list".into())),
        };

        let constants = match fields.remove("constants") {
            Some(Value::Object(constants)) => constants,
            None => BTreeMap::new(),
            Some(other) => return Err(Error::Handshake(format!("constants are {}", other.type_name()))),
        };

        let mut aliases = BTreeMap::new();
        if let Some(Value::Object(namespaces)) = fields.remove("aliases") {
            for (ns, props) in namespaces {
                let Value::Object(props) = props else {
                    return Err(Error::Handshake(format!("alias namespace {} is not an object", ns)));
                };
                let props = props
                    .into_iter()
                    .map(|(prop, method)| match method {
                        Value::String(method) => Ok((prop, method)),
                        other => Err(Error::Handshake(format!("alias {}.{} is {}", ns, prop, other.type_name()))),
                    })
                    .collect::<Result<BTreeMap<_, _>>>()?;
                aliases.insert(ns, props);
            }
        }

        Ok(Self { methods, constants, aliases })
    }
}
