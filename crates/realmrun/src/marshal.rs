//! # Marshalling
//!
//! Converts live values to wire values and back. The walk is shared; each
//! side plugs in a [`Marshaler`] that decides what its live variants become
//! and what incoming ids resolve to.
//!
//! Rules, both directions:
//! - Data passes through, recursing into arrays and objects.
//! - `Capability` -> registered `Remote(id)` (host only).
//! - `Remote(proxy)` -> `Remote(proxy.id)`, so a handle can be passed back.
//! - `Function` -> `Callback(id)`; a *new* local function is only wrapped in
//!   the argument direction.

use realmrpc::RefId;

use crate::capability::Capability;
use crate::error::Result;
use crate::function::Function;
use crate::guest::RemoteObject;
use crate::value::Value;

type Wire = realmrpc::Value;

/// Which way a value is travelling relative to the call that carries it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Call arguments: local functions become callbacks.
    Argument,
    /// Call results: local functions are rejected.
    Result,
}

/// One side's policy for live values.
pub(crate) trait Marshaler {
    fn export_capability(&self, capability: &Capability) -> Result<RefId>;
    fn export_remote(&self, remote: &RemoteObject) -> Result<RefId>;
    fn export_function(&self, function: &Function, direction: Direction) -> Result<RefId>;
    fn import_remote(&self, id: RefId) -> Result<Value>;
    fn import_callback(&self, id: RefId) -> Result<Value>;
}

pub(crate) fn encode<M: Marshaler + ?Sized>(m: &M, value: Value, direction: Direction) -> Result<Wire> {
    Ok(match value {
        Value::Null => Wire::Null,
        Value::Bool(b) => Wire::Bool(b),
        Value::Number(n) => Wire::Number(n),
        Value::String(s) => Wire::String(s),
        Value::Array(items) => Wire::Array(
            items.into_iter().map(|item| encode(m, item, direction)).collect::<Result<_>>()?,
        ),
        Value::Object(fields) => Wire::Object(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, encode(m, v, direction)?)))
                .collect::<Result<_>>()?,
        ),
        Value::Buffer(b) => Wire::Buffer(b),
        Value::View(v) => Wire::View(v),
        Value::Bitmap(b) => Wire::Bitmap(b),
        Value::Capability(c) => Wire::Remote(m.export_capability(&c)?),
        Value::Remote(r) => Wire::Remote(m.export_remote(&r)?),
        Value::Function(f) => Wire::Callback(m.export_function(&f, direction)?),
    })
}

pub(crate) fn encode_all<M: Marshaler + ?Sized>(m: &M, values: Vec<Value>, direction: Direction) -> Result<Vec<Wire>> {
    values.into_iter().map(|v| encode(m, v, direction)).collect()
}

pub(crate) fn decode<M: Marshaler + ?Sized>(m: &M, wire: Wire) -> Result<Value> {
    Ok(match wire {
        Wire::Null => Value::Null,
        Wire::Bool(b) => Value::Bool(b),
        Wire::Number(n) => Value::Number(n),
        Wire::String(s) => Value::String(s),
        Wire::Array(items) => Value::Array(
            items.into_iter().map(|item| decode(m, item)).collect::<Result<_>>()?,
        ),
        Wire::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, decode(m, v)?)))
                .collect::<Result<_>>()?,
        ),
        Wire::Buffer(b) => Value::Buffer(b),
        Wire::View(v) => Value::View(v),
        Wire::Bitmap(b) => Value::Bitmap(b),
        Wire::Remote(id) => m.import_remote(id)?,
        Wire::Callback(id) => m.import_callback(id)?,
    })
}

pub(crate) fn decode_all<M: Marshaler + ?Sized>(m: &M, wires: Vec<Wire>) -> Result<Vec<Value>> {
    wires.into_iter().map(|w| decode(m, w)).collect()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::cell::RefCell;

    use super::*;
    use crate::error::Error;

    /// Records exports and hands out sequential ids.
    #[derive(Default)]
    struct Recorder {
        next: Cell<u64>,
        exported: RefCell<Vec<&'static str>>,
    }

    impl Recorder {
        fn id(&self, what: &'static str) -> RefId {
            self.exported.borrow_mut().push(what);
            let id = self.next.get() + 1;
            self.next.set(id);
            RefId(id)
        }
    }

    impl Marshaler for Recorder {
        fn export_capability(&self, _: &Capability) -> Result<RefId> {
            Ok(self.id("capability"))
        }

        fn export_remote(&self, remote: &RemoteObject) -> Result<RefId> {
            Ok(remote.id())
        }

        fn export_function(&self, _: &Function, direction: Direction) -> Result<RefId> {
            match direction {
                Direction::Argument => Ok(self.id("function")),
                Direction::Result => Err(Error::Unserializable("function in result".into())),
            }
        }

        fn import_remote(&self, id: RefId) -> Result<Value> {
            Ok(Value::String(format!("remote {}", id.0)))
        }

        fn import_callback(&self, id: RefId) -> Result<Value> {
            Ok(Value::String(format!("callback {}", id.0)))
        }
    }

    #[test]
    fn test_data_round_trips_unchanged() {
        let m = Recorder::default();
        let value = Value::object([
            ("n", Value::Number(1.5)),
            ("list", Value::Array(vec![Value::Bool(true), Value::Null, Value::from("s")])),
        ]);
        let wire = encode(&m, value.clone(), Direction::Argument).unwrap();
        assert_eq!(decode(&m, wire).unwrap(), value);
        assert!(m.exported.borrow().is_empty());
    }

    #[test]
    fn test_nested_functions_become_callbacks_in_arguments() {
        let m = Recorder::default();
        let f = Function::new(|_| async { Ok(Value::Null) });
        let value = Value::object([("onClick", Value::Function(f))]);

        let wire = encode(&m, value, Direction::Argument).unwrap();
        let realmrpc::Value::Object(fields) = wire else { panic!("expected object") };
        assert_eq!(fields["onClick"], realmrpc::Value::Callback(RefId(1)));
    }

    #[test]
    fn test_functions_rejected_in_results() {
        let m = Recorder::default();
        let f = Function::new(|_| async { Ok(Value::Null) });
        let err = encode(&m, Value::Array(vec![Value::Function(f)]), Direction::Result).unwrap_err();
        assert!(matches!(err, Error::Unserializable(_)));
    }

    #[test]
    fn test_incoming_refs_resolved_by_marshaler() {
        let m = Recorder::default();
        let wire = realmrpc::Value::Array(vec![realmrpc::Value::Remote(RefId(7)), realmrpc::Value::Callback(RefId(8))]);
        let value = decode(&m, wire).unwrap();
        assert_eq!(value, Value::Array(vec![Value::from("remote 7"), Value::from("callback 8")]));
    }
}
