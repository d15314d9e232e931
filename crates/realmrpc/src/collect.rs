//! # Transferable collection
//!
//! Finds the binary payloads in a value tree so the channel can move them by
//! ownership instead of copying them into the cloned message.
//!
//! The walk descends into arrays and objects only. Each buffer or bitmap is
//! reported once, in first-seen order; a view contributes its backing buffer.
//! Reference stand-ins and primitives are leaves.

use crate::buffer::Transferable;
use crate::message::Message;
use crate::value::Value;

/// Collects the transferables reachable from `value`.
pub fn collect(value: &Value) -> Vec<Transferable> {
    let mut out = Vec::new();
    walk(value, &mut out);
    out
}

/// Collects the transferables reachable from every value a message carries.
pub fn collect_message(message: &Message) -> Vec<Transferable> {
    let mut out = Vec::new();
    for value in message.values() {
        walk(value, &mut out);
    }
    out
}

fn walk(value: &Value, out: &mut Vec<Transferable>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| walk(item, out)),
        Value::Object(fields) => fields.values().for_each(|field| walk(field, out)),
        Value::Buffer(buffer) => push_unique(out, Transferable::Buffer(buffer.clone())),
        Value::View(view) => push_unique(out, Transferable::Buffer(view.buffer().clone())),
        Value::Bitmap(bitmap) => push_unique(out, Transferable::Bitmap(bitmap.clone())),
        Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Remote(_)
        | Value::Callback(_) => {}
    }
}

fn push_unique(out: &mut Vec<Transferable>, item: Transferable) {
    if !out.iter().any(|seen| seen.ptr_eq(&item)) {
        out.push(item);
    }
}
