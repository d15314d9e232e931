//! # Structured clone
//!
//! Produces the receiving realm's copy of a message. Buffers named in the
//! transfer list are moved (the sender's handles detach); every other binary
//! payload is copied. Handle identity inside one message is preserved: a
//! buffer that appears twice arrives as one buffer referenced twice.
//!
//! Validation runs before anything is detached, so a rejected clone leaves the
//! sender's values untouched.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::buffer::Bitmap;
use crate::buffer::Buffer;
use crate::buffer::Transferable;
use crate::message::Message;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A buffer in the message or transfer list was already moved away.
    DetachedBuffer,
    /// A bitmap in the message or transfer list was already closed.
    ClosedBitmap,
    /// The same transferable was listed twice.
    DuplicateTransfer,
    /// The bytes that would be copied exceed the channel limit.
    PayloadTooLarge { limit: usize, size: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DetachedBuffer => write!(f, "an ArrayBuffer is detached and could not be cloned"),
            Self::ClosedBitmap => write!(f, "an ImageBitmap is closed and could not be cloned"),
            Self::DuplicateTransfer => write!(f, "a transferable is listed more than once"),
            Self::PayloadTooLarge { limit, size } => {
                write!(f, "payload of {} bytes exceeds clone limit of {} bytes", size, limit)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Clones `message` for delivery, moving everything in `transfer`.
pub fn structured_clone(
    message: Message,
    transfer: &[Transferable],
    max_clone_bytes: Option<usize>,
) -> Result<Message> {
    let moved = validate_transfer(transfer)?;

    let mut copied = 0usize;
    let mut seen = HashSet::new();
    for value in message.values() {
        measure(value, &moved, &mut seen, &mut copied)?;
    }
    if let Some(limit) = max_clone_bytes {
        if copied > limit {
            return Err(Error::PayloadTooLarge { limit, size: copied });
        }
    }

    let mut cloner = Cloner { moved, buffers: HashMap::new(), bitmaps: HashMap::new() };
    let cloned = message.try_map_values(|value| cloner.clone_value(value))?;

    // Listed but unreferenced transferables are still neutered on the sending side.
    for item in transfer {
        match item {
            Transferable::Buffer(b) if !cloner.buffers.contains_key(&b.addr()) => drop(b.detach()),
            Transferable::Bitmap(b) if !cloner.bitmaps.contains_key(&b.addr()) => b.close(),
            _ => {}
        }
    }
    Ok(cloned)
}

fn validate_transfer(transfer: &[Transferable]) -> Result<HashSet<usize>> {
    let mut moved = HashSet::with_capacity(transfer.len());
    for item in transfer {
        if item.is_neutered() {
            return Err(match item {
                Transferable::Buffer(_) => Error::DetachedBuffer,
                Transferable::Bitmap(_) => Error::ClosedBitmap,
            });
        }
        if !moved.insert(item.addr()) {
            return Err(Error::DuplicateTransfer);
        }
    }
    Ok(moved)
}

/// Checks every payload is still live and tallies the bytes that will be copied.
fn measure(value: &Value, moved: &HashSet<usize>, seen: &mut HashSet<usize>, copied: &mut usize) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                measure(item, moved, seen, copied)?;
            }
        }
        Value::Object(fields) => {
            for field in fields.values() {
                measure(field, moved, seen, copied)?;
            }
        }
        Value::Buffer(buffer) => measure_buffer(buffer, moved, seen, copied)?,
        Value::View(view) => measure_buffer(view.buffer(), moved, seen, copied)?,
        Value::Bitmap(bitmap) => {
            if bitmap.is_closed() {
                return Err(Error::ClosedBitmap);
            }
            if !moved.contains(&bitmap.addr()) && seen.insert(bitmap.addr()) {
                *copied = copied.saturating_add(bitmap.byte_len());
            }
        }
        _ => {}
    }
    Ok(())
}

fn measure_buffer(buffer: &Buffer, moved: &HashSet<usize>, seen: &mut HashSet<usize>, copied: &mut usize) -> Result<()> {
    if buffer.is_detached() {
        return Err(Error::DetachedBuffer);
    }
    if !moved.contains(&buffer.addr()) && seen.insert(buffer.addr()) {
        *copied = copied.saturating_add(buffer.len());
    }
    Ok(())
}

struct Cloner {
    moved: HashSet<usize>,
    buffers: HashMap<usize, Buffer>,
    bitmaps: HashMap<usize, Bitmap>,
}

impl Cloner {
    fn clone_value(&mut self, value: Value) -> Result<Value> {
        Ok(match value {
            Value::Array(items) => Value::Array(
                items.into_iter().map(|item| self.clone_value(item)).collect::<Result<_>>()?,
            ),
            Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(key, field)| Ok((key, self.clone_value(field)?)))
                    .collect::<Result<_>>()?,
            ),
            Value::Buffer(buffer) => Value::Buffer(self.clone_buffer(&buffer)?),
            Value::View(view) => {
                let buffer = self.clone_buffer(view.buffer())?;
                Value::View(view.rebind(buffer))
            }
            Value::Bitmap(bitmap) => Value::Bitmap(self.clone_bitmap(&bitmap)?),
            other => other,
        })
    }

    fn clone_buffer(&mut self, buffer: &Buffer) -> Result<Buffer> {
        if let Some(done) = self.buffers.get(&buffer.addr()) {
            return Ok(done.clone());
        }
        let bytes = if self.moved.contains(&buffer.addr()) {
            buffer.detach().ok_or(Error::DetachedBuffer)?
        } else {
            if buffer.is_detached() {
                return Err(Error::DetachedBuffer);
            }
            buffer.to_vec()
        };
        let fresh = Buffer::new(bytes);
        self.buffers.insert(buffer.addr(), fresh.clone());
        Ok(fresh)
    }

    fn clone_bitmap(&mut self, bitmap: &Bitmap) -> Result<Bitmap> {
        if let Some(done) = self.bitmaps.get(&bitmap.addr()) {
            return Ok(done.clone());
        }
        let data = if self.moved.contains(&bitmap.addr()) {
            bitmap.take()
        } else {
            bitmap.data()
        };
        let fresh = Bitmap::from_data(data.ok_or(Error::ClosedBitmap)?);
        self.bitmaps.insert(bitmap.addr(), fresh.clone());
        Ok(fresh)
    }
}
