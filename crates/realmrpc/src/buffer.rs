//! # Binary payloads
//!
//! Buffers and bitmaps are shared handles, the way a script realm sees them:
//! cloning a `Buffer` clones the handle, not the bytes. Moving the bytes to
//! another realm *detaches* every handle to the source, which is what makes a
//! transfer zero-copy.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

/// Locks a mutex, ignoring poisoning. The guarded data is plain bytes and is
/// valid in every state a panicking holder could leave it in.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A shared, detachable byte buffer.
#[derive(Clone)]
pub struct Buffer {
    bytes: Arc<Mutex<Option<Vec<u8>>>>,
}

impl Buffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes: Arc::new(Mutex::new(Some(bytes))) }
    }

    /// Number of bytes, or zero once detached.
    pub fn len(&self) -> usize {
        lock(&self.bytes).as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_detached(&self) -> bool {
        lock(&self.bytes).is_none()
    }

    /// Copies the current contents out. A detached buffer reads as empty.
    pub fn to_vec(&self) -> Vec<u8> {
        lock(&self.bytes).clone().unwrap_or_default()
    }

    /// Runs `f` over the bytes without copying them.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = lock(&self.bytes);
        f(guard.as_deref().unwrap_or(&[]))
    }

    /// Takes the bytes out, leaving every handle to this buffer detached.
    pub(crate) fn detach(&self) -> Option<Vec<u8>> {
        lock(&self.bytes).take()
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.bytes) as *const () as usize
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match lock(&self.bytes).as_ref() {
            Some(bytes) => write!(f, "Buffer({} bytes)", bytes.len()),
            None => write!(f, "Buffer(detached)"),
        }
    }
}

/// A view onto a window of a `Buffer`.
///
/// Views are never transferred themselves; their backing buffer is.
#[derive(Clone, Debug)]
pub struct BufferView {
    buffer: Buffer,
    offset: usize,
    len: usize,
}

impl BufferView {
    /// Creates a view, or `None` if the window does not fit the buffer.
    pub fn new(buffer: Buffer, offset: usize, len: usize) -> Option<Self> {
        let end = offset.checked_add(len)?;
        if end > buffer.len() {
            return None;
        }
        Some(Self { buffer, offset, len })
    }

    /// A view spanning the whole buffer.
    pub fn full(buffer: Buffer) -> Self {
        let len = buffer.len();
        Self { buffer, offset: 0, len }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the viewed bytes out. Reads as empty once the buffer is detached.
    pub fn to_vec(&self) -> Vec<u8> {
        self.buffer.with_bytes(|bytes| {
            bytes
                .get(self.offset..self.offset + self.len)
                .map(<[u8]>::to_vec)
                .unwrap_or_default()
        })
    }

    /// Rebinds the same window onto another buffer (used by structured clone).
    pub(crate) fn rebind(&self, buffer: Buffer) -> Self {
        Self { buffer, offset: self.offset, len: self.len }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitmapData {
    pub width: u32,
    pub height: u32,
    /// RGBA8 pixels, row-major.
    pub pixels: Vec<u8>,
}

/// A shared, closable image handle (an image-bitmap stand-in).
#[derive(Clone)]
pub struct Bitmap {
    data: Arc<Mutex<Option<BitmapData>>>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::from_data(BitmapData { width, height, pixels })
    }

    pub fn from_data(data: BitmapData) -> Self {
        Self { data: Arc::new(Mutex::new(Some(data))) }
    }

    /// Pixel data, or `None` once closed.
    pub fn data(&self) -> Option<BitmapData> {
        lock(&self.data).clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.data).is_none()
    }

    /// Releases the pixels. Closing twice is harmless.
    pub fn close(&self) {
        lock(&self.data).take();
    }

    pub(crate) fn take(&self) -> Option<BitmapData> {
        lock(&self.data).take()
    }

    pub(crate) fn byte_len(&self) -> usize {
        lock(&self.data).as_ref().map_or(0, |d| d.pixels.len())
    }

    pub fn ptr_eq(&self, other: &Bitmap) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.data) as *const () as usize
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match lock(&self.data).as_ref() {
            Some(d) => write!(f, "Bitmap({}x{})", d.width, d.height),
            None => write!(f, "Bitmap(closed)"),
        }
    }
}

/// A value that can be moved across the channel instead of copied.
#[derive(Clone, Debug)]
pub enum Transferable {
    Buffer(Buffer),
    Bitmap(Bitmap),
}

impl Transferable {
    /// Identity comparison: two handles to the same storage are the same transferable.
    pub fn ptr_eq(&self, other: &Transferable) -> bool {
        match (self, other) {
            (Self::Buffer(a), Self::Buffer(b)) => a.ptr_eq(b),
            (Self::Bitmap(a), Self::Bitmap(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub(crate) fn addr(&self) -> usize {
        match self {
            Self::Buffer(b) => b.addr(),
            Self::Bitmap(b) => b.addr(),
        }
    }

    /// True once the underlying storage has been moved away or closed.
    pub fn is_neutered(&self) -> bool {
        match self {
            Self::Buffer(b) => b.is_detached(),
            Self::Bitmap(b) => b.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_is_visible_through_every_handle() {
        let a = Buffer::new(vec![1, 2, 3]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));

        assert_eq!(a.detach(), Some(vec![1, 2, 3]));
        assert!(b.is_detached());
        assert_eq!(b.len(), 0);
        assert!(b.to_vec().is_empty());
    }

    #[test]
    fn test_view_bounds() {
        let buf = Buffer::new(vec![0, 1, 2, 3, 4]);
        let view = BufferView::new(buf.clone(), 1, 3).expect("view in range");
        assert_eq!(view.to_vec(), vec![1, 2, 3]);

        assert!(BufferView::new(buf.clone(), 4, 2).is_none());
        assert!(BufferView::new(buf, usize::MAX, 2).is_none());
    }

    #[test]
    fn test_bitmap_close() {
        let bmp = Bitmap::new(1, 1, vec![255, 0, 0, 255]);
        assert_eq!(bmp.byte_len(), 4);
        bmp.close();
        assert!(bmp.is_closed());
        assert!(bmp.data().is_none());
        bmp.close();
    }
}
