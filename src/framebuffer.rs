//! The shadow pixel buffer and the memory-mapped framebuffer device.
//!
//! All drawing goes to the in-process [`PixelBuffer`] first; a flush copies
//! the whole shadow into the device mapping in one shot. There are no
//! partial flushes, and a scroll is a single overlap-safe `move_region`
//! inside the shadow.

use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::ptr;
use std::slice;

use rustix::mm::{self, MapFlags, MsyncFlags, ProtFlags};
use tracing::debug;

use crate::error::FbtermError;
use crate::geometry::ScreenGeometry;

/// An in-memory byte buffer sized to one screen, with a write position.
///
/// Writes are truncated at the buffer end; they never grow the buffer and
/// never cross its bound.
pub struct PixelBuffer {
    bytes: Vec<u8>,
    position: usize,
}

impl PixelBuffer {
    pub fn new(len: usize) -> Self {
        Self { bytes: vec![0; len], position: 0 }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Set the write position. Clamped to the buffer length.
    pub fn seek(&mut self, offset: usize) {
        self.position = offset.min(self.bytes.len());
    }

    /// Write `content` at the current position, advancing it. Bytes past the
    /// end of the buffer are dropped.
    pub fn write(&mut self, content: &[u8]) {
        let avail = self.bytes.len() - self.position;
        let n = content.len().min(avail);
        self.bytes[self.position..self.position + n].copy_from_slice(&content[..n]);
        self.position += n;
    }

    /// Copy `count` bytes from `src` to `dest` with memmove semantics
    /// (overlapping ranges are safe). Out-of-range counts are truncated.
    pub fn move_region(&mut self, dest: usize, src: usize, count: usize) {
        let len = self.bytes.len();
        if dest >= len || src >= len {
            return;
        }
        let count = count.min(len - src).min(len - dest);
        self.bytes.copy_within(src..src + count, dest);
    }

    /// Write `pattern` repeated `repeat` times starting at `offset`,
    /// truncated at the buffer end.
    pub fn fill(&mut self, offset: usize, pattern: &[u8], repeat: usize) {
        if pattern.is_empty() || offset >= self.bytes.len() {
            return;
        }
        let end = (offset + pattern.len() * repeat).min(self.bytes.len());
        for chunk in self.bytes[offset..end].chunks_mut(pattern.len()) {
            chunk.copy_from_slice(&pattern[..chunk.len()]);
        }
        self.position = end;
    }
}

/// A shared memory mapping of the framebuffer device.
///
/// Written only during [`DeviceBuffer::flush`] and the caret overlay
/// ([`DeviceBuffer::write_at`]); unmapped on drop.
pub struct DeviceBuffer {
    // Keeps the device node open for the lifetime of the mapping.
    _file: File,
    map: *mut c_void,
    len: usize,
}

impl DeviceBuffer {
    /// Open the framebuffer device read-write and map one screen of it.
    pub fn open(path: &Path, geometry: &ScreenGeometry) -> Result<Self, FbtermError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| FbtermError::DeviceMap(format!("{}: {e}", path.display())))?;
        let len = geometry.total_bytes();
        // SAFETY: mapping a fresh region chosen by the kernel; `file` stays
        // open for as long as the mapping exists.
        let map = unsafe {
            mm::mmap(
                ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &file,
                0,
            )
        }
        .map_err(|e| FbtermError::DeviceMap(format!("mmap {}: {e}", path.display())))?;
        debug!(len, "mapped framebuffer device {}", path.display());
        Ok(Self { _file: file, map, len })
    }

    fn as_slice_mut(&mut self) -> &mut [u8] {
        // SAFETY: `map` points at `len` mapped writable bytes and we hold the
        // only handle to the mapping.
        unsafe { slice::from_raw_parts_mut(self.map.cast::<u8>(), self.len) }
    }

    /// Copy the full shadow buffer into the device mapping.
    pub fn flush(&mut self, shadow: &PixelBuffer) {
        let n = self.len.min(shadow.len());
        self.as_slice_mut()[..n].copy_from_slice(&shadow.as_bytes()[..n]);
    }

    /// Write raw bytes directly into the mapping (the cursor caret overlay).
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        let len = self.len;
        if offset >= len {
            return;
        }
        let n = bytes.len().min(len - offset);
        self.as_slice_mut()[offset..offset + n].copy_from_slice(&bytes[..n]);
    }

    /// Push the mapping out to the device. Some fb drivers reject msync on
    /// char-device mappings; the write-through mapping is already visible, so
    /// failures are ignored.
    pub fn sync(&mut self) {
        // SAFETY: `map`/`len` describe a live mapping owned by self.
        let _ = unsafe { mm::msync(self.map, self.len, MsyncFlags::ASYNC) };
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        // SAFETY: `map` was returned by mmap with length `len` and is not
        // referenced after this point.
        unsafe {
            let _ = mm::munmap(self.map, self.len);
        }
    }
}
