// Sliding dictionary.
//
// In the multi-call modes the dictionary is a circular buffer: decoded
// bytes land at `pos`, and `flush()` copies `[start, pos)` out to the
// caller's window. `limit` caps how far `pos` may advance during one call
// so that a flush never overruns the caller's output space.
//
// In single-call mode the buffer covers exactly the caller's output space
// for that call and never wraps.

use super::buffer::XzBuffer;
use super::{DecodeMode, XzError};

pub(crate) struct Dictionary {
    mode: DecodeMode,
    buf: Vec<u8>,
    /// Oldest byte not yet flushed.
    start: usize,
    /// Next write position.
    pub(crate) pos: usize,
    /// How many bytes of history are valid (saturates at `end`).
    full: usize,
    /// Write limit for the current call.
    limit: usize,
    /// Usable buffer length.
    end: usize,
    /// Size declared by the block header.
    size: u32,
    /// Ceiling for multi-call modes.
    size_max: u32,
}

/// Allocate a zeroed buffer, reporting failure instead of aborting.
pub(crate) fn try_alloc(len: usize) -> Result<Vec<u8>, XzError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| XzError::Mem)?;
    buf.resize(len, 0);
    Ok(buf)
}

impl Dictionary {
    pub(crate) fn new(mode: DecodeMode, size_max: u32) -> Result<Self, XzError> {
        let buf = match mode {
            DecodeMode::Preallocated => try_alloc(size_max as usize)?,
            DecodeMode::Single | DecodeMode::Dynamic => Vec::new(),
        };
        Ok(Self {
            mode,
            buf,
            start: 0,
            pos: 0,
            full: 0,
            limit: 0,
            end: 0,
            size: 0,
            size_max,
        })
    }

    /// Apply the dictionary size declared by a block header.
    pub(crate) fn configure(&mut self, size: u32) -> Result<(), XzError> {
        self.size = size;

        if self.mode.is_multi() {
            if size > self.size_max {
                return Err(XzError::MemLimit);
            }
            self.end = size as usize;

            if self.buf.len() < self.end {
                let want = match self.mode {
                    DecodeMode::Preallocated => self.size_max as usize,
                    _ => self.end,
                };
                // Drop the old buffer first so peak usage stays at one dictionary.
                self.buf = Vec::new();
                self.buf = try_alloc(want)?;
            }
        }

        Ok(())
    }

    /// Start a fresh dictionary (LZMA2 dictionary reset).
    pub(crate) fn reset(&mut self, out_space: usize) -> Result<(), XzError> {
        if !self.mode.is_multi() {
            self.end = out_space;
            if self.buf.len() < out_space {
                self.buf = Vec::new();
                self.buf = try_alloc(out_space)?;
            }
        }
        self.start = 0;
        self.pos = 0;
        self.limit = 0;
        self.full = 0;
        Ok(())
    }

    /// Release the buffer. Safe to call repeatedly.
    pub(crate) fn release(&mut self) {
        self.buf = Vec::new();
        self.start = 0;
        self.pos = 0;
        self.limit = 0;
        self.full = 0;
        self.end = 0;
    }

    /// Allow at most `out_max` more bytes to be decoded in this call.
    #[inline]
    pub(crate) fn set_limit(&mut self, out_max: usize) {
        if self.end - self.pos <= out_max {
            self.limit = self.end;
        } else {
            self.limit = self.pos + out_max;
        }
    }

    #[inline]
    pub(crate) fn has_space(&self) -> bool {
        self.pos < self.limit
    }

    /// Byte `dist + 1` positions back, or 0 when the dictionary is empty.
    #[inline]
    pub(crate) fn get(&self, dist: u32) -> u8 {
        if self.full == 0 {
            return 0;
        }
        let dist = dist as usize;
        let offset = if dist >= self.pos {
            (self.end + self.pos).wrapping_sub(dist + 1)
        } else {
            self.pos - dist - 1
        };
        self.buf.get(offset).copied().unwrap_or(0)
    }

    #[inline]
    pub(crate) fn put(&mut self, byte: u8) {
        self.buf[self.pos] = byte;
        self.pos += 1;
        if self.full < self.pos {
            self.full = self.pos;
        }
    }

    /// Copy `*len` bytes from `dist + 1` positions back, as far as the limit
    /// allows. The remainder stays in `*len` for the next call. Returns
    /// false if the distance points outside the valid history.
    pub(crate) fn repeat(&mut self, len: &mut u32, dist: u32) -> bool {
        let dist = dist as usize;
        if dist >= self.full || dist >= self.size as usize {
            return false;
        }

        let left = (self.limit - self.pos).min(*len as usize);
        *len -= left as u32;

        let mut back = if dist >= self.pos {
            self.pos + self.end - dist - 1
        } else {
            self.pos - dist - 1
        };

        for _ in 0..left {
            self.buf[self.pos] = self.buf[back];
            self.pos += 1;
            back += 1;
            if back == self.end {
                back = 0;
            }
        }

        if self.full < self.pos {
            self.full = self.pos;
        }
        true
    }

    /// Copy an uncompressed chunk straight from input to dictionary and output.
    pub(crate) fn uncompressed(&mut self, b: &mut XzBuffer<'_>, left: &mut u32) {
        while *left > 0 && !b.input_exhausted() && !b.output_full() {
            let copy = b
                .in_avail()
                .min(b.out_avail())
                .min(self.end - self.pos)
                .min(*left as usize);
            *left -= copy as u32;

            let src = &b.input[b.in_pos..b.in_pos + copy];
            self.buf[self.pos..self.pos + copy].copy_from_slice(src);
            self.pos += copy;
            if self.full < self.pos {
                self.full = self.pos;
            }
            if self.mode.is_multi() && self.pos == self.end {
                self.pos = 0;
            }
            b.output[b.out_pos..b.out_pos + copy].copy_from_slice(src);

            self.start = self.pos;
            b.out_pos += copy;
            b.in_pos += copy;
        }
    }

    /// Move freshly decoded bytes to the caller's output. Returns the count.
    pub(crate) fn flush(&mut self, b: &mut XzBuffer<'_>) -> usize {
        let copy = self.pos - self.start;
        if copy > 0 {
            b.output[b.out_pos..b.out_pos + copy]
                .copy_from_slice(&self.buf[self.start..self.pos]);
        }
        if self.mode.is_multi() && self.pos == self.end {
            self.pos = 0;
        }
        self.start = self.pos;
        b.out_pos += copy;
        copy
    }
}
