// Range decoder.
//
// `RangeDecoder` holds the coder registers that persist between calls;
// `RangeReader` pairs them with the input slice for the duration of one
// decoding pass. The input carries enough slack past `limit` that a single
// LZMA symbol can always be decoded without a bounds check failing; bytes
// past the end of the slice read as zero.

use super::buffer::XzBuffer;

pub(crate) const RC_INIT_BYTES: u32 = 5;

const RC_SHIFT_BITS: u32 = 8;
const RC_TOP_VALUE: u32 = 1 << 24;
const RC_BIT_MODEL_TOTAL_BITS: u32 = 11;
const RC_BIT_MODEL_TOTAL: u16 = 1 << RC_BIT_MODEL_TOTAL_BITS;
const RC_MOVE_BITS: u32 = 5;

/// Initial value of every probability.
pub(crate) const PROB_INIT: u16 = RC_BIT_MODEL_TOTAL / 2;

#[derive(Debug)]
pub(crate) struct RangeDecoder {
    range: u32,
    code: u32,
    init_bytes_left: u32,
}

impl RangeDecoder {
    pub(crate) fn new() -> Self {
        Self {
            range: u32::MAX,
            code: 0,
            init_bytes_left: RC_INIT_BYTES,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// Read the initial code bytes. Returns false until all five arrived.
    pub(crate) fn read_init(&mut self, b: &mut XzBuffer<'_>) -> bool {
        while self.init_bytes_left > 0 {
            if b.input_exhausted() {
                return false;
            }
            self.code = (self.code << RC_SHIFT_BITS) | u32::from(b.next_in());
            self.init_bytes_left -= 1;
        }
        true
    }

    /// A chunk must end with the code register drained to zero.
    #[inline]
    pub(crate) fn is_finished(&self) -> bool {
        self.code == 0
    }
}

pub(crate) struct RangeReader<'r, 'i> {
    rc: &'r mut RangeDecoder,
    input: &'i [u8],
    pub(crate) pos: usize,
    limit: usize,
}

impl<'r, 'i> RangeReader<'r, 'i> {
    pub(crate) fn new(rc: &'r mut RangeDecoder, input: &'i [u8], pos: usize, limit: usize) -> Self {
        Self {
            rc,
            input,
            pos,
            limit,
        }
    }

    #[inline]
    pub(crate) fn limit_exceeded(&self) -> bool {
        self.pos > self.limit
    }

    #[inline]
    pub(crate) fn normalize(&mut self) {
        if self.rc.range < RC_TOP_VALUE {
            let byte = self.input.get(self.pos).copied().unwrap_or(0);
            self.pos += 1;
            self.rc.range <<= RC_SHIFT_BITS;
            self.rc.code = (self.rc.code << RC_SHIFT_BITS) | u32::from(byte);
        }
    }

    /// Decode one bit with an adaptive probability.
    #[inline]
    pub(crate) fn bit(&mut self, prob: &mut u16) -> bool {
        self.normalize();
        let bound = (self.rc.range >> RC_BIT_MODEL_TOTAL_BITS) * u32::from(*prob);
        if self.rc.code < bound {
            self.rc.range = bound;
            *prob += (RC_BIT_MODEL_TOTAL - *prob) >> RC_MOVE_BITS;
            false
        } else {
            self.rc.range -= bound;
            self.rc.code -= bound;
            *prob -= *prob >> RC_MOVE_BITS;
            true
        }
    }

    /// Decode a bit-tree symbol; the result includes the leading one bit
    /// (callers subtract `limit`).
    #[inline]
    pub(crate) fn bittree(&mut self, probs: &mut [u16], limit: u32) -> u32 {
        let mut symbol = 1u32;
        loop {
            if self.bit(&mut probs[symbol as usize]) {
                symbol = (symbol << 1) + 1;
            } else {
                symbol <<= 1;
            }
            if symbol >= limit {
                return symbol;
            }
        }
    }

    /// Decode `limit` bits least-significant first, adding them to `dest`.
    ///
    /// `probs[0]` holds the root of the tree, so a slice of `2^limit - 1`
    /// probabilities is enough.
    #[inline]
    pub(crate) fn bittree_reverse(&mut self, probs: &mut [u16], dest: &mut u32, limit: u32) {
        let mut symbol = 1usize;
        for i in 0..limit {
            if self.bit(&mut probs[symbol - 1]) {
                symbol = (symbol << 1) + 1;
                *dest += 1 << i;
            } else {
                symbol <<= 1;
            }
        }
    }

    /// Decode `limit` bits with fixed one-half probability.
    #[inline]
    pub(crate) fn direct(&mut self, dest: &mut u32, limit: u32) {
        for _ in 0..limit {
            self.normalize();
            self.rc.range >>= 1;
            self.rc.code = self.rc.code.wrapping_sub(self.rc.range);
            let mask = 0u32.wrapping_sub(self.rc.code >> 31);
            self.rc.code = self.rc.code.wrapping_add(self.rc.range & mask);
            *dest = (*dest << 1).wrapping_add(mask.wrapping_add(1));
        }
    }
}
