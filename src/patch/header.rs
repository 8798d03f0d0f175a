// Patch payload header: three sign-magnitude lengths.

use std::fmt;

use super::PatchError;
use super::signed::{decode_signed_length, encode_signed_length};

/// `[ctrl_len][data_len][new_size]` at the start of every decompressed patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchHeader {
    /// Bytes of command triples (12 per triple).
    pub ctrl_len: i32,
    /// Bytes of DIFF plus EXTRA payload.
    pub data_len: i32,
    /// Logical size of the rebuilt image.
    pub new_size: i32,
}

impl PatchHeader {
    pub const SIZE: usize = 12;

    pub fn parse(bytes: &[u8; Self::SIZE]) -> Self {
        let field = |i: usize| decode_signed_length([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            ctrl_len: field(0),
            data_len: field(4),
            new_size: field(8),
        }
    }

    /// Serialised form; `None` if a field is `i32::MIN`.
    pub fn to_bytes(&self) -> Option<[u8; Self::SIZE]> {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&encode_signed_length(self.ctrl_len)?);
        out[4..8].copy_from_slice(&encode_signed_length(self.data_len)?);
        out[8..12].copy_from_slice(&encode_signed_length(self.new_size)?);
        Some(out)
    }

    pub fn is_valid(&self) -> bool {
        self.ctrl_len >= 0 && self.data_len >= 0 && self.new_size > 0
    }

    pub fn validate(self) -> Result<Self, PatchError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(PatchError::InvalidHeader(self))
        }
    }

    /// Number of command triples announced by `ctrl_len`.
    pub fn triple_count(&self) -> usize {
        usize::try_from(self.ctrl_len).unwrap_or(0) / 12
    }
}

impl fmt::Display for PatchHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ctrl={} data={} new_size={}",
            self.ctrl_len, self.data_len, self.new_size
        )
    }
}
