// Patch-decompress macro command.
//
// Record layout (5 bytes):
//   [0]    command id (7 = patch/decompress technology)
//   [1]    bits 0-3 patch technology, bits 4-7 compression technology
//   [2..5] big-endian 24-bit length of the compressed patch that follows

use std::fmt;

use super::DfwError;
use crate::partition::PartitionRead;

/// Macro command id of the patch/decompress record.
pub const PATCH_DECOMPRESS_COMMAND: u8 = 7;

/// Largest payload a 24-bit length can describe.
pub const MAX_PAYLOAD_LEN: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchTechnology {
    /// Vendor macro-command patch (not handled by this crate).
    Vendor,
    MiniBsdiff,
    Unknown(u8),
}

impl PatchTechnology {
    fn from_nibble(n: u8) -> Self {
        match n {
            0 => Self::Vendor,
            1 => Self::MiniBsdiff,
            other => Self::Unknown(other),
        }
    }

    fn nibble(self) -> u8 {
        match self {
            Self::Vendor => 0,
            Self::MiniBsdiff => 1,
            Self::Unknown(n) => n & 0x0F,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionTechnology {
    None,
    Xz,
    Unknown(u8),
}

impl CompressionTechnology {
    fn from_nibble(n: u8) -> Self {
        match n {
            0 => Self::None,
            1 => Self::Xz,
            other => Self::Unknown(other),
        }
    }

    fn nibble(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Xz => 1,
            Self::Unknown(n) => n & 0x0F,
        }
    }
}

/// Parsed patch/decompress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchCommand {
    pub patch: PatchTechnology,
    pub compression: CompressionTechnology,
    /// Compressed patch length in bytes (24 bits).
    pub length: u32,
}

impl PatchCommand {
    pub const SIZE: usize = 5;

    /// An XZ-compressed mini-bsdiff record of `length` bytes.
    pub fn xz_bsdiff(length: usize) -> Result<Self, DfwError> {
        let length = u32::try_from(length)
            .ok()
            .filter(|&len| len <= MAX_PAYLOAD_LEN)
            .ok_or(DfwError::PayloadTooLarge(length))?;
        Ok(Self {
            patch: PatchTechnology::MiniBsdiff,
            compression: CompressionTechnology::Xz,
            length,
        })
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, DfwError> {
        let Some(record) = bytes.get(..Self::SIZE) else {
            return Err(DfwError::Truncated(bytes.len()));
        };
        if record[0] != PATCH_DECOMPRESS_COMMAND {
            return Err(DfwError::UnexpectedCommand(record[0]));
        }
        Ok(Self {
            patch: PatchTechnology::from_nibble(record[1] & 0x0F),
            compression: CompressionTechnology::from_nibble(record[1] >> 4),
            length: u32::from_be_bytes([0, record[2], record[3], record[4]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let len = (self.length & MAX_PAYLOAD_LEN).to_be_bytes();
        [
            PATCH_DECOMPRESS_COMMAND,
            self.patch.nibble() | (self.compression.nibble() << 4),
            len[1],
            len[2],
            len[3],
        ]
    }

    /// Read the record stored at `offset` of `partition`.
    pub fn read_from<P: PartitionRead + ?Sized>(
        partition: &mut P,
        offset: u64,
    ) -> Result<Self, DfwError> {
        let mut record = [0u8; Self::SIZE];
        partition.read(offset, &mut record)?;
        Self::parse(&record)
    }

    /// `[start, end)` of the compressed patch for a record at `record_offset`.
    /// `end` is also where the next macro command begins.
    pub fn payload_span(&self, record_offset: u64) -> (u64, u64) {
        let start = record_offset + Self::SIZE as u64;
        (start, start + u64::from(self.length))
    }

    /// Whether this crate can apply the payload.
    pub fn is_xz_bsdiff(&self) -> bool {
        self.patch == PatchTechnology::MiniBsdiff && self.compression == CompressionTechnology::Xz
    }
}

impl fmt::Display for PatchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "patch/decompress command: {:?} patch, {:?} compression, {} bytes",
            self.patch, self.compression, self.length
        )
    }
}
