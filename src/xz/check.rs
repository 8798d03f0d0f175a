// Integrity checks, variable-length integers and the block/index hashes.

use sha2::{Digest, Sha256};

use super::XzError;

/// Integrity check type declared in the stream flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    None,
    Crc32,
    Crc64,
    Sha256,
    /// A check ID reserved by the format (2, 3, 5..=9, 11..=15).
    Reserved(u8),
}

/// Size in bytes of the check field for each check ID.
const CHECK_SIZES: [usize; 16] = [0, 4, 4, 4, 8, 8, 8, 16, 16, 16, 32, 32, 32, 64, 64, 64];

/// Highest check ID the format can express.
pub(crate) const CHECK_ID_MAX: u8 = 15;

impl CheckKind {
    /// Map a check ID to its kind; `None` if the ID is out of range.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::None),
            1 => Some(Self::Crc32),
            4 => Some(Self::Crc64),
            10 => Some(Self::Sha256),
            id if id <= CHECK_ID_MAX => Some(Self::Reserved(id)),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Crc32 => 1,
            Self::Crc64 => 4,
            Self::Sha256 => 10,
            Self::Reserved(id) => id,
        }
    }

    /// Size of the check field following each block.
    pub fn size(self) -> usize {
        CHECK_SIZES[usize::from(self.id() & CHECK_ID_MAX)]
    }

    /// Whether this decoder verifies the check (otherwise it is skipped).
    pub fn is_supported(self) -> bool {
        matches!(self, Self::None | Self::Crc32 | Self::Sha256)
    }
}

// ---------------------------------------------------------------------------
// Running check over block output
// ---------------------------------------------------------------------------

pub(crate) enum CheckState {
    None,
    Crc32(crc32fast::Hasher),
    Sha256(Sha256),
    Skip,
}

impl CheckState {
    pub(crate) fn new(kind: CheckKind) -> Self {
        match kind {
            CheckKind::None => Self::None,
            CheckKind::Crc32 => Self::Crc32(crc32fast::Hasher::new()),
            CheckKind::Sha256 => Self::Sha256(Sha256::new()),
            CheckKind::Crc64 | CheckKind::Reserved(_) => Self::Skip,
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::None | Self::Skip => {}
        }
    }

    /// Compare the accumulated value against the stored check field and
    /// restart accumulation for the next block.
    pub(crate) fn verify(&mut self, stored: &[u8]) -> bool {
        match self {
            Self::Crc32(h) => {
                let value = std::mem::take(h).finalize();
                value.to_le_bytes() == stored
            }
            Self::Sha256(h) => h.finalize_reset().as_slice() == stored,
            Self::None | Self::Skip => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Block / index record hash
// ---------------------------------------------------------------------------

/// Running summary of (unpadded size, uncompressed size) records.
///
/// Accumulated once from the decoded blocks and once from the index; the
/// two must agree for the index to be accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RecordHash {
    pub unpadded: u64,
    pub uncompressed: u64,
    pub crc32: u32,
}

impl RecordHash {
    pub(crate) fn mix(&mut self) {
        let mut h = crc32fast::Hasher::new_with_initial(self.crc32);
        h.update(&self.unpadded.to_le_bytes());
        h.update(&self.uncompressed.to_le_bytes());
        self.crc32 = h.finalize();
    }
}

// ---------------------------------------------------------------------------
// Variable-length integers
// ---------------------------------------------------------------------------

/// Maximum encoded length of a VLI.
pub(crate) const VLI_BYTES_MAX: u32 = 9;

/// Incremental VLI decoder that can stop and resume at any byte.
#[derive(Debug, Default)]
pub(crate) struct Vli {
    value: u64,
    shift: u32,
}

pub(crate) enum VliProgress {
    Pending,
    Done(u64),
}

impl Vli {
    pub(crate) fn reset(&mut self) {
        self.value = 0;
        self.shift = 0;
    }

    /// Consume bytes from `input[*pos..]` until the integer completes.
    pub(crate) fn decode(&mut self, input: &[u8], pos: &mut usize) -> Result<VliProgress, XzError> {
        if self.shift == 0 {
            self.value = 0;
        }

        while *pos < input.len() {
            let byte = input[*pos];
            *pos += 1;

            self.value |= u64::from(byte & 0x7F) << self.shift;

            if byte & 0x80 == 0 {
                // Non-minimal encodings are rejected.
                if byte == 0 && self.shift != 0 {
                    return Err(XzError::Data);
                }
                self.shift = 0;
                return Ok(VliProgress::Done(self.value));
            }

            self.shift += 7;
            if self.shift == 7 * VLI_BYTES_MAX {
                return Err(XzError::Data);
            }
        }

        Ok(VliProgress::Pending)
    }
}

/// Append `value` as a VLI.
#[cfg(feature = "encoder")]
pub(crate) fn write_vli(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}
