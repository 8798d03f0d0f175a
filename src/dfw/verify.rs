// CRC32 verification of a rebuilt image.
//
// The expected value covers the image's code sections only. For an
// application image split by a reserved range that is the part below the
// range followed by the part above it, hashed as one continuous stream.

use log::{error, info};

use crate::partition::{PartitionError, PartitionRead};
use crate::patch::ReservedRange;

const CHUNK: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("CRC32 mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    Mismatch { expected: u32, actual: u32 },
    #[error(transparent)]
    Partition(#[from] PartitionError),
}

/// A physical span of the image that contributes to the CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeSection {
    pub start: u64,
    pub len: u64,
}

impl CodeSection {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// Sections occupied by an image of `image_len` logical bytes written
    /// from address 0 around `reserved`.
    pub fn split_around(image_len: u64, reserved: Option<ReservedRange>) -> Vec<Self> {
        match reserved {
            Some(range) if range.start() < image_len => {
                let lower = range.start();
                vec![
                    Self::new(0, lower),
                    Self::new(range.stop() + 1, image_len - lower),
                ]
            }
            _ => vec![Self::new(0, image_len)],
        }
    }
}

/// CRC32 (IEEE, reflected) over `sections` in order.
pub fn image_crc32<P: PartitionRead + ?Sized>(
    partition: &mut P,
    sections: &[CodeSection],
) -> Result<u32, VerifyError> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; CHUNK];
    for section in sections {
        let mut done = 0;
        while done < section.len {
            let n = (section.len - done).min(CHUNK as u64) as usize;
            partition.read(section.start + done, &mut buf[..n])?;
            hasher.update(&buf[..n]);
            done += n as u64;
        }
    }
    Ok(hasher.finalize())
}

/// Compare the image CRC with `expected`; returns the computed value.
pub fn verify_image_crc<P: PartitionRead + ?Sized>(
    partition: &mut P,
    sections: &[CodeSection],
    expected: u32,
) -> Result<u32, VerifyError> {
    let actual = image_crc32(partition, sections)?;
    if actual != expected {
        error!("CRC32 - Expected: {expected:#010X} vs {actual:#010X}");
        return Err(VerifyError::Mismatch { expected, actual });
    }
    info!("CRC32 passed ({actual:#010X})");
    Ok(actual)
}
