// Read position inside the partition holding the compressed patch.

use crate::partition::{PartitionError, PartitionRead};

/// A patch-source partition plus the `[offset, end)` span still unread.
#[derive(Debug)]
pub struct PatchCursor<P> {
    partition: P,
    offset: u64,
    end: u64,
}

impl<P: PartitionRead> PatchCursor<P> {
    /// Bind `[start, end)` of `partition`.
    pub fn new(partition: P, start: u64, end: u64) -> Result<Self, PartitionError> {
        let size = partition.size();
        if start > end || end > size {
            return Err(PartitionError::OutOfRange {
                offset: start,
                len: end.saturating_sub(start) as usize,
                size,
            });
        }
        Ok(Self {
            partition,
            offset: start,
            end,
        })
    }

    /// Read up to `buf.len()` bytes, clamped to the end offset.
    ///
    /// Returns 0 once the patch span is exhausted.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, PartitionError> {
        let n = (buf.len() as u64).min(self.remaining()) as usize;
        if n > 0 {
            self.partition.read(self.offset, &mut buf[..n])?;
            self.offset += n as u64;
        }
        Ok(n)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.offset
    }

    pub fn into_inner(self) -> P {
        self.partition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_clamped_to_end() {
        let data: Vec<u8> = (0..10).collect();
        let mut cursor = PatchCursor::new(data.as_slice(), 2, 7).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(cursor.read_chunk(&mut buf).unwrap(), 4);
        assert_eq!(buf, [2, 3, 4, 5]);
        assert_eq!(cursor.read_chunk(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 6);
        assert_eq!(cursor.read_chunk(&mut buf).unwrap(), 0);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn span_must_fit_partition() {
        let data = [0u8; 8];
        assert!(PatchCursor::new(&data[..], 0, 9).is_err());
        assert!(PatchCursor::new(&data[..], 5, 4).is_err());
        assert!(PatchCursor::new(&data[..], 8, 8).is_ok());
    }
}
