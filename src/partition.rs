// Partition access contracts and in-memory implementations.
//
// Flash partitions are flat, byte-addressed regions. The patch pipeline
// needs three capabilities from them:
//   - reading the compressed patch (PartitionRead)
//   - writing the rebuilt image (PartitionWrite)
//   - direct, memory-mapped access to the running image (ResidentImage)

/// Partition I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("access of {len} bytes at offset {offset:#x} exceeds partition size {size:#x}")]
    OutOfRange { offset: u64, len: usize, size: u64 },
    #[error("partition driver error: {0}")]
    Driver(String),
}

/// Read access to a partition.
pub trait PartitionRead {
    /// Fill `buf` from `offset`. Partial reads are errors.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), PartitionError>;

    /// Partition size in bytes.
    fn size(&self) -> u64;
}

/// Write access to a partition.
pub trait PartitionWrite {
    /// Program `data` at `offset`.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), PartitionError>;
}

/// Memory-mapped view of an image that can be read without driver calls.
pub trait ResidentImage {
    /// The `len` bytes starting at physical `address`, if mapped.
    fn resident(&self, address: u64, len: usize) -> Option<&[u8]>;
}

fn check_range(offset: u64, len: usize, size: u64) -> Result<usize, PartitionError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(offset as usize),
        _ => Err(PartitionError::OutOfRange { offset, len, size }),
    }
}

// ---------------------------------------------------------------------------
// Slices
// ---------------------------------------------------------------------------

impl PartitionRead for &[u8] {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), PartitionError> {
        let start = check_range(offset, buf.len(), self.len() as u64)?;
        buf.copy_from_slice(&self[start..start + buf.len()]);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl ResidentImage for [u8] {
    fn resident(&self, address: u64, len: usize) -> Option<&[u8]> {
        let start = usize::try_from(address).ok()?;
        self.get(start..start.checked_add(len)?)
    }
}

impl ResidentImage for Vec<u8> {
    fn resident(&self, address: u64, len: usize) -> Option<&[u8]> {
        self.as_slice().resident(address, len)
    }
}

/// An image mapped at a non-zero base address.
#[derive(Debug, Clone, Copy)]
pub struct MappedImage<'a> {
    base: u64,
    bytes: &'a [u8],
}

impl<'a> MappedImage<'a> {
    pub fn new(base: u64, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    pub fn base(&self) -> u64 {
        self.base
    }
}

impl ResidentImage for MappedImage<'_> {
    fn resident(&self, address: u64, len: usize) -> Option<&[u8]> {
        self.bytes.resident(address.checked_sub(self.base)?, len)
    }
}

// ---------------------------------------------------------------------------
// Vec-backed partition
// ---------------------------------------------------------------------------

/// Flash erase value.
pub const ERASED: u8 = 0xFF;

/// Fixed-size, RAM-backed partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPartition {
    data: Vec<u8>,
}

impl MemoryPartition {
    /// A partition of `size` erased bytes.
    pub fn erased(size: usize) -> Self {
        Self {
            data: vec![ERASED; size],
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Reset `[offset, offset + len)` to the erase value.
    pub fn erase(&mut self, offset: u64, len: usize) -> Result<(), PartitionError> {
        let start = check_range(offset, len, self.data.len() as u64)?;
        self.data[start..start + len].fill(ERASED);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl PartitionRead for MemoryPartition {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), PartitionError> {
        self.data.as_slice().read(offset, buf)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl PartitionWrite for MemoryPartition {
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), PartitionError> {
        let start = check_range(offset, data.len(), self.data.len() as u64)?;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl ResidentImage for MemoryPartition {
    fn resident(&self, address: u64, len: usize) -> Option<&[u8]> {
        self.data.resident(address, len)
    }
}

impl<P: PartitionRead + ?Sized> PartitionRead for &mut P {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), PartitionError> {
        (**self).read(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_read_bounds() {
        let data = [1u8, 2, 3, 4];
        let mut part: &[u8] = &data;
        let mut buf = [0u8; 2];
        part.read(2, &mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
        assert!(matches!(
            part.read(3, &mut buf),
            Err(PartitionError::OutOfRange { offset: 3, len: 2, size: 4 })
        ));
    }

    #[test]
    fn memory_partition_write_and_erase() {
        let mut part = MemoryPartition::erased(8);
        part.write(2, &[0xAA, 0xBB]).unwrap();
        assert_eq!(part.as_slice(), &[0xFF, 0xFF, 0xAA, 0xBB, 0xFF, 0xFF, 0xFF, 0xFF]);
        part.erase(0, 4).unwrap();
        assert!(part.as_slice().iter().all(|&b| b == ERASED));
        assert!(part.write(7, &[0, 0]).is_err());
        assert!(part.erase(u64::MAX, 1).is_err());
    }

    #[test]
    fn mapped_image_translates_base() {
        let bytes = [10u8, 11, 12, 13];
        let image = MappedImage::new(0x1000, &bytes);
        assert_eq!(image.resident(0x1001, 2), Some(&bytes[1..3]));
        assert_eq!(image.resident(0x0FFF, 1), None);
        assert_eq!(image.resident(0x1003, 2), None);
    }
}
