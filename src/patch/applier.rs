// DIFF / EXTRA / SEEK command loop.
//
// Each triple reads a DIFF length and that many patch bytes which are
// added (mod 256) to old-image bytes, an EXTRA length and that many bytes
// copied verbatim, then a signed SEEK applied to the old-image cursor.
// The loop runs until the new-image cursor has covered the logical image
// plus the reserved range it skipped. Both cursors are physical addresses;
// every transfer goes through `layout::translate`.

use log::{debug, error, info};

use super::PatchError;
use super::layout::{FirmwareTarget, ImageLayout, ReservedRange, SeekTracker, translate};
use super::reader::PatchReader;
use crate::partition::{PartitionRead, PartitionWrite, ResidentImage};

/// Scratch chunk used for old-image reads and new-image writes.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Largest single read/write issued while processing a DIFF or EXTRA run.
    pub chunk_size: usize,
    pub layout: ImageLayout,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            layout: ImageLayout::default(),
        }
    }
}

/// Counters collected while applying one patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Bytes handed to the new-image partition.
    pub bytes_written: u64,
    pub diff_bytes: u64,
    pub extra_bytes: u64,
    /// Complete DIFF/EXTRA/SEEK triples executed.
    pub triples: u64,
    /// Transfers that jumped over the reserved range.
    pub reserved_skips: u64,
    /// Decompressed patch bytes produced by the session, header included.
    pub patch_bytes: u64,
}

/// Physical bound of the new image: the logical size plus the reserved
/// range when the image actually reaches into it.
pub(crate) fn new_image_extent(image_size: i32, reserved: Option<ReservedRange>) -> i64 {
    let size = i64::from(image_size);
    match reserved {
        Some(range) if (range.start() as i64) < size => size + range.len() as i64,
        Some(range) => {
            debug!("reserved range {range} lies beyond the {size}-byte image");
            size
        }
        None => size,
    }
}

fn check_run(kind: &str, ctrl: i32, new_pos: i64, extent: i64) -> Result<usize, PatchError> {
    if ctrl < 0 {
        let msg = format!("negative {kind} length {ctrl}");
        error!("{msg}");
        return Err(PatchError::CorruptPatch(msg));
    }
    if new_pos + i64::from(ctrl) > extent {
        let msg = format!("{kind} of {ctrl} bytes at {new_pos:#x} overruns image end {extent:#x}");
        error!("{msg}");
        return Err(PatchError::CorruptPatch(msg));
    }
    Ok(ctrl as usize)
}

struct Applier<'o, O: ?Sized, W> {
    old: &'o O,
    new: &'o mut W,
    reserved: Option<ReservedRange>,
    tracker: SeekTracker,
    old_pos: i64,
    new_pos: i64,
    old_buf: Vec<u8>,
    patch_buf: Vec<u8>,
    stats: ApplyStats,
}

impl<O: ResidentImage + ?Sized, W: PartitionWrite> Applier<'_, O, W> {
    /// Copy `n` old-image bytes at `old_pos + offset` into `old_buf`.
    fn read_old(&mut self, offset: usize, n: usize) -> Result<(), PatchError> {
        let t = translate(self.reserved, &mut self.old_pos, offset, n);
        if t.skipped {
            self.tracker.mark_crossed();
            self.stats.reserved_skips += 1;
        }
        for piece in t.pieces() {
            let src = u64::try_from(piece.address)
                .ok()
                .and_then(|address| self.old.resident(address, piece.len))
                .ok_or_else(|| {
                    error!(
                        "old image read of {} bytes at {:#x} is out of range",
                        piece.len, piece.address
                    );
                    PatchError::OldImageOutOfRange {
                        address: piece.address,
                        len: piece.len,
                    }
                })?;
            self.old_buf[piece.offset..piece.offset + piece.len].copy_from_slice(src);
        }
        Ok(())
    }

    /// Write `patch_buf[..n]` at `new_pos + offset`.
    fn write_new(&mut self, offset: usize, n: usize) -> Result<(), PatchError> {
        let t = translate(self.reserved, &mut self.new_pos, offset, n);
        if t.skipped {
            self.stats.reserved_skips += 1;
        }
        for piece in t.pieces() {
            let data = &self.patch_buf[piece.offset..piece.offset + piece.len];
            // Cursors start at 0 and only grow on the write side.
            self.new.write(piece.address as u64, data).inspect_err(|e| {
                error!("new image write at {:#x} failed: {e}", piece.address);
            })?;
            self.stats.bytes_written += piece.len as u64;
        }
        Ok(())
    }

    fn diff<P: PartitionRead>(
        &mut self,
        reader: &mut PatchReader<'_, P>,
        len: usize,
    ) -> Result<(), PatchError> {
        let chunk = self.patch_buf.len();
        let mut i = 0;
        while i < len {
            let n = chunk.min(len - i);
            self.read_old(i, n)?;
            reader.read_exact(&mut self.patch_buf[..n])?;
            for (byte, old) in self.patch_buf[..n].iter_mut().zip(&self.old_buf[..n]) {
                *byte = byte.wrapping_add(*old);
            }
            self.write_new(i, n)?;
            i += n;
        }
        self.old_pos += len as i64;
        self.new_pos += len as i64;
        self.stats.diff_bytes += len as u64;
        Ok(())
    }

    fn extra<P: PartitionRead>(
        &mut self,
        reader: &mut PatchReader<'_, P>,
        len: usize,
    ) -> Result<(), PatchError> {
        let chunk = self.patch_buf.len();
        let mut i = 0;
        while i < len {
            let n = chunk.min(len - i);
            reader.read_exact(&mut self.patch_buf[..n])?;
            self.write_new(i, n)?;
            i += n;
        }
        self.new_pos += len as i64;
        self.stats.extra_bytes += len as u64;
        Ok(())
    }
}

/// Rebuild the new image from `old` and the patch behind `reader`.
///
/// `image_size` is the logical new-image size, excluding the reserved
/// range. On success the stream has been read to its verified end and the
/// crossing state reset.
pub(crate) fn apply<P, O, W>(
    reader: &mut PatchReader<'_, P>,
    old: &O,
    target: FirmwareTarget,
    new: &mut W,
    image_size: i32,
    options: &ApplyOptions,
) -> Result<ApplyStats, PatchError>
where
    P: PartitionRead,
    O: ResidentImage + ?Sized,
    W: PartitionWrite,
{
    if image_size < 0 {
        error!("invalid image size {image_size}");
        return Err(PatchError::InvalidImageSize(image_size));
    }
    if options.chunk_size == 0 {
        return Err(PatchError::InvalidConfig("chunk size must be non-zero".into()));
    }
    let old_pos = i64::try_from(options.layout.old_base)
        .map_err(|_| PatchError::InvalidConfig("old image base exceeds i64".into()))?;

    let reserved = options.layout.reserved_for(target);
    let extent = new_image_extent(image_size, reserved);

    let mut applier = Applier {
        old,
        new,
        reserved,
        tracker: SeekTracker::new(reserved),
        old_pos,
        new_pos: 0,
        old_buf: vec![0; options.chunk_size],
        patch_buf: vec![0; options.chunk_size],
        stats: ApplyStats::default(),
    };

    while applier.new_pos < extent {
        let ctrl = reader.read_signed_length()?;
        let diff_len = check_run("diff", ctrl, applier.new_pos, extent)?;
        applier.diff(reader, diff_len)?;

        let ctrl = reader.read_signed_length()?;
        let extra_len = check_run("extra", ctrl, applier.new_pos, extent)?;
        applier.extra(reader, extra_len)?;

        let seek = reader.read_signed_length()?;
        applier.old_pos = applier.tracker.seek(applier.old_pos, seek);

        applier.stats.triples += 1;
        debug!(
            "triple {}: diff={diff_len} extra={extra_len} seek={seek} old={:#x} new={:#x}",
            applier.stats.triples, applier.old_pos, applier.new_pos
        );
    }

    applier.tracker.reset();
    reader.finish_stream()?;
    reader.end_decoder();

    let mut stats = applier.stats;
    stats.patch_bytes = reader.decoded_bytes();
    info!(
        "{target} image rebuilt: {} bytes written in {} triples",
        stats.bytes_written, stats.triples
    );
    Ok(stats)
}
