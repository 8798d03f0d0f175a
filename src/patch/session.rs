// Patch context and session lifecycle.
//
// A `PatchContext` owns the decoder and both reader windows; it is created
// once and reused for every patch. `begin` binds a patch span and returns a
// `PatchSession` that mutably borrows the context, so at most one session
// runs at a time. The busy flag covers sessions that were leaked with
// `mem::forget` instead of being closed or dropped.

use log::{debug, info};

use super::PatchError;
use super::applier::{self, ApplyOptions, ApplyStats};
use super::cursor::PatchCursor;
use super::header::PatchHeader;
use super::layout::FirmwareTarget;
use super::reader::{PatchReader, ReaderConfig, Windows};
use crate::partition::{PartitionRead, PartitionWrite, ResidentImage};
use crate::xz::{DecodeMode, XzDecoder};

/// Long-lived decoder state shared by successive patch sessions.
#[derive(Debug)]
pub struct PatchContext {
    config: ReaderConfig,
    decoder: XzDecoder,
    windows: Windows,
    busy: bool,
}

impl PatchContext {
    pub fn new(config: ReaderConfig) -> Result<Self, PatchError> {
        config.validate()?;
        Ok(Self {
            config,
            decoder: XzDecoder::new(DecodeMode::Dynamic, config.dict_max)?,
            windows: Windows::new(config.window_size),
            busy: false,
        })
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Start a session over `[start, end)` of `partition`.
    ///
    /// The decoder is reset and driven once so a malformed stream header
    /// fails here rather than in the applier.
    pub fn begin<P: PartitionRead>(
        &mut self,
        partition: P,
        start: u64,
        end: u64,
    ) -> Result<PatchSession<'_, P>, PatchError> {
        if self.busy {
            return Err(PatchError::SessionBusy);
        }
        let cursor = PatchCursor::new(partition, start, end)?;

        self.decoder.reset();
        self.windows.reset();
        self.busy = true;
        debug!("patch session over [{start:#x}, {end:#x})");

        let mut session = PatchSession {
            ctx: self,
            cursor,
            closed: false,
        };
        // Dropping the session on error closes it.
        session.reader().refill()?;
        Ok(session)
    }

    /// Reclaim a context whose session was leaked.
    pub fn force_release(&mut self) {
        self.decoder.end();
        self.busy = false;
    }
}

/// One patch application in progress.
#[derive(Debug)]
pub struct PatchSession<'c, P: PartitionRead> {
    ctx: &'c mut PatchContext,
    cursor: PatchCursor<P>,
    closed: bool,
}

impl<P: PartitionRead> PatchSession<'_, P> {
    fn reader(&mut self) -> PatchReader<'_, P> {
        PatchReader::new(
            &mut self.ctx.decoder,
            &mut self.ctx.windows,
            &mut self.cursor,
        )
    }

    /// Read the three header lengths and check them.
    pub fn validate_header(&mut self) -> Result<PatchHeader, PatchError> {
        let mut reader = self.reader();
        let header = PatchHeader {
            ctrl_len: reader.read_signed_length()?,
            data_len: reader.read_signed_length()?,
            new_size: reader.read_signed_length()?,
        };
        info!(
            "patch header: ctrl={} data={} new_size={}",
            header.ctrl_len, header.data_len, header.new_size
        );
        header.validate()
    }

    /// Run the command loop, writing the rebuilt image to `new`.
    pub fn apply<O, W>(
        &mut self,
        old: &O,
        target: FirmwareTarget,
        new: &mut W,
        image_size: i32,
        options: &ApplyOptions,
    ) -> Result<ApplyStats, PatchError>
    where
        O: ResidentImage + ?Sized,
        W: PartitionWrite,
    {
        applier::apply(&mut self.reader(), old, target, new, image_size, options)
    }

    /// Direct access to the decompressed stream.
    pub fn reader_mut(&mut self) -> PatchReader<'_, P> {
        self.reader()
    }

    /// End the decoder and release the context.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.ctx.decoder.end();
            self.ctx.busy = false;
            self.closed = true;
        }
    }
}

impl<P: PartitionRead> Drop for PatchSession<'_, P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Begin, validate, apply and close in one call. The header's new size is
/// used as the logical image size.
#[allow(clippy::too_many_arguments)]
pub fn apply_patch<P, O, W>(
    ctx: &mut PatchContext,
    partition: P,
    start: u64,
    end: u64,
    old: &O,
    target: FirmwareTarget,
    new: &mut W,
    options: &ApplyOptions,
) -> Result<ApplyStats, PatchError>
where
    P: PartitionRead,
    O: ResidentImage + ?Sized,
    W: PartitionWrite,
{
    let mut session = ctx.begin(partition, start, end)?;
    let header = session.validate_header()?;
    let stats = session.apply(old, target, new, header.new_size, options)?;
    session.close();
    Ok(stats)
}

/// Shape of a patch, gathered without touching any image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    pub header: PatchHeader,
    pub triples: u64,
    pub diff_bytes: u64,
    pub extra_bytes: u64,
    /// Sum of SEEK values.
    pub net_seek: i64,
    pub decoded_bytes: u64,
}

/// Walk the command stream of a patch and report its shape.
pub fn inspect_patch<P: PartitionRead>(
    ctx: &mut PatchContext,
    partition: P,
    start: u64,
    end: u64,
) -> Result<PatchSummary, PatchError> {
    let mut session = ctx.begin(partition, start, end)?;
    let header = session.validate_header()?;
    let mut summary = PatchSummary {
        header,
        triples: 0,
        diff_bytes: 0,
        extra_bytes: 0,
        net_seek: 0,
        decoded_bytes: 0,
    };

    let mut reader = session.reader();
    let mut scratch = [0u8; 256];
    let mut skip = |reader: &mut PatchReader<'_, P>, mut n: usize| -> Result<(), PatchError> {
        while n > 0 {
            let step = n.min(scratch.len());
            reader.read_exact(&mut scratch[..step])?;
            n -= step;
        }
        Ok(())
    };

    let mut covered: i64 = 0;
    while covered < i64::from(header.new_size) {
        for extra in [false, true] {
            let len = reader.read_signed_length()?;
            if len < 0 || covered + i64::from(len) > i64::from(header.new_size) {
                return Err(PatchError::CorruptPatch(format!(
                    "{} length {len} at new offset {covered}",
                    if extra { "EXTRA" } else { "DIFF" }
                )));
            }
            skip(&mut reader, len as usize)?;
            covered += i64::from(len);
            if extra {
                summary.extra_bytes += len as u64;
            } else {
                summary.diff_bytes += len as u64;
            }
        }
        summary.net_seek += i64::from(reader.read_signed_length()?);
        summary.triples += 1;
    }
    reader.finish_stream()?;
    summary.decoded_bytes = reader.decoded_bytes();
    session.close();
    Ok(summary)
}
