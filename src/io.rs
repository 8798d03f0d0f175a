// File-level helpers around the patch pipeline.
//
// `apply_file()` rebuilds a new image from an old image file and a patch
// file (bare XZ stream or DFW partition dump); `create_patch_file()` goes
// the other way. Images are read fully into memory, which is what the
// device does with its resident old image. SHA-256 digests of the images
// are computed so scripts can check results without re-reading files.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::{debug, info};
use sha2::{Digest, Sha256};

use crate::dfw::{self, CodeSection, DfwError, PatchCommand, VerifyError};
use crate::partition::{MappedImage, MemoryPartition};
use crate::patch::applier::new_image_extent;
use crate::patch::{
    ApplyOptions, ApplyStats, FirmwareTarget, ImageLayout, PatchContext, PatchError, ReaderConfig,
    ReservedRange,
};

#[cfg(feature = "encoder")]
use crate::diff::{self, DiffError, DiffOptions, Triple};
#[cfg(feature = "encoder")]
use crate::xz::encoder::{self, XzOptions};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `apply_file()`.
#[derive(Debug, Clone)]
pub struct ApplyFileStats {
    pub old_size: u64,
    pub patch_size: u64,
    /// Physical size of the written image, reserved range included.
    pub output_size: u64,
    /// Logical size declared by the patch header.
    pub image_size: u64,
    pub apply: ApplyStats,
    /// CRC32 over the image's code sections.
    pub image_crc32: u32,
    pub output_sha256: [u8; 32],
}

/// Statistics returned by `create_patch_file()`.
#[derive(Debug, Clone)]
pub struct CreateFileStats {
    pub old_size: u64,
    pub new_size: u64,
    /// Uncompressed patch payload size.
    pub payload_size: u64,
    /// Bytes written to the patch file, DFW record included.
    pub patch_size: u64,
    pub triples: u64,
    pub diff_bytes: u64,
    pub extra_bytes: u64,
    pub old_sha256: [u8; 32],
    pub new_sha256: [u8; 32],
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("patch error: {0}")]
    Patch(#[from] PatchError),
    #[error("DFW error: {0}")]
    Dfw(#[from] DfwError),
    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[cfg(feature = "encoder")]
    #[error("patch creation failed: {0}")]
    Diff(#[from] DiffError),
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options for `apply_file()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyFileOptions {
    pub target: FirmwareTarget,
    /// Physical address of the first old-image byte.
    pub old_base: u64,
    pub reserved: Option<ReservedRange>,
    pub reader: ReaderConfig,
    /// Zero selects the default chunk size.
    pub chunk_size: usize,
    /// Treat the patch file as a DFW partition with the patch/decompress
    /// record at this offset.
    pub dfw_offset: Option<u64>,
    /// Fail unless the rebuilt code sections hash to this CRC32.
    pub expected_crc32: Option<u32>,
}

impl ApplyFileOptions {
    fn apply_options(&self) -> ApplyOptions {
        let mut options = ApplyOptions {
            layout: ImageLayout::new(self.old_base, self.reserved),
            ..ApplyOptions::default()
        };
        if self.chunk_size > 0 {
            options.chunk_size = self.chunk_size;
        }
        options
    }
}

/// Options for `create_patch_file()`.
#[cfg(feature = "encoder")]
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateFileOptions {
    pub diff: DiffOptions,
    pub xz: XzOptions,
    /// Remove this range from both images before diffing.
    pub reserved: Option<ReservedRange>,
    /// Prefix the stream with a DFW patch/decompress record.
    pub dfw_record: bool,
}

// ---------------------------------------------------------------------------
// apply_file
// ---------------------------------------------------------------------------

fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Lowercase hex rendering of a digest.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Logical size declared by the patch stored in `[start, end)`.
fn declared_size(ctx: &mut PatchContext, patch: &[u8], start: u64, end: u64) -> Result<i32, PatchError> {
    let mut session = ctx.begin(patch, start, end)?;
    let header = session.validate_header()?;
    session.close();
    Ok(header.new_size)
}

/// Apply the patch in `patch_path` to `old_path`, writing the rebuilt
/// partition image to `output_path`.
///
/// Reserved bytes in the output are left erased (0xFF).
pub fn apply_file(
    old_path: &Path,
    patch_path: &Path,
    output_path: &Path,
    opts: ApplyFileOptions,
) -> Result<ApplyFileStats, IoError> {
    let old = std::fs::read(old_path)?;
    let patch = std::fs::read(patch_path)?;
    let old_image = MappedImage::new(opts.old_base, &old);
    let options = opts.apply_options();
    let reserved = options.layout.reserved_for(opts.target);

    let mut ctx = PatchContext::new(opts.reader)?;
    let span = match opts.dfw_offset {
        Some(offset) => {
            let mut view = patch.as_slice();
            let command = PatchCommand::read_from(&mut view, offset)?;
            debug!("{command}");
            command.payload_span(offset)
        }
        None => (0, patch.len() as u64),
    };

    let image_size = declared_size(&mut ctx, &patch, span.0, span.1)?;
    let extent = new_image_extent(image_size, reserved);
    let mut output = MemoryPartition::erased(extent as usize);

    let stats = match opts.dfw_offset {
        Some(offset) => {
            let mut view = patch.as_slice();
            let outcome = dfw::run_patch_command(
                &mut ctx,
                &mut view,
                offset,
                &old_image,
                opts.target,
                &mut output,
                &options,
            )?;
            debug!("next command at {:#x}", outcome.next_offset);
            outcome.stats
        }
        None => crate::patch::apply_patch(
            &mut ctx,
            patch.as_slice(),
            span.0,
            span.1,
            &old_image,
            opts.target,
            &mut output,
            &options,
        )?,
    };

    let sections = CodeSection::split_around(image_size as u64, reserved);
    let mut view = output.as_slice();
    let image_crc32 = match opts.expected_crc32 {
        Some(expected) => dfw::verify_image_crc(&mut view, &sections, expected)?,
        None => dfw::image_crc32(&mut view, &sections)?,
    };

    let mut writer = BufWriter::new(File::create(output_path)?);
    writer.write_all(output.as_slice())?;
    writer.flush()?;

    info!(
        "{} -> {} ({} bytes, crc32 {image_crc32:#010x})",
        patch_path.display(),
        output_path.display(),
        extent
    );

    Ok(ApplyFileStats {
        old_size: old.len() as u64,
        patch_size: patch.len() as u64,
        output_size: extent as u64,
        image_size: image_size as u64,
        apply: stats,
        image_crc32,
        output_sha256: sha256(output.as_slice()),
    })
}

// ---------------------------------------------------------------------------
// create_patch_file
// ---------------------------------------------------------------------------

/// Create a compressed patch turning `old_path` into `new_path`.
#[cfg(feature = "encoder")]
pub fn create_patch_file(
    old_path: &Path,
    new_path: &Path,
    patch_path: &Path,
    opts: CreateFileOptions,
) -> Result<CreateFileStats, IoError> {
    let old = std::fs::read(old_path)?;
    let new = std::fs::read(new_path)?;

    let old_logical = diff::strip_reserved(&old, opts.reserved);
    let new_logical = diff::strip_reserved(&new, opts.reserved);

    let triples = diff::generate(&old_logical, &new_logical, &opts.diff);
    let payload = diff::write_patch(&triples, &old_logical, &new_logical)?;
    let stream = encoder::compress(&payload, opts.xz)?;

    let record = opts
        .dfw_record
        .then(|| PatchCommand::xz_bsdiff(stream.len()))
        .transpose()?;

    let mut writer = BufWriter::new(File::create(patch_path)?);
    let mut patch_size = stream.len() as u64;
    if let Some(record) = record {
        writer.write_all(&record.to_bytes())?;
        patch_size += PatchCommand::SIZE as u64;
    }
    writer.write_all(&stream)?;
    writer.flush()?;

    let sum = |f: fn(&Triple) -> usize| triples.iter().map(f).sum::<usize>() as u64;
    Ok(CreateFileStats {
        old_size: old.len() as u64,
        new_size: new.len() as u64,
        payload_size: payload.len() as u64,
        patch_size,
        triples: triples.len() as u64,
        diff_bytes: sum(|t| t.diff),
        extra_bytes: sum(|t| t.extra),
        old_sha256: sha256(&old),
        new_sha256: sha256(&new),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
