// Delta-firmware (DFW) glue around the patch pipeline.
//
// A DFW patch partition carries macro commands; the patch/decompress
// command embeds an XZ-compressed mini-bsdiff patch. `run_patch_command`
// locates that payload, applies it, and reports where the next command
// starts. `verify` checks the rebuilt image against the expected CRC32.

pub mod command;
pub mod verify;

pub use command::{CompressionTechnology, PATCH_DECOMPRESS_COMMAND, PatchCommand, PatchTechnology};
pub use verify::{CodeSection, VerifyError, image_crc32, verify_image_crc};

use log::info;

use crate::partition::{PartitionError, PartitionRead, PartitionWrite, ResidentImage};
use crate::patch::{ApplyOptions, ApplyStats, FirmwareTarget, PatchContext, PatchError, apply_patch};

#[derive(Debug, thiserror::Error)]
pub enum DfwError {
    #[error("command record truncated ({0} of 5 bytes)")]
    Truncated(usize),
    #[error("unexpected macro command {0}")]
    UnexpectedCommand(u8),
    #[error("payload of {0} bytes does not fit a 24-bit length")]
    PayloadTooLarge(usize),
    #[error("unsupported patch technology ({0})")]
    Unsupported(PatchCommand),
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// Result of executing one patch/decompress command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: PatchCommand,
    pub stats: ApplyStats,
    /// Offset of the macro command following the payload.
    pub next_offset: u64,
}

/// Execute the patch/decompress command stored at `record_offset`.
///
/// The new-image partition is expected to be erased by the caller.
#[allow(clippy::too_many_arguments)]
pub fn run_patch_command<P, O, W>(
    ctx: &mut PatchContext,
    patch: &mut P,
    record_offset: u64,
    old: &O,
    target: FirmwareTarget,
    new: &mut W,
    options: &ApplyOptions,
) -> Result<CommandOutcome, DfwError>
where
    P: PartitionRead + ?Sized,
    O: ResidentImage + ?Sized,
    W: PartitionWrite,
{
    let command = PatchCommand::read_from(patch, record_offset)?;
    if !command.is_xz_bsdiff() {
        return Err(DfwError::Unsupported(command));
    }

    let (start, end) = command.payload_span(record_offset);
    info!("{command} at {record_offset:#x}");
    let stats = apply_patch(ctx, &mut *patch, start, end, old, target, new, options)?;

    Ok(CommandOutcome {
        command,
        stats,
        next_offset: end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::MemoryPartition;
    use crate::patch::ReaderConfig;

    const PATCH_XZ: &[u8] = include_bytes!("../../tests/fixtures/patch_crc32.xz");
    const OLD: &[u8] = include_bytes!("../../tests/fixtures/old.bin");
    const NEW: &[u8] = include_bytes!("../../tests/fixtures/new.bin");

    fn dfw_partition(command: PatchCommand) -> MemoryPartition {
        // Some leading bytes stand in for the DFW patch header.
        let mut bytes = vec![0xA5u8; 24];
        bytes.extend_from_slice(&command.to_bytes());
        bytes.extend_from_slice(PATCH_XZ);
        bytes.extend_from_slice(&[0x00; 8]);
        MemoryPartition::from_vec(bytes)
    }

    #[test]
    fn applies_embedded_patch() {
        let command = PatchCommand::xz_bsdiff(PATCH_XZ.len()).unwrap();
        let mut partition = dfw_partition(command);
        let mut ctx = PatchContext::new(ReaderConfig::default()).unwrap();
        let mut out = MemoryPartition::erased(NEW.len());

        let outcome = run_patch_command(
            &mut ctx,
            &mut partition,
            24,
            OLD,
            FirmwareTarget::Application,
            &mut out,
            &ApplyOptions::default(),
        )
        .unwrap();

        assert_eq!(out.as_slice(), NEW);
        assert_eq!(outcome.next_offset, 24 + 5 + PATCH_XZ.len() as u64);
        let sections = CodeSection::split_around(NEW.len() as u64, None);
        assert_eq!(
            verify_image_crc(&mut out, &sections, 0xcb64_cafd).unwrap(),
            0xcb64_cafd
        );
    }

    #[test]
    fn other_technologies_are_refused() {
        let command = PatchCommand {
            compression: CompressionTechnology::None,
            ..PatchCommand::xz_bsdiff(PATCH_XZ.len()).unwrap()
        };
        let mut partition = dfw_partition(command);
        let mut ctx = PatchContext::new(ReaderConfig::default()).unwrap();
        let mut out = MemoryPartition::erased(NEW.len());
        let err = run_patch_command(
            &mut ctx,
            &mut partition,
            24,
            OLD,
            FirmwareTarget::Application,
            &mut out,
            &ApplyOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DfwError::Unsupported(_)));
    }
}
