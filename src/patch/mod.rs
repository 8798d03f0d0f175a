// bsdiff-style patch application on top of the streaming XZ decoder.
//
// Layout:
//   - `signed`  : sign-magnitude length codec
//   - `cursor`  : read position in the patch partition
//   - `reader`  : windowed byte reader driving the decoder
//   - `header`  : payload header and its validity rule
//   - `layout`  : reserved-range translation and seek state machine
//   - `applier` : DIFF / EXTRA / SEEK command loop
//   - `session` : context object, session lifecycle, one-call entry point

pub mod applier;
pub mod cursor;
pub mod header;
pub mod layout;
pub mod reader;
pub mod session;
pub mod signed;

pub use applier::{ApplyOptions, ApplyStats, DEFAULT_CHUNK_SIZE};
pub use cursor::PatchCursor;
pub use header::PatchHeader;
pub use layout::{CrossingState, FirmwareTarget, ImageLayout, ReservedRange, SeekTracker};
pub use reader::{PatchReader, ReaderConfig};
pub use session::{PatchContext, PatchSession, PatchSummary, apply_patch, inspect_patch};
pub use signed::{decode_signed_length, encode_signed_length};

use crate::partition::PartitionError;
use crate::xz::XzError;

/// Patch application failure. Every variant is terminal for the session.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("invalid image size {0}")]
    InvalidImageSize(i32),
    #[error("invalid patch header ({0})")]
    InvalidHeader(PatchHeader),
    #[error("corrupt patch: {0}")]
    CorruptPatch(String),
    #[error("patch stream ended before the image was complete")]
    UnexpectedEndOfPatch,
    #[error("old image has no {len} bytes at address {address:#x}")]
    OldImageOutOfRange { address: i64, len: usize },
    #[error("patch context already hosts a session")]
    SessionBusy,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("decompression failed: {0}")]
    Decompress(#[from] XzError),
    #[error(transparent)]
    Partition(#[from] PartitionError),
}
