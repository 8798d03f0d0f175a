// XZ container decoder restricted to the LZMA2 filter.
//
// A multi-call decoder in the style of XZ Embedded: the caller owns an
// input slice and an output slice, each with a position, and `run()`
// consumes and produces as much as it can before reporting a status.
// Memory stays bounded by the dictionary ceiling handed to the decoder
// at construction time.
//
// Layout:
//   - `buffer`  : the caller-visible input/output pair
//   - `stream`  : container framing (headers, blocks, index, footer)
//   - `lzma2`   : LZMA2 chunk parsing
//   - `lzma`    : LZMA symbol decoding
//   - `rc`      : range decoder
//   - `dict`    : sliding dictionary / output staging
//   - `check`   : integrity checks, VLI helpers, block/index hashes
//   - `encoder` : container writer used by host-side tooling

mod buffer;
mod check;
mod dict;
mod lzma;
mod lzma2;
mod rc;
mod stream;

#[cfg(feature = "encoder")]
pub mod encoder;

pub use buffer::XzBuffer;
pub use check::CheckKind;
pub use stream::XzDecoder;

/// Dictionary ceiling used by the firmware patch pipeline (4 KiB).
pub const DEFAULT_DICT_MAX: u32 = 1 << 12;

/// Stream header / footer size.
pub(crate) const STREAM_HEADER_SIZE: usize = 12;

/// Stream header magic bytes.
pub(crate) const HEADER_MAGIC: [u8; 6] = [0xFD, b'7', b'z', b'X', b'Z', 0x00];

/// Stream footer magic bytes.
pub(crate) const FOOTER_MAGIC: [u8; 2] = [b'Y', b'Z'];

/// Filter ID of LZMA2, the only filter accepted.
pub(crate) const FILTER_LZMA2: u8 = 0x21;

/// Largest dictionary-size property byte the decoder accepts.
pub(crate) const DICT_PROPS_MAX: u8 = 39;

bitflags::bitflags! {
    /// Block header flags byte. Any other bit set (including a filter count
    /// above one) is an unsupported option.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct BlockFlags: u8 {
        const COMPRESSED_SIZE = 0x40;
        const UNCOMPRESSED_SIZE = 0x80;
    }
}

/// Dictionary size declared by an LZMA2 dictionary property byte.
pub(crate) fn dict_size_from_props(props: u8) -> u32 {
    (2 | u32::from(props & 1)) << (props / 2 + 11)
}

// ---------------------------------------------------------------------------
// Modes, statuses, errors
// ---------------------------------------------------------------------------

/// How the decoder manages its dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// One call decodes the whole stream; the output space of that call
    /// doubles as history, and anything short of stream end is an error.
    Single,
    /// The full dictionary ceiling is allocated up front.
    Preallocated,
    /// The dictionary is allocated when a block header declares its size.
    Dynamic,
}

impl DecodeMode {
    #[inline]
    pub(crate) fn is_multi(self) -> bool {
        !matches!(self, Self::Single)
    }
}

/// Non-error outcome of [`XzDecoder::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Progress was made (or more input/output space is needed).
    Ok,
    /// The stream footer was decoded and verified.
    StreamEnd,
    /// The stream uses an integrity check this decoder cannot verify.
    /// Decoding may continue; the check bytes are skipped.
    UnsupportedCheck,
}

/// Terminal decoder failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum XzError {
    #[error("Memory allocation failed")]
    Mem,
    #[error("Memory usage limit reached")]
    MemLimit,
    #[error("Not a .xz file")]
    Format,
    #[error("Unsupported options in the .xz headers")]
    Options,
    #[error("File is corrupt")]
    Data,
    #[error("File is corrupt or truncated (no progress possible)")]
    Buf,
}

// ---------------------------------------------------------------------------
// One-shot convenience
// ---------------------------------------------------------------------------

/// Decode a complete in-memory stream through a small output window.
///
/// Runs the decoder in `Dynamic` mode with `dict_max` as ceiling, exactly
/// like the patch reader does, and collects the output.
pub fn decode_all(input: &[u8], dict_max: u32) -> Result<Vec<u8>, XzError> {
    let mut decoder = XzDecoder::new(DecodeMode::Dynamic, dict_max)?;
    let mut window = vec![0u8; 4096];
    let mut out = Vec::new();
    let mut in_pos = 0;

    loop {
        let mut buf = XzBuffer::new(input, &mut window);
        buf.in_pos = in_pos;
        let status = decoder.run(&mut buf)?;
        in_pos = buf.in_pos;
        let produced = buf.out_pos;
        out.extend_from_slice(&window[..produced]);
        match status {
            Status::StreamEnd => break,
            Status::UnsupportedCheck => {
                log::warn!("Unsupported check");
            }
            Status::Ok => {}
        }
    }

    decoder.end();
    Ok(out)
}
