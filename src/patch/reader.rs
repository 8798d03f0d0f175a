// Windowed byte reader over the decompressed patch.
//
// Compressed bytes are pulled from the patch cursor into a fixed input
// window; the decoder fills a fixed output window; callers consume the
// output window one byte (or one run of bytes) at a time. The read index
// chases the decoder's fill level and both rewind to 0 once the output
// window has been filled to capacity.

use log::{error, warn};

use super::PatchError;
use super::cursor::PatchCursor;
use super::signed::decode_signed_length;
use crate::partition::PartitionRead;
use crate::xz::{DEFAULT_DICT_MAX, Status, XzBuffer, XzDecoder};

/// Window and memory sizing for a patch context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Size of both the compressed input window and the decoded output window.
    pub window_size: usize,
    /// Largest dictionary the decoder will allocate.
    pub dict_max: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            window_size: 512,
            dict_max: DEFAULT_DICT_MAX,
        }
    }
}

impl ReaderConfig {
    pub fn validate(&self) -> Result<(), PatchError> {
        if self.window_size == 0 {
            return Err(PatchError::InvalidConfig(
                "reader window size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Input/output windows and their positions. Owned by the context so the
/// allocation outlives individual sessions.
#[derive(Debug)]
pub(crate) struct Windows {
    input: Vec<u8>,
    in_len: usize,
    in_pos: usize,
    output: Vec<u8>,
    out_pos: usize,
    read_pos: usize,
    finished: bool,
    decoded: u64,
}

impl Windows {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            input: vec![0; size],
            in_len: 0,
            in_pos: 0,
            output: vec![0; size],
            out_pos: 0,
            read_pos: 0,
            finished: false,
            decoded: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.in_len = 0;
        self.in_pos = 0;
        self.out_pos = 0;
        self.read_pos = 0;
        self.finished = false;
        self.decoded = 0;
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.output.len()
    }
}

/// Byte and length reader for one session.
pub struct PatchReader<'a, P> {
    decoder: &'a mut XzDecoder,
    windows: &'a mut Windows,
    cursor: &'a mut PatchCursor<P>,
}

impl<'a, P: PartitionRead> PatchReader<'a, P> {
    pub(crate) fn new(
        decoder: &'a mut XzDecoder,
        windows: &'a mut Windows,
        cursor: &'a mut PatchCursor<P>,
    ) -> Self {
        Self {
            decoder,
            windows,
            cursor,
        }
    }

    /// One drive step: rewind a full output window, top up the input
    /// window from the patch partition, run the decoder once.
    pub(crate) fn refill(&mut self) -> Result<Status, PatchError> {
        let w = &mut *self.windows;

        if w.out_pos == w.capacity() {
            w.out_pos = 0;
        }

        if w.in_pos == w.in_len {
            w.in_len = match self.cursor.read_chunk(&mut w.input) {
                Ok(n) => n,
                Err(e) => {
                    error!("Patch partition read failed: {e}");
                    self.decoder.end();
                    return Err(e.into());
                }
            };
            w.in_pos = 0;
        }

        let before = w.out_pos;
        let mut b = XzBuffer::new(&w.input[..w.in_len], &mut w.output);
        b.in_pos = w.in_pos;
        b.out_pos = w.out_pos;
        let result = self.decoder.run(&mut b);
        w.in_pos = b.in_pos;
        w.out_pos = b.out_pos;
        w.decoded += (w.out_pos - before) as u64;

        match result {
            Ok(Status::Ok) => Ok(Status::Ok),
            Ok(Status::UnsupportedCheck) => {
                warn!("Unsupported check");
                Ok(Status::UnsupportedCheck)
            }
            Ok(Status::StreamEnd) => {
                w.finished = true;
                Ok(Status::StreamEnd)
            }
            Err(e) => {
                error!("{e}");
                self.decoder.end();
                Err(e.into())
            }
        }
    }

    /// Drive the decoder until at least one unread byte sits in the window.
    fn fill(&mut self) -> Result<(), PatchError> {
        while self.windows.read_pos >= self.windows.out_pos {
            if self.windows.finished {
                return Err(PatchError::UnexpectedEndOfPatch);
            }
            self.refill()?;
            if self.windows.read_pos == self.windows.capacity() {
                self.windows.read_pos = 0;
            }
        }
        Ok(())
    }

    /// Next decompressed byte.
    pub fn next_byte(&mut self) -> Result<u8, PatchError> {
        self.fill()?;
        let w = &mut *self.windows;
        let byte = w.output[w.read_pos];
        w.read_pos += 1;
        Ok(byte)
    }

    /// Fill `buf` with the next decompressed bytes.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), PatchError> {
        let mut filled = 0;
        while filled < buf.len() {
            self.fill()?;
            let w = &mut *self.windows;
            let n = (w.out_pos - w.read_pos).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&w.output[w.read_pos..w.read_pos + n]);
            w.read_pos += n;
            filled += n;
        }
        Ok(())
    }

    /// Next sign-magnitude length.
    pub fn read_signed_length(&mut self) -> Result<i32, PatchError> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(decode_signed_length(bytes))
    }

    /// Drive the decoder to stream end so the block check, index and
    /// footer are verified. Decoded bytes left unread are an error.
    pub fn finish_stream(&mut self) -> Result<(), PatchError> {
        loop {
            if self.windows.read_pos < self.windows.out_pos {
                error!("patch carries data past its last command");
                self.decoder.end();
                return Err(PatchError::CorruptPatch(
                    "trailing data after the last command".into(),
                ));
            }
            if self.windows.finished {
                return Ok(());
            }
            self.refill()?;
            if self.windows.read_pos == self.windows.capacity() {
                self.windows.read_pos = 0;
            }
        }
    }

    /// The decoder reported stream end.
    pub fn is_finished(&self) -> bool {
        self.windows.finished
    }

    /// Decompressed bytes produced so far in this session.
    pub fn decoded_bytes(&self) -> u64 {
        self.windows.decoded
    }

    /// Compressed bytes left in the patch span.
    pub fn compressed_remaining(&self) -> u64 {
        self.cursor.remaining() + (self.windows.in_len - self.windows.in_pos) as u64
    }

    pub(crate) fn end_decoder(&mut self) {
        self.decoder.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xz::DecodeMode;

    const PATCH_XZ: &[u8] = include_bytes!("../../tests/fixtures/patch_crc32.xz");
    const PAYLOAD: &[u8] = include_bytes!("../../tests/fixtures/payload.bin");

    fn read_all(window: usize) -> Result<Vec<u8>, PatchError> {
        let mut decoder = XzDecoder::new(DecodeMode::Dynamic, DEFAULT_DICT_MAX)?;
        let mut windows = Windows::new(window);
        let mut cursor = PatchCursor::new(PATCH_XZ, 0, PATCH_XZ.len() as u64)?;
        let mut reader = PatchReader::new(&mut decoder, &mut windows, &mut cursor);
        let mut out = Vec::new();
        loop {
            match reader.next_byte() {
                Ok(b) => out.push(b),
                Err(PatchError::UnexpectedEndOfPatch) => return Ok(out),
                Err(e) => return Err(e),
            }
        }
    }

    #[test]
    fn decodes_payload_for_any_window() {
        for window in [1, 7, 64, 512, 4096] {
            assert_eq!(read_all(window).unwrap(), PAYLOAD, "window {window}");
        }
    }

    #[test]
    fn read_exact_and_lengths() {
        let mut decoder = XzDecoder::new(DecodeMode::Dynamic, DEFAULT_DICT_MAX).unwrap();
        let mut windows = Windows::new(5);
        let mut cursor = PatchCursor::new(PATCH_XZ, 0, PATCH_XZ.len() as u64).unwrap();
        let mut reader = PatchReader::new(&mut decoder, &mut windows, &mut cursor);

        assert_eq!(reader.read_signed_length().unwrap(), 36);
        assert_eq!(reader.read_signed_length().unwrap(), 5950);
        let mut rest = [0u8; 9];
        reader.read_exact(&mut rest).unwrap();
        assert_eq!(&rest, &PAYLOAD[8..17]);
        assert!(reader.decoded_bytes() >= 17);
    }

    #[test]
    fn reading_past_end_is_an_error() {
        let mut decoder = XzDecoder::new(DecodeMode::Dynamic, DEFAULT_DICT_MAX).unwrap();
        let mut windows = Windows::new(512);
        let mut cursor = PatchCursor::new(PATCH_XZ, 0, PATCH_XZ.len() as u64).unwrap();
        let mut reader = PatchReader::new(&mut decoder, &mut windows, &mut cursor);
        let mut buf = vec![0u8; PAYLOAD.len()];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, PAYLOAD);
        assert!(matches!(reader.next_byte(), Err(PatchError::UnexpectedEndOfPatch)));
        assert!(reader.is_finished());
        assert!(matches!(reader.next_byte(), Err(PatchError::UnexpectedEndOfPatch)));
    }

    #[test]
    fn truncated_stream_fails() {
        let cut = &PATCH_XZ[..PATCH_XZ.len() - 20];
        let mut decoder = XzDecoder::new(DecodeMode::Dynamic, DEFAULT_DICT_MAX).unwrap();
        let mut windows = Windows::new(64);
        let mut cursor = PatchCursor::new(cut, 0, cut.len() as u64).unwrap();
        let mut reader = PatchReader::new(&mut decoder, &mut windows, &mut cursor);
        let mut buf = vec![0u8; PAYLOAD.len()];
        let err = reader.read_exact(&mut buf).and_then(|_| reader.next_byte().map(|_| ()));
        assert!(matches!(err, Err(PatchError::Decompress(_))), "{err:?}");
    }

    #[test]
    fn finish_after_last_byte_verifies_footer() {
        let mut decoder = XzDecoder::new(DecodeMode::Dynamic, DEFAULT_DICT_MAX).unwrap();
        let mut windows = Windows::new(7);
        let mut cursor = PatchCursor::new(PATCH_XZ, 0, PATCH_XZ.len() as u64).unwrap();
        let mut reader = PatchReader::new(&mut decoder, &mut windows, &mut cursor);
        let mut buf = vec![0u8; PAYLOAD.len()];
        reader.read_exact(&mut buf).unwrap();
        reader.finish_stream().unwrap();
        assert!(reader.is_finished());
        assert_eq!(reader.compressed_remaining(), 0);
    }

    #[test]
    fn finish_with_unread_payload_fails() {
        let mut decoder = XzDecoder::new(DecodeMode::Dynamic, DEFAULT_DICT_MAX).unwrap();
        let mut windows = Windows::new(512);
        let mut cursor = PatchCursor::new(PATCH_XZ, 0, PATCH_XZ.len() as u64).unwrap();
        let mut reader = PatchReader::new(&mut decoder, &mut windows, &mut cursor);
        let mut buf = [0u8; 12];
        reader.read_exact(&mut buf).unwrap();
        assert!(matches!(reader.finish_stream(), Err(PatchError::CorruptPatch(_))));
    }

    #[test]
    fn finish_on_truncated_tail_fails() {
        // Cut inside the index so every payload byte is still available.
        let cut = &PATCH_XZ[..PATCH_XZ.len() - 14];
        let mut decoder = XzDecoder::new(DecodeMode::Dynamic, DEFAULT_DICT_MAX).unwrap();
        let mut windows = Windows::new(512);
        let mut cursor = PatchCursor::new(cut, 0, cut.len() as u64).unwrap();
        let mut reader = PatchReader::new(&mut decoder, &mut windows, &mut cursor);
        let mut buf = vec![0u8; PAYLOAD.len()];
        reader.read_exact(&mut buf).unwrap();
        assert!(matches!(reader.finish_stream(), Err(PatchError::Decompress(_))));
    }

    #[test]
    fn zero_window_rejected() {
        let config = ReaderConfig {
            window_size: 0,
            ..ReaderConfig::default()
        };
        assert!(matches!(config.validate(), Err(PatchError::InvalidConfig(_))));
    }
}
