// XZ container framing.
//
//   stream header | block* | index | stream footer
//
// Each block is: header (size byte, flags, optional sizes, filter flags,
// padding, CRC32), LZMA2 data, zero padding to a multiple of four, check.
// The index lists (unpadded size, uncompressed size) per block; it is not
// stored but hashed and compared against the same hash built from the
// blocks as they were decoded.

use super::buffer::XzBuffer;
use super::check::{CHECK_ID_MAX, CheckKind, CheckState, RecordHash, Vli, VliProgress};
use super::lzma2::Lzma2Decoder;
use super::{
    BlockFlags, DecodeMode, FILTER_LZMA2, FOOTER_MAGIC, HEADER_MAGIC, STREAM_HEADER_SIZE, Status,
    XzError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequence {
    StreamHeader,
    BlockStart,
    BlockHeader,
    BlockUncompress,
    BlockPadding,
    BlockCheck,
    Index,
    IndexPadding,
    IndexCrc32,
    StreamFooter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexSequence {
    Count,
    Unpadded,
    Uncompressed,
}

/// Sizes declared by the current block header.
#[derive(Debug, Default, Clone, Copy)]
struct BlockHeader {
    compressed: Option<u64>,
    uncompressed: Option<u64>,
    size: u64,
}

/// Sizes observed while decoding blocks.
#[derive(Debug, Default, Clone, Copy)]
struct BlockProgress {
    compressed: u64,
    uncompressed: u64,
    count: u64,
    hash: RecordHash,
}

#[derive(Debug, Clone, Copy)]
struct IndexProgress {
    sequence: IndexSequence,
    /// Bytes of index seen so far (indicator, records, padding).
    size: u64,
    count: u64,
    hash: RecordHash,
}

impl Default for IndexProgress {
    fn default() -> Self {
        Self {
            sequence: IndexSequence::Count,
            size: 0,
            count: 0,
            hash: RecordHash::default(),
        }
    }
}

/// Scratch for fixed-size fields that may arrive split across calls.
struct Temp {
    buf: [u8; 1024],
    pos: usize,
    size: usize,
}

impl Temp {
    fn expect(&mut self, size: usize) {
        self.pos = 0;
        self.size = size;
    }

    /// Copy input until `size` bytes are collected. Returns true when done.
    fn fill(&mut self, b: &mut XzBuffer<'_>) -> bool {
        let copy = b.in_avail().min(self.size - self.pos);
        self.buf[self.pos..self.pos + copy].copy_from_slice(&b.input[b.in_pos..b.in_pos + copy]);
        b.in_pos += copy;
        self.pos += copy;

        if self.pos == self.size {
            self.pos = 0;
            true
        } else {
            false
        }
    }

    fn filled(&self) -> &[u8] {
        &self.buf[..self.size]
    }
}

#[inline]
fn le32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Streaming XZ decoder.
///
/// Construct once, call [`run`](Self::run) repeatedly with fresh input and
/// output space, [`reset`](Self::reset) to start over on a new stream, and
/// [`end`](Self::end) to release the dictionary.
pub struct XzDecoder {
    mode: DecodeMode,
    sequence: Sequence,
    check_kind: CheckKind,
    check: CheckState,
    allow_buf_error: bool,

    /// Input position at the start of the current index accounting span.
    in_start: usize,
    vli: Vli,

    block_header: BlockHeader,
    block: BlockProgress,
    index: IndexProgress,
    index_crc: crc32fast::Hasher,
    temp: Temp,

    lzma2: Lzma2Decoder,
}

impl std::fmt::Debug for XzDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XzDecoder")
            .field("mode", &self.mode)
            .field("sequence", &self.sequence)
            .field("check_kind", &self.check_kind)
            .finish_non_exhaustive()
    }
}

impl XzDecoder {
    /// Create a decoder. `dict_max` is the largest dictionary accepted in
    /// the multi-call modes; `Preallocated` allocates it immediately.
    pub fn new(mode: DecodeMode, dict_max: u32) -> Result<Self, XzError> {
        let mut decoder = Self {
            mode,
            sequence: Sequence::StreamHeader,
            check_kind: CheckKind::None,
            check: CheckState::None,
            allow_buf_error: false,
            in_start: 0,
            vli: Vli::default(),
            block_header: BlockHeader::default(),
            block: BlockProgress::default(),
            index: IndexProgress::default(),
            index_crc: crc32fast::Hasher::new(),
            temp: Temp {
                buf: [0; 1024],
                pos: 0,
                size: 0,
            },
            lzma2: Lzma2Decoder::new(mode, dict_max)?,
        };
        decoder.reset();
        Ok(decoder)
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Check type declared by the stream header (valid once it was read).
    pub fn check_kind(&self) -> CheckKind {
        self.check_kind
    }

    /// Rewind to the start of a stream without reallocating.
    pub fn reset(&mut self) {
        self.sequence = Sequence::StreamHeader;
        self.allow_buf_error = false;
        self.vli.reset();
        self.check_kind = CheckKind::None;
        self.check = CheckState::None;
        self.block = BlockProgress::default();
        self.index = IndexProgress::default();
        self.index_crc = crc32fast::Hasher::new();
        self.temp.expect(STREAM_HEADER_SIZE);
    }

    /// Release the dictionary. Safe mid-stream and safe to repeat; a
    /// later [`reset`](Self::reset) makes the decoder usable again.
    pub fn end(&mut self) {
        self.lzma2.release();
    }

    /// Decode as much as possible from `b`.
    ///
    /// In the multi-call modes a call that makes no progress returns
    /// `Ok(Status::Ok)` once; a second such call in a row is `Err(Buf)`.
    /// In single-call mode the whole stream must be decoded in this call;
    /// on failure the buffer positions are restored.
    pub fn run(&mut self, b: &mut XzBuffer<'_>) -> Result<Status, XzError> {
        if !self.mode.is_multi() {
            self.reset();
        }

        let in_start = b.in_pos;
        let out_start = b.out_pos;
        let mut result = self.dec_main(b);

        if !self.mode.is_multi() {
            if result == Ok(Status::Ok) {
                result = if b.input_exhausted() {
                    Err(XzError::Data)
                } else {
                    Err(XzError::Buf)
                };
            }
            if result != Ok(Status::StreamEnd) {
                b.in_pos = in_start;
                b.out_pos = out_start;
            }
        } else if result == Ok(Status::Ok) && in_start == b.in_pos && out_start == b.out_pos {
            if self.allow_buf_error {
                result = Err(XzError::Buf);
            }
            self.allow_buf_error = true;
        } else {
            self.allow_buf_error = false;
        }

        result
    }

    fn dec_main(&mut self, b: &mut XzBuffer<'_>) -> Result<Status, XzError> {
        self.in_start = b.in_pos;

        loop {
            match self.sequence {
                Sequence::StreamHeader => {
                    if !self.temp.fill(b) {
                        return Ok(Status::Ok);
                    }
                    // Move on first so that an unsupported check can be
                    // reported and decoding resumed on the next call.
                    self.sequence = Sequence::BlockStart;
                    let status = self.dec_stream_header()?;
                    if status != Status::Ok {
                        return Ok(status);
                    }
                }

                Sequence::BlockStart => {
                    if b.input_exhausted() {
                        return Ok(Status::Ok);
                    }
                    let size_byte = b.input[b.in_pos];
                    if size_byte == 0 {
                        self.in_start = b.in_pos;
                        b.in_pos += 1;
                        self.sequence = Sequence::Index;
                        continue;
                    }
                    self.block_header.size = (u64::from(size_byte) + 1) * 4;
                    self.temp.expect(self.block_header.size as usize);
                    self.sequence = Sequence::BlockHeader;
                }

                Sequence::BlockHeader => {
                    if !self.temp.fill(b) {
                        return Ok(Status::Ok);
                    }
                    self.dec_block_header()?;
                    self.sequence = Sequence::BlockUncompress;
                }

                Sequence::BlockUncompress => {
                    let status = self.dec_block(b)?;
                    if status != Status::StreamEnd {
                        return Ok(status);
                    }
                    self.sequence = Sequence::BlockPadding;
                }

                Sequence::BlockPadding => {
                    while self.block.compressed & 3 != 0 {
                        if b.input_exhausted() {
                            return Ok(Status::Ok);
                        }
                        if b.next_in() != 0 {
                            return Err(XzError::Data);
                        }
                        self.block.compressed += 1;
                    }
                    self.temp.expect(self.check_kind.size());
                    self.sequence = Sequence::BlockCheck;
                }

                Sequence::BlockCheck => {
                    if !self.temp.fill(b) {
                        return Ok(Status::Ok);
                    }
                    if !self.check.verify(self.temp.filled()) {
                        return Err(XzError::Data);
                    }
                    self.sequence = Sequence::BlockStart;
                }

                Sequence::Index => {
                    if !self.dec_index(b)? {
                        self.index_update(b);
                        return Ok(Status::Ok);
                    }
                    self.sequence = Sequence::IndexPadding;
                }

                Sequence::IndexPadding => {
                    while (self.index.size + (b.in_pos - self.in_start) as u64) & 3 != 0 {
                        if b.input_exhausted() {
                            self.index_update(b);
                            return Ok(Status::Ok);
                        }
                        if b.next_in() != 0 {
                            return Err(XzError::Data);
                        }
                    }
                    self.index_update(b);

                    if self.block.hash != self.index.hash {
                        return Err(XzError::Data);
                    }
                    self.temp.expect(4);
                    self.sequence = Sequence::IndexCrc32;
                }

                Sequence::IndexCrc32 => {
                    if !self.temp.fill(b) {
                        return Ok(Status::Ok);
                    }
                    let expected = std::mem::take(&mut self.index_crc).finalize();
                    if le32(self.temp.filled()) != expected {
                        return Err(XzError::Data);
                    }
                    self.temp.expect(STREAM_HEADER_SIZE);
                    self.sequence = Sequence::StreamFooter;
                }

                Sequence::StreamFooter => {
                    if !self.temp.fill(b) {
                        return Ok(Status::Ok);
                    }
                    return self.dec_stream_footer();
                }
            }
        }
    }

    fn dec_stream_header(&mut self) -> Result<Status, XzError> {
        let buf = self.temp.filled();

        if buf[..HEADER_MAGIC.len()] != HEADER_MAGIC {
            return Err(XzError::Format);
        }

        let flags = &buf[HEADER_MAGIC.len()..HEADER_MAGIC.len() + 2];
        if crc32fast::hash(flags) != le32(&buf[HEADER_MAGIC.len() + 2..]) {
            return Err(XzError::Data);
        }
        if flags[0] != 0 {
            return Err(XzError::Options);
        }

        let check_id = flags[1];
        if check_id > CHECK_ID_MAX {
            return Err(XzError::Options);
        }
        let kind = CheckKind::from_id(check_id).ok_or(XzError::Options)?;
        self.check_kind = kind;
        self.check = CheckState::new(kind);

        if kind.is_supported() {
            Ok(Status::Ok)
        } else {
            Ok(Status::UnsupportedCheck)
        }
    }

    fn dec_stream_footer(&mut self) -> Result<Status, XzError> {
        let buf = self.temp.filled();

        if buf[10..12] != FOOTER_MAGIC {
            return Err(XzError::Data);
        }
        if crc32fast::hash(&buf[4..10]) != le32(&buf[..4]) {
            return Err(XzError::Data);
        }
        // Backward size is stored as (real size / 4) - 1; the real size
        // includes the index CRC32 that `index.size` does not count.
        if self.index.size >> 2 != u64::from(le32(&buf[4..8])) {
            return Err(XzError::Data);
        }
        if buf[8] != 0 || buf[9] != self.check_kind.id() {
            return Err(XzError::Data);
        }

        Ok(Status::StreamEnd)
    }

    fn dec_block_header(&mut self) -> Result<(), XzError> {
        let total = self.temp.size;
        let body_len = total - 4;
        let buf = &self.temp.buf[..total];

        if crc32fast::hash(&buf[..body_len]) != le32(&buf[body_len..]) {
            return Err(XzError::Data);
        }

        let flags = BlockFlags::from_bits(buf[1]).ok_or(XzError::Options)?;
        let mut pos = 2;

        let read_size = |pos: &mut usize| -> Result<u64, XzError> {
            let mut vli = Vli::default();
            match vli.decode(&buf[..body_len], pos)? {
                VliProgress::Done(value) => Ok(value),
                VliProgress::Pending => Err(XzError::Data),
            }
        };

        self.block_header.compressed = if flags.contains(BlockFlags::COMPRESSED_SIZE) {
            Some(read_size(&mut pos)?)
        } else {
            None
        };
        self.block_header.uncompressed = if flags.contains(BlockFlags::UNCOMPRESSED_SIZE) {
            Some(read_size(&mut pos)?)
        } else {
            None
        };

        // Filter flags take at least two bytes.
        if body_len - pos < 2 {
            return Err(XzError::Data);
        }
        if buf[pos] != FILTER_LZMA2 {
            return Err(XzError::Options);
        }
        if buf[pos + 1] != 0x01 {
            return Err(XzError::Options);
        }
        pos += 2;

        if body_len - pos < 1 {
            return Err(XzError::Data);
        }
        let props = buf[pos];
        pos += 1;

        if buf[pos..body_len].iter().any(|&byte| byte != 0) {
            return Err(XzError::Options);
        }

        self.lzma2.reset(props)?;

        self.block.compressed = 0;
        self.block.uncompressed = 0;
        Ok(())
    }

    fn dec_block(&mut self, b: &mut XzBuffer<'_>) -> Result<Status, XzError> {
        let in_start = b.in_pos;
        let out_start = b.out_pos;

        let status = self.lzma2.run(b)?;

        self.block.compressed += (b.in_pos - in_start) as u64;
        self.block.uncompressed += (b.out_pos - out_start) as u64;

        if self
            .block_header
            .compressed
            .is_some_and(|limit| self.block.compressed > limit)
            || self
                .block_header
                .uncompressed
                .is_some_and(|limit| self.block.uncompressed > limit)
        {
            return Err(XzError::Data);
        }

        self.check.update(&b.output[out_start..b.out_pos]);

        if status == Status::StreamEnd {
            if self
                .block_header
                .compressed
                .is_some_and(|size| size != self.block.compressed)
                || self
                    .block_header
                    .uncompressed
                    .is_some_and(|size| size != self.block.uncompressed)
            {
                return Err(XzError::Data);
            }

            self.block.hash.unpadded += self.block_header.size
                + self.block.compressed
                + self.check_kind.size() as u64;
            self.block.hash.uncompressed += self.block.uncompressed;
            self.block.hash.mix();
            self.block.count += 1;
        }

        Ok(status)
    }

    /// Fold the index bytes consumed since `in_start` into size and CRC.
    fn index_update(&mut self, b: &XzBuffer<'_>) {
        let used = &b.input[self.in_start..b.in_pos];
        self.index.size += used.len() as u64;
        self.index_crc.update(used);
    }

    /// Decode index records. Returns true once every record has been read.
    fn dec_index(&mut self, b: &mut XzBuffer<'_>) -> Result<bool, XzError> {
        loop {
            let value = match self.vli.decode(b.input, &mut b.in_pos)? {
                VliProgress::Done(value) => value,
                VliProgress::Pending => return Ok(false),
            };

            match self.index.sequence {
                IndexSequence::Count => {
                    self.index.count = value;
                    if self.index.count != self.block.count {
                        return Err(XzError::Data);
                    }
                    self.index.sequence = IndexSequence::Unpadded;
                }
                IndexSequence::Unpadded => {
                    self.index.hash.unpadded += value;
                    self.index.sequence = IndexSequence::Uncompressed;
                }
                IndexSequence::Uncompressed => {
                    self.index.hash.uncompressed += value;
                    self.index.hash.mix();
                    self.index.count -= 1;
                    self.index.sequence = IndexSequence::Unpadded;
                }
            }

            if self.index.count == 0 {
                return Ok(true);
            }
        }
    }
}
