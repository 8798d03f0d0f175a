// LZMA2 chunk decoding.
//
// An LZMA2 stream is a sequence of chunks, each introduced by a control
// byte:
//   0x00        end of stream
//   0x01        uncompressed chunk, dictionary reset
//   0x02        uncompressed chunk
//   0x80..=0xFF LZMA chunk; bits 5-6 select the reset level
//               (none, state, state + new props, everything)
// followed by the unpacked size (and packed size for LZMA chunks).
//
// The range decoder needs up to LZMA_IN_REQUIRED bytes of lookahead per
// symbol. When the caller's input holds fewer than that, bytes are staged
// in a small temp buffer so a symbol never straddles two calls.

use super::buffer::XzBuffer;
use super::dict::Dictionary;
use super::lzma::LzmaDecoder;
use super::rc::{RC_INIT_BYTES, RangeDecoder, RangeReader};
use super::{DICT_PROPS_MAX, DecodeMode, Status, XzError, dict_size_from_props};

/// Maximum input consumed by decoding one LZMA symbol.
const LZMA_IN_REQUIRED: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequence {
    Control,
    Uncompressed1,
    Uncompressed2,
    Compressed0,
    Compressed1,
    Properties,
    LzmaPrepare,
    LzmaRun,
    Copy,
}

pub(crate) struct Lzma2Decoder {
    dict: Dictionary,
    rc: RangeDecoder,
    lzma: LzmaDecoder,

    sequence: Sequence,
    next_sequence: Sequence,
    /// Unpacked bytes left in the current chunk.
    uncompressed: u32,
    /// Packed bytes left in the current chunk (or stored bytes for 0x01/0x02).
    compressed: u32,
    need_dict_reset: bool,
    need_props: bool,

    temp: [u8; 3 * LZMA_IN_REQUIRED],
    temp_size: usize,
}

impl Lzma2Decoder {
    pub(crate) fn new(mode: DecodeMode, dict_max: u32) -> Result<Self, XzError> {
        Ok(Self {
            dict: Dictionary::new(mode, dict_max)?,
            rc: RangeDecoder::new(),
            lzma: LzmaDecoder::new(),
            sequence: Sequence::Control,
            next_sequence: Sequence::Control,
            uncompressed: 0,
            compressed: 0,
            need_dict_reset: true,
            need_props: true,
            temp: [0; 3 * LZMA_IN_REQUIRED],
            temp_size: 0,
        })
    }

    /// Prepare for a new block whose filter properties byte is `props`.
    pub(crate) fn reset(&mut self, props: u8) -> Result<(), XzError> {
        if props > DICT_PROPS_MAX {
            return Err(XzError::Options);
        }
        self.dict.configure(dict_size_from_props(props))?;

        self.lzma.len = 0;
        self.sequence = Sequence::Control;
        self.need_dict_reset = true;
        self.temp_size = 0;
        Ok(())
    }

    pub(crate) fn release(&mut self) {
        self.dict.release();
    }

    pub(crate) fn run(&mut self, b: &mut XzBuffer<'_>) -> Result<Status, XzError> {
        while !b.input_exhausted() || self.sequence == Sequence::LzmaRun {
            match self.sequence {
                Sequence::Control => {
                    let control = b.next_in();

                    if control == 0x00 {
                        return Ok(Status::StreamEnd);
                    }

                    if control >= 0xE0 || control == 0x01 {
                        self.need_props = true;
                        self.need_dict_reset = false;
                        self.dict.reset(b.out_avail())?;
                    } else if self.need_dict_reset {
                        return Err(XzError::Data);
                    }

                    if control >= 0x80 {
                        self.uncompressed = u32::from(control & 0x1F) << 16;
                        self.sequence = Sequence::Uncompressed1;

                        if control >= 0xC0 {
                            // New properties follow; they reset the state too.
                            self.need_props = false;
                            self.next_sequence = Sequence::Properties;
                        } else if self.need_props {
                            return Err(XzError::Data);
                        } else {
                            self.next_sequence = Sequence::LzmaPrepare;
                            if control >= 0xA0 {
                                self.lzma.reset();
                                self.rc.reset();
                            }
                        }
                    } else {
                        if control > 0x02 {
                            return Err(XzError::Data);
                        }
                        self.sequence = Sequence::Compressed0;
                        self.next_sequence = Sequence::Copy;
                    }
                }

                Sequence::Uncompressed1 => {
                    self.uncompressed += u32::from(b.next_in()) << 8;
                    self.sequence = Sequence::Uncompressed2;
                }

                Sequence::Uncompressed2 => {
                    self.uncompressed += u32::from(b.next_in()) + 1;
                    self.sequence = Sequence::Compressed0;
                }

                Sequence::Compressed0 => {
                    self.compressed = u32::from(b.next_in()) << 8;
                    self.sequence = Sequence::Compressed1;
                }

                Sequence::Compressed1 => {
                    self.compressed += u32::from(b.next_in()) + 1;
                    self.sequence = self.next_sequence;
                }

                Sequence::Properties => {
                    if !self.lzma.set_properties(b.next_in()) {
                        return Err(XzError::Data);
                    }
                    self.rc.reset();
                    self.sequence = Sequence::LzmaPrepare;
                }

                Sequence::LzmaPrepare => {
                    if self.compressed < RC_INIT_BYTES {
                        return Err(XzError::Data);
                    }
                    if !self.rc.read_init(b) {
                        return Ok(Status::Ok);
                    }
                    self.compressed -= RC_INIT_BYTES;
                    self.sequence = Sequence::LzmaRun;
                }

                Sequence::LzmaRun => {
                    self.dict
                        .set_limit(b.out_avail().min(self.uncompressed as usize));
                    if !self.decode_lzma(b) {
                        return Err(XzError::Data);
                    }

                    self.uncompressed -= self.dict.flush(b) as u32;

                    if self.uncompressed == 0 {
                        if self.compressed > 0 || self.lzma.len > 0 || !self.rc.is_finished() {
                            return Err(XzError::Data);
                        }
                        self.rc.reset();
                        self.sequence = Sequence::Control;
                    } else if b.output_full()
                        || (b.input_exhausted() && self.temp_size < self.compressed as usize)
                    {
                        return Ok(Status::Ok);
                    }
                }

                Sequence::Copy => {
                    self.dict.uncompressed(b, &mut self.compressed);
                    if self.compressed > 0 {
                        return Ok(Status::Ok);
                    }
                    self.sequence = Sequence::Control;
                }
            }
        }

        Ok(Status::Ok)
    }

    /// Decode LZMA symbols from staged and/or caller input.
    ///
    /// Returns false if the data is corrupt.
    fn decode_lzma(&mut self, b: &mut XzBuffer<'_>) -> bool {
        let input = b.input;

        if self.temp_size > 0 || self.compressed == 0 {
            let staged = self.temp_size;
            let take = (2 * LZMA_IN_REQUIRED - staged)
                .min((self.compressed as usize).saturating_sub(staged))
                .min(b.in_avail());

            self.temp[staged..staged + take].copy_from_slice(&input[b.in_pos..b.in_pos + take]);

            let limit = if staged + take == self.compressed as usize {
                self.temp[staged + take..].fill(0);
                staged + take
            } else if staged + take < LZMA_IN_REQUIRED {
                self.temp_size += take;
                b.in_pos += take;
                return true;
            } else {
                staged + take - LZMA_IN_REQUIRED
            };

            let mut rc = RangeReader::new(&mut self.rc, &self.temp, 0, limit);
            if !self.lzma.decode(&mut self.dict, &mut rc) {
                return false;
            }
            let used = rc.pos;
            if used > staged + take {
                return false;
            }

            self.compressed -= used as u32;

            if used < staged {
                self.temp_size -= used;
                self.temp.copy_within(used..staged, 0);
                return true;
            }

            b.in_pos += used - staged;
            self.temp_size = 0;
        }

        let avail = b.in_avail();
        if avail >= LZMA_IN_REQUIRED {
            let limit = if avail >= self.compressed as usize + LZMA_IN_REQUIRED {
                b.in_pos + self.compressed as usize
            } else {
                input.len() - LZMA_IN_REQUIRED
            };

            let mut rc = RangeReader::new(&mut self.rc, input, b.in_pos, limit);
            if !self.lzma.decode(&mut self.dict, &mut rc) {
                return false;
            }
            let end = rc.pos;
            let used = end - b.in_pos;
            if used > self.compressed as usize {
                return false;
            }
            self.compressed -= used as u32;
            b.in_pos = end;
        }

        let avail = b.in_avail();
        if avail < LZMA_IN_REQUIRED {
            let keep = avail.min(self.compressed as usize);
            self.temp[..keep].copy_from_slice(&input[b.in_pos..b.in_pos + keep]);
            self.temp_size = keep;
            b.in_pos += keep;
        }

        true
    }
}
