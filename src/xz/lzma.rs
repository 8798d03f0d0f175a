// LZMA symbol decoding: literals, matches, repeated matches.
//
// The state machine, probability layout and length/distance coding follow
// the LZMA format. Decoding runs until the dictionary limit is reached or
// the range reader passes its input limit; a match that cannot be copied
// completely keeps its remaining length in `len` for the next pass.

use super::dict::Dictionary;
use super::rc::{PROB_INIT, RangeReader};

const STATES: usize = 12;
/// States below this value mean the previous symbol was a literal.
const LIT_STATES: usize = 7;

const POS_STATES_MAX: usize = 1 << 4;

const LITERAL_CODER_SIZE: usize = 0x300;
const LITERAL_CODERS_MAX: usize = 1 << 4;

const MATCH_LEN_MIN: u32 = 2;
const LEN_LOW_SYMBOLS: u32 = 1 << 3;
const LEN_MID_SYMBOLS: u32 = 1 << 3;
const LEN_HIGH_SYMBOLS: u32 = 1 << 8;

const DIST_STATES: usize = 4;
const DIST_SLOTS: u32 = 1 << 6;
const DIST_MODEL_START: u32 = 4;
const DIST_MODEL_END: u32 = 14;
const FULL_DISTANCES: usize = 1 << (DIST_MODEL_END / 2);
const ALIGN_BITS: u32 = 4;
const ALIGN_SIZE: usize = 1 << ALIGN_BITS;

/// Largest valid LZMA properties byte ((pb * 5 + lp) * 9 + lc).
const PROPS_MAX: u8 = (4 * 5 + 4) * 9 + 8;

// ---------------------------------------------------------------------------
// State transitions
// ---------------------------------------------------------------------------

#[inline]
fn state_literal(state: usize) -> usize {
    if state <= 3 {
        0
    } else if state <= 9 {
        state - 3
    } else {
        state - 6
    }
}

#[inline]
fn state_match(state: usize) -> usize {
    if state < LIT_STATES { 7 } else { 10 }
}

#[inline]
fn state_long_rep(state: usize) -> usize {
    if state < LIT_STATES { 8 } else { 11 }
}

#[inline]
fn state_short_rep(state: usize) -> usize {
    if state < LIT_STATES { 9 } else { 11 }
}

#[inline]
fn is_literal_state(state: usize) -> bool {
    state < LIT_STATES
}

#[inline]
fn dist_state(len: u32) -> usize {
    if len < DIST_STATES as u32 + MATCH_LEN_MIN {
        (len - MATCH_LEN_MIN) as usize
    } else {
        DIST_STATES - 1
    }
}

// ---------------------------------------------------------------------------
// Length decoder
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct LengthDecoder {
    choice: u16,
    choice2: u16,
    low: [[u16; LEN_LOW_SYMBOLS as usize]; POS_STATES_MAX],
    mid: [[u16; LEN_MID_SYMBOLS as usize]; POS_STATES_MAX],
    high: [u16; LEN_HIGH_SYMBOLS as usize],
}

impl LengthDecoder {
    fn new() -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; LEN_LOW_SYMBOLS as usize]; POS_STATES_MAX],
            mid: [[PROB_INIT; LEN_MID_SYMBOLS as usize]; POS_STATES_MAX],
            high: [PROB_INIT; LEN_HIGH_SYMBOLS as usize],
        }
    }

    fn decode(&mut self, rc: &mut RangeReader<'_, '_>, pos_state: usize) -> u32 {
        let (probs, limit, base): (&mut [u16], u32, u32) = if !rc.bit(&mut self.choice) {
            (&mut self.low[pos_state][..], LEN_LOW_SYMBOLS, MATCH_LEN_MIN)
        } else if !rc.bit(&mut self.choice2) {
            (
                &mut self.mid[pos_state][..],
                LEN_MID_SYMBOLS,
                MATCH_LEN_MIN + LEN_LOW_SYMBOLS,
            )
        } else {
            (
                &mut self.high[..],
                LEN_HIGH_SYMBOLS,
                MATCH_LEN_MIN + LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS,
            )
        };
        base + rc.bittree(probs, limit) - limit
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

pub(crate) struct LzmaDecoder {
    rep0: u32,
    rep1: u32,
    rep2: u32,
    rep3: u32,
    state: usize,
    /// Match bytes still to copy into the dictionary.
    pub(crate) len: u32,

    lc: u32,
    literal_pos_mask: u32,
    pos_mask: u32,

    is_match: [[u16; POS_STATES_MAX]; STATES],
    is_rep: [u16; STATES],
    is_rep0: [u16; STATES],
    is_rep1: [u16; STATES],
    is_rep2: [u16; STATES],
    is_rep0_long: [[u16; POS_STATES_MAX]; STATES],
    dist_slot: [[u16; DIST_SLOTS as usize]; DIST_STATES],
    dist_special: [u16; FULL_DISTANCES - DIST_MODEL_END as usize],
    dist_align: [u16; ALIGN_SIZE],
    match_len: LengthDecoder,
    rep_len: LengthDecoder,
    literal: Box<[[u16; LITERAL_CODER_SIZE]]>,
}

impl LzmaDecoder {
    pub(crate) fn new() -> Self {
        Self {
            rep0: 0,
            rep1: 0,
            rep2: 0,
            rep3: 0,
            state: 0,
            len: 0,
            lc: 0,
            literal_pos_mask: 0,
            pos_mask: 0,
            is_match: [[PROB_INIT; POS_STATES_MAX]; STATES],
            is_rep: [PROB_INIT; STATES],
            is_rep0: [PROB_INIT; STATES],
            is_rep1: [PROB_INIT; STATES],
            is_rep2: [PROB_INIT; STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; STATES],
            dist_slot: [[PROB_INIT; DIST_SLOTS as usize]; DIST_STATES],
            dist_special: [PROB_INIT; FULL_DISTANCES - DIST_MODEL_END as usize],
            dist_align: [PROB_INIT; ALIGN_SIZE],
            match_len: LengthDecoder::new(),
            rep_len: LengthDecoder::new(),
            literal: vec![[PROB_INIT; LITERAL_CODER_SIZE]; LITERAL_CODERS_MAX].into_boxed_slice(),
        }
    }

    /// Reset state, reps and all probabilities (not the pending length).
    pub(crate) fn reset(&mut self) {
        self.state = 0;
        self.rep0 = 0;
        self.rep1 = 0;
        self.rep2 = 0;
        self.rep3 = 0;

        for row in &mut self.is_match {
            row.fill(PROB_INIT);
        }
        self.is_rep.fill(PROB_INIT);
        self.is_rep0.fill(PROB_INIT);
        self.is_rep1.fill(PROB_INIT);
        self.is_rep2.fill(PROB_INIT);
        for row in &mut self.is_rep0_long {
            row.fill(PROB_INIT);
        }
        for row in &mut self.dist_slot {
            row.fill(PROB_INIT);
        }
        self.dist_special.fill(PROB_INIT);
        self.dist_align.fill(PROB_INIT);
        self.match_len = LengthDecoder::new();
        self.rep_len = LengthDecoder::new();
        for coder in self.literal.iter_mut() {
            coder.fill(PROB_INIT);
        }
    }

    /// Decode an lc/lp/pb properties byte and reset. Returns false if the
    /// byte is invalid or lc + lp exceeds 4.
    pub(crate) fn set_properties(&mut self, mut props: u8) -> bool {
        if props > PROPS_MAX {
            return false;
        }

        let mut pb = 0;
        while props >= 9 * 5 {
            props -= 9 * 5;
            pb += 1;
        }
        let mut lp = 0;
        while props >= 9 {
            props -= 9;
            lp += 1;
        }
        let lc = u32::from(props);

        if lc + lp > 4 {
            return false;
        }

        self.pos_mask = (1 << pb) - 1;
        self.literal_pos_mask = (1 << lp) - 1;
        self.lc = lc;
        self.reset();
        true
    }

    /// Decode symbols into `dict` until it is full or input runs out.
    /// Returns false on a corrupt distance.
    pub(crate) fn decode(&mut self, dict: &mut Dictionary, rc: &mut RangeReader<'_, '_>) -> bool {
        if dict.has_space() && self.len > 0 && !dict.repeat(&mut self.len, self.rep0) {
            return false;
        }

        while dict.has_space() && !rc.limit_exceeded() {
            let pos_state = dict.pos & self.pos_mask as usize;

            if !rc.bit(&mut self.is_match[self.state][pos_state]) {
                self.literal(dict, rc);
            } else {
                if rc.bit(&mut self.is_rep[self.state]) {
                    self.rep_match(rc, pos_state);
                } else {
                    self.simple_match(rc, pos_state);
                }

                if !dict.repeat(&mut self.len, self.rep0) {
                    return false;
                }
            }
        }

        rc.normalize();
        true
    }

    fn literal(&mut self, dict: &mut Dictionary, rc: &mut RangeReader<'_, '_>) {
        let prev_byte = u32::from(dict.get(0));
        let low = prev_byte >> (8 - self.lc);
        let high = (dict.pos as u32 & self.literal_pos_mask) << self.lc;
        let probs = &mut self.literal[(low + high) as usize];

        let symbol = if is_literal_state(self.state) {
            rc.bittree(probs, 0x100)
        } else {
            let mut symbol = 1u32;
            let mut match_byte = u32::from(dict.get(self.rep0)) << 1;
            let mut offset = 0x100u32;
            loop {
                let match_bit = match_byte & offset;
                match_byte <<= 1;
                let i = offset + match_bit + symbol;
                if rc.bit(&mut probs[i as usize]) {
                    symbol = (symbol << 1) + 1;
                    offset &= match_bit;
                } else {
                    symbol <<= 1;
                    offset &= !match_bit;
                }
                if symbol >= 0x100 {
                    break symbol;
                }
            }
        };

        dict.put(symbol as u8);
        self.state = state_literal(self.state);
    }

    fn simple_match(&mut self, rc: &mut RangeReader<'_, '_>, pos_state: usize) {
        self.state = state_match(self.state);
        self.rep3 = self.rep2;
        self.rep2 = self.rep1;
        self.rep1 = self.rep0;

        self.len = self.match_len.decode(rc, pos_state);

        let probs = &mut self.dist_slot[dist_state(self.len)];
        let slot = rc.bittree(probs, DIST_SLOTS) - DIST_SLOTS;

        if slot < DIST_MODEL_START {
            self.rep0 = slot;
            return;
        }

        let limit = (slot >> 1) - 1;
        self.rep0 = 2 + (slot & 1);

        if slot < DIST_MODEL_END {
            self.rep0 <<= limit;
            // Slots 4..13 share one table; slot `s` owns entries from `rep0 - s`.
            let base = (self.rep0 - slot) as usize;
            rc.bittree_reverse(&mut self.dist_special[base..], &mut self.rep0, limit);
        } else {
            rc.direct(&mut self.rep0, limit - ALIGN_BITS);
            self.rep0 <<= ALIGN_BITS;
            rc.bittree_reverse(&mut self.dist_align, &mut self.rep0, ALIGN_BITS);
        }
    }

    fn rep_match(&mut self, rc: &mut RangeReader<'_, '_>, pos_state: usize) {
        if !rc.bit(&mut self.is_rep0[self.state]) {
            if !rc.bit(&mut self.is_rep0_long[self.state][pos_state]) {
                self.state = state_short_rep(self.state);
                self.len = 1;
                return;
            }
        } else {
            let distance;
            if !rc.bit(&mut self.is_rep1[self.state]) {
                distance = self.rep1;
            } else {
                if !rc.bit(&mut self.is_rep2[self.state]) {
                    distance = self.rep2;
                } else {
                    distance = self.rep3;
                    self.rep3 = self.rep2;
                }
                self.rep2 = self.rep1;
            }
            self.rep1 = self.rep0;
            self.rep0 = distance;
        }

        self.state = state_long_rep(self.state);
        self.len = self.rep_len.decode(rc, pos_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_decode() {
        let mut lzma = LzmaDecoder::new();
        // lc=3 lp=0 pb=2 (the common 0x5D).
        assert!(lzma.set_properties(0x5D));
        assert_eq!(lzma.lc, 3);
        assert_eq!(lzma.literal_pos_mask, 0);
        assert_eq!(lzma.pos_mask, 3);
        // lc=4 lp=1 exceeds the lc + lp limit.
        assert!(!lzma.set_properties(4 + 9));
        assert!(!lzma.set_properties(PROPS_MAX + 1));
    }

    #[test]
    fn state_transitions() {
        assert_eq!(state_literal(0), 0);
        assert_eq!(state_literal(5), 2);
        assert_eq!(state_literal(11), 5);
        assert_eq!(state_match(3), 7);
        assert_eq!(state_match(8), 10);
        assert_eq!(state_long_rep(0), 8);
        assert_eq!(state_short_rep(10), 11);
    }

    #[test]
    fn dist_states() {
        assert_eq!(dist_state(2), 0);
        assert_eq!(dist_state(5), 3);
        assert_eq!(dist_state(273), 3);
    }

    // `xz --lzma2=dict=4096,lc=0,pb=1` of a line whose repeats sit at
    // distances 4 and 5 (distance slots 3 and 4).
    const SHORT_DISTANCES: &[u8] = &[
        0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, 0x00, 0x01, 0x69, 0x22, 0xDE, 0x36,
        0x03, 0xC0, 0x20, 0x39, 0x21, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0xCA, 0x24, 0x86, 0xF3, 0xE0, 0x00, 0x38, 0x00, 0x18, 0x2D, 0x00, 0x30,
        0x98, 0xE4, 0x0E, 0x74, 0xB2, 0x73, 0xD9, 0x2A, 0x11, 0x91, 0x07, 0x10,
        0x9A, 0x3E, 0xC9, 0xA7, 0xAE, 0xC2, 0x51, 0xC0, 0xF6, 0x00, 0x00, 0x00,
        0x2B, 0x00, 0xC6, 0x6B, 0x00, 0x01, 0x34, 0x39, 0xD4, 0xCE, 0xA9, 0xC4,
        0x90, 0x42, 0x99, 0x0D, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x59, 0x5A,
    ];
    const SHORT_DISTANCES_TEXT: &[u8] = b"abcdabcdabcdabcd-vwxyzvwxyzvwxyzvwxyz-abcdabcdvwxyzvwxyz\n";

    #[test]
    fn short_match_distances_decode() {
        let out = crate::xz::decode_all(SHORT_DISTANCES, crate::xz::DEFAULT_DICT_MAX).unwrap();
        assert_eq!(out, SHORT_DISTANCES_TEXT);
    }

    #[test]
    fn short_match_distances_decode_byte_by_byte() {
        use crate::xz::{DecodeMode, Status, XzBuffer, XzDecoder};

        let mut decoder = XzDecoder::new(DecodeMode::Dynamic, crate::xz::DEFAULT_DICT_MAX).unwrap();
        let mut out = Vec::new();
        let mut in_pos = 0;
        loop {
            let fed = (in_pos + 1).min(SHORT_DISTANCES.len());
            let mut byte = [0u8; 1];
            let mut b = XzBuffer::new(&SHORT_DISTANCES[..fed], &mut byte);
            b.in_pos = in_pos;
            let status = decoder.run(&mut b).unwrap();
            in_pos = b.in_pos;
            let n = b.out_pos;
            out.extend_from_slice(&byte[..n]);
            if status == Status::StreamEnd {
                break;
            }
        }
        assert_eq!(out, SHORT_DISTANCES_TEXT);
    }
}
