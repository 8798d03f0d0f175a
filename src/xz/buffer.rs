// Caller-owned input/output pair handed to the decoder on every call.

/// Input and output windows with their positions.
///
/// The decoder reads `input[in_pos..]` and writes `output[out_pos..]`,
/// advancing both positions. Bytes before `out_pos` are never touched.
/// An absent input is simply an empty slice.
#[derive(Debug)]
pub struct XzBuffer<'a> {
    pub input: &'a [u8],
    pub in_pos: usize,
    pub output: &'a mut [u8],
    pub out_pos: usize,
}

impl<'a> XzBuffer<'a> {
    pub fn new(input: &'a [u8], output: &'a mut [u8]) -> Self {
        Self {
            input,
            in_pos: 0,
            output,
            out_pos: 0,
        }
    }

    #[inline]
    pub(crate) fn in_avail(&self) -> usize {
        self.input.len() - self.in_pos
    }

    #[inline]
    pub(crate) fn out_avail(&self) -> usize {
        self.output.len() - self.out_pos
    }

    #[inline]
    pub(crate) fn input_exhausted(&self) -> bool {
        self.in_pos == self.input.len()
    }

    #[inline]
    pub(crate) fn output_full(&self) -> bool {
        self.out_pos == self.output.len()
    }

    /// Take the next input byte. Callers check availability first.
    #[inline]
    pub(crate) fn next_in(&mut self) -> u8 {
        let byte = self.input[self.in_pos];
        self.in_pos += 1;
        byte
    }
}
