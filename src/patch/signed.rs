// Sign-magnitude 32-bit lengths.
//
// Every length in a patch payload is four bytes, most significant first.
// Bit 31 of the first byte is the sign; the remaining 31 bits are the
// magnitude. Zero has two encodings (0x00000000 and 0x80000000).

const SIGN: u8 = 0x80;

/// Decode a sign-magnitude length.
#[inline]
pub fn decode_signed_length(bytes: [u8; 4]) -> i32 {
    let magnitude = i32::from_be_bytes([bytes[0] & !SIGN, bytes[1], bytes[2], bytes[3]]);
    if bytes[0] & SIGN != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Encode a length. `i32::MIN` has no sign-magnitude form.
#[inline]
pub fn encode_signed_length(value: i32) -> Option<[u8; 4]> {
    if value == i32::MIN {
        return None;
    }
    let mut bytes = value.unsigned_abs().to_be_bytes();
    if value < 0 {
        bytes[0] |= SIGN;
    }
    Some(bytes)
}
