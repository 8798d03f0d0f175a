#![no_main]
use dfwpatch::xz::{DEFAULT_DICT_MAX, decode_all};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce an error, never a panic.
    let _ = decode_all(data, DEFAULT_DICT_MAX);
});
