#![no_main]
use dfwpatch::dfw::PatchCommand;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(command) = PatchCommand::parse(data) {
        // A parsed record must serialize back to the bytes it came from.
        assert_eq!(&command.to_bytes()[..], &data[..PatchCommand::SIZE]);
    }
});
