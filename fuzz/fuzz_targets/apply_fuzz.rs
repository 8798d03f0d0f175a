#![no_main]
use dfwpatch::partition::MemoryPartition;
use dfwpatch::patch::{
    ApplyOptions, FirmwareTarget, ImageLayout, PatchContext, ReaderConfig, ReservedRange,
    apply_patch,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    // First bytes steer the reader window and the reserved range.
    let window = usize::from(data[0]) + 1;
    let reserved = ReservedRange::new(u64::from(data[1]) * 16, u64::from(data[1]) * 16 + u64::from(data[2]));
    let patch = &data[3..];

    let Ok(mut ctx) = PatchContext::new(ReaderConfig {
        window_size: window,
        ..ReaderConfig::default()
    }) else {
        return;
    };
    let old = vec![0x5Au8; 4096];
    let mut out = MemoryPartition::erased(8192);
    let options = ApplyOptions {
        layout: ImageLayout::new(0, reserved),
        ..ApplyOptions::default()
    };
    let _ = apply_patch(
        &mut ctx,
        patch,
        0,
        patch.len() as u64,
        old.as_slice(),
        FirmwareTarget::Application,
        &mut out,
        &options,
    );
    assert!(!ctx.is_busy());
});
