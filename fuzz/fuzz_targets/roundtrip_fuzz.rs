#![no_main]
use dfwpatch::diff::{CreateOptions, create_patch};
use dfwpatch::partition::MemoryPartition;
use dfwpatch::patch::{ApplyOptions, FirmwareTarget, PatchContext, ReaderConfig, apply_patch};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte picks the split between the old and new image.
    let split = usize::from(data[0]) * data.len() / 256;
    let payload = &data[1..];
    let (old, new) = payload.split_at(split.min(payload.len()));
    if new.is_empty() {
        return;
    }

    let patch = create_patch(old, new, &CreateOptions::default()).unwrap();
    let mut ctx = PatchContext::new(ReaderConfig::default()).unwrap();
    let mut out = MemoryPartition::erased(new.len());
    apply_patch(
        &mut ctx,
        patch.as_slice(),
        0,
        patch.len() as u64,
        old,
        FirmwareTarget::Application,
        &mut out,
        &ApplyOptions::default(),
    )
    .unwrap();
    assert_eq!(out.as_slice(), new);
});
