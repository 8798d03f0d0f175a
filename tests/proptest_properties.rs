use dfwpatch::diff::{self, CreateOptions, DiffOptions};
use dfwpatch::partition::MemoryPartition;
use dfwpatch::patch::{
    ApplyOptions, FirmwareTarget, ImageLayout, PatchContext, ReaderConfig, ReservedRange,
    apply_patch, decode_signed_length, encode_signed_length,
};
use proptest::prelude::*;

fn apply(old: &[u8], patch: &[u8], extent: usize, options: &ApplyOptions, window: usize) -> Vec<u8> {
    let config = ReaderConfig {
        window_size: window,
        ..ReaderConfig::default()
    };
    let mut ctx = PatchContext::new(config).unwrap();
    let mut out = MemoryPartition::erased(extent);
    apply_patch(
        &mut ctx,
        patch,
        0,
        patch.len() as u64,
        old,
        FirmwareTarget::Application,
        &mut out,
        options,
    )
    .unwrap();
    out.into_inner()
}

fn splice(old: &[u8], at: usize, cut: usize, insert: &[u8]) -> Vec<u8> {
    let at = at.min(old.len());
    let end = (at + cut).min(old.len());
    let mut new = old[..at].to_vec();
    new.extend_from_slice(insert);
    new.extend_from_slice(&old[end..]);
    new
}

proptest! {
    #[test]
    fn prop_signed_length_roundtrip(value in (i32::MIN + 1)..=i32::MAX) {
        let bytes = encode_signed_length(value).unwrap();
        prop_assert_eq!(decode_signed_length(bytes), value);
        prop_assert_eq!(bytes[0] & 0x80 != 0, value < 0);
    }

    #[test]
    fn prop_create_apply_roundtrip(
        old in proptest::collection::vec(any::<u8>(), 0..4096),
        new in proptest::collection::vec(any::<u8>(), 1..4096),
    ) {
        let patch = diff::create_patch(&old, &new, &CreateOptions::default()).unwrap();
        let rebuilt = apply(&old, &patch, new.len(), &ApplyOptions::default(), 512);
        prop_assert_eq!(rebuilt, new);
    }

    #[test]
    fn prop_edited_image_roundtrip(
        old in proptest::collection::vec(any::<u8>(), 64..8192),
        at in 0usize..8192,
        cut in 0usize..512,
        insert in proptest::collection::vec(any::<u8>(), 0..256),
        window in 1usize..600,
        block_size in 4usize..64,
    ) {
        let new = splice(&old, at, cut, &insert);
        prop_assume!(!new.is_empty());
        let options = CreateOptions {
            diff: DiffOptions { block_size, min_match: block_size },
            ..CreateOptions::default()
        };
        let patch = diff::create_patch(&old, &new, &options).unwrap();
        let rebuilt = apply(&old, &patch, new.len(), &ApplyOptions::default(), window);
        prop_assert_eq!(rebuilt, new);
    }

    #[test]
    fn prop_reserved_range_transparent(
        old in proptest::collection::vec(any::<u8>(), 600..4096),
        at in 0usize..4096,
        cut in 0usize..256,
        insert in proptest::collection::vec(any::<u8>(), 0..256),
        start in 0u64..1024,
        len in 1u64..300,
        chunk_size in 1usize..700,
    ) {
        let new = splice(&old, at, cut, &insert);
        prop_assume!(new.len() > start as usize && old.len() > start as usize);
        let range = ReservedRange::new(start, start + len - 1).unwrap();

        let physical = |logical: &[u8], fill: u8| {
            let s = start as usize;
            let mut image = logical[..s].to_vec();
            image.resize(s + len as usize, fill);
            image.extend_from_slice(&logical[s..]);
            image
        };

        let patch = diff::create_patch(&old, &new, &CreateOptions::default()).unwrap();
        let options = ApplyOptions {
            chunk_size,
            layout: ImageLayout::new(0, Some(range)),
        };
        let rebuilt = apply(&physical(&old, 0x3C), &patch, new.len() + len as usize, &options, 512);
        prop_assert_eq!(rebuilt, physical(&new, 0xFF));
    }

    #[test]
    fn prop_garbage_never_panics(
        data in proptest::collection::vec(any::<u8>(), 0..1024),
        window in 1usize..64,
    ) {
        let config = ReaderConfig { window_size: window, ..ReaderConfig::default() };
        let mut ctx = PatchContext::new(config).unwrap();
        let mut out = MemoryPartition::erased(256);
        let _ = apply_patch(
            &mut ctx,
            data.as_slice(),
            0,
            data.len() as u64,
            &[0u8; 256][..],
            FirmwareTarget::Application,
            &mut out,
            &ApplyOptions::default(),
        );
        prop_assert!(!ctx.is_busy());
    }
}
