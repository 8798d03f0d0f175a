// Integration tests for the patch pipeline.
//
// Patches are produced with the host-side generator (diff + XZ framing)
// and applied through the public session API, covering the image sizes
// around the reader window, reserved-range translation, damaged streams
// and header rejection.

use dfwpatch::diff::{self, CreateOptions};
use dfwpatch::partition::{MemoryPartition, PartitionError, PartitionWrite};
use dfwpatch::patch::{
    ApplyOptions, ApplyStats, FirmwareTarget, ImageLayout, PatchContext, PatchError,
    ReaderConfig, ReservedRange, apply_patch, encode_signed_length,
};
use dfwpatch::xz::encoder::{self, XzOptions};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn generate_data(size: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    let mut data = Vec::with_capacity(size);
    for _ in 0..size {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        data.push((state >> 33) as u8);
    }
    data
}

fn mutate_data(source: &[u8], change_pct: f64, seed: u64) -> Vec<u8> {
    let mut target = source.to_vec();
    let mut state = seed;
    let changes = ((change_pct / 100.0) * source.len() as f64) as usize;
    for _ in 0..changes {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let pos = (state >> 33) as usize % target.len();
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        target[pos] = (state >> 33) as u8;
    }
    target
}

/// A new firmware build: an inserted function, a removed one, a patched
/// constant table and a longer tail.
fn next_release(old: &[u8]) -> Vec<u8> {
    let mut new = Vec::with_capacity(old.len() + 512);
    new.extend_from_slice(&old[..3000]);
    new.extend_from_slice(&generate_data(200, 77));
    new.extend_from_slice(&mutate_data(&old[3000..7000], 1.0, 5));
    new.extend_from_slice(&old[8000..]);
    new.extend_from_slice(&generate_data(300, 78));
    new
}

fn create(old: &[u8], new: &[u8]) -> Vec<u8> {
    diff::create_patch(old, new, &CreateOptions::default()).unwrap()
}

fn apply_with(
    old: &[u8],
    patch: &[u8],
    extent: usize,
    target: FirmwareTarget,
    options: &ApplyOptions,
    config: ReaderConfig,
) -> Result<(Vec<u8>, ApplyStats), PatchError> {
    let mut ctx = PatchContext::new(config)?;
    let mut out = MemoryPartition::erased(extent);
    let stats = apply_patch(
        &mut ctx,
        patch,
        0,
        patch.len() as u64,
        old,
        target,
        &mut out,
        options,
    )?;
    Ok((out.into_inner(), stats))
}

fn apply(old: &[u8], patch: &[u8], extent: usize) -> Result<Vec<u8>, PatchError> {
    apply_with(
        old,
        patch,
        extent,
        FirmwareTarget::Application,
        &ApplyOptions::default(),
        ReaderConfig::default(),
    )
    .map(|(image, _)| image)
}

fn roundtrip(old: &[u8], new: &[u8]) {
    let patch = create(old, new);
    let rebuilt = apply(old, &patch, new.len()).unwrap();
    assert!(
        rebuilt == new,
        "roundtrip mismatch (old={}, new={}, patch={})",
        old.len(),
        new.len(),
        patch.len()
    );
}

/// Partition double recording every write.
struct RecordingPartition {
    data: Vec<u8>,
    writes: Vec<(u64, usize)>,
}

impl RecordingPartition {
    fn erased(size: usize) -> Self {
        Self {
            data: vec![0xFF; size],
            writes: Vec::new(),
        }
    }
}

impl PartitionWrite for RecordingPartition {
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), PartitionError> {
        let start = offset as usize;
        if start + data.len() > self.data.len() {
            return Err(PartitionError::OutOfRange {
                offset,
                len: data.len(),
                size: self.data.len() as u64,
            });
        }
        self.data[start..start + data.len()].copy_from_slice(data);
        self.writes.push((offset, data.len()));
        Ok(())
    }
}

fn with_reserved(logical: &[u8], range: ReservedRange, fill: u8) -> Vec<u8> {
    let start = range.start() as usize;
    let mut physical = logical[..start].to_vec();
    physical.resize(start + range.len() as usize, fill);
    physical.extend_from_slice(&logical[start..]);
    physical
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn roundtrip_sizes_around_window() {
    for (i, size) in [1usize, 511, 512, 513, 10_000].into_iter().enumerate() {
        let old = generate_data(size, i as u64 + 1);
        let new = mutate_data(&old, 5.0, i as u64 + 100);
        roundtrip(&old, &new);
    }
}

#[test]
fn roundtrip_from_empty_old_image() {
    let new = generate_data(513, 9);
    roundtrip(&[], &new);
}

#[test]
fn roundtrip_unrelated_images() {
    roundtrip(&generate_data(4096, 1), &generate_data(3000, 2));
}

#[test]
fn roundtrip_firmware_release() {
    let old = generate_data(10_000, 42);
    let new = next_release(&old);
    roundtrip(&old, &new);
}

#[test]
fn regenerated_patch_is_stable() {
    let old = generate_data(5000, 3);
    let new = mutate_data(&old, 2.0, 4);
    assert_eq!(create(&old, &new), create(&old, &new));
}

#[test]
fn shrinking_to_one_byte() {
    let old = generate_data(2048, 8);
    roundtrip(&old, &old[100..101]);
}

// ---------------------------------------------------------------------------
// Invariance
// ---------------------------------------------------------------------------

#[test]
fn chunk_size_does_not_change_image() {
    let old = generate_data(10_000, 11);
    let new = next_release(&old);
    let patch = create(&old, &new);

    let images: Vec<Vec<u8>> = [16usize, 512, 1, 4096]
        .into_iter()
        .map(|chunk_size| {
            let options = ApplyOptions {
                chunk_size,
                ..ApplyOptions::default()
            };
            let (image, _) = apply_with(
                &old,
                &patch,
                new.len(),
                FirmwareTarget::Application,
                &options,
                ReaderConfig::default(),
            )
            .unwrap();
            image
        })
        .collect();

    for image in &images {
        assert_eq!(image, &new);
    }
}

#[test]
fn reader_window_does_not_change_image() {
    let old = generate_data(10_000, 12);
    let new = next_release(&old);
    let patch = create(&old, &new);

    for window_size in [1usize, 7, 64, 512] {
        let config = ReaderConfig {
            window_size,
            ..ReaderConfig::default()
        };
        let (image, stats) = apply_with(
            &old,
            &patch,
            new.len(),
            FirmwareTarget::Application,
            &ApplyOptions::default(),
            config,
        )
        .unwrap();
        assert_eq!(image, new, "window {window_size}");
        assert_eq!(stats.bytes_written, new.len() as u64);
    }
}

#[test]
fn interrupted_session_does_not_leak_into_next() {
    let old = generate_data(3000, 13);
    let new = mutate_data(&old, 3.0, 14);
    let patch = create(&old, &new);

    let mut ctx = PatchContext::new(ReaderConfig::default()).unwrap();
    let mut first = [0u8; 100];
    {
        let mut session = ctx.begin(patch.as_slice(), 0, patch.len() as u64).unwrap();
        session.reader_mut().read_exact(&mut first).unwrap();
        // Dropped mid-stream.
    }

    let mut session = ctx.begin(patch.as_slice(), 0, patch.len() as u64).unwrap();
    let mut again = [0u8; 100];
    session.reader_mut().read_exact(&mut again).unwrap();
    assert_eq!(first, again);
    session.close();

    let mut out = MemoryPartition::erased(new.len());
    apply_patch(
        &mut ctx,
        patch.as_slice(),
        0,
        patch.len() as u64,
        old.as_slice(),
        FirmwareTarget::Application,
        &mut out,
        &ApplyOptions::default(),
    )
    .unwrap();
    assert_eq!(out.as_slice(), new.as_slice());
}

// ---------------------------------------------------------------------------
// Reserved range
// ---------------------------------------------------------------------------

#[test]
fn reserved_range_is_never_written() {
    let range = ReservedRange::new(4000, 4999).unwrap();
    let old_logical = generate_data(10_000, 21);
    let new_logical = next_release(&old_logical);
    let patch = create(&old_logical, &new_logical);

    // Reserved bytes of the running image hold live data the patch never sees.
    let old_physical = with_reserved(&old_logical, range, 0xA5);
    let expected = with_reserved(&new_logical, range, 0xFF);

    let options = ApplyOptions {
        layout: ImageLayout::new(0, Some(range)),
        ..ApplyOptions::default()
    };
    let mut ctx = PatchContext::new(ReaderConfig::default()).unwrap();
    let mut out = RecordingPartition::erased(expected.len());
    let stats = apply_patch(
        &mut ctx,
        patch.as_slice(),
        0,
        patch.len() as u64,
        old_physical.as_slice(),
        FirmwareTarget::Application,
        &mut out,
        &options,
    )
    .unwrap();

    assert!(out.data == expected, "image differs from expected layout");
    assert!(stats.reserved_skips > 0);
    assert_eq!(stats.bytes_written, new_logical.len() as u64);
    for &(offset, len) in &out.writes {
        let end = offset + len as u64;
        assert!(
            end <= range.start() || offset > range.stop(),
            "write [{offset:#x}, {end:#x}) touches {range}"
        );
    }
}

#[test]
fn reserved_range_beyond_image_is_ignored() {
    let range = ReservedRange::new(20_000, 20_999).unwrap();
    let old = generate_data(6000, 22);
    let new = mutate_data(&old, 4.0, 23);
    let patch = create(&old, &new);
    let options = ApplyOptions {
        layout: ImageLayout::new(0, Some(range)),
        ..ApplyOptions::default()
    };
    let (image, stats) = apply_with(
        &old,
        &patch,
        new.len(),
        FirmwareTarget::Application,
        &options,
        ReaderConfig::default(),
    )
    .unwrap();
    assert_eq!(image, new);
    assert_eq!(stats.reserved_skips, 0);
}

#[test]
fn bootloader_ignores_reserved_range() {
    let range = ReservedRange::new(100, 199).unwrap();
    let old = generate_data(4000, 24);
    let new = mutate_data(&old, 4.0, 25);
    let patch = create(&old, &new);
    let options = ApplyOptions {
        layout: ImageLayout::new(0, Some(range)),
        ..ApplyOptions::default()
    };
    for target in [FirmwareTarget::Bootloader, FirmwareTarget::MeterFirmware] {
        let (image, _) = apply_with(&old, &patch, new.len(), target, &options, ReaderConfig::default())
            .unwrap();
        assert_eq!(image, new, "{target}");
    }
}

// ---------------------------------------------------------------------------
// Damaged streams
// ---------------------------------------------------------------------------

#[test]
fn truncated_patch_always_fails() {
    let old = generate_data(2000, 31);
    let new = mutate_data(&old, 5.0, 32);
    let patch = create(&old, &new);

    for cut in (0..patch.len()).step_by(7).chain([patch.len() - 1]) {
        let result = apply(&old, &patch[..cut], new.len());
        assert!(result.is_err(), "cut at {cut} of {} succeeded", patch.len());
    }
}

#[test]
fn corrupted_patch_fails() {
    let old = generate_data(2000, 33);
    let new = mutate_data(&old, 5.0, 34);
    let patch = create(&old, &new);

    for pos in (0..patch.len()).step_by(11) {
        let mut damaged = patch.clone();
        damaged[pos] ^= 0x5A;
        assert!(
            apply(&old, &damaged, new.len()).is_err(),
            "flip at {pos} of {} went unnoticed",
            patch.len()
        );
    }
}

#[test]
fn old_image_too_short() {
    let old = generate_data(3000, 35);
    let new = mutate_data(&old, 1.0, 36);
    let patch = create(&old, &new);
    let err = apply(&old[..1000], &patch, new.len()).unwrap_err();
    assert!(matches!(err, PatchError::OldImageOutOfRange { .. }), "{err}");
}

#[test]
fn output_partition_too_small() {
    let old = generate_data(3000, 37);
    let new = mutate_data(&old, 1.0, 38);
    let patch = create(&old, &new);
    let err = apply(&old, &patch, new.len() - 1).unwrap_err();
    assert!(matches!(err, PatchError::Partition(PartitionError::OutOfRange { .. })), "{err}");
}

// ---------------------------------------------------------------------------
// Header rejection
// ---------------------------------------------------------------------------

fn raw_patch(ctrl: i32, data: i32, new_size: i32, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    for field in [ctrl, data, new_size] {
        payload.extend_from_slice(&encode_signed_length(field).unwrap());
    }
    payload.extend_from_slice(body);
    encoder::compress(&payload, XzOptions::default()).unwrap()
}

#[test]
fn invalid_headers_are_rejected_before_apply() {
    for (ctrl, data, new_size) in [(-1, 10, 10), (12, -1, 10), (12, 10, 0), (12, 10, -4)] {
        let patch = raw_patch(ctrl, data, new_size, &[0; 24]);
        let mut ctx = PatchContext::new(ReaderConfig::default()).unwrap();
        let mut session = ctx.begin(patch.as_slice(), 0, patch.len() as u64).unwrap();
        match session.validate_header() {
            Err(PatchError::InvalidHeader(h)) => {
                assert_eq!((h.ctrl_len, h.data_len, h.new_size), (ctrl, data, new_size));
            }
            other => panic!("header ({ctrl}, {data}, {new_size}) gave {other:?}"),
        }
        drop(session);
        assert!(!ctx.is_busy());

        let mut out = MemoryPartition::erased(16);
        let err = apply_patch(
            &mut ctx,
            patch.as_slice(),
            0,
            patch.len() as u64,
            &[0u8; 16][..],
            FirmwareTarget::Application,
            &mut out,
            &ApplyOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::InvalidHeader(_)));
        assert!(out.as_slice().iter().all(|&b| b == 0xFF), "image touched");
    }
}

#[test]
fn stream_ending_before_image_is_complete() {
    // One triple promising 10 EXTRA bytes, but only 4 follow.
    let mut body = Vec::new();
    body.extend_from_slice(&encode_signed_length(0).unwrap());
    body.extend_from_slice(&encode_signed_length(10).unwrap());
    body.extend_from_slice(b"abcd");
    let patch = raw_patch(12, 10, 10, &body);
    let err = apply(&[], &patch, 10).unwrap_err();
    assert!(matches!(err, PatchError::UnexpectedEndOfPatch), "{err}");
}

#[test]
fn negative_run_lengths_are_corrupt() {
    let mut body = Vec::new();
    body.extend_from_slice(&encode_signed_length(-3).unwrap());
    body.extend_from_slice(&[0; 20]);
    let patch = raw_patch(12, 10, 10, &body);
    let err = apply(&[0u8; 10], &patch, 10).unwrap_err();
    assert!(matches!(err, PatchError::CorruptPatch(_)), "{err}");
}

#[test]
fn trailing_payload_is_corrupt() {
    let mut body = Vec::new();
    body.extend_from_slice(&encode_signed_length(0).unwrap());
    body.extend_from_slice(&encode_signed_length(4).unwrap());
    body.extend_from_slice(b"abcd");
    body.extend_from_slice(&encode_signed_length(0).unwrap());
    body.extend_from_slice(b"junk");
    let patch = raw_patch(12, 4, 4, &body);
    let err = apply(&[], &patch, 4).unwrap_err();
    assert!(matches!(err, PatchError::CorruptPatch(_)), "{err}");
}
