// Image address layout and reserved-range translation.
//
// The old and new images share one physical address line that contains a
// single reserved range. Patch content never describes the reserved bytes,
// so every logical cursor that moves into or through the range is pushed
// past it by the range length. Old-image seeks follow a two-state rule:
// the first crossing always adds the range length, later crossings add or
// subtract it depending on the seek direction.

use std::fmt;

/// Inclusive physical byte range `[start, stop]` excluded from patch data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedRange {
    start: u64,
    stop: u64,
}

impl ReservedRange {
    /// Returns `None` when `stop < start` or the range exceeds `i64`.
    pub fn new(start: u64, stop: u64) -> Option<Self> {
        if stop < start || stop > i64::MAX as u64 {
            return None;
        }
        Some(Self { start, stop })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn stop(&self) -> u64 {
        self.stop
    }

    /// `stop - start + 1`.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.stop - self.start + 1
    }

    pub fn contains(&self, address: u64) -> bool {
        (self.start..=self.stop).contains(&address)
    }

    /// Whether `[dest, dest + count)` shares at least one byte with the range.
    pub fn intersects(&self, dest: i64, count: usize) -> bool {
        if count == 0 {
            return false;
        }
        let end = dest.saturating_add(count as i64);
        dest <= self.stop as i64 && end > self.start as i64
    }

    fn bounds(&self) -> (i64, i64, i64) {
        (self.start as i64, self.stop as i64, self.len() as i64)
    }
}

impl fmt::Display for ReservedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}]", self.start, self.stop)
    }
}

/// Which image a patch rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum FirmwareTarget {
    /// Application image; the only target with a reserved range.
    #[default]
    Application,
    Bootloader,
    MeterFirmware,
}

impl FirmwareTarget {
    pub fn uses_reserved_range(self) -> bool {
        matches!(self, Self::Application)
    }
}

impl fmt::Display for FirmwareTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Application => "application",
            Self::Bootloader => "bootloader",
            Self::MeterFirmware => "meter-firmware",
        })
    }
}

/// Where the images live on the physical address line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageLayout {
    /// Physical address of the old image's logical offset 0.
    pub old_base: u64,
    /// Range excluded from patch data, if the board has one.
    pub reserved: Option<ReservedRange>,
}

impl ImageLayout {
    pub fn new(old_base: u64, reserved: Option<ReservedRange>) -> Self {
        Self { old_base, reserved }
    }

    /// The reserved range that applies when rebuilding `target`.
    pub fn reserved_for(&self, target: FirmwareTarget) -> Option<ReservedRange> {
        if target.uses_reserved_range() {
            self.reserved
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// One contiguous physical piece of a translated transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Piece {
    pub address: i64,
    /// Offset into the caller's buffer.
    pub offset: usize,
    pub len: usize,
}

/// Physical pieces of one logical transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Translated {
    pieces: [Piece; 2],
    count: usize,
    /// The transfer jumped over the reserved range.
    pub skipped: bool,
}

impl Translated {
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces[..self.count]
    }
}

/// Map `count` bytes at `cursor + offset` onto physical addresses.
///
/// When the span meets the reserved range, `cursor` is advanced by the
/// range length so later offsets from the same cursor land past it.
pub(crate) fn translate(
    reserved: Option<ReservedRange>,
    cursor: &mut i64,
    offset: usize,
    count: usize,
) -> Translated {
    let dest = *cursor + offset as i64;
    let whole = Piece {
        address: dest,
        offset: 0,
        len: count,
    };

    let Some(range) = reserved.filter(|r| r.intersects(dest, count)) else {
        return Translated {
            pieces: [whole, whole],
            count: 1,
            skipped: false,
        };
    };

    let (start, _, skip) = range.bounds();
    *cursor += skip;

    if dest < start {
        let lower = (start - dest) as usize;
        let below = Piece {
            address: dest,
            offset: 0,
            len: lower,
        };
        let above = Piece {
            address: dest + skip + lower as i64,
            offset: lower,
            len: count - lower,
        };
        Translated {
            pieces: [below, above],
            count: 2,
            skipped: true,
        }
    } else {
        let moved = Piece {
            address: dest + skip,
            ..whole
        };
        Translated {
            pieces: [moved, moved],
            count: 1,
            skipped: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Seek adjustment
// ---------------------------------------------------------------------------

/// Whether the old-image cursor has already been pushed past the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrossingState {
    #[default]
    NotCrossed,
    CrossedOnce,
}

/// Old-image crossing state plus the seek adjustment rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekTracker {
    reserved: Option<ReservedRange>,
    state: CrossingState,
}

impl SeekTracker {
    pub fn new(reserved: Option<ReservedRange>) -> Self {
        Self {
            reserved,
            state: CrossingState::NotCrossed,
        }
    }

    pub fn state(&self) -> CrossingState {
        self.state
    }

    /// A read skipped the range.
    pub fn mark_crossed(&mut self) {
        self.state = CrossingState::CrossedOnce;
    }

    pub fn reset(&mut self) {
        self.state = CrossingState::NotCrossed;
    }

    /// Old-image position after seeking `ctrl` bytes from `before`.
    pub fn seek(&mut self, before: i64, ctrl: i32) -> i64 {
        let after = before + i64::from(ctrl);
        let Some(range) = self.reserved else {
            return after;
        };
        let (start, stop, skip) = range.bounds();

        let landed_inside = (start..=stop).contains(&after);
        let jumped_forward = before <= start && after >= stop;
        let jumped_back = before >= stop && after <= start;
        if !(landed_inside || jumped_forward || jumped_back) {
            return after;
        }

        match self.state {
            CrossingState::NotCrossed => {
                self.state = CrossingState::CrossedOnce;
                after + skip
            }
            CrossingState::CrossedOnce if ctrl < 0 => after - skip,
            CrossingState::CrossedOnce => after + skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> ReservedRange {
        ReservedRange::new(100, 149).unwrap()
    }

    #[test]
    fn range_basics() {
        let r = range();
        assert_eq!(r.len(), 50);
        assert!(r.contains(100) && r.contains(149));
        assert!(!r.contains(99) && !r.contains(150));
        assert!(ReservedRange::new(10, 9).is_none());
        assert_eq!(ReservedRange::new(7, 7).unwrap().len(), 1);
    }

    #[test]
    fn intersection_is_exact() {
        let r = range();
        assert!(!r.intersects(90, 10));
        assert!(r.intersects(90, 11));
        assert!(r.intersects(149, 1));
        assert!(!r.intersects(150, 100));
        assert!(r.intersects(0, 1000));
        assert!(!r.intersects(120, 0));
    }

    #[test]
    fn reserved_only_for_application() {
        let layout = ImageLayout::new(0, Some(range()));
        assert_eq!(layout.reserved_for(FirmwareTarget::Application), Some(range()));
        assert_eq!(layout.reserved_for(FirmwareTarget::Bootloader), None);
        assert_eq!(layout.reserved_for(FirmwareTarget::MeterFirmware), None);
    }

    #[test]
    fn translate_without_range_is_identity() {
        let mut cursor = 40;
        let t = translate(None, &mut cursor, 8, 16);
        assert_eq!(
            t.pieces(),
            &[Piece {
                address: 48,
                offset: 0,
                len: 16
            }]
        );
        assert!(!t.skipped);
        assert_eq!(cursor, 40);
    }

    #[test]
    fn translate_splits_across_range() {
        let mut cursor = 80;
        let t = translate(Some(range()), &mut cursor, 10, 20);
        assert_eq!(
            t.pieces(),
            &[
                Piece {
                    address: 90,
                    offset: 0,
                    len: 10
                },
                Piece {
                    address: 150,
                    offset: 10,
                    len: 10
                },
            ]
        );
        assert!(t.skipped);
        assert_eq!(cursor, 130);

        // Next chunk from the same cursor continues after the range.
        let t = translate(Some(range()), &mut cursor, 30, 10);
        assert_eq!(t.pieces()[0].address, 160);
        assert!(!t.skipped);
    }

    #[test]
    fn translate_inside_range_moves_whole_transfer() {
        let mut cursor = 100;
        let t = translate(Some(range()), &mut cursor, 5, 4);
        assert_eq!(
            t.pieces(),
            &[Piece {
                address: 155,
                offset: 0,
                len: 4
            }]
        );
        assert_eq!(cursor, 150);
    }

    #[test]
    fn translate_touching_start_is_untouched() {
        let mut cursor = 0;
        let t = translate(Some(range()), &mut cursor, 0, 100);
        assert_eq!(t.pieces().len(), 1);
        assert!(!t.skipped);
        assert_eq!(cursor, 0);
    }

    #[test]
    fn seek_away_from_range_is_plain() {
        let mut tracker = SeekTracker::new(Some(range()));
        assert_eq!(tracker.seek(10, 20), 30);
        assert_eq!(tracker.seek(300, -20), 280);
        assert_eq!(tracker.state(), CrossingState::NotCrossed);
    }

    #[test]
    fn first_crossing_always_adds() {
        let mut tracker = SeekTracker::new(Some(range()));
        // Landing inside.
        assert_eq!(tracker.seek(50, 60), 160);
        assert_eq!(tracker.state(), CrossingState::CrossedOnce);

        // Backward jump on a fresh tracker still adds on the first crossing.
        let mut tracker = SeekTracker::new(Some(range()));
        assert_eq!(tracker.seek(200, -150), 100);
    }

    #[test]
    fn later_crossings_follow_direction() {
        let mut tracker = SeekTracker::new(Some(range()));
        tracker.mark_crossed();
        assert_eq!(tracker.seek(200, -150), 0);
        assert_eq!(tracker.seek(0, 160), 210);
        assert_eq!(tracker.state(), CrossingState::CrossedOnce);
        tracker.reset();
        assert_eq!(tracker.state(), CrossingState::NotCrossed);
    }

    #[test]
    fn seek_without_range_never_changes_state() {
        let mut tracker = SeekTracker::new(None);
        assert_eq!(tracker.seek(50, 60), 110);
        assert_eq!(tracker.state(), CrossingState::NotCrossed);
    }
}
