// Host-side patch generation.
//
// `generate` walks the new image looking for blocks that also occur in the
// old image (via `index::BlockIndex`), extends each hit backwards and
// forwards, and turns the gaps between hits into DIFF/EXTRA/SEEK triples
// in the bsdiff manner: a DIFF run extends from the previous hit for as
// long as it agrees with the old image on more than half of its bytes, and
// whatever is left before the next hit becomes EXTRA.

mod index;

use std::borrow::Cow;

use crate::patch::{PatchHeader, ReservedRange, encode_signed_length};

use index::BlockIndex;

#[cfg(feature = "encoder")]
use crate::xz::encoder::{self, XzOptions};

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("the new image is empty; a patch must produce at least one byte")]
    EmptyImage,
    #[error("{what} of {value} does not fit a 31-bit patch length")]
    TooLarge { what: &'static str, value: i64 },
    #[error("triples do not describe the images: {0}")]
    InvalidTriple(String),
    #[error("compression failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Matcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// Window width hashed per old-image position.
    pub block_size: usize,
    /// Shortest exact match that starts a new triple.
    pub min_match: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            block_size: 16,
            min_match: 24,
        }
    }
}

/// One DIFF/EXTRA/SEEK command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triple {
    /// Bytes rebuilt as old + delta.
    pub diff: usize,
    /// Bytes copied from the patch.
    pub extra: usize,
    /// Old-image cursor adjustment after the DIFF run.
    pub seek: i64,
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter().rev().zip(b.iter().rev()).take_while(|(x, y)| x == y).count()
}

/// Length of the prefix of `new` worth encoding as a DIFF against `old`:
/// the prefix maximising `2 * matches - length`.
fn approx_forward(old: &[u8], new: &[u8]) -> usize {
    let mut matches = 0i64;
    let mut best_score = 0i64;
    let mut best_len = 0;
    for (i, (a, b)) in old.iter().zip(new).enumerate() {
        if a == b {
            matches += 1;
        }
        let score = 2 * matches - (i as i64 + 1);
        if score > best_score {
            best_score = score;
            best_len = i + 1;
        }
    }
    best_len
}

/// Compute triples rebuilding `new` from `old`.
pub fn generate(old: &[u8], new: &[u8], options: &DiffOptions) -> Vec<Triple> {
    let look = options.block_size.max(4);
    let min_match = options.min_match.max(look);
    let index = BlockIndex::build(old, look);
    let hash = index.hash();

    let mut triples = Vec::new();
    let mut last_scan = 0;
    let mut last_old = 0;
    let mut scan = 0;
    let mut rolling: Option<u32> = None;

    while scan + look <= new.len() {
        let sum = rolling.unwrap_or_else(|| hash.checksum(&new[scan..]));
        let hit = index.lookup(sum).and_then(|pos| {
            let len = common_prefix(&old[pos..], &new[scan..]);
            (len >= min_match).then_some((pos, len))
        });

        let Some((pos, len)) = hit else {
            rolling = (scan + look < new.len()).then(|| hash.roll(sum, &new[scan..]));
            scan += 1;
            continue;
        };

        let back = common_suffix(&old[..pos], &new[last_scan..scan]);
        let (match_new, match_old) = (scan - back, pos - back);

        // Same alignment as the open DIFF run: keep extending it.
        if match_old as i64 - match_new as i64 == last_old as i64 - last_scan as i64 {
            scan = match_new + len + back;
            rolling = None;
            continue;
        }

        let diff = approx_forward(&old[last_old..], &new[last_scan..match_new]);
        triples.push(Triple {
            diff,
            extra: match_new - last_scan - diff,
            seek: match_old as i64 - (last_old + diff) as i64,
        });

        last_scan = match_new;
        last_old = match_old;
        scan = match_new + len + back;
        rolling = None;
    }

    if last_scan < new.len() {
        let diff = approx_forward(&old[last_old..], &new[last_scan..]);
        triples.push(Triple {
            diff,
            extra: new.len() - last_scan - diff,
            seek: 0,
        });
    }
    triples
}

// ---------------------------------------------------------------------------
// Serialisation
// ---------------------------------------------------------------------------

fn length(what: &'static str, value: i64) -> Result<[u8; 4], DiffError> {
    i32::try_from(value)
        .ok()
        .and_then(encode_signed_length)
        .ok_or(DiffError::TooLarge { what, value })
}

fn field(what: &'static str, value: usize) -> Result<i32, DiffError> {
    i32::try_from(value).map_err(|_| DiffError::TooLarge {
        what,
        value: value as i64,
    })
}

/// Serialise the uncompressed patch payload.
pub fn write_patch(triples: &[Triple], old: &[u8], new: &[u8]) -> Result<Vec<u8>, DiffError> {
    if new.is_empty() {
        return Err(DiffError::EmptyImage);
    }
    let covered: usize = triples.iter().map(|t| t.diff + t.extra).sum();
    if covered != new.len() {
        return Err(DiffError::InvalidTriple(format!(
            "triples cover {covered} bytes of a {}-byte image",
            new.len()
        )));
    }

    let header = PatchHeader {
        ctrl_len: field("control block", triples.len().saturating_mul(12))?,
        data_len: field("data block", covered)?,
        new_size: field("new image", new.len())?,
    };
    let header_bytes = header.to_bytes().ok_or(DiffError::TooLarge {
        what: "header",
        value: i64::from(i32::MIN),
    })?;

    let mut out = Vec::with_capacity(PatchHeader::SIZE + triples.len() * 12 + covered);
    out.extend_from_slice(&header_bytes);

    let mut old_pos: i64 = 0;
    let mut new_pos = 0;
    for (i, t) in triples.iter().enumerate() {
        out.extend_from_slice(&length("diff length", t.diff as i64)?);
        if t.diff > 0 {
            let start = usize::try_from(old_pos)
                .ok()
                .filter(|&s| s + t.diff <= old.len())
                .ok_or_else(|| {
                    DiffError::InvalidTriple(format!(
                        "triple {i} reads old bytes {old_pos}..{} of {}",
                        old_pos + t.diff as i64,
                        old.len()
                    ))
                })?;
            let delta = new[new_pos..new_pos + t.diff]
                .iter()
                .zip(&old[start..start + t.diff])
                .map(|(n, o)| n.wrapping_sub(*o));
            out.extend(delta);
        }
        new_pos += t.diff;
        old_pos += t.diff as i64;

        out.extend_from_slice(&length("extra length", t.extra as i64)?);
        out.extend_from_slice(&new[new_pos..new_pos + t.extra]);
        new_pos += t.extra;

        out.extend_from_slice(&length("seek", t.seek)?);
        old_pos += t.seek;
    }
    Ok(out)
}

/// Remove the reserved range from a physical image, giving the logical
/// image patches are computed over.
pub fn strip_reserved(image: &[u8], reserved: Option<ReservedRange>) -> Cow<'_, [u8]> {
    let Some(range) = reserved else {
        return Cow::Borrowed(image);
    };
    let start = range.start() as usize;
    if start >= image.len() {
        return Cow::Borrowed(image);
    }
    let resume = (range.stop() as usize).saturating_add(1).min(image.len());
    let mut logical = Vec::with_capacity(image.len() - (resume - start));
    logical.extend_from_slice(&image[..start]);
    logical.extend_from_slice(&image[resume..]);
    Cow::Owned(logical)
}

// ---------------------------------------------------------------------------
// One-call creation
// ---------------------------------------------------------------------------

/// Options for [`create_patch`].
#[cfg(feature = "encoder")]
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    pub diff: DiffOptions,
    pub xz: XzOptions,
}

/// Generate, serialise and XZ-compress a patch from `old` to `new`.
#[cfg(feature = "encoder")]
pub fn create_patch(old: &[u8], new: &[u8], options: &CreateOptions) -> Result<Vec<u8>, DiffError> {
    let triples = generate(old, new, &options.diff);
    log::debug!("{} triples for {} -> {} bytes", triples.len(), old.len(), new.len());
    let payload = write_patch(&triples, old, new)?;
    Ok(encoder::compress(&payload, options.xz)?)
}
