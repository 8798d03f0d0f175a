//! dfwpatch: delta firmware patching for flash-constrained devices.
//!
//! The crate provides:
//! - A streaming XZ/LZMA2 decoder with a bounded dictionary (`xz`)
//! - Partition access traits and a RAM-backed partition (`partition`)
//! - The bsdiff-style patch applier with reserved-range translation (`patch`)
//! - DFW command records and image CRC verification (`dfw`)
//! - Host-side patch generation (`diff`)
//! - File-oriented helpers (`io`) and an optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use dfwpatch::diff::{self, CreateOptions};
//! use dfwpatch::partition::MemoryPartition;
//! use dfwpatch::patch::{self, ApplyOptions, FirmwareTarget, PatchContext, ReaderConfig};
//!
//! let old = b"firmware v1: hello old world".to_vec();
//! let new = b"firmware v2: hello new world".to_vec();
//!
//! let compressed = diff::create_patch(&old, &new, &CreateOptions::default()).unwrap();
//!
//! let mut ctx = PatchContext::new(ReaderConfig::default()).unwrap();
//! let mut out = MemoryPartition::erased(new.len());
//! patch::apply_patch(
//!     &mut ctx,
//!     compressed.as_slice(),
//!     0,
//!     compressed.len() as u64,
//!     &old,
//!     FirmwareTarget::Application,
//!     &mut out,
//!     &ApplyOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(out.as_slice(), new.as_slice());
//! ```

pub mod dfw;
pub mod diff;
pub mod partition;
pub mod patch;
pub mod xz;

#[cfg(feature = "file-io")]
pub mod io;

#[cfg(feature = "cli")]
pub mod cli;
