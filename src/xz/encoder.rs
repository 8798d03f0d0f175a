// XZ container writer for host-side patch creation.
//
// The LZMA2 payload comes from lzma-rs; this module frames it as a single
// block stream with the dictionary size and check type the target device
// expects. The dictionary property is what bounds decoder memory on the
// device, so it is written explicitly instead of lzma-rs's 8 MiB default.

use std::io;

use sha2::{Digest, Sha256};

use super::check::write_vli;
use super::{
    BlockFlags, CheckKind, DICT_PROPS_MAX, FILTER_LZMA2, FOOTER_MAGIC, HEADER_MAGIC,
    dict_size_from_props,
};

/// Framing options for [`compress`].
#[derive(Debug, Clone, Copy)]
pub struct XzOptions {
    /// Dictionary size to declare; rounded up to the next encodable size.
    pub dict_size: u32,
    /// Integrity check; `None`, `Crc32` and `Sha256` can be produced.
    pub check: CheckKind,
}

impl Default for XzOptions {
    fn default() -> Self {
        Self {
            dict_size: super::DEFAULT_DICT_MAX,
            check: CheckKind::Crc32,
        }
    }
}

/// Smallest dictionary property byte whose size covers `dict_size`.
pub fn dict_props_for(dict_size: u32) -> u8 {
    (0..=DICT_PROPS_MAX)
        .find(|&props| dict_size_from_props(props) >= dict_size)
        .unwrap_or(DICT_PROPS_MAX)
}

/// Compress `payload` into a complete `.xz` stream.
pub fn compress(payload: &[u8], options: XzOptions) -> io::Result<Vec<u8>> {
    let check_id = match options.check {
        CheckKind::None | CheckKind::Crc32 | CheckKind::Sha256 => options.check.id(),
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot produce check type {}", other.id()),
            ));
        }
    };

    let mut lzma2 = Vec::with_capacity(payload.len() + payload.len() / 0x8000 + 16);
    lzma_rs::lzma2_compress(&mut io::Cursor::new(payload), &mut lzma2)?;

    let mut out = Vec::with_capacity(lzma2.len() + 128);
    let stream_flags = [0x00, check_id];

    // Stream header.
    out.extend_from_slice(&HEADER_MAGIC);
    out.extend_from_slice(&stream_flags);
    out.extend_from_slice(&crc32fast::hash(&stream_flags).to_le_bytes());

    // Block header.
    let header = block_header(lzma2.len() as u64, payload.len() as u64, options.dict_size);
    out.extend_from_slice(&header);

    // Block data, padding, check.
    out.extend_from_slice(&lzma2);
    let padding = (4 - lzma2.len() % 4) % 4;
    out.resize(out.len() + padding, 0);
    match options.check {
        CheckKind::Crc32 => out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes()),
        CheckKind::Sha256 => out.extend_from_slice(&Sha256::digest(payload)),
        _ => {}
    }

    // Index.
    let unpadded = header.len() as u64 + lzma2.len() as u64 + options.check.size() as u64;
    let mut index = vec![0x00];
    write_vli(&mut index, 1);
    write_vli(&mut index, unpadded);
    write_vli(&mut index, payload.len() as u64);
    while index.len() % 4 != 0 {
        index.push(0);
    }
    let index_crc = crc32fast::hash(&index);
    index.extend_from_slice(&index_crc.to_le_bytes());
    let backward_size = (index.len() / 4 - 1) as u32;
    out.extend_from_slice(&index);

    // Stream footer.
    let mut footer_fields = Vec::with_capacity(6);
    footer_fields.extend_from_slice(&backward_size.to_le_bytes());
    footer_fields.extend_from_slice(&stream_flags);
    out.extend_from_slice(&crc32fast::hash(&footer_fields).to_le_bytes());
    out.extend_from_slice(&footer_fields);
    out.extend_from_slice(&FOOTER_MAGIC);

    Ok(out)
}

fn block_header(compressed: u64, uncompressed: u64, dict_size: u32) -> Vec<u8> {
    let flags = BlockFlags::COMPRESSED_SIZE | BlockFlags::UNCOMPRESSED_SIZE;

    let mut header = vec![0x00, flags.bits()];
    write_vli(&mut header, compressed);
    write_vli(&mut header, uncompressed);
    header.extend_from_slice(&[FILTER_LZMA2, 0x01, dict_props_for(dict_size)]);

    // Size byte counts the CRC32 too.
    while (header.len() + 4) % 4 != 0 {
        header.push(0);
    }
    header[0] = ((header.len() + 4) / 4 - 1) as u8;

    let crc = crc32fast::hash(&header);
    header.extend_from_slice(&crc.to_le_bytes());
    header
}
