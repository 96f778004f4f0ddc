//! The index assembler: header, offset table, tier directories and the
//! shared blob concatenated into one append-only artifact.
//!
//! File layout (little-endian throughout):
//!
//! ```text
//! magic             "geotier.index\0"            14 bytes
//! checksum          SHA-512 of the dataset       64 bytes
//! min_exp, max_exp  tier exponent bounds          1 byte each (i8)
//! ratio             cell/element size ratio       1 byte
//! offset table      (tiers + 1) x 6-byte offsets; entry i is the absolute
//!                   start of tier i's directory block, the final entry is
//!                   the start of the shared blob region
//! directories       per tier, ascending address: address (tier width),
//!                   blob offset (6 bytes), blob length (3 bytes)
//! blob              serialized search squares, located via directories
//! ```
//!
//! The file is written once, front to back, and never rewritten.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use bytes::{BufMut, BytesMut};

use crate::dataset::{CHECKSUM_LEN, DatasetChecksum};
use crate::error::{GeotierError, Result};
use crate::tier::Tier;

/// Format identifier at offset zero.
pub const MAGIC: &[u8; 14] = b"geotier.index\0";

/// Bytes per blob offset, in directory entries and the offset table.
pub(crate) const BLOB_OFFSET_BYTES: usize = 6;
/// Bytes per blob length in directory entries.
pub(crate) const BLOB_LEN_BYTES: usize = 3;

/// Magic, checksum, and the three single-byte parameters.
pub(crate) const HEADER_LEN: usize = MAGIC.len() + CHECKSUM_LEN + 3;

/// Bytes of the offset table.
pub(crate) const OFFSET_TABLE_LEN: usize = (Tier::COUNT + 1) * BLOB_OFFSET_BYTES;

/// Size of one directory entry for a tier.
pub(crate) fn directory_entry_len(tier: Tier) -> usize {
    tier.address_width() + BLOB_OFFSET_BYTES + BLOB_LEN_BYTES
}

/// Write the final index file from the per-tier directory files and the
/// shared blob file.
pub fn assemble(
    output: &Path,
    checksum: &DatasetChecksum,
    directory_paths: &[std::path::PathBuf],
    blob_path: &Path,
) -> Result<()> {
    if directory_paths.len() != Tier::COUNT {
        return Err(GeotierError::InvalidInput(format!(
            "expected {} directory files, got {}",
            Tier::COUNT,
            directory_paths.len()
        )));
    }

    let mut offsets = [0u64; Tier::COUNT + 1];
    offsets[0] = (HEADER_LEN + OFFSET_TABLE_LEN) as u64;
    for (i, path) in directory_paths.iter().enumerate() {
        let size = std::fs::metadata(path)?.len();
        offsets[i + 1] = offsets[i] + size;
    }
    let max_offset = 1u64 << (8 * BLOB_OFFSET_BYTES as u32);
    if offsets[Tier::COUNT] >= max_offset {
        return Err(GeotierError::corrupt(
            "directory blocks exceed the offset table range",
        ));
    }

    let mut header = BytesMut::with_capacity(HEADER_LEN + OFFSET_TABLE_LEN);
    header.put_slice(MAGIC);
    header.put_slice(checksum.as_bytes());
    header.put_u8(Tier::MIN_EXP as u8);
    header.put_u8(Tier::MAX_EXP as u8);
    header.put_u8(Tier::SIZE_RATIO);
    for offset in offsets {
        header.put_uint_le(offset, BLOB_OFFSET_BYTES);
    }

    let mut writer = BufWriter::new(File::create(output)?);
    writer.write_all(&header)?;
    for path in directory_paths {
        io::copy(&mut File::open(path)?, &mut writer)?;
    }
    io::copy(&mut File::open(blob_path)?, &mut writer)?;
    writer.flush()?;
    Ok(())
}
