//! The cell compression engine: one tier's sorted record stream in,
//! directory entries and serialized search squares out.
//!
//! A single sequential pass groups consecutive records sharing a cell
//! address. Each finished group becomes one search square: members bucketed
//! by relationship, each bucket sorted by a deterministic key (ascending
//! lon_min, then lat_min, then id), then delta-encoded against the cell's
//! minimum corner. Directory entries leave in strictly ascending address
//! order, the property the searcher's binary search depends on.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::{BufMut, BytesMut};

use crate::assemble::{BLOB_LEN_BYTES, BLOB_OFFSET_BYTES};
use crate::error::{GeotierError, Result};
use crate::extsort::ExternalSorter;
use crate::progress::ProgressLog;
use crate::square::{SearchSquare, SquareMember};
use crate::tier::Tier;
use crate::types::RelationKind;

/// Compress one tier's sorted run. Returns the number of directory entries
/// written. `blob_offset` is the running offset into the shared blob region
/// and carries over between tiers.
pub fn compress_tier(
    sorter: &ExternalSorter,
    directory_path: &Path,
    blob: &mut BufWriter<File>,
    blob_offset: &mut u64,
    progress: &mut ProgressLog,
) -> Result<u64> {
    let tier = sorter.tier();
    let total = sorter.len();
    let mut directory = BufWriter::new(File::create(directory_path)?);

    let mut entries = 0u64;
    let mut seen_records = 0u64;
    let mut current: Option<u64> = None;
    let mut group: Vec<SquareMember> = Vec::new();
    let mut relations: Vec<RelationKind> = Vec::new();
    let mut scratch = BytesMut::new();

    for record in sorter.iter()? {
        let record = record?;
        seen_records += 1;
        match current {
            Some(address) if address == record.address => {}
            Some(address) => {
                if record.address < address {
                    return Err(GeotierError::corrupt(
                        "record stream not sorted by cell address",
                    ));
                }
                entries += finalize_square(
                    tier,
                    address,
                    &mut group,
                    &mut relations,
                    &mut directory,
                    blob,
                    blob_offset,
                    &mut scratch,
                )? as u64;
                current = Some(record.address);
            }
            None => current = Some(record.address),
        }
        group.push(SquareMember {
            id: record.id,
            kind: record.kind,
            bbox: record.bbox,
        });
        relations.push(record.relation);
        progress.emit(|| {
            format!(
                "square compression for 10^{}: {}/{} records ({:.2}%)",
                tier.exponent(),
                seen_records,
                total,
                seen_records as f64 / total as f64 * 100.0
            )
        });
    }
    if let Some(address) = current {
        entries += finalize_square(
            tier,
            address,
            &mut group,
            &mut relations,
            &mut directory,
            blob,
            blob_offset,
            &mut scratch,
        )? as u64;
    }
    directory.flush()?;
    progress.finish(format!(
        "square compression for 10^{}: {} records, {} squares",
        tier.exponent(),
        total,
        entries
    ));
    Ok(entries)
}

#[allow(clippy::too_many_arguments)]
fn finalize_square(
    tier: Tier,
    address: u64,
    group: &mut Vec<SquareMember>,
    relations: &mut Vec<RelationKind>,
    directory: &mut BufWriter<File>,
    blob: &mut BufWriter<File>,
    blob_offset: &mut u64,
    scratch: &mut BytesMut,
) -> Result<bool> {
    let mut square = SearchSquare::default();
    for (member, relation) in group.drain(..).zip(relations.drain(..)) {
        square.group_mut(relation).push(member);
    }
    if square.is_empty() {
        return Ok(false);
    }
    for bucket in [
        &mut square.within,
        &mut square.intersected,
        &mut square.enveloped,
    ] {
        bucket.sort_by_key(|m| (m.bbox.lon_min, m.bbox.lat_min, m.id));
    }

    let (cell_lon, cell_lat) = tier.cell_of_address(address);
    let seed = tier.cell_min_corner_nano(cell_lon, cell_lat);
    scratch.clear();
    square.encode(seed, scratch);
    if scratch.is_empty() {
        return Ok(false);
    }
    let blob_len = scratch.len() as u64;
    if blob_len >= 1 << (8 * BLOB_LEN_BYTES as u32) {
        return Err(GeotierError::corrupt(format!(
            "search square at address {address} exceeds the length field"
        )));
    }

    let mut entry = BytesMut::with_capacity(16);
    entry.put_uint_le(address, tier.address_width());
    entry.put_uint_le(*blob_offset, BLOB_OFFSET_BYTES);
    entry.put_uint_le(blob_len, BLOB_LEN_BYTES);
    directory.write_all(&entry)?;
    blob.write_all(scratch)?;
    *blob_offset += blob_len;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extsort::DEFAULT_SORT_BUF_SIZE;
    use crate::record::TempRecord;
    use crate::types::{ElementKind, NanoBBox, RelationKind};
    use bytes::Buf;
    use std::io::Read;
    use tempfile::TempDir;

    fn record(
        tier: Tier,
        cell: (i64, i64),
        id: u64,
        relation: RelationKind,
        lon_min: i64,
    ) -> TempRecord {
        TempRecord {
            address: tier.address(cell.0, cell.1),
            id,
            kind: ElementKind::Way,
            relation,
            bbox: NanoBBox::new(lon_min, 0, lon_min + 1_000, 2_000),
        }
    }

    #[test]
    fn test_compression_groups_and_sorts() {
        let tier = Tier::new(0).unwrap();
        let dir = TempDir::new().unwrap();
        let mut sorter = ExternalSorter::create(dir.path(), tier, DEFAULT_SORT_BUF_SIZE).unwrap();

        // Two cells; members arrive in arbitrary order.
        sorter
            .push(&record(tier, (5, 5), 30, RelationKind::Within, 9_000))
            .unwrap();
        sorter
            .push(&record(tier, (2, 1), 10, RelationKind::Intersected, 5_000))
            .unwrap();
        sorter
            .push(&record(tier, (5, 5), 20, RelationKind::Within, 3_000))
            .unwrap();
        sorter.sort().unwrap();

        let directory_path = dir.path().join("tier0.dir");
        let blob_path = dir.path().join("blob");
        let mut blob = BufWriter::new(File::create(&blob_path).unwrap());
        let mut blob_offset = 0u64;
        let entries = compress_tier(
            &sorter,
            &directory_path,
            &mut blob,
            &mut blob_offset,
            &mut ProgressLog::new(),
        )
        .unwrap();
        blob.flush().unwrap();
        assert_eq!(entries, 2);

        // Directory entries are sorted by address with correct blob spans.
        let mut directory_bytes = Vec::new();
        File::open(&directory_path)
            .unwrap()
            .read_to_end(&mut directory_bytes)
            .unwrap();
        let entry_len = tier.address_width() + BLOB_OFFSET_BYTES + BLOB_LEN_BYTES;
        assert_eq!(directory_bytes.len(), 2 * entry_len);

        let mut src = &directory_bytes[..];
        let first_address = src.get_uint_le(tier.address_width());
        let first_offset = src.get_uint_le(BLOB_OFFSET_BYTES);
        let first_len = src.get_uint_le(BLOB_LEN_BYTES);
        let second_address = src.get_uint_le(tier.address_width());
        let second_offset = src.get_uint_le(BLOB_OFFSET_BYTES);
        let second_len = src.get_uint_le(BLOB_LEN_BYTES);

        assert_eq!(first_address, tier.address(2, 1));
        assert_eq!(second_address, tier.address(5, 5));
        assert!(first_address < second_address);
        assert_eq!(first_offset, 0);
        assert_eq!(second_offset, first_len);
        assert_eq!(blob_offset, first_len + second_len);

        // The two-member square decodes with lon_min-sorted members.
        let mut blob_bytes = Vec::new();
        File::open(&blob_path)
            .unwrap()
            .read_to_end(&mut blob_bytes)
            .unwrap();
        let seed = tier.cell_min_corner_nano(5, 5);
        let square = SearchSquare::decode(
            &blob_bytes[second_offset as usize..(second_offset + second_len) as usize],
            seed,
        )
        .unwrap();
        let ids: Vec<u64> = square.within.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![20, 30]);
        assert_eq!(square.within[0].bbox.lon_min, 3_000);
    }

    #[test]
    fn test_blob_offset_carries_across_tiers() {
        let dir = TempDir::new().unwrap();
        let blob_path = dir.path().join("blob");
        let mut blob = BufWriter::new(File::create(&blob_path).unwrap());
        let mut blob_offset = 0u64;

        for tier in [Tier::new(0).unwrap(), Tier::new(1).unwrap()] {
            let mut sorter =
                ExternalSorter::create(dir.path(), tier, DEFAULT_SORT_BUF_SIZE).unwrap();
            sorter
                .push(&record(tier, (1, 1), 1, RelationKind::Within, 100))
                .unwrap();
            sorter.sort().unwrap();
            let directory_path = dir
                .path()
                .join(format!("tier{}.dir", tier.exponent()));
            compress_tier(
                &sorter,
                &directory_path,
                &mut blob,
                &mut blob_offset,
                &mut ProgressLog::new(),
            )
            .unwrap();
        }
        blob.flush().unwrap();
        assert_eq!(
            blob_offset,
            std::fs::metadata(&blob_path).unwrap().len()
        );
    }
}
