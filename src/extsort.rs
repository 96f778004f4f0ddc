//! Disk-backed sorting of temp assignment records under a fixed memory
//! budget.
//!
//! Records stream to an unsorted file in arrival order. `sort` then works in
//! two passes: the file is partitioned into chunks no larger than the byte
//! budget, each chunk is loaded, heap-sorted in place by cell address and
//! written back; a k-way merge across the sorted chunks streams the final
//! ordering into a new file, which replaces the unsorted one. Peak memory is
//! one chunk buffer plus one record-sized head buffer per chunk, independent
//! of the total record count.
//!
//! The in-memory pass is a non-recursive heap sort. Partition-exchange
//! sorting is ruled out here: cell-address runs are extremely duplicate-heavy
//! and drive its recursion depth to the worst case.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;

use crate::error::{GeotierError, Result};
use crate::record::{self, TempRecord, address_of_encoded};
use crate::tier::Tier;

/// Default in-memory chunk budget for the sort pass.
pub const DEFAULT_SORT_BUF_SIZE: usize = 128 * 1024 * 1024;

enum State {
    Appending { writer: BufWriter<File> },
    Sorted { file: File },
}

/// An append-then-sort sequence of [`TempRecord`]s for one tier, backed by a
/// single growable file in the working directory.
pub struct ExternalSorter {
    tier: Tier,
    record_len: usize,
    sort_buf_size: usize,
    unsorted_path: PathBuf,
    sorted_path: PathBuf,
    state: State,
    len: u64,
    scratch: BytesMut,
}

impl ExternalSorter {
    /// Start a fresh, empty sorter for `tier` under `dir`.
    pub fn create(dir: &Path, tier: Tier, sort_buf_size: usize) -> Result<Self> {
        let record_len = record::encoded_len(tier);
        let unsorted_path = dir.join(unsorted_file_name(tier));
        let sorted_path = dir.join(sorted_file_name(tier));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&unsorted_path)?;
        Ok(ExternalSorter {
            tier,
            record_len,
            sort_buf_size: chunk_budget(sort_buf_size, record_len),
            unsorted_path,
            sorted_path,
            state: State::Appending {
                writer: BufWriter::new(file),
            },
            len: 0,
            scratch: BytesMut::with_capacity(record_len),
        })
    }

    /// Reopen a previously sorted run under `dir`, for builds resumed after
    /// the assignment phase.
    pub fn open_sorted(dir: &Path, tier: Tier, sort_buf_size: usize) -> Result<Self> {
        let record_len = record::encoded_len(tier);
        let sorted_path = dir.join(sorted_file_name(tier));
        let file = File::open(&sorted_path)?;
        let size = file.metadata()?.len();
        if size % record_len as u64 != 0 {
            return Err(GeotierError::corrupt(format!(
                "sorted run {} is not a whole number of records",
                sorted_path.display()
            )));
        }
        Ok(ExternalSorter {
            tier,
            record_len,
            sort_buf_size: chunk_budget(sort_buf_size, record_len),
            unsorted_path: dir.join(unsorted_file_name(tier)),
            sorted_path,
            state: State::Sorted { file },
            len: size / record_len as u64,
            scratch: BytesMut::with_capacity(record_len),
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Number of records appended so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one record. Only valid before [`ExternalSorter::sort`].
    pub fn push(&mut self, record: &TempRecord) -> Result<()> {
        let State::Appending { writer } = &mut self.state else {
            return Err(GeotierError::InvalidInput(
                "record appended after sorting".to_string(),
            ));
        };
        self.scratch.clear();
        record.encode(self.tier, &mut self.scratch);
        writer.write_all(&self.scratch)?;
        self.len += 1;
        Ok(())
    }

    /// Sort all appended records by cell address.
    ///
    /// Ties keep no particular order; downstream grouping is on the address
    /// alone.
    pub fn sort(&mut self) -> Result<()> {
        let State::Appending { writer } = &mut self.state else {
            return Err(GeotierError::InvalidInput(
                "sort called twice on one run".to_string(),
            ));
        };
        writer.flush()?;

        if self.len == 0 {
            File::create(&self.sorted_path)?;
            self.state = State::Sorted {
                file: File::open(&self.sorted_path)?,
            };
            return Ok(());
        }

        let mut unsorted = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.unsorted_path)?;
        let total_bytes = self.len * self.record_len as u64;
        let chunk_count = total_bytes.div_ceil(self.sort_buf_size as u64);

        // Pass 1: sort each chunk in place, remembering its first record as
        // the initial merge head.
        let mut cursors: Vec<ChunkCursor> = Vec::with_capacity(chunk_count as usize);
        let mut chunk = vec![0u8; self.sort_buf_size];
        for i in 0..chunk_count {
            let offset = i * self.sort_buf_size as u64;
            let chunk_bytes = (total_bytes - offset).min(self.sort_buf_size as u64) as usize;
            let buf = &mut chunk[..chunk_bytes];
            unsorted.seek(SeekFrom::Start(offset))?;
            unsorted.read_exact(buf)?;
            heap_sort_records(buf, self.record_len, self.tier.address_width());
            unsorted.seek(SeekFrom::Start(offset))?;
            unsorted.write_all(buf)?;
            cursors.push(ChunkCursor {
                next: offset + self.record_len as u64,
                end: offset + chunk_bytes as u64,
                head: buf[..self.record_len].to_vec(),
            });
        }

        // Pass 2: k-way merge into the sorted file, smallest head first,
        // ties resolved by chunk order.
        let mut sorted = BufWriter::new(File::create(&self.sorted_path)?);
        let width = self.tier.address_width();
        while !cursors.is_empty() {
            let mut chosen = 0;
            let mut smallest = address_of_encoded(&cursors[0].head, width);
            for (i, cursor) in cursors.iter().enumerate().skip(1) {
                let address = address_of_encoded(&cursor.head, width);
                if address < smallest {
                    smallest = address;
                    chosen = i;
                }
            }
            let cursor = &mut cursors[chosen];
            sorted.write_all(&cursor.head)?;
            if cursor.next >= cursor.end {
                cursors.swap_remove(chosen);
                // swap_remove reorders the tail; acceptable because ties
                // carry no ordering guarantee.
            } else {
                unsorted.seek(SeekFrom::Start(cursor.next))?;
                unsorted.read_exact(&mut cursor.head)?;
                cursor.next += self.record_len as u64;
            }
        }
        sorted.flush()?;
        drop(sorted);
        drop(unsorted);
        std::fs::remove_file(&self.unsorted_path)?;

        self.state = State::Sorted {
            file: File::open(&self.sorted_path)?,
        };
        Ok(())
    }

    /// Random access into the sorted run.
    pub fn get(&mut self, index: u64) -> Result<TempRecord> {
        let len = self.len;
        let record_len = self.record_len;
        let tier = self.tier;
        let State::Sorted { file } = &mut self.state else {
            return Err(GeotierError::Unsorted);
        };
        if index >= len {
            return Err(GeotierError::OutOfBounds { index, len });
        }
        file.seek(SeekFrom::Start(index * record_len as u64))?;
        self.scratch.clear();
        self.scratch.resize(record_len, 0);
        file.read_exact(&mut self.scratch)?;
        TempRecord::decode(tier, &self.scratch)
    }

    /// Sequential scan over the sorted run, on an independent file handle.
    pub fn iter(&self) -> Result<RecordIter> {
        let State::Sorted { .. } = self.state else {
            return Err(GeotierError::Unsorted);
        };
        Ok(RecordIter {
            reader: BufReader::new(File::open(&self.sorted_path)?),
            remaining: self.len,
            tier: self.tier,
            buf: vec![0u8; self.record_len],
        })
    }
}

struct ChunkCursor {
    next: u64,
    end: u64,
    head: Vec<u8>,
}

/// Iterator over a sorted run, yielding records in cell-address order.
pub struct RecordIter {
    reader: BufReader<File>,
    remaining: u64,
    tier: Tier,
    buf: Vec<u8>,
}

impl Iterator for RecordIter {
    type Item = Result<TempRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        if let Err(err) = self.reader.read_exact(&mut self.buf) {
            return Some(Err(err.into()));
        }
        Some(TempRecord::decode(self.tier, &self.buf))
    }
}

fn unsorted_file_name(tier: Tier) -> String {
    format!("tier{}.unsorted.rec", tier.exponent())
}

fn sorted_file_name(tier: Tier) -> String {
    format!("tier{}.sorted.rec", tier.exponent())
}

fn chunk_budget(sort_buf_size: usize, record_len: usize) -> usize {
    let rounded = sort_buf_size - sort_buf_size % record_len;
    rounded.max(record_len)
}

/// In-place heap sort of fixed-width records keyed on the little-endian cell
/// address prefix. Iterative sift-down only; no recursion regardless of the
/// key distribution.
fn heap_sort_records(buf: &mut [u8], record_len: usize, key_width: usize) {
    let n = buf.len() / record_len;
    if n < 2 {
        return;
    }
    for start in (0..n / 2).rev() {
        sift_down(buf, record_len, key_width, start, n);
    }
    for end in (1..n).rev() {
        swap_records(buf, record_len, 0, end);
        sift_down(buf, record_len, key_width, 0, end);
    }
}

fn sift_down(buf: &mut [u8], record_len: usize, key_width: usize, mut root: usize, end: usize) {
    let key = |buf: &[u8], i: usize| address_of_encoded(&buf[i * record_len..], key_width);
    loop {
        let mut child = 2 * root + 1;
        if child >= end {
            return;
        }
        if child + 1 < end && key(buf, child) < key(buf, child + 1) {
            child += 1;
        }
        if key(buf, root) >= key(buf, child) {
            return;
        }
        swap_records(buf, record_len, root, child);
        root = child;
    }
}

fn swap_records(buf: &mut [u8], record_len: usize, i: usize, j: usize) {
    if i == j {
        return;
    }
    let (a, b) = if i < j { (i, j) } else { (j, i) };
    let (head, tail) = buf.split_at_mut(b * record_len);
    head[a * record_len..(a + 1) * record_len].swap_with_slice(&mut tail[..record_len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ElementKind, NanoBBox, RelationKind};
    use tempfile::TempDir;

    fn record(address: u64, id: u64) -> TempRecord {
        TempRecord {
            address,
            id,
            kind: ElementKind::Node,
            relation: RelationKind::Within,
            bbox: NanoBBox::new(
                address as i64,
                -(id as i64),
                address as i64 + 10,
                id as i64,
            ),
        }
    }

    #[test]
    fn test_heap_sort_records() {
        let tier = Tier::minimum();
        let record_len = record::encoded_len(tier);
        let mut buf = BytesMut::new();
        let addresses = [9u64, 3, 3, 7, 1, 200, 3, 0, 1];
        for (i, &address) in addresses.iter().enumerate() {
            record(address, i as u64).encode(tier, &mut buf);
        }
        heap_sort_records(&mut buf, record_len, tier.address_width());
        let mut sorted: Vec<u64> = addresses.to_vec();
        sorted.sort_unstable();
        for (i, want) in sorted.iter().enumerate() {
            let chunk = &buf[i * record_len..(i + 1) * record_len];
            assert_eq!(address_of_encoded(chunk, tier.address_width()), *want);
        }
    }

    #[test]
    fn test_sort_matches_in_memory_across_chunks() {
        let tier = Tier::new(0).unwrap();
        let record_len = record::encoded_len(tier);
        let dir = TempDir::new().unwrap();
        // A budget of 7 records forces several chunks and a real merge.
        let mut sorter = ExternalSorter::create(dir.path(), tier, 7 * record_len).unwrap();

        let mut expected = Vec::new();
        // Duplicate-heavy pseudo-random addresses.
        let mut seed = 0x2545_f491_4f6c_dd1du64;
        for i in 0..500u64 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let address = seed % 50;
            sorter.push(&record(address, i)).unwrap();
            expected.push(address);
        }
        sorter.sort().unwrap();
        expected.sort_unstable();

        assert_eq!(sorter.len(), 500);
        let got: Vec<u64> = sorter
            .iter()
            .unwrap()
            .map(|r| r.unwrap().address)
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_indexed_access_after_sort() {
        let tier = Tier::maximum();
        let dir = TempDir::new().unwrap();
        let mut sorter =
            ExternalSorter::create(dir.path(), tier, DEFAULT_SORT_BUF_SIZE).unwrap();
        for address in [5u64, 1, 3] {
            sorter.push(&record(address, address * 11)).unwrap();
        }
        sorter.sort().unwrap();
        assert_eq!(sorter.get(0).unwrap().address, 1);
        assert_eq!(sorter.get(1).unwrap().address, 3);
        assert_eq!(sorter.get(2).unwrap().address, 5);
        assert_eq!(sorter.get(2).unwrap().id, 55);
        assert!(matches!(
            sorter.get(3),
            Err(GeotierError::OutOfBounds { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_access_before_sort_is_an_error() {
        let tier = Tier::minimum();
        let dir = TempDir::new().unwrap();
        let mut sorter =
            ExternalSorter::create(dir.path(), tier, DEFAULT_SORT_BUF_SIZE).unwrap();
        sorter.push(&record(1, 1)).unwrap();
        assert!(matches!(sorter.get(0), Err(GeotierError::Unsorted)));
        assert!(sorter.iter().is_err());
    }

    #[test]
    fn test_empty_run_sorts_to_empty_file() {
        let tier = Tier::minimum();
        let dir = TempDir::new().unwrap();
        let mut sorter =
            ExternalSorter::create(dir.path(), tier, DEFAULT_SORT_BUF_SIZE).unwrap();
        sorter.sort().unwrap();
        assert_eq!(sorter.len(), 0);
        assert_eq!(sorter.iter().unwrap().count(), 0);
    }

    #[test]
    fn test_reopen_sorted_run() {
        let tier = Tier::new(-1).unwrap();
        let dir = TempDir::new().unwrap();
        let mut sorter =
            ExternalSorter::create(dir.path(), tier, DEFAULT_SORT_BUF_SIZE).unwrap();
        for address in [4u64, 2, 9] {
            sorter.push(&record(address, address)).unwrap();
        }
        sorter.sort().unwrap();
        drop(sorter);

        let mut reopened =
            ExternalSorter::open_sorted(dir.path(), tier, DEFAULT_SORT_BUF_SIZE).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.get(0).unwrap().address, 2);
    }
}
