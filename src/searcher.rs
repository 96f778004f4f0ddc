//! The location searcher: read-only rectangle queries against an assembled
//! index file.
//!
//! A query walks the tiers that could hold elements of the wanted size,
//! splits the covered grid cells into *enclosed* cells (fully inside the
//! query rectangle) and *boundary* cells (partially overlapping), and
//! locates candidate cells by binary search in the tier's directory, one
//! contiguous address span per lon column. Members of enclosed cells'
//! `within` groups are final; every other member is re-classified against
//! the query rectangle, because the precomputed relationships only describe
//! an element against its own cell.
//!
//! Cell-boundary convention: a cell counts as enclosed iff its closed
//! extent lies inside the closed query rectangle on both axes, so cells
//! sharing the query's edge line are enclosed. A query edge lying exactly
//! on a grid line pulls the outside touching cell into the boundary set,
//! which is harmless since boundary members are always re-verified.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Buf;
use geo::Rect;
use rustc_hash::FxHashSet;

use crate::assemble::{
    BLOB_LEN_BYTES, BLOB_OFFSET_BYTES, HEADER_LEN, MAGIC, OFFSET_TABLE_LEN, directory_entry_len,
};
use crate::dataset::{CHECKSUM_LEN, DatasetReader, ElementGeometry};
use crate::error::{GeotierError, Result};
use crate::geometry::{geometry_envelops_rect, geometry_intersects_rect};
use crate::square::{SearchSquare, SquareMember};
use crate::tier::Tier;
use crate::types::{ElementKind, GeoBBox, NanoBBox};

/// A rectangle query: bbox, wanted relationship buckets, and element-size
/// bounds in degrees.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub bbox: GeoBBox,
    pub want_within: bool,
    pub want_intersect: bool,
    pub want_enveloping: bool,
    pub min_width: f64,
    pub min_height: f64,
    pub max_width: f64,
    pub max_height: f64,
}

impl SearchQuery {
    /// A query over `bbox` with no buckets requested yet.
    pub fn new(bbox: GeoBBox) -> Self {
        SearchQuery {
            bbox,
            want_within: false,
            want_intersect: false,
            want_enveloping: false,
            min_width: 0.0,
            min_height: 0.0,
            max_width: f64::INFINITY,
            max_height: f64::INFINITY,
        }
    }

    /// Request elements fully inside the rectangle.
    pub fn within(mut self) -> Self {
        self.want_within = true;
        self
    }

    /// Request elements crossing the rectangle's boundary.
    pub fn intersect(mut self) -> Self {
        self.want_intersect = true;
        self
    }

    /// Request closed areas fully containing the rectangle.
    pub fn enveloping(mut self) -> Self {
        self.want_enveloping = true;
        self
    }

    pub fn all_relations(self) -> Self {
        self.within().intersect().enveloping()
    }

    /// Only report elements at least this wide and tall (degrees).
    pub fn with_min_size(mut self, width: f64, height: f64) -> Self {
        self.min_width = width;
        self.min_height = height;
        self
    }

    /// Only report elements at most this wide and tall (degrees).
    pub fn with_max_size(mut self, width: f64, height: f64) -> Self {
        self.max_width = width;
        self.max_height = height;
        self
    }
}

/// One element in a query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchMatch {
    pub id: u64,
    pub kind: ElementKind,
    pub bbox: GeoBBox,
}

/// Query result; only the requested buckets are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub within: Option<Vec<SearchMatch>>,
    pub intersect: Option<Vec<SearchMatch>>,
    pub enveloping: Option<Vec<SearchMatch>>,
}

#[derive(Debug, Clone, Copy)]
struct TierBlock {
    tier: Tier,
    start: u64,
    end: u64,
}

#[derive(Default)]
struct Buckets {
    within: Vec<SearchMatch>,
    intersect: Vec<SearchMatch>,
    enveloping: Vec<SearchMatch>,
}

/// An open index file plus the dataset reader used for geometry re-checks.
pub struct LocationIndex<R: DatasetReader> {
    file: File,
    file_len: u64,
    reader: R,
    blocks: Vec<TierBlock>,
    blob_start: u64,
}

impl<R: DatasetReader> LocationIndex<R> {
    /// Open and validate an index file.
    ///
    /// Fails with [`GeotierError::NotAnIndex`] when the magic does not
    /// match and [`GeotierError::ChecksumMismatch`] when the embedded
    /// checksum differs from the reader's.
    pub fn open<P: AsRef<Path>>(path: P, mut reader: R) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut magic = [0u8; MAGIC.len()];
        if file.read_exact(&mut magic).is_err() || &magic != MAGIC {
            return Err(GeotierError::NotAnIndex);
        }
        let mut rest = [0u8; CHECKSUM_LEN + 3 + OFFSET_TABLE_LEN];
        file.read_exact(&mut rest)
            .map_err(|_| GeotierError::corrupt("truncated index header"))?;
        let mut src = &rest[..];

        let mut checksum = [0u8; CHECKSUM_LEN];
        src.copy_to_slice(&mut checksum);
        if &checksum != reader.checksum()?.as_bytes() {
            return Err(GeotierError::ChecksumMismatch);
        }

        let min_exp = src.get_u8() as i8;
        let max_exp = src.get_u8() as i8;
        let ratio = src.get_u8();
        if min_exp != Tier::MIN_EXP || max_exp != Tier::MAX_EXP || ratio != Tier::SIZE_RATIO {
            return Err(GeotierError::corrupt(format!(
                "index built with incompatible grid parameters ({min_exp}, {max_exp}, {ratio})"
            )));
        }

        let mut offsets = [0u64; Tier::COUNT + 1];
        for offset in &mut offsets {
            *offset = src.get_uint_le(BLOB_OFFSET_BYTES);
        }
        if offsets[0] != (HEADER_LEN + OFFSET_TABLE_LEN) as u64 {
            return Err(GeotierError::corrupt("offset table does not follow header"));
        }
        let mut blocks = Vec::with_capacity(Tier::COUNT);
        for tier in Tier::all() {
            let start = offsets[tier.index()];
            let end = offsets[tier.index() + 1];
            if end < start || (end - start) % directory_entry_len(tier) as u64 != 0 {
                return Err(GeotierError::corrupt(format!(
                    "malformed directory block for tier 10^{}",
                    tier.exponent()
                )));
            }
            blocks.push(TierBlock { tier, start, end });
        }
        let blob_start = offsets[Tier::COUNT];
        if blob_start > file_len {
            return Err(GeotierError::corrupt("blob region past end of file"));
        }

        Ok(LocationIndex {
            file,
            file_len,
            reader,
            blocks,
            blob_start,
        })
    }

    /// Consume the index and hand the dataset reader back.
    pub fn into_reader(self) -> R {
        self.reader
    }

    /// Run a rectangle query. Only the buckets requested in `query` are
    /// present in the result; each element appears at most once overall.
    pub fn search_rect(&mut self, query: &SearchQuery) -> Result<SearchResult> {
        if query.bbox.is_degenerate() {
            return Err(GeotierError::InvalidInput(
                "degenerate query rectangle".to_string(),
            ));
        }
        let mut buckets = Buckets::default();
        if query.want_within || query.want_intersect || query.want_enveloping {
            let query_nano = query.bbox.to_nano();
            let query_rect = query.bbox.to_rect();
            let mut seen: FxHashSet<(ElementKind, u64)> = FxHashSet::default();
            let blocks = self.blocks.clone();
            for block in blocks {
                self.search_tier(&block, query, &query_nano, &query_rect, &mut seen, &mut buckets)?;
            }
        }
        Ok(SearchResult {
            within: query.want_within.then_some(buckets.within),
            intersect: query.want_intersect.then_some(buckets.intersect),
            enveloping: query.want_enveloping.then_some(buckets.enveloping),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn search_tier(
        &mut self,
        block: &TierBlock,
        query: &SearchQuery,
        query_nano: &NanoBBox,
        query_rect: &Rect<f64>,
        seen: &mut FxHashSet<(ElementKind, u64)>,
        buckets: &mut Buckets,
    ) -> Result<()> {
        let tier = block.tier;
        // A tier whose producible element sizes cannot satisfy the size
        // bounds is skipped wholesale.
        let min_size = tier.min_element_size();
        if min_size > query.max_width || min_size > query.max_height {
            return Ok(());
        }
        let max_size = tier.max_element_size();
        if max_size < query.min_width || max_size < query.min_height {
            return Ok(());
        }

        // Enclosed cells per axis: [ceil(min), floor(max)) in cell units.
        let e_lon_min = tier.cell_index_nano_ceil(query_nano.lon_min).max(-tier.lon_offset());
        let e_lon_end = tier.cell_index_nano(query_nano.lon_max).min(tier.lon_offset());
        let e_lat_min = tier.cell_index_nano_ceil(query_nano.lat_min).max(-tier.lat_offset());
        let e_lat_end = tier.cell_index_nano(query_nano.lat_max).min(tier.lat_offset());
        // Boundary candidates: every overlapped cell.
        let b_lon_min = tier.cell_index_nano(query_nano.lon_min).max(-tier.lon_offset());
        let b_lon_max = tier.cell_index_nano(query_nano.lon_max).min(tier.lon_offset() - 1);
        let b_lat_min = tier.cell_index_nano(query_nano.lat_min).max(-tier.lat_offset());
        let b_lat_max = tier.cell_index_nano(query_nano.lat_max).min(tier.lat_offset() - 1);

        if b_lon_min > b_lon_max || b_lat_min > b_lat_max {
            return Ok(());
        }

        // Addresses are lon-major, so one lon column's lat range is a
        // contiguous directory span; scanning spans instead of probing every
        // cell keeps the work proportional to the cells that actually exist.
        for cell_lon in b_lon_min..=b_lon_max {
            let span = self.scan_directory_span(
                block,
                tier.address(cell_lon, b_lat_min),
                tier.address(cell_lon, b_lat_max),
            )?;
            for entry in span {
                let (_, cell_lat) = tier.cell_of_address(entry.address);
                let enclosed = cell_lon >= e_lon_min
                    && cell_lon < e_lon_end
                    && cell_lat >= e_lat_min
                    && cell_lat < e_lat_end;
                // An enclosed cell contributes nothing to an intersect-only
                // query: an element crossing the query edge also shows up in
                // a boundary cell.
                if enclosed && !query.want_within && !query.want_enveloping {
                    continue;
                }
                let square = self.read_square(tier, &entry)?;
                if enclosed {
                    // Within an enclosed cell means within the query; final.
                    if query.want_within {
                        for member in &square.within {
                            if !size_ok(query, &member.bbox) {
                                continue;
                            }
                            if !seen.insert((member.kind, member.id)) {
                                continue;
                            }
                            buckets.within.push(to_match(member));
                        }
                    }
                    // The rest crossed or contained their own cell; their
                    // relation to the larger query is still open.
                    for member in square.intersected.iter().chain(square.enveloped.iter()) {
                        self.classify_candidate(
                            member, query, query_nano, query_rect, seen, buckets,
                        )?;
                    }
                } else {
                    for member in square
                        .within
                        .iter()
                        .chain(square.intersected.iter())
                        .chain(square.enveloped.iter())
                    {
                        self.classify_candidate(
                            member, query, query_nano, query_rect, seen, buckets,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Classify one candidate against the query rectangle and push it into
    /// the bucket it belongs to, if that bucket was requested.
    fn classify_candidate(
        &mut self,
        member: &SquareMember,
        query: &SearchQuery,
        query_nano: &NanoBBox,
        query_rect: &Rect<f64>,
        seen: &mut FxHashSet<(ElementKind, u64)>,
        buckets: &mut Buckets,
    ) -> Result<()> {
        if !size_ok(query, &member.bbox) {
            return Ok(());
        }
        if !bboxes_overlap(query_nano, &member.bbox) {
            return Ok(());
        }
        if !seen.insert((member.kind, member.id)) {
            return Ok(());
        }

        if query_nano.contains(&member.bbox) {
            if query.want_within {
                buckets.within.push(to_match(member));
            }
            return Ok(());
        }
        // A point that is not within is outside; it cannot cross anything.
        if member.kind == ElementKind::Node {
            return Ok(());
        }

        if member.bbox.contains(query_nano) {
            // Candidate covers the whole query; only real geometry can tell
            // envelopment from a mere crossing (or from a hole).
            let Some(geometry) = self.fetch_geometry(member)? else {
                return Ok(());
            };
            if geometry_envelops_rect(&geometry, query_rect) {
                if query.want_enveloping {
                    buckets.enveloping.push(to_match(member));
                }
            } else if query.want_intersect && geometry_intersects_rect(&geometry, query_rect) {
                buckets.intersect.push(to_match(member));
            }
            return Ok(());
        }

        if !query.want_intersect {
            return Ok(());
        }
        if guaranteed_crossing(query_nano, &member.bbox) {
            buckets.intersect.push(to_match(member));
            return Ok(());
        }
        let Some(geometry) = self.fetch_geometry(member)? else {
            return Ok(());
        };
        if geometry_intersects_rect(&geometry, query_rect) {
            buckets.intersect.push(to_match(member));
        }
        Ok(())
    }

    fn fetch_geometry(&mut self, member: &SquareMember) -> Result<Option<ElementGeometry>> {
        match self.reader.fetch(member.kind, member.id)? {
            Some(element) => Ok(Some(element.geometry)),
            None => {
                log::warn!(
                    "element {:?}/{} referenced by the index is missing from the dataset",
                    member.kind,
                    member.id
                );
                Ok(None)
            }
        }
    }

    /// All directory entries of one tier whose address falls in
    /// `[lo_addr, hi_addr]`: binary search to the lower bound, then a short
    /// sequential scan.
    fn scan_directory_span(
        &mut self,
        block: &TierBlock,
        lo_addr: u64,
        hi_addr: u64,
    ) -> Result<Vec<DirectoryEntry>> {
        let entry_len = directory_entry_len(block.tier) as u64;
        let width = block.tier.address_width();
        let count = (block.end - block.start) / entry_len;
        let mut entry = [0u8; 16];
        let entry_buf = &mut entry[..entry_len as usize];

        let mut lo = 0u64;
        let mut hi = count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            self.file
                .seek(SeekFrom::Start(block.start + mid * entry_len))?;
            self.file.read_exact(entry_buf)?;
            let mut src = &entry_buf[..];
            if src.get_uint_le(width) < lo_addr {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        let mut entries = Vec::new();
        for index in lo..count {
            self.file
                .seek(SeekFrom::Start(block.start + index * entry_len))?;
            self.file.read_exact(entry_buf)?;
            let mut src = &entry_buf[..];
            let address = src.get_uint_le(width);
            if address > hi_addr {
                break;
            }
            entries.push(DirectoryEntry {
                address,
                blob_offset: src.get_uint_le(BLOB_OFFSET_BYTES),
                blob_len: src.get_uint_le(BLOB_LEN_BYTES),
            });
        }
        Ok(entries)
    }

    /// Read and decode the square a directory entry points at.
    fn read_square(&mut self, tier: Tier, entry: &DirectoryEntry) -> Result<SearchSquare> {
        let start = self.blob_start + entry.blob_offset;
        if start + entry.blob_len > self.file_len {
            return Err(GeotierError::corrupt(
                "search square extends past end of file",
            ));
        }
        let mut bytes = vec![0u8; entry.blob_len as usize];
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut bytes)?;
        let (cell_lon, cell_lat) = tier.cell_of_address(entry.address);
        let seed = tier.cell_min_corner_nano(cell_lon, cell_lat);
        SearchSquare::decode(&bytes, seed)
    }
}

#[derive(Debug, Clone, Copy)]
struct DirectoryEntry {
    address: u64,
    blob_offset: u64,
    blob_len: u64,
}

fn to_match(member: &SquareMember) -> SearchMatch {
    SearchMatch {
        id: member.id,
        kind: member.kind,
        bbox: member.bbox.to_geo(),
    }
}

fn size_ok(query: &SearchQuery, bbox: &NanoBBox) -> bool {
    let width = bbox.width_degrees();
    let height = bbox.height_degrees();
    width >= query.min_width
        && width <= query.max_width
        && height >= query.min_height
        && height <= query.max_height
}

fn bboxes_overlap(a: &NanoBBox, b: &NanoBBox) -> bool {
    a.lon_min <= b.lon_max && a.lon_max >= b.lon_min && a.lat_min <= b.lat_max
        && a.lat_max >= b.lat_min
}

/// Whether a bbox-level argument already proves the candidate crosses the
/// query rectangle: contained along one axis, with at least one extreme of
/// the other axis inside the query. The geometry point attaining that
/// extreme then lies inside the rectangle.
fn guaranteed_crossing(query: &NanoBBox, bbox: &NanoBBox) -> bool {
    let lon_contained = bbox.lon_min >= query.lon_min && bbox.lon_max <= query.lon_max;
    let lat_contained = bbox.lat_min >= query.lat_min && bbox.lat_max <= query.lat_max;
    (lon_contained && (bbox.lat_min >= query.lat_min || bbox.lat_max <= query.lat_max))
        || (lat_contained && (bbox.lon_min >= query.lon_min || bbox.lon_max <= query.lon_max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexBuilder;
    use crate::dataset::{Element, MemoryDataset};
    use geo::Point;
    use tempfile::TempDir;

    fn build_index(dir: &TempDir, dataset: &MemoryDataset) -> std::path::PathBuf {
        let output = dir.path().join("map.index");
        let mut reader = dataset.clone();
        IndexBuilder::new()
            .output_path(&output)
            .build(&mut reader)
            .unwrap();
        output
    }

    fn point_dataset() -> MemoryDataset {
        MemoryDataset::new(vec![vec![Element::node(1, true, Point::new(2.0, 3.0))]])
    }

    #[test]
    fn test_open_rejects_non_index_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-an-index");
        std::fs::write(&path, b"something else entirely").unwrap();
        let result = LocationIndex::open(&path, point_dataset());
        assert!(matches!(result, Err(GeotierError::NotAnIndex)));
    }

    #[test]
    fn test_open_rejects_wrong_dataset() {
        let dir = TempDir::new().unwrap();
        let dataset = point_dataset();
        let path = build_index(&dir, &dataset);

        let other =
            MemoryDataset::new(vec![vec![Element::node(9, true, Point::new(1.0, 1.0))]]);
        let result = LocationIndex::open(&path, other);
        assert!(matches!(result, Err(GeotierError::ChecksumMismatch)));
    }

    #[test]
    fn test_open_rejects_short_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short");
        std::fs::write(&path, &MAGIC[..4]).unwrap();
        assert!(matches!(
            LocationIndex::open(&path, point_dataset()),
            Err(GeotierError::NotAnIndex)
        ));
    }

    #[test]
    fn test_degenerate_query_is_rejected() {
        let dir = TempDir::new().unwrap();
        let dataset = point_dataset();
        let path = build_index(&dir, &dataset);
        let mut index = LocationIndex::open(&path, dataset).unwrap();
        let query = SearchQuery::new(GeoBBox::new(5.0, 0.0, 4.0, 1.0)).within();
        assert!(index.search_rect(&query).is_err());
    }

    #[test]
    fn test_unrequested_buckets_are_absent() {
        let dir = TempDir::new().unwrap();
        let dataset = point_dataset();
        let path = build_index(&dir, &dataset);
        let mut index = LocationIndex::open(&path, dataset).unwrap();
        let result = index
            .search_rect(&SearchQuery::new(GeoBBox::new(0.0, 0.0, 10.0, 10.0)).within())
            .unwrap();
        assert!(result.within.is_some());
        assert!(result.intersect.is_none());
        assert!(result.enveloping.is_none());
    }

    #[test]
    fn test_guaranteed_crossing_requires_an_extreme_inside() {
        let query = NanoBBox::new(0, 0, 100, 100);
        // Contained on lon, crossing the top edge only.
        assert!(guaranteed_crossing(
            &query,
            &NanoBBox::new(10, 50, 90, 150)
        ));
        // Contained on lon but spanning both lat edges: no extreme inside,
        // disconnected geometry could dodge the rectangle.
        assert!(!guaranteed_crossing(
            &query,
            &NanoBBox::new(10, -50, 90, 150)
        ));
        // Contained on lat, crossing the left edge only.
        assert!(guaranteed_crossing(
            &query,
            &NanoBBox::new(-50, 10, 50, 90)
        ));
    }
}
