//! The dataset collaborator interface.
//!
//! The index never parses a map file itself; it consumes elements through
//! [`DatasetReader`]: segment-wise enumeration while building, random access
//! by (kind, id) while classifying query candidates, and a checksum that
//! ties an index artifact to the exact dataset snapshot it was built from.
//!
//! [`MemoryDataset`] is the bundled reference implementation, useful for
//! tests and small fixed datasets.

use geo::{MultiLineString, MultiPolygon, Point};
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha512};

use crate::error::Result;
use crate::types::{ElementKind, GeoBBox, degrees_to_nano};

/// Length of a dataset checksum in bytes (SHA-512).
pub const CHECKSUM_LEN: usize = 64;

/// Identifies the exact dataset snapshot an index was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetChecksum(pub [u8; CHECKSUM_LEN]);

impl DatasetChecksum {
    pub fn from_bytes(bytes: [u8; CHECKSUM_LEN]) -> Self {
        DatasetChecksum(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
        &self.0
    }
}

/// An element's geometry in the three shapes the index distinguishes.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementGeometry {
    /// A single coordinate.
    Point(Point<f64>),
    /// Open line work; cannot contain anything.
    Line(MultiLineString<f64>),
    /// Closed area geometry; the only shape that can envelop a cell.
    Area(MultiPolygon<f64>),
}

impl ElementGeometry {
    /// Bounding box of the geometry, or `None` when it has no coordinates.
    pub fn bbox(&self) -> Option<GeoBBox> {
        use geo::BoundingRect;
        match self {
            ElementGeometry::Point(point) => {
                Some(GeoBBox::new(point.x(), point.y(), point.x(), point.y()))
            }
            ElementGeometry::Line(lines) => {
                lines.bounding_rect().map(|rect| GeoBBox::from_rect(&rect))
            }
            ElementGeometry::Area(polygons) => polygons
                .bounding_rect()
                .map(|rect| GeoBBox::from_rect(&rect)),
        }
    }

    /// Whether this is closed area geometry.
    pub fn is_area(&self) -> bool {
        matches!(self, ElementGeometry::Area(_))
    }
}

/// One source map element as handed over by the dataset reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub id: u64,
    pub kind: ElementKind,
    /// Whether the element carries any tags. Tag-less elements are usually
    /// auxiliary geometry of a tagged parent and excluded by default.
    pub tagged: bool,
    pub geometry: ElementGeometry,
}

impl Element {
    pub fn node(id: u64, tagged: bool, point: Point<f64>) -> Self {
        Element {
            id,
            kind: ElementKind::Node,
            tagged,
            geometry: ElementGeometry::Point(point),
        }
    }

    pub fn way(id: u64, tagged: bool, geometry: ElementGeometry) -> Self {
        Element {
            id,
            kind: ElementKind::Way,
            tagged,
            geometry,
        }
    }

    pub fn relation(id: u64, tagged: bool, geometry: ElementGeometry) -> Self {
        Element {
            id,
            kind: ElementKind::Relation,
            tagged,
            geometry,
        }
    }
}

/// Access to the source dataset, segment-wise and by id.
pub trait DatasetReader {
    /// Checksum of the dataset snapshot.
    fn checksum(&mut self) -> Result<DatasetChecksum>;

    /// Number of stable enumeration segments.
    fn segment_count(&self) -> usize;

    /// All elements of one segment.
    fn segment(&mut self, index: usize) -> Result<Vec<Element>>;

    /// Random access by kind and id.
    fn fetch(&mut self, kind: ElementKind, id: u64) -> Result<Option<Element>>;
}

/// In-memory [`DatasetReader`], with a checksum derived from the elements.
#[derive(Debug, Clone)]
pub struct MemoryDataset {
    segments: Vec<Vec<Element>>,
    by_key: FxHashMap<(ElementKind, u64), (usize, usize)>,
    checksum: DatasetChecksum,
}

impl MemoryDataset {
    pub fn new(segments: Vec<Vec<Element>>) -> Self {
        let mut by_key = FxHashMap::default();
        let mut hasher = Sha512::new();
        for (seg_index, segment) in segments.iter().enumerate() {
            for (elem_index, element) in segment.iter().enumerate() {
                by_key.insert((element.kind, element.id), (seg_index, elem_index));
                hash_element(&mut hasher, element);
            }
        }
        let checksum = DatasetChecksum(hasher.finalize().into());
        MemoryDataset {
            segments,
            by_key,
            checksum,
        }
    }

    /// Total number of elements across all segments.
    pub fn element_count(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }
}

impl DatasetReader for MemoryDataset {
    fn checksum(&mut self) -> Result<DatasetChecksum> {
        Ok(self.checksum)
    }

    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment(&mut self, index: usize) -> Result<Vec<Element>> {
        Ok(self.segments.get(index).cloned().unwrap_or_default())
    }

    fn fetch(&mut self, kind: ElementKind, id: u64) -> Result<Option<Element>> {
        Ok(self
            .by_key
            .get(&(kind, id))
            .map(|&(seg, idx)| self.segments[seg][idx].clone()))
    }
}

fn hash_element(hasher: &mut Sha512, element: &Element) {
    hasher.update([element.kind.tag()]);
    hasher.update(element.id.to_le_bytes());
    let mut hash_coord = |x: f64, y: f64| {
        hasher.update(degrees_to_nano(x).to_le_bytes());
        hasher.update(degrees_to_nano(y).to_le_bytes());
    };
    match &element.geometry {
        ElementGeometry::Point(point) => hash_coord(point.x(), point.y()),
        ElementGeometry::Line(lines) => {
            for line in &lines.0 {
                for coord in &line.0 {
                    hash_coord(coord.x, coord.y);
                }
            }
        }
        ElementGeometry::Area(polygons) => {
            for polygon in &polygons.0 {
                for coord in &polygon.exterior().0 {
                    hash_coord(coord.x, coord.y);
                }
                for interior in polygon.interiors() {
                    for coord in &interior.0 {
                        hash_coord(coord.x, coord.y);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    fn two_segment_dataset() -> MemoryDataset {
        MemoryDataset::new(vec![
            vec![
                Element::node(1, true, Point::new(2.0, 3.0)),
                Element::node(2, false, Point::new(4.0, 5.0)),
            ],
            vec![Element::way(
                1,
                true,
                ElementGeometry::Line(MultiLineString(vec![line_string![
                    (x: 0.0, y: 0.0),
                    (x: 1.0, y: 1.0),
                ]])),
            )],
        ])
    }

    #[test]
    fn test_fetch_distinguishes_kinds() {
        let mut dataset = two_segment_dataset();
        // Node 1 and way 1 share an id but not a kind.
        let node = dataset.fetch(ElementKind::Node, 1).unwrap().unwrap();
        let way = dataset.fetch(ElementKind::Way, 1).unwrap().unwrap();
        assert_eq!(node.kind, ElementKind::Node);
        assert_eq!(way.kind, ElementKind::Way);
        assert!(dataset.fetch(ElementKind::Relation, 1).unwrap().is_none());
    }

    #[test]
    fn test_checksum_is_content_sensitive() {
        let mut a = two_segment_dataset();
        let mut b = two_segment_dataset();
        assert_eq!(a.checksum().unwrap(), b.checksum().unwrap());

        let mut c = MemoryDataset::new(vec![vec![Element::node(
            1,
            true,
            Point::new(2.0, 3.1),
        )]]);
        assert_ne!(a.checksum().unwrap(), c.checksum().unwrap());
    }

    #[test]
    fn test_geometry_bbox() {
        let line = ElementGeometry::Line(MultiLineString(vec![line_string![
            (x: -1.0, y: 4.0),
            (x: 11.0, y: -2.0),
        ]]));
        let bbox = line.bbox().unwrap();
        assert_eq!(bbox, GeoBBox::new(-1.0, -2.0, 11.0, 4.0));

        let empty = ElementGeometry::Line(MultiLineString(vec![]));
        assert!(empty.bbox().is_none());
    }
}
