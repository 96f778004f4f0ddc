//! The grid assignment engine: element → (tier, cell, relationship) records.
//!
//! Points always land in the finest tier, fully within their single
//! containing cell. Extended geometry picks its tier from the larger bbox
//! dimension, then fans out over every cell its bbox overlaps; each
//! candidate cell is classified individually, because a shape that selects
//! one tier can still straddle several of that tier's cells.

use smallvec::SmallVec;

use crate::dataset::{Element, ElementGeometry};
use crate::error::Result;
use crate::extsort::ExternalSorter;
use crate::geometry::multipolygon_contains_rect;
use crate::record::TempRecord;
use crate::tier::Tier;
use crate::types::{MAX_ELEMENT_ID, NanoBBox, RelationKind};

/// Stateless per-element assignment logic, configured once per build.
pub struct AssignmentEngine {
    ignore_tagless: bool,
}

impl AssignmentEngine {
    pub fn new(ignore_tagless: bool) -> Self {
        AssignmentEngine { ignore_tagless }
    }

    /// Assign one element, appending a temp record per accepted cell to the
    /// tier's sorter. Returns the number of records emitted.
    ///
    /// Elements without usable geometry, with inverted bboxes, or with ids
    /// beyond the 48-bit format limit are skipped, never errors.
    pub fn assign(&self, element: &Element, sorters: &mut [ExternalSorter]) -> Result<u64> {
        if self.ignore_tagless && !element.tagged {
            return Ok(0);
        }
        if element.id > MAX_ELEMENT_ID {
            log::warn!(
                "skipping {:?} {}: id exceeds the 48-bit format limit",
                element.kind,
                element.id
            );
            return Ok(0);
        }
        let Some(bbox) = element.geometry.bbox() else {
            return Ok(0);
        };
        if bbox.is_degenerate() {
            return Ok(0);
        }
        let bbox_nano = bbox.to_nano();

        if let ElementGeometry::Point(_) = element.geometry {
            let tier = Tier::minimum();
            let cell_lon = tier.cell_index_nano(bbox_nano.lon_min);
            let cell_lat = tier.cell_index_nano(bbox_nano.lat_min);
            sorters[tier.index()].push(&TempRecord {
                address: tier.address(cell_lon, cell_lat),
                id: element.id,
                kind: element.kind,
                relation: RelationKind::Within,
                bbox: bbox_nano,
            })?;
            return Ok(1);
        }

        let size = bbox.width().max(bbox.height());
        let tier = Tier::for_size(size);
        let Some(range) = tier.cells_covering(&bbox) else {
            return Ok(0);
        };

        let mut accepted: SmallVec<[(u64, RelationKind); 4]> = SmallVec::new();
        for (cell_lon, cell_lat) in range.iter() {
            if !tier.cell_in_range(cell_lon, cell_lat) {
                continue;
            }
            if let Some(relation) = classify_cell(element, &bbox_nano, tier, cell_lon, cell_lat) {
                accepted.push((tier.address(cell_lon, cell_lat), relation));
            }
        }
        let sorter = &mut sorters[tier.index()];
        for &(address, relation) in &accepted {
            sorter.push(&TempRecord {
                address,
                id: element.id,
                kind: element.kind,
                relation,
                bbox: bbox_nano,
            })?;
        }
        Ok(accepted.len() as u64)
    }
}

/// Relationship of an element to one candidate cell, cheapest test first.
///
/// Containment of the cell is ruled out before the intersection test: a
/// shape that fully contains the cell also intersects it under the `geo`
/// predicate, and the relationship kinds must stay mutually exclusive.
fn classify_cell(
    element: &Element,
    bbox_nano: &NanoBBox,
    tier: Tier,
    cell_lon: i64,
    cell_lat: i64,
) -> Option<RelationKind> {
    let cell_nano = tier.cell_nano_bbox(cell_lon, cell_lat);
    if cell_nano.contains(bbox_nano) {
        return Some(RelationKind::Within);
    }
    let cell_rect = cell_nano.to_geo().to_rect();
    if let ElementGeometry::Area(polygons) = &element.geometry
        && bbox_nano.contains(&cell_nano)
        && multipolygon_contains_rect(polygons, &cell_rect)
    {
        return Some(RelationKind::Enveloped);
    }
    if crate::geometry::geometry_intersects_rect(&element.geometry, &cell_rect) {
        return Some(RelationKind::Intersected);
    }
    // Bbox overlap was a false positive for this cell.
    None
}
