//! Core data model: element kinds, cell relationships, and the two
//! coordinate representations.
//!
//! Coordinates exist in two forms: `f64` degrees at the API surface and
//! `i64` nanodegrees (`round(deg * 10^9)`) for everything that is persisted,
//! compared, or delta-encoded. The fixed-point form is what keeps delta
//! chains exact across encode/decode.

use geo::Rect;

/// Decimal exponent of the fixed-point coordinate representation.
pub const NANO_EXPONENT: u32 = 9;

/// Nanodegrees per degree.
pub const NANO_PER_DEGREE: i64 = 1_000_000_000;

/// Largest element identifier representable in the on-disk formats (48 bits).
pub const MAX_ELEMENT_ID: u64 = (1 << 48) - 1;

/// Convert degrees to nanodegrees, rounding to the nearest unit.
pub fn degrees_to_nano(deg: f64) -> i64 {
    (deg * NANO_PER_DEGREE as f64).round() as i64
}

/// Convert nanodegrees back to degrees.
pub fn nano_to_degrees(nano: i64) -> f64 {
    nano as f64 / NANO_PER_DEGREE as f64
}

/// The kind of a source map element. Stored as a 2-bit tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementKind {
    /// A single tagged point.
    Node = 0,
    /// A way: a line, or an area when closed.
    Way = 1,
    /// A relation, treated as a multi-part geometry.
    Relation = 2,
}

impl ElementKind {
    /// The 2-bit wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Decode a 2-bit wire tag. Tag 3 is unassigned.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ElementKind::Node),
            1 => Some(ElementKind::Way),
            2 => Some(ElementKind::Relation),
            _ => None,
        }
    }
}

/// How an element relates to one grid cell. Stored as a 2-bit tag.
///
/// Exactly one relationship holds per (element, cell) pair; the same
/// element may carry different relationships in different cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// The element's bounding box lies fully inside the cell.
    Within = 0,
    /// The element's geometry crosses the cell, without containing it.
    Intersected = 1,
    /// The element's closed geometry fully contains the cell.
    Enveloped = 2,
}

impl RelationKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(RelationKind::Within),
            1 => Some(RelationKind::Intersected),
            2 => Some(RelationKind::Enveloped),
            _ => None,
        }
    }
}

/// An axis-aligned bounding box in floating degrees.
///
/// Unlike [`geo::Rect`], construction does not normalize the corners, so a
/// malformed source bbox (min > max) stays visible and can be skipped by the
/// assignment loop instead of being silently repaired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBBox {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl GeoBBox {
    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        }
    }

    pub fn from_rect(rect: &Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// Convert to a `geo::Rect`. Callers must reject degenerate boxes first;
    /// `Rect::new` would silently swap inverted corners.
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            geo::coord! { x: self.lon_min, y: self.lat_min },
            geo::coord! { x: self.lon_max, y: self.lat_max },
        )
    }

    pub fn width(&self) -> f64 {
        self.lon_max - self.lon_min
    }

    pub fn height(&self) -> f64 {
        self.lat_max - self.lat_min
    }

    /// True when min exceeds max on either axis.
    pub fn is_degenerate(&self) -> bool {
        self.lon_min > self.lon_max || self.lat_min > self.lat_max
    }

    /// Closed-interval containment: boxes sharing an edge still count.
    pub fn contains(&self, other: &GeoBBox) -> bool {
        other.lon_min >= self.lon_min
            && other.lat_min >= self.lat_min
            && other.lon_max <= self.lon_max
            && other.lat_max <= self.lat_max
    }

    pub fn to_nano(&self) -> NanoBBox {
        NanoBBox {
            lon_min: degrees_to_nano(self.lon_min),
            lat_min: degrees_to_nano(self.lat_min),
            lon_max: degrees_to_nano(self.lon_max),
            lat_max: degrees_to_nano(self.lat_max),
        }
    }
}

/// An axis-aligned bounding box in fixed-point nanodegrees.
///
/// Every coordinate fits in 40 bits signed (|value| <= 180 * 10^9), which is
/// what the temp-record codec relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NanoBBox {
    pub lon_min: i64,
    pub lat_min: i64,
    pub lon_max: i64,
    pub lat_max: i64,
}

impl NanoBBox {
    pub fn new(lon_min: i64, lat_min: i64, lon_max: i64, lat_max: i64) -> Self {
        Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        }
    }

    pub fn to_geo(&self) -> GeoBBox {
        GeoBBox::new(
            nano_to_degrees(self.lon_min),
            nano_to_degrees(self.lat_min),
            nano_to_degrees(self.lon_max),
            nano_to_degrees(self.lat_max),
        )
    }

    pub fn width_degrees(&self) -> f64 {
        nano_to_degrees(self.lon_max - self.lon_min)
    }

    pub fn height_degrees(&self) -> f64 {
        nano_to_degrees(self.lat_max - self.lat_min)
    }

    /// Closed-interval containment, exact in fixed point.
    pub fn contains(&self, other: &NanoBBox) -> bool {
        other.lon_min >= self.lon_min
            && other.lat_min >= self.lat_min
            && other.lon_max <= self.lon_max
            && other.lat_max <= self.lat_max
    }
}
