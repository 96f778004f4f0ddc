//! Granularity tiers and the cell-address scheme.
//!
//! A tier is one level of the multi-resolution grid: cell edges are
//! `10^exponent` degrees, with exponents running from [`Tier::MIN_EXP`] to
//! [`Tier::MAX_EXP`]. A cell is identified by a single unsigned integer, the
//! *cell address*: both grid coordinates shifted to non-negative range and
//! packed as `ulon * 10^(3 - exponent) + ulat`. Packing two dimensions into
//! one sortable key is what makes the per-tier directory binary-searchable.
//!
//! All grid arithmetic is done in fixed-point nanodegrees so that values
//! sitting exactly on a grid line land in a deterministic cell.

use crate::error::{GeotierError, Result};
use crate::types::{GeoBBox, NANO_EXPONENT, NanoBBox, degrees_to_nano};

fn pow10(n: u32) -> i64 {
    10i64.pow(n)
}

/// One granularity level of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tier(i8);

impl Tier {
    /// Finest granularity exponent (0.01-degree cells).
    pub const MIN_EXP: i8 = -2;
    /// Coarsest granularity exponent (10-degree cells).
    pub const MAX_EXP: i8 = 1;
    /// Number of tiers.
    pub const COUNT: usize = (Self::MAX_EXP - Self::MIN_EXP + 1) as usize;

    /// A cell must be at least this many times larger than the element it
    /// holds, along the element's larger bbox axis.
    pub const SIZE_RATIO: u8 = 5;

    pub fn new(exponent: i8) -> Result<Self> {
        if (Self::MIN_EXP..=Self::MAX_EXP).contains(&exponent) {
            Ok(Tier(exponent))
        } else {
            Err(GeotierError::InvalidInput(format!(
                "granularity exponent {} outside [{}, {}]",
                exponent,
                Self::MIN_EXP,
                Self::MAX_EXP
            )))
        }
    }

    pub fn minimum() -> Self {
        Tier(Self::MIN_EXP)
    }

    pub fn maximum() -> Self {
        Tier(Self::MAX_EXP)
    }

    /// All tiers, finest first.
    pub fn all() -> impl Iterator<Item = Tier> {
        (Self::MIN_EXP..=Self::MAX_EXP).map(Tier)
    }

    pub fn exponent(self) -> i8 {
        self.0
    }

    /// Position of this tier in tier-ordered arrays and file layouts.
    pub fn index(self) -> usize {
        (self.0 - Self::MIN_EXP) as usize
    }

    /// Cell edge length in degrees.
    pub fn cell_size(self) -> f64 {
        10f64.powi(self.0 as i32)
    }

    /// Cell edge length in nanodegrees (exact).
    pub fn cell_nano(self) -> i64 {
        pow10((NANO_EXPONENT as i32 + self.0 as i32) as u32)
    }

    /// Pick the tier for an extended element whose larger bbox dimension is
    /// `size` degrees. Coarse logarithmic bucketing: the chosen cell is at
    /// least [`Tier::SIZE_RATIO`] times larger than the element, clamped to
    /// the available range.
    pub fn for_size(size: f64) -> Tier {
        if !(size > 0.0) {
            return Tier::minimum();
        }
        let exponent = (size * Self::SIZE_RATIO as f64).log10().floor() as i32 + 1;
        Tier(exponent.clamp(Self::MIN_EXP as i32, Self::MAX_EXP as i32) as i8)
    }

    /// Smallest element size (degrees) this tier can be selected for.
    pub fn min_element_size(self) -> f64 {
        if self.0 == Self::MIN_EXP {
            0.0
        } else {
            10f64.powi(self.0 as i32 - 1) / Self::SIZE_RATIO as f64
        }
    }

    /// Largest element size (degrees) this tier can be selected for.
    pub fn max_element_size(self) -> f64 {
        if self.0 == Self::MAX_EXP {
            f64::INFINITY
        } else {
            10f64.powi(self.0 as i32) / Self::SIZE_RATIO as f64
        }
    }

    /// Shift applied to a longitude grid index to make it non-negative.
    pub fn lon_offset(self) -> i64 {
        scaled(180, self.0)
    }

    /// Shift applied to a latitude grid index to make it non-negative.
    pub fn lat_offset(self) -> i64 {
        scaled(90, self.0)
    }

    /// Number of cells along the longitude axis.
    pub fn lon_cells(self) -> i64 {
        2 * self.lon_offset()
    }

    /// Number of cells along the latitude axis.
    pub fn lat_cells(self) -> i64 {
        2 * self.lat_offset()
    }

    /// Multiplier separating the longitude part of a cell address from the
    /// latitude part: `10^(3 - exponent)`, always > [`Tier::lat_cells`].
    pub fn lat_stride(self) -> u64 {
        pow10((3 - self.0 as i32) as u32) as u64
    }

    /// Bytes needed to store any cell address of this tier.
    pub fn address_width(self) -> usize {
        match self.0 {
            -2 | -1 => 4,
            0 => 3,
            1 => 2,
            _ => unreachable!("tier constructor bounds the exponent"),
        }
    }

    /// Grid index (signed, floor semantics) of a degree coordinate.
    pub fn cell_index(self, deg: f64) -> i64 {
        self.cell_index_nano(degrees_to_nano(deg))
    }

    /// Grid index of a nanodegree coordinate; exact at grid lines.
    pub fn cell_index_nano(self, nano: i64) -> i64 {
        nano.div_euclid(self.cell_nano())
    }

    /// Smallest grid index whose cell starts at or after `nano`.
    pub fn cell_index_nano_ceil(self, nano: i64) -> i64 {
        -(-nano).div_euclid(self.cell_nano())
    }

    /// Pack signed grid coordinates into a cell address.
    pub fn address(self, cell_lon: i64, cell_lat: i64) -> u64 {
        let ulon = (cell_lon + self.lon_offset()) as u64;
        let ulat = (cell_lat + self.lat_offset()) as u64;
        ulon * self.lat_stride() + ulat
    }

    /// Unpack a cell address into signed grid coordinates.
    pub fn cell_of_address(self, address: u64) -> (i64, i64) {
        let stride = self.lat_stride();
        (
            (address / stride) as i64 - self.lon_offset(),
            (address % stride) as i64 - self.lat_offset(),
        )
    }

    /// Whether signed grid coordinates lie on the globe.
    pub fn cell_in_range(self, cell_lon: i64, cell_lat: i64) -> bool {
        cell_lon >= -self.lon_offset()
            && cell_lon < self.lon_offset()
            && cell_lat >= -self.lat_offset()
            && cell_lat < self.lat_offset()
    }

    /// The cell's minimum corner in nanodegrees.
    pub fn cell_min_corner_nano(self, cell_lon: i64, cell_lat: i64) -> (i64, i64) {
        (cell_lon * self.cell_nano(), cell_lat * self.cell_nano())
    }

    /// The cell's extent in nanodegrees.
    pub fn cell_nano_bbox(self, cell_lon: i64, cell_lat: i64) -> NanoBBox {
        let size = self.cell_nano();
        NanoBBox::new(
            cell_lon * size,
            cell_lat * size,
            (cell_lon + 1) * size,
            (cell_lat + 1) * size,
        )
    }

    /// The cell's extent in degrees.
    pub fn cell_geo_bbox(self, cell_lon: i64, cell_lat: i64) -> GeoBBox {
        self.cell_nano_bbox(cell_lon, cell_lat).to_geo()
    }

    /// Inclusive grid-index ranges of every cell overlapping `bbox`, or
    /// `None` for a degenerate bbox (empty enumeration).
    pub fn cells_covering(self, bbox: &GeoBBox) -> Option<CellRange> {
        if bbox.is_degenerate() {
            return None;
        }
        Some(CellRange {
            lon_min: self.cell_index(bbox.lon_min),
            lon_max: self.cell_index(bbox.lon_max),
            lat_min: self.cell_index(bbox.lat_min),
            lat_max: self.cell_index(bbox.lat_max),
        })
    }
}

fn scaled(base: i64, exponent: i8) -> i64 {
    if exponent >= 0 {
        base / pow10(exponent as u32)
    } else {
        base * pow10((-exponent) as u32)
    }
}

/// Inclusive rectangle of grid indices at one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub lon_min: i64,
    pub lon_max: i64,
    pub lat_min: i64,
    pub lat_max: i64,
}

impl CellRange {
    /// Iterate over every (lon, lat) grid coordinate in the range.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        let lats = self.lat_min..=self.lat_max;
        (self.lon_min..=self.lon_max)
            .flat_map(move |lon| lats.clone().map(move |lat| (lon, lat)))
    }

    pub fn cell_count(&self) -> u64 {
        let lons = (self.lon_max - self.lon_min + 1).max(0) as u64;
        let lats = (self.lat_max - self.lat_min + 1).max(0) as u64;
        lons * lats
    }
}
