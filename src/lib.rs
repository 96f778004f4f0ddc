//! Multi-resolution grid location index for large map datasets.
//!
//! `geotier` batch-builds a read-only spatial index over a map dataset's
//! points, lines and areas, then answers "what is within / crossing /
//! enveloping this rectangle" without scanning the dataset. Elements are
//! bucketed into granularity tiers by size, assigned to grid cells,
//! externally sorted, and compressed into per-cell records inside a single
//! binary-searchable file.
//!
//! ```rust
//! use geo::Point;
//! use geotier::{
//!     Element, GeoBBox, IndexBuilder, LocationIndex, MemoryDataset, SearchQuery,
//! };
//!
//! let mut dataset = MemoryDataset::new(vec![vec![
//!     Element::node(1, true, Point::new(2.0, 3.0)),
//! ]]);
//!
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("demo.index");
//! IndexBuilder::new().output_path(&path).build(&mut dataset)?;
//!
//! let mut index = LocationIndex::open(&path, dataset)?;
//! let result = index
//!     .search_rect(&SearchQuery::new(GeoBBox::new(0.0, 0.0, 10.0, 10.0)).within())?;
//! assert_eq!(result.within.unwrap().len(), 1);
//! # Ok::<(), geotier::GeotierError>(())
//! ```

pub mod assemble;
pub mod assign;
pub mod builder;
pub mod compress;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extsort;
pub mod geometry;
pub mod progress;
pub mod record;
pub mod searcher;
pub mod square;
pub mod tier;
pub mod types;

pub use builder::{BuildStats, IndexBuilder};
pub use config::BuildConfig;
pub use error::{GeotierError, Result};

pub use dataset::{
    DatasetChecksum, DatasetReader, Element, ElementGeometry, MemoryDataset,
};
pub use searcher::{LocationIndex, SearchMatch, SearchQuery, SearchResult};
pub use tier::Tier;
pub use types::{ElementKind, GeoBBox, NanoBBox, RelationKind};

pub use geo::{MultiLineString, MultiPolygon, Point, Polygon, Rect};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{BuildConfig, BuildStats, GeotierError, IndexBuilder, Result};

    pub use crate::{DatasetReader, Element, ElementGeometry, MemoryDataset};

    pub use crate::{LocationIndex, SearchMatch, SearchQuery, SearchResult};

    pub use crate::{ElementKind, GeoBBox, RelationKind, Tier};

    pub use geo::{MultiLineString, MultiPolygon, Point, Polygon};
}
