//! Fixed-width codec for temp assignment records.
//!
//! One record per (element, cell) pair, laid out little-endian as: cell
//! address (tier-specific width), id (6 bytes), four absolute nanodegree
//! bbox coordinates (5 bytes signed each), one packed tag byte (element
//! kind in bits 0-1, relationship in bits 2-3). The cell address comes
//! first so the external sorter can key on a prefix of the raw bytes.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{GeotierError, Result};
use crate::tier::Tier;
use crate::types::{ElementKind, NanoBBox, RelationKind};

/// Bytes used for the element id.
pub const ID_BYTES: usize = 6;
/// Bytes used for one nanodegree coordinate.
pub const COORD_BYTES: usize = 5;
/// The packed kind/relationship byte.
pub const TAG_BYTES: usize = 1;

const KIND_MASK: u8 = 0b0000_0011;
const RELATION_SHIFT: u8 = 2;

/// Encoded record length for a tier.
pub fn encoded_len(tier: Tier) -> usize {
    tier.address_width() + ID_BYTES + 4 * COORD_BYTES + TAG_BYTES
}

/// One element-to-cell assignment, the unit the external sorter works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempRecord {
    pub address: u64,
    pub id: u64,
    pub kind: ElementKind,
    pub relation: RelationKind,
    pub bbox: NanoBBox,
}

impl TempRecord {
    /// Append the fixed-width encoding for `tier` to `buf`.
    pub fn encode(&self, tier: Tier, buf: &mut BytesMut) {
        buf.put_uint_le(self.address, tier.address_width());
        buf.put_uint_le(self.id, ID_BYTES);
        buf.put_int_le(self.bbox.lon_min, COORD_BYTES);
        buf.put_int_le(self.bbox.lat_min, COORD_BYTES);
        buf.put_int_le(self.bbox.lon_max, COORD_BYTES);
        buf.put_int_le(self.bbox.lat_max, COORD_BYTES);
        buf.put_u8(self.kind.tag() | (self.relation.tag() << RELATION_SHIFT));
    }

    /// Decode one record from an exactly-sized buffer.
    pub fn decode(tier: Tier, mut src: &[u8]) -> Result<TempRecord> {
        if src.len() != encoded_len(tier) {
            return Err(GeotierError::corrupt(format!(
                "temp record length {} != {}",
                src.len(),
                encoded_len(tier)
            )));
        }
        let address = src.get_uint_le(tier.address_width());
        let id = src.get_uint_le(ID_BYTES);
        let bbox = NanoBBox::new(
            src.get_int_le(COORD_BYTES),
            src.get_int_le(COORD_BYTES),
            src.get_int_le(COORD_BYTES),
            src.get_int_le(COORD_BYTES),
        );
        let tag = src.get_u8();
        let kind = ElementKind::from_tag(tag & KIND_MASK)
            .ok_or_else(|| GeotierError::corrupt("unrecognized element kind tag"))?;
        let relation = RelationKind::from_tag((tag >> RELATION_SHIFT) & KIND_MASK)
            .ok_or_else(|| GeotierError::corrupt("unrecognized relationship tag"))?;
        Ok(TempRecord {
            address,
            id,
            kind,
            relation,
            bbox,
        })
    }
}

/// Read the cell address from the leading bytes of an encoded record.
pub(crate) fn address_of_encoded(src: &[u8], width: usize) -> u64 {
    let mut prefix = &src[..width];
    prefix.get_uint_le(width)
}
