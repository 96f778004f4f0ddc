//! Search squares: the persisted form of one non-empty grid cell.
//!
//! A square holds up to three member groups, one per relationship kind.
//! The wire form is a flags byte naming the groups present, then each group
//! as: member count (unsigned varint), packed 2-bit element kinds (four per
//! byte, LSB first), then five arrays of zig-zag varints holding delta
//! chains for id and the four bbox coordinates. Bbox chains are seeded from
//! the cell's own minimum corner, so the first delta stays small for any
//! member near the cell; the id chain is seeded from zero. Empty groups are
//! never serialized.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{GeotierError, Result};
use crate::types::{ElementKind, MAX_ELEMENT_ID, NanoBBox, RelationKind};

const FLAG_WITHIN: u8 = 1;
const FLAG_INTERSECTED: u8 = 2;
const FLAG_ENVELOPED: u8 = 4;
const FLAGS_KNOWN: u8 = FLAG_WITHIN | FLAG_INTERSECTED | FLAG_ENVELOPED;

/// One element reference inside a square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquareMember {
    pub id: u64,
    pub kind: ElementKind,
    pub bbox: NanoBBox,
}

/// All members of one cell, bucketed by relationship kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchSquare {
    pub within: Vec<SquareMember>,
    pub intersected: Vec<SquareMember>,
    pub enveloped: Vec<SquareMember>,
}

impl SearchSquare {
    pub fn is_empty(&self) -> bool {
        self.within.is_empty() && self.intersected.is_empty() && self.enveloped.is_empty()
    }

    pub fn group_mut(&mut self, relation: RelationKind) -> &mut Vec<SquareMember> {
        match relation {
            RelationKind::Within => &mut self.within,
            RelationKind::Intersected => &mut self.intersected,
            RelationKind::Enveloped => &mut self.enveloped,
        }
    }

    /// Serialize to `buf`. `seed` is the cell's minimum corner in
    /// nanodegrees `(lon, lat)`. Members must already be in their final
    /// deterministic order.
    pub fn encode(&self, seed: (i64, i64), buf: &mut BytesMut) {
        let mut flags = 0u8;
        if !self.within.is_empty() {
            flags |= FLAG_WITHIN;
        }
        if !self.intersected.is_empty() {
            flags |= FLAG_INTERSECTED;
        }
        if !self.enveloped.is_empty() {
            flags |= FLAG_ENVELOPED;
        }
        buf.put_u8(flags);
        for group in [&self.within, &self.intersected, &self.enveloped] {
            if !group.is_empty() {
                encode_group(group, seed, buf);
            }
        }
    }

    /// Decode a square serialized with the same `seed`.
    pub fn decode(mut src: &[u8], seed: (i64, i64)) -> Result<SearchSquare> {
        if src.is_empty() {
            return Err(GeotierError::corrupt("empty search square"));
        }
        let flags = src.get_u8();
        if flags & !FLAGS_KNOWN != 0 {
            return Err(GeotierError::corrupt(format!(
                "unrecognized search square flags {flags:#04x}"
            )));
        }
        let mut square = SearchSquare::default();
        if flags & FLAG_WITHIN != 0 {
            square.within = decode_group(&mut src, seed)?;
        }
        if flags & FLAG_INTERSECTED != 0 {
            square.intersected = decode_group(&mut src, seed)?;
        }
        if flags & FLAG_ENVELOPED != 0 {
            square.enveloped = decode_group(&mut src, seed)?;
        }
        if !src.is_empty() {
            return Err(GeotierError::corrupt("trailing bytes after search square"));
        }
        Ok(square)
    }
}

fn encode_group(members: &[SquareMember], seed: (i64, i64), buf: &mut BytesMut) {
    put_uvarint(buf, members.len() as u64);
    for chunk in members.chunks(4) {
        let mut packed = 0u8;
        for (i, member) in chunk.iter().enumerate() {
            packed |= member.kind.tag() << (2 * i);
        }
        buf.put_u8(packed);
    }
    put_delta_chain(buf, members.iter().map(|m| m.id as i64), 0);
    put_delta_chain(buf, members.iter().map(|m| m.bbox.lon_min), seed.0);
    put_delta_chain(buf, members.iter().map(|m| m.bbox.lat_min), seed.1);
    put_delta_chain(buf, members.iter().map(|m| m.bbox.lon_max), seed.0);
    put_delta_chain(buf, members.iter().map(|m| m.bbox.lat_max), seed.1);
}

fn decode_group(src: &mut &[u8], seed: (i64, i64)) -> Result<Vec<SquareMember>> {
    let count = get_uvarint(src)? as usize;
    // Each member takes at least one byte per delta array plus kind bits.
    if count > src.len() {
        return Err(GeotierError::corrupt("member count exceeds square size"));
    }

    let kind_bytes = count.div_ceil(4);
    if src.len() < kind_bytes {
        return Err(GeotierError::corrupt("truncated kind tags"));
    }
    let mut kinds = Vec::with_capacity(count);
    for i in 0..count {
        let byte = src[i / 4];
        let tag = (byte >> (2 * (i % 4))) & 0b11;
        kinds.push(
            ElementKind::from_tag(tag)
                .ok_or_else(|| GeotierError::corrupt("unrecognized element kind tag"))?,
        );
    }
    src.advance(kind_bytes);

    let ids = get_delta_chain(src, count, 0)?;
    let lon_min = get_delta_chain(src, count, seed.0)?;
    let lat_min = get_delta_chain(src, count, seed.1)?;
    let lon_max = get_delta_chain(src, count, seed.0)?;
    let lat_max = get_delta_chain(src, count, seed.1)?;

    let mut members = Vec::with_capacity(count);
    for i in 0..count {
        if ids[i] < 0 || ids[i] as u64 > MAX_ELEMENT_ID {
            return Err(GeotierError::corrupt("element id out of range"));
        }
        members.push(SquareMember {
            id: ids[i] as u64,
            kind: kinds[i],
            bbox: NanoBBox::new(lon_min[i], lat_min[i], lon_max[i], lat_max[i]),
        });
    }
    Ok(members)
}

fn put_delta_chain(buf: &mut BytesMut, values: impl Iterator<Item = i64>, seed: i64) {
    let mut last = seed;
    for value in values {
        put_svarint(buf, value - last);
        last = value;
    }
}

fn get_delta_chain(src: &mut &[u8], count: usize, seed: i64) -> Result<Vec<i64>> {
    let mut values = Vec::with_capacity(count);
    let mut last = seed;
    for _ in 0..count {
        last += get_svarint(src)?;
        values.push(last);
    }
    Ok(values)
}

pub(crate) fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8(value as u8 | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub(crate) fn get_uvarint(src: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        if src.is_empty() {
            return Err(GeotierError::corrupt("truncated varint"));
        }
        let byte = src.get_u8();
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(GeotierError::corrupt("varint longer than 64 bits"));
        }
    }
}

fn put_svarint(buf: &mut BytesMut, value: i64) {
    put_uvarint(buf, zigzag_encode(value));
}

fn get_svarint(src: &mut &[u8]) -> Result<i64> {
    get_uvarint(src).map(zigzag_decode)
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64, kind: ElementKind, bbox: NanoBBox) -> SquareMember {
        SquareMember { id, kind, bbox }
    }

    #[test]
    fn test_zigzag() {
        for value in [0i64, 1, -1, 63, -64, i64::MAX, i64::MIN] {
            assert_eq!(zigzag_decode(zigzag_encode(value)), value);
        }
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
    }

    #[test]
    fn test_uvarint() {
        for value in [0u64, 1, 127, 128, 300, u64::MAX] {
            let mut buf = BytesMut::new();
            put_uvarint(&mut buf, value);
            let mut src = &buf[..];
            assert_eq!(get_uvarint(&mut src).unwrap(), value);
            assert!(src.is_empty());
        }
    }

    #[test]
    fn test_square_round_trip() {
        let seed = (2_000_000_000i64, 3_000_000_000i64);
        let square = SearchSquare {
            within: vec![
                member(
                    42,
                    ElementKind::Node,
                    NanoBBox::new(2_100_000_000, 3_100_000_000, 2_100_000_000, 3_100_000_000),
                ),
                member(
                    40,
                    ElementKind::Way,
                    NanoBBox::new(2_200_000_000, 3_050_000_000, 2_400_000_000, 3_200_000_000),
                ),
            ],
            intersected: vec![member(
                7,
                ElementKind::Relation,
                NanoBBox::new(1_900_000_000, 2_900_000_000, 2_600_000_000, 3_600_000_000),
            )],
            enveloped: Vec::new(),
        };
        let mut buf = BytesMut::new();
        square.encode(seed, &mut buf);
        let decoded = SearchSquare::decode(&buf, seed).unwrap();
        assert_eq!(decoded, square);
    }

    #[test]
    fn test_empty_groups_are_not_serialized() {
        let seed = (0, 0);
        let square = SearchSquare {
            within: vec![member(1, ElementKind::Node, NanoBBox::new(1, 2, 1, 2))],
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        square.encode(seed, &mut buf);
        assert_eq!(buf[0], FLAG_WITHIN);

        let decoded = SearchSquare::decode(&buf, seed).unwrap();
        assert!(decoded.intersected.is_empty());
        assert!(decoded.enveloped.is_empty());
    }

    #[test]
    fn test_delta_chain_reproduces_descending_ids() {
        // Ids are ordered by the bucket sort key (lon_min), not by value, so
        // negative deltas must survive the round trip.
        let seed = (0, 0);
        let square = SearchSquare {
            intersected: vec![
                member(900, ElementKind::Way, NanoBBox::new(10, 0, 20, 5)),
                member(30, ElementKind::Way, NanoBBox::new(15, 0, 25, 5)),
                member(500, ElementKind::Relation, NanoBBox::new(20, 0, 30, 5)),
            ],
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        square.encode(seed, &mut buf);
        let decoded = SearchSquare::decode(&buf, seed).unwrap();
        let ids: Vec<u64> = decoded.intersected.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![900, 30, 500]);
    }

    #[test]
    fn test_kind_packing_boundary() {
        // Five members spill into a second kind byte.
        let seed = (0, 0);
        let kinds = [
            ElementKind::Node,
            ElementKind::Way,
            ElementKind::Relation,
            ElementKind::Way,
            ElementKind::Node,
        ];
        let square = SearchSquare {
            within: kinds
                .iter()
                .enumerate()
                .map(|(i, &kind)| {
                    member(i as u64 + 1, kind, NanoBBox::new(i as i64, 0, i as i64, 0))
                })
                .collect(),
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        square.encode(seed, &mut buf);
        let decoded = SearchSquare::decode(&buf, seed).unwrap();
        let got: Vec<ElementKind> = decoded.within.iter().map(|m| m.kind).collect();
        assert_eq!(got, kinds);
    }

    #[test]
    fn test_decode_rejects_unknown_flags() {
        assert!(SearchSquare::decode(&[0b0000_1000], (0, 0)).is_err());
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let seed = (0, 0);
        let square = SearchSquare {
            within: vec![member(5, ElementKind::Node, NanoBBox::new(9, 9, 9, 9))],
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        square.encode(seed, &mut buf);
        assert!(SearchSquare::decode(&buf[..buf.len() - 1], seed).is_err());
    }
}
