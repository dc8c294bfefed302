// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! LP metadata: Android's dynamic-partition (super) on-disk format.
//!
//! Geometry lives at byte 4096, the primary metadata slot at 8192. Table
//! integrity is SHA-256, not CRC.

use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::storage::partition::{PartitionRecord, PartitionTable};

const GEOMETRY_OFFSET: usize = 4096;
const GEOMETRY_MAGIC: u32 = 0x616C_4467;
const METADATA_OFFSET: usize = 8192;
const METADATA_MAGIC: u32 = 0x414C_5030;

/// Linear extent target type.
const TARGET_TYPE_LINEAR: u32 = 0;
/// Zero-filled extent target type.
const TARGET_TYPE_ZERO: u32 = 1;

fn malformed(reason: impl Into<String>) -> StorageError {
    StorageError::Malformed {
        layout: "LP metadata",
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpGeometry {
    pub metadata_max_size: u32,
    pub metadata_slot_count: u32,
    pub logical_block_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpExtent {
    pub num_sectors: u64,
    pub target_type: u32,
    /// Physical sector on the target source for LINEAR extents.
    pub target_data: u64,
    pub target_source: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpPartition {
    pub name: String,
    pub attributes: u32,
    pub group_index: u32,
    pub extents: Vec<LpExtent>,
}

impl LpPartition {
    /// Total size in 512-byte sectors across all extents.
    pub fn num_sectors(&self) -> u64 {
        self.extents.iter().map(|e| e.num_sectors).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpMetadata {
    pub geometry: LpGeometry,
    pub partitions: Vec<LpPartition>,
}

struct Descriptor {
    offset: u32,
    num_entries: u32,
    entry_size: u32,
}

fn read_descriptor(buf: &[u8], at: usize) -> Descriptor {
    let u32_at = |i: usize| u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
    Descriptor {
        offset: u32_at(at),
        num_entries: u32_at(at + 4),
        entry_size: u32_at(at + 8),
    }
}

/// Parse the geometry block and the primary metadata slot.
pub fn parse(data: &[u8]) -> Result<LpMetadata, StorageError> {
    if data.len() < METADATA_OFFSET {
        return Err(malformed("image shorter than the geometry block"));
    }
    let geo = &data[GEOMETRY_OFFSET..];
    let u32_at = |buf: &[u8], i: usize| u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());

    if u32_at(geo, 0) != GEOMETRY_MAGIC {
        return Err(malformed("bad geometry magic"));
    }
    let struct_size = u32_at(geo, 4) as usize;
    if struct_size < 52 || GEOMETRY_OFFSET + struct_size > data.len() {
        return Err(malformed(format!("implausible geometry size {struct_size}")));
    }
    // Geometry checksum: SHA-256 over the struct with the digest zeroed.
    let mut scratch = geo[..struct_size].to_vec();
    scratch[8..40].fill(0);
    let digest = Sha256::digest(&scratch);
    if digest[..] != geo[8..40] {
        return Err(malformed("geometry checksum mismatch"));
    }
    let geometry = LpGeometry {
        metadata_max_size: u32_at(geo, 40),
        metadata_slot_count: u32_at(geo, 44),
        logical_block_size: u32_at(geo, 48),
    };

    parse_slot(&data[METADATA_OFFSET..], geometry)
}

/// Parse one metadata slot (header + tables).
fn parse_slot(slot: &[u8], geometry: LpGeometry) -> Result<LpMetadata, StorageError> {
    let u16_at = |buf: &[u8], i: usize| u16::from_le_bytes(buf[i..i + 2].try_into().unwrap());
    let u32_at = |buf: &[u8], i: usize| u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
    let u64_at = |buf: &[u8], i: usize| u64::from_le_bytes(buf[i..i + 8].try_into().unwrap());

    if slot.len() < 128 || u32_at(slot, 0) != METADATA_MAGIC {
        return Err(malformed("bad metadata header magic"));
    }
    let major = u16_at(slot, 4);
    if major != 10 {
        return Err(malformed(format!("unsupported major version {major}")));
    }
    let header_size = u32_at(slot, 8) as usize;
    let tables_size = u32_at(slot, 44) as usize;
    if slot.len() < header_size + tables_size {
        return Err(malformed("tables extend past the slot"));
    }
    let tables = &slot[header_size..header_size + tables_size];
    let tables_digest = Sha256::digest(tables);
    if tables_digest[..] != slot[48..80] {
        return Err(malformed("table checksum mismatch"));
    }

    // Descriptors: partitions, extents, groups, block devices.
    let partitions_desc = read_descriptor(slot, 80);
    let extents_desc = read_descriptor(slot, 92);

    let mut extents = Vec::with_capacity(extents_desc.num_entries as usize);
    for i in 0..extents_desc.num_entries as usize {
        let at = extents_desc.offset as usize + i * extents_desc.entry_size as usize;
        if at + 24 > tables.len() {
            return Err(malformed("extent entry out of range"));
        }
        let e = &tables[at..];
        extents.push(LpExtent {
            num_sectors: u64_at(e, 0),
            target_type: u32_at(e, 8),
            target_data: u64_at(e, 12),
            target_source: u32_at(e, 20),
        });
    }

    let mut partitions = Vec::with_capacity(partitions_desc.num_entries as usize);
    for i in 0..partitions_desc.num_entries as usize {
        let at = partitions_desc.offset as usize + i * partitions_desc.entry_size as usize;
        if at + 52 > tables.len() {
            return Err(malformed("partition entry out of range"));
        }
        let p = &tables[at..];
        let name_end = p[..36].iter().position(|&b| b == 0).unwrap_or(36);
        let name = String::from_utf8_lossy(&p[..name_end]).into_owned();
        let first_extent = u32_at(p, 40) as usize;
        let num_extents = u32_at(p, 44) as usize;
        if first_extent + num_extents > extents.len() {
            return Err(malformed(format!("{name}: extent range out of bounds")));
        }
        partitions.push(LpPartition {
            name,
            attributes: u32_at(p, 36),
            group_index: u32_at(p, 48),
            extents: extents[first_extent..first_extent + num_extents].to_vec(),
        });
    }

    Ok(LpMetadata {
        geometry,
        partitions,
    })
}

/// Records for the logical partitions, addressed on the super partition's
/// own device (LINEAR extents only; ZERO extents have no on-device home).
pub fn to_partition_table(meta: &LpMetadata, lun: u8) -> PartitionTable {
    let mut records = Vec::new();
    for p in &meta.partitions {
        for (i, e) in p.extents.iter().enumerate() {
            if e.target_type != TARGET_TYPE_LINEAR {
                continue;
            }
            let name = if p.extents.len() == 1 {
                p.name.clone()
            } else {
                format!("{}.{}", p.name, i)
            };
            records.push(PartitionRecord {
                name,
                lun,
                start_sector: e.target_data,
                sector_count: e.num_sectors,
                sector_size: 512,
                type_guid: None,
                unique_guid: None,
                attributes: p.attributes as u64,
            });
        }
    }
    PartitionTable::new(records)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal, checksum-correct super image for tests.
    pub(crate) fn build_super(parts: &[(&str, u64, u64)]) -> Vec<u8> {
        // Tables: one partition entry (52 bytes) and one extent (24) each.
        let part_entry = 52usize;
        let extent_entry = 24usize;
        let mut partitions = Vec::new();
        let mut extents = Vec::new();
        for (i, &(name, start, sectors)) in parts.iter().enumerate() {
            let mut p = vec![0u8; part_entry];
            p[..name.len()].copy_from_slice(name.as_bytes());
            p[36..40].copy_from_slice(&0u32.to_le_bytes()); // attributes
            p[40..44].copy_from_slice(&(i as u32).to_le_bytes()); // first extent
            p[44..48].copy_from_slice(&1u32.to_le_bytes()); // one extent
            p[48..52].copy_from_slice(&0u32.to_le_bytes()); // group
            partitions.extend_from_slice(&p);

            let mut e = vec![0u8; extent_entry];
            e[..8].copy_from_slice(&sectors.to_le_bytes());
            e[8..12].copy_from_slice(&TARGET_TYPE_LINEAR.to_le_bytes());
            e[12..20].copy_from_slice(&start.to_le_bytes());
            e[20..24].copy_from_slice(&0u32.to_le_bytes());
            extents.extend_from_slice(&e);
        }
        let mut tables = partitions.clone();
        tables.extend_from_slice(&extents);

        let header_size = 128usize;
        let mut header = vec![0u8; header_size];
        header[..4].copy_from_slice(&METADATA_MAGIC.to_le_bytes());
        header[4..6].copy_from_slice(&10u16.to_le_bytes()); // major
        header[6..8].copy_from_slice(&2u16.to_le_bytes()); // minor
        header[8..12].copy_from_slice(&(header_size as u32).to_le_bytes());
        header[44..48].copy_from_slice(&(tables.len() as u32).to_le_bytes());
        let digest = Sha256::digest(&tables);
        header[48..80].copy_from_slice(&digest);
        // partitions descriptor
        header[80..84].copy_from_slice(&0u32.to_le_bytes());
        header[84..88].copy_from_slice(&(parts.len() as u32).to_le_bytes());
        header[88..92].copy_from_slice(&(part_entry as u32).to_le_bytes());
        // extents descriptor
        header[92..96].copy_from_slice(&(partitions.len() as u32).to_le_bytes());
        header[96..100].copy_from_slice(&(parts.len() as u32).to_le_bytes());
        header[100..104].copy_from_slice(&(extent_entry as u32).to_le_bytes());

        let mut geometry = vec![0u8; 52];
        geometry[..4].copy_from_slice(&GEOMETRY_MAGIC.to_le_bytes());
        geometry[4..8].copy_from_slice(&52u32.to_le_bytes());
        geometry[40..44].copy_from_slice(&65536u32.to_le_bytes());
        geometry[44..48].copy_from_slice(&2u32.to_le_bytes());
        geometry[48..52].copy_from_slice(&4096u32.to_le_bytes());
        let mut scratch = geometry.clone();
        scratch[8..40].fill(0);
        let digest = Sha256::digest(&scratch);
        geometry[8..40].copy_from_slice(&digest);

        let mut image = vec![0u8; METADATA_OFFSET];
        image[GEOMETRY_OFFSET..GEOMETRY_OFFSET + geometry.len()].copy_from_slice(&geometry);
        image.extend_from_slice(&header);
        image.extend_from_slice(&tables);
        image
    }

    #[test]
    fn parses_partitions_and_extents() {
        let image = build_super(&[("system_a", 2048, 4096), ("vendor_a", 8192, 1024)]);
        let meta = parse(&image).unwrap();
        assert_eq!(meta.geometry.metadata_slot_count, 2);
        assert_eq!(meta.geometry.logical_block_size, 4096);
        assert_eq!(meta.partitions.len(), 2);
        assert_eq!(meta.partitions[0].name, "system_a");
        assert_eq!(meta.partitions[0].num_sectors(), 4096);
        assert_eq!(meta.partitions[1].extents[0].target_data, 8192);
    }

    #[test]
    fn records_map_linear_extents() {
        let image = build_super(&[("system_a", 2048, 4096)]);
        let table = to_partition_table(&parse(&image).unwrap(), 0);
        let rec = table.find("system_a", None).unwrap();
        assert_eq!(rec.start_sector, 2048);
        assert_eq!(rec.sector_count, 4096);
        assert_eq!(rec.sector_size, 512);
    }

    #[test]
    fn geometry_checksum_is_enforced() {
        let mut image = build_super(&[("system_a", 2048, 4096)]);
        image[GEOMETRY_OFFSET + 44] ^= 1; // slot count
        assert!(matches!(parse(&image), Err(StorageError::Malformed { .. })));
    }

    #[test]
    fn table_checksum_is_enforced() {
        let mut image = build_super(&[("system_a", 2048, 4096)]);
        let last = image.len() - 4;
        image[last] ^= 1;
        assert!(matches!(parse(&image), Err(StorageError::Malformed { .. })));
    }
}
