// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! PMT: MediaTek's legacy partition map, a flat array of fixed-size ASCII
//! entries behind a short magic.

use crate::error::StorageError;
use crate::storage::partition::{PartitionRecord, PartitionTable};

const NAME_LEN: usize = 32;

fn malformed(reason: impl Into<String>) -> StorageError {
    StorageError::Malformed {
        layout: "PMT",
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtEntry {
    pub name: String,
    /// Byte address on the medium.
    pub start: u64,
    /// Byte length.
    pub size: u64,
}

/// Parse a PMT blob. The version word at offset 4 selects the entry size:
/// v1 is 64 bytes, v2 is 128.
pub fn parse(data: &[u8]) -> Result<Vec<PmtEntry>, StorageError> {
    if data.len() < 8 {
        return Err(malformed("shorter than the header"));
    }
    let magic_ok = &data[..2] == b"PT" || &data[..4] == b" PT ";
    if !magic_ok {
        return Err(malformed("missing PT magic"));
    }
    let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
    let entry_size = match version {
        1 => 64,
        2 => 128,
        v => return Err(malformed(format!("unknown version {v}"))),
    };

    let mut entries = Vec::new();
    for chunk in data[8..].chunks_exact(entry_size) {
        if chunk[0] == 0 {
            break;
        }
        let name_end = chunk[..NAME_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        let name = std::str::from_utf8(&chunk[..name_end])
            .map_err(|_| malformed("entry name is not ASCII"))?
            .to_string();
        let start = u64::from_le_bytes(chunk[NAME_LEN..NAME_LEN + 8].try_into().unwrap());
        let size = u64::from_le_bytes(chunk[NAME_LEN + 8..NAME_LEN + 16].try_into().unwrap());
        if size == 0 {
            return Err(malformed(format!("{name} has zero size")));
        }
        entries.push(PmtEntry { name, start, size });
    }
    if entries.is_empty() {
        return Err(malformed("no entries"));
    }
    Ok(entries)
}

/// Reduce PMT entries to uniform records at the given sector size.
pub fn to_partition_table(entries: &[PmtEntry], sector_size: u32) -> PartitionTable {
    let ss = sector_size as u64;
    let records = entries
        .iter()
        .map(|e| PartitionRecord {
            name: e.name.clone(),
            lun: 0,
            start_sector: e.start / ss,
            sector_count: e.size.div_ceil(ss),
            sector_size,
            type_guid: None,
            unique_guid: None,
            attributes: 0,
        })
        .collect();
    PartitionTable::new(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(version: u32, entry_size: usize, parts: &[(&str, u64, u64)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"PT\0\0");
        data.extend_from_slice(&version.to_le_bytes());
        for &(name, start, size) in parts {
            let mut entry = vec![0u8; entry_size];
            entry[..name.len()].copy_from_slice(name.as_bytes());
            entry[NAME_LEN..NAME_LEN + 8].copy_from_slice(&start.to_le_bytes());
            entry[NAME_LEN + 8..NAME_LEN + 16].copy_from_slice(&size.to_le_bytes());
            data.extend_from_slice(&entry);
        }
        data.extend_from_slice(&vec![0u8; entry_size]); // terminator
        data
    }

    #[test]
    fn parses_v1_and_v2_entry_sizes() {
        for (version, entry_size) in [(1u32, 64usize), (2, 128)] {
            let data = build(
                version,
                entry_size,
                &[
                    ("preloader", 0, 0x40000),
                    ("boot", 0x0150_0000, 0x0100_0000),
                ],
            );
            let entries = parse(&data).unwrap();
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[1].name, "boot");
            assert_eq!(entries[1].start, 0x0150_0000);
            assert_eq!(entries[1].size, 0x0100_0000);
        }
    }

    #[test]
    fn records_use_sector_units() {
        let data = build(1, 64, &[("boot", 0x0150_0000, 0x0100_0000)]);
        let table = to_partition_table(&parse(&data).unwrap(), 512);
        let boot = table.find("boot", None).unwrap();
        assert_eq!(boot.start_sector, 0x0150_0000 / 512);
        assert_eq!(boot.size(), 0x0100_0000);
    }

    #[test]
    fn bad_magic_and_version_are_rejected() {
        assert!(parse(b"XX\0\0\x01\0\0\0").is_err());
        let data = build(9, 64, &[("boot", 0, 0x1000)]);
        assert!(parse(&data).is_err());
    }
}
