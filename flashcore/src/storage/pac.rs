// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! PAC: Unisoc's firmware package container.
//!
//! A fixed UTF-16 header names the product and points at a table of
//! 512-byte partition descriptors; each descriptor addresses a payload
//! region inside the same file.

use crate::error::StorageError;

/// UTF-16 version field: 24 code units.
const VERSION_UNITS: usize = 24;
/// UTF-16 product field: 256 code units.
const PRODUCT_UNITS: usize = 256;
/// Header: version, product, partition count, list offset.
const HEADER_LEN: usize = VERSION_UNITS * 2 + PRODUCT_UNITS * 2 + 8;

/// Fixed descriptor block size.
const DESCRIPTOR_LEN: usize = 512;
/// UTF-16 file-id field: 32 code units.
const FILE_ID_UNITS: usize = 32;
/// UTF-16 file-name field: 128 code units.
const FILE_NAME_UNITS: usize = 128;

const SUPPORTED_VERSIONS: [&str; 2] = ["BP_R1.0.0", "BP_R2.0.1"];

fn malformed(reason: impl Into<String>) -> StorageError {
    StorageError::Malformed {
        layout: "PAC",
        reason: reason.into(),
    }
}

/// One entry of the PAC table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacEntry {
    /// Logical id, e.g. "FDL", "FDL2", "NV".
    pub file_id: String,
    /// Target partition or file name.
    pub file_name: String,
    /// Load/flash base address.
    pub base_addr: u64,
    /// Payload location inside the PAC file.
    pub data_offset: u64,
    pub data_size: u64,
    pub flash_flags: u32,
}

/// Parsed PAC table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pac {
    pub version: String,
    pub product: String,
    pub entries: Vec<PacEntry>,
}

impl Pac {
    pub fn parse(data: &[u8]) -> Result<Pac, StorageError> {
        if data.len() < HEADER_LEN {
            return Err(malformed("shorter than the header"));
        }
        let version = utf16_field(&data[..VERSION_UNITS * 2]);
        if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
            return Err(malformed(format!("unknown version tag {version:?}")));
        }
        let product_at = VERSION_UNITS * 2;
        let product = utf16_field(&data[product_at..product_at + PRODUCT_UNITS * 2]);

        let count_at = product_at + PRODUCT_UNITS * 2;
        let count = u32::from_le_bytes(data[count_at..count_at + 4].try_into().unwrap()) as usize;
        let list_at =
            u32::from_le_bytes(data[count_at + 4..count_at + 8].try_into().unwrap()) as usize;

        let list_end = list_at
            .checked_add(count * DESCRIPTOR_LEN)
            .ok_or_else(|| malformed("descriptor list overflows"))?;
        if list_end > data.len() {
            return Err(malformed("descriptor list extends past the file"));
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let d = &data[list_at + i * DESCRIPTOR_LEN..list_at + (i + 1) * DESCRIPTOR_LEN];
            let file_id = utf16_field(&d[..FILE_ID_UNITS * 2]);
            let name_at = FILE_ID_UNITS * 2;
            let file_name = utf16_field(&d[name_at..name_at + FILE_NAME_UNITS * 2]);
            let n = name_at + FILE_NAME_UNITS * 2;
            let u64_at = |i: usize| u64::from_le_bytes(d[i..i + 8].try_into().unwrap());
            let entry = PacEntry {
                file_id,
                file_name,
                base_addr: u64_at(n),
                data_offset: u64_at(n + 8),
                data_size: u64_at(n + 16),
                flash_flags: u32::from_le_bytes(d[n + 24..n + 28].try_into().unwrap()),
            };
            let end = entry
                .data_offset
                .checked_add(entry.data_size)
                .ok_or_else(|| malformed(format!("{}: size overflows", entry.file_id)))?;
            if entry.data_size > 0 && end > data.len() as u64 {
                return Err(malformed(format!(
                    "{}: payload extends past the file",
                    entry.file_id
                )));
            }
            entries.push(entry);
        }

        Ok(Pac {
            version,
            product,
            entries,
        })
    }

    pub fn find(&self, file_id: &str) -> Option<&PacEntry> {
        self.entries
            .iter()
            .find(|e| e.file_id.eq_ignore_ascii_case(file_id))
    }

    /// Payload bytes of an entry, sliced out of the PAC file.
    pub fn entry_data<'d>(&self, pac_file: &'d [u8], entry: &PacEntry) -> &'d [u8] {
        &pac_file[entry.data_offset as usize..(entry.data_offset + entry.data_size) as usize]
    }
}

/// Flashable records from the TOC. Loader entries (FDL stages, they run
/// from RAM) and empty descriptors are not partitions.
pub fn to_partition_table(pac: &Pac) -> crate::storage::partition::PartitionTable {
    use crate::storage::partition::{PartitionRecord, PartitionTable};
    let records = pac
        .entries
        .iter()
        .filter(|e| e.data_size > 0 && !e.file_id.to_ascii_uppercase().contains("FDL"))
        .map(|e| PartitionRecord {
            name: e.file_id.clone(),
            lun: 0,
            start_sector: e.base_addr / 512,
            sector_count: e.data_size.div_ceil(512),
            sector_size: 512,
            type_guid: None,
            unique_guid: None,
            attributes: e.flash_flags as u64,
        })
        .collect();
    PartitionTable::new(records)
}

fn utf16_field(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn put_utf16(buf: &mut [u8], s: &str) {
        for (i, unit) in s.encode_utf16().enumerate() {
            buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
    }

    /// Assemble a PAC with the given (file_id, file_name, payload) tuples.
    pub(crate) fn build_pac(version: &str, parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let list_at = HEADER_LEN;
        let payload_at = list_at + parts.len() * DESCRIPTOR_LEN;

        let mut file = vec![0u8; payload_at];
        put_utf16(&mut file[..VERSION_UNITS * 2], version);
        put_utf16(
            &mut file[VERSION_UNITS * 2..VERSION_UNITS * 2 + PRODUCT_UNITS * 2],
            "sp9863a_test",
        );
        let count_at = VERSION_UNITS * 2 + PRODUCT_UNITS * 2;
        file[count_at..count_at + 4].copy_from_slice(&(parts.len() as u32).to_le_bytes());
        file[count_at + 4..count_at + 8].copy_from_slice(&(list_at as u32).to_le_bytes());

        let mut offset = payload_at as u64;
        for (i, &(id, name, payload)) in parts.iter().enumerate() {
            let d = &mut file[list_at + i * DESCRIPTOR_LEN..list_at + (i + 1) * DESCRIPTOR_LEN];
            put_utf16(&mut d[..FILE_ID_UNITS * 2], id);
            put_utf16(
                &mut d[FILE_ID_UNITS * 2..FILE_ID_UNITS * 2 + FILE_NAME_UNITS * 2],
                name,
            );
            let n = FILE_ID_UNITS * 2 + FILE_NAME_UNITS * 2;
            d[n..n + 8].copy_from_slice(&0x8000_0000u64.to_le_bytes());
            d[n + 8..n + 16].copy_from_slice(&offset.to_le_bytes());
            d[n + 16..n + 24].copy_from_slice(&(payload.len() as u64).to_le_bytes());
            d[n + 24..n + 28].copy_from_slice(&1u32.to_le_bytes());
            offset += payload.len() as u64;
        }
        for &(_, _, payload) in parts {
            file.extend_from_slice(payload);
        }
        file
    }

    #[test]
    fn parses_toc_and_payloads() {
        let pac = build_pac(
            "BP_R1.0.0",
            &[
                ("FDL", "fdl1-sign.bin", b"fdl1 payload".as_slice()),
                ("FDL2", "fdl2-sign.bin", b"fdl2 payload".as_slice()),
            ],
        );
        let toc = Pac::parse(&pac).unwrap();
        assert_eq!(toc.product, "sp9863a_test");
        assert_eq!(toc.entries.len(), 2);
        let fdl2 = toc.find("fdl2").unwrap();
        assert_eq!(fdl2.file_name, "fdl2-sign.bin");
        assert_eq!(toc.entry_data(&pac, fdl2), b"fdl2 payload");
    }

    #[test]
    fn both_version_tags_are_accepted() {
        for v in SUPPORTED_VERSIONS {
            let pac = build_pac(v, &[("FDL", "fdl1.bin", b"x".as_slice())]);
            assert_eq!(Pac::parse(&pac).unwrap().version, v);
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let pac = build_pac("BP_R9.9.9", &[]);
        assert!(matches!(
            Pac::parse(&pac),
            Err(StorageError::Malformed { .. })
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut pac = build_pac("BP_R2.0.1", &[("FDL", "fdl1.bin", b"payload".as_slice())]);
        pac.truncate(pac.len() - 3);
        assert!(matches!(
            Pac::parse(&pac),
            Err(StorageError::Malformed { .. })
        ));
    }
}
