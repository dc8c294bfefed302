// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GUID Partition Table parsing and re-emission.
//!
//! The sector size is probed: the header lives at LBA 1, so it sits at
//! byte 512 or byte 4096 depending on the medium. When both offsets carry
//! the signature, the header whose CRCs check out wins.

use crate::checksum::CRC32;
use crate::error::StorageError;
use crate::storage::partition::{PartitionRecord, PartitionTable};

const SIGNATURE: &[u8; 8] = b"EFI PART";
const HEADER_SIZE: usize = 92;
/// 36 UTF-16 code units.
const NAME_BYTES: usize = 72;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptHeader {
    pub revision: u32,
    pub header_size: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable: u64,
    pub last_usable: u64,
    pub disk_guid: [u8; 16],
    pub entries_lba: u64,
    pub num_entries: u32,
    pub entry_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptEntry {
    pub type_guid: [u8; 16],
    pub unique_guid: [u8; 16],
    pub first_lba: u64,
    pub last_lba: u64,
    pub attributes: u64,
    pub name: String,
}

/// A parsed GPT plus the sector size it was found at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gpt {
    pub sector_size: u32,
    pub header: GptHeader,
    /// Non-empty entries only, in on-disk order.
    pub entries: Vec<GptEntry>,
}

fn malformed(reason: impl Into<String>) -> StorageError {
    StorageError::Malformed {
        layout: "GPT",
        reason: reason.into(),
    }
}

impl Gpt {
    /// Probe 512- and 4096-byte sectors and parse whichever validates.
    pub fn parse_auto(data: &[u8]) -> Result<Gpt, StorageError> {
        let sig_at = |off: usize| data.len() >= off + 8 && &data[off..off + 8] == SIGNATURE;
        match (sig_at(512), sig_at(4096)) {
            (true, false) => Gpt::parse(data, 512),
            (false, true) => Gpt::parse(data, 4096),
            (true, true) => Gpt::parse(data, 512).or_else(|_| Gpt::parse(data, 4096)),
            (false, false) => Err(malformed("no EFI PART signature at LBA 1")),
        }
    }

    /// Parse with a known sector size, validating both CRCs.
    pub fn parse(data: &[u8], sector_size: u32) -> Result<Gpt, StorageError> {
        let ss = sector_size as usize;
        if data.len() < ss * 2 {
            return Err(malformed("image shorter than two sectors"));
        }
        let raw = &data[ss..];
        if &raw[..8] != SIGNATURE {
            return Err(malformed("missing EFI PART signature"));
        }
        let u32_at = |buf: &[u8], i: usize| u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
        let u64_at = |buf: &[u8], i: usize| u64::from_le_bytes(buf[i..i + 8].try_into().unwrap());

        let header_size = u32_at(raw, 12) as usize;
        if !(HEADER_SIZE..=ss).contains(&header_size) {
            return Err(malformed(format!("implausible header size {header_size}")));
        }
        let stored_header_crc = u32_at(raw, 16);
        let mut scratch = raw[..header_size].to_vec();
        scratch[16..20].fill(0);
        let computed = CRC32.checksum(&scratch);
        if computed != stored_header_crc {
            return Err(malformed(format!(
                "header CRC mismatch: computed {computed:#010x}, stored {stored_header_crc:#010x}"
            )));
        }

        let header = GptHeader {
            revision: u32_at(raw, 8),
            header_size: header_size as u32,
            current_lba: u64_at(raw, 24),
            backup_lba: u64_at(raw, 32),
            first_usable: u64_at(raw, 40),
            last_usable: u64_at(raw, 48),
            disk_guid: raw[56..72].try_into().unwrap(),
            entries_lba: u64_at(raw, 72),
            num_entries: u32_at(raw, 80),
            entry_size: u32_at(raw, 84),
        };
        if header.entry_size as usize != 128 {
            return Err(malformed(format!("entry size {}", header.entry_size)));
        }

        let array_off = (header.entries_lba * sector_size as u64) as usize;
        let array_len = header.num_entries as usize * header.entry_size as usize;
        if data.len() < array_off + array_len {
            return Err(malformed("entry array extends past the image"));
        }
        let array = &data[array_off..array_off + array_len];
        let stored_array_crc = u32_at(raw, 88);
        let computed = CRC32.checksum(array);
        if computed != stored_array_crc {
            return Err(malformed(format!(
                "entry array CRC mismatch: computed {computed:#010x}, stored {stored_array_crc:#010x}"
            )));
        }

        let mut entries = Vec::new();
        for chunk in array.chunks_exact(header.entry_size as usize) {
            let type_guid: [u8; 16] = chunk[..16].try_into().unwrap();
            if type_guid == [0u8; 16] {
                continue;
            }
            entries.push(GptEntry {
                type_guid,
                unique_guid: chunk[16..32].try_into().unwrap(),
                first_lba: u64_at(chunk, 32),
                last_lba: u64_at(chunk, 40),
                attributes: u64_at(chunk, 48),
                name: decode_name(&chunk[56..56 + NAME_BYTES]),
            });
        }

        Ok(Gpt {
            sector_size,
            header,
            entries,
        })
    }

    /// Uniform records for the given LUN.
    pub fn to_partition_table(&self, lun: u8) -> PartitionTable {
        let records = self
            .entries
            .iter()
            .map(|e| PartitionRecord {
                name: e.name.clone(),
                lun,
                start_sector: e.first_lba,
                sector_count: e.last_lba - e.first_lba + 1,
                sector_size: self.sector_size,
                type_guid: Some(e.type_guid),
                unique_guid: Some(e.unique_guid),
                attributes: e.attributes,
            })
            .collect();
        PartitionTable::new(records)
    }

    fn entry_array_bytes(&self) -> Vec<u8> {
        let mut array = vec![0u8; self.header.num_entries as usize * self.header.entry_size as usize];
        for (i, e) in self.entries.iter().enumerate() {
            let at = i * self.header.entry_size as usize;
            let slot = &mut array[at..at + self.header.entry_size as usize];
            slot[..16].copy_from_slice(&e.type_guid);
            slot[16..32].copy_from_slice(&e.unique_guid);
            slot[32..40].copy_from_slice(&e.first_lba.to_le_bytes());
            slot[40..48].copy_from_slice(&e.last_lba.to_le_bytes());
            slot[48..56].copy_from_slice(&e.attributes.to_le_bytes());
            slot[56..56 + NAME_BYTES].copy_from_slice(&encode_name(&e.name));
        }
        array
    }

    fn header_sector(&self, current: u64, backup: u64, entries_lba: u64, array: &[u8]) -> Vec<u8> {
        let mut h = vec![0u8; self.sector_size as usize];
        h[..8].copy_from_slice(SIGNATURE);
        h[8..12].copy_from_slice(&self.header.revision.to_le_bytes());
        h[12..16].copy_from_slice(&self.header.header_size.to_le_bytes());
        h[24..32].copy_from_slice(&current.to_le_bytes());
        h[32..40].copy_from_slice(&backup.to_le_bytes());
        h[40..48].copy_from_slice(&self.header.first_usable.to_le_bytes());
        h[48..56].copy_from_slice(&self.header.last_usable.to_le_bytes());
        h[56..72].copy_from_slice(&self.header.disk_guid);
        h[72..80].copy_from_slice(&entries_lba.to_le_bytes());
        h[80..84].copy_from_slice(&self.header.num_entries.to_le_bytes());
        h[84..88].copy_from_slice(&self.header.entry_size.to_le_bytes());
        h[88..92].copy_from_slice(&CRC32.checksum(array).to_le_bytes());
        let crc = {
            let mut scratch = h[..self.header.header_size as usize].to_vec();
            scratch[16..20].fill(0);
            CRC32.checksum(&scratch)
        };
        h[16..20].copy_from_slice(&crc.to_le_bytes());
        h
    }

    /// Emit the primary table as an image prefix: protective sector 0
    /// (zeroed), header at LBA 1, entry array at its recorded LBA.
    pub fn emit_primary(&self) -> Vec<u8> {
        let ss = self.sector_size as usize;
        let array = self.entry_array_bytes();
        let array_off = self.header.entries_lba as usize * ss;
        let mut out = vec![0u8; (array_off + array.len()).next_multiple_of(ss)];
        let header = self.header_sector(
            self.header.current_lba,
            self.header.backup_lba,
            self.header.entries_lba,
            &array,
        );
        out[ss..ss * 2].copy_from_slice(&header);
        out[array_off..array_off + array.len()].copy_from_slice(&array);
        out
    }

    /// Emit the backup table: entry array followed by the backup header,
    /// as it is laid out at the top of the disk.
    pub fn emit_backup(&self) -> Vec<u8> {
        let array = self.entry_array_bytes();
        let backup_entries_lba = self.header.last_usable + 1;
        let header = self.header_sector(
            self.header.backup_lba,
            self.header.current_lba,
            backup_entries_lba,
            &array,
        );
        let mut out = array;
        out.extend_from_slice(&header);
        out
    }
}

fn decode_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

fn encode_name(name: &str) -> [u8; NAME_BYTES] {
    let mut out = [0u8; NAME_BYTES];
    for (i, unit) in name.encode_utf16().take(NAME_BYTES / 2).enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sector_size: u32) -> Gpt {
        Gpt {
            sector_size,
            header: GptHeader {
                revision: 0x0001_0000,
                header_size: HEADER_SIZE as u32,
                current_lba: 1,
                backup_lba: 0xFFFF,
                first_usable: 6,
                last_usable: 0xFF00,
                disk_guid: *b"0123456789abcdef",
                entries_lba: 2,
                num_entries: 128,
                entry_size: 128,
            },
            entries: vec![
                GptEntry {
                    type_guid: [0x11; 16],
                    unique_guid: [0x22; 16],
                    first_lba: 256,
                    last_lba: 383,
                    attributes: 0x0400_0000_0000_0000,
                    name: "boot".into(),
                },
                GptEntry {
                    type_guid: [0x33; 16],
                    unique_guid: [0x44; 16],
                    first_lba: 384,
                    last_lba: 511,
                    attributes: 0,
                    name: "recovery".into(),
                },
            ],
        }
    }

    #[test]
    fn parse_emit_roundtrip_is_byte_identical() {
        for ss in [512u32, 4096] {
            let gpt = sample(ss);
            let primary = gpt.emit_primary();
            let parsed = Gpt::parse_auto(&primary).unwrap();
            assert_eq!(parsed, gpt);
            assert_eq!(parsed.emit_primary(), primary, "sector size {ss}");
            assert_eq!(parsed.emit_backup(), gpt.emit_backup());
        }
    }

    // 4096-byte sectors: header at byte 4096, entries at 8192.
    #[test]
    fn four_k_sector_partition_record() {
        let gpt = sample(4096);
        let image = gpt.emit_primary();
        let parsed = Gpt::parse_auto(&image).unwrap();
        assert_eq!(parsed.sector_size, 4096);
        let table = parsed.to_partition_table(0);
        let boot = table.find("boot", None).unwrap();
        assert_eq!(boot.start_sector, 256);
        assert_eq!(boot.sector_count, 128);
        assert_eq!(boot.sector_size, 4096);
        assert_eq!(boot.size(), 524288);
    }

    #[test]
    fn corrupt_header_crc_is_rejected() {
        let gpt = sample(512);
        let mut image = gpt.emit_primary();
        image[512 + 40] ^= 1; // first_usable
        assert!(matches!(
            Gpt::parse(&image, 512),
            Err(StorageError::Malformed { .. })
        ));
    }

    #[test]
    fn corrupt_entry_array_is_rejected() {
        let gpt = sample(512);
        let mut image = gpt.emit_primary();
        image[2 * 512 + 32] ^= 1; // first_lba of entry 0
        assert!(matches!(
            Gpt::parse(&image, 512),
            Err(StorageError::Malformed { .. })
        ));
    }

    #[test]
    fn unicode_names_roundtrip() {
        let mut gpt = sample(512);
        gpt.entries[0].name = "συστημα".into();
        let parsed = Gpt::parse_auto(&gpt.emit_primary()).unwrap();
        assert_eq!(parsed.entries[0].name, "συστημα");
    }
}
