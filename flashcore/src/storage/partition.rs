// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Uniform partition records and the lookup rules shared by every vendor
//! layout.

use serde::Serialize;

use crate::error::StorageError;

/// A/B slot selector for lookups and operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
    /// Operate on A then B; the whole operation fails if either side fails.
    Both,
}

impl Slot {
    pub fn suffix(&self) -> &'static str {
        match self {
            Slot::A => "_a",
            Slot::B => "_b",
            Slot::Both => "",
        }
    }
}

impl std::str::FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" => Ok(Slot::A),
            "b" => Ok(Slot::B),
            "both" => Ok(Slot::Both),
            other => Err(format!("unknown slot {other:?} (expected a, b or both)")),
        }
    }
}

/// One partition, wherever it came from (GPT, PMT, LP metadata, PAC TOC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionRecord {
    pub name: String,
    pub lun: u8,
    pub start_sector: u64,
    pub sector_count: u64,
    /// 512 or 4096.
    pub sector_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_guid: Option<[u8; 16]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_guid: Option<[u8; 16]>,
    pub attributes: u64,
}

impl PartitionRecord {
    pub fn start_offset(&self) -> u64 {
        self.start_sector * self.sector_size as u64
    }

    pub fn size(&self) -> u64 {
        self.sector_count * self.sector_size as u64
    }

    /// `"boot_a"` -> `("boot", Some('a'))`; `"userdata"` -> no slot.
    pub fn base_and_slot(&self) -> (&str, Option<char>) {
        let lower = &self.name;
        if let Some(base) = lower
            .strip_suffix("_a")
            .or_else(|| lower.strip_suffix("_A"))
        {
            (base, Some('a'))
        } else if let Some(base) = lower
            .strip_suffix("_b")
            .or_else(|| lower.strip_suffix("_B"))
        {
            (base, Some('b'))
        } else {
            (lower, None)
        }
    }
}

/// Dense, index-addressed partition table for one device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionTable {
    records: Vec<PartitionRecord>,
}

impl PartitionTable {
    pub fn new(records: Vec<PartitionRecord>) -> Self {
        PartitionTable { records }
    }

    pub fn records(&self) -> &[PartitionRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Case-insensitive exact-name lookup.
    ///
    /// With a slot, `name` is matched both verbatim and with the slot
    /// suffix appended. Without one, a name carried by several partitions
    /// (A/B layouts) is an error.
    pub fn find(&self, name: &str, slot: Option<Slot>) -> Result<&PartitionRecord, StorageError> {
        match slot {
            Some(Slot::Both) | None => {
                let matches: Vec<&PartitionRecord> = self
                    .records
                    .iter()
                    .filter(|r| r.name.eq_ignore_ascii_case(name))
                    .collect();
                match matches.as_slice() {
                    [] if slot.is_none() => {
                        // A bare base name with exactly one slotted variant
                        // is unambiguous.
                        let slotted: Vec<&PartitionRecord> = self
                            .records
                            .iter()
                            .filter(|r| {
                                let (base, s) = r.base_and_slot();
                                s.is_some() && base.eq_ignore_ascii_case(name)
                            })
                            .collect();
                        match slotted.as_slice() {
                            [one] => Ok(one),
                            [] => Err(StorageError::PartitionNotFound(name.to_string())),
                            _ => Err(StorageError::AmbiguousName(name.to_string())),
                        }
                    }
                    [] => Err(StorageError::PartitionNotFound(name.to_string())),
                    [one] => Ok(one),
                    _ => Err(StorageError::AmbiguousName(name.to_string())),
                }
            }
            Some(s) => {
                let suffixed = format!("{}{}", name, s.suffix());
                self.records
                    .iter()
                    .find(|r| {
                        r.name.eq_ignore_ascii_case(&suffixed)
                            || r.name.eq_ignore_ascii_case(name)
                    })
                    .ok_or_else(|| StorageError::PartitionNotFound(suffixed))
            }
        }
    }

    /// Check every record against the device geometry: in bounds, and
    /// pairwise disjoint within a LUN.
    pub fn validate(&self, lun_lba_counts: &[(u8, u64)]) -> Result<(), StorageError> {
        for r in &self.records {
            if let Some(&(_, lba_count)) = lun_lba_counts.iter().find(|(lun, _)| *lun == r.lun) {
                let end = r
                    .start_sector
                    .checked_add(r.sector_count)
                    .ok_or(StorageError::OutOfRange {
                        offset: r.start_sector,
                        len: r.sector_count,
                        limit: lba_count,
                    })?;
                if end > lba_count {
                    return Err(StorageError::OutOfRange {
                        offset: r.start_sector,
                        len: r.sector_count,
                        limit: lba_count,
                    });
                }
            }
        }

        let mut spans: Vec<(u8, u64, u64, &str)> = self
            .records
            .iter()
            .map(|r| (r.lun, r.start_sector, r.start_sector + r.sector_count, r.name.as_str()))
            .collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            let (lun_a, _, end_a, name_a) = pair[0];
            let (lun_b, start_b, _, name_b) = pair[1];
            if lun_a == lun_b && start_b < end_a {
                return Err(StorageError::Malformed {
                    layout: "partition table",
                    reason: format!("{name_a} overlaps {name_b}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, lun: u8, start: u64, count: u64) -> PartitionRecord {
        PartitionRecord {
            name: name.to_string(),
            lun,
            start_sector: start,
            sector_count: count,
            sector_size: 512,
            type_guid: None,
            unique_guid: None,
            attributes: 0,
        }
    }

    fn ab_table() -> PartitionTable {
        PartitionTable::new(vec![
            record("boot_a", 0, 0x100, 0x80),
            record("boot_b", 0, 0x180, 0x80),
            record("userdata", 0, 0x200, 0x400),
        ])
    }

    #[test]
    fn derived_offsets() {
        let r = record("boot", 0, 256, 128);
        assert_eq!(r.start_offset(), 131072);
        assert_eq!(r.size(), 65536);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let t = ab_table();
        assert_eq!(t.find("USERDATA", None).unwrap().name, "userdata");
    }

    #[test]
    fn ab_requires_slot() {
        let t = ab_table();
        assert_eq!(
            t.find("boot", None),
            Err(StorageError::AmbiguousName("boot".into()))
        );
        assert_eq!(t.find("boot", Some(Slot::A)).unwrap().name, "boot_a");
        assert_eq!(t.find("boot", Some(Slot::B)).unwrap().name, "boot_b");
    }

    #[test]
    fn missing_partition() {
        assert_eq!(
            ab_table().find("dtbo", None),
            Err(StorageError::PartitionNotFound("dtbo".into()))
        );
    }

    #[test]
    fn validate_rejects_overlap() {
        let t = PartitionTable::new(vec![
            record("one", 0, 0x100, 0x100),
            record("two", 0, 0x180, 0x100),
        ]);
        assert!(matches!(
            t.validate(&[(0, 0x10000)]),
            Err(StorageError::Malformed { .. })
        ));
    }

    #[test]
    fn validate_rejects_out_of_bounds() {
        let t = PartitionTable::new(vec![record("big", 0, 0x100, 0x10000)]);
        assert!(matches!(
            t.validate(&[(0, 0x8000)]),
            Err(StorageError::OutOfRange { .. })
        ));
    }

    #[test]
    fn different_luns_may_overlap() {
        let t = PartitionTable::new(vec![
            record("lu0", 0, 0x100, 0x100),
            record("lu1", 1, 0x100, 0x100),
        ]);
        t.validate(&[(0, 0x1000), (1, 0x1000)]).unwrap();
    }
}
