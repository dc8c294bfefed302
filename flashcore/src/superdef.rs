// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! `super_def.<nv>.json`: the caller-supplied plan for flashing a dynamic
//! (super) partition's children.

use serde::Deserialize;

use crate::error::StorageError;
use crate::storage::partition::Slot;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SuperDef {
    pub nv_id: String,
    pub partitions: Vec<SuperChild>,
    pub meta_path: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SuperChild {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub slot: Option<String>,
}

impl SuperChild {
    pub fn slot(&self) -> Result<Option<Slot>, StorageError> {
        match &self.slot {
            None => Ok(None),
            Some(s) => s
                .parse::<Slot>()
                .map(Some)
                .map_err(|reason| StorageError::Malformed {
                    layout: "super_def",
                    reason,
                }),
        }
    }
}

impl SuperDef {
    pub fn parse(json: &str) -> Result<SuperDef, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::Malformed {
            layout: "super_def",
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plan() {
        let def = SuperDef::parse(
            r#"{
                "nv_id": "IN",
                "partitions": [
                    {"name": "system", "path": "system.img", "slot": "a"},
                    {"name": "vendor", "path": "vendor.img"}
                ],
                "meta_path": "super_meta.img"
            }"#,
        )
        .unwrap();
        assert_eq!(def.nv_id, "IN");
        assert_eq!(def.partitions.len(), 2);
        assert_eq!(def.partitions[0].slot().unwrap(), Some(Slot::A));
        assert_eq!(def.partitions[1].slot().unwrap(), None);
        assert_eq!(def.meta_path, "super_meta.img");
    }

    #[test]
    fn bad_slot_is_malformed() {
        let def = SuperDef::parse(
            r#"{"nv_id":"x","partitions":[{"name":"p","path":"p.img","slot":"q"}],"meta_path":"m"}"#,
        )
        .unwrap();
        assert!(def.partitions[0].slot().is_err());
    }

    #[test]
    fn missing_field_is_malformed() {
        assert!(SuperDef::parse(r#"{"nv_id":"x"}"#).is_err());
    }
}
