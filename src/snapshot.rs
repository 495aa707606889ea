use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::SnapshotError;
use crate::space::{AddressSpace, Mapping};

/// Raw content of an address space, as persisted by non-volatile
/// peripherals and save states.
///
/// Page mappings are part of machine assembly and are not recorded; a paged
/// space's snapshot holds its own cells only. A banked space records the
/// selected bank, every bank store, and the shared store together with the
/// window address it appears at.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SpaceSnapshot {
    pub version: u32,
    pub label: String,
    pub bytes: Vec<u8>,
    pub read_only: Vec<u32>,
    #[serde(default)]
    pub bank: Option<usize>,
    #[serde(default)]
    pub banks: Vec<SpaceSnapshot>,
    #[serde(default)]
    pub shared: Option<Box<SpaceSnapshot>>,
    #[serde(default)]
    pub shared_start: Option<u32>,
}

impl SpaceSnapshot {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapshotError> {
        let data = bincode::serialize(self)?;
        let mut file = File::create(path.as_ref())?;
        file.write_all(&data)?;
        file.sync_all()?;
        log::debug!(
            "saved snapshot of `{}` to {}",
            self.label,
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let mut file = File::open(path.as_ref())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let snapshot: SpaceSnapshot = bincode::deserialize(&data)?;
        if snapshot.version > Self::CURRENT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                current: Self::CURRENT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

impl AddressSpace {
    pub fn snapshot(&self) -> SpaceSnapshot {
        let read_only = (0..self.size()).filter(|&a| self.is_read_only(a)).collect();
        let mut snapshot = SpaceSnapshot {
            version: SpaceSnapshot::CURRENT_VERSION,
            label: self.label().to_string(),
            bytes: self.raw_cells().iter().map(|c| c.get()).collect(),
            read_only,
            bank: None,
            banks: Vec::new(),
            shared: None,
            shared_start: None,
        };
        if let Mapping::Banked(map) = self.mapping() {
            snapshot.bank = map.selected();
            snapshot.banks = map.banks().iter().map(AddressSpace::snapshot).collect();
            snapshot.shared = map.shared().map(|s| Box::new(s.snapshot()));
            snapshot.shared_start = map.shared_start();
        }
        snapshot
    }

    /// Puts a snapshot's content back without running listeners or applying
    /// read-only protection. The whole snapshot is checked against this
    /// space's layout before anything is written.
    pub fn restore(&self, snapshot: &SpaceSnapshot) -> Result<(), SnapshotError> {
        self.check_layout(snapshot)?;
        self.restore_unchecked(snapshot);
        log::debug!("restored `{}` from snapshot", self.label());
        Ok(())
    }

    fn check_layout(&self, snapshot: &SpaceSnapshot) -> Result<(), SnapshotError> {
        if snapshot.version > SpaceSnapshot::CURRENT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                current: SpaceSnapshot::CURRENT_VERSION,
            });
        }
        let cells = self.raw_cells().len();
        if snapshot.bytes.len() != cells {
            return Err(SnapshotError::SizeMismatch {
                space: self.label().to_string(),
                expected: cells,
                found: snapshot.bytes.len(),
            });
        }
        if snapshot.read_only.iter().any(|&a| a >= self.size()) {
            return Err(SnapshotError::LayoutMismatch(self.label().to_string()));
        }
        match self.mapping() {
            Mapping::Banked(map) => {
                let banks = map.banks();
                if snapshot.banks.len() != banks.len()
                    || snapshot.bank.is_some_and(|b| b >= banks.len())
                    || snapshot.shared.is_some() != map.shared().is_some()
                    || snapshot.shared_start != map.shared_start()
                {
                    return Err(SnapshotError::LayoutMismatch(self.label().to_string()));
                }
                for (bank, snap) in banks.iter().zip(&snapshot.banks) {
                    bank.check_layout(snap)?;
                }
                if let (Some(shared), Some(snap)) = (map.shared(), &snapshot.shared) {
                    shared.check_layout(snap)?;
                }
            }
            _ => {
                if snapshot.bank.is_some()
                    || !snapshot.banks.is_empty()
                    || snapshot.shared.is_some()
                    || snapshot.shared_start.is_some()
                {
                    return Err(SnapshotError::LayoutMismatch(self.label().to_string()));
                }
            }
        }
        Ok(())
    }

    fn restore_unchecked(&self, snapshot: &SpaceSnapshot) {
        for (cell, &byte) in self.raw_cells().iter().zip(&snapshot.bytes) {
            cell.set(byte);
        }
        self.replace_read_only(&snapshot.read_only);
        if let Mapping::Banked(map) = self.mapping() {
            map.restore_selected(snapshot.bank);
            for (bank, snap) in map.banks().iter().zip(&snapshot.banks) {
                bank.restore_unchecked(snap);
            }
            if let (Some(shared), Some(snap)) = (map.shared(), &snapshot.shared) {
                shared.restore_unchecked(snap);
            }
        }
    }
}
