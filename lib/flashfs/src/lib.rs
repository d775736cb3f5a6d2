// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Content-addressed file store on the fixture's flash chip.
//!
//! The chip is carved into 4 KiB sectors. An allocated file is a run of one
//! metadata sector followed by content sectors; everything else is
//! available. The metadata page opens with an eight-byte magic whose leading
//! `0xf0` doubles as the marker a strided one-byte-per-sector read can scan
//! for, so recovering the whole map on open costs one bulk read plus one
//! page read per file.
//!
//! Entries are addressed by name but verified by SHA-1 digest, which is what
//! makes [`FileSystem::ensure`] an idempotent write: same name, same bytes,
//! no flash traffic. Allocation is first-fit over runs of available sectors;
//! when nothing fits, the least recently used entry (by its `date` stamp) is
//! evicted and the scan retried.
//!
//! All flash access goes through the [`Medium`] trait so the store can run
//! against the storage instrument or an in-memory image in tests.

use sha1::{Digest, Sha1};
use wirebuf::WireBuf;

mod error;

pub use error::{FileSystemError, MediumError};

/// Erase unit of the flash chip.
pub const SECTOR_SIZE: u32 = 1 << 12;
/// Metadata page size (SD-card block size; flash-only builds used 256).
pub const PAGE_SIZE: u32 = 1 << 9;
/// Digest length (SHA-1).
pub const HASH_LEN: usize = 20;
/// Floor on the sectors per entry, to cap fragmentation.
pub const MIN_SECTOR_COUNT: u32 = 2;

/// Metadata page magic; the leading byte is the fast-scan marker.
pub const MAGIC: [u8; 8] = [0xf0, b'f', b'i', b'r', b'e', b'f', b'l', b'y'];

/// Byte-level access to the storage chip.
pub trait Medium {
    fn capacity(&self) -> u32;
    fn erase(&mut self, address: u32, length: u32) -> Result<(), MediumError>;
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), MediumError>;
    fn read(&mut self, address: u32, length: u32) -> Result<Vec<u8>, MediumError>;
    /// Read `count` runs of `sublength` bytes, `stride` apart.
    fn read_strided(
        &mut self,
        address: u32,
        count: u32,
        sublength: u32,
        stride: u32,
    ) -> Result<Vec<u8>, MediumError>;
    /// SHA-1 of `length` bytes starting at `address`, computed chip-side.
    fn hash(&mut self, address: u32, length: u32) -> Result<[u8; HASH_LEN], MediumError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub sector_count: u32,
    pub length: u32,
    pub date: u32,
    pub digest: [u8; HASH_LEN],
    /// First content byte; the metadata sector sits one sector below.
    pub address: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorStatus {
    Available,
    Metadata,
    Content,
}

#[derive(Debug, Clone)]
struct Sector {
    address: u32,
    status: SectorStatus,
    entry: Option<Entry>,
}

pub struct FileSystem {
    sectors: Vec<Sector>,
    sector_count: u32,
}

impl FileSystem {
    /// An unscanned map for a medium of the given capacity; call
    /// [`scan`](Self::scan) (or [`format`](Self::format)) before use.
    pub fn new(capacity: u32) -> Self {
        let sector_count = capacity / SECTOR_SIZE;
        Self {
            sectors: Vec::new(),
            sector_count,
        }
    }

    fn capacity(&self) -> u32 {
        self.sector_count * SECTOR_SIZE
    }

    /// Rebuild the in-memory sector map from the chip.
    pub fn scan<M: Medium>(&mut self, medium: &mut M) -> Result<(), FileSystemError> {
        self.sectors.clear();
        // One coarse read of the first byte of every sector classifies
        // candidates without touching the other 4095 bytes.
        let markers = medium.read_strided(0, self.sector_count, 1, SECTOR_SIZE)?;
        let mut index = 0u32;
        while index < self.sector_count {
            let address = index * SECTOR_SIZE;
            if markers.get(index as usize) == Some(&MAGIC[0]) {
                let page = medium.read(address, PAGE_SIZE)?;
                match self.parse_metadata(address, &page, index) {
                    Some(entry) => {
                        let sector_count = entry.sector_count;
                        self.sectors.push(Sector {
                            address,
                            status: SectorStatus::Metadata,
                            entry: Some(entry),
                        });
                        index += 1;
                        for _ in 0..sector_count {
                            self.sectors.push(Sector {
                                address: index * SECTOR_SIZE,
                                status: SectorStatus::Content,
                                entry: None,
                            });
                            index += 1;
                        }
                        continue;
                    }
                    None => {
                        log::warn!("corrupt metadata in sector {index}; treating as available");
                    }
                }
            }
            self.sectors.push(Sector {
                address,
                status: SectorStatus::Available,
                entry: None,
            });
            index += 1;
        }
        Ok(())
    }

    fn parse_metadata(&self, address: u32, page: &[u8], index: u32) -> Option<Entry> {
        if page.len() < MAGIC.len() || page[..MAGIC.len()] != MAGIC {
            return None;
        }
        let mut header = WireBuf::from_vec(page.to_vec());
        let _magic = header.get_bytes(MAGIC.len());
        let sector_count = header.get_u32();
        let length = header.get_u32();
        let date = header.get_u32();
        let digest = header.get_bytes(HASH_LEN);
        let name = header.get_string();
        if !header.is_clean() || name.is_empty() {
            return None;
        }
        // A run that walks off the end of the chip cannot be real.
        if index + 1 + sector_count > self.sector_count {
            return None;
        }
        if length > sector_count * SECTOR_SIZE {
            return None;
        }
        let mut digest_bytes = [0u8; HASH_LEN];
        digest_bytes.copy_from_slice(&digest);
        Some(Entry {
            name,
            sector_count,
            length,
            date,
            digest: digest_bytes,
            address: address + SECTOR_SIZE,
        })
    }

    /// Erase the whole chip and mark every sector available.
    pub fn format<M: Medium>(&mut self, medium: &mut M) -> Result<(), FileSystemError> {
        medium.erase(0, self.capacity())?;
        self.sectors = (0..self.sector_count)
            .map(|index| Sector {
                address: index * SECTOR_SIZE,
                status: SectorStatus::Available,
                entry: None,
            })
            .collect();
        Ok(())
    }

    pub fn list(&self) -> Vec<&Entry> {
        self.sectors
            .iter()
            .filter_map(|sector| sector.entry.as_ref())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.list().into_iter().find(|entry| entry.name == name)
    }

    pub fn read<M: Medium>(
        &self,
        medium: &mut M,
        name: &str,
    ) -> Result<Vec<u8>, FileSystemError> {
        let entry = self
            .get(name)
            .ok_or_else(|| FileSystemError::NotFound(name.to_string()))?;
        Ok(medium.read(entry.address, entry.length)?)
    }

    fn erase_run<M: Medium>(
        &mut self,
        medium: &mut M,
        sector_index: usize,
    ) -> Result<(), FileSystemError> {
        let sector = &self.sectors[sector_index];
        let sector_count = match (&sector.status, &sector.entry) {
            (SectorStatus::Metadata, Some(entry)) => entry.sector_count + 1,
            _ => 1,
        };
        // Erase the run's exact footprint, never the whole chip.
        medium.erase(sector.address, sector_count * SECTOR_SIZE)?;
        for sector in &mut self.sectors[sector_index..sector_index + sector_count as usize] {
            sector.status = SectorStatus::Available;
            sector.entry = None;
        }
        Ok(())
    }

    /// Erase every entry named `name`.
    pub fn erase<M: Medium>(
        &mut self,
        medium: &mut M,
        name: &str,
    ) -> Result<(), FileSystemError> {
        for index in 0..self.sectors.len() {
            let matches = self.sectors[index]
                .entry
                .as_ref()
                .is_some_and(|entry| entry.name == name);
            if matches {
                self.erase_run(medium, index)?;
            }
        }
        Ok(())
    }

    /// Verify every entry's content digest and drop duplicates by name.
    /// Returns whether anything was erased.
    pub fn repair<M: Medium>(&mut self, medium: &mut M) -> Result<bool, FileSystemError> {
        let mut repaired = false;
        let mut seen = Vec::<String>::new();
        for index in 0..self.sectors.len() {
            let Some(entry) = self.sectors[index].entry.clone() else {
                continue;
            };
            let digest = medium.hash(entry.address, entry.length)?;
            if digest != entry.digest {
                log::warn!("repair: erasing entry with bad content digest: {}", entry.name);
                self.erase_run(medium, index)?;
                repaired = true;
            } else if seen.contains(&entry.name) {
                log::warn!("repair: erasing duplicate entry: {}", entry.name);
                self.erase_run(medium, index)?;
                repaired = true;
            } else {
                seen.push(entry.name);
            }
        }
        Ok(repaired)
    }

    fn content_sectors(length: u32) -> u32 {
        length.div_ceil(SECTOR_SIZE)
    }

    fn write_entry<M: Medium>(
        &mut self,
        medium: &mut M,
        name: &str,
        data: &[u8],
        date: u32,
        first_index: usize,
        sector_count: u32,
    ) -> Result<Entry, FileSystemError> {
        let address = self.sectors[first_index].address;
        let entry = Entry {
            name: name.to_string(),
            sector_count: sector_count - 1,
            length: data.len() as u32,
            date,
            digest: Sha1::digest(data).into(),
            address: address + SECTOR_SIZE,
        };

        medium.erase(address, sector_count * SECTOR_SIZE)?;

        let mut page = WireBuf::new();
        page.put_bytes(&MAGIC);
        page.put_u32(entry.sector_count);
        page.put_u32(entry.length);
        page.put_u32(entry.date);
        page.put_bytes(&entry.digest);
        page.put_string(name);
        medium.write(address, page.as_slice())?;
        medium.write(entry.address, data)?;

        self.sectors[first_index].status = SectorStatus::Metadata;
        self.sectors[first_index].entry = Some(entry.clone());
        for sector in
            &mut self.sectors[first_index + 1..first_index + sector_count as usize]
        {
            sector.status = SectorStatus::Content;
            sector.entry = None;
        }
        Ok(entry)
    }

    /// First-fit: the leftmost run of available sectors that holds `need`.
    fn find_run(&self, need: u32) -> Option<usize> {
        let mut run_start = None;
        let mut run_length = 0u32;
        for (index, sector) in self.sectors.iter().enumerate() {
            if sector.status == SectorStatus::Available {
                if run_start.is_none() {
                    run_start = Some(index);
                    run_length = 0;
                }
                run_length += 1;
                if run_length >= need {
                    return run_start;
                }
            } else {
                run_start = None;
            }
        }
        None
    }

    fn least_recently_used(&self) -> Option<usize> {
        self.sectors
            .iter()
            .enumerate()
            .filter_map(|(index, sector)| {
                sector.entry.as_ref().map(|entry| (index, entry.date))
            })
            .min_by_key(|(_, date)| *date)
            .map(|(index, _)| index)
    }

    /// Store `data` under `name`, evicting least-recently-used entries until
    /// a first-fit run is found. The entry is on flash when this returns.
    pub fn allocate<M: Medium>(
        &mut self,
        medium: &mut M,
        name: &str,
        data: &[u8],
        date: u32,
    ) -> Result<Entry, FileSystemError> {
        let need = (1 + Self::content_sectors(data.len() as u32)).max(MIN_SECTOR_COUNT);
        loop {
            if let Some(first_index) = self.find_run(need) {
                return self.write_entry(medium, name, data, date, first_index, need);
            }
            match self.least_recently_used() {
                Some(index) => self.erase_run(medium, index)?,
                None => {
                    return Err(FileSystemError::NotEnoughSpace {
                        name: name.to_string(),
                        length: data.len(),
                    })
                }
            }
        }
    }

    /// Idempotent write: an existing entry whose digest matches `data` is
    /// returned without touching the flash. Otherwise the stale entry is
    /// erased, the data stored, and the on-chip digest verified.
    pub fn ensure<M: Medium>(
        &mut self,
        medium: &mut M,
        name: &str,
        data: &[u8],
        date: u32,
    ) -> Result<Entry, FileSystemError> {
        if let Some(entry) = self.get(name).cloned() {
            let digest: [u8; HASH_LEN] = Sha1::digest(data).into();
            if entry.digest == digest {
                return Ok(entry);
            }
            self.erase(medium, name)?;
        }
        let entry = self.allocate(medium, name, data, date)?;
        let verify = medium.hash(entry.address, entry.length)?;
        if verify != entry.digest {
            return Err(FileSystemError::CorruptWrite);
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests;
