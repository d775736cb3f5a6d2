// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;

/// In-memory flash image; counts mutations so tests can assert that
/// `ensure` really is idempotent.
struct RamMedium {
    data: Vec<u8>,
    writes: usize,
    erases: usize,
}

impl RamMedium {
    fn new(capacity: u32) -> Self {
        Self {
            data: vec![0xff; capacity as usize],
            writes: 0,
            erases: 0,
        }
    }

    fn mutations(&self) -> usize {
        self.writes + self.erases
    }
}

impl Medium for RamMedium {
    fn capacity(&self) -> u32 {
        self.data.len() as u32
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), MediumError> {
        self.erases += 1;
        let start = address as usize;
        let end = start + length as usize;
        self.data[start..end].fill(0xff);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), MediumError> {
        self.writes += 1;
        let start = address as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&mut self, address: u32, length: u32) -> Result<Vec<u8>, MediumError> {
        let start = address as usize;
        Ok(self.data[start..start + length as usize].to_vec())
    }

    fn read_strided(
        &mut self,
        address: u32,
        count: u32,
        sublength: u32,
        stride: u32,
    ) -> Result<Vec<u8>, MediumError> {
        let mut out = Vec::new();
        for index in 0..count {
            let start = (address + index * stride) as usize;
            out.extend_from_slice(&self.data[start..start + sublength as usize]);
        }
        Ok(out)
    }

    fn hash(&mut self, address: u32, length: u32) -> Result<[u8; HASH_LEN], MediumError> {
        let start = address as usize;
        Ok(Sha1::digest(&self.data[start..start + length as usize]).into())
    }
}

fn fresh(capacity_sectors: u32) -> (FileSystem, RamMedium) {
    let capacity = capacity_sectors * SECTOR_SIZE;
    let mut medium = RamMedium::new(capacity);
    let mut fs = FileSystem::new(capacity);
    fs.format(&mut medium).unwrap();
    (fs, medium)
}

#[test]
fn format_leaves_everything_available() {
    let (fs, _medium) = fresh(8);
    assert!(fs.list().is_empty());
    assert!(fs
        .sectors
        .iter()
        .all(|sector| sector.status == SectorStatus::Available));
}

#[test]
fn ensure_stores_and_verifies() {
    let (mut fs, mut medium) = fresh(8);
    let data: Vec<u8> = [0xde, 0xad, 0xbe, 0xef].repeat(256);
    let entry = fs.ensure(&mut medium, "fw", &data, 42).unwrap();
    assert_eq!(entry.address, SECTOR_SIZE);
    assert_eq!(entry.digest, <[u8; HASH_LEN]>::from(Sha1::digest(&data)));
    assert_eq!(fs.read(&mut medium, "fw").unwrap(), data);
    // One metadata sector plus one content sector.
    assert_eq!(fs.sectors[0].status, SectorStatus::Metadata);
    assert_eq!(fs.sectors[1].status, SectorStatus::Content);
    assert_eq!(fs.sectors[2].status, SectorStatus::Available);
}

#[test]
fn ensure_is_idempotent() {
    let (mut fs, mut medium) = fresh(8);
    let data: Vec<u8> = [0xde, 0xad, 0xbe, 0xef].repeat(256);
    let first = fs.ensure(&mut medium, "fw", &data, 42).unwrap();
    let mutations = medium.mutations();
    let second = fs.ensure(&mut medium, "fw", &data, 43).unwrap();
    assert_eq!(medium.mutations(), mutations, "second ensure touched flash");
    assert_eq!(second.address, first.address);
    assert_eq!(second.date, 42, "entry kept its original stamp");
}

#[test]
fn ensure_replaces_changed_content() {
    let (mut fs, mut medium) = fresh(8);
    fs.ensure(&mut medium, "fw", b"one", 1).unwrap();
    let entry = fs.ensure(&mut medium, "fw", b"two", 2).unwrap();
    assert_eq!(fs.read(&mut medium, "fw").unwrap(), b"two");
    assert_eq!(entry.date, 2);
    assert_eq!(fs.list().len(), 1);
}

#[test]
fn allocation_is_first_fit() {
    let (mut fs, mut medium) = fresh(6);
    fs.ensure(&mut medium, "a", b"aaaa", 1).unwrap();
    fs.ensure(&mut medium, "b", b"bbbb", 2).unwrap();
    fs.erase(&mut medium, "a").unwrap();
    // The freed leftmost run is taken even though the tail also fits.
    let entry = fs.ensure(&mut medium, "c", b"cccc", 3).unwrap();
    assert_eq!(entry.address, SECTOR_SIZE);
}

#[test]
fn full_chip_evicts_least_recently_used() {
    let (mut fs, mut medium) = fresh(4);
    fs.ensure(&mut medium, "a", b"aaaa", 1).unwrap();
    fs.ensure(&mut medium, "b", b"bbbb", 2).unwrap();
    let entry = fs.ensure(&mut medium, "c", b"cccc", 3).unwrap();
    assert!(fs.get("a").is_none(), "oldest entry should be evicted");
    assert!(fs.get("b").is_some());
    assert_eq!(entry.address, SECTOR_SIZE, "evicted run is reused");
}

#[test]
fn oversized_entry_reports_no_space() {
    let (mut fs, mut medium) = fresh(4);
    let data = vec![0u8; 5 * SECTOR_SIZE as usize];
    match fs.ensure(&mut medium, "big", &data, 1) {
        Err(FileSystemError::NotEnoughSpace { name, .. }) => assert_eq!(name, "big"),
        other => panic!("expected NotEnoughSpace, got {other:?}"),
    }
}

#[test]
fn erase_returns_sectors_and_clears_marker() {
    let (mut fs, mut medium) = fresh(8);
    fs.ensure(&mut medium, "fw", b"data", 7).unwrap();
    fs.erase(&mut medium, "fw").unwrap();
    assert!(fs.get("fw").is_none());
    assert!(fs
        .sectors
        .iter()
        .all(|sector| sector.status == SectorStatus::Available));
    // The fast-scan marker byte must read as erased flash.
    assert_eq!(medium.data[0], 0xff);
}

#[test]
fn scan_recovers_entries() {
    let (mut fs, mut medium) = fresh(8);
    fs.ensure(&mut medium, "alpha", b"first", 1).unwrap();
    fs.ensure(&mut medium, "beta", &[0xab; 5000], 2).unwrap();

    let mut recovered = FileSystem::new(medium.capacity());
    recovered.scan(&mut medium).unwrap();
    let names: Vec<_> = recovered.list().iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, ["alpha", "beta"]);
    let beta = recovered.get("beta").unwrap();
    assert_eq!(beta.length, 5000);
    assert_eq!(beta.sector_count, 2);
    assert_eq!(recovered.read(&mut medium, "beta").unwrap(), [0xab; 5000]);
}

#[test]
fn scan_tolerates_corrupt_metadata() {
    let (mut fs, mut medium) = fresh(8);
    fs.ensure(&mut medium, "ok", b"fine", 1).unwrap();
    // A sector that looks like metadata but has a mangled header.
    medium
        .write(4 * SECTOR_SIZE, &[0xf0, 0x12, 0x34, 0x56])
        .unwrap();

    let mut recovered = FileSystem::new(medium.capacity());
    recovered.scan(&mut medium).unwrap();
    assert_eq!(recovered.list().len(), 1);
    assert_eq!(
        recovered.sectors[4].status,
        SectorStatus::Available,
        "corrupt candidate is treated as available"
    );
}

#[test]
fn repair_erases_bad_digest() {
    let (mut fs, mut medium) = fresh(8);
    fs.ensure(&mut medium, "fw", b"payload", 1).unwrap();
    // Flip a content byte behind the file system's back.
    medium.data[SECTOR_SIZE as usize] ^= 0xff;
    assert!(fs.repair(&mut medium).unwrap());
    assert!(fs.get("fw").is_none());
}

#[test]
fn repair_erases_duplicate_names() {
    let (mut fs, mut medium) = fresh(8);
    fs.ensure(&mut medium, "fw", b"payload", 1).unwrap();
    // Clone the whole entry (metadata + content) into the free tail.
    let image = medium.read(0, 2 * SECTOR_SIZE).unwrap();
    medium.write(4 * SECTOR_SIZE, &image).unwrap();

    let mut recovered = FileSystem::new(medium.capacity());
    recovered.scan(&mut medium).unwrap();
    assert_eq!(recovered.list().len(), 2);
    assert!(recovered.repair(&mut medium).unwrap());
    assert_eq!(recovered.list().len(), 1);
    let kept = recovered.get("fw").unwrap();
    assert_eq!(kept.address, SECTOR_SIZE, "first entry wins");
}
