// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The storage instrument as a [`flashfs::Medium`].
//!
//! The file system wants plain byte-level primitives; this adapter borrows
//! the bus for the duration of one file-system operation and maps each
//! primitive onto the storage instrument's apis.

use flashfs::{Medium, MediumError, HASH_LEN};

use crate::bus::InstrumentBus;
use crate::error::BusError;
use crate::storage::Storage;

/// The fixture's storage chip is 2 MiB.
pub const FIXTURE_CAPACITY: u32 = 1 << 21;

pub struct StorageMedium<'a> {
    bus: &'a mut InstrumentBus,
    storage: Storage,
}

impl<'a> StorageMedium<'a> {
    pub fn new(bus: &'a mut InstrumentBus, storage: Storage) -> Self {
        Self { bus, storage }
    }
}

fn boxed(e: BusError) -> MediumError {
    Box::new(e)
}

impl Medium for StorageMedium<'_> {
    fn capacity(&self) -> u32 {
        FIXTURE_CAPACITY
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), MediumError> {
        self.storage
            .erase(self.bus, address, length)
            .map_err(boxed)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), MediumError> {
        self.storage.write(self.bus, address, data).map_err(boxed)
    }

    fn read(&mut self, address: u32, length: u32) -> Result<Vec<u8>, MediumError> {
        self.storage.read(self.bus, address, length).map_err(boxed)
    }

    fn read_strided(
        &mut self,
        address: u32,
        count: u32,
        sublength: u32,
        stride: u32,
    ) -> Result<Vec<u8>, MediumError> {
        self.storage
            .read_strided(self.bus, address, count * sublength, sublength, stride)
            .map_err(boxed)
    }

    fn hash(&mut self, address: u32, length: u32) -> Result<[u8; HASH_LEN], MediumError> {
        self.storage.hash(self.bus, address, length).map_err(boxed)
    }
}
