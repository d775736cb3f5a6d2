// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The view of a firmware ELF the programming flow consumes.
//!
//! The flasher does not need relocation or debug info, just four things: a
//! base load address with a contiguous byte image behind it, the addresses
//! of the resident entry points by name, and the `.heap`/`.stack` section
//! ranges the synthetic-call machinery parks its staging buffer and stack
//! pointer in. [`FirmwareImage`] extracts exactly that with goblin.

mod bundle;

use core::fmt;

use derive_more::From;
use goblin::elf::Elf;
use indexmap::IndexMap;

pub use bundle::Bundle;

/// Code sections merged into the load image, in link order.
const IMAGE_SECTIONS: [&str; 3] = [".vectors", ".init", ".text"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRange {
    pub address: u32,
    pub size: u32,
}

#[derive(Debug, From)]
pub enum ImageError {
    #[from]
    Io(std::io::Error),
    #[from]
    Elf(goblin::error::Error),
    /// None of the expected code sections exist.
    NoLoadableSections,
    MissingSection(&'static str),
    ResourceNotFound(String),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::Io(e) => write!(f, "i/o failed: {e}"),
            ImageError::Elf(e) => write!(f, "malformed ELF: {e}"),
            ImageError::NoLoadableSections => f.write_str("no loadable code sections"),
            ImageError::MissingSection(name) => {
                write!(f, "required section missing: {name}")
            }
            ImageError::ResourceNotFound(name) => {
                write!(f, "resource not found: {name}")
            }
        }
    }
}

impl std::error::Error for ImageError {}

#[derive(Debug, Clone)]
pub struct FirmwareImage {
    /// Load address of the first image byte.
    pub address: u32,
    /// Contiguous image, gaps zero-filled, length a multiple of 8.
    pub data: Vec<u8>,
    /// Function symbol addresses, in symbol-table order.
    pub functions: IndexMap<String, u32>,
    pub heap: SectionRange,
    pub stack: SectionRange,
}

impl FirmwareImage {
    pub fn load(path: &std::path::Path) -> Result<Self, ImageError> {
        let buffer = std::fs::read(path)?;
        let image = Self::parse(&buffer)?;
        log::debug!(
            "loaded {}: {:#010x}+{:#x}, {} functions",
            path.display(),
            image.address,
            image.data.len(),
            image.functions.len()
        );
        Ok(image)
    }

    pub fn parse(buffer: &[u8]) -> Result<Self, ImageError> {
        let elf = Elf::parse(buffer)?;

        let mut start = None;
        let mut end = None;
        let mut pieces = Vec::new();
        for header in &elf.section_headers {
            let Some(name) = elf.shdr_strtab.get_at(header.sh_name) else {
                continue;
            };
            if !IMAGE_SECTIONS.contains(&name) {
                continue;
            }
            let address = header.sh_addr as u32;
            let size = header.sh_size as u32;
            start = Some(start.map_or(address, |s: u32| s.min(address)));
            end = Some(end.map_or(address + size, |e: u32| e.max(address + size)));
            if header.sh_type != goblin::elf::section_header::SHT_NOBITS {
                let offset = header.sh_offset as usize;
                pieces.push((address, buffer[offset..offset + size as usize].to_vec()));
            }
        }
        let (Some(address), Some(end)) = (start, end) else {
            return Err(ImageError::NoLoadableSections);
        };

        // Zero-fill alignment gaps between sections, then pad the whole
        // image to the 8-byte granule the staging transfers assume.
        let mut data = vec![0u8; (end - address) as usize];
        for (piece_address, piece) in pieces {
            let offset = (piece_address - address) as usize;
            data[offset..offset + piece.len()].copy_from_slice(&piece);
        }
        let padded = data.len().next_multiple_of(8);
        data.resize(padded, 0);

        let mut functions = IndexMap::new();
        for sym in elf.syms.iter() {
            if !sym.is_function() || sym.st_value == 0 {
                continue;
            }
            if let Some(name) = elf.strtab.get_at(sym.st_name) {
                if !name.is_empty() {
                    functions.insert(name.to_string(), sym.st_value as u32);
                }
            }
        }

        Ok(Self {
            address,
            data,
            functions,
            heap: section_range(&elf, ".heap")?,
            stack: section_range(&elf, ".stack")?,
        })
    }

    pub fn function(&self, name: &str) -> Option<u32> {
        self.functions.get(name).copied()
    }
}

fn section_range(elf: &Elf<'_>, name: &'static str) -> Result<SectionRange, ImageError> {
    for header in &elf.section_headers {
        if elf.shdr_strtab.get_at(header.sh_name) == Some(name) {
            return Ok(SectionRange {
                address: header.sh_addr as u32,
                size: header.sh_size as u32,
            });
        }
    }
    Err(ImageError::MissingSection(name))
}
