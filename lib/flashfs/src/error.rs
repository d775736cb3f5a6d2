// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// Whatever the backing store reports; boxed so the file system stays
/// independent of the instrument stack.
pub type MediumError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub enum FileSystemError {
    NotFound(String),
    NotEnoughSpace { name: String, length: usize },
    /// The digest read back from the chip does not match what was written.
    CorruptWrite,
    Medium(MediumError),
}

impl fmt::Display for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSystemError::NotFound(name) => write!(f, "entry not found: {name}"),
            FileSystemError::NotEnoughSpace { name, length } => {
                write!(f, "not enough space (name: {name}, length: {length})")
            }
            FileSystemError::CorruptWrite => f.write_str("corrupt write"),
            FileSystemError::Medium(e) => write!(f, "storage medium failed: {e}"),
        }
    }
}

impl std::error::Error for FileSystemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileSystemError::Medium(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<MediumError> for FileSystemError {
    fn from(e: MediumError) -> Self {
        FileSystemError::Medium(e)
    }
}
