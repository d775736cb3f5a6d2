// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resource lookup across one or more root directories, first match wins.
//! Test stations keep site-specific overrides in an earlier root and the
//! released firmware bundle in a later one.

use std::path::{Path, PathBuf};

use crate::ImageError;

#[derive(Debug, Clone)]
pub struct Bundle {
    roots: Vec<PathBuf>,
}

impl Bundle {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn resource(&self, relative: impl AsRef<Path>) -> Result<PathBuf, ImageError> {
        let relative = relative.as_ref();
        for root in &self.roots {
            let path = root.join(relative);
            if path.is_file() {
                return Ok(path);
            }
        }
        Err(ImageError::ResourceNotFound(
            relative.display().to_string(),
        ))
    }
}
