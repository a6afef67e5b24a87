// This file is part of devattach, an application to attach FPGA peripherals through device-tree overlays and expose them to userspace.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// devattach is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// devattach is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Named blob retrieval.
//!
//! [`FirmwareDir`] reads from the configured firmware directory the way the kernel firmware
//! loader would; [`MemoryFirmware`] keeps blobs in memory for simulation and tests. Every
//! [`Firmware`] handed out is counted until it is dropped.

use crate::accounting::{Counter, CounterGuard};
use crate::error::AttachError;
use crate::system_io::fs_read_bytes;
use log::{debug, trace};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A fetched blob. Releasing it is dropping it.
pub struct Firmware {
    name: String,
    data: Vec<u8>,
    _guard: CounterGuard,
}

impl Firmware {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Firmware")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

pub trait BlobFetcher: Send + Sync {
    /// Retrieve the blob called `name`.
    ///
    /// # Returns: `Result<Firmware, AttachError>`
    /// * `Ok(Firmware)` - The blob, possibly empty
    /// * `Err(AttachError::NotFound)` - No blob of that name exists
    fn fetch(&self, name: &str) -> Result<Firmware, AttachError>;

    /// Number of fetched blobs not yet released.
    fn outstanding(&self) -> usize;
}

fn check_name(name: &str) -> Result<(), AttachError> {
    if name.is_empty() || name.contains('/') || name.contains("..") {
        return Err(AttachError::Argument(format!(
            "Firmware name {name:?} must be a plain file name"
        )));
    }
    Ok(())
}

/// Blobs stored as files in one directory.
pub struct FirmwareDir {
    dir: PathBuf,
    counter: Counter,
}

impl FirmwareDir {
    pub fn new(dir: &Path) -> Self {
        FirmwareDir {
            dir: dir.to_path_buf(),
            counter: Counter::new(),
        }
    }
}

impl BlobFetcher for FirmwareDir {
    fn fetch(&self, name: &str) -> Result<Firmware, AttachError> {
        check_name(name)?;
        let path = self.dir.join(name);
        trace!("Fetching firmware from {path:?}");
        let data = fs_read_bytes(&path)?;
        debug!("Fetched {name} ({} bytes)", data.len());
        Ok(Firmware {
            name: name.to_string(),
            data,
            _guard: self.counter.acquire(),
        })
    }

    fn outstanding(&self) -> usize {
        self.counter.outstanding()
    }
}

/// In-memory blob provider.
#[derive(Default)]
pub struct MemoryFirmware {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    counter: Counter,
}

impl MemoryFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the blob called `name`.
    pub fn insert(&self, name: &str, data: Vec<u8>) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(name.to_string(), data);
        }
    }

    pub fn remove(&self, name: &str) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.remove(name);
        }
    }
}

impl BlobFetcher for MemoryFirmware {
    fn fetch(&self, name: &str) -> Result<Firmware, AttachError> {
        check_name(name)?;
        let data = self
            .blobs
            .lock()
            .map_err(|e| AttachError::Internal(format!("Firmware store lock poisoned: {e}")))?
            .get(name)
            .cloned()
            .ok_or_else(|| AttachError::NotFound(format!("Firmware {name} is not available")))?;
        debug!("Fetched {name} ({} bytes) from memory", data.len());
        Ok(Firmware {
            name: name.to_string(),
            data,
            _guard: self.counter.acquire(),
        })
    }

    fn outstanding(&self) -> usize {
        self.counter.outstanding()
    }
}
