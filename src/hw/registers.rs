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

//! Register access primitives.
//!
//! [`RegisterBus`] is the single seam through which every register read or write flows.
//! [`DevMemBus`] talks to real hardware through `/dev/mem`, [`SimulatedBus`] keeps register
//! contents in memory and records every write, which is what the test suites and the
//! simulated daemon mode use.

use crate::accounting::CounterGuard;
use crate::error::AttachError;
use log::trace;
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub trait RegisterBus: Send + Sync {
    fn read32(&self, addr: u64) -> Result<u32, AttachError>;

    fn write32(&self, addr: u64, value: u32) -> Result<(), AttachError>;

    /// 16-bit read. The default extracts the half-word from the enclosing 32-bit word
    /// (little-endian bus).
    fn read16(&self, addr: u64) -> Result<u16, AttachError> {
        let word = self.read32(addr & !0x3)?;
        Ok((word >> ((addr & 0x2) * 8)) as u16)
    }
}

fn check_aligned(addr: u64, width: u64) -> Result<(), AttachError> {
    if addr % width != 0 {
        return Err(AttachError::Argument(format!(
            "Unaligned {}-bit access at {addr:#x}",
            width * 8
        )));
    }
    Ok(())
}

/// Physical memory accessed through `/dev/mem` with positional reads and writes.
pub struct DevMemBus {
    path: PathBuf,
    file: File,
}

impl DevMemBus {
    pub fn open(path: &Path) -> Result<Self, AttachError> {
        trace!("Opening {path:?} for register access");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| AttachError::IORead {
                file: path.into(),
                e,
            })?;
        Ok(DevMemBus {
            path: path.into(),
            file,
        })
    }
}

impl RegisterBus for DevMemBus {
    fn read32(&self, addr: u64) -> Result<u32, AttachError> {
        check_aligned(addr, 4)?;
        let mut buf = [0u8; 4];
        self.file
            .read_exact_at(&mut buf, addr)
            .map_err(|e| AttachError::IORead {
                file: self.path.clone(),
                e,
            })?;
        Ok(u32::from_ne_bytes(buf))
    }

    fn write32(&self, addr: u64, value: u32) -> Result<(), AttachError> {
        check_aligned(addr, 4)?;
        self.file
            .write_all_at(&value.to_ne_bytes(), addr)
            .map_err(|e| AttachError::IOWrite {
                file: self.path.clone(),
                e,
            })
    }

    fn read16(&self, addr: u64) -> Result<u16, AttachError> {
        check_aligned(addr, 2)?;
        let mut buf = [0u8; 2];
        self.file
            .read_exact_at(&mut buf, addr)
            .map_err(|e| AttachError::IORead {
                file: self.path.clone(),
                e,
            })?;
        Ok(u16::from_ne_bytes(buf))
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    words: HashMap<u64, u32>,
    writes: Vec<(u64, u32)>,
}

/// In-memory register file. Unwritten registers read as zero.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    state: Mutex<SimulatedState>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, SimulatedState>, AttachError> {
        self.state
            .lock()
            .map_err(|e| AttachError::Internal(format!("Simulated register file poisoned: {e}")))
    }

    /// Set a register as the hardware would, without recording a bus write.
    pub fn poke(&self, addr: u64, value: u32) {
        if let Ok(mut state) = self.state() {
            state.words.insert(addr, value);
        }
    }

    pub fn peek(&self, addr: u64) -> u32 {
        self.state()
            .map(|state| state.words.get(&addr).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Every write issued over the bus, in order.
    pub fn writes(&self) -> Vec<(u64, u32)> {
        self.state()
            .map(|state| state.writes.clone())
            .unwrap_or_default()
    }
}

impl RegisterBus for SimulatedBus {
    fn read32(&self, addr: u64) -> Result<u32, AttachError> {
        check_aligned(addr, 4)?;
        let value = self.state()?.words.get(&addr).copied().unwrap_or(0);
        trace!("sim read32 {addr:#x} -> {value:#x}");
        Ok(value)
    }

    fn write32(&self, addr: u64, value: u32) -> Result<(), AttachError> {
        check_aligned(addr, 4)?;
        trace!("sim write32 {addr:#x} <- {value:#x}");
        let mut state = self.state()?;
        state.words.insert(addr, value);
        state.writes.push((addr, value));
        Ok(())
    }
}

/// A mapped window of register space. Offsets are relative to the window base and every
/// access is bounds-checked against the mapped length.
pub struct IoMem {
    base: u64,
    len: u64,
    bus: Arc<dyn RegisterBus>,
    _mapping: CounterGuard,
}

impl IoMem {
    pub(crate) fn new(
        base: u64,
        len: u64,
        bus: Arc<dyn RegisterBus>,
        mapping: CounterGuard,
    ) -> Self {
        IoMem {
            base,
            len,
            bus,
            _mapping: mapping,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    fn address(&self, offset: u64, width: u64) -> Result<u64, AttachError> {
        match offset.checked_add(width) {
            Some(end) if end <= self.len => Ok(self.base + offset),
            _ => Err(AttachError::Argument(format!(
                "Access of {width} bytes at offset {offset:#x} is outside the {}-byte window at {:#x}",
                self.len, self.base
            ))),
        }
    }

    pub fn read32(&self, offset: u64) -> Result<u32, AttachError> {
        self.bus.read32(self.address(offset, 4)?)
    }

    pub fn read16(&self, offset: u64) -> Result<u16, AttachError> {
        self.bus.read16(self.address(offset, 2)?)
    }

    pub fn write32(&self, offset: u64, value: u32) -> Result<(), AttachError> {
        self.bus.write32(self.address(offset, 4)?, value)
    }
}

impl fmt::Debug for IoMem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoMem")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.len)
            .finish()
    }
}
