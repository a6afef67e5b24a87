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

//! Hardware access layer.
//!
//! The attacher and the peripheral drivers never touch memory directly. They go through a
//! [`Hardware`] bundle which owns:
//! - a [`RegisterBus`](registers::RegisterBus) performing 32-bit (and 16-bit) accesses at
//!   physical addresses, backed either by `/dev/mem` or by an in-memory simulation,
//! - a [`RegionTable`](regions::RegionTable) granting exclusive reservations of physical
//!   ranges,
//! - an [`IrqController`](irq::IrqController) dispatching interrupt lines to registered
//!   top-half handlers.
//!
//! Mapped windows ([`IoMem`]) are handed out by [`Hardware::ioremap`] and counted, so that
//! tests and status queries can verify that every mapping was released.

pub mod irq;
pub mod regions;
pub mod registers;
pub mod uio;

use crate::accounting::Counter;
use crate::error::AttachError;
use irq::IrqController;
use log::trace;
use regions::RegionTable;
use registers::{IoMem, RegisterBus};
use std::sync::Arc;

#[derive(Clone)]
pub struct Hardware {
    pub registers: Arc<dyn RegisterBus>,
    pub regions: Arc<RegionTable>,
    pub irqs: Arc<IrqController>,
    mappings: Counter,
}

impl Hardware {
    pub fn new(registers: Arc<dyn RegisterBus>) -> Self {
        Hardware {
            registers,
            regions: Arc::new(RegionTable::default()),
            irqs: Arc::new(IrqController::default()),
            mappings: Counter::new(),
        }
    }

    /// Map `len` bytes of physical address space starting at `start`.
    ///
    /// # Returns: `Result<IoMem, AttachError>`
    /// * `Ok(IoMem)` - The mapped window; unmapped when dropped
    /// * `Err(AttachError::Argument)` - Empty or overflowing range
    pub fn ioremap(&self, start: u64, len: u64) -> Result<IoMem, AttachError> {
        if len == 0 || start.checked_add(len).is_none() {
            return Err(AttachError::Argument(format!(
                "Cannot map {len} bytes at {start:#x}"
            )));
        }
        trace!("Mapping {len} bytes at {start:#x}");
        Ok(IoMem::new(
            start,
            len,
            self.registers.clone(),
            self.mappings.acquire(),
        ))
    }

    /// Number of windows currently mapped.
    pub fn mapped_windows(&self) -> usize {
        self.mappings.outstanding()
    }
}
