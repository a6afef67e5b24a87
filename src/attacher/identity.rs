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

//! The identity register and its interrupt top half.

use crate::attacher::work_queue::WorkQueueHandle;
use crate::error::AttachError;
use crate::hw::irq::{IrqHandler, IrqReturn};
use crate::hw::registers::IoMem;
use log::{error, trace};
use std::fmt;
use std::sync::Arc;

/// Bytes mapped for the identity register.
pub const ID_REG_WINDOW: u64 = 4;
const ID_REG_VALUE: u64 = 0;
/// Longest fragment name the firmware lookup accepts.
pub const MAX_FRAGMENT_NAME: usize = 20;

#[derive(Debug)]
pub struct IdentityRegister {
    window: IoMem,
}

impl IdentityRegister {
    pub fn new(window: IoMem) -> Self {
        IdentityRegister { window }
    }

    pub fn read(&self) -> Result<u32, AttachError> {
        self.window.read32(ID_REG_VALUE)
    }

    /// Clear the pending interrupt.
    ///
    /// The register drops its pending flag when its current value is written back to it.
    pub fn acknowledge(&self) -> Result<u32, AttachError> {
        let value = self.read()?;
        self.window.write32(ID_REG_VALUE, value)?;
        Ok(value)
    }

    pub fn base(&self) -> u64 {
        self.window.base()
    }
}

/// Name of the fragment describing the peripheral with `identity`.
pub fn fragment_name(identity: u32) -> String {
    let mut name = format!("dev_{identity}.dtbo");
    name.truncate(MAX_FRAGMENT_NAME);
    name
}

/// Peripheral kinds known by identity; informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralKind {
    Pwm,
    Random,
    Switch,
    Timer,
}

impl PeripheralKind {
    pub fn from_identity(identity: u32) -> Option<Self> {
        match identity {
            1 => Some(PeripheralKind::Pwm),
            2 => Some(PeripheralKind::Random),
            3 => Some(PeripheralKind::Switch),
            4 => Some(PeripheralKind::Timer),
            _ => None,
        }
    }
}

impl fmt::Display for PeripheralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeripheralKind::Pwm => "PWM",
            PeripheralKind::Random => "random number generator",
            PeripheralKind::Switch => "switch",
            PeripheralKind::Timer => "timer",
        };
        write!(f, "{name}")
    }
}

/// Top half of the identity interrupt: acknowledge, then defer to the load worker.
pub struct IdentityIrqHandler {
    register: Arc<IdentityRegister>,
    queue: WorkQueueHandle,
}

impl IdentityIrqHandler {
    pub fn new(register: Arc<IdentityRegister>, queue: WorkQueueHandle) -> Self {
        IdentityIrqHandler { register, queue }
    }
}

impl IrqHandler for IdentityIrqHandler {
    fn handle(&self, line: u32) -> IrqReturn {
        match self.register.acknowledge() {
            Ok(value) => trace!("Identity interrupt on line {line}, register reads {value}"),
            Err(e) => error!("Cannot acknowledge identity interrupt: {e}"),
        }
        self.queue.queue();
        IrqReturn::Handled
    }
}
