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

//! Interrupt lines and top-half dispatch.
//!
//! A line is owned by at most one registered handler. [`IrqController::raise`] runs the
//! handler on the calling thread, which therefore stands in for interrupt context: handlers
//! must not block and should defer any real work to a queue.

use crate::error::AttachError;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    Handled,
    NotHandled,
}

pub trait IrqHandler: Send + Sync {
    fn handle(&self, line: u32) -> IrqReturn;
}

struct IrqAction {
    name: String,
    handler: Arc<dyn IrqHandler>,
}

#[derive(Default)]
pub struct IrqController {
    lines: Mutex<HashMap<u32, IrqAction>>,
}

impl IrqController {
    /// Attach `handler` to `line`.
    ///
    /// # Returns: `Result<IrqRegistration, AttachError>`
    /// * `Ok(IrqRegistration)` - The line is claimed until the registration is dropped
    /// * `Err(AttachError::Busy)` - Another handler owns the line
    /// * `Err(AttachError::Argument)` - Line 0, which never denotes a valid interrupt
    pub fn request(
        self: &Arc<Self>,
        line: u32,
        name: &str,
        handler: Arc<dyn IrqHandler>,
    ) -> Result<IrqRegistration, AttachError> {
        if line == 0 {
            return Err(AttachError::Argument(format!(
                "{name} requested interrupt line 0"
            )));
        }
        let mut lines = self
            .lines
            .lock()
            .map_err(|e| AttachError::Internal(format!("Interrupt table poisoned: {e}")))?;
        if let Some(action) = lines.get(&line) {
            return Err(AttachError::Busy(format!(
                "Interrupt line {line} requested by {name} is owned by {}",
                action.name
            )));
        }
        debug!("{name} claimed interrupt line {line}");
        lines.insert(
            line,
            IrqAction {
                name: name.to_string(),
                handler,
            },
        );
        Ok(IrqRegistration {
            controller: self.clone(),
            line,
        })
    }

    /// Deliver an interrupt on `line`.
    ///
    /// Returns `None` when nothing is registered on the line.
    pub fn raise(&self, line: u32) -> Option<IrqReturn> {
        let handler = {
            let lines = self.lines.lock().ok()?;
            lines.get(&line).map(|action| action.handler.clone())
        };
        match handler {
            Some(handler) => {
                trace!("Dispatching interrupt line {line}");
                Some(handler.handle(line))
            }
            None => {
                debug!("Spurious interrupt on line {line}");
                None
            }
        }
    }

    /// Name of the owner of `line`, if claimed.
    pub fn owner(&self, line: u32) -> Option<String> {
        let lines = self.lines.lock().ok()?;
        lines.get(&line).map(|action| action.name.clone())
    }

    /// Number of lines currently claimed.
    pub fn claimed(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn free(&self, line: u32) {
        match self.lines.lock() {
            Ok(mut lines) => {
                if let Some(action) = lines.remove(&line) {
                    debug!("{} released interrupt line {line}", action.name);
                }
            }
            Err(e) => warn!("Cannot free interrupt line {line}: table poisoned: {e}"),
        }
    }
}

/// A claimed interrupt line. Dropping it detaches the handler.
pub struct IrqRegistration {
    controller: Arc<IrqController>,
    line: u32,
}

impl IrqRegistration {
    pub fn line(&self) -> u32 {
        self.line
    }
}

impl Drop for IrqRegistration {
    fn drop(&mut self) {
        self.controller.free(self.line);
    }
}
