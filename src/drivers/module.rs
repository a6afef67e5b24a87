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

//! Driver module reference counting.
//!
//! Every open endpoint pins the module that registered it. Unloading a module fails while
//! any endpoint is still open, instead of tearing the drivers down under open files.

use crate::drivers::bus::PlatformBus;
use crate::error::AttachError;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct ModuleState {
    refs: usize,
    unloaded: bool,
}

#[derive(Debug)]
pub struct DriverModule {
    name: String,
    state: Mutex<ModuleState>,
}

/// One reference on a [`DriverModule`]; returned on drop.
#[derive(Debug)]
pub struct ModuleRef {
    module: Arc<DriverModule>,
}

impl Drop for ModuleRef {
    fn drop(&mut self) {
        self.module.put();
    }
}

impl DriverModule {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(DriverModule {
            name: name.to_string(),
            state: Mutex::new(ModuleState::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> Result<MutexGuard<'_, ModuleState>, AttachError> {
        self.state
            .lock()
            .map_err(|e| AttachError::Internal(format!("Module {} poisoned: {e}", self.name)))
    }

    /// Take a reference.
    ///
    /// # Returns: `Result<ModuleRef, AttachError>`
    /// * `Ok(ModuleRef)` - The module stays loaded while it lives
    /// * `Err(AttachError::NoDevice)` - The module is unloaded
    pub fn try_get(self: &Arc<Self>) -> Result<ModuleRef, AttachError> {
        let mut state = self.state()?;
        if state.unloaded {
            return Err(AttachError::NoDevice(format!(
                "Module {} is unloaded",
                self.name
            )));
        }
        state.refs += 1;
        Ok(ModuleRef {
            module: self.clone(),
        })
    }

    fn put(&self) {
        if let Ok(mut state) = self.state() {
            state.refs = state.refs.saturating_sub(1);
        }
    }

    /// Number of references currently held.
    pub fn open_handles(&self) -> usize {
        self.state().map(|s| s.refs).unwrap_or(0)
    }

    pub fn is_loaded(&self) -> bool {
        self.state().map(|s| !s.unloaded).unwrap_or(false)
    }

    /// Unregister every driver of this module from `bus`, unbinding their devices.
    ///
    /// # Returns: `Result<(), AttachError>`
    /// * `Ok(())` - Unloaded, or already unloaded
    /// * `Err(AttachError::Busy)` - An endpoint of the module is still open
    pub fn unload(&self, bus: &PlatformBus) -> Result<(), AttachError> {
        {
            let mut state = self.state()?;
            if state.unloaded {
                debug!("Module {} is already unloaded", self.name);
                return Ok(());
            }
            if state.refs > 0 {
                return Err(AttachError::Busy(format!(
                    "Module {} has {} open handle(s)",
                    self.name, state.refs
                )));
            }
            state.unloaded = true;
        }
        info!("Unloading {}", self.name);
        bus.unregister_module(&self.name)
    }
}
