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

//! User-facing endpoints.
//!
//! An [`InterfaceGroup`] publishes 1 to 8 endpoints sharing one dynamically allocated major
//! number; endpoint `i` has minor `i`. Opening an endpoint pins the driver module and
//! stashes the device's resource record in the [`OpenFile`], so reads and writes reach the
//! mapped window without looking the device up again.

use crate::drivers::module::{DriverModule, ModuleRef};
use crate::drivers::resources::DeviceResources;
use crate::error::AttachError;
use crate::hw::registers::IoMem;
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub const MAX_ENDPOINTS: usize = 8;
// Dynamic major numbers are handed out from the top of this range down.
const DYNAMIC_MAJOR_HIGH: u32 = 254;
const DYNAMIC_MAJOR_LOW: u32 = 234;

/// Operation table of one peripheral kind.
pub trait FileOperations: Send + Sync {
    fn open(&self, _ctx: &FileContext) -> Result<(), AttachError> {
        Ok(())
    }

    fn release(&self, _ctx: &FileContext) {}

    /// Read into `buf` starting at `*pos`, advancing `*pos` by what was read.
    fn read(&self, ctx: &FileContext, buf: &mut [u8], pos: &mut u64)
    -> Result<usize, AttachError>;

    /// Write `data` at `*pos`. Returns how many bytes were consumed.
    fn write(&self, ctx: &FileContext, data: &[u8], pos: &mut u64) -> Result<usize, AttachError>;
}

/// What an open endpoint knows about itself.
pub struct FileContext {
    name: String,
    major: u32,
    minor: u32,
    resources: Arc<DeviceResources>,
}

impl FileContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn resources(&self) -> &Arc<DeviceResources> {
        &self.resources
    }

    /// Run `f` against the mapped window, holding off its release until `f` returns.
    ///
    /// # Returns: `Result<R, AttachError>`
    /// * `Ok(R)` - What `f` returned
    /// * `Err(AttachError::NoDevice)` - The window was released
    pub fn with_window<R>(
        &self,
        f: impl FnOnce(&IoMem) -> Result<R, AttachError>,
    ) -> Result<R, AttachError> {
        self.resources.with_window(f)
    }

    pub fn base_address(&self) -> Result<u64, AttachError> {
        self.with_window(|io| Ok(io.base()))
    }
}

struct Endpoint {
    major: u32,
    minor: u32,
    ops: Arc<dyn FileOperations>,
    resources: Weak<DeviceResources>,
    module: Arc<DriverModule>,
}

/// Public description of a published endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub name: String,
    pub major: u32,
    pub minor: u32,
}

#[derive(Default)]
struct RegistryState {
    endpoints: BTreeMap<String, Endpoint>,
    majors: BTreeSet<u32>,
}

#[derive(Default)]
pub struct EndpointRegistry {
    state: Mutex<RegistryState>,
}

fn endpoint_names(name: &str, count: usize) -> Vec<String> {
    match count {
        1 => vec![name.to_string()],
        _ => (0..count).map(|i| format!("{name}{i}")).collect(),
    }
}

impl EndpointRegistry {
    fn state(&self) -> Result<MutexGuard<'_, RegistryState>, AttachError> {
        self.state
            .lock()
            .map_err(|e| AttachError::Internal(format!("Endpoint registry poisoned: {e}")))
    }

    /// Publish `count` endpoints named after `name`, dispatching to `ops`.
    ///
    /// # Returns: `Result<InterfaceGroup, AttachError>`
    /// * `Ok(InterfaceGroup)` - Endpoints are live until the group is removed or dropped
    /// * `Err(AttachError::Argument)` - `count` is not in 1..=8
    /// * `Err(AttachError::Busy)` - No free major number, or a name is already taken
    pub fn create_interface(
        self: &Arc<Self>,
        name: &str,
        count: usize,
        ops: Arc<dyn FileOperations>,
        resources: &Arc<DeviceResources>,
        module: &Arc<DriverModule>,
    ) -> Result<InterfaceGroup, AttachError> {
        if !(1..=MAX_ENDPOINTS).contains(&count) {
            return Err(AttachError::Argument(format!(
                "{name} asks for {count} endpoints, expected 1 to {MAX_ENDPOINTS}"
            )));
        }
        let names = endpoint_names(name, count);
        let mut state = self.state()?;
        let major = (DYNAMIC_MAJOR_LOW..=DYNAMIC_MAJOR_HIGH)
            .rev()
            .find(|major| !state.majors.contains(major))
            .ok_or_else(|| AttachError::Busy(format!("No free major number for {name}")))?;
        if let Some(taken) = names.iter().find(|n| state.endpoints.contains_key(*n)) {
            return Err(AttachError::Busy(format!("Endpoint {taken} already exists")));
        }

        state.majors.insert(major);
        for (minor, endpoint) in names.iter().enumerate() {
            state.endpoints.insert(
                endpoint.clone(),
                Endpoint {
                    major,
                    minor: minor as u32,
                    ops: ops.clone(),
                    resources: Arc::downgrade(resources),
                    module: module.clone(),
                },
            );
        }
        debug!("Created {count} endpoint(s) for {name} with major {major}");
        Ok(InterfaceGroup {
            registry: self.clone(),
            major,
            names,
        })
    }

    fn remove_endpoints(&self, major: u32, names: &[String]) {
        if let Ok(mut state) = self.state() {
            for name in names {
                state.endpoints.remove(name);
            }
            state.majors.remove(&major);
            debug!("Removed endpoints {names:?} (major {major})");
        }
    }

    /// Open the endpoint called `name`.
    ///
    /// # Returns: `Result<OpenFile, AttachError>`
    /// * `Ok(OpenFile)` - Positioned at 0; pins the driver module until dropped
    /// * `Err(AttachError::NotFound)` - No such endpoint
    /// * `Err(AttachError::NoDevice)` - The device or its module went away
    pub fn open(&self, name: &str) -> Result<OpenFile, AttachError> {
        let (ctx, ops, module) = {
            let state = self.state()?;
            let endpoint = state
                .endpoints
                .get(name)
                .ok_or_else(|| AttachError::NotFound(format!("No endpoint named {name}")))?;
            let resources = endpoint
                .resources
                .upgrade()
                .ok_or_else(|| AttachError::NoDevice(format!("{name} has no device")))?;
            (
                FileContext {
                    name: name.to_string(),
                    major: endpoint.major,
                    minor: endpoint.minor,
                    resources,
                },
                endpoint.ops.clone(),
                endpoint.module.clone(),
            )
        };
        let module_ref = module.try_get()?;
        ops.open(&ctx)?;
        trace!("Opened {name} ({}:{})", ctx.major, ctx.minor);
        Ok(OpenFile {
            ctx,
            pos: 0,
            ops,
            _module: module_ref,
        })
    }

    pub fn endpoints(&self) -> Vec<EndpointInfo> {
        self.state()
            .map(|state| {
                state
                    .endpoints
                    .iter()
                    .map(|(name, e)| EndpointInfo {
                        name: name.clone(),
                        major: e.major,
                        minor: e.minor,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of published endpoints.
    pub fn live_endpoints(&self) -> usize {
        self.state().map(|s| s.endpoints.len()).unwrap_or(0)
    }
}

/// Endpoints published together; removed together.
pub struct InterfaceGroup {
    registry: Arc<EndpointRegistry>,
    major: u32,
    names: Vec<String>,
}

impl InterfaceGroup {
    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Remove every endpoint of the group. Dropping the group does the same.
    pub fn remove_interface(self) {
        drop(self);
    }
}

impl Drop for InterfaceGroup {
    fn drop(&mut self) {
        self.registry.remove_endpoints(self.major, &self.names);
    }
}

/// An open endpoint with its file position.
pub struct OpenFile {
    ctx: FileContext,
    pos: u64,
    ops: Arc<dyn FileOperations>,
    _module: ModuleRef,
}

impl OpenFile {
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, AttachError> {
        self.ops.read(&self.ctx, buf, &mut self.pos)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, AttachError> {
        self.ops.write(&self.ctx, data, &mut self.pos)
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn context(&self) -> &FileContext {
        &self.ctx
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.ops.release(&self.ctx);
        trace!("Closed {}", self.ctx.name);
    }
}
