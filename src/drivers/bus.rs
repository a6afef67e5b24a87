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

//! The platform bus: matches device nodes to drivers by compatible string.
//!
//! Nodes reach the bus from the overlay engine ([`TreeObserver`]). A node whose compatible
//! string exactly matches a registered driver is probed; a failed probe is logged and the
//! node stays unbound. Removal happens when the node's overlay is reverted or when the
//! driver's module is unloaded, in reverse probe order.

use crate::devicetree::engine::TreeObserver;
use crate::devicetree::live_tree::NodeInfo;
use crate::drivers::interface::EndpointRegistry;
use crate::drivers::module::DriverModule;
use crate::drivers::resources::DeviceResources;
use crate::error::AttachError;
use crate::hw::Hardware;
use crate::overlay::engine::OverlayId;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};

pub trait PlatformDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Claim whatever the device needs. On error nothing may remain claimed.
    fn probe(&self, device: &Arc<PlatformDevice>) -> Result<(), AttachError>;

    fn remove(&self, device: &Arc<PlatformDevice>) -> Result<(), AttachError>;
}

/// A device node bound to a driver.
pub struct PlatformDevice {
    info: NodeInfo,
    hw: Hardware,
    endpoints: Arc<EndpointRegistry>,
    module: Arc<DriverModule>,
    drvdata: Mutex<Option<Arc<DeviceResources>>>,
}

impl PlatformDevice {
    pub fn new(
        info: NodeInfo,
        hw: Hardware,
        endpoints: Arc<EndpointRegistry>,
        module: Arc<DriverModule>,
    ) -> Self {
        PlatformDevice {
            info,
            hw,
            endpoints,
            module,
            drvdata: Mutex::new(None),
        }
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    /// Name under which the device reserves its resources.
    pub fn owner_name(&self) -> &str {
        &self.info.node.name
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hw
    }

    pub fn endpoints(&self) -> &Arc<EndpointRegistry> {
        &self.endpoints
    }

    pub fn module(&self) -> &Arc<DriverModule> {
        &self.module
    }

    pub fn drvdata(&self) -> Option<Arc<DeviceResources>> {
        self.drvdata.lock().ok()?.clone()
    }

    pub fn set_drvdata(&self, record: Arc<DeviceResources>) {
        if let Ok(mut slot) = self.drvdata.lock() {
            *slot = Some(record);
        }
    }

    pub fn take_drvdata(&self) -> Option<Arc<DeviceResources>> {
        self.drvdata.lock().ok()?.take()
    }
}

struct DriverEntry {
    module: Arc<DriverModule>,
    compatible: String,
    driver: Arc<dyn PlatformDriver>,
}

struct Binding {
    driver: Arc<dyn PlatformDriver>,
    module: String,
    device: Arc<PlatformDevice>,
}

struct DeviceEntry {
    overlay: OverlayId,
    info: NodeInfo,
    binding: Option<Binding>,
}

#[derive(Default)]
struct BusState {
    drivers: Vec<DriverEntry>,
    devices: Vec<DeviceEntry>,
}

/// A bound device, as reported by [`PlatformBus::bound_devices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundDevice {
    pub path: String,
    pub driver: &'static str,
    pub module: String,
}

pub struct PlatformBus {
    hw: Hardware,
    endpoints: Arc<EndpointRegistry>,
    state: Mutex<BusState>,
}

impl PlatformBus {
    pub fn new(hw: Hardware, endpoints: Arc<EndpointRegistry>) -> Self {
        PlatformBus {
            hw,
            endpoints,
            state: Mutex::new(BusState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, BusState>, AttachError> {
        self.state
            .lock()
            .map_err(|e| AttachError::Internal(format!("Platform bus poisoned: {e}")))
    }

    pub fn endpoints(&self) -> &Arc<EndpointRegistry> {
        &self.endpoints
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hw
    }

    fn bind(&self, entry: &mut DeviceEntry, driver: &DriverEntry) {
        let device = Arc::new(PlatformDevice::new(
            entry.info.clone(),
            self.hw.clone(),
            self.endpoints.clone(),
            driver.module.clone(),
        ));
        debug!("Probing {} with {}", entry.info.path, driver.driver.name());
        match driver.driver.probe(&device) {
            Ok(()) => {
                info!("{} bound to {}", entry.info.path, driver.driver.name());
                entry.binding = Some(Binding {
                    driver: driver.driver.clone(),
                    module: driver.module.name().to_string(),
                    device,
                });
            }
            Err(e) => error!(
                "{} failed to probe {}: {e}",
                driver.driver.name(),
                entry.info.path
            ),
        }
    }

    fn unbind(entry: &mut DeviceEntry) {
        if let Some(binding) = entry.binding.take() {
            debug!("Removing {} from {}", entry.info.path, binding.driver.name());
            if let Err(e) = binding.driver.remove(&binding.device) {
                warn!(
                    "{} failed to remove {}: {e}",
                    binding.driver.name(),
                    entry.info.path
                );
            }
        }
    }

    /// Register `driver` for nodes compatible with `compatible` on behalf of `module`, and
    /// probe every unbound node that already matches.
    pub fn register_driver(
        &self,
        module: &Arc<DriverModule>,
        compatible: &str,
        driver: Arc<dyn PlatformDriver>,
    ) -> Result<(), AttachError> {
        if !module.is_loaded() {
            return Err(AttachError::NoDevice(format!(
                "Module {} is unloaded",
                module.name()
            )));
        }
        let mut state = self.state()?;
        if state.drivers.iter().any(|d| d.compatible == compatible) {
            return Err(AttachError::Busy(format!(
                "A driver for {compatible} is already registered"
            )));
        }
        let entry = DriverEntry {
            module: module.clone(),
            compatible: compatible.to_string(),
            driver,
        };
        info!("Registered {} for {compatible}", entry.driver.name());
        let BusState { drivers, devices } = &mut *state;
        for device in devices
            .iter_mut()
            .filter(|d| d.binding.is_none() && d.info.node.is_compatible(compatible))
        {
            self.bind(device, &entry);
        }
        drivers.push(entry);
        Ok(())
    }

    /// Unbind every device bound by `module` and forget its drivers.
    pub fn unregister_module(&self, module: &str) -> Result<(), AttachError> {
        let mut state = self.state()?;
        for entry in state
            .devices
            .iter_mut()
            .rev()
            .filter(|d| d.binding.as_ref().is_some_and(|b| b.module == module))
        {
            Self::unbind(entry);
        }
        state.drivers.retain(|d| d.module.name() != module);
        debug!("Drivers of {module} unregistered");
        Ok(())
    }

    pub fn bound_devices(&self) -> Vec<BoundDevice> {
        self.state()
            .map(|state| {
                state
                    .devices
                    .iter()
                    .filter_map(|d| {
                        d.binding.as_ref().map(|b| BoundDevice {
                            path: d.info.path.clone(),
                            driver: b.driver.name(),
                            module: b.module.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of known device nodes, bound or not.
    pub fn devices(&self) -> usize {
        self.state().map(|s| s.devices.len()).unwrap_or(0)
    }
}

impl TreeObserver for PlatformBus {
    fn nodes_added(&self, overlay: OverlayId, nodes: Vec<NodeInfo>) {
        let mut state = match self.state() {
            Ok(state) => state,
            Err(e) => {
                error!("Cannot populate {overlay}: {e}");
                return;
            }
        };
        let BusState { drivers, devices } = &mut *state;
        for info in nodes {
            let mut entry = DeviceEntry {
                overlay,
                info,
                binding: None,
            };
            match drivers
                .iter()
                .find(|d| entry.info.node.is_compatible(&d.compatible))
            {
                Some(driver) => self.bind(&mut entry, driver),
                None => debug!("No driver for {}", entry.info.path),
            }
            devices.push(entry);
        }
    }

    fn nodes_removing(&self, overlay: OverlayId) {
        let mut state = match self.state() {
            Ok(state) => state,
            Err(e) => {
                error!("Cannot depopulate {overlay}: {e}");
                return;
            }
        };
        for entry in state
            .devices
            .iter_mut()
            .rev()
            .filter(|d| d.overlay == overlay)
        {
            Self::unbind(entry);
        }
        state.devices.retain(|d| d.overlay != overlay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devicetree::node::DeviceNode;
    use crate::hw::registers::SimulatedBus;
    use googletest::prelude::*;

    #[derive(Default)]
    struct Recording {
        fail: bool,
        events: Mutex<Vec<String>>,
    }

    impl PlatformDriver for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn probe(&self, device: &Arc<PlatformDevice>) -> std::result::Result<(), AttachError> {
            if self.fail {
                return Err(AttachError::Busy("refused".into()));
            }
            self.events
                .lock()
                .unwrap()
                .push(format!("probe {}", device.info().path));
            Ok(())
        }

        fn remove(&self, device: &Arc<PlatformDevice>) -> std::result::Result<(), AttachError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("remove {}", device.info().path));
            Ok(())
        }
    }

    fn node(path: &str, compatible: &str) -> NodeInfo {
        let name = path.rsplit('/').next().unwrap_or_default();
        NodeInfo {
            path: path.into(),
            node: DeviceNode::new(name).with_str("compatible", compatible),
            reg: None,
            irq: None,
        }
    }

    fn bus() -> PlatformBus {
        PlatformBus::new(
            Hardware::new(Arc::new(SimulatedBus::new())),
            Arc::new(EndpointRegistry::default()),
        )
    }

    #[gtest]
    fn probes_on_add_and_removes_in_reverse() {
        let bus = bus();
        let module = DriverModule::new("device_drivers");
        let driver = Arc::new(Recording::default());
        bus.register_driver(&module, "xlnx,my-axi-sw-1.0", driver.clone())
            .expect("register failed");

        bus.nodes_added(
            OverlayId(3),
            vec![
                node("/amba/gpio@41200000", "xlnx,my-axi-sw-1.0"),
                node("/amba/other@1000", "vendor,unknown"),
                node("/amba/gpio@41210000", "xlnx,my-axi-sw-1.0"),
            ],
        );
        expect_that!(bus.devices(), eq(3));
        expect_that!(bus.bound_devices().len(), eq(2));

        bus.nodes_removing(OverlayId(3));
        expect_that!(bus.devices(), eq(0));
        let events = driver.events.lock().unwrap().clone();
        expect_that!(
            events,
            elements_are![
                eq("probe /amba/gpio@41200000"),
                eq("probe /amba/gpio@41210000"),
                eq("remove /amba/gpio@41210000"),
                eq("remove /amba/gpio@41200000"),
            ]
        );
    }

    #[gtest]
    fn late_registration_probes_existing_nodes() {
        let bus = bus();
        let module = DriverModule::new("device_drivers");
        bus.nodes_added(
            OverlayId(1),
            vec![node("/amba/gpio@41200000", "xlnx,my-axi-sw-1.0")],
        );
        expect_that!(bus.bound_devices(), is_empty());

        let driver = Arc::new(Recording::default());
        bus.register_driver(&module, "xlnx,my-axi-sw-1.0", driver.clone())
            .expect("register failed");
        expect_that!(
            bus.bound_devices(),
            elements_are![eq(&BoundDevice {
                path: "/amba/gpio@41200000".into(),
                driver: "recording",
                module: "device_drivers".into(),
            })]
        );
    }

    #[gtest]
    fn failed_probe_leaves_device_unbound() {
        let bus = bus();
        let module = DriverModule::new("device_drivers");
        let driver = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        bus.register_driver(&module, "xlnx,my-axi-sw-1.0", driver.clone())
            .expect("register failed");
        bus.nodes_added(
            OverlayId(1),
            vec![node("/amba/gpio@41200000", "xlnx,my-axi-sw-1.0")],
        );
        expect_that!(bus.devices(), eq(1));
        expect_that!(bus.bound_devices(), is_empty());
        bus.nodes_removing(OverlayId(1));
        expect_that!(driver.events.lock().unwrap().clone(), is_empty());
    }

    #[gtest]
    fn unloading_module_unbinds_its_devices() {
        let bus = bus();
        let module = DriverModule::new("device_drivers");
        let driver = Arc::new(Recording::default());
        bus.register_driver(&module, "xlnx,my-axi-sw-1.0", driver.clone())
            .expect("register failed");
        bus.nodes_added(
            OverlayId(1),
            vec![node("/amba/gpio@41200000", "xlnx,my-axi-sw-1.0")],
        );

        module.unload(&bus).expect("unload failed");
        expect_that!(bus.bound_devices(), is_empty());
        expect_that!(bus.devices(), eq(1));
        assert_that!(
            bus.register_driver(&module, "xlnx,my-axi-sw-1.0", driver),
            err(displays_as(contains_substring("AttachError::NoDevice")))
        );
    }

    #[gtest]
    fn duplicate_compatible_is_busy() {
        let bus = bus();
        let module = DriverModule::new("device_drivers");
        bus.register_driver(&module, "xlnx,my-axi-sw-1.0", Arc::new(Recording::default()))
            .expect("register failed");
        assert_that!(
            bus.register_driver(&module, "xlnx,my-axi-sw-1.0", Arc::new(Recording::default())),
            err(displays_as(contains_substring("AttachError::Busy")))
        );
    }
}
