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

//! Per-device resource records.
//!
//! Every probed peripheral owns one [`DeviceResources`]: the reserved physical range, the
//! mapped register window, the resolved interrupt line and the published endpoints. The
//! record is stored as the device's driver data and shared with every open endpoint.

use crate::drivers::bus::PlatformDevice;
use crate::drivers::interface::{FileOperations, InterfaceGroup, MAX_ENDPOINTS};
use crate::error::AttachError;
use crate::hw::regions::{RegionReservation, Resource};
use crate::hw::registers::IoMem;
use log::{debug, info, warn};
use std::any::Any;
use std::sync::{Arc, Mutex, RwLock};

pub const IOREMAP_SIZE: u64 = 64;

type DriverState = Box<dyn Any + Send + Sync>;

// Fields drop in declaration order: endpoints, then the mapping, then the reservation.
pub struct DeviceResources {
    name: String,
    resource: Resource,
    irq: Option<u32>,
    interfaces: Mutex<Option<InterfaceGroup>>,
    window: RwLock<Option<IoMem>>,
    region: Mutex<Option<RegionReservation>>,
    driver_state: Mutex<Option<DriverState>>,
}

impl DeviceResources {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn irq(&self) -> Option<u32> {
        self.irq
    }

    pub fn major(&self) -> Option<u32> {
        self.interfaces.lock().ok()?.as_ref().map(|i| i.major())
    }

    /// Run `f` against the mapped window under the read lock.
    ///
    /// # Returns: `Result<R, AttachError>`
    /// * `Ok(R)` - What `f` returned
    /// * `Err(AttachError::NoDevice)` - The window was already released
    pub fn with_window<R>(
        &self,
        f: impl FnOnce(&IoMem) -> Result<R, AttachError>,
    ) -> Result<R, AttachError> {
        let window = self
            .window
            .read()
            .map_err(|e| AttachError::Internal(format!("{} window poisoned: {e}", self.name)))?;
        match window.as_ref() {
            Some(io) => f(io),
            None => Err(AttachError::NoDevice(format!(
                "{} registers are unmapped",
                self.name
            ))),
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.window.read().map(|w| w.is_some()).unwrap_or(false)
    }

    /// Attach driver-private state (interrupt registrations, queues) to the record.
    pub fn set_driver_state(&self, state: DriverState) {
        if let Ok(mut slot) = self.driver_state.lock() {
            *slot = Some(state);
        }
    }

    pub fn take_driver_state(&self) -> Option<DriverState> {
        self.driver_state.lock().ok()?.take()
    }

    fn release(&self) {
        if let Some(group) = self.interfaces.lock().ok().and_then(|mut i| i.take()) {
            group.remove_interface();
        }
        match self.window.write() {
            Ok(mut window) => {
                window.take();
            }
            Err(e) => warn!("{} window poisoned, leaving it mapped: {e}", self.name),
        }
        if let Ok(mut region) = self.region.lock() {
            region.take();
        }
    }
}

/// Reserve, map and publish everything a peripheral needs.
///
/// # Returns: `Result<Arc<DeviceResources>, AttachError>`
/// * `Ok(Arc<DeviceResources>)` - Stored as the device's driver data as well
/// * `Err(AttachError::Argument)` - `count` is not in 1..=8
/// * `Err(AttachError::NotFound)` - The device has no register window
/// * `Err(AttachError::Busy)` - The range is reserved, or no major number is left
pub fn claim_device_resources(
    device: &PlatformDevice,
    name: &str,
    count: usize,
    ops: Arc<dyn FileOperations>,
) -> Result<Arc<DeviceResources>, AttachError> {
    if !(1..=MAX_ENDPOINTS).contains(&count) {
        return Err(AttachError::Argument(format!(
            "{name} asks for {count} endpoints, expected 1 to {MAX_ENDPOINTS}"
        )));
    }
    let info = device.info();
    let resource = info
        .reg
        .ok_or_else(|| AttachError::NotFound(format!("{} has no register window", info.path)))?;
    let hw = device.hardware();
    let region = hw.regions.request(resource, device.owner_name())?;
    let window = hw.ioremap(resource.start, IOREMAP_SIZE)?;
    debug!("{name}: mapped {resource} at {:#x}", window.base());

    let record = Arc::new(DeviceResources {
        name: name.to_string(),
        resource,
        irq: info.irq,
        interfaces: Mutex::new(None),
        window: RwLock::new(Some(window)),
        region: Mutex::new(Some(region)),
        driver_state: Mutex::new(None),
    });
    let group = device
        .endpoints()
        .create_interface(name, count, ops, &record, device.module())?;
    if let Ok(mut interfaces) = record.interfaces.lock() {
        *interfaces = Some(group);
    }
    device.set_drvdata(record.clone());
    info!("{name}: claimed {resource} for {}", info.path);
    Ok(record)
}

/// Undo [`claim_device_resources`].
///
/// # Returns: `Result<(), AttachError>`
/// * `Ok(())` - Endpoints removed, window unmapped, range released
/// * `Err(AttachError::NoData)` - The device holds no resource record
pub fn release_device_resources(device: &PlatformDevice) -> Result<(), AttachError> {
    let record = device.take_drvdata().ok_or_else(|| {
        AttachError::NoData(format!("{} holds no resources", device.info().path))
    })?;
    record.release();
    info!("{}: released {}", record.name, record.resource);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devicetree::live_tree::NodeInfo;
    use crate::devicetree::node::DeviceNode;
    use crate::drivers::interface::{EndpointRegistry, FileContext};
    use crate::drivers::module::DriverModule;
    use crate::hw::Hardware;
    use crate::hw::registers::SimulatedBus;
    use googletest::prelude::*;
    use rstest::*;

    const BASE: u64 = 0x4120_0000;

    struct Word;

    impl FileOperations for Word {
        fn read(
            &self,
            ctx: &FileContext,
            buf: &mut [u8],
            _pos: &mut u64,
        ) -> std::result::Result<usize, AttachError> {
            let value = ctx.with_window(|io| io.read32(0))?;
            let bytes = value.to_le_bytes();
            let len = buf.len().min(bytes.len());
            buf[..len].copy_from_slice(&bytes[..len]);
            Ok(len)
        }

        fn write(
            &self,
            _ctx: &FileContext,
            data: &[u8],
            _pos: &mut u64,
        ) -> std::result::Result<usize, AttachError> {
            Ok(data.len())
        }
    }

    struct Board {
        bus: Arc<SimulatedBus>,
        hw: Hardware,
        endpoints: Arc<EndpointRegistry>,
        module: Arc<DriverModule>,
    }

    impl Board {
        fn device(&self, reg: Option<Resource>) -> PlatformDevice {
            PlatformDevice::new(
                NodeInfo {
                    path: "/amba/gpio@41200000".into(),
                    node: DeviceNode::new("gpio@41200000"),
                    reg,
                    irq: None,
                },
                self.hw.clone(),
                self.endpoints.clone(),
                self.module.clone(),
            )
        }
    }

    #[fixture]
    fn board() -> Board {
        let bus = Arc::new(SimulatedBus::new());
        Board {
            hw: Hardware::new(bus.clone()),
            bus,
            endpoints: Arc::new(EndpointRegistry::default()),
            module: DriverModule::new("device_drivers"),
        }
    }

    #[gtest]
    #[rstest]
    #[case::single(1, &["sw"])]
    #[case::pair(2, &["sw0", "sw1"])]
    #[case::full(8, &["sw0", "sw1", "sw2", "sw3", "sw4", "sw5", "sw6", "sw7"])]
    fn claim_then_release_leaves_nothing(
        board: Board,
        #[case] count: usize,
        #[case] names: &[&str],
    ) {
        let device = board.device(Some(Resource::new(BASE, 0x10000)));
        let record =
            claim_device_resources(&device, "sw", count, Arc::new(Word)).expect("claim failed");
        let published: Vec<String> = board
            .endpoints
            .endpoints()
            .into_iter()
            .map(|e| e.name)
            .collect();
        let mut expected: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        expected.sort();
        expect_that!(published, eq(&expected));
        expect_that!(record.major(), some(eq(254)));
        expect_that!(board.hw.regions.reserved(), eq(1));
        expect_that!(board.hw.mapped_windows(), eq(1));

        expect_that!(release_device_resources(&device), ok(eq(&())));
        expect_that!(board.endpoints.live_endpoints(), eq(0));
        expect_that!(board.hw.regions.reserved(), eq(0));
        expect_that!(board.hw.mapped_windows(), eq(0));
        expect_that!(device.drvdata().is_none(), eq(true));
    }

    #[gtest]
    #[rstest]
    #[case::none(0)]
    #[case::too_many(9)]
    fn endpoint_count_out_of_range(board: Board, #[case] count: usize) {
        let device = board.device(Some(Resource::new(BASE, 0x10000)));
        assert_that!(
            claim_device_resources(&device, "sw", count, Arc::new(Word)).map(|_| ()),
            err(displays_as(contains_substring("AttachError::Argument")))
        );
        expect_that!(board.hw.regions.reserved(), eq(0));
    }

    #[gtest]
    #[rstest]
    fn missing_window_is_not_found(board: Board) {
        let device = board.device(None);
        assert_that!(
            claim_device_resources(&device, "sw", 1, Arc::new(Word)).map(|_| ()),
            err(displays_as(contains_substring("AttachError::NotFound")))
        );
    }

    #[gtest]
    #[rstest]
    fn second_claim_is_busy_and_unwinds(board: Board) {
        let first = board.device(Some(Resource::new(BASE, 0x10000)));
        let second = board.device(Some(Resource::new(BASE, 0x10000)));
        claim_device_resources(&first, "sw", 1, Arc::new(Word)).expect("claim failed");
        assert_that!(
            claim_device_resources(&second, "sw", 1, Arc::new(Word)).map(|_| ()),
            err(displays_as(contains_substring("AttachError::Busy")))
        );
        expect_that!(board.hw.regions.reserved(), eq(1));
        expect_that!(board.hw.mapped_windows(), eq(1));
    }

    #[gtest]
    #[rstest]
    fn name_collision_unwinds_mapping_and_region(board: Board) {
        let first = board.device(Some(Resource::new(BASE, 0x10000)));
        let second = board.device(Some(Resource::new(0x4121_0000, 0x10000)));
        claim_device_resources(&first, "sw", 1, Arc::new(Word)).expect("claim failed");
        assert_that!(
            claim_device_resources(&second, "sw", 1, Arc::new(Word)).map(|_| ()),
            err(displays_as(contains_substring("Endpoint sw already exists")))
        );
        expect_that!(board.hw.regions.reserved(), eq(1));
        expect_that!(board.hw.mapped_windows(), eq(1));
        expect_that!(second.drvdata().is_none(), eq(true));
    }

    #[gtest]
    #[rstest]
    fn release_without_record_is_no_data(board: Board) {
        let device = board.device(Some(Resource::new(BASE, 0x10000)));
        assert_that!(
            release_device_resources(&device),
            err(displays_as(contains_substring("AttachError::NoData")))
        );
    }

    #[gtest]
    #[rstest]
    fn open_endpoint_outlives_release_with_no_device(board: Board) {
        board.bus.poke(BASE, 0xa5);
        let device = board.device(Some(Resource::new(BASE, 0x10000)));
        claim_device_resources(&device, "sw", 1, Arc::new(Word)).expect("claim failed");
        let mut file = board.endpoints.open("sw").expect("open failed");
        let mut buf = [0u8; 4];
        expect_that!(file.read(&mut buf), ok(eq(&4)));
        expect_that!(buf[0], eq(0xa5));

        release_device_resources(&device).expect("release failed");
        expect_that!(board.hw.mapped_windows(), eq(0));
        assert_that!(
            file.read(&mut buf),
            err(displays_as(contains_substring("AttachError::NoDevice")))
        );
        assert_that!(
            board.endpoints.open("sw").map(|_| ()),
            err(displays_as(contains_substring("AttachError::NotFound")))
        );
    }
}
