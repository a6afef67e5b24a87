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

#![allow(dead_code)]

use devattach::attacher::lifecycle::{AttachContext, AttacherHandle};
use devattach::attacher::loader::CycleReport;
use devattach::devicetree::engine::DeviceTreeEngine;
use devattach::devicetree::fdt;
use devattach::devicetree::node::DeviceNode;
use devattach::drivers::bus::PlatformBus;
use devattach::drivers::interface::EndpointRegistry;
use devattach::drivers::module::DriverModule;
use devattach::drivers::peripherals;
use devattach::hw::Hardware;
use devattach::hw::irq::IrqReturn;
use devattach::hw::registers::SimulatedBus;
use devattach::overlay::fetcher::MemoryFirmware;
use std::sync::Arc;
use std::time::Duration;

pub const ID_REG_BASE: u64 = 0x43c0_0000;
pub const ID_REG_IRQ: u32 = 61;
pub const PWM_BASE: u64 = 0x43c1_0000;
pub const RANDOM_BASE: u64 = 0x43c2_0000;
pub const SWITCH_BASE: u64 = 0x4120_0000;
pub const TIMER_BASE: u64 = 0x4280_0000;
pub const TIMER_IRQ: u32 = 62;

const WINDOW_SIZE: u32 = 0x10000;
const INTC_PHANDLE: u32 = 0x4;

/// Zynq-like base tree: one bus routed to a GIC.
pub fn base_tree() -> DeviceNode {
    DeviceNode::new("")
        .with_u32s("#address-cells", &[1])
        .with_u32s("#size-cells", &[1])
        .with_child(
            DeviceNode::new("amba")
                .with_u32s("#address-cells", &[1])
                .with_u32s("#size-cells", &[1])
                .with_u32s("interrupt-parent", &[INTC_PHANDLE])
                .with_child(
                    DeviceNode::new("interrupt-controller@f8f01000")
                        .with_u32s("phandle", &[INTC_PHANDLE])
                        .with_u32s("#interrupt-cells", &[3]),
                ),
        )
        .with_child(
            DeviceNode::new("__symbols__").with_str("intc", "/amba/interrupt-controller@f8f01000"),
        )
}

/// A single-fragment overlay adding one node under `/amba`. `spi` is the GIC shared
/// peripheral interrupt number, i.e. the line minus 32.
pub fn device_overlay(name: &str, compatible: &str, base: u64, spi: Option<u32>) -> Vec<u8> {
    let mut node = DeviceNode::new(format!("{name}@{base:x}"))
        .with_str("compatible", compatible)
        .with_u32s("reg", &[base as u32, WINDOW_SIZE]);
    if let Some(spi) = spi {
        node = node.with_u32s("interrupts", &[0, spi, 4]);
    }
    fdt::flatten(
        &DeviceNode::new("").with_child(
            DeviceNode::new("fragment@0")
                .with_str("target-path", "/amba")
                .with_child(DeviceNode::new("__overlay__").with_child(node)),
        ),
    )
}

/// Firmware store with the identity register fragment and one fragment per known peripheral.
pub fn firmware() -> MemoryFirmware {
    let firmware = MemoryFirmware::new();
    firmware.insert(
        "axi_id_reg.dtbo",
        device_overlay("id_reg", "xlnx,my-id-reg-2.0", ID_REG_BASE, Some(29)),
    );
    firmware.insert(
        "dev_1.dtbo",
        device_overlay("pwm", "xlnx,my-axi-pwm-1.0", PWM_BASE, None),
    );
    firmware.insert(
        "dev_2.dtbo",
        device_overlay("random", "xlnx,my-axi-random-1.0", RANDOM_BASE, None),
    );
    firmware.insert(
        "dev_3.dtbo",
        device_overlay("gpio", "xlnx,my-axi-sw-1.0", SWITCH_BASE, None),
    );
    firmware.insert(
        "dev_4.dtbo",
        device_overlay("timer", "xlnx,xps-timer-1.00.a", TIMER_BASE, Some(30)),
    );
    firmware
}

/// A simulated board with the peripheral driver module loaded.
pub struct Board {
    pub registers: Arc<SimulatedBus>,
    pub hw: Hardware,
    pub firmware: Arc<MemoryFirmware>,
    pub endpoints: Arc<EndpointRegistry>,
    pub bus: Arc<PlatformBus>,
    pub module: Arc<DriverModule>,
    pub engine: Arc<DeviceTreeEngine>,
}

impl Board {
    pub fn new() -> Self {
        Self::with_base(base_tree())
    }

    pub fn with_base(base: DeviceNode) -> Self {
        let registers = Arc::new(SimulatedBus::new());
        let hw = Hardware::new(registers.clone());
        let endpoints = Arc::new(EndpointRegistry::default());
        let bus = Arc::new(PlatformBus::new(hw.clone(), endpoints.clone()));
        let module = peripherals::register_all(&bus).expect("failed to load driver module");
        let engine = Arc::new(DeviceTreeEngine::with_observer(base, bus.clone()));
        Board {
            registers,
            hw,
            firmware: Arc::new(firmware()),
            endpoints,
            bus,
            module,
            engine,
        }
    }

    pub fn context(&self) -> AttachContext {
        AttachContext {
            hw: self.hw.clone(),
            fetcher: self.firmware.clone(),
            engine: self.engine.clone(),
        }
    }

    /// Program the fabric with peripheral `identity` and raise the identity interrupt.
    pub fn reprogram(&self, identity: u32) -> Option<IrqReturn> {
        self.registers.poke(ID_REG_BASE, identity);
        self.hw.irqs.raise(ID_REG_IRQ)
    }

    pub fn bound_drivers(&self) -> Vec<&'static str> {
        self.bus.bound_devices().iter().map(|d| d.driver).collect()
    }
}

/// Wait for a cycle report different from `previous`.
pub async fn next_report(
    handle: &AttacherHandle,
    previous: Option<&CycleReport>,
) -> Option<CycleReport> {
    for _ in 0..500 {
        let report = handle.last_report();
        if report.is_some() && report.as_ref() != previous {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}
