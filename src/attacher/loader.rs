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

//! The overlay load worker: one teardown-then-reload cycle per identity change.

use crate::attacher::identity::{IdentityRegister, PeripheralKind, fragment_name};
use crate::error::AttachError;
use crate::overlay::engine::{OverlayEngine, OverlayId};
use crate::overlay::fetcher::BlobFetcher;
use crate::overlay::fragment::{
    CycleState, FragmentAccounting, FragmentSlot, SlotState, StageError, load_fragment,
};
use log::{debug, error, info};
use std::sync::{Arc, Mutex};

/// Outcome of the most recent cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub identity: Option<u32>,
    pub state: CycleState,
    pub failed_stage: Option<CycleState>,
    pub overlay: Option<OverlayId>,
    pub error: Option<String>,
}

/// A successfully attached peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attached {
    pub identity: u32,
    pub overlay: OverlayId,
    pub kind: Option<PeripheralKind>,
}

pub struct OverlayLoader {
    identity: Arc<IdentityRegister>,
    fetcher: Arc<dyn BlobFetcher>,
    engine: Arc<dyn OverlayEngine>,
    slot: FragmentSlot,
    accounting: FragmentAccounting,
    report: Mutex<Option<CycleReport>>,
}

impl OverlayLoader {
    pub fn new(
        identity: Arc<IdentityRegister>,
        fetcher: Arc<dyn BlobFetcher>,
        engine: Arc<dyn OverlayEngine>,
        accounting: FragmentAccounting,
    ) -> Self {
        OverlayLoader {
            identity,
            fetcher,
            engine,
            slot: FragmentSlot::new(),
            accounting,
            report: Mutex::new(None),
        }
    }

    /// Retire the active peripheral fragment, then load the one matching the current
    /// identity value.
    ///
    /// The slot stays locked for the whole cycle. A failed cycle leaves it empty; nothing is
    /// retried until the next call.
    ///
    /// # Returns: `Result<Attached, AttachError>`
    /// * `Ok(Attached)` - The new fragment is active
    /// * `Err(AttachError::NoData)` - The slot was closed by shutdown; nothing was done
    /// * `Err(AttachError)` - The error of the failing stage
    pub fn run_cycle(&self) -> Result<Attached, AttachError> {
        let mut slot = self.slot.lock()?;
        if slot.is_closed() {
            debug!("Skipping load cycle: fragment slot is closed");
            return Err(AttachError::NoData("Fragment slot is closed".into()));
        }

        debug!("{} -> {}", CycleState::Idle, CycleState::Teardown);
        slot.teardown();

        let mut identity = None;
        let result = self.reload(&mut slot, &mut identity);
        let report = match &result {
            Ok(attached) => CycleReport {
                identity,
                state: CycleState::Done,
                failed_stage: None,
                overlay: Some(attached.overlay),
                error: None,
            },
            Err(failure) => {
                error!("Load cycle for identity {identity:?}: {failure}");
                CycleReport {
                    identity,
                    state: CycleState::Failed,
                    failed_stage: Some(failure.stage),
                    overlay: None,
                    error: Some(failure.error.to_string()),
                }
            }
        };
        drop(slot);
        if let Ok(mut last) = self.report.lock() {
            *last = Some(report);
        }
        result.map_err(|failure| failure.error)
    }

    fn reload(
        &self,
        slot: &mut SlotState,
        identity_out: &mut Option<u32>,
    ) -> Result<Attached, StageError> {
        debug!("{} -> {}", CycleState::Teardown, CycleState::ReadId);
        let identity = self
            .identity
            .read()
            .map_err(StageError::at(CycleState::ReadId))?;
        *identity_out = Some(identity);

        debug!("{} -> {}", CycleState::ReadId, CycleState::Fetch);
        let name = fragment_name(identity);
        let firmware = self
            .fetcher
            .fetch(&name)
            .map_err(StageError::at(CycleState::Fetch))?;
        let fragment = load_fragment(&self.engine, &self.accounting, firmware)?;
        let overlay = fragment.overlay_id().ok_or_else(|| StageError {
            stage: CycleState::Activate,
            error: AttachError::Internal(format!("{name} has no activation handle")),
        })?;
        slot.install(identity, fragment);

        let kind = PeripheralKind::from_identity(identity);
        match kind {
            Some(kind) => info!("Detected {kind} (identity {identity}), attached {overlay}"),
            None => info!("Attached {overlay} for identity {identity}"),
        }
        Ok(Attached {
            identity,
            overlay,
            kind,
        })
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.report.lock().ok()?.clone()
    }

    pub fn slot(&self) -> &FragmentSlot {
        &self.slot
    }

    pub fn accounting(&self) -> &FragmentAccounting {
        &self.accounting
    }

    /// Current value of the identity register.
    pub fn read_identity(&self) -> Result<u32, AttachError> {
        self.identity.read()
    }

    /// Close the slot against further cycles and retire its fragment.
    pub fn close_and_retire(&self) -> Result<(), AttachError> {
        let mut slot = self.slot.lock()?;
        slot.close();
        slot.teardown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attacher::identity::ID_REG_WINDOW;
    use crate::devicetree::engine::DeviceTreeEngine;
    use crate::devicetree::fdt;
    use crate::devicetree::node::DeviceNode;
    use crate::hw::Hardware;
    use crate::hw::registers::SimulatedBus;
    use crate::overlay::fetcher::MemoryFirmware;
    use googletest::prelude::*;
    use rstest::*;

    const ID_REG: u64 = 0x43c0_0000;

    struct Fixture {
        bus: Arc<SimulatedBus>,
        firmware: Arc<MemoryFirmware>,
        engine: Arc<DeviceTreeEngine>,
        loader: OverlayLoader,
    }

    fn device_overlay(target: &str, compatible: &str) -> Vec<u8> {
        fdt::flatten(
            &DeviceNode::new("").with_child(
                DeviceNode::new("fragment@0")
                    .with_str("target-path", target)
                    .with_child(
                        DeviceNode::new("__overlay__").with_child(
                            DeviceNode::new("device@41200000").with_str("compatible", compatible),
                        ),
                    ),
            ),
        )
    }

    fn referencing_overlay(device: DeviceNode, fixups: DeviceNode) -> Vec<u8> {
        fdt::flatten(
            &DeviceNode::new("")
                .with_child(
                    DeviceNode::new("fragment@0")
                        .with_str("target-path", "/amba")
                        .with_child(DeviceNode::new("__overlay__").with_child(device)),
                )
                .with_child(fixups),
        )
    }

    #[fixture]
    fn fixture() -> Fixture {
        let bus = Arc::new(SimulatedBus::new());
        let hw = Hardware::new(bus.clone());
        let register = Arc::new(IdentityRegister::new(
            hw.ioremap(ID_REG, ID_REG_WINDOW).expect("mapping failed"),
        ));
        let firmware = Arc::new(MemoryFirmware::new());
        firmware.insert("dev_1.dtbo", device_overlay("/amba", "xlnx,my-axi-pwm-1.0"));
        firmware.insert("dev_2.dtbo", device_overlay("/amba", "xlnx,my-axi-random-1.0"));
        firmware.insert("dev_6.dtbo", vec![0xba, 0xd0]);
        firmware.insert("dev_7.dtbo", device_overlay("/nowhere", "xlnx,my-axi-sw-1.0"));
        firmware.insert(
            "dev_8.dtbo",
            referencing_overlay(
                DeviceNode::new("device@41200000")
                    .with_str("compatible", "xlnx,my-axi-sw-1.0")
                    .with_u32s("interrupt-parent", &[0xffff_ffff]),
                DeviceNode::new("__fixups__").with_str(
                    "gpio",
                    "/fragment@0/__overlay__/device@41200000:interrupt-parent:0",
                ),
            ),
        );
        firmware.insert(
            "dev_9.dtbo",
            referencing_overlay(
                DeviceNode::new("device@41200000")
                    .with_str("compatible", "xlnx,my-axi-sw-1.0")
                    .with_u32s("phandle", &[0xffff_fffe]),
                DeviceNode::new("__local_fixups__"),
            ),
        );
        let engine = Arc::new(DeviceTreeEngine::new(
            DeviceNode::new("")
                .with_child(
                    DeviceNode::new("amba").with_child(
                        DeviceNode::new("interrupt-controller@f8f01000")
                            .with_u32s("phandle", &[0x4])
                            .with_u32s("#interrupt-cells", &[3]),
                    ),
                )
                .with_child(
                    DeviceNode::new("__symbols__")
                        .with_str("intc", "/amba/interrupt-controller@f8f01000"),
                ),
        ));
        let loader = OverlayLoader::new(
            register,
            firmware.clone(),
            engine.clone(),
            FragmentAccounting::new(),
        );
        Fixture {
            bus,
            firmware,
            engine,
            loader,
        }
    }

    #[gtest]
    #[rstest]
    fn switching_identity_retires_previous_fragment(fixture: Fixture) {
        fixture.bus.poke(ID_REG, 1);
        let first = fixture.loader.run_cycle().expect("first cycle failed");
        expect_that!(first.kind, some(eq(PeripheralKind::Pwm)));
        expect_that!(fixture.engine.find_compatible("xlnx,my-axi-pwm-1.0"), some(anything()));

        fixture.bus.poke(ID_REG, 2);
        let second = fixture.loader.run_cycle().expect("second cycle failed");
        expect_that!(second.identity, eq(2));
        expect_that!(fixture.engine.find_compatible("xlnx,my-axi-pwm-1.0"), none());
        expect_that!(
            fixture.engine.find_compatible("xlnx,my-axi-random-1.0"),
            some(anything())
        );
        expect_that!(fixture.engine.active_overlays(), eq(1));
        expect_that!(
            fixture.loader.slot().active(),
            some(eq((2, Some(second.overlay))))
        );
        expect_that!(fixture.loader.accounting().outstanding_blobs(), eq(1));
        expect_that!(fixture.loader.accounting().outstanding_trees(), eq(1));
    }

    #[gtest]
    #[rstest]
    #[case::missing_blob(5, CycleState::Fetch, "AttachError::NotFound")]
    #[case::malformed_blob(6, CycleState::Parse, "AttachError::Invalid")]
    #[case::bad_target(7, CycleState::Activate, "AttachError::ActivationFailed")]
    #[case::unknown_label(8, CycleState::Resolve, "AttachError::Unresolvable")]
    #[case::phandle_overflow(9, CycleState::Resolve, "AttachError::Unresolvable")]
    fn failed_cycle_leaves_slot_empty(
        fixture: Fixture,
        #[case] identity: u32,
        #[case] stage: CycleState,
        #[case] message: &str,
    ) {
        fixture.bus.poke(ID_REG, 1);
        fixture.loader.run_cycle().expect("first cycle failed");

        fixture.bus.poke(ID_REG, identity);
        assert_that!(
            fixture.loader.run_cycle(),
            err(displays_as(contains_substring(message)))
        );
        expect_that!(fixture.loader.slot().active(), none());
        expect_that!(fixture.engine.active_overlays(), eq(0));
        expect_that!(fixture.loader.accounting().outstanding_blobs(), eq(0));
        expect_that!(fixture.loader.accounting().outstanding_trees(), eq(0));
        expect_that!(fixture.firmware.outstanding(), eq(0));
        let report = fixture.loader.last_report().expect("no report");
        expect_that!(report.identity, some(eq(identity)));
        expect_that!(report.state, eq(CycleState::Failed));
        expect_that!(report.failed_stage, some(eq(stage)));

        fixture.bus.poke(ID_REG, 2);
        expect_that!(fixture.loader.run_cycle().map(|a| a.identity), ok(eq(&2)));
    }

    #[gtest]
    #[rstest]
    fn closed_slot_refuses_cycles(fixture: Fixture) {
        fixture.bus.poke(ID_REG, 1);
        fixture.loader.run_cycle().expect("cycle failed");
        fixture.loader.close_and_retire().expect("close failed");
        expect_that!(fixture.engine.active_overlays(), eq(0));
        assert_that!(
            fixture.loader.run_cycle(),
            err(displays_as(contains_substring("AttachError::NoData")))
        );
        expect_that!(fixture.engine.active_overlays(), eq(0));
    }
}
