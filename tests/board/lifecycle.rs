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

use crate::common::{Board, ID_REG_BASE, ID_REG_IRQ, base_tree};
use devattach::attacher::lifecycle::{Attacher, AttacherOptions};
use devattach::devicetree::node::DeviceNode;
use devattach::hw::irq::{IrqHandler, IrqReturn};
use devattach::hw::regions::Resource;
use devattach::overlay::fetcher::BlobFetcher;
use googletest::prelude::*;
use rstest::*;
use std::sync::Arc;

struct Squatter;

impl IrqHandler for Squatter {
    fn handle(&self, _line: u32) -> IrqReturn {
        IrqReturn::NotHandled
    }
}

fn expect_nothing_held(board: &Board) {
    expect_that!(board.engine.active_overlays(), eq(0));
    expect_that!(board.hw.mapped_windows(), eq(0));
    expect_that!(board.firmware.outstanding(), eq(0));
    expect_that!(board.endpoints.live_endpoints(), eq(0));
    expect_that!(board.bus.bound_devices(), is_empty());
}

#[gtest]
#[tokio::test]
async fn shutdown_releases_everything() {
    let board = Board::new();
    let mut attacher =
        Attacher::start(&board.context(), &AttacherOptions::default()).expect("start failed");
    expect_that!(attacher.irq_line(), eq(ID_REG_IRQ));
    expect_that!(board.engine.active_overlays(), eq(1));
    expect_that!(board.hw.regions.reserved(), eq(1));
    expect_that!(board.hw.mapped_windows(), eq(1));
    expect_that!(board.hw.irqs.owner(ID_REG_IRQ), some(eq("Device Attacher")));

    let handle = attacher.handle();
    board.reprogram(4);
    crate::common::next_report(&handle, None)
        .await
        .expect("no cycle ran");
    expect_that!(board.bound_drivers(), elements_are![eq(&"mytimer")]);

    attacher.shutdown().await;
    expect_that!(attacher.is_running(), eq(false));
    expect_nothing_held(&board);
    expect_that!(board.hw.regions.reserved(), eq(0));
    expect_that!(board.hw.irqs.claimed(), eq(0));
    expect_that!(handle.status().running, eq(false));
    expect_that!(
        handle.trigger(),
        err(displays_as(contains_substring("AttachError::NoDevice")))
    );

    attacher.shutdown().await;
    expect_that!(board.hw.regions.reserved(), eq(0));
}

#[gtest]
#[tokio::test]
async fn startup_check_attaches_without_interrupt() {
    let board = Board::new();
    board.registers.poke(ID_REG_BASE, 3);
    let options = AttacherOptions {
        startup_check: true,
        ..Default::default()
    };
    let mut attacher = Attacher::start(&board.context(), &options).expect("start failed");
    let report = crate::common::next_report(&attacher.handle(), None)
        .await
        .expect("no cycle ran");
    expect_that!(report.identity, some(eq(3)));
    expect_that!(board.bound_drivers(), elements_are![eq(&"sw")]);
    attacher.shutdown().await;
}

#[gtest]
#[tokio::test]
async fn identity_node_comes_from_its_fragment() {
    let mut base = base_tree();
    base.find_mut("/amba")
        .expect("base tree has no bus")
        .children
        .push(
            DeviceNode::new("id_reg@43d00000")
                .with_str("compatible", "xlnx,my-id-reg-2.0")
                .with_u32s("reg", &[0x43d0_0000, 0x1_0000])
                .with_u32s("interrupts", &[0, 28, 4]),
        );
    let board = Board::with_base(base);
    let mut attacher =
        Attacher::start(&board.context(), &AttacherOptions::default()).expect("start failed");
    let status = attacher.handle().status();
    expect_that!(status.register_base, eq(ID_REG_BASE));
    expect_that!(attacher.irq_line(), eq(ID_REG_IRQ));
    expect_that!(board.hw.irqs.owner(60), none());
    expect_that!(board.hw.regions.reserved(), eq(1));

    attacher.shutdown().await;
    expect_that!(board.hw.regions.reserved(), eq(0));
}

#[gtest]
#[rstest]
#[case::missing_fragment(|b: &Board, _: &mut AttacherOptions| b.firmware.remove("axi_id_reg.dtbo"),
    "AttachError::NotFound")]
#[case::empty_fragment(|b: &Board, _: &mut AttacherOptions| b.firmware.insert("axi_id_reg.dtbo", vec![]),
    "AttachError::NotFound")]
#[case::malformed_fragment(|b: &Board, _: &mut AttacherOptions| b.firmware.insert("axi_id_reg.dtbo", vec![0xde, 0xad, 0xbe, 0xef]),
    "AttachError::Invalid")]
#[case::unknown_compatible(|_: &Board, o: &mut AttacherOptions| o.id_reg_compatible = "vendor,other-id-reg".into(),
    "AttachError::NotFound")]
fn failed_startup_unwinds(
    #[case] sabotage: fn(&Board, &mut AttacherOptions),
    #[case] message: &str,
) {
    let board = Board::new();
    let mut options = AttacherOptions::default();
    sabotage(&board, &mut options);
    assert_that!(
        Attacher::start(&board.context(), &options).map(|_| ()),
        err(displays_as(contains_substring(message)))
    );
    expect_nothing_held(&board);
    expect_that!(board.hw.regions.reserved(), eq(0));
    expect_that!(board.hw.irqs.claimed(), eq(0));
}

#[gtest]
fn reserved_window_fails_startup() {
    let board = Board::new();
    let squatter = board
        .hw
        .regions
        .request(Resource::new(ID_REG_BASE, 4), "squatter")
        .expect("reservation failed");
    assert_that!(
        Attacher::start(&board.context(), &AttacherOptions::default()).map(|_| ()),
        err(displays_as(contains_substring("AttachError::Busy")))
    );
    expect_nothing_held(&board);
    expect_that!(board.hw.regions.reserved(), eq(1));
    drop(squatter);
}

#[gtest]
#[tokio::test]
async fn claimed_interrupt_fails_startup() {
    let board = Board::new();
    let squatter = board
        .hw
        .irqs
        .request(ID_REG_IRQ, "squatter", Arc::new(Squatter))
        .expect("claim failed");
    assert_that!(
        Attacher::start(&board.context(), &AttacherOptions::default()).map(|_| ()),
        err(displays_as(contains_substring("AttachError::Busy")))
    );
    expect_nothing_held(&board);
    expect_that!(board.hw.regions.reserved(), eq(0));
    expect_that!(board.hw.irqs.owner(ID_REG_IRQ), some(eq("squatter")));
    drop(squatter);
}

#[gtest]
fn startup_outside_a_runtime_fails() {
    let board = Board::new();
    assert_that!(
        Attacher::start(&board.context(), &AttacherOptions::default()).map(|_| ()),
        err(displays_as(contains_substring("AttachError::Internal")))
    );
    expect_nothing_held(&board);
    expect_that!(board.hw.regions.reserved(), eq(0));
}
