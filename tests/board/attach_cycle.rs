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

use crate::common::{Board, ID_REG_BASE, TIMER_IRQ, next_report};
use devattach::attacher::lifecycle::{Attacher, AttacherOptions};
use devattach::hw::irq::IrqReturn;
use devattach::overlay::engine::OverlayId;
use devattach::overlay::fetcher::BlobFetcher;
use devattach::overlay::fragment::CycleState;
use googletest::prelude::*;

#[gtest]
#[tokio::test]
async fn identity_interrupt_attaches_peripheral() {
    let board = Board::new();
    let mut attacher =
        Attacher::start(&board.context(), &AttacherOptions::default()).expect("start failed");
    let handle = attacher.handle();

    expect_that!(board.reprogram(4), some(eq(IrqReturn::Handled)));
    expect_that!(board.registers.writes(), contains(eq(&(ID_REG_BASE, 4))));
    let report = next_report(&handle, None).await.expect("no cycle ran");
    expect_that!(report.identity, some(eq(4)));
    expect_that!(report.state, eq(CycleState::Done));
    expect_that!(report.failed_stage, none());

    expect_that!(board.bound_drivers(), elements_are![eq(&"mytimer")]);
    expect_that!(board.hw.irqs.owner(TIMER_IRQ), some(eq("AXI_TIMER")));
    let overlay = report.overlay.expect("no overlay recorded");
    expect_that!(handle.status().active, some(eq((4, Some(overlay)))));
    expect_that!(handle.status().identity, some(eq(4)));
    expect_that!(board.engine.active_overlays(), eq(2));
    expect_that!(board.firmware.outstanding(), eq(2));

    attacher.shutdown().await;
}

#[gtest]
#[tokio::test]
async fn new_identity_replaces_bound_peripheral() {
    let board = Board::new();
    let mut attacher =
        Attacher::start(&board.context(), &AttacherOptions::default()).expect("start failed");
    let handle = attacher.handle();

    board.reprogram(4);
    let first = next_report(&handle, None).await.expect("no cycle ran");
    board.reprogram(3);
    let second = next_report(&handle, Some(&first))
        .await
        .expect("no second cycle");
    expect_that!(second.identity, some(eq(3)));
    expect_that!(board.bound_drivers(), elements_are![eq(&"sw")]);
    expect_that!(board.hw.irqs.owner(TIMER_IRQ), none());
    expect_that!(
        board.endpoints.open("mytimer").map(|_| ()),
        err(displays_as(contains_substring("AttachError::NotFound")))
    );
    expect_that!(board.engine.active_overlays(), eq(2));

    attacher.shutdown().await;
}

#[gtest]
#[tokio::test]
async fn unknown_identity_leaves_nothing_attached() {
    let board = Board::new();
    let mut attacher =
        Attacher::start(&board.context(), &AttacherOptions::default()).expect("start failed");
    let handle = attacher.handle();

    board.reprogram(1);
    let first = next_report(&handle, None).await.expect("no cycle ran");
    board.reprogram(9);
    let failed = next_report(&handle, Some(&first))
        .await
        .expect("no second cycle");
    expect_that!(failed.state, eq(CycleState::Failed));
    expect_that!(failed.failed_stage, some(eq(CycleState::Fetch)));
    expect_that!(failed.error, some(contains_substring("dev_9.dtbo")));
    expect_that!(board.bound_drivers(), is_empty());
    expect_that!(board.endpoints.live_endpoints(), eq(0));
    expect_that!(handle.status().active, none());
    expect_that!(board.engine.active_overlays(), eq(1));

    board.reprogram(2);
    let recovered = next_report(&handle, Some(&failed))
        .await
        .expect("no third cycle");
    expect_that!(recovered.state, eq(CycleState::Done));
    expect_that!(board.bound_drivers(), elements_are![eq(&"myrandom")]);

    attacher.shutdown().await;
}

#[gtest]
#[tokio::test]
async fn pending_interrupts_coalesce() {
    let board = Board::new();
    let mut attacher =
        Attacher::start(&board.context(), &AttacherOptions::default()).expect("start failed");
    let handle = attacher.handle();

    board.reprogram(3);
    let first = next_report(&handle, None).await.expect("no cycle ran");
    let OverlayId(first_overlay) = first.overlay.expect("no overlay recorded");

    board.reprogram(3);
    board.reprogram(3);
    expect_that!(handle.trigger(), ok(eq(&false)));
    let second = next_report(&handle, Some(&first))
        .await
        .expect("no second cycle");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    expect_that!(second.overlay, some(eq(OverlayId(first_overlay + 1))));
    expect_that!(handle.last_report(), some(eq(&second)));
    expect_that!(board.bound_drivers(), elements_are![eq(&"sw")]);

    attacher.shutdown().await;
}
