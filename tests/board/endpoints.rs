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

use crate::common::{Board, PWM_BASE, RANDOM_BASE, SWITCH_BASE, TIMER_BASE, TIMER_IRQ, next_report};
use devattach::attacher::lifecycle::{Attacher, AttacherOptions};
use devattach::comm::dbus::{format_endpoints, read_endpoint, write_endpoint};
use devattach::hw::irq::IrqReturn;
use googletest::prelude::*;

async fn attached(identity: u32) -> (Board, Attacher) {
    let board = Board::new();
    let attacher =
        Attacher::start(&board.context(), &AttacherOptions::default()).expect("start failed");
    board.reprogram(identity);
    next_report(&attacher.handle(), None)
        .await
        .expect("no cycle ran");
    (board, attacher)
}

#[gtest]
#[tokio::test]
async fn timer_endpoint_programs_period() {
    let (board, mut attacher) = attached(4).await;

    expect_that!(
        write_endpoint(&board.endpoints, "mytimer", b"200000"),
        ok(eq(&6))
    );
    expect_that!(board.registers.peek(TIMER_BASE + 4), eq(200_000));
    let writes = board.registers.writes();
    let tail = writes[writes.len() - 3..].to_vec();
    expect_that!(
        tail,
        elements_are![
            eq(&(TIMER_BASE + 4, 200_000)),
            eq(&(TIMER_BASE, 0x172)),
            eq(&(TIMER_BASE, 0x1d2))
        ]
    );
    expect_that!(
        read_endpoint(&board.endpoints, "mytimer", 0, 32),
        ok(eq(&b"200000\0".to_vec()))
    );

    write_endpoint(&board.endpoints, "mytimer", b"42").expect("write failed");
    expect_that!(board.registers.peek(TIMER_BASE + 4), eq(200_000));
    expect_that!(board.registers.writes().last(), some(eq(&(TIMER_BASE, 0x172))));

    board.registers.poke(TIMER_BASE, 0x1d2);
    expect_that!(board.hw.irqs.raise(TIMER_IRQ), some(eq(IrqReturn::Handled)));
    expect_that!(board.registers.writes().last(), some(eq(&(TIMER_BASE, 0x1d2))));

    attacher.shutdown().await;
}

#[gtest]
#[tokio::test]
async fn switch_endpoint_reads_binary() {
    let (board, mut attacher) = attached(3).await;
    board.registers.poke(SWITCH_BASE, 0xa5);

    expect_that!(
        read_endpoint(&board.endpoints, "sw", 0, 16),
        ok(eq(&b"10100101\0".to_vec()))
    );
    expect_that!(
        read_endpoint(&board.endpoints, "sw", 4, 16),
        ok(eq(&b"0101\0".to_vec()))
    );
    expect_that!(read_endpoint(&board.endpoints, "sw", 9, 16), ok(is_empty()));
    expect_that!(write_endpoint(&board.endpoints, "sw", b"1"), ok(eq(&0)));

    attacher.shutdown().await;
}

#[gtest]
#[tokio::test]
async fn random_endpoint_samples_and_seeds() {
    let (board, mut attacher) = attached(2).await;
    board.registers.poke(RANDOM_BASE, 0xbeef);

    let sample = read_endpoint(&board.endpoints, "myrandom", 0, 8).expect("read failed");
    expect_that!(sample, eq(&0xbeefu16.to_ne_bytes().to_vec()));
    expect_that!(read_endpoint(&board.endpoints, "myrandom", 0, 1), ok(is_empty()));

    expect_that!(
        write_endpoint(&board.endpoints, "myrandom", &[0x34, 0x12, 0xff]),
        ok(eq(&3))
    );
    expect_that!(board.registers.peek(RANDOM_BASE), eq(0x1234));

    attacher.shutdown().await;
}

#[gtest]
#[tokio::test]
async fn pwm_exposes_one_endpoint_per_led() {
    let (board, mut attacher) = attached(1).await;

    let endpoints = board.endpoints.endpoints();
    let names: Vec<&str> = endpoints.iter().map(|e| e.name.as_str()).collect();
    expect_that!(
        names,
        elements_are![
            eq(&"led_pwm0"),
            eq(&"led_pwm1"),
            eq(&"led_pwm2"),
            eq(&"led_pwm3"),
            eq(&"led_pwm4"),
            eq(&"led_pwm5"),
            eq(&"led_pwm6"),
            eq(&"led_pwm7")
        ]
    );
    expect_that!(
        format_endpoints(&endpoints),
        starts_with("led_pwm0 254:0\nled_pwm1 254:1\n")
    );

    write_endpoint(&board.endpoints, "led_pwm3", b"128").expect("write failed");
    expect_that!(board.registers.peek(PWM_BASE + 12), eq(128));
    expect_that!(
        read_endpoint(&board.endpoints, "led_pwm3", 0, 16),
        ok(eq(&b"128\0".to_vec()))
    );

    attacher.shutdown().await;
}

#[gtest]
#[tokio::test]
async fn module_stays_loaded_while_endpoint_open() {
    let (board, mut attacher) = attached(3).await;

    let file = board.endpoints.open("sw").expect("open failed");
    expect_that!(board.module.open_handles(), eq(1));
    assert_that!(
        board.module.unload(&board.bus),
        err(displays_as(contains_substring("AttachError::Busy")))
    );
    expect_that!(board.module.is_loaded(), eq(true));
    drop(file);

    board.module.unload(&board.bus).expect("unload failed");
    expect_that!(board.bound_drivers(), is_empty());
    expect_that!(board.endpoints.live_endpoints(), eq(0));
    expect_that!(board.hw.regions.reserved(), eq(1));

    attacher.shutdown().await;
    expect_that!(board.hw.regions.reserved(), eq(0));
}
