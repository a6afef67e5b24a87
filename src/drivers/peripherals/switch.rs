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

//! Slide switches: the low eight bits of the data register as a `0`/`1` string.

use crate::drivers::ascii::{copy_at_offset, format_binary};
use crate::drivers::bus::{PlatformDevice, PlatformDriver};
use crate::drivers::interface::{FileContext, FileOperations};
use crate::drivers::resources::{claim_device_resources, release_device_resources};
use crate::error::AttachError;
use devattach_macros::driver;
use log::{debug, error};
use std::sync::Arc;

struct SwitchOps;

impl FileOperations for SwitchOps {
    fn read(&self, ctx: &FileContext, buf: &mut [u8], pos: &mut u64) -> Result<usize, AttachError> {
        let value = ctx.with_window(|io| io.read32(0))?;
        let bits = format_binary(value as u8);
        Ok(copy_at_offset(&bits, buf, pos))
    }

    fn write(&self, ctx: &FileContext, _data: &[u8], _pos: &mut u64) -> Result<usize, AttachError> {
        error!("{} is read-only", ctx.name());
        Ok(0)
    }
}

#[driver(compatible = "xlnx,my-axi-sw-1.0", name = "sw")]
#[derive(Debug, Default)]
pub struct SwitchDriver;

impl PlatformDriver for SwitchDriver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn probe(&self, device: &Arc<PlatformDevice>) -> Result<(), AttachError> {
        debug!("Probing {} driver", Self::NAME);
        claim_device_resources(device, Self::NAME, 1, Arc::new(SwitchOps))?;
        Ok(())
    }

    fn remove(&self, device: &Arc<PlatformDevice>) -> Result<(), AttachError> {
        release_device_resources(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::peripherals::testing::TestBoard;
    use googletest::prelude::*;
    use rstest::*;

    const BASE: u64 = 0x4120_0000;

    #[gtest]
    #[rstest]
    #[case::start(0, 16, "10100101\0")]
    #[case::middle(4, 16, "0101\0")]
    #[case::last_byte(8, 16, "\0")]
    #[case::end(9, 16, "")]
    #[case::past_end(20, 16, "")]
    #[case::short_buffer(0, 3, "101")]
    fn reads_low_byte_as_bits(#[case] pos: u64, #[case] capacity: usize, #[case] expected: &str) {
        let board = TestBoard::new();
        board.bus.poke(BASE, 0xffff_ffa5);
        let device = board.device("xlnx,my-axi-sw-1.0", BASE, None);
        SwitchDriver.probe(&device).expect("probe failed");

        let mut file = board.endpoints.open("sw").expect("open failed");
        file.seek(pos);
        let mut buf = vec![0u8; capacity];
        let len = file.read(&mut buf).expect("read failed");
        expect_that!(&buf[..len], eq(expected.as_bytes()));
    }

    #[gtest]
    fn writes_are_ignored() {
        let board = TestBoard::new();
        let device = board.device("xlnx,my-axi-sw-1.0", BASE, None);
        SwitchDriver.probe(&device).expect("probe failed");
        let mut file = board.endpoints.open("sw").expect("open failed");
        expect_that!(file.write(b"11110000"), ok(eq(&0)));
        expect_that!(board.bus.writes(), is_empty());
    }
}
