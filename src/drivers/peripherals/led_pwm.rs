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

//! PWM-dimmed LEDs. Endpoint `led_pwm<i>` reads and writes the duty register at `4 * i`.

use crate::drivers::ascii::{MAX_DECIMAL_INPUT, copy_at_offset, format_decimal, parse_decimal};
use crate::drivers::bus::{PlatformDevice, PlatformDriver};
use crate::drivers::interface::{FileContext, FileOperations};
use crate::drivers::resources::{claim_device_resources, release_device_resources};
use crate::error::AttachError;
use devattach_macros::driver;
use log::{debug, info};
use std::sync::Arc;

const LED_COUNT: usize = 8;

fn register(ctx: &FileContext) -> u64 {
    u64::from(ctx.minor()) * 4
}

struct LedPwmOps;

impl FileOperations for LedPwmOps {
    fn read(&self, ctx: &FileContext, buf: &mut [u8], pos: &mut u64) -> Result<usize, AttachError> {
        let duty = ctx.with_window(|io| io.read32(register(ctx)))?;
        Ok(copy_at_offset(&format_decimal(duty), buf, pos))
    }

    fn write(&self, ctx: &FileContext, data: &[u8], _pos: &mut u64) -> Result<usize, AttachError> {
        let duty = parse_decimal(&data[..data.len().min(MAX_DECIMAL_INPUT)]);
        debug!("{} brightness set to {duty}", ctx.name());
        ctx.with_window(|io| io.write32(register(ctx), duty))?;
        Ok(data.len())
    }
}

#[driver(compatible = "xlnx,my-axi-pwm-1.0", name = "led_pwm")]
#[derive(Debug, Default)]
pub struct LedPwmDriver;

impl PlatformDriver for LedPwmDriver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn probe(&self, device: &Arc<PlatformDevice>) -> Result<(), AttachError> {
        claim_device_resources(device, Self::NAME, LED_COUNT, Arc::new(LedPwmOps))?;
        info!("LED PWM driver loaded for {}", device.info().path);
        Ok(())
    }

    fn remove(&self, device: &Arc<PlatformDevice>) -> Result<(), AttachError> {
        release_device_resources(device)
    }
}
