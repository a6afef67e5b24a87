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

//! Random number generator: 16-bit samples out, a seed in.

use crate::drivers::bus::{PlatformDevice, PlatformDriver};
use crate::drivers::interface::{FileContext, FileOperations};
use crate::drivers::resources::{claim_device_resources, release_device_resources};
use crate::error::AttachError;
use devattach_macros::driver;
use log::debug;
use std::sync::Arc;

const SAMPLE_LEN: usize = 2;

struct RandomOps;

impl FileOperations for RandomOps {
    /// One raw 16-bit sample per read. The position is not used.
    fn read(&self, ctx: &FileContext, buf: &mut [u8], _pos: &mut u64) -> Result<usize, AttachError> {
        if buf.len() < SAMPLE_LEN {
            return Ok(0);
        }
        let sample = ctx.with_window(|io| io.read16(0))?;
        buf[..SAMPLE_LEN].copy_from_slice(&sample.to_ne_bytes());
        Ok(SAMPLE_LEN)
    }

    /// The first two bytes, little-endian, become the seed.
    fn write(&self, ctx: &FileContext, data: &[u8], _pos: &mut u64) -> Result<usize, AttachError> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut seed = [0u8; 4];
        let len = data.len().min(SAMPLE_LEN);
        seed[..len].copy_from_slice(&data[..len]);
        let seed = u32::from_le_bytes(seed);
        debug!("New random number generator seed: {seed}");
        ctx.with_window(|io| io.write32(0, seed))?;
        Ok(data.len())
    }
}

#[driver(compatible = "xlnx,my-axi-random-1.0", name = "myrandom")]
#[derive(Debug, Default)]
pub struct RandomDriver;

impl PlatformDriver for RandomDriver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn probe(&self, device: &Arc<PlatformDevice>) -> Result<(), AttachError> {
        claim_device_resources(device, Self::NAME, 1, Arc::new(RandomOps))?;
        Ok(())
    }

    fn remove(&self, device: &Arc<PlatformDevice>) -> Result<(), AttachError> {
        release_device_resources(device)
    }
}
