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

//! AXI timer: programmable interrupt period with a deferred interrupt log.
//!
//! Register map: control/status at `+0`, load (period) at `+4`. The top half acknowledges
//! the interrupt by writing the control/status word back, then queues the bottom half.

use crate::attacher::work_queue::{WorkQueue, WorkQueueHandle};
use crate::drivers::ascii::{MAX_DECIMAL_INPUT, copy_at_offset, format_decimal, parse_decimal};
use crate::drivers::bus::{PlatformDevice, PlatformDriver};
use crate::drivers::interface::{FileContext, FileOperations};
use crate::drivers::resources::{DeviceResources, claim_device_resources, release_device_resources};
use crate::error::AttachError;
use crate::hw::irq::{IrqHandler, IrqRegistration, IrqReturn};
use devattach_macros::driver;
use log::{debug, error, info, warn};
use std::sync::{Arc, Weak};

const CONTROL: u64 = 0;
const LOAD: u64 = 4;
const STOP: u32 = 0x172;
const START: u32 = 0x1d2;
/// Shorter periods stop the timer instead.
pub const MIN_PERIOD: u32 = 100_000;
const IRQ_NAME: &str = "AXI_TIMER";
const QUEUE_NAME: &str = "AXI_TIMER_workqueue";

struct TimerOps;

impl FileOperations for TimerOps {
    fn read(&self, ctx: &FileContext, buf: &mut [u8], pos: &mut u64) -> Result<usize, AttachError> {
        let period = ctx.with_window(|io| io.read32(LOAD))?;
        Ok(copy_at_offset(&format_decimal(period), buf, pos))
    }

    fn write(&self, ctx: &FileContext, data: &[u8], _pos: &mut u64) -> Result<usize, AttachError> {
        let period = parse_decimal(&data[..data.len().min(MAX_DECIMAL_INPUT)]);
        ctx.with_window(|io| {
            if period < MIN_PERIOD {
                io.write32(CONTROL, STOP)?;
                debug!("Timer stopped, period {period} is below {MIN_PERIOD}");
            } else {
                io.write32(LOAD, period)?;
                io.write32(CONTROL, STOP)?;
                io.write32(CONTROL, START)?;
                debug!("Timer restarted with period {period}");
            }
            Ok(())
        })?;
        Ok(data.len())
    }
}

struct TimerIrqHandler {
    resources: Weak<DeviceResources>,
    queue: WorkQueueHandle,
}

impl IrqHandler for TimerIrqHandler {
    fn handle(&self, line: u32) -> IrqReturn {
        let Some(resources) = self.resources.upgrade() else {
            return IrqReturn::NotHandled;
        };
        let acked = resources.with_window(|io| {
            let status = io.read32(CONTROL)?;
            io.write32(CONTROL, status)
        });
        if let Err(e) = acked {
            error!("Cannot acknowledge timer interrupt {line}: {e}");
            return IrqReturn::NotHandled;
        }
        self.queue.queue();
        IrqReturn::Handled
    }
}

// Dropped before the resources: the line first, then the queue.
struct TimerIrq {
    _irq: IrqRegistration,
    _queue: WorkQueue,
}

#[driver(compatible = "xlnx,xps-timer-1.00.a", name = "mytimer")]
#[derive(Debug, Default)]
pub struct TimerDriver;

impl TimerDriver {
    fn attach_interrupt(
        device: &PlatformDevice,
        record: &Arc<DeviceResources>,
        line: u32,
    ) -> Result<Option<TimerIrq>, AttachError> {
        let queue = match WorkQueue::create(
            QUEUE_NAME,
            Arc::new(|| debug!("AXI TIMER interrupt occurred")),
        ) {
            Ok(queue) => queue,
            Err(e) => {
                warn!("Timer interrupt {line} left unhandled: {e}");
                return Ok(None);
            }
        };
        let handler = Arc::new(TimerIrqHandler {
            resources: Arc::downgrade(record),
            queue: queue.handle(),
        });
        let irq = device.hardware().irqs.request(line, IRQ_NAME, handler)?;
        Ok(Some(TimerIrq {
            _irq: irq,
            _queue: queue,
        }))
    }
}

impl PlatformDriver for TimerDriver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn probe(&self, device: &Arc<PlatformDevice>) -> Result<(), AttachError> {
        let record = claim_device_resources(device, Self::NAME, 1, Arc::new(TimerOps))?;
        let Some(line) = record.irq() else {
            info!("AXI timer driver loaded without interrupt");
            return Ok(());
        };
        match Self::attach_interrupt(device, &record, line) {
            Ok(Some(irq)) => record.set_driver_state(Box::new(irq)),
            Ok(None) => {}
            Err(e) => {
                error!("The interrupt {line} is already taken: {e}");
                drop(record);
                if let Err(e) = release_device_resources(device) {
                    warn!("Cannot release {}: {e}", device.info().path);
                }
                return Err(e);
            }
        }
        info!("AXI timer driver loaded");
        Ok(())
    }

    fn remove(&self, device: &Arc<PlatformDevice>) -> Result<(), AttachError> {
        if let Some(record) = device.drvdata() {
            drop(record.take_driver_state());
        }
        release_device_resources(device)
    }
}
