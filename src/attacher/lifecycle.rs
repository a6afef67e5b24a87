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

//! Startup and shutdown of the attacher.
//!
//! Startup acquires, in order: the identity register's own fragment, its physical window,
//! the mapping of that window, the work queue and the interrupt line. Each acquisition is a
//! guard held in a local, so an early return releases everything acquired so far in reverse
//! order.

use crate::attacher::identity::{ID_REG_WINDOW, IdentityIrqHandler, IdentityRegister};
use crate::attacher::loader::{CycleReport, OverlayLoader};
use crate::attacher::work_queue::{WorkQueue, WorkQueueHandle};
use crate::error::AttachError;
use crate::hw::Hardware;
use crate::hw::irq::IrqRegistration;
use crate::hw::regions::RegionReservation;
use crate::overlay::engine::{OverlayEngine, OverlayId};
use crate::overlay::fetcher::BlobFetcher;
use crate::overlay::fragment::{FragmentAccounting, LoadedFragment, load_fragment};
use log::{debug, error, info};
use std::sync::{Arc, Weak};

const REGION_OWNER: &str = "Peripheral Identifier";
const IRQ_NAME: &str = "Device Attacher";
const QUEUE_NAME: &str = "peripheral-attach";

/// Collaborators the attacher runs against.
#[derive(Clone)]
pub struct AttachContext {
    pub hw: Hardware,
    pub fetcher: Arc<dyn BlobFetcher>,
    pub engine: Arc<dyn OverlayEngine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttacherOptions {
    /// Fragment describing the identity register itself.
    pub id_reg_overlay: String,
    /// Compatible string of the identity register node.
    pub id_reg_compatible: String,
    /// Queue one identity check right after startup.
    pub startup_check: bool,
}

impl Default for AttacherOptions {
    fn default() -> Self {
        AttacherOptions {
            id_reg_overlay: "axi_id_reg.dtbo".into(),
            id_reg_compatible: "xlnx,my-id-reg-2.0".into(),
            startup_check: false,
        }
    }
}

// Fields drop in declaration order, which is the reverse of acquisition.
struct Running {
    irq: IrqRegistration,
    queue: WorkQueue,
    loader: Arc<OverlayLoader>,
    region: RegionReservation,
    id_fragment: LoadedFragment,
}

pub struct Attacher {
    running: Option<Running>,
    handle: AttacherHandle,
}

/// Snapshot of the attacher for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStatus {
    pub running: bool,
    pub irq_line: u32,
    pub register_base: u64,
    pub identity: Option<u32>,
    pub active: Option<(u32, Option<OverlayId>)>,
}

/// Cloneable access to a running attacher. Becomes inert once the attacher shuts down.
#[derive(Clone)]
pub struct AttacherHandle {
    loader: Weak<OverlayLoader>,
    queue: WorkQueueHandle,
    irq_line: u32,
    register_base: u64,
}

impl AttacherHandle {
    /// Queue an identity check as the interrupt would.
    ///
    /// # Returns: `Result<bool, AttachError>`
    /// * `Ok(true)` - A cycle was scheduled
    /// * `Ok(false)` - A cycle was already pending
    /// * `Err(AttachError::NoDevice)` - The attacher is stopped
    pub fn trigger(&self) -> Result<bool, AttachError> {
        if self.loader.strong_count() == 0 {
            return Err(AttachError::NoDevice("The attacher is stopped".into()));
        }
        Ok(self.queue.queue())
    }

    pub fn status(&self) -> IdentityStatus {
        let loader = self.loader.upgrade();
        IdentityStatus {
            running: loader.is_some(),
            irq_line: self.irq_line,
            register_base: self.register_base,
            identity: loader.as_ref().and_then(|l| l.read_identity().ok()),
            active: loader.as_ref().and_then(|l| l.slot().active()),
        }
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.loader.upgrade()?.last_report()
    }
}

impl Attacher {
    /// Bring the attacher up. Must be called within a tokio runtime.
    ///
    /// # Returns: `Result<Attacher, AttachError>`
    /// * `Ok(Attacher)` - Running; the identity interrupt is live
    /// * `Err(AttachError)` - Nothing acquired during the attempt is still held
    pub fn start(ctx: &AttachContext, options: &AttacherOptions) -> Result<Attacher, AttachError> {
        let accounting = FragmentAccounting::new();
        let firmware = ctx.fetcher.fetch(&options.id_reg_overlay)?;
        let id_fragment =
            load_fragment(&ctx.engine, &accounting, firmware).map_err(|failure| {
                error!("Identity register fragment {}: {failure}", options.id_reg_overlay);
                failure.error
            })?;

        let node = id_fragment
            .overlay_id()
            .map(|id| ctx.engine.devices_added_by(id))
            .unwrap_or_default()
            .into_iter()
            .find(|info| info.node.is_compatible(&options.id_reg_compatible))
            .ok_or_else(|| {
                AttachError::NotFound(format!(
                    "No node compatible with {} in {}",
                    options.id_reg_compatible, options.id_reg_overlay
                ))
            })?;
        let line = node.irq.ok_or_else(|| {
            AttachError::NotFound(format!("{} has no interrupt", node.path))
        })?;
        let resource = node.reg.ok_or_else(|| {
            AttachError::NotFound(format!("{} has no register window", node.path))
        })?;
        let region = ctx.hw.regions.request(resource, REGION_OWNER)?;
        let window = ctx.hw.ioremap(resource.start, ID_REG_WINDOW)?;
        let identity = Arc::new(IdentityRegister::new(window));
        let loader = Arc::new(OverlayLoader::new(
            identity.clone(),
            ctx.fetcher.clone(),
            ctx.engine.clone(),
            accounting,
        ));

        let worker = Arc::downgrade(&loader);
        let queue = WorkQueue::create(
            QUEUE_NAME,
            Arc::new(move || {
                let Some(loader) = worker.upgrade() else {
                    debug!("Attacher is gone, dropping identity check");
                    return;
                };
                match loader.run_cycle() {
                    Ok(attached) => debug!("Cycle done: {attached:?}"),
                    Err(AttachError::NoData(reason)) => debug!("Cycle skipped: {reason}"),
                    Err(e) => debug!("Cycle failed: {e}"),
                }
            }),
        )?;
        let handler = Arc::new(IdentityIrqHandler::new(identity, queue.handle()));
        let irq = ctx.hw.irqs.request(line, IRQ_NAME, handler)?;

        let handle = AttacherHandle {
            loader: Arc::downgrade(&loader),
            queue: queue.handle(),
            irq_line: line,
            register_base: resource.start,
        };
        info!(
            "Identity register at {:#x} attached on interrupt line {line}",
            resource.start
        );
        if options.startup_check {
            debug!("Queueing startup identity check");
            handle.queue.queue();
        }
        Ok(Attacher {
            running: Some(Running {
                irq,
                queue,
                loader,
                region,
                id_fragment,
            }),
            handle,
        })
    }

    pub fn handle(&self) -> AttacherHandle {
        self.handle.clone()
    }

    pub fn irq_line(&self) -> u32 {
        self.handle.irq_line
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Tear everything down in reverse order. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        let Some(running) = self.running.take() else {
            debug!("Attacher is not running");
            return;
        };
        let Running {
            irq,
            queue,
            loader,
            region,
            id_fragment,
        } = running;

        if let Err(e) = loader.close_and_retire() {
            error!("Cannot retire peripheral fragment: {e}");
        }
        drop(irq);
        queue.destroy().await;
        drop(loader);
        drop(region);
        id_fragment.retire();
        info!("Attacher stopped");
    }
}

impl Drop for Attacher {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            if let Err(e) = running.loader.close_and_retire() {
                error!("Cannot retire peripheral fragment: {e}");
            }
        }
    }
}
