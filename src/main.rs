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

use devattach::attacher::lifecycle::{AttachContext, Attacher};
use devattach::comm::dbus::control_interface::ControlInterface;
use devattach::comm::dbus::status_interface::StatusInterface;
use devattach::comm::dbus::{CONTROL_PATH, SERVICE_NAME, STATUS_PATH};
use devattach::config;
use devattach::devicetree::engine::DeviceTreeEngine;
use devattach::devicetree::fdt;
use devattach::devicetree::node::DeviceNode;
use devattach::drivers::bus::PlatformBus;
use devattach::drivers::interface::EndpointRegistry;
use devattach::drivers::peripherals;
use devattach::error::AttachError;
use devattach::hw::Hardware;
use devattach::hw::registers::{DevMemBus, RegisterBus, SimulatedBus};
use devattach::hw::uio::spawn_uio_listener;
use devattach::overlay::fetcher::FirmwareDir;
use devattach::system_io::fs_read_bytes;
use log::{info, warn};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use zbus::connection;

fn register_bus(simulated: bool) -> Result<Arc<dyn RegisterBus>, AttachError> {
    if simulated {
        warn!("Using simulated registers; no hardware will be touched");
        return Ok(Arc::new(SimulatedBus::new()));
    }
    Ok(Arc::new(DevMemBus::open(Path::new(&config::devmem_path()?))?))
}

/// The live tree overlays are applied to. Falls back to an empty root.
fn load_base_tree() -> DeviceNode {
    let loaded = config::base_tree_path()
        .and_then(|path| fs_read_bytes(Path::new(&path)))
        .and_then(|blob| fdt::unflatten(&blob));
    match loaded {
        Ok(root) => root,
        Err(e) => {
            warn!("Starting from an empty device tree: {e}");
            DeviceNode::new("")
        }
    }
}

/// Main entry point for the devattach daemon.
///
/// Loads the peripheral driver module, starts the attacher against the configured register
/// backend, serves the status and control interfaces on the system bus and shuts everything
/// down in reverse order on Ctrl-C / SIGINT.
///
/// # Environment Variables
///
/// - `RUST_LOG` - Controls logging level (`trace`, `debug`, `info`, `warn`, `error`
///   or `off`). Defaults to `info`
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let settings = config::attacher_config();

    let hw = Hardware::new(register_bus(settings.simulated_registers)?);
    let endpoints = Arc::new(EndpointRegistry::default());
    let bus = Arc::new(PlatformBus::new(hw.clone(), endpoints.clone()));
    let module = peripherals::register_all(&bus)?;
    let engine = Arc::new(DeviceTreeEngine::with_observer(
        load_base_tree(),
        bus.clone(),
    ));
    let ctx = AttachContext {
        hw: hw.clone(),
        fetcher: Arc::new(FirmwareDir::new(Path::new(&config::firmware_source_dir()?))),
        engine,
    };

    let mut attacher = Attacher::start(&ctx, &settings.options)?;
    let uio_listener = match config::uio_device()? {
        Some(uio) => Some(spawn_uio_listener(
            Path::new(&uio),
            hw.irqs.clone(),
            attacher.irq_line(),
        )?),
        None => None,
    };

    let status_interface = StatusInterface::new(attacher.handle(), endpoints.clone());
    let control_interface = ControlInterface::new(attacher.handle(), endpoints);
    let _conn = connection::Builder::system()?
        .name(SERVICE_NAME)?
        .serve_at(STATUS_PATH, status_interface)?
        .serve_at(CONTROL_PATH, control_interface)?
        .build()
        .await?;
    info!("Started {SERVICE_NAME} dbus service");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    if let Some(listener) = &uio_listener {
        listener.stop();
    }
    attacher.shutdown().await;
    if let Err(e) = module.unload(&bus) {
        warn!("Leaving driver module loaded: {e}");
    }
    Ok(())
}
