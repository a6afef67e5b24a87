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

//! The fabric peripheral drivers, shipped together as one driver module.

pub mod led_pwm;
pub mod random;
pub mod switch;
pub mod timer;

use crate::drivers::bus::PlatformBus;
use crate::drivers::module::DriverModule;
use crate::error::AttachError;
use led_pwm::LedPwmDriver;
use log::info;
use random::RandomDriver;
use std::sync::Arc;
use switch::SwitchDriver;
use timer::TimerDriver;

pub const MODULE_NAME: &str = "device_drivers";

/// Load the peripheral driver module: register every driver on `bus`.
///
/// # Returns: `Result<Arc<DriverModule>, AttachError>`
/// * `Ok(Arc<DriverModule>)` - The loaded module, to be unloaded with
///   [`DriverModule::unload`]
/// * `Err(AttachError)` - A driver failed to register; the ones registered before it are
///   unregistered again
pub fn register_all(bus: &PlatformBus) -> Result<Arc<DriverModule>, AttachError> {
    let module = DriverModule::new(MODULE_NAME);
    let registered = LedPwmDriver::register_driver(bus, &module)
        .and_then(|_| SwitchDriver::register_driver(bus, &module))
        .and_then(|_| RandomDriver::register_driver(bus, &module))
        .and_then(|_| TimerDriver::register_driver(bus, &module));
    if let Err(e) = registered {
        bus.unregister_module(MODULE_NAME)?;
        return Err(e);
    }
    info!("Driver module {MODULE_NAME} loaded");
    Ok(module)
}
