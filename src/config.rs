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

//! Daemon configuration.
//!
//! Two TOML files are read, `/usr/lib/devattach/config.toml` (vendor) and
//! `/etc/devattach/config.toml` (user). Every key is optional: user values override vendor
//! values, which override the hardcoded defaults. A missing or broken file only costs a
//! warning.

pub mod attacher_config;
pub mod config_files;
pub mod system_config;

pub use attacher_config::{AttacherConfig, attacher_config};
pub use system_config::{
    base_tree_path, devmem_path, firmware_source_dir, system_config, system_config_guard,
    uio_device,
};

pub static VENDOR_CONFIG_PATH: &str = "/usr/lib/devattach/config.toml";
pub static USER_CONFIG_PATH: &str = "/etc/devattach/config.toml";
