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

use crate::config::config_files::{SystemPaths, system_paths_config_from_file};
use crate::config::{USER_CONFIG_PATH, VENDOR_CONFIG_PATH};
use crate::error::AttachError;
use log::{trace, warn};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock};

// These are hardcoded backups to prevent crashing and lockups when accessing the config file
// or Mutex values
pub static FIRMWARE_SOURCE_DIR: &str = "/lib/firmware/";
pub static DEVMEM_PATH: &str = "/dev/mem";
pub static BASE_TREE_PATH: &str = "/sys/firmware/fdt";

#[derive(Debug)]
pub struct SystemConfig {
    pub(crate) firmware_source_dir: Mutex<String>,
    pub(crate) devmem_path: Mutex<String>,
    pub(crate) base_tree_path: Mutex<String>,
    pub(crate) uio_device: Mutex<Option<String>>,
}

static CONFIG: OnceLock<Mutex<SystemConfig>> = OnceLock::new();

fn read_field<T: Clone>(field: &Mutex<T>, name: &str) -> Result<T, AttachError> {
    match field.try_lock() {
        Ok(guard) => Ok(guard.clone()),
        Err(e) => Err(AttachError::Internal(format!(
            "Failed when locking {name} for read access: {e}"
        ))),
    }
}

impl SystemConfig {
    fn firmware_source_dir(&self) -> Result<String, AttachError> {
        read_field(&self.firmware_source_dir, "firmware_source_dir")
    }

    fn devmem_path(&self) -> Result<String, AttachError> {
        read_field(&self.devmem_path, "devmem_path")
    }

    fn base_tree_path(&self) -> Result<String, AttachError> {
        read_field(&self.base_tree_path, "base_tree_path")
    }

    fn uio_device(&self) -> Result<Option<String>, AttachError> {
        read_field(&self.uio_device, "uio_device")
    }
}

/// User config overrides vendor config and vendor config overrides hardcoded defaults
fn init_system_config() -> Mutex<SystemConfig> {
    let vendor_config = system_paths_config_from_file(&PathBuf::from(VENDOR_CONFIG_PATH))
        .unwrap_or_else(|e| {
            warn!("Using hardcoded paths for vendor config because loading config failed: {e}");
            SystemPaths::default()
        });
    let user_config = system_paths_config_from_file(&PathBuf::from(USER_CONFIG_PATH))
        .unwrap_or_else(|e| {
            warn!("Using hardcoded paths for user config because loading config failed: {e}");
            SystemPaths::default()
        });
    trace!("Merging user_config: {user_config:?} with vendor_config {vendor_config:?}");
    let merged = user_config.merge(vendor_config);
    let ret = Mutex::new(merged.into());
    trace!("Resulting config: {ret:?}");
    ret
}

pub fn system_config() -> &'static Mutex<SystemConfig> {
    CONFIG.get_or_init(init_system_config)
}

pub fn system_config_guard() -> Result<MutexGuard<'static, SystemConfig>, AttachError> {
    let guard = match system_config().try_lock() {
        Ok(guard) => guard,
        Err(e) => {
            return Err(AttachError::Internal(format!(
                "Failed when locking config for read access: {e}"
            )));
        }
    };
    Ok(guard)
}

pub fn firmware_source_dir() -> Result<String, AttachError> {
    let guard = system_config_guard()?;
    guard.firmware_source_dir()
}

pub fn devmem_path() -> Result<String, AttachError> {
    let guard = system_config_guard()?;
    guard.devmem_path()
}

pub fn base_tree_path() -> Result<String, AttachError> {
    let guard = system_config_guard()?;
    guard.base_tree_path()
}

pub fn uio_device() -> Result<Option<String>, AttachError> {
    let guard = system_config_guard()?;
    guard.uio_device()
}
