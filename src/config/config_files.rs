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

use crate::config::system_config;
use crate::error::AttachError;
use crate::system_io::fs_read;
use log::trace;
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;

/// This is the top level struct which holds all sections
#[derive(Debug, Deserialize)]
pub(crate) struct TomlConfig {
    system_paths: Option<SystemPaths>,
    attacher: Option<AttacherSection>,
}

/// This is the "system_paths" section struct
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SystemPaths {
    firmware_source_dir: Option<String>,
    devmem_path: Option<String>,
    base_tree_path: Option<String>,
    uio_device: Option<String>,
}

/// This is the "attacher" section struct
#[derive(Debug, Default, Deserialize)]
pub struct AttacherSection {
    pub id_reg_overlay: Option<String>,
    pub id_reg_compatible: Option<String>,
    pub startup_check: Option<bool>,
    pub simulated_registers: Option<bool>,
}

impl From<SystemPaths> for system_config::SystemConfig {
    fn from(value: SystemPaths) -> Self {
        trace!("Creating Config (with Mutex) from {value:?}");
        system_config::SystemConfig {
            firmware_source_dir: Mutex::new(value.firmware_source_dir.unwrap_or_else(|| {
                trace!("No firmware_source_dir provided. Using hardcoded value.");
                system_config::FIRMWARE_SOURCE_DIR.to_string()
            })),
            devmem_path: Mutex::new(value.devmem_path.unwrap_or_else(|| {
                trace!("No devmem_path provided. Using hardcoded value.");
                system_config::DEVMEM_PATH.to_string()
            })),
            base_tree_path: Mutex::new(value.base_tree_path.unwrap_or_else(|| {
                trace!("No base_tree_path provided. Using hardcoded value.");
                system_config::BASE_TREE_PATH.to_string()
            })),
            uio_device: Mutex::new(value.uio_device),
        }
    }
}

impl SystemPaths {
    pub(crate) fn merge(self, fallback: SystemPaths) -> SystemPaths {
        SystemPaths {
            firmware_source_dir: self.firmware_source_dir.or(fallback.firmware_source_dir),
            devmem_path: self.devmem_path.or(fallback.devmem_path),
            base_tree_path: self.base_tree_path.or(fallback.base_tree_path),
            uio_device: self.uio_device.or(fallback.uio_device),
        }
    }
}

impl AttacherSection {
    pub(crate) fn merge(self, fallback: AttacherSection) -> AttacherSection {
        AttacherSection {
            id_reg_overlay: self.id_reg_overlay.or(fallback.id_reg_overlay),
            id_reg_compatible: self.id_reg_compatible.or(fallback.id_reg_compatible),
            startup_check: self.startup_check.or(fallback.startup_check),
            simulated_registers: self.simulated_registers.or(fallback.simulated_registers),
        }
    }
}

fn toml_str_to_config(toml_string: &str) -> Result<TomlConfig, AttachError> {
    let config: TomlConfig = match toml::from_str(toml_string) {
        Ok(config) => config,
        Err(e) => {
            return Err(AttachError::TomlDe {
                toml_string: toml_string.into(),
                e,
            });
        }
    };
    Ok(config)
}

fn config_from_file(file_path: &Path) -> Result<TomlConfig, AttachError> {
    if !file_path.is_file() {
        return Err(AttachError::Internal(format!(
            "Config file not found in {file_path:?}"
        )));
    }
    toml_str_to_config(&fs_read(file_path)?)
}

pub(crate) fn system_paths_config_from_file(file_path: &Path) -> Result<SystemPaths, AttachError> {
    match config_from_file(file_path)?.system_paths {
        Some(system_paths) => Ok(system_paths),
        None => Err(AttachError::Internal(
            "config file did not contain a `[system_paths]` section.".to_string(),
        )),
    }
}

pub fn attacher_section_from_file(file_path: &Path) -> Result<AttacherSection, AttachError> {
    match config_from_file(file_path)?.attacher {
        Some(attacher) => Ok(attacher),
        None => Err(AttachError::Internal(
            "config file did not contain an `[attacher]` section.".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[gtest]
    fn user_values_override_vendor_values() {
        let vendor = toml_str_to_config(
            r#"
            [system_paths]
            firmware_source_dir = "/usr/lib/firmware/"
            devmem_path = "/dev/mem"

            [attacher]
            startup_check = true
            id_reg_overlay = "vendor_id_reg.dtbo"
            "#,
        )
        .expect("vendor config");
        let user = toml_str_to_config(
            r#"
            [system_paths]
            firmware_source_dir = "/srv/firmware/"

            [attacher]
            startup_check = false
            "#,
        )
        .expect("user config");

        let paths = user
            .system_paths
            .unwrap_or_default()
            .merge(vendor.system_paths.unwrap_or_default());
        expect_that!(paths.firmware_source_dir, some(eq("/srv/firmware/")));
        expect_that!(paths.devmem_path, some(eq("/dev/mem")));
        expect_that!(paths.uio_device, none());

        let attacher = user
            .attacher
            .unwrap_or_default()
            .merge(vendor.attacher.unwrap_or_default());
        expect_that!(attacher.startup_check, some(eq(false)));
        expect_that!(attacher.id_reg_overlay, some(eq("vendor_id_reg.dtbo")));
    }

    #[gtest]
    fn missing_keys_fall_back_to_hardcoded_values() {
        let config: system_config::SystemConfig = SystemPaths::default().into();
        expect_that!(
            config.firmware_source_dir.lock().unwrap().clone(),
            eq(system_config::FIRMWARE_SOURCE_DIR)
        );
        expect_that!(config.uio_device.lock().unwrap().clone(), none());
    }

    #[gtest]
    fn malformed_toml_is_reported() {
        assert_that!(
            toml_str_to_config("[system_paths\nfirmware_source_dir = 1"),
            err(displays_as(contains_substring("AttachError::TomlDe")))
        );
    }
}
