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

use crate::attacher::lifecycle::AttacherOptions;
use crate::config::config_files::{AttacherSection, attacher_section_from_file};
use crate::config::{USER_CONFIG_PATH, VENDOR_CONFIG_PATH};
use log::{debug, trace};
use std::path::PathBuf;

/// The merged `[attacher]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttacherConfig {
    pub options: AttacherOptions,
    /// Run against in-memory registers instead of `/dev/mem`.
    pub simulated_registers: bool,
}

impl From<AttacherSection> for AttacherConfig {
    fn from(value: AttacherSection) -> Self {
        let defaults = AttacherOptions::default();
        AttacherConfig {
            options: AttacherOptions {
                id_reg_overlay: value.id_reg_overlay.unwrap_or(defaults.id_reg_overlay),
                id_reg_compatible: value
                    .id_reg_compatible
                    .unwrap_or(defaults.id_reg_compatible),
                startup_check: value.startup_check.unwrap_or(defaults.startup_check),
            },
            simulated_registers: value.simulated_registers.unwrap_or(false),
        }
    }
}

pub fn attacher_config() -> AttacherConfig {
    let vendor_config = attacher_section_from_file(&PathBuf::from(VENDOR_CONFIG_PATH))
        .unwrap_or_else(|e| {
            debug!("No vendor attacher settings: {e}");
            AttacherSection::default()
        });
    let user_config = attacher_section_from_file(&PathBuf::from(USER_CONFIG_PATH))
        .unwrap_or_else(|e| {
            debug!("No user attacher settings: {e}");
            AttacherSection::default()
        });
    let config: AttacherConfig = user_config.merge(vendor_config).into();
    trace!("Resulting attacher config: {config:?}");
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[gtest]
    fn empty_section_gives_defaults() {
        let config: AttacherConfig = AttacherSection::default().into();
        expect_that!(config.options, eq(&AttacherOptions::default()));
        expect_that!(config.simulated_registers, eq(false));
    }

    #[gtest]
    fn provided_keys_win() {
        let config: AttacherConfig = AttacherSection {
            id_reg_compatible: Some("vendor,id-reg".into()),
            startup_check: Some(true),
            ..Default::default()
        }
        .into();
        expect_that!(config.options.id_reg_compatible, eq("vendor,id-reg"));
        expect_that!(config.options.id_reg_overlay, eq("axi_id_reg.dtbo"));
        expect_that!(config.options.startup_check, eq(true));
    }
}
