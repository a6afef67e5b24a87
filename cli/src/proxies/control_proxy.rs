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

use zbus::{Result, proxy};
#[proxy(
    default_service = "org.devattach",
    interface = "org.devattach.control",
    default_path = "/org/devattach/control"
)]
pub trait Control {
    async fn check_identity(&self) -> Result<String>;
    async fn read_endpoint(&self, name: &str, offset: u64, count: u32) -> Result<Vec<u8>>;
    async fn write_endpoint(&self, name: &str, data: &[u8]) -> Result<u32>;
}
