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

use crate::attacher::lifecycle::AttacherHandle;
use crate::comm::dbus::{format_cycle_report, format_endpoints, format_identity_status};
use crate::drivers::interface::EndpointRegistry;
use log::info;
use std::sync::Arc;
use zbus::{fdo, interface};

pub struct StatusInterface {
    attacher: AttacherHandle,
    endpoints: Arc<EndpointRegistry>,
}

impl StatusInterface {
    pub fn new(attacher: AttacherHandle, endpoints: Arc<EndpointRegistry>) -> Self {
        StatusInterface {
            attacher,
            endpoints,
        }
    }
}

#[interface(name = "org.devattach.status")]
impl StatusInterface {
    async fn get_identity_status(&self) -> Result<String, fdo::Error> {
        info!("get_identity_status called");
        Ok(format_identity_status(&self.attacher.status()))
    }

    async fn get_last_cycle(&self) -> Result<String, fdo::Error> {
        info!("get_last_cycle called");
        Ok(format_cycle_report(self.attacher.last_report().as_ref()))
    }

    async fn get_endpoints(&self) -> Result<String, fdo::Error> {
        info!("get_endpoints called");
        Ok(format_endpoints(&self.endpoints.endpoints()))
    }
}
