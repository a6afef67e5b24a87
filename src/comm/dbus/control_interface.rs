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
use crate::comm::dbus::{read_endpoint, write_endpoint};
use crate::drivers::interface::EndpointRegistry;
use log::trace;
use std::sync::Arc;
use zbus::{fdo, interface};

pub struct ControlInterface {
    attacher: AttacherHandle,
    endpoints: Arc<EndpointRegistry>,
}

impl ControlInterface {
    pub fn new(attacher: AttacherHandle, endpoints: Arc<EndpointRegistry>) -> Self {
        ControlInterface {
            attacher,
            endpoints,
        }
    }
}

#[interface(name = "org.devattach.control")]
impl ControlInterface {
    /// Queue an identity check, as if the identity interrupt fired.
    async fn check_identity(&self) -> Result<String, fdo::Error> {
        trace!("check_identity called");
        Ok(match self.attacher.trigger()? {
            true => "Identity check queued".to_string(),
            false => "An identity check is already pending".to_string(),
        })
    }

    async fn read_endpoint(
        &self,
        name: &str,
        offset: u64,
        count: u32,
    ) -> Result<Vec<u8>, fdo::Error> {
        trace!("read_endpoint called with name: {name}, offset: {offset}, count: {count}");
        let endpoints = self.endpoints.clone();
        let name = name.to_string();
        // Endpoint reads touch registers; keep them off the executor threads.
        tokio::task::spawn_blocking(move || read_endpoint(&endpoints, &name, offset, count))
            .await
            .map_err(|e| fdo::Error::Failed(format!("Endpoint read task failed: {e}")))?
            .map_err(Into::into)
    }

    async fn write_endpoint(&self, name: &str, data: Vec<u8>) -> Result<u32, fdo::Error> {
        trace!("write_endpoint called with name: {name} and {} bytes", data.len());
        let endpoints = self.endpoints.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || write_endpoint(&endpoints, &name, &data))
            .await
            .map_err(|e| fdo::Error::Failed(format!("Endpoint write task failed: {e}")))?
            .map_err(Into::into)
    }
}
