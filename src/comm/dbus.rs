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

//! DBus surface of the daemon.
//!
//! Both interfaces are thin: they format what the attacher handle and the endpoint registry
//! report, and proxy endpoint reads and writes. The helpers below carry the logic so they
//! can be tested without a bus.

pub mod control_interface;
pub mod status_interface;

use crate::attacher::lifecycle::IdentityStatus;
use crate::attacher::loader::CycleReport;
use crate::drivers::interface::{EndpointInfo, EndpointRegistry};
use crate::error::AttachError;
use log::trace;

pub static SERVICE_NAME: &str = "org.devattach";
pub static STATUS_PATH: &str = "/org/devattach/status";
pub static CONTROL_PATH: &str = "/org/devattach/control";

/// Largest single read served over DBus.
pub const MAX_READ: u32 = 4096;

pub fn format_identity_status(status: &IdentityStatus) -> String {
    let mut ret_string = String::new();
    ret_string += format!("running: {}\n", status.running).as_str();
    ret_string += format!("register: {:#x}\n", status.register_base).as_str();
    ret_string += format!("irq: {}\n", status.irq_line).as_str();
    ret_string += match status.identity {
        Some(identity) => format!("identity: {identity}\n"),
        None => "identity: unknown\n".to_string(),
    }
    .as_str();
    ret_string += match status.active {
        Some((identity, Some(overlay))) => format!("active: dev_{identity}.dtbo as {overlay}\n"),
        Some((identity, None)) => format!("active: dev_{identity}.dtbo\n"),
        None => "active: none\n".to_string(),
    }
    .as_str();
    ret_string
}

pub fn format_cycle_report(report: Option<&CycleReport>) -> String {
    let Some(report) = report else {
        return "No load cycle has run yet\n".into();
    };
    let mut ret_string = match report.identity {
        Some(identity) => format!("identity: {identity}\n"),
        None => "identity: unknown\n".to_string(),
    };
    ret_string += format!("state: {}\n", report.state).as_str();
    if let Some(stage) = report.failed_stage {
        ret_string += format!("failed stage: {stage}\n").as_str();
    }
    if let Some(overlay) = report.overlay {
        ret_string += format!("overlay: {overlay}\n").as_str();
    }
    if let Some(error) = &report.error {
        ret_string += format!("error: {error}\n").as_str();
    }
    ret_string
}

pub fn format_endpoints(endpoints: &[EndpointInfo]) -> String {
    endpoints
        .iter()
        .map(|e| format!("{} {}:{}\n", e.name, e.major, e.minor))
        .collect()
}

/// Open `name`, read up to `count` bytes at `offset`, close it again.
pub fn read_endpoint(
    registry: &EndpointRegistry,
    name: &str,
    offset: u64,
    count: u32,
) -> Result<Vec<u8>, AttachError> {
    if count > MAX_READ {
        return Err(AttachError::Argument(format!(
            "Cannot read {count} bytes from {name}, the limit is {MAX_READ}"
        )));
    }
    trace!("Reading {count} bytes from {name} at {offset}");
    let mut file = registry.open(name)?;
    file.seek(offset);
    let mut buf = vec![0u8; count as usize];
    let len = file.read(&mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

/// Open `name`, write `data` at offset 0, close it again. Returns the bytes consumed.
pub fn write_endpoint(
    registry: &EndpointRegistry,
    name: &str,
    data: &[u8],
) -> Result<u32, AttachError> {
    trace!("Writing {} bytes to {name}", data.len());
    let mut file = registry.open(name)?;
    let written = file.write(data)?;
    u32::try_from(written)
        .map_err(|_| AttachError::Internal(format!("{name} reports {written} bytes written")))
}
