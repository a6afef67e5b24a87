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

use crate::proxies::control_proxy;
use zbus::Connection;

pub async fn call_check_identity() -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = control_proxy::ControlProxy::new(&connection).await?;
    proxy.check_identity().await
}

pub async fn call_read_endpoint(
    name: &str,
    offset: u64,
    count: u32,
) -> Result<Vec<u8>, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = control_proxy::ControlProxy::new(&connection).await?;
    proxy.read_endpoint(name, offset, count).await
}

pub async fn call_write_endpoint(name: &str, data: &[u8]) -> Result<u32, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = control_proxy::ControlProxy::new(&connection).await?;
    proxy.write_endpoint(name, data).await
}

/// Text payloads lose their NUL terminator; anything else is shown as hex bytes.
pub fn render_payload(payload: &[u8], hex: bool) -> String {
    let text = payload.strip_suffix(&[0]).unwrap_or(payload);
    match std::str::from_utf8(text) {
        Ok(s) if !hex && s.chars().all(|c| !c.is_control() || c == '\n') => s.to_string(),
        _ => payload
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

pub async fn read_handler(
    name: &str,
    offset: u64,
    count: u32,
    hex: bool,
) -> Result<String, zbus::Error> {
    let payload = call_read_endpoint(name, offset, count).await?;
    Ok(render_payload(&payload, hex))
}

pub async fn write_handler(name: &str, value: &str) -> Result<String, zbus::Error> {
    let written = call_write_endpoint(name, value.as_bytes()).await?;
    Ok(format!("{written} bytes written to {name}"))
}
