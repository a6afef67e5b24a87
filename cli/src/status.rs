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

use crate::proxies::status_proxy;
use zbus::Connection;

pub async fn call_get_identity_status() -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = status_proxy::StatusProxy::new(&connection).await?;
    proxy.get_identity_status().await
}

pub async fn call_get_last_cycle() -> Result<String, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = status_proxy::StatusProxy::new(&connection).await?;
    proxy.get_last_cycle().await
}

pub async fn call_get_endpoints() -> Result<Vec<String>, zbus::Error> {
    let connection = Connection::system().await?;
    let proxy = status_proxy::StatusProxy::new(&connection).await?;
    let list_str = proxy.get_endpoints().await?;
    Ok(list_str.lines().map(|line| line.to_string()).collect())
}

pub async fn status_handler() -> Result<String, zbus::Error> {
    let identity = call_get_identity_status().await?;
    let cycle = call_get_last_cycle().await?;
    Ok(format!(
        "---- IDENTITY ----\n{identity}\n---- LAST CYCLE ----\n{cycle}"
    ))
}

pub async fn endpoints_handler() -> Result<String, zbus::Error> {
    let mut ret_string = String::from(
        "---- ENDPOINTS ----\n\
        | name | major:minor |\n",
    );
    for line in call_get_endpoints().await? {
        if let Some((name, numbers)) = line.split_once(' ') {
            ret_string += format!("| {name} | {numbers} |\n").as_str();
        }
    }
    Ok(ret_string)
}
