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

//! Phandle resolution for detached overlay trees.
//!
//! An overlay compiled with `dtc -@` carries its own phandles numbered from 1, a
//! `__local_fixups__` node listing every cell that refers to one of those local phandles,
//! and a `__fixups__` node listing every cell that refers to a label of the base tree.
//! Resolution renumbers the local phandles above the highest phandle of the live tree,
//! patches the local references accordingly, then patches the external references using
//! the live tree's `__symbols__`.

use crate::devicetree::node::DeviceNode;
use crate::error::AttachError;
use log::{debug, trace};

const PHANDLE_ILLEGAL: u32 = 0xffff_ffff;

fn max_phandle(node: &DeviceNode) -> u32 {
    node.children
        .iter()
        .map(max_phandle)
        .fold(node.phandle().unwrap_or(0), u32::max)
}

fn renumber(old: u32, delta: u32) -> Result<u32, AttachError> {
    old.checked_add(delta)
        .filter(|new| *new != PHANDLE_ILLEGAL)
        .ok_or_else(|| {
            AttachError::Unresolvable(format!("phandle {old:#x} cannot be moved up by {delta}"))
        })
}

fn adjust_phandles(node: &mut DeviceNode, delta: u32) -> Result<(), AttachError> {
    let node_name = node.name.clone();
    for name in ["phandle", "linux,phandle"] {
        if let Some(raw) = node.property_mut(name) {
            if raw.len() != 4 {
                return Err(AttachError::Unresolvable(format!(
                    "{name} of {node_name:?} is {} bytes long",
                    raw.len()
                )));
            }
            let old = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            if old != 0 && old != PHANDLE_ILLEGAL {
                raw.copy_from_slice(&renumber(old, delta)?.to_be_bytes());
            }
        }
    }
    for child in node.children.iter_mut() {
        adjust_phandles(child, delta)?;
    }
    Ok(())
}

fn patch_cell(
    node: &mut DeviceNode,
    property: &str,
    offset: usize,
    patch: impl FnOnce(u32) -> Result<u32, AttachError>,
) -> Result<(), AttachError> {
    let node_name = node.name.clone();
    let raw = node.property_mut(property).ok_or_else(|| {
        AttachError::Unresolvable(format!("{node_name:?} has no property {property}"))
    })?;
    let cell = offset
        .checked_add(4)
        .and_then(|end| raw.get_mut(offset..end))
        .ok_or_else(|| {
            AttachError::Unresolvable(format!(
                "offset {offset} is outside {property} of {node_name:?}"
            ))
        })?;
    let old = u32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]);
    cell.copy_from_slice(&patch(old)?.to_be_bytes());
    Ok(())
}

/// Walk `fixups` (a `__local_fixups__` subtree) alongside `node`, adding `delta` to every
/// listed cell.
fn apply_local_fixups(
    node: &mut DeviceNode,
    fixups: &DeviceNode,
    delta: u32,
) -> Result<(), AttachError> {
    for entry in &fixups.properties {
        if entry.value.len() % 4 != 0 {
            return Err(AttachError::Unresolvable(format!(
                "malformed local fixup {} under {:?}",
                entry.name, fixups.name
            )));
        }
        for offset in entry.value.chunks_exact(4) {
            let offset = u32::from_be_bytes([offset[0], offset[1], offset[2], offset[3]]);
            patch_cell(node, &entry.name, offset as usize, |old| renumber(old, delta))?;
        }
    }
    for fixup_child in &fixups.children {
        let child = node.child_mut(&fixup_child.name).ok_or_else(|| {
            AttachError::Unresolvable(format!(
                "local fixup refers to missing node {:?}",
                fixup_child.name
            ))
        })?;
        apply_local_fixups(child, fixup_child, delta)?;
    }
    Ok(())
}

/// Split a `__fixups__` entry of the form `<path>:<property>:<offset>`.
fn parse_fixup(entry: &str) -> Result<(&str, &str, usize), AttachError> {
    let mut parts = entry.rsplitn(3, ':');
    let (Some(offset), Some(property), Some(path)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(AttachError::Unresolvable(format!(
            "malformed fixup entry {entry:?}"
        )));
    };
    let offset = offset.parse::<usize>().map_err(|e| {
        AttachError::Unresolvable(format!("bad offset in fixup entry {entry:?}: {e}"))
    })?;
    Ok((path, property, offset))
}

fn apply_external_fixups(
    overlay: &mut DeviceNode,
    fixups: &DeviceNode,
    live: &DeviceNode,
) -> Result<(), AttachError> {
    for label in &fixups.properties {
        let symbol_path = live
            .find("/__symbols__")
            .and_then(|symbols| symbols.prop_str(&label.name))
            .ok_or_else(|| {
                AttachError::Unresolvable(format!(
                    "label {} is not exported by the live tree",
                    label.name
                ))
            })?;
        let phandle = live
            .find(symbol_path)
            .and_then(DeviceNode::phandle)
            .ok_or_else(|| {
                AttachError::Unresolvable(format!(
                    "label {} points at {symbol_path} which has no phandle",
                    label.name
                ))
            })?;
        for entry in fixups.prop_strs(&label.name) {
            let (path, property, offset) = parse_fixup(entry)?;
            let target = overlay.find_mut(path).ok_or_else(|| {
                AttachError::Unresolvable(format!("fixup target {path} is missing"))
            })?;
            trace!("{path}:{property}:{offset} -> {} ({phandle})", label.name);
            patch_cell(target, property, offset, |_| Ok(phandle))?;
        }
    }
    Ok(())
}

/// Resolve all phandle references of a detached overlay against the live tree.
///
/// # Returns: `Result<(), AttachError>`
/// * `Ok(())` - Every reference was patched in place
/// * `Err(AttachError::Unresolvable)` - A label, node, property or offset could not be
///   resolved
pub fn resolve_references(overlay: &mut DeviceNode, live: &DeviceNode) -> Result<(), AttachError> {
    let delta = max_phandle(live);
    debug!("Renumbering overlay phandles by {delta}");
    adjust_phandles(overlay, delta)?;

    if let Some(local_fixups) = overlay.remove_child("__local_fixups__") {
        apply_local_fixups(overlay, &local_fixups, delta)?;
        overlay.children.push(local_fixups);
    }
    if let Some(fixups) = overlay.child("__fixups__").cloned() {
        apply_external_fixups(overlay, &fixups, live)?;
    }
    Ok(())
}
