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

//! Owned, mutable device-tree nodes.

/// A named property with its raw big-endian payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceNode {
    /// Unit name including the unit address, e.g. `sw@41200000`. Empty for the root.
    pub name: String,
    pub properties: Vec<Property>,
    pub children: Vec<DeviceNode>,
}

/// Join a node path and a child unit name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() || parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn be_cells(value: &[u8]) -> Option<Vec<u32>> {
    if value.len() % 4 != 0 {
        return None;
    }
    Some(
        value
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Combine `cells` big-endian 32-bit cells into one number.
pub fn cells_to_u64(cells: &[u32]) -> u64 {
    cells
        .iter()
        .fold(0u64, |acc, cell| (acc << 32) | u64::from(*cell))
}

impl DeviceNode {
    pub fn new(name: impl Into<String>) -> Self {
        DeviceNode {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, name: &str, value: Vec<u8>) -> Self {
        self.set_property(name, value);
        self
    }

    /// Add a NUL-terminated string property.
    pub fn with_str(self, name: &str, value: &str) -> Self {
        self.with_strs(name, &[value])
    }

    /// Add a string-list property.
    pub fn with_strs(self, name: &str, values: &[&str]) -> Self {
        let mut raw = Vec::new();
        for value in values {
            raw.extend_from_slice(value.as_bytes());
            raw.push(0);
        }
        self.with_property(name, raw)
    }

    /// Add a property made of big-endian 32-bit cells.
    pub fn with_u32s(self, name: &str, cells: &[u32]) -> Self {
        let raw = cells.iter().flat_map(|c| c.to_be_bytes()).collect();
        self.with_property(name, raw)
    }

    pub fn with_child(mut self, child: DeviceNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn property(&self, name: &str) -> Option<&[u8]> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_slice())
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        self.properties
            .iter_mut()
            .find(|p| p.name == name)
            .map(|p| &mut p.value)
    }

    /// Insert or replace a property, returning the previous payload.
    pub fn set_property(&mut self, name: &str, value: Vec<u8>) -> Option<Vec<u8>> {
        match self.property_mut(name) {
            Some(existing) => Some(std::mem::replace(existing, value)),
            None => {
                self.properties.push(Property {
                    name: name.to_string(),
                    value,
                });
                None
            }
        }
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Vec<u8>> {
        let index = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(index).value)
    }

    pub fn prop_cells(&self, name: &str) -> Option<Vec<u32>> {
        be_cells(self.property(name)?)
    }

    pub fn prop_u32(&self, name: &str) -> Option<u32> {
        self.prop_cells(name)?.first().copied()
    }

    pub fn prop_strs(&self, name: &str) -> Vec<&str> {
        match self.property(name) {
            Some(raw) => raw
                .split(|b| *b == 0)
                .filter(|s| !s.is_empty())
                .filter_map(|s| std::str::from_utf8(s).ok())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn prop_str(&self, name: &str) -> Option<&str> {
        self.prop_strs(name).into_iter().next()
    }

    pub fn compatible(&self) -> Vec<&str> {
        self.prop_strs("compatible")
    }

    pub fn is_compatible(&self, compatible: &str) -> bool {
        self.compatible().contains(&compatible)
    }

    /// A node without `status`, or with `status = "okay"`, is available.
    pub fn is_available(&self) -> bool {
        match self.prop_str("status") {
            None => true,
            Some(status) => status == "okay" || status == "ok",
        }
    }

    pub fn phandle(&self) -> Option<u32> {
        self.prop_u32("phandle")
            .or_else(|| self.prop_u32("linux,phandle"))
    }

    pub fn child(&self, name: &str) -> Option<&DeviceNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut DeviceNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn remove_child(&mut self, name: &str) -> Option<DeviceNode> {
        let index = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(index))
    }

    /// Look up a node by absolute path relative to this node (`/` is this node).
    pub fn find(&self, path: &str) -> Option<&DeviceNode> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self, |node, part| node.child(part))
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut DeviceNode> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self, |node, part| node.child_mut(part))
    }

    /// Visit this node and every descendant in pre-order, with the absolute path of each
    /// node computed from `path`.
    pub fn walk<'a>(&'a self, path: &str, visit: &mut impl FnMut(&str, &'a DeviceNode)) {
        visit(path, self);
        for child in &self.children {
            child.walk(&join_path(path, &child.name), visit);
        }
    }

    /// True for a node carrying neither properties nor children.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.children.is_empty()
    }
}
