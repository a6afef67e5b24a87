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

//! The live device tree and overlay change-sets.
//!
//! Applying an overlay merges each `fragment@N/__overlay__` into its target node and
//! records every change, so that reverting restores the tree exactly. Overlays can only be
//! reverted while no later overlay has modified the nodes they created.

use crate::devicetree::node::{DeviceNode, cells_to_u64, join_path};
use crate::error::AttachError;
use crate::hw::regions::Resource;
use crate::overlay::engine::OverlayId;
use log::{debug, trace};
use std::collections::BTreeMap;

const ROOT_ADDRESS_CELLS: usize = 1;
const ROOT_SIZE_CELLS: usize = 1;
const GIC_SPI_BASE: u32 = 32;
const GIC_PPI_BASE: u32 = 16;

/// A live node together with the resources decoded from its parent's addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub path: String,
    pub node: DeviceNode,
    /// First `reg` entry, if any.
    pub reg: Option<Resource>,
    /// First interrupt, mapped to a controller line.
    pub irq: Option<u32>,
}

#[derive(Debug)]
enum Change {
    NodeAdded {
        path: String,
    },
    PropertySet {
        path: String,
        name: String,
        previous: Option<Vec<u8>>,
    },
}

impl Change {
    fn path(&self) -> &str {
        match self {
            Change::NodeAdded { path } => path,
            Change::PropertySet { path, .. } => path,
        }
    }
}

#[derive(Debug, Default)]
struct ChangeSet {
    changes: Vec<Change>,
    added: Vec<String>,
}

fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

fn is_within(path: &str, ancestor: &str) -> bool {
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn merge(
    target: &mut DeviceNode,
    path: &str,
    content: &DeviceNode,
    set: &mut ChangeSet,
) {
    for property in &content.properties {
        let previous = target.set_property(&property.name, property.value.clone());
        set.changes.push(Change::PropertySet {
            path: path.to_string(),
            name: property.name.clone(),
            previous,
        });
    }
    for child in &content.children {
        let child_path = join_path(path, &child.name);
        match target.child_mut(&child.name) {
            Some(existing) => merge(existing, &child_path, child, set),
            None => {
                trace!("Adding node {child_path}");
                target.children.push(child.clone());
                set.changes.push(Change::NodeAdded {
                    path: child_path.clone(),
                });
                set.added.push(child_path);
            }
        }
    }
}

#[derive(Debug)]
pub struct LiveTree {
    root: DeviceNode,
    applied: BTreeMap<OverlayId, ChangeSet>,
    next_id: u32,
}

impl LiveTree {
    pub fn new(root: DeviceNode) -> Self {
        LiveTree {
            root,
            applied: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn root(&self) -> &DeviceNode {
        &self.root
    }

    pub fn applied(&self) -> usize {
        self.applied.len()
    }

    fn path_of_phandle(&self, phandle: u32) -> Option<String> {
        let mut found = None;
        self.root.walk("/", &mut |path, node| {
            if found.is_none() && node.phandle() == Some(phandle) {
                found = Some(path.to_string());
            }
        });
        found
    }

    fn fragment_target(&self, fragment: &DeviceNode) -> Result<String, AttachError> {
        if let Some(path) = fragment.prop_str("target-path") {
            return match self.root.find(path) {
                Some(_) => Ok(path.to_string()),
                None => Err(AttachError::ActivationFailed(format!(
                    "{}: target path {path} does not exist",
                    fragment.name
                ))),
            };
        }
        if let Some(phandle) = fragment.prop_u32("target") {
            return self.path_of_phandle(phandle).ok_or_else(|| {
                AttachError::ActivationFailed(format!(
                    "{}: no node carries target phandle {phandle:#x}",
                    fragment.name
                ))
            });
        }
        Err(AttachError::ActivationFailed(format!(
            "{} has neither target nor target-path",
            fragment.name
        )))
    }

    /// Merge every fragment of `overlay` into the tree.
    ///
    /// # Returns: `Result<(OverlayId, Vec<String>), AttachError>`
    /// * `Ok((id, added))` - The overlay id and the paths of the nodes it created
    /// * `Err(AttachError::ActivationFailed)` - No fragment, or a target that does not
    ///   exist; the tree is left untouched
    pub fn apply(&mut self, overlay: &DeviceNode) -> Result<(OverlayId, Vec<String>), AttachError> {
        let fragments: Vec<(&DeviceNode, &DeviceNode)> = overlay
            .children
            .iter()
            .filter_map(|f| f.child("__overlay__").map(|content| (f, content)))
            .collect();
        if fragments.is_empty() {
            return Err(AttachError::ActivationFailed(
                "overlay carries no fragments".into(),
            ));
        }
        let targets = fragments
            .iter()
            .map(|(fragment, content)| Ok((self.fragment_target(fragment)?, *content)))
            .collect::<Result<Vec<_>, AttachError>>()?;

        let mut set = ChangeSet::default();
        for (path, content) in targets {
            let Some(target) = self.root.find_mut(&path) else {
                self.undo(set);
                return Err(AttachError::ActivationFailed(format!(
                    "target {path} vanished while applying"
                )));
            };
            merge(target, &path, content, &mut set);
        }

        let id = OverlayId(self.next_id);
        self.next_id += 1;
        let added = set.added.clone();
        debug!("Applied {id}: {} changes, {} new nodes", set.changes.len(), added.len());
        self.applied.insert(id, set);
        Ok((id, added))
    }

    /// Check that `id` is applied and that no later overlay builds on nodes it created.
    pub fn check_removable(&self, id: OverlayId) -> Result<(), AttachError> {
        let set = self
            .applied
            .get(&id)
            .ok_or_else(|| AttachError::NotFound(format!("{id} is not applied")))?;
        for (later_id, later) in self.applied.range(id..).skip(1) {
            if let Some(change) = later.changes.iter().find(|change| {
                set.added
                    .iter()
                    .any(|added| is_within(change.path(), added))
            }) {
                return Err(AttachError::Busy(format!(
                    "{later_id} modifies {} which {id} created",
                    change.path()
                )));
            }
        }
        Ok(())
    }

    /// Undo every change of `id`, most recent first.
    pub fn revert(&mut self, id: OverlayId) -> Result<(), AttachError> {
        self.check_removable(id)?;
        if let Some(set) = self.applied.remove(&id) {
            self.undo(set);
            debug!("Reverted {id}");
        }
        Ok(())
    }

    fn undo(&mut self, set: ChangeSet) {
        for change in set.changes.into_iter().rev() {
            match change {
                Change::NodeAdded { path } => {
                    let name = path.rsplit('/').next().unwrap_or_default();
                    if let Some(parent) = self.root.find_mut(parent_path(&path)) {
                        parent.remove_child(name);
                    }
                }
                Change::PropertySet {
                    path,
                    name,
                    previous,
                } => {
                    if let Some(node) = self.root.find_mut(&path) {
                        match previous {
                            Some(value) => {
                                node.set_property(&name, value);
                            }
                            None => {
                                node.remove_property(&name);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Paths of the nodes created by `id`.
    pub fn added_by(&self, id: OverlayId) -> Vec<String> {
        self.applied
            .get(&id)
            .map(|set| set.added.clone())
            .unwrap_or_default()
    }

    fn lineage(&self, path: &str) -> Option<Vec<&DeviceNode>> {
        let mut current = &self.root;
        let mut nodes = vec![current];
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = current.child(part)?;
            nodes.push(current);
        }
        Some(nodes)
    }

    fn interrupt_cells(&self, lineage: &[&DeviceNode]) -> Option<usize> {
        let phandle = lineage
            .iter()
            .rev()
            .find_map(|node| node.prop_u32("interrupt-parent"))?;
        let controller = self.path_of_phandle(phandle)?;
        self.root
            .find(&controller)?
            .prop_u32("#interrupt-cells")
            .map(|cells| cells as usize)
    }

    /// Decode the node at `path` into a [`NodeInfo`].
    pub fn node_info(&self, path: &str) -> Option<NodeInfo> {
        let lineage = self.lineage(path)?;
        let node = *lineage.last()?;
        let parent = lineage.len().checked_sub(2).map(|i| lineage[i]);
        let address_cells = parent
            .and_then(|p| p.prop_u32("#address-cells"))
            .map_or(ROOT_ADDRESS_CELLS, |c| c as usize);
        let size_cells = parent
            .and_then(|p| p.prop_u32("#size-cells"))
            .map_or(ROOT_SIZE_CELLS, |c| c as usize);

        let reg = node.prop_cells("reg").and_then(|cells| {
            (cells.len() >= address_cells + size_cells && size_cells > 0).then(|| {
                Resource::new(
                    cells_to_u64(&cells[..address_cells]),
                    cells_to_u64(&cells[address_cells..address_cells + size_cells]),
                )
            })
        });

        let irq = node.prop_cells("interrupts").and_then(|cells| {
            let width = self.interrupt_cells(&lineage).unwrap_or(if cells.len() >= 3 {
                3
            } else {
                1
            });
            let line = match (width, cells.as_slice()) {
                (3, [0, number, ..]) => number.checked_add(GIC_SPI_BASE),
                (3, [1, number, ..]) => number.checked_add(GIC_PPI_BASE),
                (_, [number, ..]) => Some(*number),
                _ => None,
            };
            if line.is_none() {
                debug!("{path}: interrupt specifier {cells:x?} has no line");
            }
            line.filter(|line| *line != 0)
        });

        Some(NodeInfo {
            path: if path.is_empty() { "/".into() } else { path.to_string() },
            node: node.clone(),
            reg,
            irq,
        })
    }

    /// First available node compatible with `compatible`, in tree order.
    pub fn find_compatible(&self, compatible: &str) -> Option<NodeInfo> {
        let mut found = None;
        self.root.walk("/", &mut |path, node| {
            if found.is_none() && node.is_available() && node.is_compatible(compatible) {
                found = Some(path.to_string());
            }
        });
        self.node_info(&found?)
    }

    /// Every available node carrying a `compatible` inside the subtrees rooted at `paths`.
    pub fn devices_under(&self, paths: &[String]) -> Vec<NodeInfo> {
        let mut device_paths = Vec::new();
        for path in paths {
            if let Some(subtree) = self.root.find(path) {
                subtree.walk(path, &mut |p, node| {
                    if node.is_available() && !node.compatible().is_empty() {
                        device_paths.push(p.to_string());
                    }
                });
            }
        }
        device_paths
            .iter()
            .filter_map(|p| self.node_info(p))
            .collect()
    }
}
