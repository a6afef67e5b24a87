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

//! In-process overlay engine over a [`LiveTree`].

use crate::devicetree::fdt;
use crate::devicetree::live_tree::{LiveTree, NodeInfo};
use crate::devicetree::node::DeviceNode;
use crate::devicetree::resolver;
use crate::error::AttachError;
use crate::overlay::engine::{OverlayEngine, OverlayId};
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives device nodes appearing in and disappearing from the live tree.
pub trait TreeObserver: Send + Sync {
    /// Called after `overlay` was applied, with every available compatible node it created.
    fn nodes_added(&self, overlay: OverlayId, nodes: Vec<NodeInfo>);

    /// Called before `overlay` is reverted.
    fn nodes_removing(&self, overlay: OverlayId);
}

pub struct DeviceTreeEngine {
    tree: Mutex<LiveTree>,
    observer: Option<Arc<dyn TreeObserver>>,
}

impl DeviceTreeEngine {
    pub fn new(base: DeviceNode) -> Self {
        DeviceTreeEngine {
            tree: Mutex::new(LiveTree::new(base)),
            observer: None,
        }
    }

    /// Engine whose node changes are reported to `observer` (normally the platform bus).
    pub fn with_observer(base: DeviceNode, observer: Arc<dyn TreeObserver>) -> Self {
        DeviceTreeEngine {
            tree: Mutex::new(LiveTree::new(base)),
            observer: Some(observer),
        }
    }

    fn tree(&self) -> Result<MutexGuard<'_, LiveTree>, AttachError> {
        self.tree
            .lock()
            .map_err(|e| AttachError::Internal(format!("Live tree lock poisoned: {e}")))
    }

    /// Number of overlays currently applied.
    pub fn active_overlays(&self) -> usize {
        self.tree().map(|t| t.applied()).unwrap_or(0)
    }

    /// Copy of the current live tree.
    pub fn snapshot(&self) -> Result<DeviceNode, AttachError> {
        Ok(self.tree()?.root().clone())
    }
}

impl OverlayEngine for DeviceTreeEngine {
    fn unflatten(&self, blob: &[u8]) -> Result<DeviceNode, AttachError> {
        fdt::unflatten(blob)
    }

    fn resolve_references(&self, tree: &mut DeviceNode) -> Result<(), AttachError> {
        let live = self.tree()?;
        resolver::resolve_references(tree, live.root())
    }

    fn activate(&self, tree: &DeviceNode) -> Result<OverlayId, AttachError> {
        let (id, devices) = {
            let mut live = self.tree()?;
            let (id, added) = live.apply(tree)?;
            (id, live.devices_under(&added))
        };
        info!("Activated {id} exposing {} device node(s)", devices.len());
        if let Some(observer) = &self.observer {
            observer.nodes_added(id, devices);
        }
        Ok(id)
    }

    fn deactivate(&self, id: OverlayId) -> Result<(), AttachError> {
        self.tree()?.check_removable(id)?;
        if let Some(observer) = &self.observer {
            observer.nodes_removing(id);
        }
        self.tree()?.revert(id)?;
        info!("Deactivated {id}");
        Ok(())
    }

    fn find_compatible(&self, compatible: &str) -> Option<NodeInfo> {
        let found = self.tree().ok()?.find_compatible(compatible);
        debug!("Lookup of {compatible}: {:?}", found.as_ref().map(|n| &n.path));
        found
    }

    fn devices_added_by(&self, id: OverlayId) -> Vec<NodeInfo> {
        self.tree()
            .map(|live| live.devices_under(&live.added_by(id)))
            .unwrap_or_default()
    }
}
