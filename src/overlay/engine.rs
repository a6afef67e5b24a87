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

//! The overlay engine seam.

use crate::devicetree::live_tree::NodeInfo;
use crate::devicetree::node::DeviceNode;
use crate::error::AttachError;
use std::fmt;

/// Handle of an activated overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(pub u32);

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "overlay #{}", self.0)
    }
}

/// Operations the attach pipeline needs from a device-tree overlay engine.
pub trait OverlayEngine: Send + Sync {
    /// Parse a flattened blob into an owned tree.
    ///
    /// # Returns: `Result<DeviceNode, AttachError>`
    /// * `Ok(DeviceNode)` - The parsed root
    /// * `Err(AttachError::Invalid)` - Malformed blob or empty tree
    fn unflatten(&self, blob: &[u8]) -> Result<DeviceNode, AttachError>;

    /// Resolve the phandle references of a detached tree against the live tree.
    ///
    /// # Returns: `Result<(), AttachError>`
    /// * `Ok(())` - Tree patched in place
    /// * `Err(AttachError::Unresolvable)` - A reference cannot be resolved
    fn resolve_references(&self, tree: &mut DeviceNode) -> Result<(), AttachError>;

    /// Merge a resolved tree into the live tree.
    ///
    /// # Returns: `Result<OverlayId, AttachError>`
    /// * `Ok(OverlayId)` - Handle needed for [`OverlayEngine::deactivate`]
    /// * `Err(AttachError::ActivationFailed)` - The live tree was left untouched
    fn activate(&self, tree: &DeviceNode) -> Result<OverlayId, AttachError>;

    /// Revert a previously activated overlay.
    fn deactivate(&self, id: OverlayId) -> Result<(), AttachError>;

    /// First available live node compatible with `compatible`.
    fn find_compatible(&self, compatible: &str) -> Option<NodeInfo>;

    /// Available device nodes created by the overlay `id`, in tree order. Empty when `id`
    /// is not applied.
    fn devices_added_by(&self, id: OverlayId) -> Vec<NodeInfo>;
}
