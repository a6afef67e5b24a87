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

//! Descriptor fragments and the active-fragment slot.
//!
//! A [`LoadedFragment`] owns, in acquisition order, the copied blob, the parsed tree and
//! the activation handle. Fields drop in declaration order, so the activation handle is
//! always released before the tree and the tree before the blob, whether the fragment is
//! retired explicitly or unwound by an early return.

use crate::accounting::{Counter, CounterGuard};
use crate::devicetree::node::DeviceNode;
use crate::error::AttachError;
use crate::overlay::engine::{OverlayEngine, OverlayId};
use crate::overlay::fetcher::Firmware;
use bitflags::bitflags;
use log::{debug, error, trace};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

bitflags! {
    /// Flags carried by a parsed tree.
    pub struct NodeFlags: u32 {
        /// Tree is not part of the live tree; its references must be resolved first.
        const DETACHED = 1 << 0;
    }
}

/// States of one load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Teardown,
    ReadId,
    Fetch,
    Parse,
    Resolve,
    Activate,
    Done,
    Failed,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Teardown => "teardown",
            CycleState::ReadId => "read-id",
            CycleState::Fetch => "fetch",
            CycleState::Parse => "parse",
            CycleState::Resolve => "resolve",
            CycleState::Activate => "activate",
            CycleState::Done => "done",
            CycleState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// An error together with the stage it ended the pipeline in.
#[derive(Debug)]
pub struct StageError {
    pub stage: CycleState,
    pub error: AttachError,
}

impl StageError {
    pub(crate) fn at(stage: CycleState) -> impl FnOnce(AttachError) -> StageError {
        move |error| StageError { stage, error }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// Counts owned blob copies and parsed trees.
#[derive(Debug, Clone, Default)]
pub struct FragmentAccounting {
    blobs: Counter,
    trees: Counter,
}

impl FragmentAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding_blobs(&self) -> usize {
        self.blobs.outstanding()
    }

    pub fn outstanding_trees(&self) -> usize {
        self.trees.outstanding()
    }
}

pub struct OwnedBlob {
    data: Vec<u8>,
    _guard: CounterGuard,
}

impl OwnedBlob {
    /// Copy `data` into memory owned by the fragment.
    ///
    /// # Returns: `Result<OwnedBlob, AttachError>`
    /// * `Ok(OwnedBlob)` - The copy
    /// * `Err(AttachError::NoMemory)` - The allocation failed
    fn copy_from(data: &[u8], accounting: &FragmentAccounting) -> Result<Self, AttachError> {
        let mut owned = Vec::new();
        owned.try_reserve_exact(data.len()).map_err(|e| {
            AttachError::NoMemory(format!("Cannot copy a {}-byte blob: {e}", data.len()))
        })?;
        owned.extend_from_slice(data);
        Ok(OwnedBlob {
            data: owned,
            _guard: accounting.blobs.acquire(),
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub struct ParsedTree {
    root: DeviceNode,
    flags: NodeFlags,
    _guard: CounterGuard,
}

impl ParsedTree {
    pub fn root(&self) -> &DeviceNode {
        &self.root
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }
}

/// Activation handle. Deactivates the overlay when dropped unless already released.
pub struct ActiveOverlay {
    engine: Arc<dyn OverlayEngine>,
    id: OverlayId,
    released: bool,
}

impl ActiveOverlay {
    pub fn id(&self) -> OverlayId {
        self.id
    }

    /// Deactivate now and report the outcome.
    pub fn release(mut self) -> Result<(), AttachError> {
        self.released = true;
        self.engine.deactivate(self.id)
    }
}

impl Drop for ActiveOverlay {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.engine.deactivate(self.id) {
                error!("{} stays applied after a failed deactivation: {e}", self.id);
            }
        }
    }
}

pub struct LoadedFragment {
    overlay: Option<ActiveOverlay>,
    tree: ParsedTree,
    blob: OwnedBlob,
}

impl LoadedFragment {
    pub fn overlay_id(&self) -> Option<OverlayId> {
        self.overlay.as_ref().map(ActiveOverlay::id)
    }

    pub fn tree(&self) -> &ParsedTree {
        &self.tree
    }

    pub fn blob(&self) -> &OwnedBlob {
        &self.blob
    }

    /// Release the activation handle, then the parsed tree, then the blob.
    ///
    /// The tree and blob are released even when deactivation fails.
    ///
    /// # Returns: `Option<OverlayId>`
    /// * `Some(OverlayId)` - The overlay the engine refused to deactivate, now orphaned
    /// * `None` - Nothing was left applied
    pub fn retire(self) -> Option<OverlayId> {
        let LoadedFragment {
            overlay,
            tree,
            blob,
        } = self;
        let orphan = overlay.and_then(|overlay| {
            let id = overlay.id();
            match overlay.release() {
                Ok(()) => {
                    trace!("Released {id}");
                    None
                }
                Err(e) => {
                    error!("{id} stays applied after a failed deactivation, releasing its tree and blob: {e}");
                    Some(id)
                }
            }
        });
        drop(tree);
        drop(blob);
        orphan
    }
}

/// Run the parse, resolve and activate stages on a fetched blob.
///
/// The fetched firmware is released as soon as it has been copied. On failure everything
/// acquired by the earlier stages is released before returning.
///
/// # Returns: `Result<LoadedFragment, StageError>`
/// * `Ok(LoadedFragment)` - Active fragment
/// * `Err(StageError)` - The failing stage and its error
pub fn load_fragment(
    engine: &Arc<dyn OverlayEngine>,
    accounting: &FragmentAccounting,
    firmware: Firmware,
) -> Result<LoadedFragment, StageError> {
    if firmware.data().is_empty() {
        return Err(StageError {
            stage: CycleState::Fetch,
            error: AttachError::NotFound(format!("Firmware {} is empty", firmware.name())),
        });
    }

    debug!("{} -> {}", CycleState::Fetch, CycleState::Parse);
    let blob =
        OwnedBlob::copy_from(firmware.data(), accounting).map_err(StageError::at(CycleState::Parse))?;
    drop(firmware);
    let root = engine
        .unflatten(&blob.data)
        .map_err(StageError::at(CycleState::Parse))?;
    let mut tree = ParsedTree {
        root,
        flags: NodeFlags::empty(),
        _guard: accounting.trees.acquire(),
    };

    debug!("{} -> {}", CycleState::Parse, CycleState::Resolve);
    tree.flags.insert(NodeFlags::DETACHED);
    engine
        .resolve_references(&mut tree.root)
        .map_err(StageError::at(CycleState::Resolve))?;

    debug!("{} -> {}", CycleState::Resolve, CycleState::Activate);
    let id = engine
        .activate(&tree.root)
        .map_err(StageError::at(CycleState::Activate))?;

    Ok(LoadedFragment {
        overlay: Some(ActiveOverlay {
            engine: engine.clone(),
            id,
            released: false,
        }),
        tree,
        blob,
    })
}

/// Contents of a [`FragmentSlot`].
#[derive(Default)]
pub struct SlotState {
    fragment: Option<LoadedFragment>,
    identity: Option<u32>,
    closed: bool,
}

impl SlotState {
    /// Retire the held fragment, if any. Safe on an empty slot.
    pub fn teardown(&mut self) {
        if let Some(fragment) = self.fragment.take() {
            debug!("Retiring fragment of identity {:?}", self.identity);
            fragment.retire();
        }
        self.identity = None;
    }

    pub fn install(&mut self, identity: u32, fragment: LoadedFragment) {
        self.teardown();
        self.identity = Some(identity);
        self.fragment = Some(fragment);
    }

    /// Refuse further installs.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn fragment(&self) -> Option<&LoadedFragment> {
        self.fragment.as_ref()
    }

    pub fn identity(&self) -> Option<u32> {
        self.identity
    }
}

/// The mutex-guarded slot holding at most one active peripheral fragment.
#[derive(Default)]
pub struct FragmentSlot {
    state: Mutex<SlotState>,
}

impl FragmentSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, SlotState>, AttachError> {
        self.state
            .lock()
            .map_err(|e| AttachError::Internal(format!("Fragment slot lock poisoned: {e}")))
    }

    /// Identity and overlay of the held fragment.
    pub fn active(&self) -> Option<(u32, Option<OverlayId>)> {
        let state = self.lock().ok()?;
        let fragment = state.fragment.as_ref()?;
        Some((state.identity?, fragment.overlay_id()))
    }
}
