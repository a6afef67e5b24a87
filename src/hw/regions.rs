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

//! Exclusive reservation of physical address ranges.

use crate::error::AttachError;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A physical address range, `start..start + size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    pub start: u64,
    pub size: u64,
}

impl Resource {
    pub fn new(start: u64, size: u64) -> Self {
        Resource { start, size }
    }

    /// Last address covered by the range (inclusive).
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size.saturating_sub(1))
    }

    fn overlaps(&self, other: &Resource) -> bool {
        self.start <= other.end() && other.start <= self.end()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[mem {:#010x}-{:#010x}]", self.start, self.end())
    }
}

#[derive(Debug)]
struct Claim {
    resource: Resource,
    owner: String,
}

#[derive(Debug, Default)]
pub struct RegionTable {
    claims: Mutex<BTreeMap<u64, Claim>>,
}

impl RegionTable {
    /// Claim `resource` exclusively for `owner`.
    ///
    /// # Returns: `Result<RegionReservation, AttachError>`
    /// * `Ok(RegionReservation)` - The claim; released when dropped
    /// * `Err(AttachError::Busy)` - Some part of the range is already claimed
    /// * `Err(AttachError::Argument)` - Zero-sized range
    pub fn request(
        self: &Arc<Self>,
        resource: Resource,
        owner: &str,
    ) -> Result<RegionReservation, AttachError> {
        if resource.size == 0 {
            return Err(AttachError::Argument(format!(
                "Cannot reserve an empty range at {:#x}",
                resource.start
            )));
        }
        let mut claims = self
            .claims
            .lock()
            .map_err(|e| AttachError::Internal(format!("Region table poisoned: {e}")))?;
        if let Some(existing) = claims.values().find(|c| c.resource.overlaps(&resource)) {
            return Err(AttachError::Busy(format!(
                "{resource} for {owner} overlaps {} held by {}",
                existing.resource, existing.owner
            )));
        }
        debug!("Reserving {resource} for {owner}");
        claims.insert(
            resource.start,
            Claim {
                resource,
                owner: owner.to_string(),
            },
        );
        Ok(RegionReservation {
            table: self.clone(),
            resource,
        })
    }

    /// Number of ranges currently reserved.
    pub fn reserved(&self) -> usize {
        self.claims.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn release(&self, resource: &Resource) {
        match self.claims.lock() {
            Ok(mut claims) => {
                if let Some(claim) = claims.remove(&resource.start) {
                    debug!("Released {} held by {}", claim.resource, claim.owner);
                }
            }
            Err(e) => warn!("Cannot release {resource}: region table poisoned: {e}"),
        }
    }
}

/// A held reservation. Dropping it gives the range back.
#[derive(Debug)]
pub struct RegionReservation {
    table: Arc<RegionTable>,
    resource: Resource,
}

impl RegionReservation {
    pub fn resource(&self) -> Resource {
        self.resource
    }
}

impl Drop for RegionReservation {
    fn drop(&mut self) {
        self.table.release(&self.resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::identical(0x4120_0000, 0x1_0000)]
    #[case::inside(0x4120_0100, 0x10)]
    #[case::straddling_start(0x411f_fff0, 0x20)]
    #[case::straddling_end(0x4120_fff0, 0x20)]
    fn overlapping_request_is_busy(#[case] start: u64, #[case] size: u64) {
        let table = Arc::new(RegionTable::default());
        let _held = table
            .request(Resource::new(0x4120_0000, 0x1_0000), "sw")
            .expect("first claim failed");
        assert_that!(
            table.request(Resource::new(start, size), "other"),
            err(displays_as(contains_substring("AttachError::Busy")))
        );
    }

    #[gtest]
    fn adjacent_ranges_coexist_and_release_on_drop() {
        let table = Arc::new(RegionTable::default());
        let first = table
            .request(Resource::new(0x4120_0000, 0x1_0000), "sw")
            .expect("first claim failed");
        let second = table
            .request(Resource::new(0x4121_0000, 0x1_0000), "myrandom")
            .expect("adjacent claim failed");
        expect_that!(table.reserved(), eq(2));
        drop(first);
        drop(second);
        expect_that!(table.reserved(), eq(0));
    }

    #[gtest]
    fn resource_displays_inclusive_range() {
        expect_that!(
            Resource::new(0x4120_0000, 0x1_0000).to_string(),
            eq("[mem 0x41200000-0x4120ffff]")
        );
    }
}
