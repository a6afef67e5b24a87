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

//! Hot-plug attacher: the identity interrupt, the deferred load worker and their lifecycle.
//!
//! ```text
//!  identity irq ──> IdentityIrqHandler ──(capacity 1)──> WorkQueue ──> OverlayLoader::run_cycle
//!                   write-back ack                        one run      teardown, read id, fetch,
//!                                                         at a time    parse, resolve, activate
//! ```

pub mod identity;
pub mod lifecycle;
pub mod loader;
pub mod work_queue;
