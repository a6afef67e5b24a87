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

//! Generic resource and interface framework for the fabric peripherals, and the
//! peripheral drivers built on it.
//!
//! A driver registered on the [`PlatformBus`](bus::PlatformBus) gets probed for every
//! matching node an overlay adds. Its probe calls
//! [`claim_device_resources`](resources::claim_device_resources), which reserves the
//! register range, maps it and publishes the endpoints; removal calls
//! [`release_device_resources`](resources::release_device_resources).

pub mod ascii;
pub mod bus;
pub mod interface;
pub mod module;
pub mod peripherals;
pub mod resources;
