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

//! devattach: identity-driven device-tree overlay attacher and peripheral driver framework.
//!
//! An identity register in the FPGA fabric reports which peripheral is currently
//! programmed. Whenever it raises its interrupt, the [`attacher`] retires the previous
//! peripheral's overlay fragment and attaches `dev_<identity>.dtbo`; the [`drivers`]
//! framework then binds the nodes that fragment adds and publishes their endpoints.

pub mod accounting;
pub mod attacher;
pub mod comm;
pub mod config;
pub mod devicetree;
pub mod drivers;
pub mod error;
pub mod hw;
pub mod overlay;
pub mod system_io;
