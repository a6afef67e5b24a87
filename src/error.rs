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

use log::error;
use std::path::PathBuf;
use zbus::fdo;

/// Every failure the attacher, the overlay pipeline and the driver framework can report.
///
/// The first group mirrors the failure classes of the attach pipeline and of the resource
/// framework. The remaining variants cover the ambient plumbing (configuration, file IO,
/// lock poisoning).
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("AttachError::NotFound: {0}")]
    NotFound(String),
    #[error("AttachError::Invalid: Descriptor fragment is malformed or empty: {0}")]
    Invalid(String),
    #[error("AttachError::Unresolvable: Cannot resolve fragment references: {0}")]
    Unresolvable(String),
    #[error("AttachError::ActivationFailed: Overlay engine rejected the fragment: {0}")]
    ActivationFailed(String),
    #[error("AttachError::Busy: {0}")]
    Busy(String),
    #[error("AttachError::NoMemory: {0}")]
    NoMemory(String),
    #[error("AttachError::NoData: {0}")]
    NoData(String),
    #[error("AttachError::NoDevice: Device is no longer available: {0}")]
    NoDevice(String),
    #[error("AttachError::Argument: {0}")]
    Argument(String),
    #[error("AttachError::IORead: An IO error occurred when reading from {file:?}: {e}")]
    IORead { file: PathBuf, e: std::io::Error },
    #[error("AttachError::IOWrite: An IO error occurred when writing to {file:?}: {e}")]
    IOWrite { file: PathBuf, e: std::io::Error },
    #[error("AttachError::TomlDe: Failed to parse config {toml_string:?}: {e}")]
    TomlDe {
        toml_string: String,
        e: toml::de::Error,
    },
    #[error("AttachError::Internal: An Internal error occurred: {0}")]
    Internal(String),
}

impl From<AttachError> for fdo::Error {
    fn from(err: AttachError) -> Self {
        error!("{err}");
        match err {
            AttachError::Argument(..) => fdo::Error::InvalidArgs(err.to_string()),
            AttachError::NotFound(..) => fdo::Error::FileNotFound(err.to_string()),
            AttachError::Busy(..) => fdo::Error::LimitsExceeded(err.to_string()),
            AttachError::NoMemory(..) => fdo::Error::NoMemory(err.to_string()),
            AttachError::IORead { .. } => fdo::Error::IOError(err.to_string()),
            AttachError::IOWrite { .. } => fdo::Error::IOError(err.to_string()),
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::argument(AttachError::Argument("bad".into()), "org.freedesktop.DBus.Error.InvalidArgs")]
    #[case::not_found(AttachError::NotFound("dev_9.dtbo".into()), "org.freedesktop.DBus.Error.FileNotFound")]
    #[case::busy(AttachError::Busy("window".into()), "org.freedesktop.DBus.Error.LimitsExceeded")]
    #[case::invalid(AttachError::Invalid("magic".into()), "org.freedesktop.DBus.Error.Failed")]
    fn maps_to_dbus_error(#[case] err: AttachError, #[case] dbus_name: &str) {
        let message = err.to_string();
        let fdo_err: fdo::Error = err.into();
        let name = zbus::DBusError::name(&fdo_err).to_string();
        expect_that!(name, eq(dbus_name));
        expect_that!(
            zbus::DBusError::description(&fdo_err),
            some(contains_substring(message))
        );
    }
}
