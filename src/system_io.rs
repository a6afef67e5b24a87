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

//! Error Wrapping File System I/O Helpers
//!
//! Thin wrappers around standard Rust file system reads which add trace logging and map
//! failures to [`AttachError::IORead`] with the offending path attached. Missing files are
//! reported as [`AttachError::NotFound`] so that callers fetching optional assets (firmware
//! fragments, config files) can tell an absent file from an unreadable one.

use crate::error::AttachError;
use log::trace;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Read};
use std::path::Path;

fn map_read_error(file_path: &Path, e: std::io::Error) -> AttachError {
    if e.kind() == ErrorKind::NotFound {
        AttachError::NotFound(format!("{file_path:?} does not exist"))
    } else {
        AttachError::IORead {
            file: file_path.into(),
            e,
        }
    }
}

/// Read the contents of a file to a String.
///
/// # Arguments
///
/// * `file_path` - Path to the file to read
///
/// # Returns: `Result<String, AttachError>`
/// * `Ok(String)` - The complete contents of the file
/// * `Err(AttachError::NotFound)` - If the file does not exist
/// * `Err(AttachError::IORead)` - If the file cannot be read (permissions, not UTF-8, etc.)
pub fn fs_read(file_path: &Path) -> Result<String, AttachError> {
    trace!("Attempting to read from {file_path:?}");
    let mut buf = String::new();
    OpenOptions::new()
        .read(true)
        .open(file_path)
        .and_then(|mut f| f.read_to_string(&mut buf))
        .map_err(|e| map_read_error(file_path, e))?;
    trace!("Reading done");
    Ok(buf)
}

/// Read the contents of a file as raw bytes.
///
/// Used for flattened device-tree blobs, which are binary.
///
/// # Arguments
///
/// * `file_path` - Path to the file to read
///
/// # Returns: `Result<Vec<u8>, AttachError>`
/// * `Ok(Vec<u8>)` - The complete contents of the file
/// * `Err(AttachError::NotFound)` - If the file does not exist
/// * `Err(AttachError::IORead)` - If the file cannot be read
pub fn fs_read_bytes(file_path: &Path) -> Result<Vec<u8>, AttachError> {
    trace!("Attempting to read bytes from {file_path:?}");
    let mut buf = Vec::new();
    OpenOptions::new()
        .read(true)
        .open(file_path)
        .and_then(|mut f| f.read_to_end(&mut buf))
        .map_err(|e| map_read_error(file_path, e))?;
    trace!("Read {} bytes", buf.len());
    Ok(buf)
}
