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

//! Userspace I/O interrupt source.
//!
//! A UIO device node blocks on `read` until its interrupt fires and returns the running
//! event count as a native-endian `u32`. Writing `1` re-enables the interrupt. The listener
//! runs on its own thread and forwards every event to an [`IrqController`] line until it is
//! stopped or the device reports an error.

use crate::error::AttachError;
use crate::hw::irq::IrqController;
use log::{debug, error, info, trace};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

fn rearm(file: &mut File, path: &Path) -> Result<(), AttachError> {
    file.write_all(&1u32.to_ne_bytes())
        .map_err(|e| AttachError::IOWrite {
            file: path.into(),
            e,
        })
}

fn wait_event(file: &mut File, path: &Path) -> Result<u32, AttachError> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf).map_err(|e| AttachError::IORead {
        file: path.into(),
        e,
    })?;
    Ok(u32::from_ne_bytes(buf))
}

/// Handle on a running UIO listener.
///
/// The thread is not joined on drop: it may be parked in a `read` that only returns with
/// the next interrupt.
pub struct UioListener {
    forwarding: Arc<Mutex<bool>>,
    thread: JoinHandle<()>,
}

impl UioListener {
    /// Stop forwarding. No event is raised once this returns, even if the thread is still
    /// blocked waiting for the device.
    pub fn stop(&self) {
        match self.forwarding.lock() {
            Ok(mut forwarding) => *forwarding = false,
            Err(mut poisoned) => **poisoned.get_mut() = false,
        }
        debug!("Interrupt forwarding stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the listener thread to end.
    ///
    /// # Returns: `Result<(), AttachError>`
    /// * `Ok(())` - The thread ended
    /// * `Err(AttachError::Internal)` - The thread panicked
    pub fn join(self) -> Result<(), AttachError> {
        self.thread
            .join()
            .map_err(|_| AttachError::Internal("Interrupt listener panicked".into()))
    }
}

/// Forward one event unless forwarding was stopped.
///
/// # Returns: `bool`
/// * `true` - Keep listening
/// * `false` - Forwarding was stopped
fn forward(forwarding: &Mutex<bool>, irqs: &IrqController, line: u32) -> bool {
    let Ok(forwarding) = forwarding.lock() else {
        return false;
    };
    if *forwarding {
        irqs.raise(line);
    }
    *forwarding
}

/// Start forwarding interrupts from the UIO node at `path` to `line`.
///
/// # Returns: `Result<UioListener, AttachError>`
/// * `Ok(UioListener)` - The listener; it ends when stopped or when the device reports an
///   error
/// * `Err(AttachError::IORead)` - The device node could not be opened
/// * `Err(AttachError::Internal)` - The listener thread could not be spawned
pub fn spawn_uio_listener(
    path: &Path,
    irqs: Arc<IrqController>,
    line: u32,
) -> Result<UioListener, AttachError> {
    let path: PathBuf = path.into();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| AttachError::IORead {
            file: path.clone(),
            e,
        })?;
    info!("Forwarding interrupts from {path:?} to line {line}");
    let forwarding = Arc::new(Mutex::new(true));
    let listener_forwarding = forwarding.clone();
    let thread = std::thread::Builder::new()
        .name("uio-irq".into())
        .spawn(move || {
            let result = (|| -> Result<(), AttachError> {
                rearm(&mut file, &path)?;
                loop {
                    let count = wait_event(&mut file, &path)?;
                    trace!("{path:?} event #{count}");
                    if !forward(&listener_forwarding, &irqs, line) {
                        return Ok(());
                    }
                    rearm(&mut file, &path)?;
                }
            })();
            match result {
                Ok(()) => info!("Interrupt listener on {path:?} stopped"),
                Err(e) => error!("Interrupt listener on {path:?} stopped: {e}"),
            }
        })
        .map_err(|e| AttachError::Internal(format!("Cannot spawn interrupt listener: {e}")))?;
    Ok(UioListener { forwarding, thread })
}
