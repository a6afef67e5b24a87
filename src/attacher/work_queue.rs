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

//! Single-consumer deferred work queue.
//!
//! One tokio task consumes a capacity-1 channel and runs the queue's job on the blocking
//! pool, awaiting each run before taking the next. Queueing while a run is pending is a
//! no-op; queueing while a run is in progress schedules exactly one more.

use crate::error::AttachError;
use log::{debug, error, trace, warn};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type Work = Arc<dyn Fn() + Send + Sync>;

/// Non-blocking producer side; usable from interrupt context.
#[derive(Clone)]
pub struct WorkQueueHandle {
    name: Arc<str>,
    sender: mpsc::Sender<()>,
}

impl WorkQueueHandle {
    /// Schedule a run.
    ///
    /// Returns `true` if a run was newly scheduled, `false` if one was already pending or
    /// the queue is destroyed.
    pub fn queue(&self) -> bool {
        match self.sender.try_send(()) {
            Ok(()) => {
                trace!("Queued work on {}", self.name);
                true
            }
            Err(TrySendError::Full(())) => {
                trace!("Work already pending on {}", self.name);
                false
            }
            Err(TrySendError::Closed(())) => {
                warn!("Work queue {} is destroyed", self.name);
                false
            }
        }
    }
}

pub struct WorkQueue {
    handle: WorkQueueHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

async fn run(name: &str, work: &Work) {
    let work = work.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || work()).await {
        error!("Work on {name} panicked: {e}");
    }
}

impl WorkQueue {
    /// Create a queue whose runs call `work`. Must be called within a tokio runtime.
    ///
    /// # Returns: `Result<WorkQueue, AttachError>`
    /// * `Ok(WorkQueue)` - The queue, consuming until [`WorkQueue::destroy`]
    /// * `Err(AttachError::Internal)` - No runtime to spawn the consumer on
    pub fn create(name: &str, work: Work) -> Result<Self, AttachError> {
        let runtime = Handle::try_current().map_err(|e| {
            AttachError::Internal(format!("Cannot create work queue {name}: {e}"))
        })?;
        let (sender, mut receiver) = mpsc::channel::<()>(1);
        let (shutdown, mut shutdown_signal) = oneshot::channel::<()>();
        let task_name = name.to_string();
        let task = runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Some(()) = receiver.recv() => run(&task_name, &work).await,
                    _ = &mut shutdown_signal => break,
                }
            }
            receiver.close();
            while receiver.try_recv().is_ok() {
                debug!("Draining pending work on {task_name}");
                run(&task_name, &work).await;
            }
            debug!("Work queue {task_name} stopped");
        });
        debug!("Created work queue {name}");
        Ok(WorkQueue {
            handle: WorkQueueHandle {
                name: name.into(),
                sender,
            },
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    pub fn handle(&self) -> WorkQueueHandle {
        self.handle.clone()
    }

    /// Stop consuming and wait for the in-flight and pending runs to finish.
    pub async fn destroy(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Work queue {} ended abnormally: {e}", self.handle.name);
            }
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
