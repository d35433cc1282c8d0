//! Disk Scheduler - asynchronous I/O through a single background worker.
//!
//! The [`DiskScheduler`] owns the [`DiskManager`] and a dedicated worker
//! thread. Callers enqueue [`DiskRequest`]s with [`DiskScheduler::schedule`]
//! and block on the request's [`DiskCompletion`] when they need the result.
//! Requests are processed strictly in FIFO order; there is no reordering,
//! batching, or priority.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::debug;

use crate::common::PageId;
use crate::storage::page::Page;
use crate::storage::DiskManager;

/// The buffer a request operates on.
///
/// A write carries its own copy of the page so the issuer is free to reuse
/// the frame immediately. A read carries a shared destination buffer that
/// the worker fills before signalling completion.
pub enum DiskData {
    /// Page contents to write out; owned by the request.
    Write(Box<Page>),
    /// Destination buffer for a read, shared with the issuer.
    Read(Arc<Mutex<Page>>),
}

/// A single disk I/O request.
///
/// `done` is a one-shot completion channel: the worker sends exactly one
/// `bool` on it, `true` on success and `false` if the disk manager reported
/// an error.
pub struct DiskRequest {
    /// ID of the page being read from / written to disk.
    pub page_id: PageId,
    /// Data buffer for the operation; also selects read vs. write.
    pub data: DiskData,
    /// Completion signal, set exactly once when the request finishes.
    pub done: Sender<bool>,
}

/// Receiving half of a request's completion signal.
pub struct DiskCompletion {
    rx: Receiver<bool>,
}

impl DiskCompletion {
    /// Block until the request has been processed.
    ///
    /// Returns the success flag the worker sent. If the worker is gone
    /// without signalling (shutdown mid-request), the request is treated as
    /// failed.
    pub fn wait(self) -> bool {
        self.rx.recv().unwrap_or(false)
    }
}

/// Schedules disk I/O requests onto a background worker thread.
///
/// # Shutdown
/// Dropping the scheduler enqueues a `None` sentinel and joins the worker,
/// so every request scheduled before the drop is still processed.
pub struct DiskScheduler {
    request_tx: Sender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Create a scheduler and spawn its worker thread.
    pub fn new(disk_manager: DiskManager) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<Option<DiskRequest>>();

        let worker = std::thread::spawn(move || {
            Self::run_worker(disk_manager, request_rx);
        });

        Self {
            request_tx,
            worker: Some(worker),
        }
    }

    /// Enqueue a request and return immediately.
    ///
    /// The request's completion fires once the disk manager has finished.
    pub fn schedule(&self, request: DiskRequest) {
        // The worker outlives every scheduling call, so the channel cannot
        // be closed here; a failed send is only possible after Drop began.
        let _ = self.request_tx.send(Some(request));
    }

    /// Create a completion pair for a new request.
    ///
    /// The sender goes into the [`DiskRequest`]; the caller keeps the
    /// [`DiskCompletion`] and waits on it.
    pub fn create_completion() -> (Sender<bool>, DiskCompletion) {
        let (tx, rx) = mpsc::channel();
        (tx, DiskCompletion { rx })
    }

    /// Worker loop: dequeue requests and dispatch them to the disk manager
    /// until the shutdown sentinel arrives.
    fn run_worker(mut disk_manager: DiskManager, request_rx: Receiver<Option<DiskRequest>>) {
        debug!("disk scheduler worker started");

        while let Ok(Some(request)) = request_rx.recv() {
            let ok = match &request.data {
                DiskData::Write(page) => disk_manager.write_page(request.page_id, page).is_ok(),
                DiskData::Read(buffer) => match buffer.lock() {
                    Ok(mut page) => disk_manager.read_page(request.page_id, &mut page).is_ok(),
                    Err(_) => false,
                },
            };

            // The issuer may have given up waiting; a closed completion
            // channel is not an error.
            let _ = request.done.send(ok);
        }

        debug!("disk scheduler worker shut down");
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.request_tx.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
