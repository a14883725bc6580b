//! Background reclamation of pooled bitmaps whose last strong handle went away.
//!
//! Bitmaps registered with the reuse pool carry a sender into this monitor. When such a
//! bitmap is dropped it ships its pixel storage here as a [`ReclaimTicket`], and the monitor
//! thread performs the final release. The thread lives from cache construction until
//! [`ReclamationMonitor::stop`], which is idempotent and also runs on drop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

use anyhow::Context;
use tracing::{debug, error, trace};

use crate::bitmap::BitmapId;
use crate::stats::CacheStats;

use super::Result;

/// Storage handed over by a bitmap that became unreachable.
#[derive(Debug)]
pub struct ReclaimTicket {
    id: BitmapId,
    storage: Option<Vec<u8>>,
}

impl ReclaimTicket {
    pub(crate) fn new(id: BitmapId, storage: Option<Vec<u8>>) -> Self {
        Self { id, storage }
    }

    pub fn id(&self) -> BitmapId {
        self.id
    }

    /// Free the storage. Returns the number of bytes released, `None` if already released.
    pub fn release(&mut self) -> Option<usize> {
        self.storage.take().map(|storage| storage.len())
    }
}

/// Messages consumed by the monitor thread.
#[derive(Debug)]
pub enum ReclaimEvent {
    Reclaim(ReclaimTicket),
    Stop,
}

/// Owner of the reclamation thread.
#[derive(Debug)]
pub struct ReclamationMonitor {
    stop: Arc<AtomicBool>,
    wake: Sender<ReclaimEvent>,
    handle: Option<JoinHandle<()>>,
}

impl ReclamationMonitor {
    /// Spawn the monitor thread draining `events`. `wake` must feed the same channel.
    pub fn start(
        thread_name: impl Into<String>,
        events: Receiver<ReclaimEvent>,
        wake: Sender<ReclaimEvent>,
        stats: Arc<CacheStats>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || run(events, flag, stats))
            .context("spawning reclamation monitor thread")?;

        Ok(Self { stop, wake, handle: Some(handle) })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Interrupt the blocking wait and join the thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        // The thread may already have exited on disconnect; a failed send is fine then.
        let _ = self.wake.send(ReclaimEvent::Stop);
        if handle.join().is_err() {
            error!(target: "cache::monitor", "reclamation monitor thread panicked");
        }
        debug!(target: "cache::monitor", "reclamation monitor stopped");
    }
}

impl Drop for ReclamationMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(events: Receiver<ReclaimEvent>, stop: Arc<AtomicBool>, stats: Arc<CacheStats>) {
    debug!(target: "cache::monitor", "reclamation monitor started");
    while !stop.load(Ordering::SeqCst) {
        let event = match events.recv() {
            Ok(event) => event,
            // Every sender is gone, nothing can be delivered anymore.
            Err(_) => break,
        };

        match event {
            ReclaimEvent::Stop => break,
            ReclaimEvent::Reclaim(mut ticket) => {
                let id = ticket.id();
                match catch_unwind(AssertUnwindSafe(|| ticket.release())) {
                    Ok(Some(bytes)) => {
                        trace!(target: "cache::monitor", id = id.as_u64(), bytes, "reclaimed");
                        stats.record_reclaimed(bytes);
                    }
                    Ok(None) => {
                        trace!(target: "cache::monitor", id = id.as_u64(), "already released");
                    }
                    Err(_) => {
                        error!(
                            target: "cache::monitor",
                            id = id.as_u64(),
                            "releasing bitmap storage panicked; continuing"
                        );
                    }
                }
            }
        }
    }
}
