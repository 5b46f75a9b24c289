//! Directory monitor
//!
//! Polls a storage node and calls `refresh()` at a fixed interval so the
//! in-memory tree follows files created or deleted by other processes.
//!
//! The loop ends when it is stopped, when the storage is dropped, or on the
//! first refresh error. After an error the tree keeps working; it just
//! needs manual `refresh()` calls from then on.

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::error::Result;

use super::Storage;

/// Handle of a running monitor thread
pub(crate) struct Monitor {
    stop: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl Monitor {
    pub(crate) fn start(storage: Weak<dyn Storage>, interval: Duration) -> Result<Self> {
        let (stop, stopped) = channel::bounded::<()>(1);

        let worker = thread::Builder::new()
            .name("shelfdb-monitor".to_string())
            .spawn(move || {
                tracing::debug!("Storage monitor started ({:?} interval)", interval);
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(storage) = storage.upgrade() else {
                        break;
                    };
                    if let Err(e) = storage.refresh() {
                        tracing::error!(
                            "Monitor of '{}' failed, falling back to manual refresh: {}",
                            storage.name(),
                            e
                        );
                        break;
                    }
                }
                tracing::debug!("Storage monitor stopped");
            })?;

        Ok(Self {
            stop,
            worker: Some(worker),
        })
    }

    /// Signal the thread and wait for it
    pub(crate) fn stop(mut self) {
        let _ = self.stop.try_send(());
        if let Some(worker) = self.worker.take() {
            // the last strong reference may be dropped on the monitor thread
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
