//! Background dispatch
//!
//! Listener notifications run on a background worker instead of the
//! writer's call stack, so a slow or failing listener never blocks ingestion.
//!
//! ## Guarantees
//! - Jobs run in submission order on a single worker thread
//! - Listeners of one event are called in registration order
//! - A listener error or panic is logged and does not reach other listeners
//!   or the write that triggered the event
//! - Nothing is retried; events pending at process exit are lost

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Flush(Sender<()>),
}

/// Single-threaded background task runner
pub struct Dispatcher {
    sender: Option<Sender<Message>>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start the worker thread
    pub fn new(name: &str) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Message>();

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for message in receiver.iter() {
                    match message {
                        Message::Run(job) => {
                            if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                                tracing::warn!(
                                    "Background task panicked: {}",
                                    panic_message(panic.as_ref())
                                );
                            }
                        }
                        Message::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                tracing::debug!("Dispatcher worker stopped");
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queue a job for the worker
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let sent = self
            .sender
            .as_ref()
            .map(|s| s.send(Message::Run(Box::new(job))).is_ok())
            .unwrap_or(false);
        if !sent {
            tracing::warn!("Dispatcher is shut down, dropping background task");
        }
    }

    /// Block until every job submitted before this call has run
    pub fn flush(&self) {
        let (done_tx, done_rx) = channel::bounded(1);
        if let Some(sender) = &self.sender {
            if sender.send(Message::Flush(done_tx)).is_ok() {
                let _ = done_rx.recv();
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop after the queued jobs
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Listener Registry
// =============================================================================

/// A registered event callback
pub type Listener<E> = Arc<dyn Fn(&E) -> Result<()> + Send + Sync>;

/// Registry of listeners for one event type
pub struct Listeners<E> {
    set: Arc<Mutex<ListenerSet<E>>>,
}

struct ListenerSet<E> {
    next_id: u64,
    entries: Vec<(u64, Listener<E>)>,
}

/// Handle returned by [`Listeners::subscribe`]
///
/// The listener stays registered until the owner calls [`Subscription::cancel`].
#[must_use = "a subscription must be kept to cancel the listener later"]
pub struct Subscription {
    id: u64,
    set: Weak<dyn Unsubscribe>,
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64);
}

impl<E: 'static> Unsubscribe for Mutex<ListenerSet<E>> {
    fn unsubscribe(&self, id: u64) {
        self.lock().entries.retain(|(entry_id, _)| *entry_id != id);
    }
}

impl Subscription {
    /// Remove the listener; later events are not delivered to it
    pub fn cancel(self) {
        if let Some(set) = self.set.upgrade() {
            set.unsubscribe(self.id);
        }
    }
}

impl<E: Send + 'static> Listeners<E> {
    pub fn new() -> Self {
        Self {
            set: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) -> Result<()> + Send + Sync + 'static,
    {
        let mut set = self.set.lock();
        let id = set.next_id;
        set.next_id += 1;
        set.entries.push((id, Arc::new(listener)));

        let weak: Weak<Mutex<ListenerSet<E>>> = Arc::downgrade(&self.set);
        Subscription { id, set: weak }
    }

    pub fn len(&self) -> usize {
        self.set.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every current listener on the dispatcher
    pub fn notify(&self, dispatcher: &Dispatcher, event: E) {
        let listeners: Vec<Listener<E>> = self
            .set
            .lock()
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        if listeners.is_empty() {
            return;
        }

        dispatcher.submit(move || {
            for listener in &listeners {
                match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("Listener failed: {}", e),
                    Err(panic) => tracing::warn!(
                        "Listener panicked: {}",
                        panic_message(panic.as_ref())
                    ),
                }
            }
        });
    }
}

impl<E: Send + 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}
