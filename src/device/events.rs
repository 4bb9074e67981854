// Device lifecycle notifications
// Subscribers register callbacks; the hub delivers events inline or from a
// dedicated notifier thread.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

/// Lifecycle event of the GPU device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Created,
    /// Device is about to be destroyed
    Destroy { fatal: bool },
    Lost,
    Reset,
}

pub type DeviceCallback = Box<dyn Fn(DeviceEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Source of device lifecycle notifications
pub trait DeviceEventSource: Send + Sync {
    fn subscribe(&self, callback: DeviceCallback) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

type SharedCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// In-process device event source
pub struct DeviceEventHub {
    subscribers: RwLock<Vec<(SubscriptionId, SharedCallback)>>,
    next_id: AtomicU64,
}

impl Default for DeviceEventHub {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl DeviceEventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver an event to every subscriber on the calling thread
    pub fn notify(&self, event: DeviceEvent) {
        // Callbacks may unsubscribe, so never call them under the lock
        let callbacks: Vec<SharedCallback> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        log::debug!(
            "Device event {:?} -> {} subscriber(s)",
            event,
            callbacks.len()
        );

        for callback in callbacks {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Start a notifier thread that delivers posted events asynchronously
    pub fn spawn_notifier(self: &Arc<Self>) -> std::io::Result<Notifier> {
        let (tx, rx): (Sender<DeviceEvent>, Receiver<DeviceEvent>) =
            crossbeam_channel::unbounded();
        let hub = self.clone();

        let thread = std::thread::Builder::new()
            .name("device-events".to_string())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    hub.notify(event);
                }
                log::debug!("Device event notifier stopped");
            })?;

        Ok(Notifier {
            sender: Mutex::new(Some(tx)),
            thread: Some(thread),
        })
    }
}

impl DeviceEventSource for DeviceEventHub {
    fn subscribe(&self, callback: DeviceCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, Arc::from(callback)));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().retain(|(sub, _)| *sub != id);
    }
}

/// Handle to a running notifier thread. Dropping it drains queued events
/// and joins the thread.
pub struct Notifier {
    sender: Mutex<Option<Sender<DeviceEvent>>>,
    thread: Option<JoinHandle<()>>,
}

impl Notifier {
    /// Queue an event for asynchronous delivery
    pub fn post(&self, event: DeviceEvent) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.sender.lock().take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Device event notifier panicked");
            }
        }
    }
}
