//! Device hot-swap detection
//!
//! The monitor does not reopen anything itself. Listeners decide what a
//! change means for them.

use std::sync::Arc;

use crate::audio::backend::DeviceEnumerator;

/// Ordered device names captured by one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    names: Vec<String>,
}

impl DeviceSnapshot {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names present here but not in `other`
    pub fn added_since(&self, other: &DeviceSnapshot) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| !other.names.contains(n))
            .cloned()
            .collect()
    }
}

/// Subscriber notified when the device set changes
pub trait DeviceChangeListener: Send + Sync {
    fn on_change(&self, previous: &DeviceSnapshot, current: &DeviceSnapshot);
}

impl<F> DeviceChangeListener for F
where
    F: Fn(&DeviceSnapshot, &DeviceSnapshot) + Send + Sync,
{
    fn on_change(&self, previous: &DeviceSnapshot, current: &DeviceSnapshot) {
        self(previous, current)
    }
}

/// Polls the device list and fans out change notifications
pub struct DeviceMonitor {
    enumerator: Arc<dyn DeviceEnumerator>,
    last: DeviceSnapshot,
    listeners: Vec<Arc<dyn DeviceChangeListener>>,
    changes_seen: u64,
}

impl DeviceMonitor {
    /// Take the initial snapshot immediately
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        let last = DeviceSnapshot::new(enumerator.device_names());
        Self {
            enumerator,
            last,
            listeners: Vec::new(),
            changes_seen: 0,
        }
    }

    /// Start from an empty snapshot, for callers that take the baseline
    /// later with [`DeviceMonitor::rebaseline`]
    pub fn unprimed(enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self {
            enumerator,
            last: DeviceSnapshot::default(),
            listeners: Vec::new(),
            changes_seen: 0,
        }
    }

    pub fn register(&mut self, listener: Arc<dyn DeviceChangeListener>) {
        self.listeners.push(listener);
    }

    /// Re-enumerate and notify every listener once if anything changed.
    /// Returns whether a change was detected.
    pub fn poll(&mut self) -> bool {
        let current = DeviceSnapshot::new(self.enumerator.device_names());
        self.apply(current)
    }

    /// [`DeviceMonitor::poll`] with the enumeration moved to the blocking pool
    pub async fn poll_blocking(&mut self) -> bool {
        match self.enumerate_blocking().await {
            Some(current) => self.apply(current),
            None => false,
        }
    }

    /// Replace the snapshot without notifying anyone
    pub async fn rebaseline(&mut self) {
        if let Some(current) = self.enumerate_blocking().await {
            self.last = current;
        }
    }

    async fn enumerate_blocking(&self) -> Option<DeviceSnapshot> {
        let enumerator = self.enumerator.clone();
        match tokio::task::spawn_blocking(move || enumerator.device_names()).await {
            Ok(names) => Some(DeviceSnapshot::new(names)),
            Err(e) => {
                tracing::warn!("Device enumeration failed: {}", e);
                None
            }
        }
    }

    fn apply(&mut self, current: DeviceSnapshot) -> bool {
        if current == self.last {
            return false;
        }

        tracing::info!(
            "Audio device change detected ({} -> {} devices)",
            self.last.len(),
            current.len()
        );
        for listener in &self.listeners {
            listener.on_change(&self.last, &current);
        }
        self.last = current;
        self.changes_seen += 1;
        true
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.last
    }

    pub fn changes_seen(&self) -> u64 {
        self.changes_seen
    }
}
