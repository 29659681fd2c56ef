//! Process-wide online/offline signal.
//!
//! Platform integrations (browser events, OS reachability callbacks) feed
//! transitions in through [`NetworkMonitor::set_online`]; consumers observe
//! the current value and subscribe to changes. Listeners fire on transitions
//! only, never for redundant updates.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;

type ChangeListener = Arc<dyn Fn(bool) + Send + Sync + 'static>;

static GLOBAL_MONITOR: Lazy<NetworkMonitor> = Lazy::new(NetworkMonitor::new);

struct MonitorInner {
    online: AtomicBool,
    listener_counter: AtomicU64,
    listeners: Mutex<Vec<(u64, ChangeListener)>>,
}

/// Cloneable handle to a shared connectivity signal. Starts online.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                online: AtomicBool::new(true),
                listener_counter: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Shared process-wide instance.
    pub fn global() -> NetworkMonitor {
        GLOBAL_MONITOR.clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Records a connectivity transition and notifies listeners when the
    /// value actually changed.
    pub fn set_online(&self, online: bool) {
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }
        let listeners: Vec<ChangeListener> = {
            let guard = self.inner.listeners.lock().unwrap();
            guard.iter().map(|(_, listener)| Arc::clone(listener)).collect()
        };
        // Invoked outside the lock so a listener may subscribe or detach.
        for listener in listeners {
            listener(online);
        }
    }

    pub fn on_change<F>(&self, callback: F) -> NetworkSubscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.listener_counter.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        NetworkSubscription {
            monitor: Arc::downgrade(&self.inner),
            id,
            detached: false,
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration handle for a connectivity listener; detaches on drop.
pub struct NetworkSubscription {
    monitor: Weak<MonitorInner>,
    id: u64,
    detached: bool,
}

impl NetworkSubscription {
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(inner) = self.monitor.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap()
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for NetworkSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_online_and_reports_transitions() {
        let monitor = NetworkMonitor::new();
        assert!(monitor.is_online());

        let events: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let _subscription = monitor.on_change(move |online| {
            captured.lock().unwrap().push(online);
        });

        monitor.set_online(false);
        monitor.set_online(false); // redundant, must not re-fire
        monitor.set_online(true);

        assert_eq!(events.lock().unwrap().as_slice(), &[false, true]);
        assert!(monitor.is_online());
    }

    #[test]
    fn detached_listener_stops_receiving_events() {
        let monitor = NetworkMonitor::new();
        let events: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let mut subscription = monitor.on_change(move |online| {
            captured.lock().unwrap().push(online);
        });

        monitor.set_online(false);
        subscription.detach();
        monitor.set_online(true);

        assert_eq!(events.lock().unwrap().as_slice(), &[false]);
    }

    #[test]
    fn global_handles_share_one_signal() {
        let platform = NetworkMonitor::global();
        let consumer = NetworkMonitor::global();

        let events: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let _subscription = consumer.on_change(move |online| {
            captured.lock().unwrap().push(online);
        });

        platform.set_online(false);
        assert!(!consumer.is_online());
        platform.set_online(true);

        assert_eq!(events.lock().unwrap().as_slice(), &[false, true]);
    }

    #[test]
    fn dropping_the_subscription_detaches() {
        let monitor = NetworkMonitor::new();
        let events: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        {
            let _subscription = monitor.on_change(move |online| {
                captured.lock().unwrap().push(online);
            });
        }
        monitor.set_online(false);
        assert!(events.lock().unwrap().is_empty());
    }
}
