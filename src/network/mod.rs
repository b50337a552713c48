//! Online/offline tracking.
//!
//! The flag is updated from two sources: platform notifications delivered
//! through [`NetworkMonitor::set_online`], and real round-trips made by
//! [`NetworkMonitor::check`]. OS-reported connectivity is only a hint (a
//! captive Wi-Fi network reports "online" too), so anything that matters
//! should confirm with `check()` first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::Transport;

#[derive(Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
    transport: Arc<dyn Transport>,
}

impl NetworkMonitor {
    pub fn new(transport: Arc<dyn Transport>, online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
            transport,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub fn is_offline(&self) -> bool {
        !self.is_online()
    }

    /// Record a connectivity change. Subscribers are only notified on transitions.
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            log::info!("Network is now {}", if online { "online" } else { "offline" });
        }
    }

    /// Receiver that observes every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Invoke `callback` with the new state on each transition until the
    /// returned handle is dropped.
    pub fn on_change<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(bool) + Send + 'static,
    {
        let mut rx = self.subscribe();
        Subscription::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                callback(online);
            }
        })
    }

    /// Confirm connectivity with a real round-trip and update the flag.
    pub async fn check(&self) -> bool {
        match self.transport.probe().await {
            Ok(()) => {
                self.set_online(true);
                true
            }
            Err(e) => {
                log::debug!("Connectivity probe failed: {e}");
                self.set_online(false);
                false
            }
        }
    }

    /// Re-run [`check`](Self::check) every `every` until the handle is dropped.
    pub fn spawn_periodic_check(&self, every: Duration) -> Subscription {
        let monitor = self.clone();
        Subscription::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.check().await;
            }
        })
    }
}

/// Handle for a background listener; dropping it stops the listener.
#[must_use = "dropping a Subscription stops it immediately"]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pump, FakeTransport};
    use serde_json::Value;
    use std::sync::Mutex;

    fn monitor(online: bool) -> (NetworkMonitor, Arc<FakeTransport>) {
        let transport = FakeTransport::new(|_| Ok(Value::Null));
        (NetworkMonitor::new(transport.clone(), online), transport)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (m, _) = monitor(false);
        assert!(m.is_offline());
        assert!(!m.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions_only() {
        let (m, _) = monitor(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = m.on_change({
            let seen = seen.clone();
            move |online| seen.lock().unwrap().push(online)
        });
        pump().await;

        m.set_online(true); // no transition
        m.set_online(false);
        pump().await;
        m.set_online(true);
        pump().await;

        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_listening() {
        let (m, _) = monitor(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = m.on_change({
            let seen = seen.clone();
            move |online| seen.lock().unwrap().push(online)
        });
        drop(sub);
        pump().await;

        m.set_online(false);
        pump().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_uses_probe() {
        let (m, transport) = monitor(true);

        transport.set_reachable(false);
        assert!(!m.check().await);
        assert!(m.is_offline());

        transport.set_reachable(true);
        assert!(m.check().await);
        assert!(m.is_online());
        assert_eq!(transport.probe_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_check() {
        let (m, transport) = monitor(true);
        transport.set_reachable(false);

        let _sub = m.spawn_periodic_check(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(transport.probe_count() >= 3);
        assert!(m.is_offline());
    }
}
