//! Connectivity reporting: host-driven and HTTP-probe backends.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};
use crate::util::normalize_http_url;

/// Callback invoked with the new connectivity state
pub type OnlineCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Connectivity source consumed by the flush scheduler.
pub trait NetworkAdapter: Send + Sync {
    /// Point-in-time connectivity
    fn is_online(&self) -> bool;

    /// Register a callback fired on every online/offline transition.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    fn on_online_change(&self, callback: OnlineCallback) -> Subscription;
}

/// Handle that detaches a connectivity callback
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Detach the callback now
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

type SharedCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, SharedCallback>,
}

/// Online flag plus registered listeners, shared by both backends
struct Connectivity {
    online: AtomicBool,
    listeners: Mutex<Listeners>,
    /// Serializes flip-and-notify so listeners see transitions in flag order
    transitions: Mutex<()>,
}

impl Connectivity {
    fn new(online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(online),
            listeners: Mutex::new(Listeners::default()),
            transitions: Mutex::new(()),
        })
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Callbacks must not report connectivity back into the same adapter
    fn set(&self, online: bool) {
        let _transition = self
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.online.swap(online, Ordering::SeqCst) == online {
            return;
        }
        tracing::debug!("Connectivity changed: online={online}");

        // Callbacks run outside the listener lock so they may subscribe or unsubscribe
        let callbacks: Vec<SharedCallback> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(online);
        }
    }

    fn subscribe(self: &Arc<Self>, callback: OnlineCallback) -> Subscription {
        let id = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.insert(id, Arc::from(callback));
            id
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state
                    .listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entries
                    .remove(&id);
            }
        })
    }

    fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

/// Connectivity reported by the host platform.
///
/// Mobile shells forward OS reachability callbacks into [`ManualNetwork::set_online`].
#[derive(Clone)]
pub struct ManualNetwork {
    state: Arc<Connectivity>,
}

impl ManualNetwork {
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            state: Connectivity::new(online),
        }
    }

    /// Report a connectivity state; listeners fire only on transitions
    pub fn set_online(&self, online: bool) {
        self.state.set(online);
    }

    /// Number of registered callbacks
    pub fn listener_count(&self) -> usize {
        self.state.listener_count()
    }
}

impl NetworkAdapter for ManualNetwork {
    fn is_online(&self) -> bool {
        self.state.is_online()
    }

    fn on_online_change(&self, callback: OnlineCallback) -> Subscription {
        self.state.subscribe(callback)
    }
}

/// Check whether `url` answers at all.
///
/// Any HTTP response counts as reachable; only transport failures mean offline.
pub async fn probe_reachable(client: &reqwest::Client, url: &str) -> bool {
    match client.head(url).send().await {
        Ok(_) => true,
        Err(error) => {
            tracing::debug!("Connectivity probe to {url} failed: {error}");
            false
        }
    }
}

/// One-off reachability check for hosts that do not keep a probe running
pub async fn check_reachable(url: &str, timeout: Duration) -> Result<bool> {
    let url = normalize_http_url(url)
        .ok_or_else(|| Error::Config("probe URL must include http:// or https://".to_string()))?;
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(probe_reachable(&client, &url).await)
}

/// Connectivity derived from periodically probing a health URL.
///
/// Starts offline until the first probe completes. The probe task stops when
/// the adapter is dropped.
pub struct ProbeNetwork {
    state: Arc<Connectivity>,
    task: JoinHandle<()>,
}

impl ProbeNetwork {
    /// Spawn the probe loop on the current tokio runtime
    pub fn spawn(url: &str, interval: Duration, timeout: Duration) -> Result<Self> {
        let url = normalize_http_url(url).ok_or_else(|| {
            Error::Config("probe URL must include http:// or https://".to_string())
        })?;
        if interval.is_zero() {
            return Err(Error::Config("probe interval must be positive".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let state = Connectivity::new(false);
        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = probe_reachable(&client, &url).await;
                task_state.set(online);
            }
        });

        Ok(Self { state, task })
    }
}

impl Drop for ProbeNetwork {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl NetworkAdapter for ProbeNetwork {
    fn is_online(&self) -> bool {
        self.state.is_online()
    }

    fn on_online_change(&self, callback: OnlineCallback) -> Subscription {
        self.state.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn recorder(network: &ManualNetwork) -> (Arc<Mutex<Vec<bool>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = network.on_online_change(Box::new(move |online| {
            sink.lock().unwrap().push(online);
        }));
        (seen, subscription)
    }

    #[test]
    fn fires_on_every_transition_but_not_repeats() {
        let network = ManualNetwork::new(false);
        let (seen, _subscription) = recorder(&network);

        network.set_online(true);
        network.set_online(true);
        network.set_online(false);
        network.set_online(true);

        assert_eq!(*seen.lock().unwrap(), vec![true, false, true]);
        assert!(network.is_online());
    }

    #[test]
    fn concurrent_reports_reach_listeners_in_order() {
        let network = ManualNetwork::new(false);
        let (seen, _subscription) = recorder(&network);

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let network = network.clone();
                std::thread::spawn(move || {
                    for step in 0..500 {
                        network.set_online((worker + step) % 2 == 0);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|pair| pair[0] != pair[1]));
        assert_eq!(seen.last().copied().unwrap_or(false), network.is_online());
    }

    #[test]
    fn unsubscribe_detaches_callback() {
        let network = ManualNetwork::new(true);
        let (seen, subscription) = recorder(&network);
        assert_eq!(network.listener_count(), 1);

        subscription.unsubscribe();
        assert_eq!(network.listener_count(), 0);

        network.set_online(false);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dropping_subscription_detaches_callback() {
        let network = ManualNetwork::new(true);
        {
            let (_seen, _subscription) = recorder(&network);
            assert_eq!(network.listener_count(), 1);
        }
        assert_eq!(network.listener_count(), 0);
    }

    #[test]
    fn probe_network_rejects_invalid_url() {
        // Validation fails before anything is spawned, so no runtime is needed
        let error =
            ProbeNetwork::spawn("localhost/health", Duration::from_secs(1), Duration::from_secs(1))
                .err()
                .unwrap();
        assert!(error.to_string().contains("http:// or https://"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_network_stays_offline_when_unreachable() {
        let network = ProbeNetwork::spawn(
            "http://127.0.0.1:1/health",
            Duration::from_millis(20),
            Duration::from_millis(200),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!network.is_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn check_reachable_reports_refused_connection_as_offline() {
        let online = check_reachable("http://127.0.0.1:1/health", Duration::from_millis(200))
            .await
            .unwrap();
        assert!(!online);
        assert!(check_reachable("127.0.0.1:1", Duration::from_millis(200))
            .await
            .is_err());
    }
}
