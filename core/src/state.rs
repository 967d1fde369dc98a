//! Derives [`TorState`] (daemon/network/bootstrap) and [`TorListeners`] from the
//! `NOTICE`/`CONF_CHANGED` event stream, coalescing bursts of listener changes into
//! a single downstream update.

use std::{
    collections::HashSet,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use tokio::sync::mpsc;
use torctl_helper::debounce::Debounce;

const COALESCE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DaemonState {
    #[default]
    Off,
    Starting,
    On(u8),
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkState {
    #[default]
    Disabled,
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TorState {
    pub daemon: DaemonState,
    pub network: NetworkState,
}

impl TorState {
    pub fn is_ready(self) -> bool {
        matches!(self.daemon, DaemonState::On(100)) && self.network == NetworkState::Enabled
    }

    /// Off <-> Starting -> On(p) <-> Stopping -> Off. Any other edge is dropped.
    fn legal_daemon_transition(from: DaemonState, to: DaemonState) -> bool {
        use DaemonState::{Off, On, Starting, Stopping};
        matches!(
            (from, to),
            (Off, Starting)
                | (Starting, Off)
                | (Starting, On(_))
                | (On(_), On(_))
                | (On(_), Stopping)
                | (Stopping, On(_))
                | (Stopping, Off)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Dns,
    Http,
    Socks,
    Trans,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorListeners {
    pub dns: HashSet<SocketAddr>,
    pub http: HashSet<SocketAddr>,
    pub socks: HashSet<SocketAddr>,
    pub socks_unix: HashSet<PathBuf>,
    pub trans: HashSet<SocketAddr>,
}

impl TorListeners {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Parse a `NOTICE` listener-lifecycle line. tor's exact prose isn't part of any
/// versioned contract; this covers the strings current tor releases emit and should
/// be revisited against live daemon output (see DESIGN.md).
fn classify_listener(message: &str) -> Option<(ListenerKind, bool, &str)> {
    let (opened, rest) = if let Some(rest) = message.strip_prefix("Opened ") {
        (true, rest)
    } else if let Some(rest) = message.strip_prefix("Closed ") {
        (false, rest)
    } else {
        return None;
    };

    let (kind, rest) = [
        ("Socks listener", ListenerKind::Socks),
        ("DNS listener", ListenerKind::Dns),
        ("HTTP tunnel listener", ListenerKind::Http),
        ("Transparent pf/netfilter listener", ListenerKind::Trans),
        ("Transparent natd listener", ListenerKind::Trans),
    ]
    .into_iter()
    .find_map(|(prefix, kind)| rest.strip_prefix(prefix).map(|rest| (kind, rest)))?;

    let addr = rest.trim_start().strip_prefix("on ")?.trim();
    Some((kind, opened, addr))
}

struct Callbacks {
    on_state_change: Option<Box<dyn Fn(TorState) + Send + Sync>>,
    on_listeners_change: Option<Box<dyn Fn(TorListeners) + Send + Sync>>,
    on_ready: Option<Box<dyn Fn() + Send + Sync>>,
}

struct Shared {
    state: Mutex<TorState>,
    listeners: Mutex<TorListeners>,
    ready_armed: Mutex<bool>,
    callbacks: Mutex<Callbacks>,
    ping_tx: mpsc::UnboundedSender<()>,
}

/// Owned by the [`crate::Controller`]; fed `NOTICE`/`CONF_CHANGED` events, emits
/// coalesced [`TorListeners`] snapshots and [`TorState`] transitions.
pub(crate) struct RuntimeStateManager {
    shared: Arc<Shared>,
}

impl RuntimeStateManager {
    pub(crate) fn new() -> Self {
        let (ping_tx, ping_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(TorState::default()),
            listeners: Mutex::new(TorListeners::default()),
            ready_armed: Mutex::new(true),
            callbacks: Mutex::new(Callbacks {
                on_state_change: None,
                on_listeners_change: None,
                on_ready: None,
            }),
            ping_tx,
        });

        spawn_coalescer(Arc::downgrade(&shared), ping_rx);

        Self { shared }
    }

    pub(crate) fn on_state_change(&self, callback: impl Fn(TorState) + Send + Sync + 'static) {
        self.shared.callbacks.lock().unwrap().on_state_change = Some(Box::new(callback));
    }

    pub(crate) fn on_listeners_change(&self, callback: impl Fn(TorListeners) + Send + Sync + 'static) {
        self.shared.callbacks.lock().unwrap().on_listeners_change = Some(Box::new(callback));
    }

    pub(crate) fn on_ready(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared.callbacks.lock().unwrap().on_ready = Some(Box::new(callback));
    }

    pub(crate) fn state(&self) -> TorState {
        *self.shared.state.lock().unwrap()
    }

    pub(crate) fn listeners(&self) -> TorListeners {
        self.shared.listeners.lock().unwrap().clone()
    }

    pub(crate) fn apply_daemon_state(&self, to: DaemonState) {
        let (changed, became_ready) = {
            let mut state = self.shared.state.lock().unwrap();
            if !TorState::legal_daemon_transition(state.daemon, to) {
                return;
            }
            state.daemon = to;
            let ready = state.is_ready();
            if !ready {
                // Any regression re-arms readiness for the next time it's reached.
                *self.shared.ready_armed.lock().unwrap() = true;
            }
            (true, ready)
        };
        if changed {
            self.fire_state_change();
        }
        if became_ready {
            self.maybe_fire_ready();
        }
        if matches!(to, DaemonState::Off | DaemonState::Stopping) {
            self.shared.listeners.lock().unwrap().clear();
            self.fire_listeners_change();
        }
    }

    pub(crate) fn apply_network_state(&self, to: NetworkState) {
        let became_ready = {
            let mut state = self.shared.state.lock().unwrap();
            state.network = to;
            state.is_ready()
        };
        self.fire_state_change();
        if became_ready {
            self.maybe_fire_ready();
        }
        if to == NetworkState::Disabled {
            self.shared.listeners.lock().unwrap().clear();
            self.fire_listeners_change();
        }
    }

    /// Feed one `NOTICE` message; if it describes a listener opening/closing, update
    /// the pending snapshot and (re)arm the coalescing window.
    pub(crate) fn observe_notice(&self, message: &str) {
        let Some((kind, opened, addr)) = classify_listener(message) else {
            return;
        };
        let mut listeners = self.shared.listeners.lock().unwrap();
        if let Some(path) = addr.strip_prefix("unix:") {
            let path = PathBuf::from(path);
            if opened {
                listeners.socks_unix.insert(path);
            } else {
                listeners.socks_unix.remove(&path);
            }
        } else if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
            let set = match kind {
                ListenerKind::Dns => &mut listeners.dns,
                ListenerKind::Http => &mut listeners.http,
                ListenerKind::Socks => &mut listeners.socks,
                ListenerKind::Trans => &mut listeners.trans,
            };
            if opened {
                set.insert(socket_addr);
            } else {
                set.remove(&socket_addr);
            }
        } else {
            return;
        }
        drop(listeners);
        let _ = self.shared.ping_tx.send(());
    }

    fn fire_state_change(&self) {
        let state = self.state();
        if let Some(cb) = &self.shared.callbacks.lock().unwrap().on_state_change {
            cb(state);
        }
    }

    fn fire_listeners_change(&self) {
        let listeners = self.listeners();
        if let Some(cb) = &self.shared.callbacks.lock().unwrap().on_listeners_change {
            cb(listeners);
        }
    }

    fn maybe_fire_ready(&self) {
        let mut armed = self.shared.ready_armed.lock().unwrap();
        if *armed {
            *armed = false;
            drop(armed);
            if let Some(cb) = &self.shared.callbacks.lock().unwrap().on_ready {
                cb();
            }
        }
    }
}

impl Default for RuntimeStateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_coalescer(shared: Weak<Shared>, mut ping_rx: mpsc::UnboundedReceiver<()>) {
    tokio::spawn(async move {
        let mut debounce = Box::pin(Debounce::new(COALESCE_WINDOW));
        loop {
            tokio::select! {
                ping = ping_rx.recv() => {
                    match ping {
                        Some(()) => debounce.as_mut().ping(),
                        None => return,
                    }
                }
                () = std::future::poll_fn(|cx| debounce.as_mut().poll_fire(cx)) => {
                    let Some(shared) = shared.upgrade() else { return };
                    let listeners = shared.listeners.lock().unwrap().clone();
                    let callbacks = shared.callbacks.lock().unwrap();
                    if let Some(cb) = &callbacks.on_listeners_change {
                        cb(listeners);
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn illegal_daemon_transition_is_dropped() {
        let manager = RuntimeStateManager::new();
        manager.apply_daemon_state(DaemonState::On(50));
        assert_eq!(manager.state().daemon, DaemonState::Off);
    }

    #[test]
    fn ready_fires_once_until_regression() {
        let manager = RuntimeStateManager::new();
        let fires = Arc::new(AtomicUsize::new(0));
        let fires2 = fires.clone();
        manager.on_ready(move || {
            fires2.fetch_add(1, Ordering::SeqCst);
        });

        manager.apply_daemon_state(DaemonState::Starting);
        manager.apply_daemon_state(DaemonState::On(50));
        manager.apply_network_state(NetworkState::Enabled);
        manager.apply_daemon_state(DaemonState::On(100));
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        manager.apply_daemon_state(DaemonState::On(100));
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        manager.apply_daemon_state(DaemonState::Stopping);
        manager.apply_daemon_state(DaemonState::On(100));
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn classifies_socks_and_dns_notices() {
        assert_eq!(
            classify_listener("Opened Socks listener on 127.0.0.1:9050"),
            Some((ListenerKind::Socks, true, "127.0.0.1:9050"))
        );
        assert_eq!(
            classify_listener("Closed DNS listener on 127.0.0.1:5353"),
            Some((ListenerKind::Dns, false, "127.0.0.1:5353"))
        );
        assert_eq!(classify_listener("Bootstrapped 100%"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_bursts_coalesce_into_one_update() {
        let manager = RuntimeStateManager::new();
        let updates = Arc::new(AtomicUsize::new(0));
        let updates2 = updates.clone();
        manager.on_listeners_change(move |_| {
            updates2.fetch_add(1, Ordering::SeqCst);
        });

        manager.observe_notice("Opened Socks listener on 127.0.0.1:9050");
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.observe_notice("Opened DNS listener on 127.0.0.1:5353");
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.observe_notice("Closed Socks listener on 127.0.0.1:9050");
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.observe_notice("Opened Socks listener on 127.0.0.1:9150");

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(updates.load(Ordering::SeqCst), 1);
        let listeners = manager.listeners();
        assert_eq!(listeners.socks.len(), 1);
        assert!(listeners.socks.contains(&"127.0.0.1:9150".parse().unwrap()));
        assert_eq!(listeners.dns.len(), 1);
    }
}
