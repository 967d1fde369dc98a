//! Typed asynchronous event bus: classifies 6xx lines into [`EventKind`]s and routes
//! them to subscribed [`Observer`]s.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use rand::RngCore;

use crate::error::UncaughtException;

/// The async-event keyword space tor defines in control-spec.txt `section 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Notice,
    Warn,
    Err,
    Debug,
    Info,
    ConfChanged,
    Bw,
    Addrmap,
    StatusClient,
    StatusServer,
    StatusGeneral,
    HsDesc,
    NewNym,
    Other,
}

impl EventKind {
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "NOTICE" => Self::Notice,
            "WARN" => Self::Warn,
            "ERR" => Self::Err,
            "DEBUG" => Self::Debug,
            "INFO" => Self::Info,
            "CONF_CHANGED" => Self::ConfChanged,
            "BW" => Self::Bw,
            "ADDRMAP" => Self::Addrmap,
            "STATUS_CLIENT" => Self::StatusClient,
            "STATUS_SERVER" => Self::StatusServer,
            "STATUS_GENERAL" => Self::StatusGeneral,
            "HS_DESC" => Self::HsDesc,
            "NEWNYM" => Self::NewNym,
            _ => Self::Other,
        }
    }

    /// Always implicitly subscribed, and always unioned into an explicit `SETEVENTS`.
    pub const REQUIRED: [Self; 2] = [Self::Notice, Self::ConfChanged];

    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Notice => "NOTICE",
            Self::Warn => "WARN",
            Self::Err => "ERR",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::ConfChanged => "CONF_CHANGED",
            Self::Bw => "BW",
            Self::Addrmap => "ADDRMAP",
            Self::StatusClient => "STATUS_CLIENT",
            Self::StatusServer => "STATUS_SERVER",
            Self::StatusGeneral => "STATUS_GENERAL",
            Self::HsDesc => "HS_DESC",
            Self::NewNym => "NEWNYM",
            Self::Other => "",
        }
    }
}

/// One parsed asynchronous event, ready to hand to observers.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub raw_keyword: String,
    pub message: String,
    pub data: Option<Vec<String>>,
}

type ObserverCallback = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct ObserverId(u64);

struct Observer {
    id: ObserverId,
    kind: EventKind,
    /// Tags beginning with the router's static sentinel survive `clear_observers`.
    tag: Vec<u8>,
    executor: Option<tokio::runtime::Handle>,
    callback: ObserverCallback,
}

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(0);

/// Owned by the [`crate::Controller`]; routes parsed events to every observer
/// registered for that event's kind.
pub(crate) struct EventRouter {
    observers: Mutex<Vec<Observer>>,
    static_tag: Vec<u8>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub(crate) fn new() -> Self {
        let mut sentinel = vec![0_u8; 16];
        rand::thread_rng().fill_bytes(&mut sentinel);
        Self {
            observers: Mutex::new(Vec::new()),
            static_tag: sentinel,
        }
    }

    /// A tag that marks an observer as surviving [`EventRouter::clear_observers`].
    pub(crate) fn static_tag(&self) -> Vec<u8> {
        self.static_tag.clone()
    }

    pub(crate) fn subscribe(
        &self,
        kind: EventKind,
        tag: Vec<u8>,
        executor: Option<tokio::runtime::Handle>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().unwrap().push(Observer {
            id,
            kind,
            tag,
            executor,
            callback: Arc::new(callback),
        });
        id
    }

    pub(crate) fn unsubscribe(&self, id: ObserverId) {
        self.observers.lock().unwrap().retain(|o| o.id != id);
    }

    /// Remove every observer whose tag does not start with the router's static
    /// sentinel.
    pub(crate) fn clear_observers(&self) {
        let sentinel = &self.static_tag;
        self.observers
            .lock()
            .unwrap()
            .retain(|o| o.tag.starts_with(sentinel));
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    /// Dispatch one event to every matching observer. Observers registered for
    /// [`EventKind::Err`] receive an [`UncaughtException`] if dispatch to *another*
    /// observer panics; a panicking `Err` observer itself is allowed to propagate
    /// (treated as fatal, matching the "don't swallow a broken error handler" rule).
    pub(crate) fn dispatch(&self, event: Event) {
        let targets: Vec<Observer> = self
            .observers
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.kind == event.kind)
            .map(|o| Observer {
                id: o.id,
                kind: o.kind,
                tag: o.tag.clone(),
                executor: o.executor.clone(),
                callback: o.callback.clone(),
            })
            .collect();

        for observer in targets {
            let event = event.clone();
            let callback = observer.callback;
            if let Some(handle) = &observer.executor {
                handle.spawn(async move { invoke(&callback, &event, false) });
            } else {
                invoke(&callback, &event, event.kind == EventKind::Err);
            }
        }
    }

    /// Route an [`UncaughtException`] to every `Err`-kind observer.
    pub(crate) fn dispatch_uncaught(&self, exception: UncaughtException) {
        self.dispatch(Event {
            kind: EventKind::Err,
            raw_keyword: "ERR".to_owned(),
            message: exception.to_string(),
            data: None,
        });
    }
}

fn invoke(callback: &ObserverCallback, event: &Event, is_error_observer: bool) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
    if let Err(panic) = result {
        if is_error_observer {
            std::panic::resume_unwind(panic);
        }
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "observer panicked".to_owned());
        tracing::debug!(%message, "observer callback panicked, routing to error observers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(kind: EventKind) -> Event {
        Event {
            kind,
            raw_keyword: kind.wire_name().to_owned(),
            message: String::new(),
            data: None,
        }
    }

    #[test]
    fn dispatch_only_reaches_matching_kind() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        router.subscribe(EventKind::Notice, Vec::new(), None, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        router.dispatch(event(EventKind::Warn));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        router.dispatch(event(EventKind::Notice));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_observers_keeps_static_tagged() {
        let router = EventRouter::new();
        router.subscribe(EventKind::Notice, Vec::new(), None, |_| {});
        router.subscribe(EventKind::Notice, router.static_tag(), None, |_| {});
        assert_eq!(router.observer_count(), 2);
        router.clear_observers();
        assert_eq!(router.observer_count(), 1);
    }

    #[test]
    fn unsubscribe_removes_exactly_one() {
        let router = EventRouter::new();
        let id = router.subscribe(EventKind::Bw, Vec::new(), None, |_| {});
        router.subscribe(EventKind::Bw, Vec::new(), None, |_| {});
        router.unsubscribe(id);
        assert_eq!(router.observer_count(), 1);
    }

    #[test]
    fn panicking_observer_does_not_stop_dispatch_to_others() {
        let router = EventRouter::new();
        router.subscribe(EventKind::Notice, Vec::new(), None, |_| panic!("boom"));
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        router.subscribe(EventKind::Notice, Vec::new(), None, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        router.dispatch(event(EventKind::Notice));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
