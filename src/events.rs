//! In-process publish/subscribe for wireless activity.
//!
//! One [`EventBus`] instance is shared (behind an `Arc`) by every component of
//! a [`crate::service::WirelessService`]. Delivery is synchronous: `publish`
//! calls each listener in registration order on the publishing thread and
//! returns once all of them have run. There is no queue, so an event published
//! with no listeners is gone.
//!
//! Listeners that need to do async work (pushing settings after a connect, for
//! instance) capture a `tokio::runtime::Handle` and spawn onto it rather than
//! blocking the publisher.

use chrono::{DateTime, Utc};
use log::{error, trace};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::wireless::address::NodeAddress;
use crate::wireless::command::Command;
use crate::wireless::frame::TxStatus;
use crate::wireless::rx::RxMessage;
use crate::wireless::settings::SettingKey;

/// What happened. Kind specific data rides on the variant; the participants
/// (addresses, setting key, values) live on the [`Event`] itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    HostConnecting,
    HostConnected,
    HostConnectFailed,
    HostDisconnecting,
    HostDisconnected,
    HostDisconnectFailed,
    /// A batch of `total` single-address transmissions is about to start.
    BatchStarted { total: usize },
    TxStarted { index: usize },
    TxAckSuccess { index: usize, status: TxStatus },
    TxAckFailed { index: usize, status: TxStatus },
    TxTimeout { index: usize },
    TxFailed { index: usize },
    BatchSucceeded { success_count: usize },
    BatchFailed { failure_count: usize },
    RemoteNodeAdded,
    RemoteNodeRemoved,
    RemoteNodeOutOfSync,
    RemoteNodeSynchronized,
    SettingChanged,
    DataRx { message: RxMessage },
    DataRxFailed,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::HostConnecting => "HOST_CONNECTING",
            EventKind::HostConnected => "HOST_CONNECTED",
            EventKind::HostConnectFailed => "HOST_CONNECT_FAILED",
            EventKind::HostDisconnecting => "HOST_DISCONNECTING",
            EventKind::HostDisconnected => "HOST_DISCONNECTED",
            EventKind::HostDisconnectFailed => "HOST_DISCONNECT_FAILED",
            EventKind::BatchStarted { .. } => "BATCH_STARTED",
            EventKind::TxStarted { .. } => "TX_STARTED",
            EventKind::TxAckSuccess { .. } => "TX_ACK_SUCCESS",
            EventKind::TxAckFailed { .. } => "TX_ACK_FAILED",
            EventKind::TxTimeout { .. } => "TX_TIMEOUT",
            EventKind::TxFailed { .. } => "TX_FAILED",
            EventKind::BatchSucceeded { .. } => "BATCH_SUCCEEDED",
            EventKind::BatchFailed { .. } => "BATCH_FAILED",
            EventKind::RemoteNodeAdded => "REMOTE_NODE_ADDED",
            EventKind::RemoteNodeRemoved => "REMOTE_NODE_REMOVED",
            EventKind::RemoteNodeOutOfSync => "REMOTE_NODE_OUT_OF_SYNC",
            EventKind::RemoteNodeSynchronized => "REMOTE_NODE_SYNCHRONIZED",
            EventKind::SettingChanged => "SETTING_CHANGED",
            EventKind::DataRx { .. } => "DATA_RX",
            EventKind::DataRxFailed => "DATA_RX_FAILED",
        }
    }
}

/// Component that published an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Connection,
    Transceiver,
    Synchronizer,
    Registry,
    Inbound,
}

#[derive(Debug, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub source: EventSource,
    pub command: Option<Command>,
    /// Participating node addresses, insertion ordered without duplicates.
    pub addresses: Vec<NodeAddress>,
    pub key: Option<SettingKey>,
    pub old_value: Option<i32>,
    pub new_value: Option<i32>,
    pub messages: Vec<String>,
    pub created: DateTime<Utc>,
    #[serde(skip)]
    consumed: AtomicBool,
}

impl Event {
    pub fn new(kind: EventKind, source: EventSource) -> Self {
        Self {
            kind,
            source,
            command: None,
            addresses: Vec::new(),
            key: None,
            old_value: None,
            new_value: None,
            messages: Vec::new(),
            created: Utc::now(),
            consumed: AtomicBool::new(false),
        }
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    pub fn with_address(mut self, address: NodeAddress) -> Self {
        if !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
        self
    }

    pub fn with_addresses<I: IntoIterator<Item = NodeAddress>>(self, addresses: I) -> Self {
        addresses.into_iter().fold(self, Event::with_address)
    }

    pub fn with_setting(mut self, key: SettingKey, old_value: i32, new_value: i32) -> Self {
        self.key = Some(key);
        self.old_value = Some(old_value);
        self.new_value = Some(new_value);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// First address, for single-node events.
    pub fn address(&self) -> Option<&NodeAddress> {
        self.addresses.first()
    }

    /// Flag the event as handled. Advisory: later listeners still receive it.
    pub fn consume(&self) {
        self.consumed.store(true, Ordering::SeqCst);
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::SeqCst)
    }
}

pub trait Listener: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> Listener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn Listener>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<L: Listener + 'static>(&self, listener: L) -> SubscriptionId {
        self.subscribe_arc(Arc::new(listener))
    }

    pub fn subscribe_arc(&self, listener: Arc<dyn Listener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    /// Returns false when the id was not (or no longer) subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = guard.len();
        guard.retain(|(sid, _)| *sid != id);
        guard.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Deliver `event` to every listener, in registration order.
    ///
    /// Listeners are snapshotted first, so a listener may subscribe or
    /// unsubscribe (itself included) without deadlocking; such changes take
    /// effect from the next publish.
    pub fn publish(&self, event: &Event) {
        let snapshot: Vec<Arc<dyn Listener>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        trace!(
            "Publishing {} from {:?} to {} listener(s)",
            event.kind.name(),
            event.source,
            snapshot.len()
        );
        for listener in snapshot {
            // Only effective where panics unwind (dev/test profiles)
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                error!(
                    "Listener panicked while handling {}; continuing with remaining listeners",
                    event.kind.name()
                );
            }
        }
    }

    /// Build and publish in one step.
    pub fn emit(&self, event: Event) {
        self.publish(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&Event) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let make = move |tag: &str| {
            let log = log2.clone();
            let tag = tag.to_string();
            Box::new(move |e: &Event| {
                log.lock().unwrap().push(format!("{tag}:{}", e.kind.name()));
            }) as Box<dyn Fn(&Event) + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(make("a"));
        bus.subscribe(make("b"));
        bus.emit(Event::new(EventKind::HostConnected, EventSource::Connection));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:HOST_CONNECTED".to_string(), "b:HOST_CONNECTED".to_string()]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let id = bus.subscribe(make("a"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(Event::new(EventKind::HostConnected, EventSource::Connection));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn consumed_flag_is_advisory() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(|e: &Event| e.consume());
        bus.subscribe(make("late"));
        let event = Event::new(EventKind::DataRxFailed, EventSource::Inbound);
        bus.publish(&event);
        assert!(event.is_consumed());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn panicking_listener_does_not_starve_others() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(|_: &Event| panic!("boom"));
        bus.subscribe(make("after"));
        bus.emit(Event::new(EventKind::HostDisconnected, EventSource::Connection));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn addresses_are_deduplicated_in_order() {
        let a = NodeAddress::parse("1a2b").unwrap();
        let b = NodeAddress::parse("0001").unwrap();
        let event = Event::new(EventKind::BatchStarted { total: 3 }, EventSource::Transceiver)
            .with_addresses(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(event.addresses, vec![a, b]);
    }
}
