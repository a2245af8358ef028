//! Test utilities & fixtures.
//! A scripted radio driver standing in for the serial transport, plus an event recorder.
#![allow(dead_code)] // Each test binary uses a different subset

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use ugate::config::{Config, NodeConfig};
use ugate::events::{Event, EventBus, EventKind};
use ugate::wireless::address::{NodeAddress, WireAddress};
use ugate::wireless::command::Command;
use ugate::wireless::errors::TransportError;
use ugate::wireless::frame::TxStatus;
use ugate::wireless::settings::RemoteSettings;
use ugate::wireless::transport::{
    Connector, HostParams, InboundPacket, Transport, TxReport, TxRequest,
};

/// How the scripted radio answers a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nack(TxStatus),
    /// Never answers; the driver gives up after the caller's timeout.
    Silent,
    /// The port breaks mid-exchange.
    Fault,
    /// The driver ignores the caller's timeout and blocks this long.
    Hang(Duration),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub dest: WireAddress,
    pub data: Vec<u8>,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
pub struct StubState {
    pub calls: Mutex<Vec<Call>>,
    pub connects: Mutex<Vec<HostParams>>,
    pub inbound: Mutex<Option<mpsc::UnboundedSender<InboundPacket>>>,
    pub closes: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl StubState {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, address: &str) -> Vec<Call> {
        let wire = NodeAddress::parse(address).unwrap().wire();
        self.calls().into_iter().filter(|c| c.dest == wire).collect()
    }

    /// Deliver a packet as if `source` had sent it.
    pub fn inject(&self, source: &str, data: Vec<u8>) {
        let sender = self.inbound.lock().unwrap().clone().expect("not connected");
        sender
            .send(InboundPacket {
                source: NodeAddress::parse(source).unwrap().wire(),
                rssi: 42,
                data,
                received_at: chrono::Utc::now(),
            })
            .expect("inbound receiver dropped");
    }
}

#[derive(Clone)]
pub struct StubConnector {
    pub state: Arc<StubState>,
    replies: Arc<Mutex<HashMap<WireAddress, Reply>>>,
    default_reply: Reply,
    delay: Duration,
    refuse: bool,
}

impl StubConnector {
    pub fn new(default_reply: Reply) -> Self {
        Self {
            state: Arc::new(StubState::default()),
            replies: Arc::new(Mutex::new(HashMap::new())),
            default_reply,
            delay: Duration::from_millis(0),
            refuse: false,
        }
    }

    pub fn acking() -> Self {
        Self::new(Reply::Ack)
    }

    /// Connect attempts fail as if the port were busy.
    pub fn refusing() -> Self {
        let mut c = Self::new(Reply::Ack);
        c.refuse = true;
        c
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn reply_for(self, address: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(NodeAddress::parse(address).unwrap().wire(), reply);
        self
    }
}

impl Connector for StubConnector {
    fn connect(
        &self,
        params: &HostParams,
        inbound: mpsc::UnboundedSender<InboundPacket>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.state.connects.lock().unwrap().push(params.clone());
        if self.refuse {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("{} is busy", params.port),
            )));
        }
        *self.state.inbound.lock().unwrap() = Some(inbound);
        Ok(Box::new(StubTransport {
            connector: self.clone(),
        }))
    }
}

pub struct StubTransport {
    connector: StubConnector,
}

impl Transport for StubTransport {
    fn send_synchronous(
        &mut self,
        request: &TxRequest,
        timeout: Duration,
    ) -> Result<TxReport, TransportError> {
        let state = &self.connector.state;
        let now_active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_active.fetch_max(now_active, Ordering::SeqCst);
        let started = Instant::now();
        std::thread::sleep(self.connector.delay);
        let reply = self
            .connector
            .replies
            .lock()
            .unwrap()
            .get(&request.dest)
            .copied()
            .unwrap_or(self.connector.default_reply);
        let result = match reply {
            Reply::Ack => Ok(TxReport {
                frame_id: request.frame_id,
                status: TxStatus::Success,
            }),
            Reply::Nack(status) => Ok(TxReport {
                frame_id: request.frame_id,
                status,
            }),
            Reply::Silent => {
                std::thread::sleep(timeout);
                Err(TransportError::Timeout)
            }
            Reply::Hang(stall) => {
                std::thread::sleep(stall);
                Err(TransportError::Timeout)
            }
            Reply::Fault => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            ))),
        };
        state.calls.lock().unwrap().push(Call {
            dest: request.dest,
            data: request.data.clone(),
            started,
            finished: Instant::now(),
        });
        state.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn query_address(
        &mut self,
        _frame_id: u8,
        target: Option<WireAddress>,
        _timeout: Duration,
    ) -> Result<WireAddress, TransportError> {
        Ok(target.unwrap_or(WireAddress::new(0x00, 0x01)))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.connector.state.closes.fetch_add(1, Ordering::SeqCst);
        *self.connector.state.inbound.lock().unwrap() = None;
        Ok(())
    }
}

/// What a listener saw, detached from the bus.
#[derive(Debug, Clone)]
pub struct Seen {
    pub kind: EventKind,
    pub command: Option<Command>,
    pub addresses: Vec<String>,
    pub messages: Vec<String>,
    pub consumed: bool,
}

#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Recorder::default();
        let sink = recorder.seen.clone();
        bus.subscribe(move |e: &Event| {
            sink.lock().unwrap().push(Seen {
                kind: e.kind.clone(),
                command: e.command,
                addresses: e.addresses.iter().map(|a| a.to_string()).collect(),
                messages: e.messages.clone(),
                consumed: e.is_consumed(),
            });
        });
        recorder
    }

    pub fn all(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.all().iter().map(|s| s.kind.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| **n == name).count()
    }

    pub fn find(&self, pred: impl Fn(&Seen) -> bool) -> Option<Seen> {
        self.all().into_iter().find(|s| pred(s))
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}

/// Poll `cond` until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Config on COM3 at 19200 baud with the given nodes, settings at defaults.
pub fn config_with_nodes(addresses: &[&str]) -> Config {
    let mut config = Config::default();
    config.host.port = "COM3".to_string();
    config.host.baud_rate = 19200;
    config.logging.file = None;
    config.wireless.sync_on_connect = false;
    config.nodes = addresses
        .iter()
        .map(|a| NodeConfig {
            address: NodeAddress::parse(a).unwrap(),
            auto_synchronize: false,
            settings: RemoteSettings::default(),
        })
        .collect();
    config
}
