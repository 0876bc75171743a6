use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use clap::ValueEnum;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Closed set of input sources a handler can bind to.
#[derive(Debug, Clone, Copy, ValueEnum, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Pcap,
    Dnstap,
    #[value(name = "netprobe")]
    #[serde(rename = "netprobe")]
    NetProbe,
    Mock,
    Sflow,
}

impl InputKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            InputKind::Pcap => "pcap",
            InputKind::Dnstap => "dnstap",
            InputKind::NetProbe => "netprobe",
            InputKind::Mock => "mock",
            InputKind::Sflow => "sflow",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Packet direction relative to the monitored host.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ToHost,
    FromHost,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum L3 {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum L4 {
    Udp,
    Tcp,
    Other,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PacketEvent {
    pub stamp: Timestamp,
    #[serde(default)]
    pub direction: Direction,
    pub l3: L3,
    pub l4: L4,
    #[serde(default)]
    pub syn: bool,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub src: Option<IpAddr>,
    #[serde(default)]
    pub dst: Option<IpAddr>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DnsEvent {
    pub stamp: Timestamp,
    #[serde(default)]
    pub direction: Direction,
    /// Hash of the flow's address/port tuple, shared by query and response.
    pub flow_key: u32,
    pub id: u16,
    pub response: bool,
    #[serde(default)]
    pub rcode: u16,
    #[serde(default)]
    pub qtype: u16,
    #[serde(default)]
    pub qname: String,
    #[serde(default)]
    pub size: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    EchoRequest,
    EchoReply,
    /// The probe could not be sent, e.g. the target failed to resolve.
    Fail,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProbeEvent {
    pub stamp: Timestamp,
    pub target: String,
    pub kind: ProbeKind,
    #[serde(default)]
    pub id: u16,
    #[serde(default)]
    pub sequence: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResourcesEvent {
    pub stamp: Timestamp,
    pub cpu_percent: u64,
    pub memory_bytes: u64,
    #[serde(default)]
    pub policy_count: Option<u64>,
    #[serde(default)]
    pub handler_count: Option<u64>,
}

/// Decoded event delivered by an input.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    Packet(PacketEvent),
    Dns(DnsEvent),
    Probe(ProbeEvent),
    Resources(ResourcesEvent),
    /// Time passes on an otherwise idle input.
    Heartbeat { stamp: Timestamp },
    /// First timestamp of a recorded source.
    StartTstamp { stamp: Timestamp },
    /// Last timestamp of a recorded source.
    EndTstamp { stamp: Timestamp },
}

impl InputEvent {
    #[must_use]
    pub const fn stamp(&self) -> Timestamp {
        match self {
            InputEvent::Packet(event) => event.stamp,
            InputEvent::Dns(event) => event.stamp,
            InputEvent::Probe(event) => event.stamp,
            InputEvent::Resources(event) => event.stamp,
            InputEvent::Heartbeat { stamp }
            | InputEvent::StartTstamp { stamp }
            | InputEvent::EndTstamp { stamp } => *stamp,
        }
    }
}

type Callback = Arc<dyn Fn(&InputEvent) + Send + Sync>;

/// Fan-out point between one input and the handlers bound to it.
pub struct InputEventProxy {
    name: String,
    kind: InputKind,
    subscribers: RwLock<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl fmt::Debug for InputEventProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputEventProxy")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl InputEventProxy {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: InputKind) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind,
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> InputKind {
        self.kind
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Register `callback`; it receives every dispatched event until the
    /// returned [`Subscription`] is stopped or dropped, after which
    /// `on_release` runs once.
    pub fn subscribe<F, R>(self: &Arc<Self>, callback: F, on_release: R) -> Subscription
    where
        F: Fn(&InputEvent) + Send + Sync + 'static,
        R: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, Arc::new(callback)));
        Subscription {
            proxy: Arc::downgrade(self),
            id,
            on_release: Some(Box::new(on_release)),
        }
    }

    /// Deliver `event` to every current subscriber.
    pub fn dispatch(&self, event: &InputEvent) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.write().retain(|(existing, _)| *existing != id);
    }
}

/// Live registration on an [`InputEventProxy`]. Released on `stop` or drop.
pub struct Subscription {
    proxy: Weak<InputEventProxy>,
    id: u64,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.on_release.is_some())
            .finish()
    }
}

impl Subscription {
    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(on_release) = self.on_release.take() else {
            return;
        };
        if let Some(proxy) = self.proxy.upgrade() {
            proxy.unsubscribe(self.id);
        }
        on_release();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
