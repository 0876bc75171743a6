use std::net::IpAddr;
use std::sync::atomic::AtomicBool;

use serde::Serialize;

use super::{
    HandlerKind, HandlerSummary, InputEvent, InputEventProxy, PacketEvent, StreamHandler,
    SummaryQuery, check_binding, handle_timing, process_error, window_summary,
};
use super::input::{Direction, L3, L4};
use crate::aggregate::{
    Aggregate, Aggregator, Cardinality, Counter, LgK, Quantile, QuantileSummary, Rate,
    RateSummary, TopN, TopNEntry,
};
use crate::error::{ConfigError, HandlerError, MetricsError};
use crate::window::{BucketState, NoHook, WindowConfig, WindowManager};

pub const DEFAULT_TOPN_COUNT: usize = 10;
// Items tracked per reported entry in frequent-item summaries.
const TOPN_TRACKING_FACTOR: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    lg_k: LgK,
    topn_count: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            lg_k: LgK::default(),
            topn_count: DEFAULT_TOPN_COUNT,
        }
    }
}

impl NetConfig {
    /// # Errors
    ///
    /// Returns an error when `lg_k` is out of range or `topn_count` is zero.
    pub fn new(lg_k: u8, topn_count: usize) -> Result<Self, ConfigError> {
        if topn_count == 0 {
            return Err(ConfigError::FieldMustBePositive {
                field: "net.topn_count",
            });
        }
        Ok(Self {
            lg_k: LgK::try_from(lg_k)?,
            topn_count,
        })
    }

    #[must_use]
    pub const fn lg_k(&self) -> LgK {
        self.lg_k
    }

    #[must_use]
    pub const fn topn_count(&self) -> usize {
        self.topn_count
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NetCounters {
    pub total: Counter,
    pub ipv4: Counter,
    pub ipv6: Counter,
    pub udp: Counter,
    pub tcp: Counter,
    pub other_l4: Counter,
    pub tcp_syn: Counter,
    pub total_in: Counter,
    pub total_out: Counter,
    pub unknown_dir: Counter,
}

impl NetCounters {
    fn merge(&mut self, other: &NetCounters) {
        let pairs = [
            (&mut self.total, other.total),
            (&mut self.ipv4, other.ipv4),
            (&mut self.ipv6, other.ipv6),
            (&mut self.udp, other.udp),
            (&mut self.tcp, other.tcp),
            (&mut self.other_l4, other.other_l4),
            (&mut self.tcp_syn, other.tcp_syn),
            (&mut self.total_in, other.total_in),
            (&mut self.total_out, other.total_out),
            (&mut self.unknown_dir, other.unknown_dir),
        ];
        for (mine, theirs) in pairs {
            mine.merge_with(&theirs, Aggregate::Sum);
        }
    }
}

/// Packet-level statistics for one period.
#[derive(Debug)]
pub struct NetState {
    counters: NetCounters,
    src_ips_in: Cardinality,
    dst_ips_out: Cardinality,
    top_ipv4: TopN<IpAddr>,
    top_ipv6: TopN<IpAddr>,
    payload_size: Quantile,
    rate_in: Rate,
    rate_out: Rate,
    rate_total: Rate,
    topn_count: usize,
}

#[derive(Debug, Serialize)]
pub struct NetSnapshot {
    #[serde(flatten)]
    pub counters: NetCounters,
    pub cardinality: NetCardinality,
    pub top_ipv4: Vec<TopNEntry<IpAddr>>,
    pub top_ipv6: Vec<TopNEntry<IpAddr>>,
    pub payload_size: QuantileSummary,
    pub rates: NetRates,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct NetCardinality {
    pub src_ips_in: u64,
    pub dst_ips_out: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct NetRates {
    pub pps_in: RateSummary,
    pub pps_out: RateSummary,
    pub pps_total: RateSummary,
}

impl NetState {
    #[must_use]
    pub const fn counters(&self) -> &NetCounters {
        &self.counters
    }

    #[must_use]
    pub fn src_ips_in(&self) -> u64 {
        self.src_ips_in.estimate()
    }

    #[must_use]
    pub fn dst_ips_out(&self) -> u64 {
        self.dst_ips_out.estimate()
    }

    #[must_use]
    pub fn top_ips(&self) -> (Vec<TopNEntry<IpAddr>>, Vec<TopNEntry<IpAddr>>) {
        (
            self.top_ipv4.top(self.topn_count),
            self.top_ipv6.top(self.topn_count),
        )
    }

    pub fn process_packet(&mut self, packet: &PacketEvent, deep: bool) {
        self.counters.total.inc();
        self.rate_total.add(packet.stamp, 1);
        match packet.l3 {
            L3::Ipv4 => self.counters.ipv4.inc(),
            L3::Ipv6 => self.counters.ipv6.inc(),
        }
        match packet.l4 {
            L4::Udp => self.counters.udp.inc(),
            L4::Tcp => {
                self.counters.tcp.inc();
                if packet.syn {
                    self.counters.tcp_syn.inc();
                }
            }
            L4::Other => self.counters.other_l4.inc(),
        }

        // The remote side: sender of inbound packets, receiver of outbound.
        let remote = match packet.direction {
            Direction::ToHost => {
                self.counters.total_in.inc();
                self.rate_in.add(packet.stamp, 1);
                packet.src
            }
            Direction::FromHost => {
                self.counters.total_out.inc();
                self.rate_out.add(packet.stamp, 1);
                packet.dst
            }
            Direction::Unknown => {
                self.counters.unknown_dir.inc();
                packet.src
            }
        };

        if !deep {
            return;
        }
        self.payload_size.record(u64::from(packet.size));
        match packet.direction {
            Direction::ToHost => {
                if let Some(src) = packet.src {
                    self.src_ips_in.observe(&src);
                }
            }
            Direction::FromHost => {
                if let Some(dst) = packet.dst {
                    self.dst_ips_out.observe(&dst);
                }
            }
            Direction::Unknown => {}
        }
        match remote {
            Some(addr @ IpAddr::V4(_)) => self.top_ipv4.update_weighted(addr, 1),
            Some(addr @ IpAddr::V6(_)) => self.top_ipv6.update_weighted(addr, 1),
            None => {}
        }
    }
}

impl BucketState for NetState {
    type Config = NetConfig;
    type Snapshot = NetSnapshot;

    fn new(config: &NetConfig) -> Result<Self, MetricsError> {
        let tracked = config.topn_count.saturating_mul(TOPN_TRACKING_FACTOR);
        Ok(Self {
            counters: NetCounters::default(),
            src_ips_in: Cardinality::new(config.lg_k),
            dst_ips_out: Cardinality::new(config.lg_k),
            top_ipv4: TopN::new(tracked),
            top_ipv6: TopN::new(tracked),
            payload_size: Quantile::new()?,
            rate_in: Rate::new()?,
            rate_out: Rate::new()?,
            rate_total: Rate::new()?,
            topn_count: config.topn_count,
        })
    }

    fn specialized_merge(&mut self, other: &Self, _op: Aggregate) -> Result<(), MetricsError> {
        self.counters.merge(&other.counters);
        self.src_ips_in.merge(&other.src_ips_in)?;
        self.dst_ips_out.merge(&other.dst_ips_out)?;
        self.top_ipv4.merge(&other.top_ipv4)?;
        self.top_ipv6.merge(&other.top_ipv6)?;
        self.payload_size.merge(&other.payload_size)?;
        self.rate_in.merge(&other.rate_in)?;
        self.rate_out.merge(&other.rate_out)?;
        self.rate_total.merge(&other.rate_total)?;
        Ok(())
    }

    fn on_set_read_only(&mut self) {
        self.rate_in.cancel();
        self.rate_out.cancel();
        self.rate_total.cancel();
    }

    fn snapshot(&self, live_rates: bool) -> NetSnapshot {
        let (top_ipv4, top_ipv6) = self.top_ips();
        NetSnapshot {
            counters: self.counters,
            cardinality: NetCardinality {
                src_ips_in: self.src_ips_in(),
                dst_ips_out: self.dst_ips_out(),
            },
            top_ipv4,
            top_ipv6,
            payload_size: self.payload_size.summary(),
            rates: NetRates {
                pps_in: self.rate_in.summary(live_rates),
                pps_out: self.rate_out.summary(live_rates),
                pps_total: self.rate_total.summary(live_rates),
            },
        }
    }
}

/// Packet counters, address cardinality and top talkers.
pub struct NetHandler {
    name: String,
    window: WindowManager<NetState>,
    running: AtomicBool,
}

impl NetHandler {
    /// # Errors
    ///
    /// Returns an error if `input` is not a packet-carrying input or the
    /// window cannot be created.
    pub fn new(
        name: String,
        input: &InputEventProxy,
        window: WindowConfig,
        config: &NetConfig,
    ) -> Result<Self, HandlerError> {
        check_binding(HandlerKind::Net, input)?;
        let window =
            WindowManager::new(window, *config).map_err(|source| process_error(&name, source))?;
        Ok(Self {
            name,
            window,
            running: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn window(&self) -> &WindowManager<NetState> {
        &self.window
    }

    fn process(&self, event: &InputEvent) -> Result<(), MetricsError> {
        if handle_timing(&self.window, event, &mut NoHook)? {
            return Ok(());
        }
        let InputEvent::Packet(packet) = event else {
            return Ok(());
        };
        self.window
            .record(packet.stamp, &mut NoHook, |state, deep| {
                state.process_packet(packet, deep);
            })
    }
}

impl StreamHandler for NetHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema_key(&self) -> &'static str {
        HandlerKind::Net.schema_key()
    }

    fn running(&self) -> &AtomicBool {
        &self.running
    }

    fn handle_event(&self, event: &InputEvent) -> Result<(), HandlerError> {
        self.process(event)
            .map_err(|source| process_error(&self.name, source))
    }

    fn summary(&self, query: &SummaryQuery) -> Result<HandlerSummary, HandlerError> {
        window_summary(&self.name, self.schema_key(), &self.window, query)
    }
}
