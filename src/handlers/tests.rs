use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::error::{AppError, AppResult, HandlerError};
use crate::time::Timestamp;

fn window_config() -> AppResult<WindowConfig> {
    Ok(WindowConfig::new(3, Duration::from_secs(60), 100)?)
}

fn at_millis(millis: u64) -> Timestamp {
    Timestamp::from_millis(500_000_000 + millis)
}

fn at(secs: u64) -> Timestamp {
    at_millis(secs.saturating_mul(1_000))
}

fn packet(secs: u64, direction: Direction, src: IpAddr, dst: IpAddr) -> InputEvent {
    InputEvent::Packet(PacketEvent {
        stamp: at(secs),
        direction,
        l3: if src.is_ipv4() { L3::Ipv4 } else { L3::Ipv6 },
        l4: L4::Tcp,
        syn: true,
        size: 120,
        src: Some(src),
        dst: Some(dst),
    })
}

fn dns(millis: u64, id: u16, response: bool, qname: &str) -> InputEvent {
    InputEvent::Dns(DnsEvent {
        stamp: at_millis(millis),
        direction: if response {
            Direction::ToHost
        } else {
            Direction::FromHost
        },
        flow_key: 77,
        id,
        response,
        rcode: 0,
        qtype: 1,
        qname: qname.to_owned(),
        size: if response { 200 } else { 50 },
    })
}

fn probe(millis: u64, target: &str, kind: ProbeKind, sequence: u16) -> InputEvent {
    InputEvent::Probe(ProbeEvent {
        stamp: at_millis(millis),
        target: target.to_owned(),
        kind,
        id: 1,
        sequence,
    })
}

fn host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 0, 10))
}

#[test]
fn handler_names_parse_and_reject_unknown() {
    assert_eq!("dns_xact".parse::<HandlerKind>().ok(), Some(HandlerKind::DnsXact));
    assert_eq!(" net ".parse::<HandlerKind>().ok(), Some(HandlerKind::Net));
    assert!(matches!(
        "dhcp".parse::<HandlerKind>(),
        Err(HandlerError::UnknownHandler { .. })
    ));
}

#[test]
fn construction_fails_for_unsupported_input() -> AppResult<()> {
    let input = InputEventProxy::new("probe-input", InputKind::NetProbe);
    match build_handler(HandlerKind::DnsXact, &input, &HandlerSettings::default()) {
        Err(HandlerError::UnsupportedInput {
            handler: "dns_xact",
            kind: InputKind::NetProbe,
            ..
        }) => {}
        Err(_) | Ok(_) => return Err(AppError::handler("Expected unsupported input")),
    }
    let pcap = InputEventProxy::new("pcap", InputKind::Pcap);
    if build_handler(HandlerKind::NetProbe, &pcap, &HandlerSettings::default()).is_ok() {
        return Err(AppError::handler("Probe handler must not bind to pcap"));
    }
    Ok(())
}

#[test]
fn subscription_is_released_on_stop_and_drop() -> AppResult<()> {
    let input = InputEventProxy::new("pcap", InputKind::Pcap);
    let handler = build_handler(HandlerKind::Net, &input, &HandlerSettings::default())?;
    let subscription = start(&handler, &input)?;
    if !matches!(start(&handler, &input), Err(HandlerError::AlreadyRunning { .. })) {
        return Err(AppError::handler("Second start must be rejected"));
    }
    subscription.stop();
    if input.subscriber_count() != 0 || handler.running().load(std::sync::atomic::Ordering::Acquire) {
        return Err(AppError::handler("Stop must unsubscribe and clear running"));
    }
    {
        let _scoped = start(&handler, &input)?;
        if input.subscriber_count() != 1 {
            return Err(AppError::handler("Restart must subscribe again"));
        }
    }
    if input.subscriber_count() != 0 {
        return Err(AppError::handler("Drop must unsubscribe"));
    }
    Ok(())
}

#[test]
fn net_handler_counts_directions_and_addresses() -> AppResult<()> {
    let input = InputEventProxy::new("pcap", InputKind::Pcap);
    let handler = Arc::new(NetHandler::new(
        "pcap-net".to_owned(),
        &input,
        window_config()?,
        &NetConfig::default(),
    )?);
    let _subscription = start(&handler, &input)?;
    let remote_v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
    for (index, octet) in (1..=20u8).enumerate() {
        let remote = IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet));
        let secs = u64::try_from(index).unwrap_or(0);
        input.dispatch(&packet(secs, Direction::ToHost, remote, host()));
    }
    input.dispatch(&packet(30, Direction::FromHost, host(), remote_v6));
    input.dispatch(&packet(31, Direction::ToHost, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), host()));

    let live = handler.window().live_bucket();
    let (counters, src_in, dst_out, tops) = live.read(|state| {
        (
            *state.counters(),
            state.src_ips_in(),
            state.dst_ips_out(),
            state.top_ips(),
        )
    });
    if counters.total.value() != 22
        || counters.total_in.value() != 21
        || counters.total_out.value() != 1
        || counters.tcp_syn.value() != 22
        || counters.ipv6.value() != 0
    {
        return Err(AppError::handler(HandlerError::TestExpectationValue {
            message: "Unexpected net counters",
            value: format!("{counters:?}"),
        }));
    }
    if !(19..=20).contains(&src_in) || dst_out != 1 {
        return Err(AppError::handler("Unexpected address cardinality"));
    }
    let (top_v4, top_v6) = tops;
    let heaviest = top_v4.first().map(|entry| (entry.item, entry.count));
    if heaviest != Some((IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 2)) || top_v6.len() != 1 {
        return Err(AppError::handler("Unexpected top talkers"));
    }
    Ok(())
}

#[test]
fn dns_transactions_are_timed_and_classified() -> AppResult<()> {
    let input = InputEventProxy::new("dnstap", InputKind::Dnstap);
    let handler = DnsXactHandler::new(
        "dnstap-dns_xact".to_owned(),
        &input,
        window_config()?,
        &DnsXactConfig::new(Duration::from_secs(2), 5)?,
    )?;
    handler.handle_event(&dns(0, 1, false, "fast.example"))?;
    handler.handle_event(&dns(40, 1, true, "fast.example"))?;
    handler.handle_event(&dns(1_000, 2, false, "late.example"))?;
    handler.handle_event(&dns(4_000, 2, true, "late.example"))?;
    handler.handle_event(&dns(5_000, 3, true, "orphan.example"))?;
    handler.handle_event(&dns(6_000, 4, false, "retry.example"))?;
    handler.handle_event(&dns(6_100, 4, false, "retry.example"))?;

    let live = handler.window().live_bucket();
    let (counters, out_summary) = live.read(|state| (*state.counters(), state.xact_out_us().summary()));
    let observed = (
        counters.xacts_total.value(),
        counters.xacts_out.value(),
        counters.timed_out.value(),
        counters.no_match.value(),
        counters.superseded.value(),
    );
    if observed != (1, 1, 1, 1, 1) {
        return Err(AppError::handler(HandlerError::TestExpectationValue {
            message: "Unexpected transaction counters",
            value: format!("{observed:?}"),
        }));
    }
    if out_summary.count != 1 || !(39_900..=40_100).contains(&out_summary.max) {
        return Err(AppError::handler("Expected one 40ms outbound transaction"));
    }
    if handler.open_transactions() != 1 {
        return Err(AppError::handler("Retransmitted query must stay pending once"));
    }
    Ok(())
}

#[test]
fn unanswered_queries_are_purged_into_closing_period() -> AppResult<()> {
    let input = InputEventProxy::new("pcap", InputKind::Pcap);
    let handler = DnsXactHandler::new(
        "pcap-dns_xact".to_owned(),
        &input,
        window_config()?,
        &DnsXactConfig::new(Duration::from_secs(5), 5)?,
    )?;
    handler.handle_event(&dns(0, 10, false, "lost.example"))?;
    handler.handle_event(&dns(58_000, 11, false, "edge.example"))?;
    handler.handle_event(&InputEvent::Heartbeat { stamp: at(61) })?;

    let closed = handler
        .window()
        .bucket(1)
        .ok_or_else(|| AppError::handler("Missing closed period"))?;
    let timed_out = closed.read(|state| state.counters().timed_out.value());
    if timed_out != 1 || handler.open_transactions() != 1 {
        return Err(AppError::handler(HandlerError::TestExpectationValue {
            message: "Only the expired query must be purged",
            value: format!("{timed_out} {}", handler.open_transactions()),
        }));
    }
    Ok(())
}

#[test]
fn slow_transactions_use_previous_period_p90() -> AppResult<()> {
    let input = InputEventProxy::new("pcap", InputKind::Pcap);
    let handler = DnsXactHandler::new(
        "pcap-dns_xact".to_owned(),
        &input,
        window_config()?,
        &DnsXactConfig::new(Duration::from_secs(5), 5)?,
    )?;
    // First period: latencies of 10..=100 ms.
    for step in 1..=10u16 {
        let start = u64::from(step).saturating_mul(1_000);
        let latency = u64::from(step).saturating_mul(10);
        handler.handle_event(&dns(start, step, false, "normal.example"))?;
        handler.handle_event(&dns(start.saturating_add(latency), step, true, "normal.example"))?;
    }
    // Second period: one fast and one slow transaction.
    handler.handle_event(&dns(61_000, 100, false, "quick.example"))?;
    handler.handle_event(&dns(61_005, 100, true, "quick.example"))?;
    handler.handle_event(&dns(62_000, 101, false, "slow.example"))?;
    handler.handle_event(&dns(62_900, 101, true, "slow.example"))?;

    let (_, slow_out) = handler
        .window()
        .live_bucket()
        .read(DnsXactState::top_slow);
    let names: Vec<&str> = slow_out.iter().map(|entry| entry.item.as_str()).collect();
    if names != ["slow.example"] {
        return Err(AppError::handler(HandlerError::TestExpectationValue {
            message: "Unexpected slow transactions",
            value: format!("{names:?}"),
        }));
    }
    Ok(())
}

#[test]
fn probes_are_tracked_per_target() -> AppResult<()> {
    let input = InputEventProxy::new("probes", InputKind::NetProbe);
    let handler = NetProbeHandler::new(
        "probes-netprobe".to_owned(),
        &input,
        window_config()?,
        &NetProbeConfig::new(Duration::from_secs(1))?,
    )?;
    handler.handle_event(&probe(0, "a.example", ProbeKind::EchoRequest, 1))?;
    handler.handle_event(&probe(25, "a.example", ProbeKind::EchoReply, 1))?;
    handler.handle_event(&probe(100, "a.example", ProbeKind::EchoRequest, 2))?;
    handler.handle_event(&probe(200, "b.example", ProbeKind::EchoRequest, 1))?;
    handler.handle_event(&probe(2_500, "b.example", ProbeKind::EchoReply, 1))?;
    handler.handle_event(&probe(3_000, "c.example", ProbeKind::Fail, 0))?;
    handler.handle_event(&InputEvent::Heartbeat { stamp: at(60) })?;

    let closed = handler
        .window()
        .bucket(1)
        .ok_or_else(|| AppError::handler("Missing closed period"))?;
    let (a, b, c) = closed.read(|state| {
        (
            state.target("a.example"),
            state.target("b.example"),
            state.target("c.example"),
        )
    });
    let a = a.ok_or_else(|| AppError::handler("Missing target a"))?;
    let b = b.ok_or_else(|| AppError::handler("Missing target b"))?;
    let c = c.ok_or_else(|| AppError::handler("Missing target c"))?;
    if (a.attempts, a.successes, a.timeouts) != (2, 1, 1) || a.time_us.count != 1 {
        return Err(AppError::handler(HandlerError::TestExpectationValue {
            message: "Unexpected target a",
            value: format!("{a:?}"),
        }));
    }
    if (b.attempts, b.successes, b.timeouts) != (1, 0, 1) || c.failures != 1 {
        return Err(AppError::handler("Unexpected targets b/c"));
    }
    if handler.open_probes() != 0 {
        return Err(AppError::handler("Expired probes must be purged"));
    }
    Ok(())
}

#[test]
fn resource_gauges_merge_as_latest_value() -> AppResult<()> {
    let input = InputEventProxy::new("mock", InputKind::Mock);
    let handler = ResourcesHandler::new("mock-resources".to_owned(), &input, window_config()?)?;
    for (secs, policies) in [(0, 3), (60, 5), (120, 4)] {
        handler.handle_event(&InputEvent::Resources(ResourcesEvent {
            stamp: at(secs),
            cpu_percent: 10,
            memory_bytes: 1_000_000,
            policy_count: Some(policies),
            handler_count: Some(2),
        }))?;
    }
    let query = SummaryQuery {
        periods: 3,
        include_live: true,
        op: crate::aggregate::Aggregate::Latest,
    };
    let summary = handler.summary(&query)?;
    let policies = summary
        .bucket
        .pointer("/metrics/policy_count")
        .and_then(serde_json::Value::as_u64);
    if policies != Some(4) || summary.periods != 2 {
        return Err(AppError::handler(HandlerError::TestExpectationValue {
            message: "Unexpected resources summary",
            value: summary.bucket.to_string(),
        }));
    }
    Ok(())
}

#[test]
fn resource_gauges_survive_idle_newest_period() -> AppResult<()> {
    let input = InputEventProxy::new("mock", InputKind::Mock);
    let handler = ResourcesHandler::new("mock-resources".to_owned(), &input, window_config()?)?;
    handler.handle_event(&InputEvent::Resources(ResourcesEvent {
        stamp: at(0),
        cpu_percent: 10,
        memory_bytes: 1_000_000,
        policy_count: Some(7),
        handler_count: Some(3),
    }))?;
    for secs in [60, 120] {
        handler.handle_event(&InputEvent::Heartbeat { stamp: at(secs) })?;
    }
    let query = SummaryQuery {
        periods: 2,
        include_live: true,
        op: crate::aggregate::Aggregate::Latest,
    };
    let summary = handler.summary(&query)?;
    let reading = |pointer: &str| summary.bucket.pointer(pointer).and_then(serde_json::Value::as_u64);
    if reading("/metrics/policy_count") != Some(7) || reading("/metrics/handler_count") != Some(3) {
        return Err(AppError::handler(HandlerError::TestExpectationValue {
            message: "Idle periods dropped the latest reading",
            value: summary.bucket.to_string(),
        }));
    }
    Ok(())
}
