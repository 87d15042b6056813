// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The simulated network: hosts, links, an optional shared bottleneck, and
//! traffic sources, all driven by one event queue.
//!
//! Data packets leave a sender host through its Bwm queue disc and egress
//! link, optionally cross the bottleneck (where standing queues earn CE
//! marks), and arrive at the destination host, which counts them, feeds the
//! CAWC scoreboard, and acks window senders. Control datagrams (CAWC
//! feedback) travel on propagation delay alone; the shaped egress path is
//! for data.

use crate::exec::EventQueue;
use bwm_control::{
    agent::{Admitter, LocalAgent},
    coordinator::Coordinator,
    flow::FlowKey,
};
use bwm_core::{
    cc::{self, WeightedController},
    event::Subscriber,
    hash::assign_flow_id,
    ids::{TenantId, TraceId},
    inet::{ExplicitCongestionNotification, IPV4_HEADER_LEN},
    packet::Packet,
    qdisc::bwm::{BwmQueueDisc, EnqueueResult},
    random::XorShift,
    rate::DataRate,
    tags::{FlowIdTag, TenantIdTag},
    time::{Duration, Timestamp},
};
use std::{collections::VecDeque, fmt::Write as _, net::Ipv4Addr};

/// Payload bytes of one modeled data segment
pub const SEGMENT_SIZE: usize = 1000;

/// Initial window of a window sender, in segments
const INITIAL_WINDOW: u32 = 10;

#[derive(Clone, Copy, Debug)]
pub struct LinkParams {
    pub rate: DataRate,
    pub delay: Duration,
    pub qdisc_size: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct BottleneckSpec {
    pub rate: DataRate,
    pub delay: Duration,
    pub max_size: usize,
}

#[derive(Clone, Debug)]
pub struct TenantSpec {
    pub id: u32,
    pub bf: String,
    /// `(host index, weight)` overrides
    pub weights: Vec<(usize, f64)>,
}

#[derive(Clone, Copy, Debug)]
pub struct FlowSpec {
    pub src: usize,
    pub dst: usize,
    pub start: Duration,
    pub stop: Duration,
    pub trace_id: u32,
    pub tenant_id: u32,
    /// Offered rate; `None` saturates the source link (or runs a window
    /// sender when a congestion controller is selected)
    pub demand: Option<DataRate>,
}

struct SimHost {
    addr: Ipv4Addr,
    agent: LocalAgent,
    qdisc: BwmQueueDisc,
    link: LinkParams,
    tx_busy: bool,
}

enum Sender {
    Rate {
        demand: DataRate,
    },
    Window {
        controller: Box<dyn WeightedController>,
        state: cc::State,
        inflight: usize,
        send_times: VecDeque<Timestamp>,
    },
}

struct SimFlow {
    trace_id: TraceId,
    tenant_id: TenantId,
    src: usize,
    dst: usize,
    start: Timestamp,
    stop: Timestamp,
    sender: Sender,
    delivered_bytes: u64,
    steady_bytes: u64,
    drops: u64,
}

struct Bottleneck {
    spec: BottleneckSpec,
    ce_threshold: usize,
    queue: VecDeque<(usize, Packet)>,
    busy: bool,
}

enum Event {
    Tune { host: usize },
    Report { host: usize },
    Sweep { host: usize },
    Send { flow: usize },
    TryTx { host: usize },
    HostTxDone { host: usize },
    BottleneckRx { flow: usize, packet: Packet },
    BottleneckTxDone { flow: usize, packet: Packet },
    Deliver { host: usize, flow: Option<usize>, packet: Packet },
    Ack { flow: usize, bytes: usize },
}

pub struct Simulation {
    coordinator: Coordinator,
    hosts: Vec<SimHost>,
    flows: Vec<SimFlow>,
    bottleneck: Option<Bottleneck>,
    queue: EventQueue<Event>,
    rng: XorShift,
    cawc: bool,
    stop_at: Timestamp,
    steady_from: Timestamp,
}

/// Per-flow outcome of a run
#[derive(Clone, Debug)]
pub struct FlowReport {
    pub trace_id: TraceId,
    pub tenant_id: TenantId,
    pub delivered_bytes: u64,
    /// Delivery rate over the second half of the run, bits/s
    pub steady_rate: f64,
    pub drops: u64,
    pub allocated_fair_share: f64,
    pub reported_usage: f64,
}

#[derive(Clone, Debug)]
pub struct SimReport {
    pub flows: Vec<FlowReport>,
    pub tenant_fair_shares: Vec<(TenantId, f64)>,
}

impl SimReport {
    pub fn flow(&self, trace_id: u32) -> &FlowReport {
        self.flows
            .iter()
            .find(|flow| flow.trace_id == TraceId(trace_id))
            .expect("unknown trace id")
    }

    pub fn tenant_fair_share(&self, tenant_id: u32) -> f64 {
        self.tenant_fair_shares
            .iter()
            .find(|(id, _)| *id == TenantId(tenant_id))
            .map(|(_, fair_share)| *fair_share)
            .expect("unknown tenant id")
    }
}

impl Simulation {
    pub fn builder() -> SimBuilder {
        SimBuilder::default()
    }

    /// Runs the event loop to the configured stop time
    pub fn run<S: Subscriber>(&mut self, events: &mut S) -> SimReport {
        while let Some((now, event)) = self.queue.pop() {
            if now > self.stop_at {
                break;
            }
            self.dispatch(event, now, events);
        }

        self.report()
    }

    fn dispatch<S: Subscriber>(&mut self, event: Event, now: Timestamp, events: &mut S) {
        match event {
            Event::Tune { host } => {
                let cycle = {
                    let h = &mut self.hosts[host];
                    h.agent.tune(&mut self.coordinator, &mut h.qdisc, now, events);
                    h.agent.tune_cycle()
                };
                self.queue.schedule(now + cycle, Event::Tune { host });
                // a raised rate may release a head packet earlier than the
                // pending retry
                self.kick_tx(host, now);
            }
            Event::Report { host } => {
                let cycle = {
                    let h = &mut self.hosts[host];
                    h.agent
                        .report(&mut self.coordinator, &mut h.qdisc, now, events);
                    h.agent.report_cycle()
                };
                self.queue.schedule(now + cycle, Event::Report { host });
            }
            Event::Sweep { host } => {
                let (feedback, cycle) = {
                    let h = &mut self.hosts[host];
                    (h.agent.sweep_scoreboard(now), h.agent.feedback_cycle())
                };
                for packet in feedback {
                    self.route_control(host, packet, now);
                }
                self.queue.schedule(now + cycle, Event::Sweep { host });
            }
            Event::Send { flow } => self.on_send(flow, now, events),
            Event::TryTx { host } => self.kick_tx(host, now),
            Event::HostTxDone { host } => {
                self.hosts[host].tx_busy = false;
                self.kick_tx(host, now);
            }
            Event::BottleneckRx { flow, packet } => self.on_bottleneck_rx(flow, packet, now, events),
            Event::BottleneckTxDone { flow, packet } => {
                let delay = match &mut self.bottleneck {
                    Some(bottleneck) => {
                        bottleneck.busy = false;
                        bottleneck.spec.delay
                    }
                    None => Duration::ZERO,
                };
                let dst = self.flows[flow].dst;
                self.queue.schedule(
                    now + delay,
                    Event::Deliver {
                        host: dst,
                        flow: Some(flow),
                        packet,
                    },
                );
                self.bottleneck_start(now);
            }
            Event::Deliver { host, flow, packet } => self.on_deliver(host, flow, packet, now, events),
            Event::Ack { flow, bytes } => self.on_ack(flow, bytes, now, events),
        }
    }

    fn on_send<S: Subscriber>(&mut self, flow_index: usize, now: Timestamp, events: &mut S) {
        let flow = &self.flows[flow_index];
        if now >= flow.stop {
            return;
        }

        match &flow.sender {
            Sender::Rate { demand } => {
                let interval = demand.transmission_time(SEGMENT_SIZE + IPV4_HEADER_LEN);
                let stop = flow.stop;

                let packet = self.data_packet(flow_index);
                self.enqueue_at_source(flow_index, packet, now, events);

                let next = now + interval;
                if next < stop {
                    self.queue.schedule(next, Event::Send { flow: flow_index });
                }
            }
            Sender::Window { .. } => self.pump_window(flow_index, now, events),
        }
    }

    fn on_ack<S: Subscriber>(
        &mut self,
        flow_index: usize,
        bytes: usize,
        now: Timestamp,
        events: &mut S,
    ) {
        {
            let flow = &mut self.flows[flow_index];
            let trace_id = flow.trace_id;
            let Sender::Window {
                controller,
                state,
                inflight,
                send_times,
            } = &mut flow.sender
            else {
                return;
            };

            *inflight = inflight.saturating_sub(bytes);
            if let Some(sent) = send_times.pop_front() {
                events.on_rtt(now, trace_id, now - sent);
            }
            controller.increase_window(state, 1);
            events.on_cwnd(now, trace_id, state.cwnd);
        }

        self.pump_window(flow_index, now, events);
    }

    /// Sends as much as the window allows
    fn pump_window<S: Subscriber>(&mut self, flow_index: usize, now: Timestamp, events: &mut S) {
        loop {
            {
                let flow = &self.flows[flow_index];
                if now >= flow.stop {
                    return;
                }
                let Sender::Window {
                    state, inflight, ..
                } = &flow.sender
                else {
                    return;
                };
                if *inflight + SEGMENT_SIZE > state.cwnd as usize {
                    return;
                }
            }

            let packet = self.data_packet(flow_index);
            if self.enqueue_at_source(flow_index, packet, now, events) {
                if let Sender::Window {
                    inflight,
                    send_times,
                    ..
                } = &mut self.flows[flow_index].sender
                {
                    *inflight += SEGMENT_SIZE;
                    send_times.push_back(now);
                }
            } else {
                // the local queue pushed back; treat it as a loss signal
                self.note_loss(flow_index, false, now, events);
                return;
            }
        }
    }

    /// Enqueues a packet at the flow's source host. Returns whether the
    /// packet was accepted.
    fn enqueue_at_source<S: Subscriber>(
        &mut self,
        flow_index: usize,
        packet: Packet,
        now: Timestamp,
        events: &mut S,
    ) -> bool {
        let src = self.flows[flow_index].src;

        let outcome = {
            let host = &mut self.hosts[src];
            host.qdisc.enqueue(
                packet,
                &mut Admitter {
                    agent: &mut host.agent,
                    coordinator: &mut self.coordinator,
                },
                &mut self.rng,
            )
        };

        for evicted in outcome.evicted {
            if let Some(victim) = self.flow_by_trace(evicted.tags.flow_id) {
                self.flows[victim].drops += 1;
                self.note_loss(victim, true, now, events);
            }
        }

        let queued = matches!(outcome.result, EnqueueResult::Queued(_));
        if !queued {
            self.flows[flow_index].drops += 1;
        }

        self.kick_tx(src, now);
        queued
    }

    /// Serves the host egress: dequeues through the shaped classes and puts
    /// the packet on the wire
    fn kick_tx(&mut self, host_index: usize, now: Timestamp) {
        let (packet, tx_time, link_delay) = {
            let host = &mut self.hosts[host_index];
            if host.tx_busy {
                return;
            }
            match host.qdisc.dequeue(now) {
                Some((packet, _class)) => {
                    host.tx_busy = true;
                    let tx_time = host.link.rate.transmission_time(packet.len());
                    (packet, tx_time, host.link.delay)
                }
                None => {
                    if let Some(at) = host.qdisc.next_ready(now) {
                        self.queue.schedule(at, Event::TryTx { host: host_index });
                    }
                    return;
                }
            }
        };

        self.queue
            .schedule(now + tx_time, Event::HostTxDone { host: host_index });

        let arrival = now + tx_time + link_delay;
        let flow_index = self.flow_by_trace(packet.tags.flow_id);

        match (flow_index, &self.bottleneck) {
            (Some(flow), Some(_)) => {
                self.queue
                    .schedule(arrival, Event::BottleneckRx { flow, packet });
            }
            (Some(flow), None) => {
                let dst = self.flows[flow].dst;
                self.queue.schedule(
                    arrival,
                    Event::Deliver {
                        host: dst,
                        flow: Some(flow),
                        packet,
                    },
                );
            }
            (None, _) => {
                // untagged traffic from the default class
                if let Some(dst) = self.host_by_addr(packet.dst()) {
                    self.queue.schedule(
                        arrival,
                        Event::Deliver {
                            host: dst,
                            flow: None,
                            packet,
                        },
                    );
                }
            }
        }
    }

    fn on_bottleneck_rx<S: Subscriber>(
        &mut self,
        flow_index: usize,
        packet: Packet,
        now: Timestamp,
        events: &mut S,
    ) {
        let full = match &mut self.bottleneck {
            Some(bottleneck) => {
                if bottleneck.queue.len() >= bottleneck.spec.max_size {
                    true
                } else {
                    bottleneck.queue.push_back((flow_index, packet));
                    false
                }
            }
            None => return,
        };

        if full {
            self.flows[flow_index].drops += 1;
            self.note_loss(flow_index, true, now, events);
        } else {
            self.bottleneck_start(now);
        }
    }

    fn bottleneck_start(&mut self, now: Timestamp) {
        let scheduled = match &mut self.bottleneck {
            Some(bottleneck) if !bottleneck.busy => match bottleneck.queue.pop_front() {
                Some((flow, mut packet)) => {
                    bottleneck.busy = true;
                    // a standing queue marks congestion on the way through
                    if bottleneck.queue.len() > bottleneck.ce_threshold {
                        packet.set_ecn(ExplicitCongestionNotification::Ce);
                    }
                    let tx_time = bottleneck.spec.rate.transmission_time(packet.len());
                    Some((now + tx_time, Event::BottleneckTxDone { flow, packet }))
                }
                None => None,
            },
            _ => None,
        };

        if let Some((at, event)) = scheduled {
            self.queue.schedule(at, event);
        }
    }

    fn on_deliver<S: Subscriber>(
        &mut self,
        host_index: usize,
        flow_index: Option<usize>,
        packet: Packet,
        now: Timestamp,
        events: &mut S,
    ) {
        if let Some(flow_index) = flow_index {
            let steady_from = self.steady_from;
            let flow = &mut self.flows[flow_index];
            events.on_rx(now, flow.trace_id, packet.len());
            flow.delivered_bytes += packet.len() as u64;
            if now >= steady_from {
                flow.steady_bytes += packet.len() as u64;
            }
        }

        // the receive hook is only installed when CAWC is on
        if self.cawc {
            let feedback = {
                let host = &mut self.hosts[host_index];
                host.agent.on_receive(&mut self.coordinator, &packet, now)
            };
            if let Some(feedback) = feedback {
                self.route_control(host_index, feedback, now);
            }
        }

        if let Some(flow_index) = flow_index {
            let flow = &self.flows[flow_index];
            if matches!(flow.sender, Sender::Window { .. }) {
                let delay = self.path_delay(flow.src, flow.dst);
                self.queue.schedule(
                    now + delay,
                    Event::Ack {
                        flow: flow_index,
                        bytes: packet.payload_size(),
                    },
                );
            }
        }
    }

    /// Applies a loss signal to a window sender. Drop accounting happens at
    /// the drop site.
    fn note_loss<S: Subscriber>(
        &mut self,
        flow_index: usize,
        in_flight: bool,
        now: Timestamp,
        events: &mut S,
    ) {
        let flow = &mut self.flows[flow_index];

        if let Sender::Window {
            controller,
            state,
            inflight,
            send_times,
        } = &mut flow.sender
        {
            state.on_loss(controller.as_ref(), *inflight as u32);
            if in_flight {
                *inflight = inflight.saturating_sub(SEGMENT_SIZE);
                send_times.pop_front();
            }
            events.on_cwnd(now, flow.trace_id, state.cwnd);
        }
    }

    /// Control datagrams travel on propagation delay alone
    fn route_control(&mut self, from_host: usize, packet: Packet, now: Timestamp) {
        let Some(dst) = self.host_by_addr(packet.dst()) else {
            return;
        };
        let delay = self.path_delay(from_host, dst);
        self.queue.schedule(
            now + delay,
            Event::Deliver {
                host: dst,
                flow: None,
                packet,
            },
        );
    }

    fn data_packet(&self, flow_index: usize) -> Packet {
        let flow = &self.flows[flow_index];
        Packet::data(
            self.hosts[flow.src].addr,
            self.hosts[flow.dst].addr,
            SEGMENT_SIZE,
        )
        .with_tenant(TenantIdTag(flow.tenant_id))
        .with_flow(FlowIdTag(flow.trace_id))
    }

    fn flow_by_trace(&self, tag: Option<FlowIdTag>) -> Option<usize> {
        let trace_id = tag?.0;
        self.flows
            .iter()
            .position(|flow| flow.trace_id == trace_id)
    }

    fn host_by_addr(&self, addr: Ipv4Addr) -> Option<usize> {
        self.hosts.iter().position(|host| host.addr == addr)
    }

    /// One-way propagation between two hosts
    fn path_delay(&self, from: usize, to: usize) -> Duration {
        let mut delay = self.hosts[from].link.delay + self.hosts[to].link.delay;
        if let Some(bottleneck) = &self.bottleneck {
            delay += bottleneck.spec.delay;
        }
        delay
    }

    fn report(&self) -> SimReport {
        let steady_window = self.stop_at.saturating_since(self.steady_from);
        let steady_secs = steady_window.as_secs_f64().max(f64::EPSILON);

        let flows = self
            .flows
            .iter()
            .map(|flow| {
                let key = FlowKey {
                    tenant_id: flow.tenant_id,
                    flow_id: assign_flow_id(
                        flow.tenant_id,
                        self.hosts[flow.src].addr,
                        self.hosts[flow.dst].addr,
                    ),
                };
                let record = self.coordinator.flow(key);

                FlowReport {
                    trace_id: flow.trace_id,
                    tenant_id: flow.tenant_id,
                    delivered_bytes: flow.delivered_bytes,
                    steady_rate: flow.steady_bytes as f64 * 8.0 / steady_secs,
                    drops: flow.drops,
                    allocated_fair_share: record.map(|flow| flow.allocated_fs()).unwrap_or(0.0),
                    reported_usage: record.map(|flow| flow.usage()).unwrap_or(0.0),
                }
            })
            .collect();

        let tenant_fair_shares = self
            .coordinator
            .tenants()
            .map(|tenant| (tenant.tenant_id(), tenant.actual_fair_share()))
            .collect();

        SimReport {
            flows,
            tenant_fair_shares,
        }
    }
}

pub struct SimBuilder {
    alpha: f64,
    min_fair_share: f64,
    learning_rate: f64,
    cawc: bool,
    cc: Option<cc::Variant>,
    hosts: Vec<LinkParams>,
    tenants: Vec<TenantSpec>,
    tenant_config: Option<String>,
    flows: Vec<FlowSpec>,
    bottleneck: Option<BottleneckSpec>,
    ce_threshold: usize,
    stop: Duration,
    seed: u64,
}

impl Default for SimBuilder {
    fn default() -> Self {
        Self {
            alpha: bwm_control::coordinator::DEFAULT_ALPHA,
            min_fair_share: bwm_control::coordinator::DEFAULT_MIN_FAIR_SHARE,
            learning_rate: bwm_control::agent::DEFAULT_LEARNING_RATE,
            cawc: false,
            cc: None,
            hosts: Vec::new(),
            tenants: Vec::new(),
            tenant_config: None,
            flows: Vec::new(),
            bottleneck: None,
            ce_threshold: 20,
            stop: Duration::from_secs(1),
            seed: 0x5eed,
        }
    }
}

impl SimBuilder {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_min_fair_share(mut self, min_fair_share: f64) -> Self {
        self.min_fair_share = min_fair_share;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_cawc(mut self, enabled: bool) -> Self {
        self.cawc = enabled;
        self
    }

    /// Replaces the rate senders with window senders driving this
    /// congestion-control variant
    pub fn with_congestion_control(mut self, variant: cc::Variant) -> Self {
        self.cc = Some(variant);
        self
    }

    pub fn with_stop(mut self, stop: Duration) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_bottleneck(mut self, spec: BottleneckSpec) -> Self {
        self.bottleneck = Some(spec);
        self
    }

    /// Queue depth at the bottleneck above which packets are CE marked
    pub fn with_ce_threshold(mut self, packets: usize) -> Self {
        self.ce_threshold = packets;
        self
    }

    /// Adds a host; returns are index-ordered, the first host is index 0
    pub fn host(mut self, link: LinkParams) -> Self {
        self.hosts.push(link);
        self
    }

    /// Uses a tenant configuration in the 3-line file format verbatim,
    /// instead of the [`SimBuilder::tenant`] specs
    pub fn with_tenant_config(mut self, text: impl Into<String>) -> Self {
        self.tenant_config = Some(text.into());
        self
    }

    pub fn tenant(mut self, id: u32, bf: &str) -> Self {
        self.tenants.push(TenantSpec {
            id,
            bf: bf.to_string(),
            weights: Vec::new(),
        });
        self
    }

    pub fn tenant_with_weights(mut self, id: u32, bf: &str, weights: &[(usize, f64)]) -> Self {
        self.tenants.push(TenantSpec {
            id,
            bf: bf.to_string(),
            weights: weights.to_vec(),
        });
        self
    }

    pub fn flow(mut self, spec: FlowSpec) -> Self {
        self.flows.push(spec);
        self
    }

    pub fn build(self) -> Simulation {
        let mut coordinator = Coordinator::builder()
            .with_alpha(self.alpha)
            .with_min_fair_share(self.min_fair_share)
            .build();

        // the builder feeds the same 3-line records the configuration file
        // parser accepts
        let tenant_config = self.tenant_config.unwrap_or_else(|| {
            let mut text = String::new();
            for tenant in &self.tenants {
                let _ = writeln!(text, "{}", tenant.id);
                let _ = writeln!(text, "{}", tenant.bf);
                let mut weights = String::new();
                for (host, weight) in &tenant.weights {
                    if !weights.is_empty() {
                        weights.push(' ');
                    }
                    let _ = write!(weights, "{host},{weight}");
                }
                let _ = writeln!(text, "{weights}");
            }
            text
        });
        coordinator
            .load_tenants(tenant_config.as_bytes())
            .expect("invalid tenant configuration");

        let mut hosts: Vec<SimHost> = self
            .hosts
            .iter()
            .enumerate()
            .map(|(index, &link)| {
                let addr = Ipv4Addr::new(10, 0, 0, (index + 1) as u8);
                let agent = LocalAgent::builder(addr, link.rate)
                    .with_learning_rate(self.learning_rate)
                    .with_cawc(self.cawc)
                    .build();
                let qdisc = BwmQueueDisc::builder()
                    .with_max_size(link.qdisc_size)
                    .build(link.rate);

                SimHost {
                    addr,
                    agent,
                    qdisc,
                    link,
                    tx_busy: false,
                }
            })
            .collect();

        for host in &mut hosts {
            host.agent.register(&mut coordinator);
        }

        let flows: Vec<SimFlow> = self
            .flows
            .iter()
            .map(|spec| {
                let sender = match (spec.demand, self.cc) {
                    (Some(demand), _) => Sender::Rate { demand },
                    (None, Some(variant)) => Sender::Window {
                        controller: variant.controller(),
                        state: cc::State::new(SEGMENT_SIZE as u32, 1.0)
                            .with_initial_window(INITIAL_WINDOW),
                        inflight: 0,
                        send_times: VecDeque::new(),
                    },
                    (None, None) => Sender::Rate {
                        demand: hosts[spec.src].link.rate,
                    },
                };

                SimFlow {
                    trace_id: TraceId(spec.trace_id),
                    tenant_id: TenantId(spec.tenant_id),
                    src: spec.src,
                    dst: spec.dst,
                    start: Timestamp::from_duration(spec.start),
                    stop: Timestamp::from_duration(spec.stop),
                    sender,
                    delivered_bytes: 0,
                    steady_bytes: 0,
                    drops: 0,
                }
            })
            .collect();

        let stop_at = Timestamp::from_duration(self.stop);
        let steady_from = Timestamp::from_duration(self.stop / 2);

        let mut queue = EventQueue::default();
        let origin = Timestamp::default();
        for (index, host) in hosts.iter().enumerate() {
            queue.schedule(origin + host.agent.tune_cycle(), Event::Tune { host: index });
            queue.schedule(
                origin + host.agent.report_cycle(),
                Event::Report { host: index },
            );
            if self.cawc {
                queue.schedule(
                    origin + host.agent.feedback_cycle(),
                    Event::Sweep { host: index },
                );
            }
        }
        for (index, flow) in flows.iter().enumerate() {
            queue.schedule(flow.start, Event::Send { flow: index });
        }

        Simulation {
            coordinator,
            hosts,
            flows,
            bottleneck: self.bottleneck.map(|spec| Bottleneck {
                spec,
                ce_threshold: self.ce_threshold,
                queue: VecDeque::new(),
                busy: false,
            }),
            queue,
            rng: XorShift::new(self.seed),
            cawc: self.cawc,
            stop_at,
            steady_from,
        }
    }
}
