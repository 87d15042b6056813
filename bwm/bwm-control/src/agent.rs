// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-host local agent.
//!
//! Every tune cycle the agent moves each local flow's fair share toward the
//! coordinator's last target (or expands it opportunistically when CAWC sees
//! an uncongested network), converts the shares to rates through the
//! transformed curves, scales everything down to the device ceiling, and
//! pushes the result into the queue disc classes. Every report cycle it
//! turns the class byte counters into usage rates and reports them. The CAWC
//! side-channel lives here too: the receive-side scoreboard and its sweeper.

use crate::{
    cawc::{self, ScoreboardEntry},
    coordinator::{Coordinator, FlowInfo},
    flow::FlowKey,
};
use bwm_core::{
    event::Subscriber,
    ids::{ClassIndex, HostId, TraceId},
    packet::Packet,
    qdisc::bwm::{AdmissionRequest, AdmissionVerdict, BwmQueueDisc, FlowAdmission},
    rate::DataRate,
    time::{Duration, Timestamp},
};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Default learning rate of the proportional controller
pub const DEFAULT_LEARNING_RATE: f64 = 0.05;

/// Default usage report period
pub const DEFAULT_REPORT_CYCLE: Duration = Duration::from_millis(5);

/// Default rate tuning period
pub const DEFAULT_TUNE_CYCLE: Duration = Duration::from_millis(1);

/// Default CAWC sweep period
pub const DEFAULT_FEEDBACK_CYCLE: Duration = Duration::from_millis(1);

/// Default congestion factor above which a flow follows the coordinator
pub const DEFAULT_CONGESTION_THRESHOLD: f64 = 0.2;

/// Default sampled packet count that triggers a feedback datagram
pub const DEFAULT_FEEDBACK_THRESHOLD: u64 = 50;

/// Fair shares are floored here before tuning so an idle flow cannot tune
/// itself into a dead state
const MIN_TUNED_FAIR_SHARE: f64 = 10.0;

#[derive(Clone, Copy, Debug)]
struct FlowEntry {
    key: FlowKey,
    class: ClassIndex,
    /// The rate last pushed into the class, read back during admission
    last_rate: DataRate,
}

#[derive(Debug)]
pub struct LocalAgent {
    host_id: Option<HostId>,
    addr: Ipv4Addr,
    device_rate_limit: DataRate,
    learning_rate: f64,
    report_cycle: Duration,
    tune_cycle: Duration,
    feedback_cycle: Duration,
    congestion_threshold: f64,
    feedback_threshold: u64,
    cawc_enabled: bool,
    target_fair_share: f64,
    /// Set while the device ceiling is scaling rates down; hands control
    /// back to the coordinator
    rate_limited: bool,
    flows: Vec<FlowEntry>,
    scoreboard: BTreeMap<TraceId, ScoreboardEntry>,
}

impl LocalAgent {
    pub fn builder(addr: Ipv4Addr, device_rate_limit: DataRate) -> Builder {
        Builder::new(addr, device_rate_limit)
    }

    #[inline]
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    #[inline]
    pub fn host_id(&self) -> Option<HostId> {
        self.host_id
    }

    #[inline]
    pub fn device_rate_limit(&self) -> DataRate {
        self.device_rate_limit
    }

    #[inline]
    pub fn report_cycle(&self) -> Duration {
        self.report_cycle
    }

    #[inline]
    pub fn tune_cycle(&self) -> Duration {
        self.tune_cycle
    }

    #[inline]
    pub fn feedback_cycle(&self) -> Duration {
        self.feedback_cycle
    }

    #[inline]
    pub fn cawc_enabled(&self) -> bool {
        self.cawc_enabled
    }

    #[inline]
    pub fn target_fair_share(&self) -> f64 {
        self.target_fair_share
    }

    /// The coordinator's fire-and-forget target delivery
    pub fn set_target_fair_share(&mut self, target: f64) {
        self.target_fair_share = target;
    }

    /// Registers this host with the coordinator
    pub fn register(&mut self, coordinator: &mut Coordinator) -> HostId {
        let host_id = coordinator.register_host(self.addr);
        self.host_id = Some(host_id);
        host_id
    }

    /// One tuning tick.
    ///
    /// Flows follow the coordinator target through the dampened proportional
    /// step, or expand opportunistically under CAWC when the network is
    /// uncongested, there is device headroom and the flow showed usage. The
    /// summed rates are scaled to the device ceiling before being pushed
    /// into the classes.
    pub fn tune<S: Subscriber>(
        &mut self,
        coordinator: &mut Coordinator,
        qdisc: &mut BwmQueueDisc,
        now: Timestamp,
        events: &mut S,
    ) {
        let expansion = 1.0 + 1.0 / self.cycle_ratio();

        let mut rate_sum = 0.0;
        let mut rates = Vec::with_capacity(self.flows.len());
        for entry in &self.flows {
            let Some(flow) = coordinator.flow_mut(entry.key) else {
                rates.push(0.0);
                continue;
            };

            let follow = !self.cawc_enabled
                || flow.congestion_factor() >= self.congestion_threshold
                || self.rate_limited;

            if follow {
                let old = flow.allocated_fs().max(MIN_TUNED_FAIR_SHARE);
                let new = old + (self.target_fair_share - old) * self.learning_rate;
                flow.set_allocated_fs(new);
                events.on_flow_allocated_fair_share(now, flow.trace_id(), new);
                rate_sum += flow.allocated_rate();
            } else if flow.usage() != 0.0 {
                let old = flow.allocated_fs().max(MIN_TUNED_FAIR_SHARE);
                let new = old * expansion;
                flow.set_allocated_fs(new);
                events.on_flow_allocated_fair_share(now, flow.trace_id(), new);
                rate_sum += flow.allocated_rate();
            }

            rates.push(flow.allocated_rate());
        }

        if rate_sum == 0.0 {
            // every flow idle; leave the class rates alone for this tick
            debug!(host = ?self.host_id, "all allocated rates are zero");
            self.rate_limited = false;
            return;
        }

        let limit = self.device_rate_limit.as_f64();
        let scaling = if rate_sum > limit {
            self.rate_limited = true;
            limit / rate_sum
        } else {
            self.rate_limited = false;
            1.0
        };

        for (entry, rate) in self.flows.iter_mut().zip(rates) {
            let scaled = DataRate::from_bps_f64(rate * scaling);
            let Some(class) = qdisc.class_mut(entry.class) else {
                continue;
            };
            if class.set_rate(scaled) {
                entry.last_rate = scaled;
                events.on_class_rate(now, class.trace_id(), scaled);
            } else {
                debug!(flow = %class.trace_id(), "refusing non-positive rate");
            }
        }
    }

    /// One report tick: converts the class byte counters into bits/s over
    /// the report window, reports them, and stores the returned target.
    pub fn report<S: Subscriber>(
        &mut self,
        coordinator: &mut Coordinator,
        qdisc: &mut BwmQueueDisc,
        now: Timestamp,
        events: &mut S,
    ) {
        let report_ms = self.report_cycle.as_secs_f64() * 1000.0;

        let mut usages = Vec::with_capacity(self.flows.len());
        for entry in &self.flows {
            let Some(class) = qdisc.class(entry.class) else {
                continue;
            };
            let bytes = class.usage_bytes();
            events.on_class_usage(now, class.trace_id(), bytes);
            usages.push((entry.key, (bytes * 8) as f64 * 1000.0 / report_ms));
        }

        let target = coordinator.update_usage(&usages, now, events);
        self.target_fair_share = target;

        for entry in &self.flows {
            if let Some(class) = qdisc.class_mut(entry.class) {
                class.reset_usage();
            }
        }
    }

    /// Handles one packet arriving at this host's IP layer.
    ///
    /// Feedback datagrams update the matching flow's congestion factor; data
    /// packets update the receive-side scoreboard and may produce a feedback
    /// datagram for the caller to transmit.
    pub fn on_receive(
        &mut self,
        coordinator: &mut Coordinator,
        packet: &Packet,
        now: Timestamp,
    ) -> Option<Packet> {
        let Some(flow_tag) = packet.tags.flow_id else {
            warn!("packet without a flow id tag");
            return None;
        };
        let trace_id = flow_tag.0;

        if cawc::is_feedback(packet) {
            match cawc::decode_factor(packet.payload()) {
                Some(factor) => self.update_congestion_factor(coordinator, trace_id, factor),
                None => warn!(flow = %trace_id, "truncated congestion feedback"),
            }
            return None;
        }

        let entry = self
            .scoreboard
            .entry(trace_id)
            .or_insert_with(|| ScoreboardEntry::new(packet.src(), now));

        let size = packet.payload_size() as u64;
        if packet.ecn().congestion_experienced() {
            entry.ceb += size;
        } else {
            entry.nmb += size;
        }
        entry.spc += 1;
        entry.lmt = now;

        if entry.spc >= self.feedback_threshold {
            let factor = entry.congestion_factor();
            entry.clear_samples();
            return Some(cawc::feedback_packet(
                packet.dst(),
                packet.src(),
                trace_id,
                factor,
            ));
        }

        None
    }

    /// The periodic scoreboard sweep.
    ///
    /// Entries idle past the feedback cycle lose their samples; entries with
    /// a meaningful sample count emit feedback even below the packet
    /// threshold, so slow flows are not starved of signal.
    pub fn sweep_scoreboard(&mut self, now: Timestamp) -> Vec<Packet> {
        let mut feedback = Vec::new();

        for (&trace_id, entry) in self.scoreboard.iter_mut() {
            if now.saturating_since(entry.lmt) > self.feedback_cycle {
                entry.clear_samples();
            }

            if entry.spc as f64 > 0.2 * self.feedback_threshold as f64 {
                feedback.push(cawc::feedback_packet(
                    self.addr,
                    entry.src,
                    trace_id,
                    entry.congestion_factor(),
                ));
                entry.spc = 0;
            }
        }

        feedback
    }

    fn update_congestion_factor(
        &mut self,
        coordinator: &mut Coordinator,
        trace_id: TraceId,
        factor: f32,
    ) {
        for entry in &self.flows {
            if let Some(flow) = coordinator.flow_mut(entry.key) {
                if flow.trace_id() == trace_id {
                    flow.set_congestion_factor(factor as f64);
                }
            }
        }
    }

    /// Funds the initial rate for a newly admitted flow.
    ///
    /// The first flow of a tenant on this host starts at a tenth of the
    /// device rate; later flows start at their siblings' average, and that
    /// rate is expropriated back from the siblings proportionally, floored
    /// so no sibling is driven to (or below) zero.
    fn fund_new_flow(&mut self, request: &AdmissionRequest) -> AdmissionVerdict {
        let floor = self.device_rate_limit.bits_per_sec() / 100;

        let siblings: Vec<usize> = self
            .flows
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry.key.tenant_id == request.tenant_id && entry.key.flow_id != request.flow_id
            })
            .map(|(index, _)| index)
            .collect();

        let (initial_rate, sibling_rates) = if siblings.is_empty() {
            (
                DataRate::from_bps(self.device_rate_limit.bits_per_sec() / 10),
                Vec::new(),
            )
        } else {
            let rate_sum: f64 = siblings
                .iter()
                .map(|&index| self.flows[index].last_rate.as_f64())
                .sum();
            let initial = rate_sum / (siblings.len() + 1) as f64;

            let mut sibling_rates = Vec::with_capacity(siblings.len());
            for &index in &siblings {
                let entry = &mut self.flows[index];
                let previous = entry.last_rate.as_f64();
                let expropriated = if rate_sum > 0.0 {
                    initial * previous / rate_sum
                } else {
                    0.0
                };
                let reduced = ((previous - expropriated).max(floor as f64)) as u64;
                entry.last_rate = DataRate::from_bps(reduced);
                sibling_rates.push((entry.class, entry.last_rate));
            }

            (DataRate::from_bps_f64(initial), sibling_rates)
        };

        self.flows.push(FlowEntry {
            key: FlowKey {
                tenant_id: request.tenant_id,
                flow_id: request.flow_id,
            },
            class: request.class,
            last_rate: initial_rate,
        });

        AdmissionVerdict::Admit {
            initial_rate,
            sibling_rates,
        }
    }

    fn cycle_ratio(&self) -> f64 {
        self.report_cycle.as_secs_f64() / self.tune_cycle.as_secs_f64()
    }
}

/// Admission glue borrowed by the queue disc for the duration of one enqueue
pub struct Admitter<'a> {
    pub agent: &'a mut LocalAgent,
    pub coordinator: &'a mut Coordinator,
}

impl FlowAdmission for Admitter<'_> {
    fn admit(&mut self, request: &AdmissionRequest) -> AdmissionVerdict {
        let info = FlowInfo {
            src: request.src,
            dst: request.dst,
            device_rate: self.agent.device_rate_limit,
        };

        if !self.coordinator.register_flow(
            request.tenant_id,
            request.flow_id,
            request.trace_id,
            &info,
        ) {
            return AdmissionVerdict::Reject;
        }

        self.agent.fund_new_flow(request)
    }
}

#[derive(Debug)]
pub struct Builder {
    addr: Ipv4Addr,
    device_rate_limit: DataRate,
    learning_rate: f64,
    report_cycle: Duration,
    tune_cycle: Duration,
    feedback_cycle: Duration,
    congestion_threshold: f64,
    feedback_threshold: u64,
    cawc_enabled: bool,
}

impl Builder {
    fn new(addr: Ipv4Addr, device_rate_limit: DataRate) -> Self {
        Self {
            addr,
            device_rate_limit,
            learning_rate: DEFAULT_LEARNING_RATE,
            report_cycle: DEFAULT_REPORT_CYCLE,
            tune_cycle: DEFAULT_TUNE_CYCLE,
            feedback_cycle: DEFAULT_FEEDBACK_CYCLE,
            congestion_threshold: DEFAULT_CONGESTION_THRESHOLD,
            feedback_threshold: DEFAULT_FEEDBACK_THRESHOLD,
            cawc_enabled: false,
        }
    }

    /// Learning rate of the proportional step, within `[0, 1]`
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&learning_rate));
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_report_cycle(mut self, report_cycle: Duration) -> Self {
        self.report_cycle = report_cycle;
        self
    }

    pub fn with_tune_cycle(mut self, tune_cycle: Duration) -> Self {
        self.tune_cycle = tune_cycle;
        self
    }

    pub fn with_feedback_cycle(mut self, feedback_cycle: Duration) -> Self {
        self.feedback_cycle = feedback_cycle;
        self
    }

    pub fn with_congestion_threshold(mut self, threshold: f64) -> Self {
        self.congestion_threshold = threshold;
        self
    }

    pub fn with_feedback_threshold(mut self, packets: u64) -> Self {
        self.feedback_threshold = packets;
        self
    }

    /// Enables the congestion-aware work-conserving side channel
    pub fn with_cawc(mut self, enabled: bool) -> Self {
        self.cawc_enabled = enabled;
        self
    }

    pub fn build(self) -> LocalAgent {
        let Self {
            addr,
            device_rate_limit,
            learning_rate,
            report_cycle,
            tune_cycle,
            feedback_cycle,
            congestion_threshold,
            feedback_threshold,
            cawc_enabled,
        } = self;

        LocalAgent {
            host_id: None,
            addr,
            device_rate_limit,
            learning_rate,
            report_cycle,
            tune_cycle,
            feedback_cycle,
            congestion_threshold,
            feedback_threshold,
            cawc_enabled,
            target_fair_share: 0.0,
            rate_limited: false,
            flows: Vec::new(),
            scoreboard: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests;
