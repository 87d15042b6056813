// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Telemetry events produced by the control loop.
//!
//! Components take a [`Subscriber`] by reference on the operations that
//! change a traced value; subscribers decide what to do with each stream
//! (the sim writes them out as CSV).

use crate::{
    ids::{TenantId, TraceId},
    rate::DataRate,
    time::{Duration, Timestamp},
};

pub trait Subscriber {
    /// A data packet was received by a sink
    fn on_rx(&mut self, now: Timestamp, flow: TraceId, bytes: usize) {
        let _ = (now, flow, bytes);
    }

    /// A sender's congestion window changed
    fn on_cwnd(&mut self, now: Timestamp, flow: TraceId, cwnd: u32) {
        let _ = (now, flow, cwnd);
    }

    /// A sender observed a round-trip time sample
    fn on_rtt(&mut self, now: Timestamp, flow: TraceId, rtt: Duration) {
        let _ = (now, flow, rtt);
    }

    /// The tuner moved a unit flow's allocated fair share
    fn on_flow_allocated_fair_share(&mut self, now: Timestamp, flow: TraceId, fair_share: f64) {
        let _ = (now, flow, fair_share);
    }

    /// A usage report assigned a measured rate (bits/s) to a unit flow
    fn on_flow_usage(&mut self, now: Timestamp, flow: TraceId, usage: f64) {
        let _ = (now, flow, usage);
    }

    /// The coordinator recomputed a tenant's actual fair share
    fn on_tenant_actual_fair_share(&mut self, now: Timestamp, tenant: TenantId, fair_share: f64) {
        let _ = (now, tenant, fair_share);
    }

    /// The tuner pushed a new rate into a queue disc class
    fn on_class_rate(&mut self, now: Timestamp, flow: TraceId, rate: DataRate) {
        let _ = (now, flow, rate);
    }

    /// The reporter read a queue disc class usage counter (bytes)
    fn on_class_usage(&mut self, now: Timestamp, flow: TraceId, bytes: u64) {
        let _ = (now, flow, bytes);
    }
}

/// Ignores every event
#[derive(Clone, Copy, Debug, Default)]
pub struct Disabled;

impl Subscriber for Disabled {}

impl<A: Subscriber, B: Subscriber> Subscriber for (A, B) {
    fn on_rx(&mut self, now: Timestamp, flow: TraceId, bytes: usize) {
        self.0.on_rx(now, flow, bytes);
        self.1.on_rx(now, flow, bytes);
    }

    fn on_cwnd(&mut self, now: Timestamp, flow: TraceId, cwnd: u32) {
        self.0.on_cwnd(now, flow, cwnd);
        self.1.on_cwnd(now, flow, cwnd);
    }

    fn on_rtt(&mut self, now: Timestamp, flow: TraceId, rtt: Duration) {
        self.0.on_rtt(now, flow, rtt);
        self.1.on_rtt(now, flow, rtt);
    }

    fn on_flow_allocated_fair_share(&mut self, now: Timestamp, flow: TraceId, fair_share: f64) {
        self.0.on_flow_allocated_fair_share(now, flow, fair_share);
        self.1.on_flow_allocated_fair_share(now, flow, fair_share);
    }

    fn on_flow_usage(&mut self, now: Timestamp, flow: TraceId, usage: f64) {
        self.0.on_flow_usage(now, flow, usage);
        self.1.on_flow_usage(now, flow, usage);
    }

    fn on_tenant_actual_fair_share(&mut self, now: Timestamp, tenant: TenantId, fair_share: f64) {
        self.0.on_tenant_actual_fair_share(now, tenant, fair_share);
        self.1.on_tenant_actual_fair_share(now, tenant, fair_share);
    }

    fn on_class_rate(&mut self, now: Timestamp, flow: TraceId, rate: DataRate) {
        self.0.on_class_rate(now, flow, rate);
        self.1.on_class_rate(now, flow, rate);
    }

    fn on_class_usage(&mut self, now: Timestamp, flow: TraceId, bytes: u64) {
        self.0.on_class_usage(now, flow, bytes);
        self.1.on_class_usage(now, flow, bytes);
    }
}

impl<S: Subscriber> Subscriber for &mut S {
    fn on_rx(&mut self, now: Timestamp, flow: TraceId, bytes: usize) {
        (**self).on_rx(now, flow, bytes);
    }

    fn on_cwnd(&mut self, now: Timestamp, flow: TraceId, cwnd: u32) {
        (**self).on_cwnd(now, flow, cwnd);
    }

    fn on_rtt(&mut self, now: Timestamp, flow: TraceId, rtt: Duration) {
        (**self).on_rtt(now, flow, rtt);
    }

    fn on_flow_allocated_fair_share(&mut self, now: Timestamp, flow: TraceId, fair_share: f64) {
        (**self).on_flow_allocated_fair_share(now, flow, fair_share);
    }

    fn on_flow_usage(&mut self, now: Timestamp, flow: TraceId, usage: f64) {
        (**self).on_flow_usage(now, flow, usage);
    }

    fn on_tenant_actual_fair_share(&mut self, now: Timestamp, tenant: TenantId, fair_share: f64) {
        (**self).on_tenant_actual_fair_share(now, tenant, fair_share);
    }

    fn on_class_rate(&mut self, now: Timestamp, flow: TraceId, rate: DataRate) {
        (**self).on_class_rate(now, flow, rate);
    }

    fn on_class_usage(&mut self, now: Timestamp, flow: TraceId, bytes: u64) {
        (**self).on_class_usage(now, flow, bytes);
    }
}
