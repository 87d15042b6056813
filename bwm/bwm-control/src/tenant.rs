// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tenants and the componential bandwidth-function transformation.
//!
//! The transformation re-expresses each unit flow's configured curve in the
//! tenant's fair-share space: children are summed at equal child fair share
//! into an aggregate curve, the aggregate is matched against the tenant curve
//! at every interesting bandwidth, and each child is rebuilt over the
//! resulting fair-share correspondence. The tenant can then hand every flow a
//! slice of its own `x` axis.

use crate::flow::UnitFlow;
use bwm_core::{
    bwfn::{BandwidthFunction, FP_TOLERANCE, INF},
    ids::{FlowId, HostId, TenantId},
};
use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeMap, BinaryHeap},
};

#[derive(Clone, Debug)]
pub struct Tenant {
    tenant_id: TenantId,
    flows: BTreeMap<FlowId, UnitFlow>,
    host_weights: BTreeMap<HostId, f64>,
    /// Set at configuration time, never mutated afterwards
    bf: BandwidthFunction,
    actual_fair_share: f64,
}

impl Tenant {
    pub fn new(tenant_id: TenantId, bf: BandwidthFunction) -> Self {
        Self {
            tenant_id,
            flows: BTreeMap::new(),
            host_weights: BTreeMap::new(),
            bf,
            actual_fair_share: 0.0,
        }
    }

    #[inline]
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    #[inline]
    pub fn bf(&self) -> &BandwidthFunction {
        &self.bf
    }

    pub fn set_host_weight(&mut self, host: HostId, weight: f64) {
        self.host_weights.insert(host, weight);
    }

    /// The tenant's weight for a host; hosts without an override weigh 1.0
    pub fn host_weight(&self, host: HostId) -> f64 {
        self.host_weights.get(&host).copied().unwrap_or(1.0)
    }

    pub fn flow(&self, flow_id: FlowId) -> Option<&UnitFlow> {
        self.flows.get(&flow_id)
    }

    pub fn flow_mut(&mut self, flow_id: FlowId) -> Option<&mut UnitFlow> {
        self.flows.get_mut(&flow_id)
    }

    pub fn flows(&self) -> impl Iterator<Item = &UnitFlow> {
        self.flows.values()
    }

    /// Attaches a unit flow. Removal is not supported.
    pub fn add_flow(&mut self, flow: UnitFlow) {
        self.flows.insert(flow.flow_id(), flow);
    }

    /// Inverse of the tenant curve applied to the summed flow usage.
    ///
    /// Usage momentarily above the curve's top (bursts) saturates at the top
    /// fair share instead of reporting an unbounded claim.
    pub fn compute_actual_fair_share(&mut self) -> f64 {
        let usage_sum: f64 = self.flows.values().map(|flow| flow.usage()).sum();

        let mut fair_share = self.bf.fair_share(usage_sum);
        if fair_share == INF {
            fair_share = self.bf.last_vertex().0;
        }

        self.actual_fair_share = fair_share;
        fair_share
    }

    #[inline]
    pub fn actual_fair_share(&self) -> f64 {
        self.actual_fair_share
    }

    /// Rebuilds every flow's transformed bandwidth function.
    ///
    /// Run on each flow admission; with no admissions in between the result
    /// is unchanged.
    pub fn transform_flows(&mut self) {
        let configured: Vec<BandwidthFunction> = self
            .flows
            .values()
            .map(|flow| flow.configured_bf().clone())
            .collect();

        let aggregate = aggregate_bf(&configured);
        let map = transform_map(&aggregate, &self.bf);

        for flow in self.flows.values_mut() {
            let mut transformed = BandwidthFunction::new();
            for &(aggregate_fs, tenant_fs) in &map {
                transformed.add_vertex(tenant_fs, flow.configured_bf().bandwidth(aggregate_fs));
            }
            flow.set_transformed_bf(transformed);
        }
    }
}

/// A pending vertex in the aggregation sweep
#[derive(Debug, PartialEq)]
struct NextVertex {
    fair_share: f64,
    flow: usize,
}

impl Eq for NextVertex {}

impl PartialOrd for NextVertex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NextVertex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fair_share
            .total_cmp(&other.fair_share)
            .then(self.flow.cmp(&other.flow))
    }
}

/// Sums the configured curves at every union vertex fair share.
///
/// A min-heap over each curve's next vertex yields the union of interesting
/// points in one ordered sweep.
fn aggregate_bf(configured: &[BandwidthFunction]) -> BandwidthFunction {
    let mut aggregate = BandwidthFunction::new();

    let mut pending = BinaryHeap::new();
    for (flow, bf) in configured.iter().enumerate() {
        let fair_share = bf.next_vertex_by_fs(0.0);
        if fair_share.is_finite() {
            pending.push(Reverse(NextVertex { fair_share, flow }));
        }
    }

    while let Some(Reverse(NextVertex { fair_share, .. })) = pending.peek() {
        let fair_share = *fair_share;

        let sum: f64 = configured.iter().map(|bf| bf.bandwidth(fair_share)).sum();
        aggregate.add_vertex(fair_share, sum);

        // replace every entry at this fair share with that curve's next vertex
        while let Some(Reverse(top)) = pending.peek() {
            if (top.fair_share - fair_share).abs() >= FP_TOLERANCE {
                break;
            }
            let flow = top.flow;
            pending.pop();

            let next = configured[flow].next_vertex_by_fs(fair_share);
            if next.is_finite() {
                pending.push(Reverse(NextVertex {
                    fair_share: next,
                    flow,
                }));
            }
        }
    }

    aggregate
}

/// Pairs of `(aggregate fair share, tenant fair share)` at which both curves
/// produce the same bandwidth.
///
/// Interesting bandwidths are generated by repeatedly taking the smaller of
/// the two curves' next vertices; the sweep ends when either curve has no
/// fair share for the required bandwidth.
fn transform_map(aggregate: &BandwidthFunction, tenant: &BandwidthFunction) -> Vec<(f64, f64)> {
    let mut map = Vec::new();

    let mut current_bw = 0.0;
    loop {
        let next = aggregate
            .next_vertex_by_bw(current_bw)
            .min(tenant.next_vertex_by_bw(current_bw));
        if !next.is_finite() {
            break;
        }

        let aggregate_fs = aggregate.fair_share(next);
        let tenant_fs = tenant.fair_share(next);
        if aggregate_fs == INF || tenant_fs == INF {
            break;
        }

        map.push((aggregate_fs, tenant_fs));
        current_bw = next;
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use bwm_core::ids::TraceId;

    fn flow(tenant: u32, id: u32, bf: &str) -> UnitFlow {
        UnitFlow::new(
            TenantId(tenant),
            FlowId(id),
            TraceId(id),
            bf.parse().unwrap(),
        )
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn host_weights_default_to_one() {
        let mut tenant = Tenant::new(TenantId(1), "0,0 10,1000".parse().unwrap());
        tenant.set_host_weight(HostId(0), 2.0);

        assert_eq!(tenant.host_weight(HostId(0)), 2.0);
        assert_eq!(tenant.host_weight(HostId(7)), 1.0);
    }

    #[test]
    fn actual_fair_share_inverts_summed_usage() {
        let mut tenant = Tenant::new(TenantId(1), "0,0 10,1000".parse().unwrap());
        tenant.add_flow(flow(1, 1, "0,0 1,500"));
        tenant.add_flow(flow(1, 2, "0,0 1,500"));

        tenant.flow_mut(FlowId(1)).unwrap().set_usage(300.0);
        tenant.flow_mut(FlowId(2)).unwrap().set_usage(200.0);

        assert_close(tenant.compute_actual_fair_share(), 5.0);

        // usage above the curve's top saturates at the top fair share
        tenant.flow_mut(FlowId(1)).unwrap().set_usage(2000.0);
        assert_close(tenant.compute_actual_fair_share(), 10.0);
    }

    #[test]
    fn aggregate_sums_children_at_union_vertices() {
        let curves: Vec<BandwidthFunction> = vec![
            "0,0 1,50".parse().unwrap(),
            "0,0 1,100 3,200".parse().unwrap(),
        ];

        let aggregate = aggregate_bf(&curves);

        assert_eq!(aggregate.vertices().len(), 3);
        assert_close(aggregate.bandwidth(1.0), 150.0);
        // the first curve is flat past its top while the second keeps rising
        assert_close(aggregate.bandwidth(3.0), 250.0);
        assert_close(aggregate.bandwidth(2.0), 200.0);
    }

    #[test]
    fn transformation_reexpresses_children_in_tenant_space() {
        let mut tenant = Tenant::new(TenantId(1), "0,0 1,100 2,300".parse().unwrap());
        tenant.add_flow(flow(1, 1, "0,0 1,50"));
        tenant.add_flow(flow(1, 2, "0,0 1,100"));

        tenant.transform_flows();

        // aggregate: (0,0) (1,150); tenant matches it at bandwidths 100 and
        // 150, giving the correspondence (2/3 -> 1) and (1 -> 1.25)
        let first = tenant.flow(FlowId(1)).unwrap().transformed_bf().unwrap();
        let second = tenant.flow(FlowId(2)).unwrap().transformed_bf().unwrap();

        let vertices = first.vertices();
        assert_eq!(vertices.len(), 3);
        assert_close(vertices[1].0, 1.0);
        assert_close(vertices[1].1, 50.0 * 2.0 / 3.0);
        assert_close(vertices[2].0, 1.25);
        assert_close(vertices[2].1, 50.0);

        let vertices = second.vertices();
        assert_close(vertices[1].0, 1.0);
        assert_close(vertices[1].1, 100.0 * 2.0 / 3.0);
        assert_close(vertices[2].0, 1.25);
        assert_close(vertices[2].1, 100.0);
    }

    /// For any fair share within the aggregate's range, pushing the aggregate
    /// bandwidth through the tenant inverse and back through the transformed
    /// children returns the same bandwidth.
    #[test]
    fn transformation_fixpoint() {
        let mut tenant = Tenant::new(TenantId(1), "0,0 1,100 2,300".parse().unwrap());
        tenant.add_flow(flow(1, 1, "0,0 1,50"));
        tenant.add_flow(flow(1, 2, "0,0 1,100"));

        tenant.transform_flows();

        let configured: Vec<BandwidthFunction> = tenant
            .flows()
            .map(|flow| flow.configured_bf().clone())
            .collect();
        let aggregate = aggregate_bf(&configured);
        let top = aggregate.last_vertex().0;

        for step in 0..=8 {
            let fair_share = top * step as f64 / 8.0;
            let aggregate_bw = aggregate.bandwidth(fair_share);
            let tenant_fs = tenant.bf().fair_share(aggregate_bw);

            let reconstructed: f64 = tenant
                .flows()
                .map(|flow| flow.transformed_bf().unwrap().bandwidth(tenant_fs))
                .sum();

            assert_close(reconstructed, aggregate_bw);
        }
    }

    #[test]
    fn transformation_is_idempotent() {
        let mut tenant = Tenant::new(TenantId(1), "0,0 1,100 2,300".parse().unwrap());
        tenant.add_flow(flow(1, 1, "0,0 1,50"));
        tenant.add_flow(flow(1, 2, "0,0 1,100"));

        tenant.transform_flows();
        let first: Vec<_> = tenant
            .flows()
            .map(|flow| flow.transformed_bf().unwrap().clone())
            .collect();

        tenant.transform_flows();
        let second: Vec<_> = tenant
            .flows()
            .map(|flow| flow.transformed_bf().unwrap().clone())
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn single_flow_tenant_maps_the_whole_curve() {
        // the auto-configured single-segment case: one flow, tenant curve
        // reaching the same bandwidth
        let mut tenant = Tenant::new(TenantId(1), "0,0 10,1000000000".parse().unwrap());
        tenant.add_flow(flow(1, 1, "0,0 500000000,1000000000"));

        tenant.transform_flows();

        let transformed = tenant.flow(FlowId(1)).unwrap().transformed_bf().unwrap();
        assert_eq!(transformed.vertices().len(), 2);
        assert_close(transformed.vertices()[1].0, 10.0);
        assert_close(transformed.vertices()[1].1, 1e9);
        assert_close(transformed.bandwidth(5.0), 5e8);
    }
}
