// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use bwm_core::{
    bwfn::BandwidthFunction,
    ids::{FlowId, TenantId, TraceId},
};

/// Identifies a unit flow across components
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowKey {
    pub tenant_id: TenantId,
    pub flow_id: FlowId,
}

/// The per-flow control record.
///
/// Owned by its [`Tenant`](crate::tenant::Tenant); every other component
/// navigates to it through a [`FlowKey`].
#[derive(Clone, Debug)]
pub struct UnitFlow {
    tenant_id: TenantId,
    flow_id: FlowId,
    trace_id: TraceId,
    /// Operator intent
    configured_bf: BandwidthFunction,
    /// Effective allocation curve, rebuilt by the tenant transformation
    transformed_bf: Option<BandwidthFunction>,
    /// Last reported usage in bits/s
    usage: f64,
    /// Controller state: the fair share currently granted to this flow
    allocated_fs: f64,
    /// Most recent CAWC congestion factor
    congestion_factor: f64,
}

impl UnitFlow {
    pub fn new(
        tenant_id: TenantId,
        flow_id: FlowId,
        trace_id: TraceId,
        configured_bf: BandwidthFunction,
    ) -> Self {
        Self {
            tenant_id,
            flow_id,
            trace_id,
            configured_bf,
            transformed_bf: None,
            usage: 0.0,
            allocated_fs: 0.0,
            congestion_factor: 0.0,
        }
    }

    #[inline]
    pub fn key(&self) -> FlowKey {
        FlowKey {
            tenant_id: self.tenant_id,
            flow_id: self.flow_id,
        }
    }

    #[inline]
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    #[inline]
    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    #[inline]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    #[inline]
    pub fn configured_bf(&self) -> &BandwidthFunction {
        &self.configured_bf
    }

    #[inline]
    pub fn transformed_bf(&self) -> Option<&BandwidthFunction> {
        self.transformed_bf.as_ref()
    }

    pub fn set_transformed_bf(&mut self, transformed: BandwidthFunction) {
        self.transformed_bf = Some(transformed);
    }

    #[inline]
    pub fn usage(&self) -> f64 {
        self.usage
    }

    pub fn set_usage(&mut self, usage: f64) {
        self.usage = usage;
    }

    #[inline]
    pub fn allocated_fs(&self) -> f64 {
        self.allocated_fs
    }

    pub fn set_allocated_fs(&mut self, fair_share: f64) {
        self.allocated_fs = fair_share;
    }

    #[inline]
    pub fn congestion_factor(&self) -> f64 {
        self.congestion_factor
    }

    pub fn set_congestion_factor(&mut self, factor: f64) {
        self.congestion_factor = factor;
    }

    /// The rate the current fair share entitles, through the transformed
    /// allocation curve.
    ///
    /// A flow whose tenant transformation has not run yet has no curve and
    /// gets nothing.
    pub fn allocated_rate(&self) -> f64 {
        match &self.transformed_bf {
            Some(bf) => bf.bandwidth(self.allocated_fs),
            None => 0.0,
        }
    }
}
