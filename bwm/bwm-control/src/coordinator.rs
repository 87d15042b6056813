// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The process-wide coordinator.
//!
//! Owns the tenant registry and every unit-flow record, assigns host ids,
//! and, on each usage report, estimates the next global target fair share:
//! the mean of the tenants' actual fair shares, advanced by the progress
//! factor and floored at the configured minimum.

use crate::{
    flow::{FlowKey, UnitFlow},
    tenant::Tenant,
};
use bwm_core::{
    bwfn::BandwidthFunction,
    event::Subscriber,
    ids::{FlowId, HostId, TenantId, TraceId},
    rate::DataRate,
    time::Timestamp,
};
use std::{
    fmt,
    io::{self, BufRead},
    net::Ipv4Addr,
    path::Path,
};
use tracing::{debug, warn};

/// Default progress factor of the target estimation
pub const DEFAULT_ALPHA: f64 = 0.1;

/// Default lower bound of the global fair share
pub const DEFAULT_MIN_FAIR_SHARE: f64 = 3.0;

/// Registration-time facts about a flow the agent knows and the coordinator
/// does not
#[derive(Clone, Copy, Debug)]
pub struct FlowInfo {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub device_rate: DataRate,
}

#[derive(Debug)]
pub struct Coordinator {
    alpha: f64,
    min_fair_share: f64,
    tenants: std::collections::BTreeMap<TenantId, Tenant>,
    hosts: Vec<(HostId, Ipv4Addr)>,
    host_counter: u32,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Coordinator {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn tenant(&self, tenant_id: TenantId) -> Option<&Tenant> {
        self.tenants.get(&tenant_id)
    }

    pub fn tenants(&self) -> impl Iterator<Item = &Tenant> {
        self.tenants.values()
    }

    pub fn flow(&self, key: FlowKey) -> Option<&UnitFlow> {
        self.tenants.get(&key.tenant_id)?.flow(key.flow_id)
    }

    pub fn flow_mut(&mut self, key: FlowKey) -> Option<&mut UnitFlow> {
        self.tenants.get_mut(&key.tenant_id)?.flow_mut(key.flow_id)
    }

    /// Loads the tenant configuration: repeated 3-line records of tenant id,
    /// bandwidth-function vertices and per-host weight overrides, terminated
    /// by a blank line. Malformed records are fatal.
    pub fn load_tenants_from(&mut self, path: impl AsRef<Path>) -> Result<usize, ConfigError> {
        let file = std::fs::File::open(path).map_err(ConfigError::Io)?;
        self.load_tenants(io::BufReader::new(file))
    }

    pub fn load_tenants<R: BufRead>(&mut self, reader: R) -> Result<usize, ConfigError> {
        let mut lines = reader.lines();
        let mut loaded = 0;

        while let Some(line) = lines.next() {
            let line = line.map_err(ConfigError::Io)?;
            let line = line.trim();
            if line.is_empty() {
                break;
            }

            let tenant_id = line
                .parse::<u32>()
                .map(TenantId)
                .map_err(|_| ConfigError::InvalidTenantId(line.to_string()))?;

            let bf_line = lines
                .next()
                .transpose()
                .map_err(ConfigError::Io)?
                .ok_or(ConfigError::MissingBandwidthFunction(tenant_id))?;
            let bf: BandwidthFunction = bf_line
                .parse()
                .map_err(|_| ConfigError::InvalidBandwidthFunction(tenant_id))?;

            let mut tenant = Tenant::new(tenant_id, bf);

            let weight_line = lines
                .next()
                .transpose()
                .map_err(ConfigError::Io)?
                .unwrap_or_default();
            if weight_line.trim().is_empty() {
                warn!(tenant = %tenant_id, "tenant has no host weight overrides");
            }
            for pair in weight_line.split_whitespace() {
                let (host, weight) = pair
                    .split_once(',')
                    .ok_or(ConfigError::InvalidHostWeight(tenant_id))?;
                let host = host
                    .parse::<u32>()
                    .map(HostId)
                    .map_err(|_| ConfigError::InvalidHostWeight(tenant_id))?;
                let weight = weight
                    .parse::<f64>()
                    .map_err(|_| ConfigError::InvalidHostWeight(tenant_id))?;
                tenant.set_host_weight(host, weight);
            }

            self.tenants.insert(tenant_id, tenant);
            loaded += 1;
        }

        Ok(loaded)
    }

    /// Registers a host, assigning the next host id
    pub fn register_host(&mut self, addr: Ipv4Addr) -> HostId {
        let host_id = HostId(self.host_counter);
        self.host_counter += 1;
        self.hosts.push((host_id, addr));
        host_id
    }

    /// Registers a unit flow and auto-configures its bandwidth function.
    ///
    /// The configured curve is the single segment reaching the device rate
    /// limit at `limit / (w_src + w_dst)`, using the tenant's weights for the
    /// endpoint hosts (unregistered hosts weigh 1.0). The tenant
    /// transformation is re-run before the flow becomes visible.
    ///
    /// Returns `false` when the tenant is unknown; the report is dropped.
    pub fn register_flow(
        &mut self,
        tenant_id: TenantId,
        flow_id: FlowId,
        trace_id: TraceId,
        info: &FlowInfo,
    ) -> bool {
        let src_host = self.host_by_addr(info.src);
        let dst_host = self.host_by_addr(info.dst);

        let Some(tenant) = self.tenants.get_mut(&tenant_id) else {
            warn!(tenant = %tenant_id, "flow registration for unknown tenant");
            return false;
        };

        let src_weight = src_host.map(|host| tenant.host_weight(host)).unwrap_or(1.0);
        let dst_weight = dst_host.map(|host| tenant.host_weight(host)).unwrap_or(1.0);

        let limit = info.device_rate.as_f64();
        let mut configured = BandwidthFunction::new();
        configured.add_vertex(limit / (src_weight + dst_weight), limit);

        debug!(
            tenant = %tenant_id,
            flow = %trace_id,
            bf = %configured,
            "configured bandwidth function"
        );

        tenant.add_flow(UnitFlow::new(tenant_id, flow_id, trace_id, configured));
        tenant.transform_flows();

        true
    }

    /// Installs a batch of usage reports and answers with the new target
    /// status for the reporting host.
    ///
    /// Reports for unknown flows are logged and skipped.
    pub fn update_usage<S: Subscriber>(
        &mut self,
        usages: &[(FlowKey, f64)],
        now: Timestamp,
        events: &mut S,
    ) -> f64 {
        for &(key, usage) in usages {
            match self.flow_mut(key) {
                Some(flow) => {
                    flow.set_usage(usage);
                    events.on_flow_usage(now, flow.trace_id(), usage);
                }
                None => {
                    warn!(
                        tenant = %key.tenant_id,
                        flow = %key.flow_id,
                        "usage report for unknown flow"
                    );
                }
            }
        }

        self.estimate_target_status(now, events)
    }

    fn estimate_target_status<S: Subscriber>(&mut self, now: Timestamp, events: &mut S) -> f64 {
        if self.tenants.is_empty() {
            return self.min_fair_share;
        }

        let mut sum = 0.0;
        for tenant in self.tenants.values_mut() {
            let fair_share = tenant.compute_actual_fair_share();
            events.on_tenant_actual_fair_share(now, tenant.tenant_id(), fair_share);
            sum += fair_share;
        }

        let mean = sum / self.tenants.len() as f64;
        (mean * (1.0 + self.alpha)).max(self.min_fair_share)
    }

    fn host_by_addr(&self, addr: Ipv4Addr) -> Option<HostId> {
        self.hosts
            .iter()
            .find(|(_, host_addr)| *host_addr == addr)
            .map(|(host_id, _)| *host_id)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    InvalidTenantId(String),
    MissingBandwidthFunction(TenantId),
    InvalidBandwidthFunction(TenantId),
    InvalidHostWeight(TenantId),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "cannot read tenant configuration: {error}"),
            Self::InvalidTenantId(line) => write!(f, "invalid tenant id: {line:?}"),
            Self::MissingBandwidthFunction(tenant) => {
                write!(f, "tenant {tenant} has no bandwidth function line")
            }
            Self::InvalidBandwidthFunction(tenant) => {
                write!(f, "tenant {tenant} has an invalid bandwidth function")
            }
            Self::InvalidHostWeight(tenant) => {
                write!(f, "tenant {tenant} has an invalid host weight entry")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Builder {
    alpha: f64,
    min_fair_share: f64,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            min_fair_share: DEFAULT_MIN_FAIR_SHARE,
        }
    }
}

impl Builder {
    /// Progress factor of the target estimation, within `[0, 1)`
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        debug_assert!((0.0..1.0).contains(&alpha));
        self.alpha = alpha;
        self
    }

    /// Lower bound of the global fair share
    pub fn with_min_fair_share(mut self, min_fair_share: f64) -> Self {
        self.min_fair_share = min_fair_share;
        self
    }

    pub fn build(self) -> Coordinator {
        let Self {
            alpha,
            min_fair_share,
        } = self;

        Coordinator {
            alpha,
            min_fair_share,
            tenants: Default::default(),
            hosts: Vec::new(),
            host_counter: 0,
        }
    }
}
