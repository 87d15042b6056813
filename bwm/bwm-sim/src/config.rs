// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scenario file loaders.
//!
//! Four whitespace-separated text files describe a run: the BwM config (which
//! nodes host an agent), the topology (links with rate, delay and queue
//! size), the flow list, and the tenant configuration (which is handed to
//! the coordinator's own parser).

use crate::{
    sim::{BottleneckSpec, FlowSpec, LinkParams, SimBuilder, Simulation},
    Result,
};
use anyhow::{bail, Context};
use bwm_core::{rate::DataRate, time::Duration};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

#[derive(Clone, Copy, Debug)]
pub struct TopologyLink {
    pub src: u32,
    pub dst: u32,
    pub rate: DataRate,
    pub delay: Duration,
    pub qdisc_size: usize,
}

#[derive(Clone, Debug)]
pub struct Topology {
    pub node_count: u32,
    pub links: Vec<TopologyLink>,
}

const DEFAULT_LINK: LinkParams = LinkParams {
    rate: DataRate::from_bps(1_000_000_000),
    delay: Duration::from_micros(10),
    qdisc_size: 10_240,
};

/// Reads the BwM config: a host count followed by that many node indices
pub fn read_bwm_config(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot open config file {}", path.display()))?;
    let mut fields = text.split_whitespace();

    let host_count: usize = fields
        .next()
        .context("missing host count")?
        .parse()
        .context("invalid host count")?;

    let mut hosts = Vec::with_capacity(host_count);
    for _ in 0..host_count {
        let node: u32 = fields
            .next()
            .context("missing host node index")?
            .parse()
            .context("invalid host node index")?;
        if !hosts.contains(&node) {
            hosts.push(node);
        }
    }

    Ok(hosts)
}

/// Reads the topology: `nodeNum linkNum`, then one
/// `src dst dataRate linkDelay qdiscSize` record per link
pub fn read_topology(path: impl AsRef<Path>) -> Result<Topology> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot open topo file {}", path.display()))?;
    let mut fields = text.split_whitespace();

    let node_count: u32 = fields
        .next()
        .context("missing node count")?
        .parse()
        .context("invalid node count")?;
    let link_count: usize = fields
        .next()
        .context("missing link count")?
        .parse()
        .context("invalid link count")?;

    let mut links = Vec::with_capacity(link_count);
    for index in 0..link_count {
        let mut field = |name: &str| {
            fields
                .next()
                .with_context(|| format!("link {index}: missing {name}"))
        };

        let src: u32 = field("src")?.parse().context("invalid link src")?;
        let dst: u32 = field("dst")?.parse().context("invalid link dst")?;
        let rate: DataRate = field("dataRate")?
            .parse()
            .map_err(anyhow::Error::from)
            .context("invalid link dataRate")?;
        let delay = parse_delay(field("linkDelay")?)?;
        let qdisc_size: usize = field("qdiscSize")?
            .parse()
            .context("invalid link qdiscSize")?;

        if src >= node_count || dst >= node_count {
            bail!("link {index} references a node outside the topology");
        }

        links.push(TopologyLink {
            src,
            dst,
            rate,
            delay,
            qdisc_size,
        });
    }

    Ok(Topology { node_count, links })
}

/// Reads the flow list: a count, then one
/// `src dst startTime stopTime flowId tenantId` record per flow
pub fn read_flows(path: impl AsRef<Path>) -> Result<Vec<RawFlow>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot open flow file {}", path.display()))?;
    let mut fields = text.split_whitespace();

    let flow_count: usize = fields
        .next()
        .context("missing flow count")?
        .parse()
        .context("invalid flow count")?;

    let mut flows = Vec::with_capacity(flow_count);
    for index in 0..flow_count {
        let mut field = |name: &str| {
            fields
                .next()
                .with_context(|| format!("flow {index}: missing {name}"))
        };

        let src: u32 = field("src")?.parse().context("invalid flow src")?;
        let dst: u32 = field("dst")?.parse().context("invalid flow dst")?;
        let start: f64 = field("startTime")?
            .parse()
            .context("invalid flow startTime")?;
        let stop: f64 = field("stopTime")?.parse().context("invalid flow stopTime")?;
        let flow_id: u32 = field("flowId")?.parse().context("invalid flowId")?;
        let tenant_id: u32 = field("tenantId")?.parse().context("invalid tenantId")?;

        if !(start.is_finite() && stop.is_finite()) || start < 0.0 || stop < start {
            bail!("flow {index} has an invalid time window");
        }

        flows.push(RawFlow {
            src,
            dst,
            start: Duration::from_secs_f64(start),
            stop: Duration::from_secs_f64(stop),
            flow_id,
            tenant_id,
        });
    }

    Ok(flows)
}

#[derive(Clone, Copy, Debug)]
pub struct RawFlow {
    pub src: u32,
    pub dst: u32,
    pub start: Duration,
    pub stop: Duration,
    pub flow_id: u32,
    pub tenant_id: u32,
}

/// Parses an ns-style time string (`50us`, `1ms`, `0.5s`, `100ns`)
pub fn parse_delay(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (value, scale_ns) = if let Some(v) = s.strip_suffix("ns") {
        (v, 1.0)
    } else if let Some(v) = s.strip_suffix("us") {
        (v, 1_000.0)
    } else if let Some(v) = s.strip_suffix("ms") {
        (v, 1_000_000.0)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000_000_000.0)
    } else {
        bail!("invalid delay {s:?} (expected e.g. `50us`)");
    };

    let value: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid delay {s:?}"))?;
    if !value.is_finite() || value < 0.0 {
        bail!("invalid delay {s:?}");
    }

    Ok(Duration::from_nanos((value * scale_ns) as u64))
}

/// Assembles a [`SimBuilder`] from the four scenario files.
///
/// Hosts are the nodes named in the BwM config, in listing order (their
/// position is the host id the tenant weights refer to). A flow destination
/// outside the host set becomes a sink-only host. The first link leaving a
/// non-host node is the shared bottleneck, when present.
pub fn scenario(
    bwm_config: impl AsRef<Path>,
    topology: impl AsRef<Path>,
    flows: impl AsRef<Path>,
    tenants: impl AsRef<Path>,
) -> Result<SimBuilder> {
    let host_nodes = read_bwm_config(bwm_config)?;
    let topology = read_topology(topology)?;
    let raw_flows = read_flows(flows)?;

    let tenants = tenants.as_ref();
    let tenant_config = fs::read_to_string(tenants)
        .with_context(|| format!("cannot open tenant configuration file {}", tenants.display()))?;

    let mut builder = Simulation::builder().with_tenant_config(tenant_config);

    let mut host_index: BTreeMap<u32, usize> = BTreeMap::new();
    for &node in &host_nodes {
        builder = builder.host(access_link(&topology, node));
        host_index.insert(node, host_index.len());
    }

    let host_set: BTreeSet<u32> = host_nodes.iter().copied().collect();
    if let Some(link) = topology.links.iter().find(|link| !host_set.contains(&link.src)) {
        builder = builder.with_bottleneck(BottleneckSpec {
            rate: link.rate,
            delay: link.delay,
            max_size: link.qdisc_size,
        });
    }

    for flow in &raw_flows {
        let Some(&src) = host_index.get(&flow.src) else {
            bail!("flow source node {} is not a BwM host", flow.src);
        };

        let dst = match host_index.get(&flow.dst) {
            Some(&dst) => dst,
            None => {
                // sink-only host
                builder = builder.host(access_link(&topology, flow.dst));
                let index = host_index.len();
                host_index.insert(flow.dst, index);
                index
            }
        };

        builder = builder.flow(FlowSpec {
            src,
            dst,
            start: flow.start,
            stop: flow.stop,
            trace_id: flow.flow_id,
            tenant_id: flow.tenant_id,
            demand: None,
        });
    }

    Ok(builder)
}

/// The link parameters a node talks to the network through: the first link
/// it sources, the reverse of the first link reaching it, or a default
fn access_link(topology: &Topology, node: u32) -> LinkParams {
    let link = topology
        .links
        .iter()
        .find(|link| link.src == node)
        .or_else(|| topology.links.iter().find(|link| link.dst == node));

    match link {
        Some(link) => LinkParams {
            rate: link.rate,
            delay: link.delay,
            qdisc_size: link.qdisc_size,
        },
        None => DEFAULT_LINK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_parsing() {
        assert_eq!(parse_delay("50us").unwrap(), Duration::from_micros(50));
        assert_eq!(parse_delay("1ms").unwrap(), Duration::from_millis(1));
        assert_eq!(parse_delay("0.5s").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_delay("100ns").unwrap(), Duration::from_nanos(100));
        assert!(parse_delay("fast").is_err());
        assert!(parse_delay("-1ms").is_err());
    }
}
