// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use bwm_core::cc;
use bwm_sim::{
    config,
    trace::{CsvTrace, Toggles},
    Result,
};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "bwm-sim",
    about = "Runs a bandwidth-manager scenario and writes the trace streams"
)]
struct Opts {
    /// BwM config file (host count + host node indices)
    #[structopt(long, parse(from_os_str))]
    bwm_config: PathBuf,

    /// Topology file (nodeNum linkNum, then src dst dataRate linkDelay qdiscSize)
    #[structopt(long, parse(from_os_str))]
    topology: PathBuf,

    /// Flow file (flowNum, then src dst startTime stopTime flowId tenantId)
    #[structopt(long, parse(from_os_str))]
    flows: PathBuf,

    /// Tenant configuration file (3-line records)
    #[structopt(long, parse(from_os_str))]
    tenants: PathBuf,

    /// Directory the trace files are written into
    #[structopt(long, default_value = "traces", parse(from_os_str))]
    trace_path: PathBuf,

    /// Simulated run time in seconds
    #[structopt(long, default_value = "10")]
    stop: f64,

    /// Enable the congestion-aware work-conserving side channel
    #[structopt(long)]
    cawc: bool,

    /// Drive flows with window senders using this controller
    /// (multcp, ewtcp, wreno-ai, wreno-md)
    #[structopt(long)]
    cc: Option<cc::Variant>,

    /// Progress factor of the coordinator's target estimation
    #[structopt(long, default_value = "0.1")]
    alpha: f64,

    /// Lower bound of the global fair share
    #[structopt(long, default_value = "3")]
    min_fair_share: f64,

    /// Seed for the overflow-drop victim selection
    #[structopt(long, default_value = "24149")]
    seed: u64,

    #[structopt(long)]
    no_rx_trace: bool,

    #[structopt(long)]
    no_cwnd_trace: bool,

    #[structopt(long)]
    no_rtt_trace: bool,

    #[structopt(long)]
    no_flow_fs_trace: bool,

    #[structopt(long)]
    no_flow_usage_trace: bool,

    #[structopt(long)]
    no_tenant_fs_trace: bool,

    #[structopt(long)]
    no_qdc_rate_trace: bool,

    #[structopt(long)]
    no_qdc_usage_trace: bool,
}

fn main() -> Result {
    tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
        .init();

    let opts = Opts::from_args();

    let mut builder = config::scenario(
        &opts.bwm_config,
        &opts.topology,
        &opts.flows,
        &opts.tenants,
    )?
    .with_alpha(opts.alpha)
    .with_min_fair_share(opts.min_fair_share)
    .with_cawc(opts.cawc)
    .with_seed(opts.seed)
    .with_stop(core::time::Duration::from_secs_f64(opts.stop));

    if let Some(variant) = opts.cc {
        builder = builder.with_congestion_control(variant);
    }

    let toggles = Toggles {
        rx: !opts.no_rx_trace,
        cwnd: !opts.no_cwnd_trace,
        rtt: !opts.no_rtt_trace,
        flow_fair_share: !opts.no_flow_fs_trace,
        flow_usage: !opts.no_flow_usage_trace,
        tenant_fair_share: !opts.no_tenant_fs_trace,
        class_rate: !opts.no_qdc_rate_trace,
        class_usage: !opts.no_qdc_usage_trace,
    };
    let mut trace = CsvTrace::create(&opts.trace_path, toggles)?;

    let mut simulation = builder.build();
    let report = simulation.run(&mut trace);
    trace.flush()?;

    println!("flow,tenant,delivered_bytes,steady_rate_bps,drops,allocated_fs");
    for flow in &report.flows {
        println!(
            "{},{},{},{:.0},{},{:.3}",
            flow.trace_id,
            flow.tenant_id,
            flow.delivered_bytes,
            flow.steady_rate,
            flow.drops,
            flow.allocated_fair_share,
        );
    }
    for (tenant, fair_share) in &report.tenant_fair_shares {
        println!("tenant {tenant} actual fair share {fair_share:.3}");
    }

    Ok(())
}
