// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CSV trace output.
//!
//! One file per stream, each record `time_s,id,value`. Streams can be
//! toggled individually; disabled streams cost nothing.

use crate::Result;
use anyhow::Context;
use bwm_core::{
    event::Subscriber,
    ids::{TenantId, TraceId},
    rate::DataRate,
    time::{Duration, Timestamp},
};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

/// Per-stream enable flags; everything is on by default
#[derive(Clone, Copy, Debug)]
pub struct Toggles {
    pub rx: bool,
    pub cwnd: bool,
    pub rtt: bool,
    pub flow_fair_share: bool,
    pub flow_usage: bool,
    pub tenant_fair_share: bool,
    pub class_rate: bool,
    pub class_usage: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            rx: true,
            cwnd: true,
            rtt: true,
            flow_fair_share: true,
            flow_usage: true,
            tenant_fair_share: true,
            class_rate: true,
            class_usage: true,
        }
    }
}

pub struct CsvTrace {
    rx: Option<BufWriter<File>>,
    cwnd: Option<BufWriter<File>>,
    rtt: Option<BufWriter<File>>,
    flow_fair_share: Option<BufWriter<File>>,
    flow_usage: Option<BufWriter<File>>,
    tenant_fair_share: Option<BufWriter<File>>,
    class_rate: Option<BufWriter<File>>,
    class_usage: Option<BufWriter<File>>,
}

impl CsvTrace {
    /// Creates the trace directory and opens the enabled streams
    pub fn create(dir: impl AsRef<Path>, toggles: Toggles) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create trace directory {}", dir.display()))?;

        let open = |enabled: bool, name: &str| -> Result<Option<BufWriter<File>>> {
            if !enabled {
                return Ok(None);
            }
            let path = dir.join(name);
            let file = File::create(&path)
                .with_context(|| format!("cannot open trace file {}", path.display()))?;
            Ok(Some(BufWriter::new(file)))
        };

        Ok(Self {
            rx: open(toggles.rx, "rx-trace.txt")?,
            cwnd: open(toggles.cwnd, "cwnd-trace.txt")?,
            rtt: open(toggles.rtt, "rtt-trace.txt")?,
            flow_fair_share: open(toggles.flow_fair_share, "flow-alc-fs-trace.txt")?,
            flow_usage: open(toggles.flow_usage, "flow-usage-trace.txt")?,
            tenant_fair_share: open(toggles.tenant_fair_share, "tenant-act-fs-trace.txt")?,
            class_rate: open(toggles.class_rate, "qdc-rate-trace.txt")?,
            class_usage: open(toggles.class_usage, "qdc-usage-trace.txt")?,
        })
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        for writer in [
            &mut self.rx,
            &mut self.cwnd,
            &mut self.rtt,
            &mut self.flow_fair_share,
            &mut self.flow_usage,
            &mut self.tenant_fair_share,
            &mut self.class_rate,
            &mut self.class_usage,
        ]
        .into_iter()
        .flatten()
        {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for CsvTrace {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn record(writer: &mut Option<BufWriter<File>>, now: Timestamp, id: impl std::fmt::Display, value: impl std::fmt::Display) {
    if let Some(writer) = writer {
        // a failed trace write is not worth stopping the run for
        let _ = writeln!(writer, "{},{id},{value}", now.as_secs_f64());
    }
}

impl Subscriber for CsvTrace {
    fn on_rx(&mut self, now: Timestamp, flow: TraceId, bytes: usize) {
        record(&mut self.rx, now, flow, bytes);
    }

    fn on_cwnd(&mut self, now: Timestamp, flow: TraceId, cwnd: u32) {
        record(&mut self.cwnd, now, flow, cwnd);
    }

    fn on_rtt(&mut self, now: Timestamp, flow: TraceId, rtt: Duration) {
        record(&mut self.rtt, now, flow, rtt.as_micros());
    }

    fn on_flow_allocated_fair_share(&mut self, now: Timestamp, flow: TraceId, fair_share: f64) {
        record(&mut self.flow_fair_share, now, flow, fair_share);
    }

    fn on_flow_usage(&mut self, now: Timestamp, flow: TraceId, usage: f64) {
        record(&mut self.flow_usage, now, flow, usage);
    }

    fn on_tenant_actual_fair_share(&mut self, now: Timestamp, tenant: TenantId, fair_share: f64) {
        record(&mut self.tenant_fair_share, now, tenant, fair_share);
    }

    fn on_class_rate(&mut self, now: Timestamp, flow: TraceId, rate: DataRate) {
        record(&mut self.class_rate, now, flow, rate.bits_per_sec());
    }

    fn on_class_usage(&mut self, now: Timestamp, flow: TraceId, bytes: u64) {
        record(&mut self.class_usage, now, flow, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_enabled_streams_only() {
        let dir = tempfile::tempdir().unwrap();
        let toggles = Toggles {
            rtt: false,
            ..Default::default()
        };

        let mut trace = CsvTrace::create(dir.path(), toggles).unwrap();
        let now = Timestamp::from_duration(Duration::from_millis(1500));
        trace.on_rx(now, TraceId(7), 1020);
        trace.on_rtt(now, TraceId(7), Duration::from_micros(250));
        trace.flush().unwrap();

        let rx = fs::read_to_string(dir.path().join("rx-trace.txt")).unwrap();
        assert_eq!(rx, "1.5,7,1020\n");

        // the disabled stream was never created
        assert!(!dir.path().join("rtt-trace.txt").exists());
    }
}
