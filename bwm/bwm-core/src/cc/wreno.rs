// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::cc::{avoidance_adder, min_window, State, WeightedController};

/// Weighted Reno, additive-increase flavor: avoidance growth scales by `w`,
/// losses halve.
#[derive(Clone, Copy, Debug, Default)]
pub struct WrenoAi;

impl WeightedController for WrenoAi {
    fn ss_thresh(&self, state: &State, bytes_in_flight: u32) -> u32 {
        min_window(state, (bytes_in_flight as f64 / 2.0) as u32)
    }

    fn slow_start(&self, state: &mut State, segments_acked: u32) -> u32 {
        if segments_acked >= 1 {
            state.cwnd += state.segment_size;
            return segments_acked - 1;
        }

        0
    }

    fn congestion_avoidance(&self, state: &mut State, segments_acked: u32) {
        if segments_acked > 0 {
            state.cwnd += avoidance_adder(state.weight, state);
        }
    }
}

/// Weighted Reno, multiplicative-decrease flavor: plain one-segment-per-RTT
/// avoidance, but losses reduce by `1 - 0.5 / w`.
///
/// The sub-byte per-ack increase of a plain Reno ramp would truncate to zero
/// on large windows, so the window is tracked fractionally and re-synced on
/// divergence.
#[derive(Clone, Copy, Debug, Default)]
pub struct WrenoMd;

impl WeightedController for WrenoMd {
    fn ss_thresh(&self, state: &State, bytes_in_flight: u32) -> u32 {
        min_window(
            state,
            (bytes_in_flight as f64 * (1.0 - 0.5 / state.weight)) as u32,
        )
    }

    fn slow_start(&self, state: &mut State, segments_acked: u32) -> u32 {
        if segments_acked >= 1 {
            state.cwnd += state.segment_size;
            state.precise_cwnd = state.cwnd as f64;
            return segments_acked - 1;
        }

        0
    }

    fn congestion_avoidance(&self, state: &mut State, segments_acked: u32) {
        if segments_acked > 0 {
            if (state.precise_cwnd - state.cwnd as f64).abs() > 1.0 {
                // the integer window moved underneath us, resync
                state.precise_cwnd = state.cwnd as f64;
            }
            let segment = state.segment_size as f64;
            state.precise_cwnd += (segment * segment) / state.cwnd as f64;
            state.cwnd = state.precise_cwnd as u32;
        }
    }
}
