// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::cc::{avoidance_adder, min_window, State, WeightedController};

/// MulTCP: one flow emulating `w` Reno flows.
///
/// Slow start doubles the per-ack growth while the window is below
/// `3^(ln w / (ln 3 - ln 2))`, avoidance grows by `w` segments per RTT, and a
/// loss in avoidance reduces by `(w - 0.5) / w`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MulTcp;

impl WeightedController for MulTcp {
    fn ss_thresh(&self, state: &State, bytes_in_flight: u32) -> u32 {
        let window = if state.cwnd < state.ssthresh {
            (bytes_in_flight as f64 / 2.0) as u32
        } else {
            (bytes_in_flight as f64 * ((state.weight - 0.5) / state.weight)) as u32
        };
        min_window(state, window)
    }

    fn slow_start(&self, state: &mut State, segments_acked: u32) -> u32 {
        if segments_acked >= 1 {
            let accelerated_until = 3.0f64.powf(state.weight.ln() / (3.0f64.ln() - 2.0f64.ln()));
            if (state.cwnd as f64) <= accelerated_until {
                state.cwnd += 2 * state.segment_size;
            } else {
                state.cwnd += state.segment_size;
            }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avoidance_grows_by_weight_segments_per_window() {
        let controller = MulTcp;
        let mut state = State::new(1000, 4.0).with_initial_window(10);
        state.ssthresh = state.cwnd;

        controller.increase_window(&mut state, 1);
        // w * mss^2 / cwnd = 4 * 1e6 / 1e4
        assert_eq!(state.cwnd, 10_400);
    }

    #[test]
    fn threshold_uses_the_weighted_ratio_in_avoidance() {
        let controller = MulTcp;
        let mut state = State::new(1000, 4.0).with_initial_window(10);

        // slow start halves
        assert_eq!(controller.ss_thresh(&state, 10_000), 5000);

        // avoidance reduces by (w - 0.5) / w
        state.ssthresh = state.cwnd;
        assert_eq!(controller.ss_thresh(&state, 10_000), 8750);

        // never below two segments
        assert_eq!(controller.ss_thresh(&state, 1000), 2000);
    }

    #[test]
    fn slow_start_accelerates_small_windows() {
        let controller = MulTcp;
        // weight 3 accelerates up to 3^(ln 3 / (ln 3 - ln 2)) ~ 19.8 bytes;
        // use a tiny segment so the bound is visible
        let mut state = State::new(8, 3.0);

        let left = controller.slow_start(&mut state, 2);
        assert_eq!(left, 1);
        assert_eq!(state.cwnd, 24);

        controller.slow_start(&mut state, 1);
        assert_eq!(state.cwnd, 32);
    }
}
