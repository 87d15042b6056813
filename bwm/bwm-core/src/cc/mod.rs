// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Weighted Reno-family congestion controllers.
//!
//! Every variant follows the same slow-start / congestion-avoidance shape and
//! differs only in the multiplicative factor applied to per-ack growth and in
//! the `ss_thresh` reduction ratio derived from the flow's weight `w`.

mod ewtcp;
mod multcp;
mod wreno;

pub use ewtcp::Ewtcp;
pub use multcp::MulTcp;
pub use wreno::{WrenoAi, WrenoMd};

use core::{fmt, str::FromStr};

/// Mutable window state shared by all variants
#[derive(Clone, Debug)]
pub struct State {
    /// Congestion window in bytes
    pub cwnd: u32,
    /// Slow-start threshold in bytes
    pub ssthresh: u32,
    /// Sender maximum segment size in bytes
    pub segment_size: u32,
    /// The flow's weight
    pub weight: f64,
    /// Fractional window carried between acks by variants whose per-ack
    /// increase is below one byte
    pub precise_cwnd: f64,
}

impl State {
    pub fn new(segment_size: u32, weight: f64) -> Self {
        Self {
            cwnd: segment_size,
            ssthresh: u32::MAX,
            segment_size,
            weight,
            precise_cwnd: segment_size as f64,
        }
    }

    pub fn with_initial_window(mut self, segments: u32) -> Self {
        self.cwnd = self.segment_size * segments;
        self.precise_cwnd = self.cwnd as f64;
        self
    }

    /// Applies a loss signal: the window collapses to the variant's reduced
    /// threshold
    pub fn on_loss<C: WeightedController + ?Sized>(
        &mut self,
        controller: &C,
        bytes_in_flight: u32,
    ) {
        let threshold = controller.ss_thresh(self, bytes_in_flight);
        self.ssthresh = threshold;
        self.cwnd = threshold;
        self.precise_cwnd = threshold as f64;
    }
}

pub trait WeightedController {
    /// Grows the window for newly acknowledged segments
    fn increase_window(&self, state: &mut State, segments_acked: u32) {
        let mut segments_acked = segments_acked;
        if state.cwnd < state.ssthresh {
            segments_acked = self.slow_start(state, segments_acked);
        }
        if state.cwnd >= state.ssthresh {
            self.congestion_avoidance(state, segments_acked);
        }
    }

    /// The window to fall back to after a loss
    fn ss_thresh(&self, state: &State, bytes_in_flight: u32) -> u32;

    /// Exponential growth phase; returns the acked segments left over for
    /// congestion avoidance
    fn slow_start(&self, state: &mut State, segments_acked: u32) -> u32;

    /// Linear growth phase
    fn congestion_avoidance(&self, state: &mut State, segments_acked: u32);
}

/// The variants selectable from the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    MulTcp,
    Ewtcp,
    WrenoAi,
    WrenoMd,
}

impl Variant {
    pub fn controller(self) -> Box<dyn WeightedController> {
        match self {
            Self::MulTcp => Box::new(MulTcp),
            Self::Ewtcp => Box::new(Ewtcp),
            Self::WrenoAi => Box::new(WrenoAi),
            Self::WrenoMd => Box::new(WrenoMd),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseVariantError;

impl fmt::Display for ParseVariantError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown congestion controller (expected multcp, ewtcp, wreno-ai or wreno-md)")
    }
}

impl std::error::Error for ParseVariantError {}

impl FromStr for Variant {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multcp" => Ok(Self::MulTcp),
            "ewtcp" => Ok(Self::Ewtcp),
            "wreno-ai" => Ok(Self::WrenoAi),
            "wreno-md" => Ok(Self::WrenoMd),
            _ => Err(ParseVariantError),
        }
    }
}

/// Floors the per-ack byte increase at one byte so avoidance always makes
/// progress
pub(crate) fn avoidance_adder(factor: f64, state: &State) -> u32 {
    let segment = state.segment_size as f64;
    let adder = (factor * segment * segment) / state.cwnd as f64;
    adder.max(1.0) as u32
}

pub(crate) fn min_window(state: &State, window: u32) -> u32 {
    window.max(2 * state.segment_size)
}
