// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Congestion-aware work-conserving feedback wire format and scoreboard.
//!
//! Receivers sample the ECN marks of arriving packets per flow and, once
//! enough packets accumulated, answer the sender with a datagram whose
//! payload is the fraction of bytes that carried a congestion mark: a single
//! little-endian IEEE-754 `f32` in `[0, 1]`, sent with protocol `0xFD` and
//! TOS `0x80`, tagged with the flow it describes.

use bwm_core::{
    ids::TraceId,
    inet::{CAWC_PROTOCOL, CAWC_TOS},
    packet::Packet,
    tags::FlowIdTag,
    time::Timestamp,
};
use bytes::Bytes;
use std::net::Ipv4Addr;

/// Per-flow receive-side sampling state
#[derive(Clone, Copy, Debug)]
pub struct ScoreboardEntry {
    /// Sampled packet count
    pub spc: u64,
    /// Bytes received with a congestion-experienced mark
    pub ceb: u64,
    /// Bytes received without a mark
    pub nmb: u64,
    /// Last modification time, used to expire idle entries
    pub lmt: Timestamp,
    /// The flow's source, where feedback is sent
    pub src: Ipv4Addr,
}

impl ScoreboardEntry {
    pub fn new(src: Ipv4Addr, now: Timestamp) -> Self {
        Self {
            spc: 0,
            ceb: 0,
            nmb: 0,
            lmt: now,
            src,
        }
    }

    /// The congestion factor sampled so far: `CEB / (CEB + NMB)`
    pub fn congestion_factor(&self) -> f32 {
        let total = self.ceb + self.nmb;
        if total == 0 {
            return 0.0;
        }
        self.ceb as f32 / total as f32
    }

    pub fn clear_samples(&mut self) {
        self.spc = 0;
        self.ceb = 0;
        self.nmb = 0;
    }
}

/// Builds the feedback datagram for a flow
pub fn feedback_packet(src: Ipv4Addr, dst: Ipv4Addr, flow: TraceId, factor: f32) -> Packet {
    let payload = Bytes::copy_from_slice(&factor.to_le_bytes());
    Packet::control(src, dst, CAWC_PROTOCOL, CAWC_TOS, payload).with_flow(FlowIdTag(flow))
}

/// Returns true if the packet is a CAWC feedback datagram
pub fn is_feedback(packet: &Packet) -> bool {
    packet.protocol() == CAWC_PROTOCOL && packet.tos() == CAWC_TOS
}

/// Extracts the congestion factor from a feedback payload
pub fn decode_factor(payload: &[u8]) -> Option<f32> {
    let bytes: [u8; 4] = payload.get(..4)?.try_into().ok()?;
    Some(f32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn factor_round_trips_through_the_wire_form() {
        let src = Ipv4Addr::new(10, 0, 0, 2);
        let dst = Ipv4Addr::new(10, 0, 0, 1);

        let packet = feedback_packet(src, dst, TraceId(9), 0.2);
        assert!(is_feedback(&packet));
        assert_eq!(packet.tags.flow_id, Some(FlowIdTag(TraceId(9))));
        assert_eq!(packet.payload_size(), 4);
        assert_eq!(decode_factor(packet.payload()), Some(0.2));
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        assert_eq!(decode_factor(&[0, 0]), None);
    }

    #[test]
    fn sampled_factor_is_the_marked_byte_fraction() {
        let now = Timestamp::from_duration(Duration::from_millis(1));
        let mut entry = ScoreboardEntry::new(Ipv4Addr::new(10, 0, 0, 1), now);

        assert_eq!(entry.congestion_factor(), 0.0);

        entry.ceb = 10_000;
        entry.nmb = 40_000;
        let factor = entry.congestion_factor();
        assert!((factor - 0.2).abs() < 2f32.powi(-20));

        entry.clear_samples();
        assert_eq!(entry.congestion_factor(), 0.0);
    }
}
