// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A two-bucket token-bucket filter.
//!
//! The first bucket replenishes at the configured rate and is bounded by the
//! burst size; the second replenishes at the peak rate and is bounded by the
//! MTU, limiting how fast a saved-up burst may leave. A packet is released
//! only when both buckets hold its size.

use crate::{packet::Packet, rate::DataRate, time::Timestamp};
use std::{collections::VecDeque, time::Duration};

/// Default depth of the rate bucket in bytes
pub const DEFAULT_BURST: u64 = 125_000;

/// Default depth of the peak bucket in bytes
pub const DEFAULT_MTU: u64 = 1_500;

#[derive(Debug)]
pub struct Tbf {
    queue: VecDeque<Packet>,
    max_size: usize,
    rate: DataRate,
    peak_rate: DataRate,
    burst_bits: u64,
    mtu_bits: u64,
    btokens: u64,
    ptokens: u64,
    last_refill: Option<Timestamp>,
}

impl Default for Tbf {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Tbf {
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn rate(&self) -> DataRate {
        self.rate
    }

    /// Reconfigures the steady replenishment rate
    pub fn set_rate(&mut self, rate: DataRate) {
        self.rate = rate;
    }

    /// Reconfigures the peak replenishment rate
    pub fn set_peak_rate(&mut self, peak_rate: DataRate) {
        self.peak_rate = peak_rate;
    }

    /// Appends a packet, handing it back if the embedded queue is full
    pub fn enqueue(&mut self, packet: Packet) -> Result<(), Packet> {
        if self.queue.len() >= self.max_size {
            return Err(packet);
        }
        self.queue.push_back(packet);
        Ok(())
    }

    /// Releases the head packet if the buckets allow it
    pub fn dequeue(&mut self, now: Timestamp) -> Option<Packet> {
        self.refill(now);

        let bits = self.queue.front()?.len() as u64 * 8;
        if bits > self.btokens {
            return None;
        }
        if !self.peak_rate.is_zero() && bits > self.ptokens {
            return None;
        }

        self.btokens -= bits;
        if !self.peak_rate.is_zero() {
            self.ptokens -= bits;
        }
        self.queue.pop_front()
    }

    /// Removes the head packet without consuming tokens (overflow drops)
    pub fn force_drop(&mut self) -> Option<Packet> {
        self.queue.pop_front()
    }

    #[inline]
    pub fn peek(&self) -> Option<&Packet> {
        self.queue.front()
    }

    /// The earliest time a head packet held back by tokens could be released
    pub fn next_ready(&self, now: Timestamp) -> Option<Timestamp> {
        let bits = self.queue.front()?.len() as u64 * 8;

        let mut wait = Duration::ZERO;
        if bits > self.btokens {
            if self.rate.is_zero() {
                return None;
            }
            wait = wait.max(deficit_wait(bits - self.btokens, self.rate));
        }
        if !self.peak_rate.is_zero() && bits > self.ptokens {
            wait = wait.max(deficit_wait(bits - self.ptokens, self.peak_rate));
        }

        Some(now + wait)
    }

    fn refill(&mut self, now: Timestamp) {
        let elapsed = match self.last_refill.replace(now) {
            Some(last) => now.saturating_since(last),
            None => return,
        };

        self.btokens = accrue(self.btokens, self.burst_bits, self.rate, elapsed);
        self.ptokens = accrue(self.ptokens, self.mtu_bits, self.peak_rate, elapsed);
    }
}

#[inline]
fn accrue(tokens: u64, cap: u64, rate: DataRate, elapsed: Duration) -> u64 {
    let earned = (rate.bits_per_sec() as u128 * elapsed.as_nanos()) / 1_000_000_000;
    tokens.saturating_add(earned.min(u64::MAX as u128) as u64).min(cap)
}

#[inline]
fn deficit_wait(deficit_bits: u64, rate: DataRate) -> Duration {
    let nanos = (deficit_bits as u128 * 1_000_000_000).div_ceil(rate.bits_per_sec() as u128);
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

#[derive(Debug)]
pub struct Builder {
    max_size: usize,
    rate: DataRate,
    peak_rate: DataRate,
    burst: u64,
    mtu: u64,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            max_size: 10_240,
            rate: DataRate::ZERO,
            peak_rate: DataRate::ZERO,
            burst: DEFAULT_BURST,
            mtu: DEFAULT_MTU,
        }
    }
}

impl Builder {
    pub fn with_max_size(mut self, packets: usize) -> Self {
        self.max_size = packets;
        self
    }

    pub fn with_rate(mut self, rate: DataRate) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_peak_rate(mut self, peak_rate: DataRate) -> Self {
        self.peak_rate = peak_rate;
        self
    }

    /// Rate bucket depth in bytes
    pub fn with_burst(mut self, bytes: u64) -> Self {
        self.burst = bytes;
        self
    }

    /// Peak bucket depth in bytes
    pub fn with_mtu(mut self, bytes: u64) -> Self {
        self.mtu = bytes;
        self
    }

    pub fn build(self) -> Tbf {
        let Self {
            max_size,
            rate,
            peak_rate,
            burst,
            mtu,
        } = self;

        Tbf {
            queue: VecDeque::new(),
            max_size,
            rate,
            peak_rate,
            burst_bits: burst * 8,
            mtu_bits: mtu * 8,
            // both buckets start full
            btokens: burst * 8,
            ptokens: mtu * 8,
            last_refill: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{testing::Clock, Clock as _};
    use std::net::Ipv4Addr;

    fn packet(len: usize) -> Packet {
        Packet::data(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            len - crate::inet::IPV4_HEADER_LEN,
        )
    }

    #[test]
    fn shapes_to_the_configured_rate() {
        // 8Mbps, no saved-up burst, no peak bucket
        let mut tbf = Tbf::builder()
            .with_rate(DataRate::from_bps(8_000_000))
            .with_burst(1_000)
            .with_peak_rate(DataRate::ZERO)
            .build();

        let mut clock = Clock::default();
        for _ in 0..3 {
            tbf.enqueue(packet(1_000)).unwrap();
        }

        // the initial bucket releases one packet
        assert!(tbf.dequeue(clock.get_time()).is_some());
        assert!(tbf.dequeue(clock.get_time()).is_none());

        // 1000 bytes at 8Mbps earn back in 1ms
        let ready = tbf.next_ready(clock.get_time()).unwrap();
        assert_eq!(ready - clock.get_time(), Duration::from_millis(1));

        clock.inc_by(Duration::from_millis(1));
        assert!(tbf.dequeue(clock.get_time()).is_some());
        assert!(tbf.dequeue(clock.get_time()).is_none());
    }

    #[test]
    fn peak_bucket_paces_saved_up_bursts() {
        let mut tbf = Tbf::builder()
            .with_rate(DataRate::from_bps(8_000_000))
            .with_burst(10_000)
            .with_peak_rate(DataRate::from_bps(16_000_000))
            .with_mtu(1_000)
            .build();

        let mut clock = Clock::default();
        for _ in 0..4 {
            tbf.enqueue(packet(1_000)).unwrap();
        }

        // the burst bucket holds ten packets worth, but the peak bucket only
        // one: the second release waits on the peak rate
        assert!(tbf.dequeue(clock.get_time()).is_some());
        assert!(tbf.dequeue(clock.get_time()).is_none());

        let ready = tbf.next_ready(clock.get_time()).unwrap();
        assert_eq!(ready - clock.get_time(), Duration::from_micros(500));

        clock.inc_by(Duration::from_micros(500));
        assert!(tbf.dequeue(clock.get_time()).is_some());
    }

    #[test]
    fn bounded_queue_hands_the_packet_back() {
        let mut tbf = Tbf::builder().with_max_size(1).build();

        assert!(tbf.enqueue(packet(100)).is_ok());
        assert!(tbf.enqueue(packet(100)).is_err());
        assert_eq!(tbf.len(), 1);
    }

    #[test]
    fn zero_rate_never_releases() {
        let mut tbf = Tbf::builder()
            .with_rate(DataRate::ZERO)
            .with_burst(0)
            .build();

        let mut clock = Clock::default();
        tbf.enqueue(packet(1_000)).unwrap();

        assert!(tbf.dequeue(clock.get_time()).is_none());
        assert!(tbf.next_ready(clock.get_time()).is_none());

        clock.inc_by(Duration::from_secs(60));
        assert!(tbf.dequeue(clock.get_time()).is_none());
    }
}
