// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Weighted fair queueing over a virtual clock.
//!
//! Flows carry virtual finish timestamps for their head and tail packets in
//! bytes-per-weight units. Dequeue serves the smallest head timestamp and
//! advances the virtual clock; overflow drops from the flow with the largest
//! tail timestamp, the flow that is furthest ahead of its fair share.

use crate::{hash::hash32, packet::Packet};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Default number of hash slots for classification
pub const DEFAULT_FLOWS: u32 = 1031;

/// Default overall queue budget in packets
pub const DEFAULT_MAX_SIZE: usize = 10_240;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowStatus {
    Inactive,
    Active,
}

#[derive(Debug)]
pub struct WfqFlow {
    queue: VecDeque<Packet>,
    status: FlowStatus,
    head_ts: f64,
    tail_ts: f64,
    /// Static weight override; per-packet tags and the scheduler default
    /// apply when unset
    weight: Option<f64>,
    default_weight: f64,
}

impl WfqFlow {
    fn new(default_weight: f64) -> Self {
        Self {
            queue: VecDeque::new(),
            status: FlowStatus::Inactive,
            head_ts: 0.0,
            tail_ts: 0.0,
            weight: None,
            default_weight,
        }
    }

    #[inline]
    pub fn status(&self) -> FlowStatus {
        self.status
    }

    #[inline]
    pub fn head_ts(&self) -> f64 {
        self.head_ts
    }

    #[inline]
    pub fn tail_ts(&self) -> f64 {
        self.tail_ts
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = Some(weight);
    }

    /// The weight that applies to one packet of this flow
    fn weight_of(&self, packet: &Packet) -> f64 {
        if let Some(weight) = self.weight {
            return weight;
        }
        packet
            .tags
            .flow_weight
            .map(|tag| tag.0)
            .unwrap_or(self.default_weight)
    }

    fn enqueue(&mut self, packet: Packet, virtual_now: f64) {
        let cost = packet.len() as f64 / self.weight_of(&packet);

        if self.status == FlowStatus::Inactive {
            self.status = FlowStatus::Active;
            // head_ts moves only on (re)activation
            self.head_ts = virtual_now + cost;
            self.tail_ts = virtual_now;
        }
        self.tail_ts += cost;

        self.queue.push_back(packet);
    }

    fn dequeue(&mut self) -> Option<Packet> {
        if self.status == FlowStatus::Inactive {
            return None;
        }

        let packet = self.queue.pop_front();

        if let Some(head) = self.queue.front() {
            self.head_ts += head.len() as f64 / self.weight_of(head);
        } else {
            self.status = FlowStatus::Inactive;
        }

        packet
    }

    /// Head drop used by the overflow sweep: both timestamps are rolled back
    /// by the dropped packet's cost, as if it had never been queued
    fn drop_head(&mut self) -> Option<Packet> {
        if self.status == FlowStatus::Inactive {
            return None;
        }

        let packet = self.queue.pop_front()?;
        let cost = packet.len() as f64 / self.weight_of(&packet);

        if let Some(head) = self.queue.front() {
            self.head_ts = self.head_ts - cost + head.len() as f64 / self.weight_of(head);
            self.tail_ts -= cost;
        } else {
            self.status = FlowStatus::Inactive;
        }

        Some(packet)
    }
}

#[derive(Debug)]
pub struct WfqQueueDisc {
    flows: Vec<WfqFlow>,
    /// hash slot -> flow index
    slots: BTreeMap<u32, usize>,
    active: BTreeSet<usize>,
    virtual_time: f64,
    flow_num: u32,
    perturbation: u32,
    default_weight: f64,
    max_size: usize,
    len: usize,
}

impl Default for WfqQueueDisc {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WfqQueueDisc {
    pub fn builder() -> Builder {
        Builder::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn virtual_time(&self) -> f64 {
        self.virtual_time
    }

    pub fn flow(&self, index: usize) -> Option<&WfqFlow> {
        self.flows.get(index)
    }

    /// Enqueues one packet, returning any packets evicted to stay within the
    /// size budget
    pub fn enqueue(&mut self, packet: Packet) -> Vec<Packet> {
        let slot = self.classify(&packet);

        let index = match self.slots.get(&slot) {
            Some(&index) => index,
            None => {
                let index = self.flows.len();
                self.flows.push(WfqFlow::new(self.default_weight));
                self.slots.insert(slot, index);
                index
            }
        };

        self.flows[index].enqueue(packet, self.virtual_time);
        self.len += 1;

        if self.flows[index].status == FlowStatus::Active {
            self.active.insert(index);
        }

        let mut evicted = Vec::new();
        while self.len > self.max_size {
            match self.drop_longest_tail() {
                Some(packet) => evicted.push(packet),
                None => break,
            }
        }

        evicted
    }

    /// Serves the active flow with the smallest head timestamp
    pub fn dequeue(&mut self) -> Option<Packet> {
        let (index, min_ts) = self.min_head()?;

        let packet = self.flows[index]
            .dequeue()
            .expect("an active flow holds at least one packet");
        self.len -= 1;

        if self.flows[index].status != FlowStatus::Active {
            self.active.remove(&index);
        }

        // the clock never runs backwards, even when a late activation put a
        // head timestamp in the past
        self.virtual_time = self.virtual_time.max(min_ts);

        Some(packet)
    }

    /// The packet `dequeue` would serve, without advancing any clock
    pub fn peek(&self) -> Option<&Packet> {
        let (index, _) = self.min_head()?;
        self.flows[index].queue.front()
    }

    fn classify(&self, packet: &Packet) -> u32 {
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&u32::from(packet.src()).to_be_bytes());
        bytes[4..8].copy_from_slice(&u32::from(packet.dst()).to_be_bytes());
        bytes[8..].copy_from_slice(&self.perturbation.to_be_bytes());
        hash32(&bytes) % self.flow_num
    }

    fn min_head(&self) -> Option<(usize, f64)> {
        let mut selected = None;
        for &index in &self.active {
            let head_ts = self.flows[index].head_ts;
            match selected {
                Some((_, min_ts)) if head_ts >= min_ts => {}
                _ => selected = Some((index, head_ts)),
            }
        }
        selected
    }

    fn drop_longest_tail(&mut self) -> Option<Packet> {
        let mut selected: Option<(usize, f64)> = None;
        for &index in &self.active {
            let tail_ts = self.flows[index].tail_ts;
            match selected {
                Some((_, max_ts)) if tail_ts <= max_ts => {}
                _ => selected = Some((index, tail_ts)),
            }
        }

        let (index, _) = selected?;
        let packet = self.flows[index].drop_head()?;
        self.len -= 1;

        if self.flows[index].status != FlowStatus::Active {
            self.active.remove(&index);
        }

        Some(packet)
    }
}

#[derive(Debug)]
pub struct Builder {
    flow_num: u32,
    perturbation: u32,
    default_weight: f64,
    max_size: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            flow_num: DEFAULT_FLOWS,
            perturbation: 0,
            default_weight: 1.0,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl Builder {
    /// Number of hash slots packets are classified into
    pub fn with_flows(mut self, flow_num: u32) -> Self {
        self.flow_num = flow_num;
        self
    }

    /// Salt mixed into the classification hash
    pub fn with_perturbation(mut self, perturbation: u32) -> Self {
        self.perturbation = perturbation;
        self
    }

    /// Weight applied to packets without a weight tag
    pub fn with_default_weight(mut self, weight: f64) -> Self {
        self.default_weight = weight;
        self
    }

    /// Overall queue budget in packets
    pub fn with_max_size(mut self, packets: usize) -> Self {
        self.max_size = packets;
        self
    }

    pub fn build(self) -> WfqQueueDisc {
        let Self {
            flow_num,
            perturbation,
            default_weight,
            max_size,
        } = self;

        WfqQueueDisc {
            flows: Vec::new(),
            slots: BTreeMap::new(),
            active: BTreeSet::new(),
            virtual_time: 0.0,
            flow_num,
            perturbation,
            default_weight,
            max_size,
            len: 0,
        }
    }
}
