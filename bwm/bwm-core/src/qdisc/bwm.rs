// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The multi-class rate-limiting queue disc.
//!
//! Packets are classified by their tenant tag into per-flow classes, each
//! shaped by an embedded token-bucket filter. Dequeue is a deficit-free
//! round-robin over the classes; overflow beyond the overall packet budget is
//! resolved by dropping from the head of a uniformly random class.
//!
//! The disc does not register flows itself: when it sees an unknown flow it
//! asks the supplied [`FlowAdmission`] policy, which either funds an initial
//! rate (possibly expropriating siblings) or rejects the packet.

use crate::{
    hash::assign_flow_id,
    ids::{ClassIndex, FlowId, TenantId, TraceId},
    packet::Packet,
    qdisc::tbf::Tbf,
    random,
    rate::DataRate,
    time::Timestamp,
};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Default number of hash slots for classification
pub const DEFAULT_FLOWS: u32 = 1031;

/// Default overall queue budget in packets
pub const DEFAULT_MAX_SIZE: usize = 10_240;

/// A new flow observed by the queue disc, pending admission
#[derive(Clone, Copy, Debug)]
pub struct AdmissionRequest {
    pub tenant_id: TenantId,
    pub flow_id: FlowId,
    pub trace_id: TraceId,
    /// The index the class will occupy if admitted
    pub class: ClassIndex,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// The admission policy's answer
#[derive(Clone, Debug)]
pub enum AdmissionVerdict {
    Admit {
        /// Rate funded for the new class
        initial_rate: DataRate,
        /// Rates expropriated back from sibling classes
        sibling_rates: Vec<(ClassIndex, DataRate)>,
    },
    Reject,
}

pub trait FlowAdmission {
    fn admit(&mut self, request: &AdmissionRequest) -> AdmissionVerdict;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueResult {
    Queued(ClassIndex),
    /// The overall packet budget was exhausted before enqueue
    DroppedOverLimit,
    /// The admission policy rejected the flow
    DroppedUnregistered,
}

/// The outcome of one enqueue, including any packets evicted by the overflow
/// sweep
#[derive(Debug)]
pub struct Enqueued {
    pub result: EnqueueResult,
    pub evicted: Vec<Packet>,
}

/// One per-flow class: a shaped child queue plus accounting
#[derive(Debug)]
pub struct BwmQueueDiscClass {
    flow_id: FlowId,
    trace_id: TraceId,
    rate: DataRate,
    usage_bytes: u64,
    tbf: Tbf,
}

impl BwmQueueDiscClass {
    fn new(flow_id: FlowId, trace_id: TraceId, max_size: usize) -> Self {
        Self {
            flow_id,
            trace_id,
            rate: DataRate::ZERO,
            usage_bytes: 0,
            tbf: Tbf::builder().with_max_size(max_size).build(),
        }
    }

    /// Reconfigures the class rate; the embedded filter gets the rate plus a
    /// peak of twice the rate.
    ///
    /// A non-positive rate is refused and the previous rate kept.
    pub fn set_rate(&mut self, rate: DataRate) -> bool {
        if rate.is_zero() {
            return false;
        }

        self.rate = rate;
        self.tbf.set_rate(rate);
        self.tbf
            .set_peak_rate(DataRate::from_bps(rate.bits_per_sec() << 1));
        true
    }

    #[inline]
    pub fn rate(&self) -> DataRate {
        self.rate
    }

    #[inline]
    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    #[inline]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Bytes dequeued since the counter was last reset
    #[inline]
    pub fn usage_bytes(&self) -> u64 {
        self.usage_bytes
    }

    #[inline]
    pub fn reset_usage(&mut self) {
        self.usage_bytes = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tbf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tbf.is_empty()
    }

    fn enqueue(&mut self, packet: Packet) -> Result<(), Packet> {
        self.tbf.enqueue(packet)
    }

    fn dequeue(&mut self, now: Timestamp) -> Option<Packet> {
        self.tbf.dequeue(now)
    }

    fn force_drop(&mut self) -> Option<Packet> {
        self.tbf.force_drop()
    }
}

#[derive(Debug)]
pub struct BwmQueueDisc {
    classes: Vec<BwmQueueDiscClass>,
    /// hash slot -> class index
    slots: BTreeMap<u32, usize>,
    flow_num: u32,
    max_size: usize,
    next_flow: usize,
    len: usize,
}

impl BwmQueueDisc {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Creates the disc with its default unlimited class, bucketed at half
    /// the device rate
    pub fn new(device_rate: DataRate) -> Self {
        Self::builder().build(device_rate)
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
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn class(&self, index: ClassIndex) -> Option<&BwmQueueDiscClass> {
        self.classes.get(index.0)
    }

    pub fn class_mut(&mut self, index: ClassIndex) -> Option<&mut BwmQueueDiscClass> {
        self.classes.get_mut(index.0)
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassIndex, &BwmQueueDiscClass)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, class)| (ClassIndex(i), class))
    }

    /// Classifies and enqueues one packet.
    ///
    /// Untagged packets go to the default class; unknown tagged flows are
    /// offered to `admission` first. After a successful enqueue the overall
    /// budget is re-enforced by evicting from random classes.
    pub fn enqueue<A: FlowAdmission, G: random::Generator>(
        &mut self,
        packet: Packet,
        admission: &mut A,
        rng: &mut G,
    ) -> Enqueued {
        if self.len > self.max_size {
            return Enqueued {
                result: EnqueueResult::DroppedOverLimit,
                evicted: Vec::new(),
            };
        }

        let class_index = match packet.tags.tenant_id {
            None => 0,
            Some(tenant_tag) => {
                let tenant_id = tenant_tag.0;
                let flow_id = assign_flow_id(tenant_id, packet.src(), packet.dst());
                let trace_id = packet.tags.flow_id.map(|tag| tag.0).unwrap_or_default();

                match self.lookup_or_admit(
                    tenant_id,
                    flow_id,
                    trace_id,
                    packet.src(),
                    packet.dst(),
                    admission,
                ) {
                    Some(index) => index,
                    None => {
                        return Enqueued {
                            result: EnqueueResult::DroppedUnregistered,
                            evicted: Vec::new(),
                        }
                    }
                }
            }
        };

        let result = match self.classes[class_index].enqueue(packet) {
            Ok(()) => {
                self.len += 1;
                EnqueueResult::Queued(ClassIndex(class_index))
            }
            Err(_) => EnqueueResult::DroppedOverLimit,
        };

        let evicted = self.enforce_limit(rng);

        Enqueued { result, evicted }
    }

    /// Round-robin dequeue starting at the rotation cursor.
    ///
    /// The cursor advances on every attempt, successful or not, so an empty
    /// or token-starved class cannot stall the rotation; one full revolution
    /// bounds the scan.
    pub fn dequeue(&mut self, now: Timestamp) -> Option<(Packet, ClassIndex)> {
        let class_count = self.classes.len();
        for _ in 0..class_count {
            let index = self.next_flow;
            self.next_flow = (self.next_flow + 1) % class_count;

            if let Some(packet) = self.classes[index].dequeue(now) {
                self.len -= 1;
                // usage is accounted on the shaped side
                self.classes[index].usage_bytes += packet.len() as u64;
                return Some((packet, ClassIndex(index)));
            }
        }

        None
    }

    /// The earliest instant any backlogged class could release a packet
    pub fn next_ready(&self, now: Timestamp) -> Option<Timestamp> {
        self.classes
            .iter()
            .filter_map(|class| class.tbf.next_ready(now))
            .min()
    }

    fn lookup_or_admit<A: FlowAdmission>(
        &mut self,
        tenant_id: TenantId,
        flow_id: FlowId,
        trace_id: TraceId,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        admission: &mut A,
    ) -> Option<usize> {
        let mut slot = flow_id.0 % self.flow_num;

        for _ in 0..self.flow_num {
            match self.slots.get(&slot) {
                Some(&index) => {
                    if self.classes[index].flow_id == flow_id {
                        return Some(index);
                    }
                    // hash collision, linear probe forward
                    slot = (slot + 1) % self.flow_num;
                }
                None => {
                    let index = self.classes.len();
                    let request = AdmissionRequest {
                        tenant_id,
                        flow_id,
                        trace_id,
                        class: ClassIndex(index),
                        src,
                        dst,
                    };

                    match admission.admit(&request) {
                        AdmissionVerdict::Admit {
                            initial_rate,
                            sibling_rates,
                        } => {
                            let mut class =
                                BwmQueueDiscClass::new(flow_id, trace_id, self.max_size);
                            class.set_rate(initial_rate);
                            self.classes.push(class);
                            self.slots.insert(slot, index);

                            for (sibling, rate) in sibling_rates {
                                if let Some(class) = self.classes.get_mut(sibling.0) {
                                    class.set_rate(rate);
                                }
                            }

                            return Some(index);
                        }
                        AdmissionVerdict::Reject => return None,
                    }
                }
            }
        }

        // every slot occupied by other flows
        None
    }

    fn enforce_limit<G: random::Generator>(&mut self, rng: &mut G) -> Vec<Packet> {
        let mut evicted = Vec::new();

        while self.len > self.max_size {
            if self.classes.iter().all(|class| class.is_empty()) {
                break;
            }

            let victim = rng.gen_index(self.classes.len());
            if let Some(packet) = self.classes[victim].force_drop() {
                self.len -= 1;
                evicted.push(packet);
            }
        }

        evicted
    }
}

#[derive(Debug)]
pub struct Builder {
    flow_num: u32,
    max_size: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            flow_num: DEFAULT_FLOWS,
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

    /// Overall queue budget in packets
    pub fn with_max_size(mut self, packets: usize) -> Self {
        self.max_size = packets;
        self
    }

    pub fn build(self, device_rate: DataRate) -> BwmQueueDisc {
        let Self { flow_num, max_size } = self;

        // the default class takes unclassified traffic at half device rate
        let mut default_class =
            BwmQueueDiscClass::new(FlowId(u32::MAX), TraceId(u32::MAX), max_size);
        default_class.set_rate(DataRate::from_bps(device_rate.bits_per_sec() >> 1));

        BwmQueueDisc {
            classes: vec![default_class],
            slots: BTreeMap::new(),
            flow_num,
            max_size,
            next_flow: 0,
            len: 0,
        }
    }
}
