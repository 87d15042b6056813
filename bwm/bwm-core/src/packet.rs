// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The packet-with-tags model consumed by the queue disciplines and the CAWC
//! feedback channel.
//!
//! Data traffic is modeled by size alone; only control datagrams (the CAWC
//! feedback) carry real payload bytes.

use crate::{
    inet::{ExplicitCongestionNotification, IPV4_HEADER_LEN},
    tags::{FlowIdTag, FlowWeightTag, TagSet, TenantIdTag},
};
use bytes::Bytes;
use std::net::Ipv4Addr;

#[derive(Clone, Debug)]
pub struct Packet {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    tos: u8,
    ecn: ExplicitCongestionNotification,
    len: usize,
    payload: Bytes,
    pub tags: TagSet,
}

impl Packet {
    /// A modeled data packet carrying `payload_len` bytes above the IP header
    pub fn data(src: Ipv4Addr, dst: Ipv4Addr, payload_len: usize) -> Self {
        Self {
            src,
            dst,
            protocol: 6,
            tos: 0,
            ecn: Default::default(),
            len: IPV4_HEADER_LEN + payload_len,
            payload: Bytes::new(),
            tags: Default::default(),
        }
    }

    /// A control datagram with in-band payload bytes
    pub fn control(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, tos: u8, payload: Bytes) -> Self {
        Self {
            src,
            dst,
            protocol,
            tos,
            ecn: Default::default(),
            len: IPV4_HEADER_LEN + payload.len(),
            payload,
            tags: Default::default(),
        }
    }

    pub fn with_tenant(mut self, tag: TenantIdTag) -> Self {
        self.tags.tenant_id = Some(tag);
        self
    }

    pub fn with_flow(mut self, tag: FlowIdTag) -> Self {
        self.tags.flow_id = Some(tag);
        self
    }

    pub fn with_weight(mut self, tag: FlowWeightTag) -> Self {
        self.tags.flow_weight = Some(tag);
        self
    }

    #[inline]
    pub fn src(&self) -> Ipv4Addr {
        self.src
    }

    #[inline]
    pub fn dst(&self) -> Ipv4Addr {
        self.dst
    }

    #[inline]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    #[inline]
    pub fn tos(&self) -> u8 {
        self.tos
    }

    #[inline]
    pub fn ecn(&self) -> ExplicitCongestionNotification {
        self.ecn
    }

    #[inline]
    pub fn set_ecn(&mut self, ecn: ExplicitCongestionNotification) {
        self.ecn = ecn;
    }

    /// Total on-wire size in bytes, IP header included
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the IP payload in bytes
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.len.saturating_sub(IPV4_HEADER_LEN)
    }

    /// In-band payload bytes (empty for modeled data traffic)
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}
