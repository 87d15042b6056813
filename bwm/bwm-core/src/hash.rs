// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::ids::{FlowId, TenantId};
use std::net::Ipv4Addr;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over a byte slice
#[inline]
pub fn hash32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Derives the approximately unique flow id for a `(tenant, src, dst)`
/// triple by hashing the decimal text of the three values.
pub fn assign_flow_id(tenant_id: TenantId, src: Ipv4Addr, dst: Ipv4Addr) -> FlowId {
    let text = format!(
        "{}{}{}",
        tenant_id.0,
        u32::from(src),
        u32::from(dst)
    );
    FlowId(hash32(text.as_bytes()))
}
