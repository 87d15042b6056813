// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Small integer identities used for all cross-component navigation.
//!
//! Ownership in the manager is strictly tree shaped (coordinator -> tenant ->
//! flow); every other component refers to these records by id.

use core::fmt;

/// Identity of a tenant (customer) in the bandwidth manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TenantId(pub u32);

/// Identity of a unit flow, assigned by hashing the
/// `(tenant, source, destination)` triple.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowId(pub u32);

/// Opaque id carried in packet tags and used in telemetry output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraceId(pub u32);

/// Identity of a host, assigned by the coordinator at registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(pub u32);

/// Index of a queue disc class inside one host's Bwm queue disc.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassIndex(pub usize);

macro_rules! impl_display {
    ($($ty:ident),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    self.0.fmt(f)
                }
            }
        )*
    };
}

impl_display!(TenantId, FlowId, TraceId, HostId, ClassIndex);
