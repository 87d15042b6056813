// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Queue disciplines: the Bwm multi-class rate limiter and the WFQ
//! link-share scheduler, both over the same packet model.

pub mod bwm;
pub mod tbf;
pub mod wfq;
