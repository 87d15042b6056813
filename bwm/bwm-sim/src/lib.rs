// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A discrete-event harness around the bandwidth-manager control loop.
//!
//! Hosts (local agent + queue disc + egress link), an optional shared
//! bottleneck with CE marking, and simple rate- or window-driven senders are
//! wired onto one timestamp-ordered event queue. The scenario file formats
//! of the original test bench are supported next to a programmatic builder.

pub mod config;
pub mod exec;
pub mod sim;
pub mod trace;

pub use sim::{SimBuilder, SimReport, Simulation};

pub type Result<T = (), E = anyhow::Error> = core::result::Result<T, E>;
