// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Types and helpers shared by the PAL client and the port provisioning
//! tool.

pub mod logging;
pub mod ports;

/// TCP port on which the SDE's thrift server listens.
pub const DEFAULT_PAL_PORT: u16 = 9090;

/// Name under which the PAL service is registered with the SDE's
/// multiplexed thrift processor.
pub const DEFAULT_PAL_SERVICE: &str = "pal";
