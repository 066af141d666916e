// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! An in-memory stand-in for the PAL service, for testing without an SDE.

use std::collections::BTreeMap;

use async_trait::async_trait;
use slog::debug;
use slog::Logger;

use common::ports::DevPort;
use common::ports::DeviceId;
use common::ports::PortFec;
use common::ports::PortSpeed;
use common::ports::DEV_PORT_LIMIT;

use crate::PalCall;
use crate::PalError;
use crate::PalOps;
use crate::PalResult;
use crate::PalStatus;
use crate::PortStep;

// The stub only models a single Tofino.
const STUB_DEVICE: DeviceId = 0;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StubPort {
    pub speed: PortSpeed,
    pub fec: PortFec,
    pub enabled: bool,
}

/// Tracks the ports that have been added and enabled, and the calls that were
/// made to get there.
pub struct StubPal {
    log: Logger,
    ports: BTreeMap<(DeviceId, DevPort), StubPort>,
    faults: BTreeMap<(PortStep, DeviceId, DevPort), PalStatus>,
    calls: Vec<PalCall>,
}

impl StubPal {
    pub fn new(log: &Logger) -> Self {
        StubPal {
            log: log.new(slog::o!("pal" => "stub")),
            ports: BTreeMap::new(),
            faults: BTreeMap::new(),
            calls: Vec::new(),
        }
    }

    /// Arrange for every `step` on the given port to fail with `status`.
    pub fn inject_fault(
        &mut self,
        step: PortStep,
        device: DeviceId,
        port: DevPort,
        status: PalStatus,
    ) {
        self.faults.insert((step, device, port), status);
    }

    /// The state of a port, if it has been added.
    pub fn port(&self, device: DeviceId, port: DevPort) -> Option<StubPort> {
        self.ports.get(&(device, port)).copied()
    }

    pub fn ports(&self) -> &BTreeMap<(DeviceId, DevPort), StubPort> {
        &self.ports
    }

    /// Every call received so far, in order, including those that failed.
    pub fn calls(&self) -> &[PalCall] {
        &self.calls
    }

    fn check(
        &mut self,
        call: PalCall,
        device: DeviceId,
        port: DevPort,
    ) -> PalResult<()> {
        self.calls.push(call);

        if let Some(status) = self.faults.get(&(call.step(), device, port)) {
            debug!(self.log, "injecting fault";
                "step" => %call.step(),
                "device" => device,
                "port" => port,
                "status" => %status,
            );
            return Err(PalError::InvalidOperation(*status));
        }
        if device != STUB_DEVICE || port >= DEV_PORT_LIMIT {
            return Err(PalError::InvalidOperation(PalStatus::INVALID_ARG));
        }
        Ok(())
    }
}

#[async_trait]
impl PalOps for StubPal {
    async fn port_add(
        &mut self,
        device: DeviceId,
        port: DevPort,
        speed: PortSpeed,
        fec: PortFec,
    ) -> PalResult<()> {
        let call = PalCall::PortAdd {
            device,
            port,
            speed,
            fec,
        };
        self.check(call, device, port)?;
        if !fec.valid_for(speed) {
            return Err(PalError::InvalidOperation(PalStatus::INVALID_ARG));
        }
        if self.ports.contains_key(&(device, port)) {
            return Err(PalError::InvalidOperation(PalStatus::ALREADY_EXISTS));
        }

        debug!(self.log, "added port";
            "device" => device,
            "port" => port,
            "speed" => %speed,
            "fec" => %fec,
        );
        self.ports.insert(
            (device, port),
            StubPort {
                speed,
                fec,
                enabled: false,
            },
        );
        Ok(())
    }

    async fn port_enable(
        &mut self,
        device: DeviceId,
        port: DevPort,
    ) -> PalResult<()> {
        self.check(PalCall::PortEnable { device, port }, device, port)?;
        match self.ports.get_mut(&(device, port)) {
            Some(p) => {
                debug!(self.log, "enabled port";
                    "device" => device,
                    "port" => port,
                );
                p.enabled = true;
                Ok(())
            }
            None => {
                Err(PalError::InvalidOperation(PalStatus::OBJECT_NOT_FOUND))
            }
        }
    }
}
