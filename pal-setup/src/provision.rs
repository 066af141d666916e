// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Bring up a list of ports, one after another.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use slog::debug;
use slog::error;
use slog::info;
use slog::Logger;
use thiserror::Error;

use common::ports::DevPort;
use common::ports::DeviceId;
use common::ports::PortFec;
use common::ports::PortSpeed;
use common::ports::DEV_PORT_LIMIT;
use pal_client::Client;
use pal_client::PalConfig;
use pal_client::PalError;
use pal_client::PalOps;
use pal_client::PortStep;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The port list was rejected before anything was sent to the switch.
    #[error("invalid port configuration: {0}")]
    Invalid(String),
    /// The PAL service couldn't be reached.  Nothing was changed.
    #[error("failed to connect to the PAL service at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: PalError,
    },
    /// A call for one of the ports failed.  Every port before it has been
    /// added and enabled, and none of the ports after it were touched.
    #[error("port #{index} ({spec}): {step} failed: {source}")]
    Port {
        index: usize,
        spec: PortSpec,
        step: PortStep,
        #[source]
        source: PalError,
    },
}

fn default_fec() -> PortFec {
    PortFec::None
}

/// One port to be added and enabled.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortSpec {
    #[serde(default)]
    pub device: DeviceId,
    pub port: DevPort,
    pub speed: PortSpeed,
    #[serde(default = "default_fec")]
    pub fec: PortFec,
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}:{}:{}", self.device, self.port, self.speed, self.fec)
    }
}

// Parses the `DEVICE/PORT:SPEED[:FEC]` form used on the command line.  The
// device may be left off, in which case it is 0.
impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        let (port, speed, fec) = match fields.as_slice() {
            [port, speed] => (*port, *speed, None),
            [port, speed, fec] => (*port, *speed, Some(*fec)),
            _ => {
                return Err(format!(
                    "'{s}' is invalid; expected DEVICE/PORT:SPEED[:FEC]"
                ))
            }
        };

        let (device, port) = match port.split_once('/') {
            Some((device, port)) => (
                device
                    .parse::<DeviceId>()
                    .map_err(|_| format!("invalid device: {device}"))?,
                port,
            ),
            None => (0, port),
        };
        let port = port
            .parse::<DevPort>()
            .map_err(|_| format!("invalid port: {port}"))?;
        let speed = speed.parse::<PortSpeed>().map_err(|e| e.to_string())?;
        let fec = match fec {
            Some(fec) => fec.parse::<PortFec>().map_err(|e| e.to_string())?,
            None => default_fec(),
        };

        Ok(PortSpec {
            device,
            port,
            speed,
            fec,
        })
    }
}

/// Check a port list for problems that would certainly make the run fail, so
/// they are caught before the switch has been changed.
pub fn validate(specs: &[PortSpec]) -> ProvisionResult<()> {
    if specs.is_empty() {
        return Err(ProvisionError::Invalid("no ports to configure".into()));
    }

    let mut seen = BTreeSet::new();
    for (index, spec) in specs.iter().enumerate() {
        let bad = |msg: String| {
            let msg = format!("port #{index} ({spec}): {msg}");
            Err(ProvisionError::Invalid(msg))
        };
        if spec.device < 0 {
            return bad(format!("invalid device {}", spec.device));
        }
        if spec.port >= DEV_PORT_LIMIT {
            return bad(format!(
                "port must be less than {DEV_PORT_LIMIT}, not {}",
                spec.port
            ));
        }
        if !spec.fec.valid_for(spec.speed) {
            return bad(format!(
                "{} FEC is not supported at {}",
                spec.fec, spec.speed
            ));
        }
        if !seen.insert((spec.device, spec.port)) {
            return bad("port is listed more than once".to_string());
        }
    }
    Ok(())
}

/// Add and then enable each port, in order, stopping at the first failure.
///
/// Ports that were brought up before a failure are left in place.
pub async fn provision_ports<P>(
    log: &Logger,
    pal: &mut P,
    specs: &[PortSpec],
) -> ProvisionResult<()>
where
    P: PalOps + ?Sized,
{
    for (index, spec) in specs.iter().enumerate() {
        let fail = |step: PortStep, source: PalError| {
            error!(log, "failed to configure port";
                "index" => index,
                "device" => spec.device,
                "port" => spec.port,
                "step" => %step,
                "error" => %source,
            );
            ProvisionError::Port {
                index,
                spec: *spec,
                step,
                source,
            }
        };

        debug!(log, "configuring port";
            "index" => index,
            "device" => spec.device,
            "port" => spec.port,
            "speed" => %spec.speed,
            "fec" => %spec.fec,
        );
        pal.port_add(spec.device, spec.port, spec.speed, spec.fec)
            .await
            .map_err(|e| fail(PortStep::Add, e))?;
        pal.port_enable(spec.device, spec.port)
            .await
            .map_err(|e| fail(PortStep::Enable, e))?;
        info!(log, "port up"; "device" => spec.device, "port" => spec.port);
    }
    Ok(())
}

/// Validate `specs`, then connect to the PAL service and bring up every
/// port.  The connection is closed before returning, whatever the outcome.
pub async fn provision(
    log: &Logger,
    pal_config: &PalConfig,
    specs: &[PortSpec],
) -> ProvisionResult<()> {
    validate(specs)?;

    let mut client =
        Client::connect(log, pal_config).await.map_err(|source| {
            ProvisionError::Connect {
                addr: pal_config.address(),
                source,
            }
        })?;
    let result = provision_ports(log, &mut client, specs).await;
    client.close().await;
    result
}
