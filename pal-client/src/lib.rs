// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Client library for the PAL (Platform Abstraction Layer) service exported
//! by the Tofino SDE over thrift.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use common::ports::DevPort;
use common::ports::DeviceId;
use common::ports::PortFec;
use common::ports::PortSpeed;

pub mod codec;
pub mod server;
pub mod status;
pub mod stub;

mod client;
pub use client::Client;

pub use codec::PalCall;
pub use status::ApplicationErrorKind;
pub use status::PalStatus;

/// A specialized Result type for PAL operations
pub type PalResult<T> = Result<T, PalError>;

/// Error type conveying additional information about PAL errors
#[derive(Error, Debug)]
pub enum PalError {
    /// The local socket operation failed.
    #[error("IO error: {ctx}: {err}")]
    Io { ctx: String, err: std::io::Error },
    /// The service closed the connection before replying.
    #[error("connection closed by the PAL service")]
    Closed,
    /// The bytes on the wire didn't make sense.
    #[error("protocol error: {}", .0)]
    Protocol(String),
    /// The service raised `InvalidPalOperation`.
    #[error("PAL operation failed: {}", .0)]
    InvalidOperation(PalStatus),
    /// The call completed, but returned a non-zero status.
    #[error("PAL returned {}", .0)]
    Status(PalStatus),
    /// The service's thrift layer rejected the call.
    #[error("thrift application error ({kind}): {message}")]
    Application {
        kind: ApplicationErrorKind,
        message: String,
    },
}

impl PalError {
    pub fn io(ctx: impl ToString, err: std::io::Error) -> Self {
        PalError::Io {
            ctx: ctx.to_string(),
            err,
        }
    }

    /// The SDE status behind this error, if the service produced one.
    pub fn status(&self) -> Option<PalStatus> {
        match self {
            PalError::InvalidOperation(s) | PalError::Status(s) => Some(*s),
            _ => None,
        }
    }
}

impl From<codec::CodecError> for PalError {
    fn from(e: codec::CodecError) -> Self {
        PalError::Protocol(e.to_string())
    }
}

/// The two steps needed to bring up a port.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PortStep {
    Add,
    Enable,
}

impl fmt::Display for PortStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PortStep::Add => write!(f, "add"),
            PortStep::Enable => write!(f, "enable"),
        }
    }
}

impl PalCall {
    pub fn step(&self) -> PortStep {
        match self {
            PalCall::PortAdd { .. } => PortStep::Add,
            PalCall::PortEnable { .. } => PortStep::Enable,
        }
    }
}

/// The subset of the PAL service used to bring ports up.
#[async_trait]
pub trait PalOps: Send {
    /// Create a port with the given speed and FEC.
    async fn port_add(
        &mut self,
        device: DeviceId,
        port: DevPort,
        speed: PortSpeed,
        fec: PortFec,
    ) -> PalResult<()>;

    /// Administratively enable a port that has already been added.
    async fn port_enable(
        &mut self,
        device: DeviceId,
        port: DevPort,
    ) -> PalResult<()>;
}

/// Issue `call` against any PAL implementation.
pub async fn dispatch<P: PalOps + ?Sized>(
    pal: &mut P,
    call: &PalCall,
) -> PalResult<()> {
    match *call {
        PalCall::PortAdd {
            device,
            port,
            speed,
            fec,
        } => pal.port_add(device, port, speed, fec).await,
        PalCall::PortEnable { device, port } => {
            pal.port_enable(device, port).await
        }
    }
}

/// How thrift messages are delimited on the TCP stream.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Messages are written back to back, as `TBufferedTransport` does.
    #[default]
    Buffered,
    /// Each message is preceded by its length, as `TFramedTransport` does.
    Framed,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buffered" => Ok(Transport::Buffered),
            "framed" => Ok(Transport::Framed),
            _ => Err(format!("invalid transport: {s}")),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Transport::Buffered => write!(f, "buffered"),
            Transport::Framed => write!(f, "framed"),
        }
    }
}

/// Where to find the PAL service, and how to talk to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PalConfig {
    pub host: String,
    pub port: u16,
    /// Name of the service in the SDE's multiplexed processor.
    pub service: String,
    pub transport: Transport,
}

impl PalConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for PalConfig {
    fn default() -> Self {
        PalConfig {
            host: "localhost".to_string(),
            port: default_port(),
            service: common::DEFAULT_PAL_SERVICE.to_string(),
            transport: Transport::default(),
        }
    }
}

/// Return the default port on which the SDE's thrift server listens.
pub const fn default_port() -> u16 {
    common::DEFAULT_PAL_PORT
}
