// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fmt;

/// A `bf_status_t` returned by the SDE, either as the result of a PAL call or
/// as the code carried by an `InvalidPalOperation` exception.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PalStatus(pub i32);

impl PalStatus {
    pub const SUCCESS: PalStatus = PalStatus(0);
    pub const NOT_READY: PalStatus = PalStatus(1);
    pub const NO_SYS_RESOURCES: PalStatus = PalStatus(2);
    pub const INVALID_ARG: PalStatus = PalStatus(3);
    pub const ALREADY_EXISTS: PalStatus = PalStatus(4);
    pub const HW_COMM_FAIL: PalStatus = PalStatus(5);
    pub const OBJECT_NOT_FOUND: PalStatus = PalStatus(6);

    pub fn is_success(&self) -> bool {
        *self == PalStatus::SUCCESS
    }

    fn name(&self) -> Option<&'static str> {
        match self.0 {
            0 => Some("BF_SUCCESS"),
            1 => Some("BF_NOT_READY"),
            2 => Some("BF_NO_SYS_RESOURCES"),
            3 => Some("BF_INVALID_ARG"),
            4 => Some("BF_ALREADY_EXISTS"),
            5 => Some("BF_HW_COMM_FAIL"),
            6 => Some("BF_OBJECT_NOT_FOUND"),
            _ => None,
        }
    }
}

impl fmt::Display for PalStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "status {}", self.0),
        }
    }
}

/// The `type` field of a thrift `TApplicationException`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApplicationErrorKind {
    Unknown,
    UnknownMethod,
    InvalidMessageType,
    WrongMethodName,
    BadSequenceId,
    MissingResult,
    InternalError,
    ProtocolError,
}

impl ApplicationErrorKind {
    pub fn code(&self) -> i32 {
        match self {
            ApplicationErrorKind::Unknown => 0,
            ApplicationErrorKind::UnknownMethod => 1,
            ApplicationErrorKind::InvalidMessageType => 2,
            ApplicationErrorKind::WrongMethodName => 3,
            ApplicationErrorKind::BadSequenceId => 4,
            ApplicationErrorKind::MissingResult => 5,
            ApplicationErrorKind::InternalError => 6,
            ApplicationErrorKind::ProtocolError => 7,
        }
    }
}

impl From<i32> for ApplicationErrorKind {
    fn from(code: i32) -> Self {
        match code {
            1 => ApplicationErrorKind::UnknownMethod,
            2 => ApplicationErrorKind::InvalidMessageType,
            3 => ApplicationErrorKind::WrongMethodName,
            4 => ApplicationErrorKind::BadSequenceId,
            5 => ApplicationErrorKind::MissingResult,
            6 => ApplicationErrorKind::InternalError,
            7 => ApplicationErrorKind::ProtocolError,
            _ => ApplicationErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ApplicationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ApplicationErrorKind::Unknown => "unknown",
            ApplicationErrorKind::UnknownMethod => "unknown method",
            ApplicationErrorKind::InvalidMessageType => "invalid message type",
            ApplicationErrorKind::WrongMethodName => "wrong method name",
            ApplicationErrorKind::BadSequenceId => "bad sequence id",
            ApplicationErrorKind::MissingResult => "missing result",
            ApplicationErrorKind::InternalError => "internal error",
            ApplicationErrorKind::ProtocolError => "protocol error",
        };
        write!(f, "{s}")
    }
}
