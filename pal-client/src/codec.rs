// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Just enough of the thrift binary protocol to speak to the PAL service.
//!
//! Messages are built into a `BytesMut` in one pass.  Incoming messages are
//! parsed out of a byte slice, which may hold only a prefix of the message
//! when the transport is unframed.  In that case the decoders return
//! `Ok(None)` and the caller is expected to read more data and try again.

use std::collections::BTreeMap;
use std::convert::TryFrom;

use bytes::Buf;
use bytes::BufMut;
use bytes::BytesMut;
use thiserror::Error;

use common::ports::DevPort;
use common::ports::DeviceId;
use common::ports::PortFec;
use common::ports::PortSpeed;

use crate::status::ApplicationErrorKind;
use crate::status::PalStatus;
use crate::Transport;

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;

/// Separator between the service name and the method name in a multiplexed
/// call.
pub const MULTIPLEX_SEPARATOR: char = ':';

/// Largest frame we will accept on a framed transport.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// Bound on nested containers when skipping over unknown fields.
const MAX_SKIP_DEPTH: usize = 64;

pub const PORT_ADD: &str = "pal_port_add";
pub const PORT_ENABLE: &str = "pal_port_enable";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ends before the message does.
    #[error("incomplete message")]
    Incomplete,
    #[error("invalid message: {0}")]
    Invalid(String),
}

pub type CodecResult<T> = Result<T, CodecError>;

fn invalid<T>(msg: impl Into<String>) -> CodecResult<T> {
    Err(CodecError::Invalid(msg.into()))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    Call,
    Reply,
    Exception,
    Oneway,
}

impl MessageType {
    fn code(&self) -> u8 {
        match self {
            MessageType::Call => 1,
            MessageType::Reply => 2,
            MessageType::Exception => 3,
            MessageType::Oneway => 4,
        }
    }

    fn from_code(code: u8) -> CodecResult<Self> {
        match code {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            x => invalid(format!("unknown message type {x}")),
        }
    }
}

// Wire identifiers for thrift field types.
mod ttype {
    pub const STOP: u8 = 0;
    pub const BOOL: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const I16: u8 = 6;
    pub const I32: u8 = 8;
    pub const I64: u8 = 10;
    pub const STRING: u8 = 11;
    pub const STRUCT: u8 = 12;
    pub const MAP: u8 = 13;
    pub const SET: u8 = 14;
    pub const LIST: u8 = 15;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    pub name: String,
    pub kind: MessageType,
    pub seq: i32,
}

impl MessageHeader {
    /// Split a multiplexed name into its service and method.
    pub fn service_and_method(&self) -> Option<(&str, &str)> {
        self.name.split_once(MULTIPLEX_SEPARATOR)
    }
}

/// A call to one of the PAL methods we know how to issue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PalCall {
    PortAdd {
        device: DeviceId,
        port: DevPort,
        speed: PortSpeed,
        fec: PortFec,
    },
    PortEnable {
        device: DeviceId,
        port: DevPort,
    },
}

impl PalCall {
    pub fn method(&self) -> &'static str {
        match self {
            PalCall::PortAdd { .. } => PORT_ADD,
            PalCall::PortEnable { .. } => PORT_ENABLE,
        }
    }

    /// Rebuild a call from the i32-valued fields of an argument struct.
    pub fn from_args(method: &str, args: &CallArgs) -> Result<Self, CallError> {
        if method != PORT_ADD && method != PORT_ENABLE {
            return Err(CallError::UnknownMethod(method.to_string()));
        }
        let device = args.get(method, 1)?;
        let port = DevPort::try_from(args.get(method, 2)?).map_err(|_| {
            CallError::InvalidValue(format!("{method}: dev_port out of range"))
        })?;

        match method {
            PORT_ADD => {
                let speed = args.get(method, 3)?;
                let speed = speed_from_pal(speed).ok_or_else(|| {
                    let msg = format!("unsupported speed {speed}");
                    CallError::InvalidValue(msg)
                })?;
                let fec = args.get(method, 4)?;
                let fec = fec_from_pal(fec).ok_or_else(|| {
                    CallError::InvalidValue(format!("unsupported fec {fec}"))
                })?;
                Ok(PalCall::PortAdd {
                    device,
                    port,
                    speed,
                    fec,
                })
            }
            _ => Ok(PalCall::PortEnable { device, port }),
        }
    }
}

/// Reasons a received call can't be turned into a `PalCall`.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CallError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("{0}: missing argument {1}")]
    MissingField(String, i16),
    #[error("{0}")]
    InvalidValue(String),
}

/// The integer-valued arguments of a received call, indexed by field id.
/// All of the PAL port calls take nothing but i32s.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CallArgs(BTreeMap<i16, i32>);

impl CallArgs {
    fn get(&self, method: &str, id: i16) -> Result<i32, CallError> {
        self.0
            .get(&id)
            .copied()
            .ok_or_else(|| CallError::MissingField(method.to_string(), id))
    }
}

/// The outcome of a PAL call, as carried in a reply message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PalReply {
    /// The call completed.  Methods declared to return a `pal_status_t`
    /// carry it here, while void methods carry nothing.
    Success(Option<PalStatus>),
    /// The service raised the declared `InvalidPalOperation` exception.
    InvalidOperation(PalStatus),
    /// The service's thrift layer failed the call.
    Application {
        kind: ApplicationErrorKind,
        message: String,
    },
}

pub fn speed_to_pal(speed: PortSpeed) -> i32 {
    match speed {
        PortSpeed::Speed1G => 1,
        PortSpeed::Speed10G => 2,
        PortSpeed::Speed25G => 3,
        PortSpeed::Speed40G => 4,
        PortSpeed::Speed50G => 6,
        PortSpeed::Speed100G => 7,
        PortSpeed::Speed200G => 8,
        PortSpeed::Speed400G => 9,
    }
}

pub fn speed_from_pal(speed: i32) -> Option<PortSpeed> {
    PortSpeed::ALL
        .iter()
        .find(|s| speed_to_pal(**s) == speed)
        .copied()
}

pub fn fec_to_pal(fec: PortFec) -> i32 {
    match fec {
        PortFec::None => 0,
        PortFec::Firecode => 1,
        PortFec::RS => 2,
    }
}

pub fn fec_from_pal(fec: i32) -> Option<PortFec> {
    match fec {
        0 => Some(PortFec::None),
        1 => Some(PortFec::Firecode),
        2 => Some(PortFec::RS),
        _ => None,
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

fn put_message_begin(
    buf: &mut BytesMut,
    name: &str,
    kind: MessageType,
    seq: i32,
) {
    buf.put_u32(VERSION_1 | kind.code() as u32);
    put_string(buf, name);
    buf.put_i32(seq);
}

fn put_field_begin(buf: &mut BytesMut, field_type: u8, id: i16) {
    buf.put_u8(field_type);
    buf.put_i16(id);
}

fn put_i32_field(buf: &mut BytesMut, id: i16, val: i32) {
    put_field_begin(buf, ttype::I32, id);
    buf.put_i32(val);
}

fn put_field_stop(buf: &mut BytesMut) {
    buf.put_u8(ttype::STOP);
}

/// Build a multiplexed call message for `service`.
pub fn encode_call(service: &str, seq: i32, call: &PalCall) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    let name = format!("{service}{MULTIPLEX_SEPARATOR}{}", call.method());
    put_message_begin(&mut buf, &name, MessageType::Call, seq);

    match call {
        PalCall::PortAdd {
            device,
            port,
            speed,
            fec,
        } => {
            put_i32_field(&mut buf, 1, *device);
            put_i32_field(&mut buf, 2, i32::from(*port));
            put_i32_field(&mut buf, 3, speed_to_pal(*speed));
            put_i32_field(&mut buf, 4, fec_to_pal(*fec));
        }
        PalCall::PortEnable { device, port } => {
            put_i32_field(&mut buf, 1, *device);
            put_i32_field(&mut buf, 2, i32::from(*port));
        }
    }
    put_field_stop(&mut buf);
    buf
}

/// Build the reply to a call of `method`.
pub fn encode_reply(method: &str, seq: i32, reply: &PalReply) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);

    match reply {
        PalReply::Application { kind, message } => {
            put_message_begin(&mut buf, method, MessageType::Exception, seq);
            put_field_begin(&mut buf, ttype::STRING, 1);
            put_string(&mut buf, message);
            put_i32_field(&mut buf, 2, kind.code());
            put_field_stop(&mut buf);
        }
        PalReply::Success(status) => {
            put_message_begin(&mut buf, method, MessageType::Reply, seq);
            if let Some(status) = status {
                put_i32_field(&mut buf, 0, status.0);
            }
            put_field_stop(&mut buf);
        }
        PalReply::InvalidOperation(status) => {
            put_message_begin(&mut buf, method, MessageType::Reply, seq);
            put_field_begin(&mut buf, ttype::STRUCT, 1);
            put_i32_field(&mut buf, 1, status.0);
            put_field_stop(&mut buf);
            put_field_stop(&mut buf);
        }
    }
    buf
}

/// Prefix a message with its length, for the framed transport.
pub fn frame(msg: BytesMut) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + msg.len());
    buf.put_u32(msg.len() as u32);
    buf.extend_from_slice(&msg);
    buf
}

// A cursor over a possibly incomplete message.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.data.len() - self.pos < len {
            return Err(CodecError::Incomplete);
        }
        let s = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    fn get_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn get_i16(&mut self) -> CodecResult<i16> {
        Ok(self.take(2)?.get_i16())
    }

    fn get_i32(&mut self) -> CodecResult<i32> {
        Ok(self.take(4)?.get_i32())
    }

    fn get_len(&mut self) -> CodecResult<usize> {
        let len = self.get_i32()?;
        match usize::try_from(len) {
            Ok(len) if len <= MAX_FRAME_SIZE => Ok(len),
            _ => invalid(format!("bad length {len}")),
        }
    }

    fn get_string(&mut self) -> CodecResult<String> {
        let len = self.get_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .or_else(|_| invalid("string is not utf-8"))
    }

    // Returns the type and id of the next field, or None at the end of the
    // struct.
    fn get_field_begin(&mut self) -> CodecResult<Option<(u8, i16)>> {
        match self.get_u8()? {
            ttype::STOP => Ok(None),
            t => Ok(Some((t, self.get_i16()?))),
        }
    }

    fn skip(&mut self, field_type: u8, depth: usize) -> CodecResult<()> {
        if depth > MAX_SKIP_DEPTH {
            return invalid("containers nested too deeply");
        }
        match field_type {
            ttype::BOOL | ttype::BYTE => self.take(1).map(|_| ()),
            ttype::I16 => self.take(2).map(|_| ()),
            ttype::I32 => self.take(4).map(|_| ()),
            ttype::I64 | ttype::DOUBLE => self.take(8).map(|_| ()),
            ttype::STRING => {
                let len = self.get_len()?;
                self.take(len).map(|_| ())
            }
            ttype::STRUCT => {
                while let Some((t, _)) = self.get_field_begin()? {
                    self.skip(t, depth + 1)?;
                }
                Ok(())
            }
            ttype::MAP => {
                let key_type = self.get_u8()?;
                let val_type = self.get_u8()?;
                for _ in 0..self.get_len()? {
                    self.skip(key_type, depth + 1)?;
                    self.skip(val_type, depth + 1)?;
                }
                Ok(())
            }
            ttype::SET | ttype::LIST => {
                let elem_type = self.get_u8()?;
                for _ in 0..self.get_len()? {
                    self.skip(elem_type, depth + 1)?;
                }
                Ok(())
            }
            x => invalid(format!("unknown field type {x}")),
        }
    }

    fn get_message_begin(&mut self) -> CodecResult<MessageHeader> {
        let word = self.get_i32()? as u32;
        if word & 0x8000_0000 != 0 {
            if word & VERSION_MASK != VERSION_1 {
                return invalid(format!("bad protocol version {word:#x}"));
            }
            let kind = MessageType::from_code((word & 0xff) as u8)?;
            let name = self.get_string()?;
            let seq = self.get_i32()?;
            Ok(MessageHeader { name, kind, seq })
        } else {
            // Pre-versioned encoding: the first word is the name's length.
            let len = word as usize;
            if len > MAX_FRAME_SIZE {
                return invalid(format!("bad name length {len}"));
            }
            let name = String::from_utf8(self.take(len)?.to_vec())
                .or_else(|_| invalid("name is not utf-8"))?;
            let kind = MessageType::from_code(self.get_u8()?)?;
            let seq = self.get_i32()?;
            Ok(MessageHeader { name, kind, seq })
        }
    }

    // InvalidPalOperation { 1: i32 code }
    fn get_invalid_operation(&mut self) -> CodecResult<PalStatus> {
        let mut code = None;
        while let Some((t, id)) = self.get_field_begin()? {
            match (t, id) {
                (ttype::I32, 1) => code = Some(self.get_i32()?),
                (t, _) => self.skip(t, 1)?,
            }
        }
        Ok(PalStatus(code.unwrap_or(0)))
    }

    // TApplicationException { 1: string message, 2: i32 type }
    fn get_application_exception(&mut self) -> CodecResult<PalReply> {
        let mut message = String::new();
        let mut kind = ApplicationErrorKind::Unknown;
        while let Some((t, id)) = self.get_field_begin()? {
            match (t, id) {
                (ttype::STRING, 1) => message = self.get_string()?,
                (ttype::I32, 2) => kind = self.get_i32()?.into(),
                (t, _) => self.skip(t, 0)?,
            }
        }
        Ok(PalReply::Application { kind, message })
    }

    fn get_result(&mut self) -> CodecResult<PalReply> {
        let mut reply = PalReply::Success(None);
        while let Some((t, id)) = self.get_field_begin()? {
            match (t, id) {
                (ttype::I32, 0) => {
                    reply = PalReply::Success(Some(PalStatus(self.get_i32()?)))
                }
                (ttype::STRUCT, 1) => {
                    let status = self.get_invalid_operation()?;
                    reply = PalReply::InvalidOperation(status)
                }
                (t, _) => self.skip(t, 0)?,
            }
        }
        Ok(reply)
    }

    fn get_call_args(&mut self) -> CodecResult<CallArgs> {
        let mut args = BTreeMap::new();
        while let Some((t, id)) = self.get_field_begin()? {
            match t {
                ttype::I32 => {
                    args.insert(id, self.get_i32()?);
                }
                t => self.skip(t, 0)?,
            }
        }
        Ok(CallArgs(args))
    }
}

// Hide `Incomplete` from callers, who only need to know whether to wait for
// more data.
fn complete<T>(r: CodecResult<T>) -> CodecResult<Option<T>> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(CodecError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

fn reply_message(r: &mut Reader) -> CodecResult<(MessageHeader, PalReply)> {
    let hdr = r.get_message_begin()?;
    let reply = match hdr.kind {
        MessageType::Reply => r.get_result()?,
        MessageType::Exception => r.get_application_exception()?,
        kind => return invalid(format!("expected a reply, got {kind:?}")),
    };
    Ok((hdr, reply))
}

fn call_message(r: &mut Reader) -> CodecResult<(MessageHeader, CallArgs)> {
    let hdr = r.get_message_begin()?;
    match hdr.kind {
        MessageType::Call | MessageType::Oneway => {}
        kind => return invalid(format!("expected a call, got {kind:?}")),
    }
    let args = r.get_call_args()?;
    Ok((hdr, args))
}

/// Parse a reply (or exception) message from the front of `data`.  On
/// success, returns the header, the outcome, and the number of bytes
/// consumed.
pub fn decode_reply(
    data: &[u8],
) -> CodecResult<Option<(MessageHeader, PalReply, usize)>> {
    let mut r = Reader::new(data);
    let msg = complete(reply_message(&mut r))?;
    Ok(msg.map(|(hdr, reply)| (hdr, reply, r.pos)))
}

/// Parse a call message from the front of `data`.  On success, returns the
/// header, the call's integer arguments, and the number of bytes consumed.
pub fn decode_call(
    data: &[u8],
) -> CodecResult<Option<(MessageHeader, CallArgs, usize)>> {
    let mut r = Reader::new(data);
    let msg = complete(call_message(&mut r))?;
    Ok(msg.map(|(hdr, args)| (hdr, args, r.pos)))
}

/// Pull one complete message out of `buf`, using `decode` to parse its body.
/// Consumed bytes are removed from the buffer.  Returns `Ok(None)` if `buf`
/// doesn't yet hold a whole message.
pub fn take_message<T, F>(
    transport: Transport,
    buf: &mut BytesMut,
    decode: F,
) -> CodecResult<Option<T>>
where
    F: Fn(&[u8]) -> CodecResult<Option<(T, usize)>>,
{
    match transport {
        Transport::Buffered => match decode(&buf[..])? {
            Some((msg, used)) => {
                buf.advance(used);
                Ok(Some(msg))
            }
            None => Ok(None),
        },
        Transport::Framed => {
            if buf.len() < 4 {
                return Ok(None);
            }
            let len = (&buf[..4]).get_u32() as usize;
            if len > MAX_FRAME_SIZE {
                return invalid(format!("frame of {len} bytes is too large"));
            }
            if buf.len() < 4 + len {
                return Ok(None);
            }
            match decode(&buf[4..4 + len])? {
                Some((msg, _)) => {
                    buf.advance(4 + len);
                    Ok(Some(msg))
                }
                None => invalid("message truncated by its frame"),
            }
        }
    }
}
