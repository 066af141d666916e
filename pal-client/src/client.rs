// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use async_trait::async_trait;
use bytes::BytesMut;
use slog::debug;
use slog::trace;
use slog::Logger;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use common::ports::DevPort;
use common::ports::DeviceId;
use common::ports::PortFec;
use common::ports::PortSpeed;

use crate::codec;
use crate::codec::MessageHeader;
use crate::codec::PalCall;
use crate::codec::PalReply;
use crate::PalConfig;
use crate::PalError;
use crate::PalOps;
use crate::PalResult;
use crate::Transport;

/// A connection to the PAL service.
///
/// Calls are issued one at a time, and each waits for its reply before
/// returning.  The socket is closed by `close()`, or when the client is
/// dropped.
pub struct Client {
    log: Logger,
    service: String,
    transport: Transport,
    stream: TcpStream,
    rbuf: BytesMut,
    seq: i32,
}

impl Client {
    /// Open a connection to the service described by `config`.
    pub async fn connect(log: &Logger, config: &PalConfig) -> PalResult<Self> {
        let addr = config.address();
        let log = log.new(slog::o!("pal" => addr.clone()));

        debug!(log, "connecting"; "transport" => %config.transport);
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|e| PalError::io(format!("connecting to {addr}"), e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| PalError::io("setting TCP_NODELAY", e))?;

        Ok(Client {
            log,
            service: config.service.clone(),
            transport: config.transport,
            stream,
            rbuf: BytesMut::with_capacity(4096),
            seq: 0,
        })
    }

    /// Shut down the connection.
    pub async fn close(mut self) {
        debug!(self.log, "closing connection");
        if let Err(e) = self.stream.shutdown().await {
            debug!(self.log, "shutdown failed: {e:?}");
        }
    }

    async fn read_reply(&mut self) -> PalResult<(MessageHeader, PalReply)> {
        loop {
            let decoded = codec::take_message(
                self.transport,
                &mut self.rbuf,
                |data| {
                    codec::decode_reply(data).map(|msg| {
                        msg.map(|(hdr, reply, used)| ((hdr, reply), used))
                    })
                },
            )?;
            if let Some(msg) = decoded {
                return Ok(msg);
            }

            let n = self
                .stream
                .read_buf(&mut self.rbuf)
                .await
                .map_err(|e| PalError::io("reading reply", e))?;
            if n == 0 {
                return Err(PalError::Closed);
            }
        }
    }

    /// Send `call` and wait for the service's answer.
    pub async fn call(&mut self, call: &PalCall) -> PalResult<()> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let method = call.method();

        let msg = codec::encode_call(&self.service, seq, call);
        let msg = match self.transport {
            Transport::Buffered => msg,
            Transport::Framed => codec::frame(msg),
        };
        trace!(self.log, "sending call"; "method" => method, "seq" => seq);
        self.stream
            .write_all(&msg)
            .await
            .map_err(|e| PalError::io(format!("sending {method}"), e))?;

        let (hdr, reply) = self.read_reply().await?;
        trace!(self.log, "received reply";
            "name" => &hdr.name,
            "seq" => hdr.seq,
            "reply" => ?reply,
        );

        // Multiplexed servers reply with the bare method name, but accept the
        // qualified one as well.
        let name_ok = hdr.name == method
            || hdr.service_and_method()
                == Some((self.service.as_str(), method));
        if !name_ok {
            return Err(PalError::Protocol(format!(
                "reply to {method} named {}",
                hdr.name
            )));
        }
        if hdr.seq != seq {
            return Err(PalError::Protocol(format!(
                "reply to {method} has sequence id {}, expected {seq}",
                hdr.seq
            )));
        }

        match reply {
            PalReply::Success(None) => Ok(()),
            PalReply::Success(Some(status)) if status.is_success() => Ok(()),
            PalReply::Success(Some(status)) => Err(PalError::Status(status)),
            PalReply::InvalidOperation(status) => {
                Err(PalError::InvalidOperation(status))
            }
            PalReply::Application { kind, message } => {
                Err(PalError::Application { kind, message })
            }
        }
    }
}

#[async_trait]
impl PalOps for Client {
    async fn port_add(
        &mut self,
        device: DeviceId,
        port: DevPort,
        speed: PortSpeed,
        fec: PortFec,
    ) -> PalResult<()> {
        debug!(self.log, "port add";
            "device" => device,
            "port" => port,
            "speed" => %speed,
            "fec" => %fec,
        );
        self.call(&PalCall::PortAdd {
            device,
            port,
            speed,
            fec,
        })
        .await
    }

    async fn port_enable(
        &mut self,
        device: DeviceId,
        port: DevPort,
    ) -> PalResult<()> {
        debug!(self.log, "port enable"; "device" => device, "port" => port);
        self.call(&PalCall::PortEnable { device, port }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PORT_ENABLE;
    use crate::PalStatus;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    // Accept a single connection, wait for one call, and answer it with
    // whatever `respond` builds from the call's header.
    async fn answer_once<F>(
        transport: Transport,
        respond: F,
    ) -> (PalConfig, JoinHandle<()>)
    where
        F: FnOnce(&MessageHeader) -> BytesMut + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            let hdr = loop {
                let call = codec::take_message(transport, &mut buf, |d| {
                    codec::decode_call(d)
                        .map(|r| r.map(|(hdr, _, used)| (hdr, used)))
                })
                .unwrap();
                if let Some(hdr) = call {
                    break hdr;
                }
                assert!(stream.read_buf(&mut buf).await.unwrap() > 0);
            };

            let reply = respond(&hdr);
            let reply = match transport {
                Transport::Buffered => reply,
                Transport::Framed => codec::frame(reply),
            };
            stream.write_all(&reply).await.unwrap();
            // Hold the connection open until the client hangs up.
            let _ = stream.read_buf(&mut buf).await;
        });

        let config = PalConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            transport,
            ..Default::default()
        };
        (config, task)
    }

    async fn enable_with_reply<F>(
        transport: Transport,
        respond: F,
    ) -> PalResult<()>
    where
        F: FnOnce(&MessageHeader) -> BytesMut + Send + 'static,
    {
        let log = common::logging::discard();
        let (config, task) = answer_once(transport, respond).await;
        let mut client = Client::connect(&log, &config).await.unwrap();
        let result = client.port_enable(0, 144).await;
        client.close().await;
        task.await.unwrap();
        result
    }

    fn success() -> PalReply {
        PalReply::Success(Some(PalStatus::SUCCESS))
    }

    #[tokio::test]
    async fn test_reply_with_wrong_sequence_id() {
        let result = enable_with_reply(Transport::Buffered, |_| {
            codec::encode_reply(PORT_ENABLE, 99, &success())
        })
        .await;
        match result {
            Err(PalError::Protocol(msg)) => assert_eq!(
                msg,
                "reply to pal_port_enable has sequence id 99, expected 1"
            ),
            r => panic!("expected a protocol error, got {r:?}"),
        }
    }

    #[tokio::test]
    async fn test_reply_with_wrong_method() {
        let result = enable_with_reply(Transport::Buffered, |hdr| {
            codec::encode_reply(codec::PORT_ADD, hdr.seq, &success())
        })
        .await;
        match result {
            Err(PalError::Protocol(msg)) => assert_eq!(
                msg,
                "reply to pal_port_enable named pal_port_add"
            ),
            r => panic!("expected a protocol error, got {r:?}"),
        }
    }

    #[tokio::test]
    async fn test_reply_with_nonzero_status() {
        for transport in [Transport::Buffered, Transport::Framed] {
            let result = enable_with_reply(transport, |hdr| {
                let reply = PalReply::Success(Some(PalStatus::HW_COMM_FAIL));
                codec::encode_reply(PORT_ENABLE, hdr.seq, &reply)
            })
            .await;
            match result {
                Err(PalError::Status(status)) => {
                    assert_eq!(status, PalStatus::HW_COMM_FAIL)
                }
                r => panic!("expected a status error, got {r:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_reply_with_qualified_name() {
        let result = enable_with_reply(Transport::Buffered, |hdr| {
            codec::encode_reply(&hdr.name, hdr.seq, &success())
        })
        .await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn test_void_reply() {
        let result = enable_with_reply(Transport::Buffered, |hdr| {
            codec::encode_reply(PORT_ENABLE, hdr.seq, &PalReply::Success(None))
        })
        .await;
        assert!(result.is_ok(), "{result:?}");
    }
}
