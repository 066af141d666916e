// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A thrift server exposing any `PalOps` backend as a multiplexed PAL
//! service.  Paired with the `StubPal`, it stands in for the SDE when
//! exercising clients end to end.

use std::sync::Arc;

use bytes::BytesMut;
use slog::debug;
use slog::error;
use slog::info;
use slog::Logger;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::codec;
use crate::codec::CallArgs;
use crate::codec::CallError;
use crate::codec::MessageHeader;
use crate::codec::MessageType;
use crate::codec::PalCall;
use crate::codec::PalReply;
use crate::ApplicationErrorKind;
use crate::PalError;
use crate::PalOps;
use crate::PalResult;
use crate::PalStatus;
use crate::Transport;

/// Accept connections on `listener` until the task is cancelled, answering
/// calls made to `service` by forwarding them to `pal`.
pub async fn serve<P>(
    log: Logger,
    listener: TcpListener,
    service: String,
    transport: Transport,
    pal: Arc<Mutex<P>>,
) -> PalResult<()>
where
    P: PalOps + 'static,
{
    let service = Arc::new(service);
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| PalError::io("accepting connection", e))?;
        let log = log.new(slog::o!("peer" => peer.to_string()));
        info!(log, "accepted connection");

        let pal = pal.clone();
        let service = service.clone();
        tokio::spawn(async move {
            match handle_connection(&log, stream, &service, transport, pal)
                .await
            {
                Ok(()) => info!(log, "connection closed"),
                Err(e) => error!(log, "connection failed: {e}"),
            }
        });
    }
}

// Work out what to send back for a single call.
async fn answer<P>(
    log: &Logger,
    service: &str,
    hdr: &MessageHeader,
    args: &CallArgs,
    pal: &Mutex<P>,
) -> PalReply
where
    P: PalOps,
{
    let method = match hdr.service_and_method() {
        Some((s, method)) if s == service => method,
        _ => {
            return PalReply::Application {
                kind: ApplicationErrorKind::UnknownMethod,
                message: format!("no service registered for {}", hdr.name),
            }
        }
    };

    let call = match PalCall::from_args(method, args) {
        Ok(call) => call,
        Err(e @ CallError::UnknownMethod(_)) => {
            return PalReply::Application {
                kind: ApplicationErrorKind::UnknownMethod,
                message: e.to_string(),
            }
        }
        Err(e @ CallError::MissingField(..)) => {
            return PalReply::Application {
                kind: ApplicationErrorKind::ProtocolError,
                message: e.to_string(),
            }
        }
        Err(CallError::InvalidValue(msg)) => {
            debug!(log, "rejecting call"; "method" => method, "reason" => msg);
            return PalReply::InvalidOperation(PalStatus::INVALID_ARG);
        }
    };

    let mut pal = pal.lock().await;
    match crate::dispatch(&mut *pal, &call).await {
        Ok(()) => PalReply::Success(Some(PalStatus::SUCCESS)),
        Err(e) => match e.status() {
            Some(status) => PalReply::InvalidOperation(status),
            None => PalReply::Application {
                kind: ApplicationErrorKind::InternalError,
                message: e.to_string(),
            },
        },
    }
}

async fn handle_connection<P>(
    log: &Logger,
    mut stream: TcpStream,
    service: &str,
    transport: Transport,
    pal: Arc<Mutex<P>>,
) -> PalResult<()>
where
    P: PalOps,
{
    let mut rbuf = BytesMut::with_capacity(4096);

    loop {
        let decoded = codec::take_message(transport, &mut rbuf, |data| {
            codec::decode_call(data).map(|msg| {
                msg.map(|(hdr, args, used)| ((hdr, args), used))
            })
        })?;

        let (hdr, args) = match decoded {
            Some(msg) => msg,
            None => {
                let n = stream
                    .read_buf(&mut rbuf)
                    .await
                    .map_err(|e| PalError::io("reading call", e))?;
                if n == 0 {
                    return match rbuf.is_empty() {
                        true => Ok(()),
                        false => Err(PalError::Closed),
                    };
                }
                continue;
            }
        };

        debug!(log, "received call"; "name" => &hdr.name, "seq" => hdr.seq);
        let reply = answer(log, service, &hdr, &args, &pal).await;
        if hdr.kind == MessageType::Oneway {
            continue;
        }

        // The multiplexed processor strips the service name before the
        // reply is written.
        let method = hdr
            .service_and_method()
            .map(|(_, m)| m)
            .unwrap_or(hdr.name.as_str());
        let msg = codec::encode_reply(method, hdr.seq, &reply);
        let msg = match transport {
            Transport::Buffered => msg,
            Transport::Framed => codec::frame(msg),
        };
        stream
            .write_all(&msg)
            .await
            .map_err(|e| PalError::io("sending reply", e))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubPal;
    use crate::Client;
    use crate::PalConfig;
    use common::ports::PortFec;
    use common::ports::PortSpeed;
    use std::net::SocketAddr;

    fn logger() -> Logger {
        common::logging::discard()
    }

    async fn start(
        transport: Transport,
    ) -> (SocketAddr, Arc<Mutex<StubPal>>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pal = Arc::new(Mutex::new(StubPal::new(&logger())));
        let server_pal = pal.clone();
        let task = tokio::spawn(async move {
            let _ = serve(
                logger(),
                listener,
                "pal".to_string(),
                transport,
                server_pal,
            )
            .await;
        });
        (addr, pal, task)
    }

    fn config(addr: SocketAddr, transport: Transport) -> PalConfig {
        PalConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            service: "pal".to_string(),
            transport,
        }
    }

    #[tokio::test]
    async fn test_client_against_stub() {
        for transport in [Transport::Buffered, Transport::Framed] {
            let (addr, pal, task) = start(transport).await;
            let mut client =
                Client::connect(&logger(), &config(addr, transport))
                    .await
                    .unwrap();

            client
                .port_add(0, 144, PortSpeed::Speed10G, PortFec::None)
                .await
                .unwrap();
            client.port_enable(0, 144).await.unwrap();

            let err = client
                .port_add(0, 144, PortSpeed::Speed10G, PortFec::None)
                .await
                .unwrap_err();
            assert_eq!(err.status(), Some(PalStatus::ALREADY_EXISTS));

            let err = client.port_enable(0, 155).await.unwrap_err();
            assert_eq!(err.status(), Some(PalStatus::OBJECT_NOT_FOUND));
            client.close().await;

            assert!(pal.lock().await.port(0, 144).unwrap().enabled);
            task.abort();
        }
    }

    #[tokio::test]
    async fn test_wrong_service() {
        let (addr, pal, task) = start(Transport::Buffered).await;
        let mut cfg = config(addr, Transport::Buffered);
        cfg.service = "conn_mgr".to_string();

        let mut client = Client::connect(&logger(), &cfg).await.unwrap();
        let err = client.port_enable(0, 144).await.unwrap_err();
        match err {
            PalError::Application { kind, .. } => {
                assert_eq!(kind, ApplicationErrorKind::UnknownMethod)
            }
            e => panic!("unexpected error: {e:?}"),
        }
        assert!(pal.lock().await.calls().is_empty());
        task.abort();
    }

    #[tokio::test]
    async fn test_transport_mismatch() {
        // A framed client talking to a buffered server sees its length
        // prefix parsed as an unversioned message header, which the server
        // rejects by hanging up.
        let (addr, _pal, task) = start(Transport::Buffered).await;
        let mut client =
            Client::connect(&logger(), &config(addr, Transport::Framed))
                .await
                .unwrap();
        assert!(client.port_enable(0, 144).await.is_err());
        task.abort();
    }
}
