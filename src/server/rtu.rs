// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU server (responder)

use std::{future::Future, time::Duration};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    codec,
    error::{Error, Result},
    frame::{rtu::*, *},
    server::Service,
    unit::{Unit, UnitId},
};

/// A responder on a half-duplex serial bus.
///
/// The transport is generic: a real serial port, or any other byte
/// stream that carries RTU frames. Frames addressed to units outside
/// the allow-list are discarded without an answer, as are frames with
/// an invalid CRC. Broadcast requests (unit address 0) are executed but
/// never answered; they are only accepted if the broadcast address is
/// part of the allow-list.
#[derive(Debug)]
pub struct Server<T> {
    framed: Framed<T, codec::rtu::ServerCodec>,
    units: Vec<UnitId>,
}

impl<T> Server<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(transport: T, units: impl IntoIterator<Item = UnitId>) -> Self {
        Self {
            framed: Framed::new(transport, codec::rtu::ServerCodec::default()),
            units: units.into_iter().collect(),
        }
    }

    /// Serve exactly one request→response cycle.
    ///
    /// Waits up to `timeout` for a frame; `Duration::ZERO` turns the
    /// call into a non-blocking poll. Returns `Ok(true)` if a request
    /// was processed, `Ok(false)` if the timeout expired or a frame was
    /// discarded, and an error only if the transport itself failed or
    /// reached its end.
    pub async fn process_one<S>(&mut self, service: &S, timeout: Duration) -> Result<bool>
    where
        S: Service<Request = Request, Response = Response, Exception = Exception>,
    {
        match tokio::time::timeout(timeout, self.framed.next()).await {
            Err(_) => Ok(false),
            Ok(None) => Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into())),
            Ok(Some(Err(err))) => {
                // Corrupt frames are discarded silently.
                log::debug!("Discarding undecodable frame: {err}");
                Ok(false)
            }
            Ok(Some(Ok(request))) => self.answer(service, request).await,
        }
    }

    /// Serve requests until the transport is exhausted.
    pub async fn serve<S>(mut self, service: &S) -> Result<()>
    where
        S: Service<Request = Request, Response = Response, Exception = Exception>,
    {
        loop {
            let Some(request) = self.framed.next().await else {
                return Ok(());
            };
            match request {
                Err(err) => {
                    log::debug!("Discarding undecodable frame: {err}");
                }
                Ok(request) => {
                    self.answer(service, request).await?;
                }
            }
        }
    }

    /// Serve requests until the transport is exhausted or the shutdown
    /// signal resolves.
    pub async fn serve_until<S, Sd>(self, service: &S, shutdown_signal: Sd) -> Result<()>
    where
        S: Service<Request = Request, Response = Response, Exception = Exception>,
        Sd: Future<Output = ()> + Unpin,
    {
        tokio::select! {
            res = self.serve(service) => res,
            () = shutdown_signal => {
                log::trace!("Shutdown signal received");
                Ok(())
            }
        }
    }

    async fn answer<S>(&mut self, service: &S, request: RequestAdu) -> Result<bool>
    where
        S: Service<Request = Request, Response = Response, Exception = Exception>,
    {
        let RequestAdu { hdr, pdu } = request;
        if !self.units.contains(&hdr.unit_id) {
            // Not addressed to this responder. The protocol mandates
            // silence, even for malformed frames.
            log::debug!("Ignoring request for unit {}", Unit(hdr.unit_id));
            return Ok(false);
        }
        let suppress_reply = Unit(hdr.unit_id).is_broadcast();

        let pdu = match pdu.0 {
            Err(exception) => ResponsePdu(Err(exception)),
            Ok(req) => {
                let function = req.function_code();
                match service.call(req).await {
                    Ok(rsp) => ResponsePdu(Ok(rsp)),
                    Err(exception) => ResponsePdu(Err(ExceptionResponse {
                        function,
                        exception,
                    })),
                }
            }
        };

        if suppress_reply {
            return Ok(true);
        }
        self.framed.send(ResponseAdu { hdr, pdu }).await?;
        Ok(true)
    }
}
