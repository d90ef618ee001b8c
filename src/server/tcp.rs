// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server (responder)

use std::{future::Future, io, net::SocketAddr, sync::Arc};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use log::{error, trace};
use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::{
    codec,
    error::Result,
    frame::{tcp::*, *},
    server::service::{NewService, Service},
    unit::UnitId,
};

/// Default listen queue length.
const DEFAULT_BACKLOG: u32 = 10;

/// A Modbus TCP responder.
///
/// Accepts any number of client connections and answers requests on each
/// of them independently, echoing the transaction id of every request in
/// the corresponding response. An optional unit-address allow-list makes
/// the responder stay silent on requests for foreign units; the client
/// will run into its timeout, which mirrors the behavior on a serial bus.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    units: Option<Vec<UnitId>>,
}

impl Server {
    /// Create a server from an already bound listener.
    #[must_use]
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            units: None,
        }
    }

    /// Bind a new listener with the default backlog.
    pub fn bind(socket_addr: SocketAddr) -> io::Result<Self> {
        Self::bind_with_backlog(socket_addr, DEFAULT_BACKLOG)
    }

    /// Bind a new listener with the given listen queue length.
    pub fn bind_with_backlog(socket_addr: SocketAddr, backlog: u32) -> io::Result<Self> {
        let listener = listener(socket_addr, backlog)?;
        Ok(Self::new(listener))
    }

    /// Restrict the served unit addresses.
    ///
    /// Requests for other units are dropped without a reply.
    #[must_use]
    pub fn with_allowed_units(mut self, units: impl IntoIterator<Item = UnitId>) -> Self {
        self.units = Some(units.into_iter().collect());
        self
    }

    /// The local address the server is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections and serve requests on each of them.
    pub async fn serve<S>(&self, new_service: S) -> Result<()>
    where
        S: NewService<Request = Request, Response = Response, Exception = Exception>
            + Send
            + Sync
            + 'static,
        S::Instance: Send + Sync + 'static,
    {
        let new_service = Arc::new(new_service);
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            trace!("Accepted connection from {peer_addr}");
            let framed = Framed::new(stream, codec::tcp::ServerCodec::default());
            let service = new_service.new_service()?;
            let units = self.units.clone();

            tokio::spawn(async move {
                if let Err(err) = process(framed, service, units).await {
                    error!("Connection {peer_addr} terminated: {err}");
                }
            });
        }
    }

    /// Serve until the shutdown signal resolves.
    pub async fn serve_until<S, Sd>(self, new_service: S, shutdown_signal: Sd) -> Result<()>
    where
        S: NewService<Request = Request, Response = Response, Exception = Exception>
            + Send
            + Sync
            + 'static,
        S::Instance: Send + Sync + 'static,
        Sd: Future<Output = ()> + Unpin,
    {
        tokio::select! {
            res = self.serve(new_service) => res,
            () = shutdown_signal => {
                trace!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

/// The request-response loop for a single client connection.
///
/// Responses are emitted in the order the requests were received on this
/// socket. Framing errors (bad protocol id, invalid length) terminate
/// the connection.
async fn process<S>(
    mut framed: Framed<TcpStream, codec::tcp::ServerCodec>,
    service: S,
    units: Option<Vec<UnitId>>,
) -> Result<()>
where
    S: Service<Request = Request, Response = Response, Exception = Exception> + Send + Sync,
{
    loop {
        let Some(request) = framed.next().await else {
            // client closed the connection
            return Ok(());
        };
        let RequestAdu { hdr, pdu } = request?;

        if let Some(units) = &units {
            if !units.contains(&hdr.unit_id) {
                trace!("Ignoring request for unit {}", hdr.unit_id);
                continue;
            }
        }

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

        framed.send(ResponseAdu { hdr, pdu }).await?;
    }
}

/// Configure and bind a listening TCP socket.
fn listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
        SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
    };
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}
