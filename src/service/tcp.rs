// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    fmt,
    sync::atomic::{AtomicU16, Ordering},
};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    codec,
    error::{Error, Result},
    frame::{tcp::*, *},
    unit::*,
};

const INITIAL_TRANSACTION_ID: TransactionId = 0;

/// Modbus TCP initiator
#[derive(Debug)]
pub(crate) struct Client<T> {
    framed: Framed<T, codec::tcp::ClientCodec>,
    unit_id: UnitId,
    transaction_id: AtomicU16,
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(transport: T, unit: Unit) -> Self {
        let framed = Framed::new(transport, codec::tcp::ClientCodec::default());
        let unit_id: UnitId = unit.into();
        let transaction_id = AtomicU16::new(INITIAL_TRANSACTION_ID);
        Self {
            framed,
            unit_id,
            transaction_id,
        }
    }

    /// The current counter value is used and then incremented,
    /// wrapping around at 2^16. Wrap-around is unproblematic
    /// because requests are never pipelined.
    fn next_transaction_id(&self) -> TransactionId {
        let transaction_id = self.transaction_id.load(Ordering::Relaxed);
        self.transaction_id
            .store(transaction_id.wrapping_add(1), Ordering::Relaxed);
        transaction_id
    }

    fn next_request_adu<R>(&self, req: R) -> RequestAdu
    where
        R: Into<RequestPdu>,
    {
        RequestAdu {
            hdr: Header {
                transaction_id: self.next_transaction_id(),
                unit_id: self.unit_id,
            },
            pdu: req.into(),
        }
    }

    pub(crate) async fn call(&mut self, req: Request) -> Result<Response> {
        log::debug!("Call {req:?}");
        let req_function = req.function_code();
        let req_adu = self.next_request_adu(req);
        let req_hdr = req_adu.hdr;

        self.framed.read_buffer_mut().clear();

        self.framed.send(req_adu).await?;
        let res_adu = self
            .framed
            .next()
            .await
            .ok_or_else(|| Error::Io(std::io::ErrorKind::BrokenPipe.into()))??;

        verify_response_header(req_hdr, res_adu.hdr)?;
        match res_adu.pdu {
            ResponsePdu(Ok(res)) => {
                if res.function_code() != req_function {
                    return Err(Error::Correlation(format!(
                        "expected function 0x{req_function:0>2X}, got 0x{:0>2X}",
                        res.function_code()
                    )));
                }
                Ok(res)
            }
            ResponsePdu(Err(err)) => {
                if err.function != req_function {
                    return Err(Error::Correlation(format!(
                        "exception for function 0x{:0>2X} does not answer 0x{req_function:0>2X}",
                        err.function
                    )));
                }
                Err(Error::Exception(err))
            }
        }
    }
}

fn verify_response_header(req_hdr: Header, rsp_hdr: Header) -> Result<()> {
    if req_hdr != rsp_hdr {
        return Err(Error::Correlation(format!(
            "invalid response header: expected/request = {req_hdr:?}, actual/response = {rsp_hdr:?}"
        )));
    }
    Ok(())
}

impl<T> UnitContext for Client<T> {
    fn set_unit(&mut self, unit: Unit) {
        self.unit_id = unit.into();
    }
}

#[async_trait::async_trait]
impl<T> crate::client::Client for Client<T>
where
    T: fmt::Debug + AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn call(&mut self, req: Request) -> Result<Response> {
        Client::call(self, req).await
    }
}
