// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::Instant,
};
use tokio_util::codec::Framed;

use crate::{
    codec,
    error::{Error, Result},
    frame::{rtu::*, *},
    serial::SerialParams,
    unit::*,
};

/// Modbus RTU initiator
#[derive(Debug)]
pub(crate) struct Client<T> {
    framed: Framed<T, codec::rtu::ClientCodec>,
    unit_id: UnitId,
    line: Option<Line>,
}

/// Half-duplex bookkeeping for a serial line.
#[derive(Debug)]
struct Line {
    params: SerialParams,
    last_activity: Instant,
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(transport: T, unit: Unit) -> Self {
        let framed = Framed::new(transport, codec::rtu::ClientCodec::default());
        let unit_id = unit.into();
        Self {
            framed,
            unit_id,
            line: None,
        }
    }

    /// Enable inter-frame pacing derived from the serial line parameters.
    ///
    /// The bus must be silent for at least 3.5 character times between
    /// frames. Transports without such timing constraints (e.g. RTU
    /// tunneled over a reliable stream) work fine without pacing.
    pub(crate) fn with_line_params(mut self, params: SerialParams) -> Self {
        self.line = Some(Line {
            params,
            last_activity: Instant::now(),
        });
        self
    }

    fn next_request_adu<R>(&self, req: R) -> RequestAdu
    where
        R: Into<RequestPdu>,
    {
        RequestAdu {
            hdr: Header {
                unit_id: self.unit_id,
            },
            pdu: req.into(),
        }
    }

    fn resume_at(&self) -> Option<Instant> {
        self.line
            .as_ref()
            .map(|line| line.last_activity + line.params.frame_end_silence())
    }

    fn touch_line(&mut self) {
        if let Some(line) = &mut self.line {
            line.last_activity = Instant::now();
        }
    }

    pub(crate) async fn call(&mut self, req: Request) -> Result<Response> {
        log::debug!("Call {req:?}");
        let req_function = req.function_code();
        let req_adu = self.next_request_adu(req);
        let req_hdr = req_adu.hdr;

        if let Some(resume_at) = self.resume_at() {
            tokio::time::sleep_until(resume_at).await;
        }
        self.framed.read_buffer_mut().clear();

        self.framed.send(req_adu).await?;
        let res_adu = self
            .framed
            .next()
            .await
            .unwrap_or_else(|| Err(Error::Io(std::io::ErrorKind::BrokenPipe.into())))?;
        self.touch_line();

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

#[cfg(test)]
mod tests {
    use core::{
        pin::Pin,
        task::{Context, Poll},
    };

    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

    use super::*;

    #[derive(Debug)]
    struct MockTransport;

    impl AsyncRead for MockTransport {
        fn poll_read(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockTransport {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn handle_broken_pipe() {
        let mut client = Client::new(MockTransport, Unit::broadcast());
        let res = client.call(Request::ReadCoils(0x00, 5)).await;
        assert!(matches!(
            res,
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::BrokenPipe
        ));
    }
}
