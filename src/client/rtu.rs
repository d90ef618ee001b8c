// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU client connections

use std::fmt::Debug;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::serial::SerialParams;

use super::*;

/// Connect to no particular Modbus unit for sending broadcast messages.
pub fn attach<T>(transport: T) -> Context
where
    T: AsyncRead + AsyncWrite + Debug + Unpin + Send + 'static,
{
    attach_unit(transport, Unit::broadcast())
}

/// Connect to the given Modbus unit.
pub fn attach_unit<T>(transport: T, unit: Unit) -> Context
where
    T: AsyncRead + AsyncWrite + Debug + Unpin + Send + 'static,
{
    let client = crate::service::rtu::Client::new(transport, unit);
    Context {
        client: Box::new(client),
    }
}

/// Connect to the given Modbus unit on a half-duplex serial bus.
///
/// The serial line parameters are used to keep the mandatory inter-frame
/// silence of 3.5 character times between consecutive requests.
pub fn attach_unit_with_params<T>(transport: T, unit: Unit, params: SerialParams) -> Context
where
    T: AsyncRead + AsyncWrite + Debug + Unpin + Send + 'static,
{
    let client = crate::service::rtu::Client::new(transport, unit).with_line_params(params);
    Context {
        client: Box::new(client),
    }
}
