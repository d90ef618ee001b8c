// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU client connections (blocking)

use tokio_serial::SerialStream;

use crate::{error::Result, serial::SerialParams, unit::Unit};

use super::Context;

/// Connect to the given Modbus unit via a serial port.
pub fn connect_unit(builder: &tokio_serial::SerialPortBuilder, unit: Unit) -> Result<Context> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let serial = {
        let _guard = runtime.enter();
        SerialStream::open(builder).map_err(std::io::Error::from)?
    };
    let async_ctx = crate::client::rtu::attach_unit(serial, unit);
    Ok(Context {
        runtime,
        async_ctx,
        timeout: None,
    })
}

/// Connect to the given Modbus unit via a serial port, with inter-frame
/// pacing derived from the line parameters.
pub fn connect_unit_with_params(
    builder: &tokio_serial::SerialPortBuilder,
    unit: Unit,
    params: SerialParams,
) -> Result<Context> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let serial = {
        let _guard = runtime.enter();
        SerialStream::open(builder).map_err(std::io::Error::from)?
    };
    let async_ctx = crate::client::rtu::attach_unit_with_params(serial, unit, params);
    Ok(Context {
        runtime,
        async_ctx,
        timeout: None,
    })
}
