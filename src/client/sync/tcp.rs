// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP client connections (blocking)

use std::net::SocketAddr;

use crate::{error::Result, unit::Unit};

use super::Context;

/// Establish a direct connection to a Modbus TCP coupler.
pub fn connect(socket_addr: SocketAddr) -> Result<Context> {
    connect_unit(socket_addr, Unit::tcp_device())
}

/// Connect to a physical, broadcast, or custom Modbus device,
/// possibly through a Modbus TCP gateway.
pub fn connect_unit(socket_addr: SocketAddr, unit: Unit) -> Result<Context> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let async_ctx = runtime.block_on(crate::client::tcp::connect_unit(socket_addr, unit))?;
    Ok(Context {
        runtime,
        async_ctx,
        timeout: None,
    })
}
