// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query a Modbus TCP responder.

use modbus_engine::{client, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let socket_addr = "127.0.0.1:5502".parse()?;

    println!("Connecting to {socket_addr}");
    let mut ctx = client::tcp::connect(socket_addr).await?;

    println!("Reading holding register 93");
    let setpoint = ctx.read_holding_registers(93, 1).await?;
    println!("Setpoint is {:?}", setpoint);

    println!("Switching coil 123 off");
    ctx.write_single_coil(123, false).await?;

    let coils = ctx.read_coils(123, 1).await?;
    println!("Coil 123 is now {:?}", coils[0]);

    Ok(())
}
