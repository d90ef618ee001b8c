// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query an RTU responder through the blocking client.

use std::time::Duration;

use modbus_engine::{client::sync, prelude::*, serial::SerialParams};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let tty_path = std::env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".into());
    let builder = tokio_serial::new(&tty_path, 9600);
    let params = SerialParams::new_8n1(9600);

    let mut ctx = sync::rtu::connect_unit_with_params(&builder, Unit(10), params)?;
    ctx.set_timeout(Duration::from_secs(1));

    let setpoint = ctx.read_holding_registers(93, 1)?;
    println!("Setpoint is {:?}", value::words_as_signed(&setpoint));

    ctx.write_single_coil(123, true)?;
    println!("Coil 123 switched on");

    Ok(())
}
