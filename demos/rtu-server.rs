// SPDX-License-Identifier: MIT OR Apache-2.0

//! Answer Modbus RTU requests on a serial port as unit 10.

use modbus_engine::{prelude::*, server::rtu::Server};
use tokio_serial::SerialStream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let tty_path = std::env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".into());
    let serial = SerialStream::open(&tokio_serial::new(&tty_path, 9600))?;

    let mut store = RegisterStore::new();
    store.coils_mut().add(123, [true]);
    store.holding_registers_mut().add(93, [19u16]);
    let service = RegisterService::new(store);

    println!("Serving unit 10 on {tty_path}");
    Server::new(serial, [10]).serve(&service).await?;
    Ok(())
}
