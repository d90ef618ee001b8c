// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serve a register store over Modbus TCP.

use modbus_engine::{definitions::RegisterDefinitions, prelude::*, server::tcp::Server};

const REGISTERS: &str = r#"{
    "COILS": {
        "LED": { "register": 123, "len": 1, "val": true }
    },
    "HREGS": {
        "SETPOINT": { "register": 93, "len": 1, "val": 19 }
    },
    "IREGS": {
        "TEMPERATURE": { "register": 301, "len": 1, "val": 231 }
    }
}"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut store = RegisterStore::new();
    RegisterDefinitions::from_json(REGISTERS)?.apply_to(&mut store)?;
    store.coils_mut().on_write(
        123,
        Box::new(|addr, values| {
            println!("coil {addr} switched to {:?}", values[0]);
            Ok(())
        }),
    );

    let service = RegisterService::new(store);
    let journal = service.clone();

    let server = Server::bind("127.0.0.1:5502".parse()?)?;
    println!("Listening on {}", server.local_addr()?);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            let changes = journal.take_changes();
            if !changes.is_empty() {
                println!("remote writes since last check: {changes:?}");
            }
        }
    });

    server.serve(move || Ok(service.clone())).await?;
    Ok(())
}
