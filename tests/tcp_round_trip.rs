// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execute this test only if the `tcp-server` feature is selected.

#![cfg(feature = "tcp-server")]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use modbus_engine::{
    client,
    prelude::*,
    server::tcp::Server,
    store::RegisterStore,
};

fn example_store() -> RegisterStore {
    let mut store = RegisterStore::new();
    store.coils_mut().add(123, [true]);
    store.coils_mut().add(19, vec![false; 11]);
    store.holding_registers_mut().add(93, [19u16]);
    store.input_registers_mut().add(301, [17u16, 0, 4]);
    store
}

async fn spawn_server(service: RegisterService) -> anyhow::Result<std::net::SocketAddr> {
    let server = Server::bind("127.0.0.1:0".parse()?)?;
    let socket_addr = server.local_addr()?;
    tokio::spawn(async move {
        let factory = move || Ok(service.clone());
        if let Err(err) = server.serve(factory).await {
            eprintln!("server terminated: {err}");
        }
    });
    // Give the server some time for starting up
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(socket_addr)
}

#[tokio::test]
async fn read_and_write_round_trips() -> anyhow::Result<()> {
    let service = RegisterService::new(example_store());
    let journal = service.clone();
    let socket_addr = spawn_server(service).await?;

    let mut ctx = client::tcp::connect(socket_addr).await?;

    // coil read
    assert_eq!(ctx.read_coils(123, 1).await?, vec![true]);

    // holding register read
    assert_eq!(ctx.read_holding_registers(93, 1).await?, vec![19]);

    // input register block read with run flattening
    assert_eq!(ctx.read_input_registers(301, 3).await?, vec![17, 0, 4]);

    // single writes echo and are readable afterwards
    ctx.write_single_coil(123, false).await?;
    assert_eq!(ctx.read_coils(123, 1).await?, vec![false]);
    ctx.write_single_register(93, 20).await?;
    assert_eq!(ctx.read_holding_registers(93, 1).await?, vec![20]);

    // multiple coils
    let pattern = [
        true, true, false, false, true, true, false, true, false, true, true,
    ];
    ctx.write_multiple_coils(19, &pattern).await?;
    assert_eq!(ctx.read_coils(19, 11).await?, pattern.to_vec());

    // every remote write ended up in the journal exactly once
    let changes = journal.take_changes();
    assert_eq!(changes.coils.get(&123), Some(&false));
    assert_eq!(changes.coils.get(&19), Some(&true));
    assert_eq!(changes.coils.get(&21), Some(&false));
    assert_eq!(changes.holding_registers.get(&93), Some(&20));
    assert!(journal.take_changes().is_empty());

    Ok(())
}

#[tokio::test]
async fn missing_address_yields_exception() -> anyhow::Result<()> {
    let socket_addr = spawn_server(RegisterService::new(example_store())).await?;
    let mut ctx = client::tcp::connect(socket_addr).await?;

    let err = ctx.read_input_registers(0x00FF, 1).await.unwrap_err();
    match err {
        Error::Exception(rsp) => {
            assert_eq!(rsp.function, 0x04);
            assert_eq!(rsp.exception, Exception::IllegalDataAddress);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn unknown_function_yields_exception() -> anyhow::Result<()> {
    let socket_addr = spawn_server(RegisterService::new(example_store())).await?;
    let mut ctx = client::tcp::connect(socket_addr).await?;

    let err = ctx.call(Request::Custom(0x42, vec![0x00])).await.unwrap_err();
    match err {
        Error::Exception(rsp) => {
            assert_eq!(rsp.function, 0x42);
            assert_eq!(rsp.exception, Exception::IllegalFunction);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn wire_level_round_trip() -> anyhow::Result<()> {
    let socket_addr = spawn_server(RegisterService::new(example_store())).await?;

    // read_coils(123, 1) for unit 10 with transaction id 1
    let request = [
        0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x0A, 0x01, 0x00, 0x7B, 0x00, 0x01,
    ];
    let expected_response = [
        0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x0A, 0x01, 0x01, 0x01,
    ];

    let mut stream = tokio::net::TcpStream::connect(socket_addr).await?;
    stream.write_all(&request).await?;

    let mut response = [0u8; 10];
    stream.read_exact(&mut response).await?;
    assert_eq!(response, expected_response);

    Ok(())
}

#[tokio::test]
async fn foreign_unit_is_ignored() -> anyhow::Result<()> {
    let server = Server::bind("127.0.0.1:0".parse()?)?.with_allowed_units([10]);
    let socket_addr = server.local_addr()?;
    let service = RegisterService::new(example_store());
    tokio::spawn(async move {
        let factory = move || Ok(service.clone());
        let _ = server.serve(factory).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // requests for unit 10 are answered
    let mut ctx = client::tcp::connect_unit(socket_addr, Unit(10)).await?;
    assert_eq!(ctx.read_coils(123, 1).await?, vec![true]);

    // requests for unit 11 stay unanswered; the client runs into its timeout
    let mut ctx = client::tcp::connect_unit(socket_addr, Unit(11)).await?;
    let result = tokio::time::timeout(Duration::from_millis(200), ctx.read_coils(123, 1)).await;
    assert!(result.is_err());

    Ok(())
}

#[tokio::test]
async fn malformed_quantity_is_answered_with_exception() -> anyhow::Result<()> {
    let socket_addr = spawn_server(RegisterService::new(example_store())).await?;

    // read_coils with quantity 0 from unit 10, transaction id 7
    let request = [
        0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x0A, 0x01, 0x00, 0x7B, 0x00, 0x00,
    ];
    // exception response: fc | 0x80, ILLEGAL_DATA_VALUE
    let expected_response = [0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x0A, 0x81, 0x03];

    let mut stream = tokio::net::TcpStream::connect(socket_addr).await?;
    stream.write_all(&request).await?;

    let mut response = [0u8; 9];
    stream.read_exact(&mut response).await?;
    assert_eq!(response, expected_response);

    Ok(())
}
