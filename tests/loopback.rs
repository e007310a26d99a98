//! End-to-end master/slave exchanges over loopback sockets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use relay_modbus::{
    FileRecord, FileSubRequest, ModbusClient, ModbusError, ModbusHandler, ModbusServer,
    ModbusTcpClient, ModbusTcpServer, ModbusTcpServerConfig, ModbusUdpClient, ModbusUdpServer,
    ProcessImage, UnitImage,
};

fn primed_handler() -> Arc<ModbusHandler> {
    let mut image = ProcessImage::new();
    let unit = image.add_unit(
        1,
        UnitImage::new(64, 64, 32, 32)
            .with_file(4, vec![vec![0u16; 4], vec![0u16; 4]])
            .with_fifo(0x0000, vec![0x01B8, 0x1284]),
    );
    unit.set_holding(0, 0x000A).unwrap();
    unit.set_holding(1, 0x000B).unwrap();
    unit.set_holding(2, 0x000C).unwrap();
    unit.set_holding(4, 0x0012).unwrap();
    unit.set_input(0, 0x4242).unwrap();
    unit.set_discrete(3, true).unwrap();
    Arc::new(ModbusHandler::new(Arc::new(image)))
}

async fn started_server(config: ModbusTcpServerConfig) -> ModbusTcpServer {
    let mut server = ModbusTcpServer::new(config, primed_handler());
    server.start().await.unwrap();
    server
}

fn loopback_config() -> ModbusTcpServerConfig {
    ModbusTcpServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    }
}

#[tokio::test]
async fn tcp_full_function_sweep() {
    let mut server = started_server(loopback_config()).await;
    let addr = server.local_addr().unwrap().to_string();
    let mut client = ModbusTcpClient::connect(&addr, Duration::from_secs(1))
        .await
        .unwrap();

    // Reads against the primed image.
    assert_eq!(
        client.read_03(1, 0, 3).await.unwrap(),
        vec![0x000A, 0x000B, 0x000C]
    );
    assert_eq!(client.read_04(1, 0, 1).await.unwrap(), vec![0x4242]);
    assert_eq!(
        client.read_02(1, 0, 4).await.unwrap(),
        vec![false, false, false, true]
    );

    // Coil writes echo and land in the image.
    client.write_05(1, 7, true).await.unwrap();
    let coils = client.read_01(1, 0, 8).await.unwrap();
    assert!(coils[7]);
    assert!(!coils[0]);

    client
        .write_0f(1, 0, &[true, false, true, false])
        .await
        .unwrap();
    assert_eq!(
        client.read_01(1, 0, 4).await.unwrap(),
        vec![true, false, true, false]
    );

    // Register writes.
    client.write_06(1, 10, 0xBEEF).await.unwrap();
    client.write_10(1, 11, &[0x1111, 0x2222]).await.unwrap();
    assert_eq!(
        client.read_03(1, 10, 3).await.unwrap(),
        vec![0xBEEF, 0x1111, 0x2222]
    );

    // Mask write: (0x12 & 0xF2) | (0x25 & !0xF2) = 0x17.
    client.mask_write_16(1, 4, 0x00F2, 0x0025).await.unwrap();
    assert_eq!(client.read_03(1, 4, 1).await.unwrap(), vec![0x0017]);

    // Read/write applies the write before the read.
    let values = client
        .read_write_17(1, 20, 2, 20, &[0xAAAA, 0xBBBB])
        .await
        .unwrap();
    assert_eq!(values, vec![0xAAAA, 0xBBBB]);

    // FIFO and file records.
    assert_eq!(
        client.read_fifo_18(1, 0x0000).await.unwrap(),
        vec![0x01B8, 0x1284]
    );
    client
        .write_file_15(
            1,
            &[FileRecord {
                file_number: 4,
                record_number: 1,
                values: vec![0x06AF, 0x04BE],
            }],
        )
        .await
        .unwrap();
    let records = client
        .read_file_14(
            1,
            &[FileSubRequest {
                file_number: 4,
                record_number: 1,
                record_length: 2,
            }],
        )
        .await
        .unwrap();
    assert_eq!(records, vec![vec![0x06AF, 0x04BE]]);

    // Device identification.
    let objects = client.read_device_id_2b(1, 1, 0).await.unwrap();
    assert_eq!(objects.len(), 3);

    // Semantic error surfaces as an exception.
    match client.read_03(1, 9999, 1).await.unwrap_err() {
        ModbusError::Exception { function, .. } => assert_eq!(function, 0x03),
        other => panic!("expected exception, got {:?}", other),
    }

    client.close().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn tcp_sequential_transactions_match_ids() {
    let mut server = started_server(loopback_config()).await;
    let addr = server.local_addr().unwrap().to_string();
    let mut client = ModbusTcpClient::connect(&addr, Duration::from_secs(1))
        .await
        .unwrap();

    for _ in 0..5 {
        assert_eq!(client.read_03(1, 0, 1).await.unwrap(), vec![0x000A]);
    }
    let stats = client.get_stats();
    assert_eq!(stats.requests_sent, 5);
    assert_eq!(stats.responses_received, 5);

    client.close().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn rtu_over_tcp_exchange() {
    let mut server = started_server(ModbusTcpServerConfig {
        rtu_over_tcp: true,
        ..loopback_config()
    })
    .await;
    let addr = server.local_addr().unwrap().to_string();
    let mut client = ModbusTcpClient::connect_rtu_over_tcp(&addr, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(
        client.read_03(1, 0, 3).await.unwrap(),
        vec![0x000A, 0x000B, 0x000C]
    );
    client.write_06(1, 5, 0x0042).await.unwrap();
    assert_eq!(client.read_03(1, 5, 1).await.unwrap(), vec![0x0042]);

    client.close().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn udp_exchange_with_concurrent_masters() {
    let mut server = ModbusUdpServer::new("127.0.0.1:0".parse().unwrap(), primed_handler());
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap().to_string();

    let mut first = ModbusUdpClient::connect(&addr, Duration::from_secs(1))
        .await
        .unwrap();
    let mut second = ModbusUdpClient::connect(&addr, Duration::from_secs(1))
        .await
        .unwrap();

    // Advance the first master's transaction counter so the concurrent
    // requests below carry distinct ids - the id is the only correlation
    // token the slave has.
    assert_eq!(first.read_03(1, 2, 1).await.unwrap(), vec![0x000C]);

    let (a, b) = tokio::join!(first.read_03(1, 0, 1), second.read_03(1, 1, 1));
    assert_eq!(a.unwrap(), vec![0x000A]);
    assert_eq!(b.unwrap(), vec![0x000B]);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn silent_slave_times_out_after_retries() {
    // A listener that accepts and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let hold = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
    });

    let mut client = ModbusTcpClient::connect(&addr, Duration::from_secs(1))
        .await
        .unwrap();
    client.set_timeout(Duration::from_millis(200));
    client.set_retries(2);

    let started = Instant::now();
    let err = client.read_03(1, 0, 1).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ModbusError::Timeout { .. }));
    // Three attempts at 200 ms each.
    assert!(elapsed >= Duration::from_millis(550), "gave up early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "gave up late: {:?}", elapsed);
    hold.abort();
}

#[tokio::test]
async fn stale_transaction_id_is_skipped() {
    // A hand-rolled slave that answers with a bogus transaction id first.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let slave = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 12];
        socket.read_exact(&mut request).await.unwrap();
        let txid = u16::from_be_bytes([request[0], request[1]]);

        let response_pdu = [0x03u8, 0x02, 0x00, 0x2A];
        let mut stale = Vec::new();
        stale.extend_from_slice(&(txid.wrapping_add(7)).to_be_bytes());
        stale.extend_from_slice(&[0x00, 0x00, 0x00, 0x06, 0x01]);
        stale.extend_from_slice(&response_pdu);
        socket.write_all(&stale).await.unwrap();

        let mut good = Vec::new();
        good.extend_from_slice(&txid.to_be_bytes());
        good.extend_from_slice(&[0x00, 0x00, 0x00, 0x06, 0x01]);
        good.extend_from_slice(&response_pdu);
        socket.write_all(&good).await.unwrap();
    });

    let mut client = ModbusTcpClient::connect(&addr, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(client.read_03(1, 0, 1).await.unwrap(), vec![0x002A]);
    slave.await.unwrap();
}

#[tokio::test]
async fn master_reconnects_after_fatal_error() {
    let mut server = started_server(loopback_config()).await;
    let addr = server.local_addr().unwrap().to_string();
    let mut client = ModbusTcpClient::connect(&addr, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(client.read_03(1, 0, 1).await.unwrap(), vec![0x000A]);

    // Bounce the listener; the established connection dies with it.
    server.stop().await.unwrap();
    let mut server = started_server(ModbusTcpServerConfig {
        bind_address: addr.parse().unwrap(),
        ..Default::default()
    })
    .await;

    // First call after the bounce fails fatally, the next one reconnects.
    let first = client.read_03(1, 0, 1).await;
    if first.is_err() {
        assert!(!client.is_connected());
        assert_eq!(client.read_03(1, 0, 1).await.unwrap(), vec![0x000A]);
    } else {
        assert_eq!(first.unwrap(), vec![0x000A]);
    }

    client.close().await.unwrap();
    server.stop().await.unwrap();
}
