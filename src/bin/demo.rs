//! Relay Modbus Demo
//!
//! Spins up a loopback slave with a primed process image, then drives it with
//! the TCP master through the supported function codes.
//!
//! Usage: cargo run --bin demo [bind_address]
//! Example: cargo run --bin demo 127.0.0.1:15502

use std::sync::Arc;
use std::time::Duration;

use relay_modbus::{
    ModbusClient, ModbusHandler, ModbusServer, ModbusTcpClient, ModbusTcpServer,
    ModbusTcpServerConfig, ProcessImage, UnitImage,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("{}", relay_modbus::info());
    println!("==============================================\n");

    let bind_address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:15502".to_string());

    // =========================================================================
    // Part 1: bring up a slave with a primed process image
    // =========================================================================
    println!("🏭 Part 1: Slave");
    println!("----------------");

    let mut image = ProcessImage::new();
    let unit = image.add_unit(1, UnitImage::new(64, 64, 32, 32).with_fifo(0x0000, vec![]));
    for (address, value) in [(0u16, 0x000Au16), (1, 0x000B), (2, 0x000C)] {
        unit.set_holding(address, value)?;
    }
    unit.set_input(0, 0x4242)?;
    unit.set_holding(4, 0x0012)?;
    unit.push_fifo(0x0000, 0x01B8);
    unit.push_fifo(0x0000, 0x1284);
    unit.add_observer(Arc::new(|address, function, value| {
        println!("  [observer] {} wrote 0x{:04X} at {}", function, value, address);
    }));

    let handler = Arc::new(ModbusHandler::new(Arc::new(image)));
    let mut server = ModbusTcpServer::new(
        ModbusTcpServerConfig {
            bind_address: bind_address.parse()?,
            pool_size: 16,
            max_idle_seconds: 30,
            ..Default::default()
        },
        handler,
    );
    server.start().await?;
    let addr = server.local_addr().expect("server bound");
    println!("  listening on {}\n", addr);

    // =========================================================================
    // Part 2: master operations
    // =========================================================================
    println!("🔌 Part 2: Master");
    println!("-----------------");

    let mut client =
        ModbusTcpClient::connect(&addr.to_string(), Duration::from_secs(2)).await?;
    let slave = 1;

    let registers = client.read_03(slave, 0, 3).await?;
    println!("  FC03 holding 0-2: {:04X?}", registers);

    let inputs = client.read_04(slave, 0, 1).await?;
    println!("  FC04 input 0: {:04X?}", inputs);

    client.write_05(slave, 7, true).await?;
    let coils = client.read_01(slave, 0, 8).await?;
    let states: Vec<&str> = coils.iter().map(|&c| if c { "ON" } else { "OFF" }).collect();
    println!("  FC01 coils 0-7 after FC05: {:?}", states);

    client.write_10(slave, 8, &[0x1111, 0x2222]).await?;
    println!("  FC16 wrote registers 8-9");

    client.mask_write_16(slave, 4, 0x00F2, 0x0025).await?;
    let masked = client.read_03(slave, 4, 1).await?;
    println!("  FC22 mask write register 4: 0x0012 -> 0x{:04X}", masked[0]);

    let swapped = client
        .read_write_17(slave, 8, 2, 8, &[0xAAAA, 0xBBBB])
        .await?;
    println!("  FC23 write-then-read registers 8-9: {:04X?}", swapped);

    let fifo = client.read_fifo_18(slave, 0x0000).await?;
    println!("  FC24 fifo queue: {:04X?}", fifo);

    let identity = client.read_device_id_2b(slave, 1, 0).await?;
    for object in &identity {
        println!(
            "  FC43 object 0x{:02X}: {}",
            object.object_id,
            String::from_utf8_lossy(&object.value)
        );
    }

    // A read past the bank comes back as an exception.
    match client.read_03(slave, 9999, 1).await {
        Err(e) => println!("  FC03 out of range -> {}", e),
        Ok(_) => println!("  FC03 out of range unexpectedly succeeded"),
    }

    // =========================================================================
    // Part 3: statistics and shutdown
    // =========================================================================
    println!("\n📊 Part 3: Statistics");
    println!("---------------------");

    let stats = client.get_stats();
    println!(
        "  master: {} requests, {} responses, {} bytes out, {} bytes in",
        stats.requests_sent, stats.responses_received, stats.bytes_sent, stats.bytes_received
    );
    let stats = server.get_stats();
    println!(
        "  slave: {} connections, {} requests, {} responses, {} exceptions",
        stats.connections, stats.requests, stats.responses, stats.exceptions
    );

    client.close().await?;
    server.stop().await?;

    println!("\n🎉 Demo completed!");
    Ok(())
}
