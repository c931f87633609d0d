//! Print hub version, filter settings and the devices found by discovery.
//!
//! ```bash
//! cargo run --example hub_info
//! ```

use std::time::Duration;

use neuroplay_pro::{HubClient, HubConfig, HubEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = HubConfig::discover(None)?;
    let client = HubClient::spawn(config);
    let mut events = client.subscribe();
    client.open().await?;

    // Give the handshake and one discovery window time to finish.
    let deadline = tokio::time::sleep(Duration::from_secs(7));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            event = events.recv() => match event {
                Ok(HubEvent::DeviceDiscovered { id, info }) => {
                    println!("Found {id}: {} ({}, sn {})", info.name, info.model, info.serial_number);
                }
                Ok(HubEvent::Disconnected) | Err(_) => break,
                Ok(_) => {}
            },
        }
    }

    let filters = client.filters().await?;
    println!("Hub version: {}", client.version().await?);
    println!(
        "Filters: LPF {} Hz, HPF {} Hz, BSF {} Hz",
        filters.low_pass, filters.high_pass, filters.band_stop
    );
    for device in client.devices().await? {
        println!(
            "{} {} connected={} started={}",
            device.id, device.info.name, device.connected, device.started
        );
    }

    client.close().await?;
    Ok(())
}
