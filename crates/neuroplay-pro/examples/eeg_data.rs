//! Start the first device found and print filtered EEG in grab mode.
//!
//! ```bash
//! NEUROPLAY_HUB_URL=ws://localhost:1336 cargo run --example eeg_data
//! ```

use std::time::Duration;

use neuroplay_pro::{GrabKind, HubClient, HubConfig, HubEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = HubConfig::discover(None)?;
    let client = HubClient::spawn(config);
    let mut events = client.subscribe();
    client.open().await?;

    let device = loop {
        match events.recv().await? {
            HubEvent::DeviceReady(id) => break id,
            HubEvent::DeviceDiscovered { id, info } => {
                println!("Starting {} ({})", info.name, info.model);
                client.start_device(id, None).await?;
            }
            HubEvent::Disconnected => return Err("hub closed the connection".into()),
            _ => {}
        }
    };

    client
        .set_grab(device, GrabKind::FilteredData, true)
        .await?;
    println!("Streaming filtered data. Press Ctrl+C to stop.");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let data = client.read_filtered_data_history(device).await?;
                let samples = data.first().map_or(0, Vec::len);
                let means: Vec<String> = data
                    .iter()
                    .map(|channel| channel.iter().sum::<f64>() / channel.len().max(1) as f64)
                    .map(|mean| format!("{mean:.2}"))
                    .collect();
                println!("{samples} samples, channel means [{}]", means.join(", "));
            }
        }
    }

    client.close().await?;
    Ok(())
}
