//! Follow meditation and concentration of the running device.
//!
//! ```bash
//! cargo run --example mental_state
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use neuroplay_pro::{DeviceEvent, HubClient, HubConfig, HubEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let client = HubClient::spawn(HubConfig::discover(None)?);
    let mut events = client.subscribe();
    client.open().await?;

    let device = loop {
        if let HubEvent::DeviceReady(id) = events.recv().await? {
            break id;
        }
    };
    let mut device_events = client.device_events(device);

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                client.with_device(device, |d| d.request_bci()).await?;
            }
            event = device_events.next() => match event {
                Some(DeviceEvent::BciReady { meditation, concentration }) => {
                    println!("meditation {meditation:5.1}  concentration {concentration:5.1}");
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    client.close().await?;
    Ok(())
}
