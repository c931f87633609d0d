use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use serde_json::json;

use neuroplay_pro::{DeviceEvent, DeviceId, GrabKind, HubClient, HubConfig};

use crate::StreamKind;
use crate::app::{CliResult, SETTLE_DELAY, Session, print_pretty_json};

/// How long `stoprecord` may take to return the files.
const RECORD_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Hub ────────────────────────────────────────────────────────────────

pub async fn cmd_info(config: HubConfig, show_commands: bool) -> CliResult<()> {
    let session = Session::connect(config).await?;
    tokio::time::sleep(SETTLE_DELAY).await;

    let (version, favorite, filters, storage_time, help) = session
        .client
        .with(|hub| {
            (
                hub.version().to_string(),
                hub.favorite_device_name().to_string(),
                hub.filters(),
                hub.data_storage_time(),
                hub.command_help(),
            )
        })
        .await?;

    println!("\nHub version:       {}", non_empty(&version));
    println!("Favorite device:   {}", non_empty(&favorite));
    println!(
        "Filters:           LPF {} Hz, HPF {} Hz, BSF {} Hz",
        filters.low_pass, filters.high_pass, filters.band_stop
    );
    println!("Data storage time: {storage_time} s");
    match session.client.current_device().await? {
        Some(device) => println!(
            "Running device:    {} ({}, {} channels max)",
            device.info.name, device.info.model, device.info.max_channels
        ),
        None => println!("Running device:    none"),
    }

    if show_commands {
        println!("\nCommands:\n{help}");
    }
    Ok(())
}

pub async fn cmd_devices(config: HubConfig, as_json: bool) -> CliResult<()> {
    let mut session = Session::connect(config).await?;
    println!("Searching for devices...");
    session.wait_until_ready().await?;

    let devices = session.client.devices().await?;
    if as_json {
        let listing: Vec<_> = devices
            .iter()
            .map(|d| {
                json!({
                    "id": d.id.0,
                    "connected": d.connected,
                    "started": d.started,
                    "info": d.info,
                })
            })
            .collect();
        print_pretty_json(&serde_json::Value::Array(listing));
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }
    println!(
        "\n{:<4} {:<20} {:<18} {:<14} {:<9} MODES",
        "ID", "NAME", "MODEL", "SERIAL", "STATE"
    );
    for device in devices {
        let state = match (device.started, device.connected) {
            (true, _) => "started",
            (false, true) => "connected",
            (false, false) => "gone",
        };
        println!(
            "{:<4} {:<20} {:<18} {:<14} {:<9} {}",
            device.id.to_string(),
            device.info.name,
            device.info.model,
            device.info.serial_number,
            state,
            device.info.channel_mode_labels().join(" ")
        );
    }
    Ok(())
}

pub async fn cmd_filters(
    config: HubConfig,
    lpf: Option<f64>,
    hpf: Option<f64>,
    bsf: Option<f64>,
    restore_default: bool,
) -> CliResult<()> {
    let session = Session::connect(config).await?;
    tokio::time::sleep(SETTLE_DELAY).await;

    if restore_default {
        session.client.set_default_filters().await?;
    } else if lpf.is_some() || hpf.is_some() || bsf.is_some() {
        session
            .client
            .with(move |hub| {
                if let Some(value) = lpf {
                    hub.set_lpf(value);
                }
                if let Some(value) = hpf {
                    hub.set_hpf(value);
                }
                if let Some(value) = bsf {
                    hub.set_bsf(value);
                }
            })
            .await?;
    }
    session.client.send_raw("getfilters").await?;
    tokio::time::sleep(SETTLE_DELAY).await;

    let filters = session.client.filters().await?;
    println!(
        "LPF {} Hz, HPF {} Hz, BSF {} Hz",
        filters.low_pass, filters.high_pass, filters.band_stop
    );
    Ok(())
}

pub async fn cmd_storage_time(config: HubConfig, seconds: u32) -> CliResult<()> {
    let session = Session::connect(config).await?;
    session.client.set_data_storage_time(seconds).await?;
    session.client.send_raw("getdatastoragetime").await?;
    tokio::time::sleep(SETTLE_DELAY).await;

    let stored = session.client.with(|hub| hub.data_storage_time()).await?;
    println!("Hub keeps {stored} s of data");
    Ok(())
}

// ─── Device ─────────────────────────────────────────────────────────────

pub struct StreamOptions {
    pub device: Option<String>,
    pub channels: Option<u32>,
    pub kind: StreamKind,
    pub seconds: Option<u64>,
    pub interval_ms: Option<u64>,
}

pub async fn cmd_stream(config: HubConfig, options: StreamOptions) -> CliResult<()> {
    let mut session = Session::connect(config).await?;
    let id = session
        .ready_device(options.device.as_deref(), options.channels)
        .await?;
    let client = session.client.clone();

    if let Some(ms) = options.interval_ms {
        client
            .set_grab_interval(id, Duration::from_millis(ms))
            .await?;
    }
    let kind = GrabKind::from(options.kind);
    client.set_grab(id, kind, true).await?;
    eprintln!("Streaming {:?}. Press Ctrl+C to stop.", options.kind);

    let stop = sleep_or_forever(options.seconds);
    tokio::pin!(stop);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = &mut stop => break,
            _ = ticker.tick() => print_batch(&client, id, kind).await?,
        }
    }

    client.set_grab(id, kind, false).await?;
    session.release().await;
    Ok(())
}

/// Drain one grab buffer and print it as a single JSON line.
async fn print_batch(client: &HubClient, id: DeviceId, kind: GrabKind) -> CliResult<()> {
    let line = match kind {
        GrabKind::FilteredData => json!({
            "kind": "filtered",
            "data": client.read_filtered_data_history(id).await?,
        }),
        GrabKind::RawData => json!({
            "kind": "raw",
            "data": client.read_raw_data_history(id).await?,
        }),
        GrabKind::RhythmsHistory => json!({
            "kind": "rhythms",
            "history": client.read_rhythms_history(id).await?,
        }),
        GrabKind::MeditationHistory => json!({
            "kind": "meditation",
            "history": client.read_meditation_history(id).await?,
        }),
        GrabKind::ConcentrationHistory => json!({
            "kind": "concentration",
            "history": client.read_concentration_history(id).await?,
        }),
    };
    println!("{line}");
    Ok(())
}

pub async fn cmd_watch(config: HubConfig, device: Option<String>, interval_ms: u64) -> CliResult<()> {
    let mut session = Session::connect(config).await?;
    let id = session.ready_device(device.as_deref(), None).await?;
    let client = session.client.clone();
    let mut events = client.device_events(id);

    println!("Watching meditation and concentration. Press Ctrl+C to stop.");
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => client.with_device(id, |d| d.request_bci()).await?,
            event = events.next() => match event {
                Some(DeviceEvent::BciReady { meditation, concentration }) => {
                    println!("meditation {meditation:5.1}  concentration {concentration:5.1}");
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    session.release().await;
    Ok(())
}

pub async fn cmd_record(
    config: HubConfig,
    device: Option<String>,
    seconds: u64,
    out: &Path,
) -> CliResult<()> {
    let mut session = Session::connect(config).await?;
    let id = session.ready_device(device.as_deref(), None).await?;
    let client = session.client.clone();
    let mut events = client.device_events(id);

    client.with_device(id, |d| d.start_record()).await?;
    println!("Recording for {seconds} s. Press Ctrl+C to stop early.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        () = tokio::time::sleep(Duration::from_secs(seconds)) => {}
    }
    client.with_device(id, |d| d.stop_record()).await?;

    let files = tokio::time::timeout(RECORD_REPLY_TIMEOUT, async {
        while let Some(event) = events.next().await {
            if let DeviceEvent::RecordedData { edf, npd } = event {
                return Some((edf, npd));
            }
        }
        None
    })
    .await;

    match files {
        Ok(Some((edf, npd))) => {
            std::fs::create_dir_all(out)?;
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs());
            for (extension, bytes) in [("edf", edf), ("npd", npd)] {
                if bytes.is_empty() {
                    continue;
                }
                let path = out.join(format!("neuroplay-{stamp}.{extension}"));
                std::fs::write(&path, &bytes)?;
                println!("Wrote {} ({} bytes)", path.display(), bytes.len());
            }
        }
        Ok(None) | Err(_) => eprintln!("The hub returned no recording."),
    }

    session.release().await;
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────

async fn sleep_or_forever(seconds: Option<u64>) {
    match seconds {
        Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
        None => std::future::pending().await,
    }
}

fn non_empty(value: &str) -> &str {
    if value.is_empty() { "(unknown)" } else { value }
}
