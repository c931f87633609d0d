//! # neuroplay-pro
//!
//! A Rust client for the NeuroplayPro device hub: a local process that owns
//! EEG acquisition hardware and speaks a JSON command protocol over a plain
//! WebSocket (`ws://localhost:1336` by default).
//!
//! The crate discovers devices, starts and stops them, and turns the hub's
//! request/response protocol into streams of filtered and raw samples,
//! spectra, band rhythms and meditation/concentration scores.
//!
//! ## Quick Start
//!
//! ```no_run
//! use neuroplay_pro::{GrabKind, HubClient, HubConfig, HubEvent};
//!
//! #[tokio::main]
//! async fn main() -> neuroplay_pro::NeuroplayResult<()> {
//!     let config = HubConfig::discover(None)?;
//!     let client = HubClient::spawn(config);
//!     let mut events = client.subscribe();
//!     client.open().await?;
//!
//!     // The hub reports its running device, or discovery finds one.
//!     let device = loop {
//!         match events.recv().await {
//!             Ok(HubEvent::DeviceReady(id)) => break id,
//!             Ok(HubEvent::DeviceDiscovered { id, info }) => {
//!                 println!("found {}", info.name);
//!                 client.start_device(id, None).await?;
//!             }
//!             Ok(_) => {}
//!             Err(_) => return Ok(()),
//!         }
//!     };
//!
//!     client.set_grab(device, GrabKind::FilteredData, true).await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     let data = client.read_filtered_data_history(device).await?;
//!     println!("{} channels", data.len());
//!
//!     client.close().await
//! }
//! ```
//!
//! ## Layers
//!
//! | Layer | Type | I/O | Best for |
//! |-------|------|-----|----------|
//! | Protocol state machine | [`HubConnection`] | None | Tests, custom transports |
//! | Async handle | [`HubClient`] | WebSocket + timers | Applications |
//!
//! ## Configuration
//!
//! See [`HubConfig`]. Without a config file the defaults match a stock hub;
//! `NEUROPLAY_HUB_URL` overrides the endpoint:
//!
//! ```toml
//! hub_url = "ws://localhost:1336"
//!
//! [timings]
//! grab_interval_ms = 50
//! ```

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod timer;

// ─── Public re-exports ──────────────────────────────────────────────────

pub use client::{DeviceEvents, HubClient};
pub use config::HubConfig;
pub use device::{DeviceControl, DeviceSession, DeviceStatus, GrabFlags, GrabKind};
pub use error::{NeuroplayError, NeuroplayResult};
pub use events::{DeviceEvent, HubEvent};
pub use hub::{HubConnection, HubState};
pub use protocol::{
    ChannelMode, ChannelsData, ChannelsRhythms, DeviceInfo, FilterSettings, Rhythms, TimedValue,
};
pub use registry::DeviceId;
