// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra protocol client
//
//! # satel-integra
//!
//! Async client for Satel Integra alarm panels, talking the binary
//! integration protocol of the ETHM network module over TCP.
//!
//! The client keeps one persistent connection, mirrors the panel's
//! partition/zone/output state from the status frames it pushes, and sends
//! arm, disarm, clear-alarm, output and temperature commands with per-command
//! timeouts. Lost connections are re-established in the background.
//!
//! ## Quick Start
//!
//! ```no_run
//! use satel_integra::{AlarmState, PanelConfig, PanelEvent, SatelPanel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PanelConfig::builder()
//!         .host("192.168.1.50")
//!         .integration_key("secret")
//!         .partitions([1])
//!         .build();
//!
//!     let panel = SatelPanel::connect(config).await?;
//!
//!     let _sub = panel.subscribe_with(|event| {
//!         if let PanelEvent::StateChanged { kind } = event {
//!             println!("State changed: {:?}", kind);
//!         }
//!     });
//!
//!     if panel.alarm_state(1).await == Some(AlarmState::Triggered) {
//!         panel.disarm("1234", &[1]).await?;
//!     }
//!
//!     tokio::signal::ctrl_c().await?;
//!     panel.disconnect().await;
//!     Ok(())
//! }
//! ```

mod comm;

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod panel;
pub mod protocol;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use codec::FrameCodec;
pub use config::{ArmMode, PanelConfig, PanelConfigBuilder};
pub use constants::StatusKind;
pub use error::{ErrorKind, Result, ResultCode, SatelError};
pub use event::{EventReceiver, PanelEvent, Subscription};
pub use panel::SatelPanel;
pub use protocol::{Command, Frame, MonitorFlags, UserCode};
pub use state::{AlarmState, PartitionStateKind, TemperatureReading};
