// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # kgiton-rust-ble
//!
//! A cross-platform Rust library for talking to KGiTON weight scales over
//! Bluetooth Low Energy.
//!
//! ## Features
//!
//! - **Scale Discovery**: Find nearby scales by advertised name
//! - **Live Weight**: Decoded weight samples with stability and overload flags
//! - **Commands**: Tare, buzzer, display unit and calibration
//! - **Licensing**: Authorize a session with a license key
//! - **Auto-reconnect**: Bounded retries after an unexpected link loss
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kgiton_rust_ble::{Result, ScaleConfig, ScaleService};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let service = ScaleService::with_btleplug(ScaleConfig::default()).await?;
//!     service.initialize().await?;
//!
//!     // Scan for scales
//!     service
//!         .start_scan(|scale| println!("Found {}", scale), service.scan_options())
//!         .await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     service.stop_scan().await;
//!
//!     if let Some(scale) = service.discovered_devices().into_iter().next() {
//!         service.on_weight(|sample| println!("{}", sample));
//!         service.connect_with_license(&scale.id, "ABCDE-12345-FGHIJ").await?;
//!         service.tare().await?;
//!     }
//!
//!     service.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! Hosts with a runtime permission prompt supply their own
//! [`PermissionProvider`].
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod permissions;
pub mod protocol;
pub mod service;
pub mod utils;

// Re-exports for convenience
pub use config::ScaleConfig;
pub use error::{Error, Result};
pub use permissions::{AlwaysAuthorized, PermissionProvider};
pub use service::ScaleService;
pub use utils::{g_to_kg, kg_to_lb, lb_to_kg};

// Re-export commonly used types from submodules
pub use ble::connection::{ConnectionState, ScaleConnectionState};
pub use ble::reconnect::ReconnectPolicy;
pub use ble::scanner::ScanOptions;
pub use data::{ScaleDevice, WeightSample, WeightUnit};
pub use protocol::{BuzzerMode, CommandOutcome, ScaleCommand};
