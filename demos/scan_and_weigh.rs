//! Scan and weigh example
//!
//! Demonstrates:
//! - Discovering nearby KGiTON scales
//! - Connecting to the strongest one
//! - Printing live weight samples
//! - Taring the scale
//!
//! Run with: cargo run --example scan_and_weigh
//!
//! To connect to a specific scale:
//!   cargo run --example scan_and_weigh -- --id AA:BB:CC:DD:EE:FF

use kgiton_rust_ble::{Error, Result, ScaleConfig, ScaleService};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,kgiton_rust_ble=debug")
        .init();

    println!("KGiTON Scan and Weigh");
    println!("=====================\n");

    let args: Vec<String> = std::env::args().collect();
    let target_id = args
        .iter()
        .position(|arg| arg == "--id")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let service = ScaleService::with_btleplug(ScaleConfig::default()).await?;
    service.initialize().await?;

    service.on_state_change(|state| println!("[state] {}", state.state));

    println!("Scanning for scales...\n");
    service
        .start_scan(
            |scale| {
                println!(
                    "  Found {} ({}) rssi={:?}",
                    scale.display_name(),
                    scale.id,
                    scale.rssi
                )
            },
            service.scan_options().with_timeout(Duration::from_secs(10)),
        )
        .await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    service.stop_scan().await;

    let scale = match target_id {
        Some(id) => service
            .discovered_devices()
            .into_iter()
            .find(|d| d.id == id)
            .ok_or(Error::DeviceNotFound { identifier: id })?,
        None => service
            .discovered_devices()
            .into_iter()
            .max_by_key(|d| d.rssi.unwrap_or(i16::MIN))
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: "any".to_string(),
            })?,
    };

    println!("\nConnecting to {}...", scale.display_name());
    service.on_weight(|sample| println!("  {}", sample));
    service.connect(&scale.id).await?;

    let outcome = service.tare().await?;
    println!("Tare: {}\n", outcome.message_or_default());

    println!("Weighing for 20 seconds (Ctrl+C to stop)...\n");
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(20)) => {}
        _ = tokio::signal::ctrl_c() => println!("\nInterrupted"),
    }

    service.shutdown().await?;
    println!("Done.");
    Ok(())
}
