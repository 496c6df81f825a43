//! License session example
//!
//! Demonstrates:
//! - Connecting and authorizing with a license key
//! - Switching the display unit
//! - Driving the buzzer
//! - Releasing the license before disconnecting
//!
//! Run with: cargo run --example license_session -- --id <scale-id> --key <license-key>

use kgiton_rust_ble::{BuzzerMode, Error, Result, ScaleConfig, ScaleService, WeightUnit};
use std::time::Duration;

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,kgiton_rust_ble=info")
        .init();

    let args: Vec<String> = std::env::args().collect();
    let missing = |flag: &str| Error::InvalidParameter {
        name: flag.to_string(),
        value: "<missing>".to_string(),
    };
    let id = arg_value(&args, "--id").ok_or_else(|| missing("--id"))?;
    let key = arg_value(&args, "--key").ok_or_else(|| missing("--key"))?;

    let service = ScaleService::with_btleplug(ScaleConfig::default()).await?;
    service.initialize().await?;

    match service.connect_with_license(&id, &key).await {
        Ok(outcome) => println!("Authorized: {}", outcome.message_or_default()),
        Err(Error::LicenseRejected { message }) => {
            println!("License rejected: {}", message);
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    let mut weights = service.subscribe_weight();
    tokio::spawn(async move {
        while let Ok(sample) = weights.recv().await {
            println!("  {:.3} kg{}", sample.to_kg(), if sample.is_stable { "" } else { " ~" });
        }
    });

    service.set_unit(WeightUnit::Pound).await?;
    service.set_buzzer(BuzzerMode::Beep).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;
    service.set_unit(WeightUnit::Kilogram).await?;

    let outcome = service.deauthorize_license(&key).await?;
    println!("Released: {}", outcome.message_or_default());

    service.shutdown().await?;
    Ok(())
}
