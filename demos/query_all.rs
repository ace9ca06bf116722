/**
 * Refresh Example
 *
 * Loads the switch table, queries every plug for its real power state and
 * prints the refreshed table. Pass the settings file path as the first argument
 * (defaults to settings.json). Set RUST_LOG=debug to see the wire exchange.
 */
use miswitch::{DeviceStore, PowerController, ProtocolClient, StoreConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("--- miswitch - Query All ---");

    // 1. Load the table. There is nothing to do without it.
    let config = std::env::args()
        .nth(1)
        .map(StoreConfig::new)
        .unwrap_or_default();
    let store = match DeviceStore::open(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("[ERROR] {}: {}", config.path.display(), e);
            std::process::exit(1);
        }
    };

    // 2. Refresh every switch from hardware
    let controller = PowerController::new(store, ProtocolClient::new());
    match controller.query_all().await {
        Ok(summary) => println!(
            "[INFO] {} updated, {} kept cached value",
            summary.updated.len(),
            summary.failed.len()
        ),
        Err(e) => eprintln!("[ERROR] Refresh finished but could not be saved: {}", e),
    }

    // 3. Print the table
    for (id, record) in controller.store().list().iter().enumerate() {
        println!(
            "[{}] {:<24} {:<16} {}",
            id,
            record.display_name(),
            record.address,
            if record.value != 0 { "on" } else { "off" }
        );
    }
}
