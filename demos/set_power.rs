/**
 * Power Control Example
 *
 * Switches one plug on or off, then asks it for its actual state.
 *
 * Usage: set_power <switch id> <on|off> [settings.json]
 */
use miswitch::{DeviceStore, PowerController, ProtocolClient, StoreConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("--- miswitch - Set Power ---");

    let args: Vec<String> = std::env::args().collect();
    let (Some(id), Some(state)) = (
        args.get(1).and_then(|a| a.parse::<usize>().ok()),
        args.get(2).map(|s| s == "on"),
    ) else {
        eprintln!("Usage: set_power <switch id> <on|off> [settings.json]");
        std::process::exit(2);
    };
    let config = args.get(3).map(StoreConfig::new).unwrap_or_default();

    let store = match DeviceStore::open(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("[ERROR] {}: {}", config.path.display(), e);
            std::process::exit(1);
        }
    };
    let controller = PowerController::new(store, ProtocolClient::new());

    // 1. Send the command. No ack is required.
    println!("[STEP 1] Switching {} {}...", id, if state { "ON" } else { "OFF" });
    if let Err(e) = controller.set_power(id, state).await {
        eprintln!("[ERROR] Control failed ({:?}): {}", e.kind(), e);
        std::process::exit(1);
    }

    // 2. Read back the real state from the plug
    println!("[STEP 2] Querying switch {}...", id);
    match controller.query_power(id).await {
        Ok(on) => println!("[SUCCESS] Switch {} is {}", id, if on { "on" } else { "off" }),
        Err(e) => eprintln!("[ERROR] Query failed: {}", e),
    }
}
