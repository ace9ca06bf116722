//! Power control over the configured switches.
//! Resolves records from the [`DeviceStore`], drives the [`ProtocolClient`] and writes results back.

use crate::client::ProtocolClient;
use crate::error::Result;
use crate::store::{DeviceRecord, DeviceStore};
use log::{debug, info, warn};
use std::sync::Arc;

/// Outcome of a [`PowerController::query_all`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySummary {
    /// Switches whose cached value was refreshed from hardware
    pub updated: Vec<usize>,
    /// Switches that could not be queried and kept their cached value
    pub failed: Vec<usize>,
}

/// Switch ids are 0-based positions in the device table on every path.
#[derive(Clone)]
pub struct PowerController {
    store: Arc<DeviceStore>,
    client: ProtocolClient,
}

impl PowerController {
    pub fn new(store: Arc<DeviceStore>, client: ProtocolClient) -> Self {
        Self { store, client }
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.store
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    /// Startup refresh of every cached value from hardware.
    pub async fn init(&self) -> Result<QuerySummary> {
        self.query_all().await
    }

    /// Switch a plug on or off.
    ///
    /// The cached value is updated once the command has been sent, whether or not
    /// the plug acknowledged it.
    pub async fn set_power(&self, id: usize, on: bool) -> Result<()> {
        let record = self.store.get(id)?;
        let cipher = record.cipher()?;

        self.client.set_power(&record.address, &cipher, on).await?;
        info!("Set switch {} ({}) to {}", id, record.display_name(), on);

        self.store.set_value(id, i64::from(on))
    }

    /// Ask the plug for its power state. Does not touch the cache.
    pub async fn query_power(&self, id: usize) -> Result<bool> {
        let record = self.store.get(id)?;
        self.query_record(&record).await
    }

    /// Cached power state, without contacting hardware.
    pub fn get_power(&self, id: usize) -> Result<bool> {
        self.store.power(id)
    }

    /// Query every switch in order and refresh the cache, saving once at the end.
    ///
    /// A switch that fails to answer keeps its previous value. Only the final save
    /// can make this return an error.
    pub async fn query_all(&self) -> Result<QuerySummary> {
        info!("Querying actual state from all devices...");
        let mut summary = QuerySummary::default();

        for (id, record) in self.store.list().iter().enumerate() {
            match self.query_record(record).await {
                Ok(on) => match self.store.cache_value(id, i64::from(on)) {
                    Ok(()) => {
                        info!("Switch {} ({}): {}", id, record.display_name(), on);
                        summary.updated.push(id);
                    }
                    Err(e) => {
                        warn!("Switch {} vanished during refresh: {}", id, e);
                        summary.failed.push(id);
                    }
                },
                Err(e) => {
                    warn!(
                        "Failed to query switch {} ({}): {} - keeping cached value",
                        id,
                        record.display_name(),
                        e
                    );
                    summary.failed.push(id);
                }
            }
        }

        self.store.save()?;
        info!(
            "Device state query complete ({} updated, {} failed)",
            summary.updated.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    async fn query_record(&self, record: &DeviceRecord) -> Result<bool> {
        let cipher = record.cipher()?;
        self.client.query_power(&record.address, &cipher).await
    }

    pub fn get_device_record(&self, id: usize) -> Result<DeviceRecord> {
        self.store.get(id)
    }

    pub fn set_custom_name(&self, id: usize, name: &str) -> Result<()> {
        self.store.set_name(id, name)
    }

    pub fn connected(&self) -> bool {
        self.store.connected()
    }

    /// Persist the connected flag; a false → true transition refreshes all switches.
    pub async fn set_connected(&self, connected: bool) -> Result<()> {
        let was_connected = self.store.set_connected(connected)?;
        if connected && !was_connected {
            self.query_all().await?;
        } else {
            debug!("Connected flag set to {} (was {})", connected, was_connected);
        }
        Ok(())
    }

    /// Number of (on/off, ranged) switches in the table.
    ///
    /// Ranged switches are only counted; they cannot be read or written as power.
    pub fn switch_counts(&self) -> (usize, usize) {
        let devices = self.store.list();
        let binary = devices.iter().filter(|d| d.is_binary()).count();
        (binary, devices.len() - binary)
    }
}
