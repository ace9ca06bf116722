//! Persisted table of configured switches.
//!
//! The whole table sits behind one exclusive lock. Every mutation rewrites the
//! backing document while that lock is still held, so writers serialize on file
//! I/O as well as on memory.

use crate::config::StoreConfig;
use crate::crypto::MiioCipher;
use crate::error::{MiioError, Result};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration and cached state of one physical switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Network address of the plug (IP or host name)
    #[serde(rename = "ip")]
    pub address: String,
    /// 16-byte token, hex encoded
    pub token: String,
    /// Vendor display name
    pub name: String,
    #[serde(rename = "devicetype", default)]
    pub device_type: String,
    #[serde(default)]
    pub number: u32,
    #[serde(rename = "uniqueid", default)]
    pub unique_id: String,
    #[serde(default)]
    pub id: u32,
    /// Overrides `name` when non-empty
    #[serde(rename = "customname", default)]
    pub custom_name: String,
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
    #[serde(default)]
    pub step: i64,
    #[serde(rename = "canwrite", default)]
    pub can_write: bool,
    /// Last known value (0/1 for on/off switches)
    #[serde(default)]
    pub value: i64,
}

impl DeviceRecord {
    pub fn display_name(&self) -> &str {
        if self.custom_name.is_empty() {
            &self.name
        } else {
            &self.custom_name
        }
    }

    /// Ranged switches (`max > 1`) cannot be read as on/off.
    pub fn is_binary(&self) -> bool {
        self.max <= 1
    }

    pub fn cipher(&self) -> Result<MiioCipher> {
        MiioCipher::from_hex(&self.token)
    }
}

/// The persisted document: `{"connected": bool, "devices": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCollection {
    #[serde(default)]
    pub connected: bool,
    pub devices: Vec<DeviceRecord>,
}

impl DeviceCollection {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let collection: Self = serde_json::from_slice(data)?;
        if collection.devices.is_empty() {
            return Err(MiioError::Load("no devices configured".into()));
        }
        for (i, device) in collection.devices.iter().enumerate() {
            if let Err(e) = device.cipher() {
                warn!("Switch {} ({}) has an unusable token: {}", i, device.name, e);
            }
        }
        Ok(collection)
    }

    /// Serialize with four-space indentation.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        Ok(out)
    }
}

/// Backing store for the device table document.
pub trait Storage: Send + Sync {
    fn read(&self) -> std::io::Result<Vec<u8>>;
    fn write(&self, data: &[u8]) -> std::io::Result<()>;
}

/// Plain file on disk. Writes replace the file in place and are not crash-atomic.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn read(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    fn write(&self, data: &[u8]) -> std::io::Result<()> {
        std::fs::write(&self.path, data)
    }
}

/// In-memory document, counting how many times it was written.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<Option<Vec<u8>>>,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(Some(data)),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.data.lock().clone()
    }
}

impl Storage for MemoryStorage {
    fn read(&self) -> std::io::Result<Vec<u8>> {
        self.data
            .lock()
            .clone()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "empty storage"))
    }

    fn write(&self, data: &[u8]) -> std::io::Result<()> {
        *self.data.lock() = Some(data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    fn read(&self) -> std::io::Result<Vec<u8>> {
        (**self).read()
    }

    fn write(&self, data: &[u8]) -> std::io::Result<()> {
        (**self).write(data)
    }
}

/// Authoritative device table. Share one instance through an `Arc`.
pub struct DeviceStore {
    collection: Mutex<DeviceCollection>,
    storage: Box<dyn Storage>,
}

impl DeviceStore {
    /// Load the table from the file named in `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::with_storage(FileStorage::new(&config.path))
    }

    /// Load the table from `storage`. Fails if the document is absent, unparsable or empty.
    pub fn with_storage<S: Storage + 'static>(storage: S) -> Result<Self> {
        let collection = Self::read_collection(&storage)?;
        info!("Loaded {} switches", collection.devices.len());
        Ok(Self {
            collection: Mutex::new(collection),
            storage: Box::new(storage),
        })
    }

    fn read_collection(storage: &dyn Storage) -> Result<DeviceCollection> {
        let data = storage.read().map_err(|e| MiioError::Load(e.to_string()))?;
        DeviceCollection::from_slice(&data).map_err(|e| match e {
            MiioError::Load(_) => e,
            other => MiioError::Load(other.to_string()),
        })
    }

    /// Re-read the backing document. On failure the current table is kept and `false` returned.
    pub fn load(&self) -> bool {
        let mut guard = self.collection.lock();
        match Self::read_collection(self.storage.as_ref()) {
            Ok(collection) => {
                *guard = collection;
                true
            }
            Err(e) => {
                warn!("Reload of device table failed: {}", e);
                false
            }
        }
    }

    /// Write the current table to the backing store.
    pub fn save(&self) -> Result<()> {
        let guard = self.collection.lock();
        self.persist(&guard)
    }

    // Callers hold the collection lock.
    fn persist(&self, collection: &DeviceCollection) -> Result<()> {
        let data = collection
            .to_vec()
            .map_err(|e| MiioError::Persistence(e.to_string()))?;
        self.storage.write(&data).map_err(|e| {
            error!("Failed to save device table: {}", e);
            MiioError::Persistence(e.to_string())
        })
    }

    fn with_device<R>(&self, id: usize, f: impl FnOnce(&DeviceRecord) -> R) -> Result<R> {
        let guard = self.collection.lock();
        let count = guard.devices.len();
        guard
            .devices
            .get(id)
            .map(f)
            .ok_or(MiioError::InvalidSwitchId { id, count })
    }

    /// Apply `f` to one record, then persist. A failed save keeps the change in memory.
    fn update_device(&self, id: usize, f: impl FnOnce(&mut DeviceRecord)) -> Result<()> {
        let mut guard = self.collection.lock();
        let count = guard.devices.len();
        let device = guard
            .devices
            .get_mut(id)
            .ok_or(MiioError::InvalidSwitchId { id, count })?;
        f(device);
        self.persist(&guard)
    }

    pub fn get(&self, id: usize) -> Result<DeviceRecord> {
        self.with_device(id, DeviceRecord::clone)
    }

    pub fn set_value(&self, id: usize, value: i64) -> Result<()> {
        self.update_device(id, |d| d.value = value)
    }

    /// Update the cached value without persisting. Pair with [`save`](Self::save).
    pub fn cache_value(&self, id: usize, value: i64) -> Result<()> {
        let mut guard = self.collection.lock();
        let count = guard.devices.len();
        let device = guard
            .devices
            .get_mut(id)
            .ok_or(MiioError::InvalidSwitchId { id, count })?;
        device.value = value;
        Ok(())
    }

    pub fn set_name(&self, id: usize, name: &str) -> Result<()> {
        self.update_device(id, |d| d.custom_name = name.to_string())
    }

    /// Set the global connected flag and persist. Returns the previous value.
    pub fn set_connected(&self, connected: bool) -> Result<bool> {
        let mut guard = self.collection.lock();
        let previous = std::mem::replace(&mut guard.connected, connected);
        self.persist(&guard).map(|()| previous)
    }

    pub fn connected(&self) -> bool {
        self.collection.lock().connected
    }

    /// Cached on/off state of a binary switch.
    pub fn power(&self, id: usize) -> Result<bool> {
        self.with_device(id, |d| {
            if d.is_binary() {
                Ok(d.value != 0)
            } else {
                Err(MiioError::NotBinarySwitch(id))
            }
        })?
    }

    pub fn display_name(&self, id: usize) -> Result<String> {
        self.with_device(id, |d| d.display_name().to_string())
    }

    /// Snapshot copy of all records.
    pub fn list(&self) -> Vec<DeviceRecord> {
        self.collection.lock().devices.clone()
    }

    pub fn len(&self) -> usize {
        self.collection.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::sample_collection;
    use std::sync::Arc;

    fn memory_store(n: usize) -> (DeviceStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new(
            sample_collection(n, "127.0.0.1").to_vec().unwrap(),
        ));
        let store = DeviceStore::with_storage(storage.clone()).unwrap();
        (store, storage)
    }

    struct FailingWrites(MemoryStorage);

    impl Storage for FailingWrites {
        fn read(&self) -> std::io::Result<Vec<u8>> {
            self.0.read()
        }

        fn write(&self, _data: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
    }

    #[test]
    fn loads_reference_document() {
        let doc = br#"{
            "connected": true,
            "devices": [{
                "ip": "192.168.1.20",
                "token": "000102030405060708090a0b0c0d0e0f",
                "name": "Mi Smart Plug",
                "devicetype": "chuangmi.plug.m1",
                "number": 0,
                "uniqueid": "a1b2",
                "id": 0,
                "customname": "",
                "min": 0,
                "max": 1,
                "step": 1,
                "canwrite": true,
                "value": 1
            }]
        }"#;
        let store = DeviceStore::with_storage(MemoryStorage::new(doc.to_vec())).unwrap();
        assert!(store.connected());
        assert_eq!(store.len(), 1);
        let record = store.get(0).unwrap();
        assert_eq!(record.address, "192.168.1.20");
        assert_eq!(record.device_type, "chuangmi.plug.m1");
        assert!(store.power(0).unwrap());
    }

    #[test]
    fn missing_or_broken_document_fails_to_load() {
        let err = DeviceStore::with_storage(MemoryStorage::default()).err().unwrap();
        assert!(matches!(err, MiioError::Load(_)));
        assert!(!err.is_retryable());

        let err = DeviceStore::with_storage(MemoryStorage::new(b"{not json".to_vec()))
            .err()
            .unwrap();
        assert!(matches!(err, MiioError::Load(_)));

        let err = DeviceStore::with_storage(MemoryStorage::new(
            br#"{"connected":false,"devices":[]}"#.to_vec(),
        ))
        .err()
        .unwrap();
        assert!(matches!(err, MiioError::Load(_)));
    }

    #[test]
    fn out_of_range_id_is_configuration_error() {
        let (store, storage) = memory_store(6);
        let err = store.get(6).unwrap_err();
        assert!(matches!(err, MiioError::InvalidSwitchId { id: 6, count: 6 }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(store.set_value(99, 1).is_err());
        assert_eq!(storage.writes(), 0);
    }

    #[test]
    fn every_mutation_rewrites_document() {
        let (store, storage) = memory_store(3);
        store.set_value(1, 1).unwrap();
        store.set_name(2, "Telescope").unwrap();
        store.set_connected(true).unwrap();
        assert_eq!(storage.writes(), 3);

        let saved = DeviceCollection::from_slice(&storage.contents().unwrap()).unwrap();
        assert!(saved.connected);
        assert_eq!(saved.devices[1].value, 1);
        assert_eq!(saved.devices[2].custom_name, "Telescope");
    }

    #[test]
    fn cache_value_waits_for_save() {
        let (store, storage) = memory_store(2);
        store.cache_value(0, 1).unwrap();
        assert_eq!(storage.writes(), 0);
        assert!(store.power(0).unwrap());
        store.save().unwrap();
        assert_eq!(storage.writes(), 1);
    }

    #[test]
    fn custom_name_overrides_display_name() {
        let (store, _) = memory_store(1);
        assert_eq!(store.display_name(0).unwrap(), "Plug 0");
        store.set_name(0, "Dew heater").unwrap();
        assert_eq!(store.display_name(0).unwrap(), "Dew heater");
        store.set_name(0, "").unwrap();
        assert_eq!(store.display_name(0).unwrap(), "Plug 0");
    }

    #[test]
    fn ranged_switch_is_not_readable_as_power() {
        let mut collection = sample_collection(2, "127.0.0.1");
        collection.devices[1].max = 100;
        let store =
            DeviceStore::with_storage(MemoryStorage::new(collection.to_vec().unwrap())).unwrap();
        assert!(matches!(store.power(1), Err(MiioError::NotBinarySwitch(1))));
    }

    #[test]
    fn failed_save_is_surfaced_and_change_kept() {
        let data = sample_collection(2, "127.0.0.1").to_vec().unwrap();
        let store = DeviceStore::with_storage(FailingWrites(MemoryStorage::new(data))).unwrap();

        let err = store.set_value(0, 1).unwrap_err();
        assert!(matches!(err, MiioError::Persistence(_)));
        assert!(err.is_retryable());
        assert_eq!(store.get(0).unwrap().value, 1);
    }

    #[test]
    fn reload_keeps_table_on_failure() {
        let (store, storage) = memory_store(2);
        store.set_value(0, 1).unwrap();
        assert!(store.load());
        assert_eq!(store.get(0).unwrap().value, 1);

        storage.write(b"garbage").unwrap();
        assert!(!store.load());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn list_is_a_snapshot() {
        let (store, _) = memory_store(2);
        let snapshot = store.list();
        store.set_value(0, 1).unwrap();
        assert_eq!(snapshot[0].value, 0);
        assert_eq!(store.list()[0].value, 1);
    }

    #[test]
    fn concurrent_writers_serialize() {
        let (store, storage) = memory_store(6);
        std::thread::scope(|s| {
            for id in 0..6 {
                let store = &store;
                s.spawn(move || {
                    for _ in 0..20 {
                        store.set_value(id, 1).unwrap();
                        store.set_value(id, 0).unwrap();
                    }
                    store.set_value(id, 1).unwrap();
                });
            }
        });
        assert_eq!(storage.writes(), 6 * 41);
        let saved = DeviceCollection::from_slice(&storage.contents().unwrap()).unwrap();
        assert!(saved.devices.iter().all(|d| d.value == 1));
    }

    #[test]
    fn file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, sample_collection(2, "10.0.0.5").to_vec().unwrap()).unwrap();

        let store = DeviceStore::open(&StoreConfig::new(&path)).unwrap();
        store.set_name(1, "Focuser").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    \"connected\""));
        assert!(text.contains("\"customname\": \"Focuser\""));
        assert!(text.contains("\"ip\": \"10.0.0.5\""));

        let reopened = DeviceStore::open(&StoreConfig::new(&path)).unwrap();
        assert_eq!(reopened.display_name(1).unwrap(), "Focuser");
    }

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let err = DeviceStore::open(&StoreConfig::new(dir.path().join("absent.json")))
            .err()
            .unwrap();
        assert!(matches!(err, MiioError::Load(_)));
    }
}
