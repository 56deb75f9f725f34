//! Device and vendor-cache persistence.
//!
//! The core only talks to [`DeviceStore`] and [`VendorCache`]. [`MemoryStore`] and
//! [`MemoryVendorCache`] keep everything in process; [`SqliteStore`] implements both
//! traits with a `devices` and a `vendors` table.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::{Context, Result};
use dashmap::DashMap;
use rusqlite::{params, Connection};
use tracing::{debug, error};

use crate::classify::classify;
use crate::types::{DeviceRecord, DeviceType, UNKNOWN};

pub trait DeviceStore: Send + Sync {
    /// Insert or update the record keyed by `record.mac`.
    fn upsert(&self, record: DeviceRecord) -> Result<()>;

    fn get_all(&self) -> Result<Vec<DeviceRecord>>;

    /// Replace the open ports of the record currently at `ip` and re-derive its type.
    ///
    /// When several records claim the address, the most recently seen one wins.
    /// Returns `false` if no record has that address.
    fn replace_open_ports(&self, ip: IpAddr, ports: &BTreeSet<u16>) -> Result<bool>;
}

/// OUI prefix → vendor name. Entries never expire.
pub trait VendorCache: Send + Sync {
    fn get(&self, oui: &str) -> Option<String>;
    fn put(&self, oui: &str, vendor: &str);
}

fn upsert_into(devices: &mut BTreeMap<String, DeviceRecord>, record: DeviceRecord) {
    debug!(mac = %record.mac, ip = %record.ip, "upserting device");
    devices.insert(record.mac.clone(), record);
}

fn replace_ports_in(
    devices: &mut BTreeMap<String, DeviceRecord>,
    ip: IpAddr,
    ports: &BTreeSet<u16>,
) -> bool {
    let ip = ip.to_string();
    let owner = devices
        .values_mut()
        .filter(|d| d.ip == ip)
        .max_by(|a, b| a.last_seen.cmp(&b.last_seen));
    match owner {
        Some(device) => {
            device.open_ports = ports.clone();
            device.device_type = classify(&device.open_ports);
            true
        }
        None => false,
    }
}

/// Process-local device store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: RwLock<BTreeMap<String, DeviceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStore for MemoryStore {
    fn upsert(&self, record: DeviceRecord) -> Result<()> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        upsert_into(&mut devices, record);
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<DeviceRecord>> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        Ok(devices.values().cloned().collect())
    }

    fn replace_open_ports(&self, ip: IpAddr, ports: &BTreeSet<u16>) -> Result<bool> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        Ok(replace_ports_in(&mut devices, ip, ports))
    }
}

#[derive(Debug, Default)]
pub struct MemoryVendorCache {
    entries: DashMap<String, String>,
}

impl MemoryVendorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl VendorCache for MemoryVendorCache {
    fn get(&self, oui: &str) -> Option<String> {
        self.entries.get(oui).map(|v| v.value().clone())
    }

    fn put(&self, oui: &str, vendor: &str) {
        if vendor == UNKNOWN {
            return;
        }
        self.entries.insert(oui.to_string(), vendor.to_string());
    }
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS devices (
        mac TEXT PRIMARY KEY,
        ip TEXT NOT NULL,
        vendor TEXT NOT NULL,
        type TEXT NOT NULL,
        open_ports TEXT NOT NULL,
        metrics_urls TEXT NOT NULL,
        last_seen TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_devices_ip ON devices (ip);
    CREATE TABLE IF NOT EXISTS vendors (
        oui TEXT PRIMARY KEY,
        vendor TEXT NOT NULL
    );
";

/// Devices and vendor cache in one SQLite database.
///
/// `open_ports` and `metrics_urls` are stored as JSON arrays. The connection sits behind a
/// mutex and is never held across an await point.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create db directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open device store {}", path.display()))?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "device store opened");
        Ok(Self::with_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct DeviceRow {
    mac: String,
    ip: String,
    vendor: String,
    device_type: String,
    open_ports: String,
    metrics_urls: String,
    last_seen: String,
}

impl DeviceRow {
    fn into_record(self) -> Result<DeviceRecord> {
        let open_ports = serde_json::from_str(&self.open_ports)
            .with_context(|| format!("bad open_ports for {}", self.mac))?;
        let metrics_urls = serde_json::from_str(&self.metrics_urls)
            .with_context(|| format!("bad metrics_urls for {}", self.mac))?;
        Ok(DeviceRecord {
            device_type: DeviceType::from_label(&self.device_type),
            open_ports,
            metrics_urls,
            mac: self.mac,
            ip: self.ip,
            vendor: self.vendor,
            last_seen: self.last_seen,
        })
    }
}

impl DeviceStore for SqliteStore {
    fn upsert(&self, record: DeviceRecord) -> Result<()> {
        debug!(mac = %record.mac, ip = %record.ip, "upserting device");
        let open_ports = serde_json::to_string(&record.open_ports)?;
        let metrics_urls = serde_json::to_string(&record.metrics_urls)?;
        self.conn().execute(
            "INSERT INTO devices (mac, ip, vendor, type, open_ports, metrics_urls, last_seen) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(mac) DO UPDATE SET \
             ip = excluded.ip, \
             vendor = excluded.vendor, \
             type = excluded.type, \
             open_ports = excluded.open_ports, \
             metrics_urls = excluded.metrics_urls, \
             last_seen = excluded.last_seen",
            params![
                record.mac,
                record.ip,
                record.vendor,
                record.device_type.label(),
                open_ports,
                metrics_urls,
                record.last_seen,
            ],
        )?;
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<DeviceRecord>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT mac, ip, vendor, type, open_ports, metrics_urls, last_seen \
                 FROM devices ORDER BY mac",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(DeviceRow {
                    mac: row.get(0)?,
                    ip: row.get(1)?,
                    vendor: row.get(2)?,
                    device_type: row.get(3)?,
                    open_ports: row.get(4)?,
                    metrics_urls: row.get(5)?,
                    last_seen: row.get(6)?,
                })
            })?;
            let collected: Vec<DeviceRow> = rows.collect::<rusqlite::Result<_>>()?;
            collected
        };
        rows.into_iter().map(DeviceRow::into_record).collect()
    }

    fn replace_open_ports(&self, ip: IpAddr, ports: &BTreeSet<u16>) -> Result<bool> {
        let conn = self.conn();
        let owner = match conn.query_row(
            "SELECT mac FROM devices WHERE ip = ?1 ORDER BY last_seen DESC LIMIT 1",
            params![ip.to_string()],
            |row| row.get::<_, String>(0),
        ) {
            Ok(mac) => mac,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        conn.execute(
            "UPDATE devices SET open_ports = ?2, type = ?3 WHERE mac = ?1",
            params![owner, serde_json::to_string(ports)?, classify(ports).label()],
        )?;
        Ok(true)
    }
}

impl VendorCache for SqliteStore {
    fn get(&self, oui: &str) -> Option<String> {
        let found = self.conn().query_row(
            "SELECT vendor FROM vendors WHERE oui = ?1",
            params![oui],
            |row| row.get::<_, String>(0),
        );
        match found {
            Ok(vendor) => Some(vendor),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                error!("vendor cache lookup for {oui} failed: {e}");
                None
            }
        }
    }

    fn put(&self, oui: &str, vendor: &str) {
        if vendor == UNKNOWN {
            return;
        }
        let res = self.conn().execute(
            "INSERT INTO vendors (oui, vendor) VALUES (?1, ?2) \
             ON CONFLICT(oui) DO UPDATE SET vendor = excluded.vendor",
            params![oui, vendor],
        );
        if let Err(e) = res {
            error!("failed to cache vendor for {oui}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceType;
    use std::net::Ipv4Addr;

    fn record(mac: &str, ip: &str, last_seen: &str) -> DeviceRecord {
        DeviceRecord {
            mac: mac.to_string(),
            ip: ip.to_string(),
            vendor: UNKNOWN.to_string(),
            device_type: DeviceType::Unknown,
            open_ports: BTreeSet::new(),
            metrics_urls: Vec::new(),
            last_seen: last_seen.to_string(),
        }
    }

    #[test]
    fn same_mac_new_ip_updates_in_place() {
        let store = MemoryStore::new();
        let first = record("aa:bb:cc:dd:ee:ff", "192.168.1.10", "2024-01-01T00:00:00Z");
        let moved = record("aa:bb:cc:dd:ee:ff", "192.168.1.77", "2024-01-01T00:01:00Z");
        store.upsert(first).unwrap();
        store.upsert(moved).unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(all[0].ip, "192.168.1.77");
    }

    #[test]
    fn replace_ports_targets_most_recent_owner() {
        let store = MemoryStore::new();
        store.upsert(record("old", "10.0.0.9", "2024-01-01T00:00:00Z")).unwrap();
        store.upsert(record("new", "10.0.0.9", "2024-02-01T00:00:00Z")).unwrap();

        let ports: BTreeSet<u16> = [22, 9100].into_iter().collect();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        assert!(store.replace_open_ports(ip, &ports).unwrap());

        let all = store.get_all().unwrap();
        let new = all.iter().find(|d| d.mac == "new").unwrap();
        let old = all.iter().find(|d| d.mac == "old").unwrap();
        assert_eq!(new.open_ports, ports);
        assert_eq!(new.device_type, DeviceType::NodeExporter);
        assert!(old.open_ports.is_empty());

        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 10));
        assert!(!store.replace_open_ports(other, &ports).unwrap());
    }

    #[test]
    fn vendor_cache_skips_unknown() {
        let cache = MemoryVendorCache::new();
        cache.put("aa:bb:cc", UNKNOWN);
        assert!(cache.is_empty());
        cache.put("aa:bb:cc", "Acme");
        assert_eq!(cache.get("aa:bb:cc").as_deref(), Some("Acme"));
    }

    #[test]
    fn sqlite_store_upserts_by_mac() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut device = record("aa:bb:cc:dd:ee:ff", "10.0.0.2", "2024-01-01T00:00:00Z");
        store.upsert(device.clone()).unwrap();

        device.ip = "10.0.0.3".into();
        device.vendor = "Acme".into();
        device.open_ports = [22, 443].into_iter().collect();
        device.metrics_urls = vec!["http://10.0.0.3:9100/metrics".into()];
        device.device_type = DeviceType::WebServer;
        store.upsert(device.clone()).unwrap();

        assert_eq!(store.get_all().unwrap(), vec![device]);
    }

    #[test]
    fn sqlite_replace_ports_targets_most_recent_owner() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(record("old", "10.0.0.9", "2024-01-01T00:00:00Z")).unwrap();
        store.upsert(record("new", "10.0.0.9", "2024-02-01T00:00:00Z")).unwrap();

        let ports: BTreeSet<u16> = [3389].into_iter().collect();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        assert!(store.replace_open_ports(ip, &ports).unwrap());
        let vacant = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert!(!store.replace_open_ports(vacant, &ports).unwrap());

        let all = store.get_all().unwrap();
        let new = all.iter().find(|d| d.mac == "new").unwrap();
        assert_eq!(new.open_ports, ports);
        assert_eq!(new.device_type, DeviceType::WindowsPc);
        assert!(all.iter().find(|d| d.mac == "old").unwrap().open_ports.is_empty());
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir_name = format!("lan-device-exporter-{}", std::process::id());
        let dir = std::env::temp_dir().join(dir_name);
        let path = dir.join("devices.db");
        let _ = fs::remove_file(&path);

        {
            let store = SqliteStore::open(&path).unwrap();
            let device = record("aa:bb:cc:dd:ee:ff", "10.0.0.2", "2024-01-01T00:00:00Z");
            store.upsert(device).unwrap();
            store.put("aa:bb:cc", "Acme");
            store.put("dd:ee:ff", UNKNOWN);
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get_all().unwrap().len(), 1);
        assert_eq!(VendorCache::get(&reopened, "aa:bb:cc").as_deref(), Some("Acme"));
        assert_eq!(VendorCache::get(&reopened, "dd:ee:ff"), None);
        drop(reopened);
        fs::remove_dir_all(&dir).unwrap();
    }
}
