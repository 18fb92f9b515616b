//! Turns a spoken device name into live device handles.

use super::actuator::DEFAULT_FANOUT;
use super::{DeviceConnector, DeviceHandle, DeviceRecord};
use crate::cache::CacheStore;
use crate::error::DeviceError;
use futures::{StreamExt, stream};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tag written into the device cache file.
pub const DEVICE_CACHE_FORMAT: &str = "devices/1";

/// The name that selects every live device.
pub const ALL_DEVICES: &str = "all";

/// The live device set of one worker, filled lazily from the descriptor
/// cache or by discovery.
pub struct DeviceDirectory {
    connector: Arc<dyn DeviceConnector>,
    /// Most devices contacted at once when reconnecting or refreshing.
    fanout: usize,
    /// Lower-cased label → IP.
    aliases: HashMap<String, String>,
    cache: CacheStore<DeviceRecord>,
    /// Live handles keyed by IP, in acquisition order.
    live: IndexMap<String, DeviceHandle>,
}

impl DeviceDirectory {
    /// Creates an empty directory.
    ///
    /// # Arguments
    ///
    /// * `connector` - Discovers devices and reopens cached descriptors.
    /// * `aliases` - Human label to IP pairs; labels match case-insensitively.
    /// * `cache` - The persisted device descriptors.
    pub fn new(
        connector: Arc<dyn DeviceConnector>,
        aliases: impl IntoIterator<Item = (String, String)>,
        cache: CacheStore<DeviceRecord>,
    ) -> Self {
        let aliases = aliases
            .into_iter()
            .map(|(label, ip)| (label.trim().to_lowercase(), ip.trim().to_string()))
            .collect();
        Self {
            connector,
            fanout: DEFAULT_FANOUT,
            aliases,
            cache,
            live: IndexMap::new(),
        }
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout.max(1);
        self
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Fills the live set if it is empty: cached descriptors first, then
    /// active discovery.
    async fn acquire(&mut self) -> Result<(), DeviceError> {
        if !self.live.is_empty() {
            return Ok(());
        }

        if !self.cache.is_empty() {
            let records: Vec<DeviceRecord> = self.cache.iter().map(|(_, r)| r.clone()).collect();
            info!(count = records.len(), "Reconnecting to cached devices");
            let connector = &self.connector;
            let attempts: Vec<_> = stream::iter(&records)
                .map(|record| connector.connect(record))
                .buffered(self.fanout)
                .boxed()
                .collect()
                .await;
            for (record, attempt) in records.iter().zip(attempts) {
                match attempt {
                    Ok(handle) => {
                        self.live.insert(record.ip.clone(), handle);
                    }
                    Err(e) => warn!(ip = %record.ip, error = %e, "Cached device unreachable"),
                }
            }
            if self.live.is_empty() {
                warn!("None of the cached devices answered");
            }
            return Ok(());
        }

        info!("No cached devices; running discovery");
        let found = self.connector.discover().await?;
        if found.is_empty() {
            info!("Discovery found no devices");
            return Ok(());
        }
        for handle in found {
            self.live.insert(handle.record().ip, handle);
        }
        let records = self
            .live
            .values()
            .map(|h| {
                let record = h.record();
                (record.ip.clone(), record)
            })
            .collect::<Vec<_>>();
        if let Err(e) = self.cache.replace_all(records) {
            warn!(error = %e, "Failed to persist device cache");
        }
        Ok(())
    }

    /// Resolves `name` to the devices it refers to. An empty result means
    /// nothing matched; only a failed discovery is an error.
    pub async fn resolve(&mut self, name: &str) -> Result<Vec<DeviceHandle>, DeviceError> {
        self.acquire().await?;
        if self.live.is_empty() {
            return Ok(Vec::new());
        }

        let name = name.trim().to_lowercase();
        if name == ALL_DEVICES {
            return Ok(self.live.values().cloned().collect());
        }

        if let Some(handle) = self.aliases.get(&name).and_then(|ip| self.live.get(ip)) {
            debug!(name = %name, "Matched alias");
            return Ok(vec![handle.clone()]);
        }

        if let Some(handle) = self.live.get(&name) {
            debug!(name = %name, "Matched address");
            return Ok(vec![handle.clone()]);
        }

        let handles: Vec<DeviceHandle> = self.live.values().cloned().collect();
        let states: Vec<_> = stream::iter(&handles)
            .map(|h| h.refresh())
            .buffered(self.fanout)
            .boxed()
            .collect()
            .await;
        let matched: Vec<DeviceHandle> = handles
            .into_iter()
            .zip(states)
            .filter_map(|(handle, state)| match state {
                Ok(state) if state.alias.to_lowercase().contains(&name) => Some(handle),
                Ok(_) => None,
                Err(e) => {
                    warn!(ip = %handle.record().ip, error = %e, "Skipping unreachable device");
                    None
                }
            })
            .collect();
        debug!(name = %name, count = matched.len(), "Matched by alias substring");
        Ok(matched)
    }
}
