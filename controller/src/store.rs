use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::sync::Mutex;

use knx_thermostat_common::DeviceConfig;

/// JSON-file backed configuration store.
#[derive(Clone)]
pub struct ConfigStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl ConfigStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("THERMOSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.thermostat"));
        Self::new(data_dir)
    }

    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            path: Arc::new(data_dir.join("config.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Missing file yields defaults. An unparsable file is an error, as is
    /// any other I/O failure.
    pub async fn load(&self) -> anyhow::Result<DeviceConfig> {
        let _guard = self.lock.lock().await;
        self.read_unlocked().await
    }

    pub async fn save(&self, config: &DeviceConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        self.write_unlocked(config).await
    }

    /// Load, modify and save under one lock. A file that cannot be loaded is
    /// left untouched.
    pub async fn update<F>(&self, apply: F) -> anyhow::Result<DeviceConfig>
    where
        F: FnOnce(&mut DeviceConfig),
    {
        let _guard = self.lock.lock().await;
        let mut config = self.read_unlocked().await?;
        apply(&mut config);
        config.sanitize();
        self.write_unlocked(&config).await?;
        Ok(config)
    }

    async fn read_unlocked(&self) -> anyhow::Result<DeviceConfig> {
        let mut config = match tokio::fs::read(self.path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<DeviceConfig>(&raw)
                .with_context(|| format!("failed to parse {}", self.path.display()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => DeviceConfig::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        config.sanitize();
        Ok(config)
    }

    async fn write_unlocked(&self, config: &DeviceConfig) -> anyhow::Result<()> {
        let path = self.path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let payload = serde_json::to_vec_pretty(config)?;
        tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
