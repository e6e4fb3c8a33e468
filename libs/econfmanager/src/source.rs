//! Data sources sampled by the poll scheduler
//!
//! The hardware boundary: a [`DataSource`] returns the current value of a
//! polled parameter. Errors are transient; the scheduler retries on the next
//! tick.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;

use crate::catalog::{Catalog, ParameterId};
use crate::value::ParameterValue;

#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Current value of `id` as seen by the device
    async fn sample(&self, id: ParameterId) -> Result<ParameterValue>;

    /// Label used in logs
    fn name(&self) -> &str {
        "data source"
    }
}

/// In-memory source with injectable failures and delays
///
/// Useful for tests and for simulating a device without hardware.
#[derive(Debug, Default)]
pub struct MemorySource {
    values: DashMap<ParameterId, ParameterValue>,
    /// Remaining forced failures per id
    failures: DashMap<ParameterId, u32>,
    delays: DashMap<ParameterId, Duration>,
    samples: AtomicU64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: ParameterId, value: impl Into<ParameterValue>) {
        self.values.insert(id, value.into());
    }

    pub fn remove(&self, id: ParameterId) {
        self.values.remove(&id);
    }

    /// Make the next `count` samples of `id` fail
    pub fn fail_next(&self, id: ParameterId, count: u32) {
        self.failures.insert(id, count);
    }

    /// Delay every sample of `id`
    pub fn delay(&self, id: ParameterId, delay: Duration) {
        self.delays.insert(id, delay);
    }

    /// Total sample calls so far
    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn sample(&self, id: ParameterId) -> Result<ParameterValue> {
        self.samples.fetch_add(1, Ordering::Relaxed);

        let delay = self.delays.get(&id).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(mut remaining) = self.failures.get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("injected failure for {}", id));
            }
        }

        self.values
            .get(&id)
            .map(|v| v.clone())
            .ok_or_else(|| anyhow!("no value for {}", id))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Source backed by a JSON file written by a device driver
///
/// The file holds `{"group@field": value}` with plain or type-tagged values.
/// It is re-read on every sample, so the driver may rewrite it at any time.
/// A missing file or key is a transient failure.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    label: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = format!("file:{}", path.display());
        Self { path, label }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_table(&self) -> Result<HashMap<String, serde_json::Value>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }
}

#[async_trait]
impl DataSource for FileSource {
    async fn sample(&self, id: ParameterId) -> Result<ParameterValue> {
        let descriptor = Catalog::global().get(id);
        let table = self.read_table().await?;
        let raw = table
            .get(descriptor.name)
            .or_else(|| table.get(descriptor.const_name))
            .ok_or_else(|| anyhow!("{} has no entry for {}", self.path.display(), id))?;
        Ok(ParameterValue::from_json(descriptor.value_type, raw)?)
    }

    fn name(&self) -> &str {
        &self.label
    }
}
