//! Parameter registry
//!
//! In-memory system of record for current values. Reads never touch I/O.
//! Writes for one parameter are serialized through a per-parameter async gate
//! that is held across persistence and notification, so every observer sees
//! the changes of one key in a single total order. Unrelated keys never wait
//! on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::catalog::{Catalog, ParameterId};
use crate::defaults;
use crate::dispatcher::Dispatcher;
use crate::error::{EconfError, Result};
use crate::store::Store;
use crate::time::TimeProvider;
use crate::value::{ParameterType, ParameterValue};

/// Default bound on one save-database write
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone)]
struct Slot {
    value: ParameterValue,
    dirty: bool,
    updated_at: i64,
}

/// Inspection view of one registry entry
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: ParameterId,
    /// `None` for write-only parameters
    pub value: Option<ParameterValue>,
    /// Changed in memory but not yet in the save database
    pub dirty: bool,
    /// Milliseconds since epoch of the last applied change
    pub updated_at: i64,
}

pub struct Registry {
    slots: RwLock<Vec<Slot>>,
    gates: Vec<tokio::sync::Mutex<()>>,
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn TimeProvider>,
    persist_timeout: Duration,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("parameters", &self.gates.len())
            .field("dirty", &self.dirty_ids().len())
            .field("persist_timeout", &self.persist_timeout)
            .finish()
    }
}

impl Registry {
    /// Build from the store's startup snapshot
    pub fn new(
        store: Arc<Store>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn TimeProvider>,
        persist_timeout: Duration,
    ) -> Self {
        let mut snapshot = store.read_all();
        let now = clock.now_millis();
        let slots = Catalog::global()
            .descriptors()
            .iter()
            .map(|d| Slot {
                value: snapshot
                    .remove(&d.id)
                    .unwrap_or_else(|| defaults::builtin(d)),
                dirty: false,
                updated_at: now,
            })
            .collect::<Vec<_>>();
        let gates = slots.iter().map(|_| tokio::sync::Mutex::new(())).collect();

        Self {
            slots: RwLock::new(slots),
            gates,
            store,
            dispatcher,
            clock,
            persist_timeout,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Current value; write-only parameters are denied
    pub fn get(&self, id: ParameterId) -> Result<ParameterValue> {
        let descriptor = id.descriptor();
        if !descriptor.access.can_read() {
            return Err(EconfError::AccessDenied {
                id,
                access: descriptor.access.as_str(),
            });
        }
        Ok(self.current(id))
    }

    /// Current value without the access check, for internal comparisons
    pub(crate) fn current(&self, id: ParameterId) -> ParameterValue {
        self.slots.read()[id.index()].value.clone()
    }

    pub fn get_as<T: ParameterType>(&self, id: ParameterId) -> Result<T> {
        let value = self.get(id)?;
        let actual = value.value_type();
        T::from_value(value).ok_or(EconfError::TypeMismatch {
            id,
            expected: T::VALUE_TYPE,
            actual,
        })
    }

    /// Validate, apply, persist and notify
    ///
    /// Setting the current value again is a no-op. A persistence failure is
    /// returned after the in-memory value is updated and callbacks have run;
    /// the entry stays dirty until a later `flush` succeeds.
    pub async fn set(&self, id: ParameterId, value: ParameterValue) -> Result<()> {
        let descriptor = id.descriptor();
        if !descriptor.access.can_write() {
            return Err(EconfError::AccessDenied {
                id,
                access: descriptor.access.as_str(),
            });
        }
        descriptor.check(&value)?;

        match self.apply(id, value).await {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    pub async fn set_as<T: ParameterType>(&self, id: ParameterId, value: T) -> Result<()> {
        self.set(id, value.into_value()).await
    }

    /// Apply a value sampled from the data source
    ///
    /// Bypasses the access check; only the type is enforced. Persistence
    /// failures are logged and leave the entry dirty. Returns whether the
    /// value changed.
    pub async fn apply_sampled(&self, id: ParameterId, value: ParameterValue) -> Result<bool> {
        id.descriptor().check_type(&value)?;

        Ok(match self.apply(id, value).await {
            None => false,
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("Sampled {} kept in memory only: {}", id, e);
                true
            },
        })
    }

    /// `None` when unchanged, otherwise the persistence outcome
    async fn apply(&self, id: ParameterId, value: ParameterValue) -> Option<Result<()>> {
        let persistent = id.descriptor().persistent;
        let _gate = self.gates[id.index()].lock().await;

        {
            let mut slots = self.slots.write();
            let slot = &mut slots[id.index()];
            if slot.value.same_as(&value) {
                debug!("{} unchanged", id);
                return None;
            }
            slot.value = value.clone();
            slot.dirty = persistent;
            slot.updated_at = self.clock.now_millis();
        }

        let persisted = if persistent {
            self.persist_locked(id, &value).await
        } else {
            Ok(())
        };

        let report = self.dispatcher.fire(id, &value);
        if report.invoked > 0 {
            debug!(
                "{} changed, {} callbacks ({} failed)",
                id, report.invoked, report.failed
            );
        }
        Some(persisted)
    }

    /// Write one value to the save database; caller holds the gate
    async fn persist_locked(&self, id: ParameterId, value: &ParameterValue) -> Result<()> {
        let result = match tokio::time::timeout(self.persist_timeout, self.store.persist(id, value))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(EconfError::Io(format!(
                "persisting {} timed out after {:?}",
                id, self.persist_timeout
            ))),
        };

        match &result {
            Ok(()) => {
                let mut slots = self.slots.write();
                let slot = &mut slots[id.index()];
                if slot.value == *value {
                    slot.dirty = false;
                }
            },
            Err(e) => error!("Persist {} failed: {}", id, e),
        }
        result
    }

    /// Persist every dirty entry, returning how many were written
    ///
    /// Continues past failures and reports the first one.
    pub async fn flush(&self) -> Result<usize> {
        let mut written = 0;
        let mut first_error = None;

        for id in self.dirty_ids() {
            let _gate = self.gates[id.index()].lock().await;
            let (value, dirty) = {
                let slots = self.slots.read();
                (slots[id.index()].value.clone(), slots[id.index()].dirty)
            };
            if !dirty {
                continue;
            }
            match self.persist_locked(id, &value).await {
                Ok(()) => written += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                },
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                if written > 0 {
                    debug!("Flushed {} dirty parameters", written);
                }
                Ok(written)
            },
        }
    }

    /// Replace values with a freshly resolved snapshot
    ///
    /// Used after reload and factory reset. Changed entries are clean (they
    /// came from disk) and fire their callbacks. Runtime parameters keep
    /// their current value since nothing on disk describes them. Returns
    /// the changed ids.
    pub async fn replace_all(
        &self,
        mut values: HashMap<ParameterId, ParameterValue>,
    ) -> Vec<ParameterId> {
        let mut changed = Vec::new();
        for &id in ParameterId::ALL {
            if !id.descriptor().persistent {
                continue;
            }
            let Some(value) = values.remove(&id) else {
                continue;
            };
            let _gate = self.gates[id.index()].lock().await;
            {
                let mut slots = self.slots.write();
                let slot = &mut slots[id.index()];
                if slot.value.same_as(&value) {
                    continue;
                }
                slot.value = value.clone();
                slot.dirty = false;
                slot.updated_at = self.clock.now_millis();
            }
            self.dispatcher.fire(id, &value);
            changed.push(id);
        }
        changed
    }

    pub fn entry(&self, id: ParameterId) -> Entry {
        let slots = self.slots.read();
        let slot = &slots[id.index()];
        Entry {
            id,
            value: id
                .descriptor()
                .access
                .can_read()
                .then(|| slot.value.clone()),
            dirty: slot.dirty,
            updated_at: slot.updated_at,
        }
    }

    pub fn dirty_ids(&self) -> Vec<ParameterId> {
        self.slots
            .read()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.dirty)
            .filter_map(|(i, _)| ParameterId::from_index(i))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::time::FixedTimeProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    async fn registry(dir: &tempfile::TempDir) -> (Registry, Arc<FixedTimeProvider>) {
        let clock = Arc::new(FixedTimeProvider::new(1_000));
        let store = Store::open(dir.path().join("p.db"), dir.path().join("s.db"), None)
            .await
            .unwrap()
            .with_clock(clock.clone());
        let registry = Registry::new(
            Arc::new(store),
            Arc::new(Dispatcher::new()),
            clock.clone(),
            DEFAULT_PERSIST_TIMEOUT,
        );
        (registry, clock)
    }

    fn counter(registry: &Registry, id: ParameterId) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        registry.dispatcher().register(id, move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        hits
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, clock) = registry(&dir).await;
        clock.set(5_000);

        registry
            .set(ParameterId::NetworkPort, ParameterValue::U32(8080))
            .await
            .unwrap();
        assert_eq!(
            registry.get(ParameterId::NetworkPort).unwrap(),
            ParameterValue::U32(8080)
        );
        let entry = registry.entry(ParameterId::NetworkPort);
        assert!(!entry.dirty);
        assert_eq!(entry.updated_at, 5_000);
        assert_eq!(
            registry.store().read(ParameterId::NetworkPort).await.unwrap(),
            Some(ParameterValue::U32(8080))
        );
    }

    #[tokio::test]
    async fn test_access_modes() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;

        assert!(matches!(
            registry
                .set(ParameterId::ImageAcquisitionImageWidth, ParameterValue::I32(640))
                .await,
            Err(EconfError::AccessDenied { .. })
        ));
        assert!(matches!(
            registry.get(ParameterId::DeviceAccessKey),
            Err(EconfError::AccessDenied { .. })
        ));
        registry
            .set(ParameterId::DeviceAccessKey, ParameterValue::String("s3cret".into()))
            .await
            .unwrap();
        assert_eq!(registry.entry(ParameterId::DeviceAccessKey).value, None);
    }

    #[tokio::test]
    async fn test_type_and_validation_errors_leave_value() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;
        let hits = counter(&registry, ParameterId::ImageAcquisitionGain);

        assert!(matches!(
            registry
                .set(ParameterId::ImageAcquisitionGain, ParameterValue::F64(3.0))
                .await,
            Err(EconfError::TypeMismatch { .. })
        ));
        assert!(matches!(
            registry
                .set(ParameterId::ImageAcquisitionGain, ParameterValue::F32(60.0))
                .await,
            Err(EconfError::InvalidValue { .. })
        ));
        assert_eq!(
            registry.get(ParameterId::ImageAcquisitionGain).unwrap(),
            ParameterValue::F32(0.0)
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unchanged_set_does_not_fire() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;
        let hits = counter(&registry, ParameterId::DeviceName);

        registry
            .set_as(ParameterId::DeviceName, "lab".to_string())
            .await
            .unwrap();
        registry
            .set_as(ParameterId::DeviceName, "lab".to_string())
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(logs_contain("device@name unchanged"));
    }

    #[tokio::test]
    async fn test_get_as_wrong_type() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;

        assert_eq!(
            registry.get_as::<i32>(ParameterId::ImageAcquisitionImageWidth).unwrap(),
            1920
        );
        assert!(matches!(
            registry.get_as::<u32>(ParameterId::ImageAcquisitionImageWidth),
            Err(EconfError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory_value_and_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;
        let hits = counter(&registry, ParameterId::NetworkPort);
        registry.store().close().await;

        let result = registry
            .set(ParameterId::NetworkPort, ParameterValue::U32(1234))
            .await;
        assert!(matches!(result, Err(EconfError::Io(_))));
        assert_eq!(
            registry.get(ParameterId::NetworkPort).unwrap(),
            ParameterValue::U32(1234)
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.dirty_ids(), vec![ParameterId::NetworkPort]);
        assert!(registry.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_runtime_parameter_never_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;

        let changed = registry
            .apply_sampled(ParameterId::DeviceTemperature, ParameterValue::F32(38.5))
            .await
            .unwrap();
        assert!(changed);
        assert!(registry.dirty_ids().is_empty());
        assert_eq!(
            registry.store().read(ParameterId::DeviceTemperature).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_apply_sampled_bypasses_access_but_checks_type() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;

        assert!(registry
            .apply_sampled(ParameterId::ImageAcquisitionImageWidth, ParameterValue::I32(1280))
            .await
            .unwrap());
        assert!(!registry
            .apply_sampled(ParameterId::ImageAcquisitionImageWidth, ParameterValue::I32(1280))
            .await
            .unwrap());
        assert!(matches!(
            registry
                .apply_sampled(ParameterId::ImageAcquisitionImageWidth, ParameterValue::U32(1))
                .await,
            Err(EconfError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_replace_all_fires_only_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;
        let port_hits = counter(&registry, ParameterId::NetworkPort);
        let name_hits = counter(&registry, ParameterId::DeviceName);

        let mut values = HashMap::new();
        values.insert(ParameterId::NetworkPort, ParameterValue::U32(7000));
        values.insert(ParameterId::DeviceName, ParameterValue::String("camera".into()));

        let changed = registry.replace_all(values).await;
        assert_eq!(changed, vec![ParameterId::NetworkPort]);
        assert_eq!(port_hits.load(Ordering::SeqCst), 1);
        assert_eq!(name_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sampled_value_outside_range_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;
        let width = ParameterId::ImageAcquisitionImageWidth;

        // Hardware reports what it reports, even past the declared range
        assert!(registry
            .apply_sampled(width, ParameterValue::I32(10_000))
            .await
            .unwrap());
        assert!(registry.dirty_ids().is_empty());
        assert_eq!(registry.flush().await.unwrap(), 0);
        assert_eq!(
            registry.store().read(width).await.unwrap(),
            Some(ParameterValue::I32(10_000))
        );
    }

    #[tokio::test]
    async fn test_replace_all_keeps_runtime_values() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;
        let temperature = ParameterId::DeviceTemperature;
        registry
            .apply_sampled(temperature, ParameterValue::F32(47.5))
            .await
            .unwrap();
        let hits = counter(&registry, temperature);

        let changed = registry.replace_all(registry.store().resolve().await.unwrap()).await;
        assert!(!changed.contains(&temperature));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.get(temperature).unwrap(), ParameterValue::F32(47.5));
    }

    #[tokio::test]
    async fn test_repeated_nan_sample_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry(&dir).await;
        let temperature = ParameterId::DeviceTemperature;
        let hits = counter(&registry, temperature);

        assert!(registry
            .apply_sampled(temperature, ParameterValue::F32(f32::NAN))
            .await
            .unwrap());
        assert!(!registry
            .apply_sampled(temperature, ParameterValue::F32(f32::NAN))
            .await
            .unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
