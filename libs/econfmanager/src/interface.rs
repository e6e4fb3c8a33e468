//! Application-facing handle
//!
//! An [`Interface`] owns the store, registry, dispatcher and, when a data
//! source is attached, the poll scheduler. Typed per-parameter accessors
//! (`get_device_serial_number`, `set_image_acquisition_exposure`, ...) are
//! generated onto it from the parameter list.
//!
//! ```ignore
//! let iface = Interface::init("data/primary.db", "data/saved.db", None).await?;
//! iface.set_device_serial_number("SN-0042".into()).await?;
//! iface.add_callback(ParameterId::DeviceSerialNumber, |id, value| {
//!     println!("{} -> {}", id, value);
//!     Ok(())
//! });
//! iface.shutdown().await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ParameterDescriptor, ParameterId};
use crate::config::EconfConfig;
use crate::defaults::DefaultSource;
use crate::dispatcher::{Dispatcher, FireReport, RegistrationHandle};
use crate::error::{EconfError, Result};
use crate::registry::{Entry, Registry, DEFAULT_PERSIST_TIMEOUT};
use crate::scheduler::{PollScheduler, PollState, PollStatsSnapshot};
use crate::source::DataSource;
use crate::store::Store;
use crate::time::{SystemTimeProvider, TimeProvider};
use crate::value::{ParameterType, ParameterValue};

/// Default poll interval when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

pub struct InterfaceBuilder {
    primary_db_path: PathBuf,
    save_db_path: PathBuf,
    defaults: Option<DefaultSource>,
    source: Option<Arc<dyn DataSource>>,
    clock: Arc<dyn TimeProvider>,
    persist_timeout: Duration,
    poll_interval: Duration,
}

impl InterfaceBuilder {
    pub fn default_source(mut self, defaults: DefaultSource) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout = timeout;
        self
    }

    /// Interval used by [`Interface::start_polling`]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn build(self) -> Result<Interface> {
        let store = Store::open(&self.primary_db_path, &self.save_db_path, self.defaults)
            .await?
            .with_clock(Arc::clone(&self.clock));
        let store = Arc::new(store);
        let dispatcher = Arc::new(Dispatcher::new());
        let registry = Arc::new(Registry::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            self.clock,
            self.persist_timeout,
        ));
        let scheduler = self
            .source
            .map(|source| PollScheduler::new(Arc::clone(&registry), source));

        info!(
            "econfmanager ready: {} parameters, polling {}",
            Catalog::global().len(),
            if scheduler.is_some() { "available" } else { "disabled" }
        );

        Ok(Interface {
            catalog: Catalog::global(),
            store,
            registry,
            dispatcher,
            scheduler,
            poll_interval: self.poll_interval,
        })
    }
}

pub struct Interface {
    catalog: &'static Catalog,
    store: Arc<Store>,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Option<PollScheduler>,
    poll_interval: Duration,
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Interface {
    pub fn builder(
        primary_db_path: impl AsRef<Path>,
        save_db_path: impl AsRef<Path>,
    ) -> InterfaceBuilder {
        InterfaceBuilder {
            primary_db_path: primary_db_path.as_ref().to_path_buf(),
            save_db_path: save_db_path.as_ref().to_path_buf(),
            defaults: None,
            source: None,
            clock: Arc::new(SystemTimeProvider),
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Open the store without a data source
    pub async fn init(
        primary_db_path: impl AsRef<Path>,
        save_db_path: impl AsRef<Path>,
        defaults: Option<DefaultSource>,
    ) -> Result<Self> {
        let mut builder = Self::builder(primary_db_path, save_db_path);
        builder.defaults = defaults;
        builder.build().await
    }

    pub async fn from_config(
        config: &EconfConfig,
        source: Option<Arc<dyn DataSource>>,
    ) -> Result<Self> {
        let mut builder = Self::builder(&config.primary_db_path, &config.save_db_path)
            .persist_timeout(config.persist_timeout())
            .poll_interval(config.poll_interval());
        if let Some(dir) = &config.default_data_dir {
            builder = builder.default_source(DefaultSource::load(dir)?);
        }
        if let Some(source) = source {
            builder = builder.data_source(source);
        }
        builder.build().await
    }

    /// Stop polling, flush dirty values and close the store
    pub async fn shutdown(self) -> Result<()> {
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop().await;
        }
        let flushed = self.registry.flush().await;
        self.store.close().await;
        match flushed {
            Ok(count) => {
                info!("econfmanager shut down, {} values flushed", count);
                Ok(())
            },
            Err(e) => {
                warn!("econfmanager shut down with unsaved values: {}", e);
                Err(e)
            },
        }
    }

    // ========== Metadata ==========

    pub fn catalog(&self) -> &'static Catalog {
        self.catalog
    }

    pub fn descriptor(&self, id: ParameterId) -> &'static ParameterDescriptor {
        self.catalog.get(id)
    }

    pub fn find(&self, name: &str) -> Result<&'static ParameterDescriptor> {
        self.catalog.find(name)
    }

    pub fn groups(&self) -> Vec<&'static str> {
        self.catalog.groups()
    }

    pub fn entry(&self, id: ParameterId) -> Entry {
        self.registry.entry(id)
    }

    pub fn dirty_ids(&self) -> Vec<ParameterId> {
        self.registry.dirty_ids()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ========== Values ==========

    pub fn get(&self, id: ParameterId) -> Result<ParameterValue> {
        self.registry.get(id)
    }

    pub fn get_as<T: ParameterType>(&self, id: ParameterId) -> Result<T> {
        self.registry.get_as(id)
    }

    pub async fn set(&self, id: ParameterId, value: ParameterValue) -> Result<()> {
        self.registry.set(id, value).await
    }

    pub async fn set_as<T: ParameterType>(&self, id: ParameterId, value: T) -> Result<()> {
        self.registry.set_as(id, value).await
    }

    /// Parse operator text with the parameter's type, then `set`
    pub async fn set_from_str(&self, id: ParameterId, input: &str) -> Result<()> {
        let value = ParameterValue::parse_str(id.descriptor().value_type, input)?;
        self.set(id, value).await
    }

    pub async fn set_from_json(&self, id: ParameterId, json: &serde_json::Value) -> Result<()> {
        let value = ParameterValue::from_json(id.descriptor().value_type, json)?;
        self.set(id, value).await
    }

    /// Persist every dirty value
    pub async fn save(&self) -> Result<usize> {
        self.registry.flush().await
    }

    /// Re-resolve from the databases and apply differences, firing callbacks
    ///
    /// Unsaved in-memory changes are replaced by what is on disk. Runtime
    /// parameters keep their last sampled value.
    pub async fn reload(&self) -> Result<Vec<ParameterId>> {
        let resolved = self.store.resolve().await?;
        let changed = self.registry.replace_all(resolved).await;
        info!("Reloaded, {} parameters changed", changed.len());
        Ok(changed)
    }

    /// Drop all saved values and fall back to primary, defaults and built-ins
    pub async fn factory_reset(&self) -> Result<Vec<ParameterId>> {
        self.store.clear_saved().await?;
        let resolved = self.store.resolve().await?;
        let changed = self.registry.replace_all(resolved).await;
        info!("Factory reset, {} parameters changed", changed.len());
        Ok(changed)
    }

    // ========== Callbacks ==========

    pub fn add_callback<F>(&self, id: ParameterId, callback: F) -> RegistrationHandle
    where
        F: Fn(ParameterId, &ParameterValue) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.register(id, callback)
    }

    pub fn remove_callback(&self, handle: RegistrationHandle) -> bool {
        self.dispatcher.unregister(handle)
    }

    /// Remove every callback for `id`
    pub fn delete_callbacks(&self, id: ParameterId) -> usize {
        self.dispatcher.clear(id)
    }

    /// Fire every registered callback with the parameter's current value
    ///
    /// Nothing needs to have changed; subscribers use this to sync up after
    /// registering. Returns the combined report.
    pub fn notify_all(&self) -> FireReport {
        let mut total = FireReport::default();
        for &id in ParameterId::ALL {
            let report = self.dispatcher.fire(id, &self.registry.current(id));
            total.invoked += report.invoked;
            total.failed += report.failed;
        }
        debug!(
            "Forced notification: {} callbacks ({} failed)",
            total.invoked, total.failed
        );
        total
    }

    // ========== Polling ==========

    fn scheduler(&self) -> Result<&PollScheduler> {
        self.scheduler.as_ref().ok_or(EconfError::NoDataSource)
    }

    pub fn has_data_source(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Start polling the data source every `interval_ms`
    pub fn set_up_timer_poll(&self, interval_ms: u64) -> Result<()> {
        let scheduler = self.scheduler()?;
        if interval_ms == 0 {
            return Err(EconfError::InvalidInterval(interval_ms));
        }
        scheduler.start(Duration::from_millis(interval_ms))
    }

    /// Start polling with the configured interval
    pub fn start_polling(&self) -> Result<()> {
        self.scheduler()?.start(self.poll_interval)
    }

    pub async fn stop_timer_poll(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop().await;
        }
    }

    pub fn poll_state(&self) -> PollState {
        self.scheduler
            .as_ref()
            .map(PollScheduler::state)
            .unwrap_or(PollState::Stopped)
    }

    /// Sample the data source once now, returning the changed ids
    pub async fn poll_now(&self) -> Result<Vec<ParameterId>> {
        Ok(self.scheduler()?.poll_once().await)
    }

    pub fn poll_stats(&self) -> Option<PollStatsSnapshot> {
        self.scheduler.as_ref().map(PollScheduler::stats)
    }
}
