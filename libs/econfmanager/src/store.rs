//! Persistent store
//!
//! Two SQLite files back the registry:
//! - the primary database, a factory/current snapshot the library only reads
//! - the save database, where every accepted change of a persistent
//!   parameter is upserted
//!
//! Values resolve per key: save row, then primary row, then the default
//! source, then the built-in catalog default. Rows hold the type-tagged JSON
//! form of [`ParameterValue`].

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ParameterDescriptor, ParameterId};
use crate::defaults::{self, DefaultSource};
use crate::error::{EconfError, Result};
use crate::time::{SystemTimeProvider, TimeProvider};
use crate::value::ParameterValue;

/// Parameter table, identical in both databases
pub const PARAMETERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS parameters (
    key TEXT PRIMARY KEY NOT NULL,
    value_type TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

const UPSERT_SQL: &str = r#"
INSERT INTO parameters (key, value_type, value, updated_at)
VALUES (?, ?, ?, ?)
ON CONFLICT(key) DO UPDATE SET
    value_type = excluded.value_type,
    value = excluded.value,
    updated_at = excluded.updated_at
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Values read from one database file
type Layer = HashMap<ParameterId, ParameterValue>;

/// Outcome of reading one database file
#[derive(Debug)]
enum LayerState {
    Absent,
    Loaded(Layer),
    Unreadable(String),
}

impl LayerState {
    fn is_unreadable(&self) -> bool {
        matches!(self, LayerState::Unreadable(_))
    }

    fn into_layer(self) -> Layer {
        match self {
            LayerState::Loaded(layer) => layer,
            _ => Layer::new(),
        }
    }
}

pub struct Store {
    primary_path: PathBuf,
    save_path: PathBuf,
    /// Single-connection writer pool; `None` when the save file could not be created
    save_pool: Option<SqlitePool>,
    defaults: Option<DefaultSource>,
    snapshot: HashMap<ParameterId, ParameterValue>,
    clock: Arc<dyn TimeProvider>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("primary_path", &self.primary_path)
            .field("save_path", &self.save_path)
            .field("writable", &self.save_pool.is_some())
            .field("defaults", &self.defaults.is_some())
            .finish()
    }
}

impl Store {
    /// Open both databases and resolve the startup snapshot
    ///
    /// Missing files are skipped. Files that exist but cannot be read are
    /// skipped with a warning; an unreadable save database is moved to
    /// `<path>.corrupt` and recreated. Fails with [`EconfError::Io`] only
    /// when both files are unreadable and no default source is given.
    pub async fn open(
        primary_path: impl AsRef<Path>,
        save_path: impl AsRef<Path>,
        defaults: Option<DefaultSource>,
    ) -> Result<Self> {
        let primary_path = primary_path.as_ref().to_path_buf();
        let save_path = save_path.as_ref().to_path_buf();

        let primary = read_primary(&primary_path).await;
        if let LayerState::Unreadable(reason) = &primary {
            warn!("Primary db {} unreadable: {}", primary_path.display(), reason);
        }

        let (save_state, save_pool) = match open_save(&save_path).await {
            Ok((pool, layer)) => (LayerState::Loaded(layer), Some(pool)),
            Err(e) if save_path.exists() => {
                warn!("Save db {} unreadable: {}", save_path.display(), e);
                (LayerState::Unreadable(e.to_string()), None)
            },
            Err(e) => {
                warn!("Save db {} cannot be created: {}", save_path.display(), e);
                (LayerState::Absent, None)
            },
        };

        if primary.is_unreadable() && save_state.is_unreadable() && defaults.is_none() {
            return Err(EconfError::Io(format!(
                "neither {} nor {} is readable and no default source is set",
                primary_path.display(),
                save_path.display()
            )));
        }

        let save_pool = match (&save_state, save_pool) {
            (LayerState::Unreadable(_), _) => recover_save(&save_path).await,
            (_, pool) => pool,
        };

        let primary = primary.into_layer();
        let save = save_state.into_layer();
        let snapshot = resolve_layers(&save, &primary, defaults.as_ref());

        info!(
            "Store opened: {} saved, {} primary, {} parameters",
            save.len(),
            primary.len(),
            snapshot.len()
        );

        Ok(Self {
            primary_path,
            save_path,
            save_pool,
            defaults,
            snapshot,
            clock: Arc::new(SystemTimeProvider),
        })
    }

    /// Replace the clock used for `updated_at`
    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary_path
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    pub fn default_source(&self) -> Option<&DefaultSource> {
        self.defaults.as_ref()
    }

    /// Resolved snapshot taken at open
    pub fn read_all(&self) -> HashMap<ParameterId, ParameterValue> {
        self.snapshot.clone()
    }

    fn writer(&self) -> Result<&SqlitePool> {
        self.save_pool.as_ref().ok_or_else(|| {
            EconfError::Io(format!("save db {} is not writable", self.save_path.display()))
        })
    }

    /// Upsert one value into the save database
    ///
    /// Runtime parameters are skipped. Only the type is checked; validation
    /// rules apply to application writes, and sampled values are stored as
    /// reported. Returns once SQLite has synced the write
    /// (`synchronous=FULL`).
    pub async fn persist(&self, id: ParameterId, value: &ParameterValue) -> Result<()> {
        let descriptor = id.descriptor();
        if !descriptor.persistent {
            debug!("{} is runtime-only, not persisted", id);
            return Ok(());
        }
        descriptor.check_type(value)?;

        let encoded = serde_json::to_string(value)?;
        sqlx::query(UPSERT_SQL)
            .bind(descriptor.name)
            .bind(descriptor.value_type.as_str())
            .bind(encoded)
            .bind(self.clock.now_millis())
            .execute(self.writer()?)
            .await?;

        debug!("Persisted {}", id);
        Ok(())
    }

    /// Read one key from the save database
    ///
    /// Unlike resolution at open, a corrupt row is reported as
    /// [`EconfError::CorruptData`].
    pub async fn read(&self, id: ParameterId) -> Result<Option<ParameterValue>> {
        let descriptor = id.descriptor();
        let row = sqlx::query("SELECT key, value_type, value FROM parameters WHERE key = ?")
            .bind(descriptor.name)
            .fetch_optional(self.writer()?)
            .await?;

        row.map(|row| decode_row(descriptor, &row)).transpose()
    }

    /// Re-read both files and resolve again
    ///
    /// Unreadable files contribute nothing; this never moves files aside.
    pub async fn resolve(&self) -> Result<HashMap<ParameterId, ParameterValue>> {
        let primary = match read_primary(&self.primary_path).await {
            LayerState::Unreadable(reason) => {
                warn!("Primary db {} unreadable: {}", self.primary_path.display(), reason);
                Layer::new()
            },
            state => state.into_layer(),
        };

        let save = match &self.save_pool {
            Some(pool) => match read_layer(pool, "save").await {
                Ok(layer) => layer,
                Err(e) => {
                    warn!("Save db {} unreadable: {}", self.save_path.display(), e);
                    Layer::new()
                },
            },
            None => Layer::new(),
        };

        Ok(resolve_layers(&save, &primary, self.defaults.as_ref()))
    }

    /// Drop every saved value
    pub async fn clear_saved(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM parameters")
            .execute(self.writer()?)
            .await?;
        info!("Cleared {} saved values", result.rows_affected());
        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.save_pool {
            pool.close().await;
        }
    }

    /// Write a standalone snapshot database, e.g. a factory primary image
    pub async fn write_snapshot<'a>(
        path: impl AsRef<Path>,
        values: impl IntoIterator<Item = (ParameterId, &'a ParameterValue)>,
        updated_at: i64,
    ) -> Result<usize> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Delete)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(PARAMETERS_SCHEMA).execute(&pool).await?;

        let mut tx = pool.begin().await?;
        let mut count = 0;
        for (id, value) in values {
            let descriptor = id.descriptor();
            descriptor.check_type(value)?;
            sqlx::query(UPSERT_SQL)
                .bind(descriptor.name)
                .bind(descriptor.value_type.as_str())
                .bind(serde_json::to_string(value)?)
                .bind(updated_at)
                .execute(&mut *tx)
                .await?;
            count += 1;
        }
        tx.commit().await?;
        pool.close().await;

        info!("Wrote {} values to {}", count, path.display());
        Ok(count)
    }
}

fn resolve_layers(
    save: &Layer,
    primary: &Layer,
    defaults: Option<&DefaultSource>,
) -> HashMap<ParameterId, ParameterValue> {
    Catalog::global()
        .descriptors()
        .iter()
        .map(|d| {
            let value = save
                .get(&d.id)
                .or_else(|| primary.get(&d.id))
                .cloned()
                .unwrap_or_else(|| match defaults {
                    Some(source) => source.resolve(d),
                    None => defaults::builtin(d),
                });
            (d.id, value)
        })
        .collect()
}

async fn read_primary(path: &Path) -> LayerState {
    if !path.exists() {
        debug!("Primary db {} absent", path.display());
        return LayerState::Absent;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .busy_timeout(BUSY_TIMEOUT);
    let pool = match SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
    {
        Ok(pool) => pool,
        Err(e) => return LayerState::Unreadable(e.to_string()),
    };

    let state = match read_layer(&pool, "primary").await {
        Ok(layer) => LayerState::Loaded(layer),
        Err(e) => LayerState::Unreadable(e.to_string()),
    };
    pool.close().await;
    state
}

fn save_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true)
}

async fn connect_save(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(save_options(path))
        .await?;
    sqlx::query(PARAMETERS_SCHEMA).execute(&pool).await?;
    Ok(pool)
}

async fn open_save(path: &Path) -> Result<(SqlitePool, Layer)> {
    let pool = connect_save(path).await?;
    match read_layer(&pool, "save").await {
        Ok(layer) => Ok((pool, layer)),
        Err(e) => {
            pool.close().await;
            Err(e)
        },
    }
}

/// Move an unreadable save file aside and start a fresh one
async fn recover_save(path: &Path) -> Option<SqlitePool> {
    let mut aside = OsString::from(path.as_os_str());
    aside.push(".corrupt");
    let aside = PathBuf::from(aside);

    if let Err(e) = std::fs::rename(path, &aside) {
        warn!("Cannot move {} aside: {}", path.display(), e);
        return None;
    }
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = OsString::from(path.as_os_str());
        sidecar.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(sidecar));
    }
    warn!("Moved unreadable save db to {}", aside.display());

    match connect_save(path).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!("Cannot recreate save db {}: {}", path.display(), e);
            None
        },
    }
}

async fn read_layer(pool: &SqlitePool, label: &str) -> Result<Layer> {
    let rows = sqlx::query("SELECT key, value_type, value FROM parameters")
        .fetch_all(pool)
        .await?;

    let catalog = Catalog::global();
    let mut layer = Layer::with_capacity(rows.len());
    for row in rows {
        let key: String = match row.try_get("key") {
            Ok(key) => key,
            Err(e) => {
                warn!("{} db: unreadable key: {}", label, e);
                continue;
            },
        };
        let Some(descriptor) = catalog.descriptors().iter().find(|d| d.name == key) else {
            debug!("{} db: ignoring unknown key {}", label, key);
            continue;
        };
        match decode_row(descriptor, &row) {
            Ok(value) => {
                layer.insert(descriptor.id, value);
            },
            Err(e) => warn!("{} db: {}", label, e),
        }
    }
    Ok(layer)
}

fn decode_row(descriptor: &ParameterDescriptor, row: &SqliteRow) -> Result<ParameterValue> {
    let corrupt = |reason: String| EconfError::CorruptData {
        key: descriptor.name.to_string(),
        reason,
    };

    let raw: String = row
        .try_get("value")
        .map_err(|e| corrupt(format!("value column: {}", e)))?;
    let value: ParameterValue =
        serde_json::from_str(&raw).map_err(|e| corrupt(format!("undecodable value: {}", e)))?;

    if value.value_type() != descriptor.value_type {
        return Err(corrupt(format!(
            "stored {} but parameter is {}",
            value.value_type(),
            descriptor.value_type
        )));
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn paths(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
        (dir.path().join("primary.db"), dir.path().join("save.db"))
    }

    #[tokio::test]
    async fn test_open_fresh_uses_builtin_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, save) = paths(&dir);

        let store = Store::open(&primary, &save, None).await.unwrap();
        let snapshot = store.read_all();
        assert_eq!(snapshot.len(), Catalog::global().len());
        assert_eq!(
            snapshot[&ParameterId::DeviceSerialNumber],
            ParameterValue::String("0000".into())
        );
        assert!(save.exists());
        assert!(!primary.exists());
        store.close().await;
    }

    #[tokio::test]
    async fn test_persist_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, save) = paths(&dir);
        let store = Store::open(&primary, &save, None).await.unwrap();

        let value = ParameterValue::F64(33.0);
        store
            .persist(ParameterId::ImageAcquisitionExposure, &value)
            .await
            .unwrap();
        assert_eq!(
            store.read(ParameterId::ImageAcquisitionExposure).await.unwrap(),
            Some(value)
        );
        assert_eq!(store.read(ParameterId::NetworkPort).await.unwrap(), None);
        store.close().await;
    }

    #[tokio::test]
    async fn test_runtime_parameter_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, save) = paths(&dir);
        let store = Store::open(&primary, &save, None).await.unwrap();

        store
            .persist(ParameterId::DeviceTemperature, &ParameterValue::F32(41.5))
            .await
            .unwrap();
        assert_eq!(store.read(ParameterId::DeviceTemperature).await.unwrap(), None);
        store.close().await;
    }

    #[tokio::test]
    async fn test_persist_rejects_wrong_type() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, save) = paths(&dir);
        let store = Store::open(&primary, &save, None).await.unwrap();

        let result = store
            .persist(ParameterId::NetworkPort, &ParameterValue::String("80".into()))
            .await;
        assert!(matches!(result, Err(EconfError::TypeMismatch { .. })));
        store.close().await;
    }

    #[tokio::test]
    async fn test_persist_stores_value_outside_range() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, save) = paths(&dir);
        let store = Store::open(&primary, &save, None).await.unwrap();

        let width = ParameterValue::I32(10_000);
        store
            .persist(ParameterId::ImageAcquisitionImageWidth, &width)
            .await
            .unwrap();
        assert_eq!(
            store.read(ParameterId::ImageAcquisitionImageWidth).await.unwrap(),
            Some(width)
        );
        store.close().await;
    }

    #[tokio::test]
    async fn test_save_overrides_primary_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, save) = paths(&dir);

        let width = ParameterValue::I32(640);
        let serial = ParameterValue::String("FACTORY".into());
        Store::write_snapshot(
            &primary,
            [
                (ParameterId::ImageAcquisitionImageWidth, &width),
                (ParameterId::DeviceSerialNumber, &serial),
            ],
            1,
        )
        .await
        .unwrap();

        let store = Store::open(&primary, &save, None).await.unwrap();
        store
            .persist(
                ParameterId::DeviceSerialNumber,
                &ParameterValue::String("SAVED".into()),
            )
            .await
            .unwrap();
        store.close().await;

        let store = Store::open(&primary, &save, None).await.unwrap();
        let snapshot = store.read_all();
        assert_eq!(
            snapshot[&ParameterId::DeviceSerialNumber],
            ParameterValue::String("SAVED".into())
        );
        assert_eq!(snapshot[&ParameterId::ImageAcquisitionImageWidth], width);
        store.close().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_corrupt_row_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, save) = paths(&dir);
        let store = Store::open(&primary, &save, None).await.unwrap();

        sqlx::query(UPSERT_SQL)
            .bind("network@port")
            .bind("u32")
            .bind(r#"{"type":"string","value":"eighty"}"#)
            .bind(0_i64)
            .execute(store.writer().unwrap())
            .await
            .unwrap();

        assert!(matches!(
            store.read(ParameterId::NetworkPort).await,
            Err(EconfError::CorruptData { .. })
        ));
        let resolved = store.resolve().await.unwrap();
        assert_eq!(resolved[&ParameterId::NetworkPort], ParameterValue::U32(5000));
        assert!(logs_contain("Corrupt data for network@port"));
        store.close().await;
    }

    #[tokio::test]
    async fn test_clear_saved() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, save) = paths(&dir);
        let store = Store::open(&primary, &save, None).await.unwrap();

        store
            .persist(ParameterId::NetworkPort, &ParameterValue::U32(9000))
            .await
            .unwrap();
        assert_eq!(store.clear_saved().await.unwrap(), 1);
        let resolved = store.resolve().await.unwrap();
        assert_eq!(resolved[&ParameterId::NetworkPort], ParameterValue::U32(5000));
        store.close().await;
    }
}
