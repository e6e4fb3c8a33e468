//! Default-data source
//!
//! Third layer of value resolution, between the databases and the built-in
//! catalog defaults. A default-data directory may hold a `defaults.json`
//! (`{"group@field": value}`, values plain or type-tagged) and the files
//! referenced by `DefaultValue::File` descriptors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::catalog::{Catalog, DefaultValue, ParameterDescriptor, ParameterId};
use crate::error::Result;
use crate::value::ParameterValue;

/// File name of the explicit default table inside the data dir
pub const DEFAULTS_FILE: &str = "defaults.json";

#[derive(Debug, Clone, Default)]
pub struct DefaultSource {
    data_dir: Option<PathBuf>,
    values: HashMap<ParameterId, ParameterValue>,
}

impl DefaultSource {
    /// Source backed by explicit values only
    pub fn from_values(values: impl IntoIterator<Item = (ParameterId, ParameterValue)>) -> Self {
        Self {
            data_dir: None,
            values: values.into_iter().collect(),
        }
    }

    /// Load a default-data directory
    ///
    /// A missing `defaults.json` means no explicit values. Entries that name
    /// an unknown parameter or do not convert to its type are skipped with a
    /// warning. A file that is not a JSON object fails the whole load.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(DEFAULTS_FILE);
        let mut values = HashMap::new();

        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let table: HashMap<String, JsonValue> = serde_json::from_str(&text)?;
            let catalog = Catalog::global();
            for (name, raw) in table {
                let descriptor = match catalog.find(&name) {
                    Ok(d) => d,
                    Err(_) => {
                        warn!("{}: unknown parameter {}", path.display(), name);
                        continue;
                    },
                };
                match ParameterValue::from_json(descriptor.value_type, &raw) {
                    Ok(value) => {
                        values.insert(descriptor.id, value);
                    },
                    Err(e) => warn!("{}: {}: {}", path.display(), name, e),
                }
            }
            debug!("Loaded {} default values from {}", values.len(), path.display());
        }

        Ok(Self {
            data_dir: Some(dir),
            values,
        })
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Explicit value, or the `File` default read from the data dir
    ///
    /// `None` means the built-in default applies.
    pub fn value_for(&self, descriptor: &ParameterDescriptor) -> Option<ParameterValue> {
        if let Some(value) = self.values.get(&descriptor.id) {
            return Some(value.clone());
        }
        match descriptor.default {
            DefaultValue::File(_) if self.data_dir.is_some() => {
                Some(descriptor.default.materialize(self.data_dir()))
            },
            _ => None,
        }
    }

    /// Value the parameter falls back to when no database holds it
    pub fn resolve(&self, descriptor: &ParameterDescriptor) -> ParameterValue {
        self.value_for(descriptor)
            .unwrap_or_else(|| descriptor.default.materialize(self.data_dir()))
    }
}

/// Built-in default only, for when no default source is configured
pub fn builtin(descriptor: &ParameterDescriptor) -> ParameterValue {
    descriptor.default.materialize(None)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_from_values_overrides_builtin() {
        let source = DefaultSource::from_values([(
            ParameterId::DeviceSerialNumber,
            ParameterValue::String("SN-42".into()),
        )]);
        assert_eq!(
            source.resolve(ParameterId::DeviceSerialNumber.descriptor()),
            ParameterValue::String("SN-42".into())
        );
        assert_eq!(
            source.resolve(ParameterId::ImageAcquisitionImageWidth.descriptor()),
            ParameterValue::I32(1920)
        );
    }

    #[test]
    #[traced_test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULTS_FILE),
            r#"{
                "image_acquisition@exposure": 25.0,
                "NETWORK_PORT": {"type": "u32", "value": 8080},
                "device@bogus": 1,
                "image_acquisition@gain": "loud"
            }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("calibration.bin"), [9u8, 8, 7]).unwrap();

        let source = DefaultSource::load(dir.path()).unwrap();
        assert_eq!(
            source.value_for(ParameterId::ImageAcquisitionExposure.descriptor()),
            Some(ParameterValue::F64(25.0))
        );
        assert_eq!(
            source.value_for(ParameterId::NetworkPort.descriptor()),
            Some(ParameterValue::U32(8080))
        );
        assert_eq!(
            source.value_for(ParameterId::ImageAcquisitionGain.descriptor()),
            None
        );
        assert_eq!(
            source.value_for(ParameterId::DeviceCalibrationData.descriptor()),
            Some(ParameterValue::Blob(vec![9, 8, 7]))
        );
        assert!(logs_contain("unknown parameter device@bogus"));
    }

    #[test]
    fn test_load_without_defaults_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = DefaultSource::load(dir.path()).unwrap();
        assert_eq!(
            source.value_for(ParameterId::NetworkPort.descriptor()),
            None
        );
        // Missing calibration file still resolves, to an empty blob
        assert_eq!(
            source.resolve(ParameterId::DeviceCalibrationData.descriptor()),
            ParameterValue::Blob(Vec::new())
        );
    }

    #[test]
    fn test_load_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULTS_FILE), "[1, 2]").unwrap();
        assert!(DefaultSource::load(dir.path()).is_err());
    }
}
