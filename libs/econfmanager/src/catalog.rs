//! Parameter catalog
//!
//! Static schema of every parameter: value type, default, access mode and
//! metadata. The concrete parameter list lives in [`crate::parameters`] and
//! is expanded by [`define_parameters!`] into the `ParameterId` enum, the
//! descriptor table and the typed accessors on `Interface`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use tracing::error;

use crate::error::{EconfError, Result};
use crate::value::{ParameterValue, ValueType};

pub use crate::parameters::ParameterId;

/// Who may read or write a parameter through the public accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Set by hardware or at the factory; the application may only read
    ReadOnly,
    ReadWrite,
    /// Secrets; the application may only write
    WriteOnly,
}

impl AccessMode {
    pub fn can_read(&self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }

    pub fn can_write(&self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "read-only",
            AccessMode::ReadWrite => "read-write",
            AccessMode::WriteOnly => "write-only",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation rule applied on every accepted write
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Validation {
    None,
    /// Inclusive numeric range
    Range { min: f64, max: f64 },
    /// Maximum byte length of a string or blob
    MaxLength(usize),
    /// Integer must be one of the listed values
    OneOf(&'static [i64]),
}

impl Validation {
    /// Check `value` against the rule, returning a human-readable reason on failure
    pub fn check(&self, value: &ParameterValue) -> std::result::Result<(), String> {
        match *self {
            Validation::None => Ok(()),
            Validation::Range { min, max } => match value.as_f64() {
                Some(v) if v >= min && v <= max => Ok(()),
                Some(v) => Err(format!("{} outside range [{}, {}]", v, min, max)),
                None => Err(format!("{} is not numeric", value.value_type())),
            },
            Validation::MaxLength(max) => {
                let len = match value {
                    ParameterValue::String(s) => s.len(),
                    ParameterValue::Blob(b) => b.len(),
                    other => return Err(format!("{} has no length", other.value_type())),
                };
                if len <= max {
                    Ok(())
                } else {
                    Err(format!("length {} exceeds maximum {}", len, max))
                }
            },
            Validation::OneOf(allowed) => match value.as_i64() {
                Some(v) if allowed.contains(&v) => Ok(()),
                Some(v) => Err(format!("{} not in allowed values {:?}", v, allowed)),
                None => Err(format!("{} is not an integer", value.value_type())),
            },
        }
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::None => f.write_str("none"),
            Validation::Range { min, max } => write!(f, "range [{}, {}]", min, max),
            Validation::MaxLength(n) => write!(f, "max length {}", n),
            Validation::OneOf(values) => write!(f, "one of {:?}", values),
        }
    }
}

/// Built-in default of a parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(&'static str),
    Bytes(&'static [u8]),
    /// Blob read from this file inside the default-data directory
    File(&'static str),
}

impl DefaultValue {
    pub const fn value_type(&self) -> ValueType {
        match self {
            DefaultValue::Bool(_) => ValueType::Bool,
            DefaultValue::I32(_) => ValueType::I32,
            DefaultValue::U32(_) => ValueType::U32,
            DefaultValue::I64(_) => ValueType::I64,
            DefaultValue::U64(_) => ValueType::U64,
            DefaultValue::F32(_) => ValueType::F32,
            DefaultValue::F64(_) => ValueType::F64,
            DefaultValue::Str(_) => ValueType::String,
            DefaultValue::Bytes(_) | DefaultValue::File(_) => ValueType::Blob,
        }
    }

    /// Produce the runtime value
    ///
    /// `File` defaults are read from `data_dir`. A missing directory or an
    /// unreadable file yields an empty blob and an error log.
    pub fn materialize(&self, data_dir: Option<&Path>) -> ParameterValue {
        match *self {
            DefaultValue::Bool(v) => ParameterValue::Bool(v),
            DefaultValue::I32(v) => ParameterValue::I32(v),
            DefaultValue::U32(v) => ParameterValue::U32(v),
            DefaultValue::I64(v) => ParameterValue::I64(v),
            DefaultValue::U64(v) => ParameterValue::U64(v),
            DefaultValue::F32(v) => ParameterValue::F32(v),
            DefaultValue::F64(v) => ParameterValue::F64(v),
            DefaultValue::Str(v) => ParameterValue::String(v.to_string()),
            DefaultValue::Bytes(v) => ParameterValue::Blob(v.to_vec()),
            DefaultValue::File(name) => {
                let Some(dir) = data_dir else {
                    error!("Default file {} requested without a default-data dir", name);
                    return ParameterValue::Blob(Vec::new());
                };
                let path = dir.join(name);
                match std::fs::read(&path) {
                    Ok(bytes) => ParameterValue::Blob(bytes),
                    Err(e) => {
                        error!("Default file {}: {}", path.display(), e);
                        ParameterValue::Blob(Vec::new())
                    },
                }
            },
        }
    }
}

/// Static description of one parameter
#[derive(Debug, Clone, Copy)]
pub struct ParameterDescriptor {
    pub id: ParameterId,
    /// Wire name `group@field`, also the persistence key
    pub name: &'static str,
    /// Upper-case constant name, e.g. `DEVICE_SERIAL_NUMBER`
    pub const_name: &'static str,
    pub group: &'static str,
    pub title: &'static str,
    pub comment: &'static str,
    pub value_type: ValueType,
    pub default: DefaultValue,
    pub access: AccessMode,
    pub validation: Validation,
    /// Sampled from the data source by the poll scheduler
    pub polled: bool,
    /// Written to the save database; runtime parameters are memory only
    pub persistent: bool,
}

impl ParameterDescriptor {
    /// The value's type must match the declared type
    pub fn check_type(&self, value: &ParameterValue) -> Result<()> {
        let actual = value.value_type();
        if actual != self.value_type {
            return Err(EconfError::TypeMismatch {
                id: self.id,
                expected: self.value_type,
                actual,
            });
        }
        Ok(())
    }

    /// Check type and validation rule for a candidate value
    pub fn check(&self, value: &ParameterValue) -> Result<()> {
        self.check_type(value)?;
        self.validation
            .check(value)
            .map_err(|reason| EconfError::InvalidValue {
                id: self.id,
                reason,
            })
    }

    /// Field part of the wire name
    pub fn field(&self) -> &'static str {
        self.name
            .split_once('@')
            .map(|(_, field)| field)
            .unwrap_or(self.name)
    }
}

/// Read-only view over the descriptor table
#[derive(Debug)]
pub struct Catalog {
    descriptors: &'static [ParameterDescriptor],
}

static CATALOG: Catalog = Catalog {
    descriptors: crate::parameters::DESCRIPTORS,
};

impl Catalog {
    /// The device catalog compiled into this crate
    pub fn global() -> &'static Catalog {
        &CATALOG
    }

    pub fn descriptors(&self) -> &'static [ParameterDescriptor] {
        self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, id: ParameterId) -> &'static ParameterDescriptor {
        &self.descriptors[id.index()]
    }

    /// Look up by wire name (`group@field`) or constant name
    pub fn find(&self, name: &str) -> Result<&'static ParameterDescriptor> {
        let name = name.trim();
        self.descriptors
            .iter()
            .find(|d| d.name == name || d.const_name.eq_ignore_ascii_case(name))
            .ok_or_else(|| EconfError::NotFound(name.to_string()))
    }

    /// Distinct group names, sorted
    pub fn groups(&self) -> Vec<&'static str> {
        self.descriptors
            .iter()
            .map(|d| d.group)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn in_group<'a>(
        &'a self,
        group: &'a str,
    ) -> impl Iterator<Item = &'static ParameterDescriptor> + 'a {
        self.descriptors.iter().filter(move |d| d.group == group)
    }

    pub fn polled(&self) -> impl Iterator<Item = &'static ParameterDescriptor> + '_ {
        self.descriptors.iter().filter(|d| d.polled)
    }
}

/// Expand a parameter list into `ParameterId`, `DESCRIPTORS` and the typed
/// accessors on `Interface`
///
/// Access is written as `ReadOnly(getter)`, `ReadWrite(getter, setter)` or
/// `WriteOnly(setter)`; the accessor names are given explicitly.
macro_rules! define_parameters {
    (
        $(
            $variant:ident {
                group: $group:literal,
                field: $field:literal,
                const_name: $const_name:literal,
                title: $title:literal,
                comment: $comment:literal,
                ty: $ty:ty,
                default: $default:expr,
                access: $access:ident ( $($accessor:ident),+ ),
                validation: $validation:expr,
                polled: $polled:literal,
                persistent: $persistent:literal $(,)?
            }
        ),* $(,)?
    ) => {
        /// Identifier of a catalog parameter
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ParameterId {
            $(
                #[doc = $title]
                $variant,
            )*
        }

        impl ParameterId {
            /// Every id, in catalog order
            pub const ALL: &'static [ParameterId] = &[$(ParameterId::$variant),*];

            pub const fn index(self) -> usize {
                self as usize
            }

            pub fn from_index(index: usize) -> Option<Self> {
                Self::ALL.get(index).copied()
            }

            pub fn descriptor(self) -> &'static $crate::catalog::ParameterDescriptor {
                &DESCRIPTORS[self.index()]
            }

            /// Wire name `group@field`
            pub fn name(self) -> &'static str {
                self.descriptor().name
            }
        }

        impl ::std::fmt::Display for ParameterId {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl ::std::str::FromStr for ParameterId {
            type Err = $crate::error::EconfError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                $crate::catalog::Catalog::global().find(s).map(|d| d.id)
            }
        }

        /// Descriptor table indexed by `ParameterId::index`
        pub const DESCRIPTORS: &[$crate::catalog::ParameterDescriptor] = &[
            $(
                $crate::catalog::ParameterDescriptor {
                    id: ParameterId::$variant,
                    name: concat!($group, "@", $field),
                    const_name: $const_name,
                    group: $group,
                    title: $title,
                    comment: $comment,
                    value_type: <$ty as $crate::value::ParameterType>::VALUE_TYPE,
                    default: $default,
                    access: $crate::catalog::AccessMode::$access,
                    validation: $validation,
                    polled: $polled,
                    persistent: $persistent,
                },
            )*
        ];

        impl $crate::interface::Interface {
            $(
                $crate::catalog::parameter_accessors!(
                    $access, $variant, $ty, $group, $field, $($accessor),+
                );
            )*
        }
    };
}

/// Typed accessor pair for one parameter, selected by access mode
macro_rules! parameter_accessors {
    (ReadOnly, $variant:ident, $ty:ty, $group:literal, $field:literal, $get:ident) => {
        #[doc = concat!("Current value of `", $group, "@", $field, "`")]
        pub fn $get(&self) -> $crate::error::Result<$ty> {
            self.get_as::<$ty>(ParameterId::$variant)
        }
    };
    (ReadWrite, $variant:ident, $ty:ty, $group:literal, $field:literal, $get:ident, $set:ident) => {
        #[doc = concat!("Current value of `", $group, "@", $field, "`")]
        pub fn $get(&self) -> $crate::error::Result<$ty> {
            self.get_as::<$ty>(ParameterId::$variant)
        }

        #[doc = concat!("Set, persist and notify `", $group, "@", $field, "`")]
        pub async fn $set(&self, value: $ty) -> $crate::error::Result<()> {
            self.set_as::<$ty>(ParameterId::$variant, value).await
        }
    };
    (WriteOnly, $variant:ident, $ty:ty, $group:literal, $field:literal, $set:ident) => {
        #[doc = concat!("Set, persist and notify `", $group, "@", $field, "`")]
        pub async fn $set(&self, value: $ty) -> $crate::error::Result<()> {
            self.set_as::<$ty>(ParameterId::$variant, value).await
        }
    };
}

pub(crate) use define_parameters;
pub(crate) use parameter_accessors;

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_catalog_index_matches_id() {
        let catalog = Catalog::global();
        assert!(!catalog.is_empty());
        for (i, d) in catalog.descriptors().iter().enumerate() {
            assert_eq!(d.id.index(), i);
            assert_eq!(ParameterId::from_index(i), Some(d.id));
        }
        assert_eq!(ParameterId::from_index(catalog.len()), None);
    }

    #[test]
    fn test_defaults_match_declared_types() {
        for d in Catalog::global().descriptors() {
            assert_eq!(
                d.default.value_type(),
                d.value_type,
                "default of {} has wrong type",
                d.name
            );
            if !matches!(d.default, DefaultValue::File(_)) {
                assert!(
                    d.check(&d.default.materialize(None)).is_ok(),
                    "default of {} fails its own validation",
                    d.name
                );
            }
        }
    }

    #[test]
    fn test_names_unique_and_well_formed() {
        let descriptors = Catalog::global().descriptors();
        let names: BTreeSet<_> = descriptors.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), descriptors.len());
        for d in descriptors {
            assert_eq!(d.name, format!("{}@{}", d.group, d.field()));
        }
    }

    #[test]
    fn test_find_by_either_name() {
        let catalog = Catalog::global();
        let by_wire = catalog.find("image_acquisition@image_width").unwrap();
        let by_const = catalog.find("IMAGE_ACQUISITION_IMAGE_WIDTH").unwrap();
        assert_eq!(by_wire.id, ParameterId::ImageAcquisitionImageWidth);
        assert_eq!(by_const.id, by_wire.id);
        assert_eq!(
            "device@serial_number".parse::<ParameterId>().unwrap(),
            ParameterId::DeviceSerialNumber
        );
        assert!(matches!(
            catalog.find("device@nope"),
            Err(EconfError::NotFound(_))
        ));
    }

    #[test]
    fn test_groups_sorted() {
        assert_eq!(
            Catalog::global().groups(),
            vec!["device", "image_acquisition", "network"]
        );
    }

    #[test]
    fn test_validation_rules() {
        let range = Validation::Range { min: 0.0, max: 48.0 };
        assert!(range.check(&ParameterValue::F32(12.0)).is_ok());
        assert!(range.check(&ParameterValue::F32(48.5)).is_err());
        assert!(range.check(&ParameterValue::F64(f64::NAN)).is_err());

        let len = Validation::MaxLength(4);
        assert!(len.check(&ParameterValue::String("abcd".into())).is_ok());
        assert!(len.check(&ParameterValue::String("abcde".into())).is_err());

        let one_of = Validation::OneOf(&[0, 1, 2]);
        assert!(one_of.check(&ParameterValue::I32(2)).is_ok());
        assert!(one_of.check(&ParameterValue::I32(3)).is_err());
    }

    #[test]
    fn test_descriptor_check_reports_mismatch() {
        let d = ParameterId::ImageAcquisitionExposure.descriptor();
        assert!(matches!(
            d.check(&ParameterValue::I32(5)),
            Err(EconfError::TypeMismatch {
                expected: ValueType::F64,
                actual: ValueType::I32,
                ..
            })
        ));
        assert!(matches!(
            d.check(&ParameterValue::F64(5000.0)),
            Err(EconfError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_file_default_reads_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("calibration.bin"), [1u8, 2, 3]).unwrap();

        let default = DefaultValue::File("calibration.bin");
        assert_eq!(
            default.materialize(Some(dir.path())),
            ParameterValue::Blob(vec![1, 2, 3])
        );
        assert_eq!(
            DefaultValue::File("missing.bin").materialize(Some(dir.path())),
            ParameterValue::Blob(Vec::new())
        );
        assert_eq!(default.materialize(None), ParameterValue::Blob(Vec::new()));
    }
}
