//! Embedded Device Configuration Manager
//!
//! Typed, persistent, notification-driven parameter store for a camera-class
//! device.
//!
//! # Key Components
//!
//! - **Catalog**: static parameter list with types, defaults and access modes
//! - **Store**: layered SQLite persistence (save db, primary db, defaults)
//! - **Registry**: in-memory values with per-key ordering
//! - **Dispatcher**: per-parameter change callbacks
//! - **PollScheduler**: background sampling of hardware-owned parameters
//! - **Interface**: the application handle tying these together

pub mod catalog;
pub mod config;
pub mod defaults;
pub mod dispatcher;
pub mod error;
pub mod interface;
pub mod parameters;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod time;
pub mod value;

pub use catalog::{AccessMode, Catalog, DefaultValue, ParameterDescriptor, ParameterId, Validation};
pub use config::EconfConfig;
pub use defaults::DefaultSource;
pub use dispatcher::{FireReport, RegistrationHandle};
pub use error::{EconfError, Result};
pub use interface::{Interface, InterfaceBuilder};
pub use registry::Entry;
pub use scheduler::{PollState, PollStatsSnapshot};
pub use source::{DataSource, FileSource, MemorySource};
pub use store::Store;
pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};
pub use value::{ParameterType, ParameterValue, ValueType};
