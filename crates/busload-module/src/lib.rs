//! `busload-module` – the script-facing bridge module.
//!
//! Load scripts import this module (under [`MODULE_PATH`]) and drive the bus
//! through four calls plus `init`.  Every call returns a single string; the
//! typed work happens in [`busload_core::BridgeContext`].
//!
//! # Modules
//!
//! - [`module`] – [`ScriptModule`]: lifecycle, string rendering, call
//!   dispatch by exported name.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console and
//!   optional OTLP tracing for the embedding process.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use busload_connector::{Connector, SimBus};
//! use busload_core::CohortSizes;
//! use busload_module::ScriptModule;
//! use busload_types::BridgeError;
//!
//! let bus: Arc<dyn Connector> = Arc::new(
//!     SimBus::builder()
//!         .with_input("MySubscriber::MyReader", "Square")
//!         .with_output("MyPublisher::MyWriter", "Square")
//!         .build()
//!         .unwrap(),
//! );
//! let module = ScriptModule::new(
//!     move |_: &std::path::Path, _: &str| -> Result<Arc<dyn Connector>, BridgeError> {
//!         Ok(Arc::clone(&bus))
//!     },
//! );
//!
//! assert_eq!(module.read(), "RTI Connector not initialized");
//! module.init("bus.toml", "MyLibrary::MyParticipant", CohortSizes::disabled()).unwrap();
//! assert_eq!(module.write(r#"{"x":1}"#), "7");
//! assert_eq!(module.read(), r#"{"x":1}"#);
//! ```

pub mod module;
pub mod telemetry;

pub use module::{EXPORTS, MODULE_PATH, ScriptModule, WRITE_BY_RATE_OK};
