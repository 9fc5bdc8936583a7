//! `busload-connector` – the seam to the publish/subscribe bus.
//!
//! The bridge never talks to a concrete middleware.  It resolves named
//! endpoints through a [`Connector`] and drives them through the narrow
//! [`InputHandle`] / [`OutputHandle`] traits.  Swapping the middleware means
//! writing a new [`ConnectorFactory`]; nothing in `busload-core` changes.
//!
//! # Modules
//!
//! - [`endpoint`] – [`InputHandle`], [`OutputHandle`] and [`WaitTimeout`].
//! - [`connector`] – [`Connector`] (endpoint lookup) and [`ConnectorFactory`]
//!   (construction from a config path + profile name).
//! - [`profile`] – TOML profile files describing which endpoints exist and
//!   which topic each one is bound to.
//! - [`sim`] – [`SimBus`], an in-process loopback bus for tests, CI and the
//!   CLI's load runs.

pub mod connector;
pub mod endpoint;
pub mod profile;
pub mod sim;

pub use connector::{Connector, ConnectorFactory};
pub use endpoint::{InputHandle, OutputHandle, WaitTimeout};
pub use profile::{Durability, Profile};
pub use sim::{SimBus, SimConnectorFactory, SimInput, SimOutput, SimSample};
