//! SAS Bypass
//!
//! Built-in component with two object kinds:
//!
//! - loopback connectors (and their factories) that call modules living in
//!   the same process
//! - bypass modules that forward every invoker call through a connector to a
//!   module elsewhere, keeping one outgoing connection per local session and
//!   invoker
//!
//! Everything is driven by entries under `SAS/BYPASS`.

pub mod component;
pub mod loopback;
pub mod module;

pub use component::BypassComponent;
pub use loopback::{LoopbackConnection, LoopbackConnector, LoopbackConnectorFactory};
pub use module::BypassModule;

sas_core::declare_component!(BypassComponent::new());
