//! Plugin hosting runtime
//!
//! Loads components from shared libraries, keeps the objects they register
//! (connectors, modules, connector factories) in an [`ObjectRegistry`], runs
//! their network interfaces under a [`Watchdog`], and dispatches calls
//! through sessions and connections.

pub mod application;
pub mod component;
pub mod config;
pub mod error;
pub mod interface;
pub mod interface_manager;
pub mod invoker;
pub mod loader;
pub mod notifier;
pub mod object;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod thread;
pub mod thread_pool;
pub mod unique;
pub mod watchdog;

pub use application::Application;
pub use component::{Component, ComponentBox};
pub use config::{ConfigReader, MemoryConfigReader};
pub use error::{CoreError, ErrorCollector, ErrorList, NullErrors};
pub use interface::{Interface, InterfaceStatus};
pub use interface_manager::InterfaceManager;
pub use invoker::{Connection, Connector, ConnectorFactory, InvokeStatus, Invoker, Module, ModuleInfo};
pub use loader::{ComponentLoader, DynamicLibraryOpener, LibraryOpener, StaticLibraryOpener};
pub use notifier::Notifier;
pub use object::Object;
pub use reconnect::{CallFailure, ReconnectPolicy, RemoteConnector, Transport};
pub use registry::ObjectRegistry;
pub use session::{Session, SessionFactory, SessionGuard, SessionId, SessionManager};
pub use thread::{ManagedThread, ThreadStatus, TimerThread};
pub use thread_pool::{PooledThread, SimpleThreadPool, ThreadPool};
pub use unique::{ResourceFactory, ResourceManager, UniqueId};
pub use watchdog::{InterfaceEvent, Watchdog};
