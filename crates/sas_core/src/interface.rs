// Interface - network-facing endpoints run by the interface manager

use std::fmt;

use crate::error::ErrorCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceStatus {
    Unexpected,
    NotRunning,
    CannotStart,
    Started,
    Running,
    Stopped,
    Crashed,
    CannotStop,
    Ended,
}

impl fmt::Display for InterfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterfaceStatus::Unexpected => "unexpected",
            InterfaceStatus::NotRunning => "not running",
            InterfaceStatus::CannotStart => "cannot start",
            InterfaceStatus::Started => "started",
            InterfaceStatus::Running => "running",
            InterfaceStatus::Stopped => "stopped",
            InterfaceStatus::Crashed => "crashed",
            InterfaceStatus::CannotStop => "cannot stop",
            InterfaceStatus::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// A named endpoint with a blocking `run` and an out-of-band `shutdown`.
///
/// `shutdown` is called from another thread while `run` is executing and
/// must make `run` return.
pub trait Interface: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn run(&self, ec: &mut dyn ErrorCollector) -> InterfaceStatus;

    fn shutdown(&self, ec: &mut dyn ErrorCollector) -> InterfaceStatus;
}
