//! Reconnecting connector
//!
//! [`RemoteConnector`] implements [`Connector`] for any [`Transport`]. Every
//! outward call runs in a bounded loop: a connectivity failure triggers a
//! reconnect and re-issues the call, at most `max_reconnect_recall` times.
//! Failures the remote side reports itself are never retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{ConfigReader, config_path};
use crate::error::{CoreError, ErrorCollector};
use crate::invoker::{Connection, Connector, InvokeStatus, Invoker, ModuleInfo};
use crate::object::{CONNECTOR_TYPE, Object};
use crate::session::SessionId;

pub const DEFAULT_MAX_RECONNECT_NUM: u32 = 10;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Connect attempts per reconnect; zero disables reconnecting
    pub max_reconnect_num: u32,
    /// Re-issues of one call after successful reconnects
    pub max_reconnect_recall: u32,
    /// Sleep before every connect attempt
    pub reconnect_sleep: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_reconnect_num: DEFAULT_MAX_RECONNECT_NUM,
            max_reconnect_recall: DEFAULT_MAX_RECONNECT_NUM,
            reconnect_sleep: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Read `MAX_RECONNECT_NUM`, `MAX_RECONNECT_MAX_RECALL` and
    /// `RECONNECT_DELAY` (seconds) below `base`. Negative values fall back
    /// to the defaults.
    pub fn from_config(config: &dyn ConfigReader, base: &str) -> Self {
        let num = config.number_entry_or(
            &config_path(base, "MAX_RECONNECT_NUM"),
            i64::from(DEFAULT_MAX_RECONNECT_NUM),
        );
        let max_reconnect_num = u32::try_from(num).unwrap_or(DEFAULT_MAX_RECONNECT_NUM);

        let recall = config.number_entry_or(
            &config_path(base, "MAX_RECONNECT_MAX_RECALL"),
            i64::from(max_reconnect_num),
        );
        let max_reconnect_recall = u32::try_from(recall).unwrap_or(max_reconnect_num);

        let delay = config.number_entry_or(
            &config_path(base, "RECONNECT_DELAY"),
            DEFAULT_RECONNECT_DELAY.as_secs() as i64,
        );
        let reconnect_sleep = u64::try_from(delay)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RECONNECT_DELAY);

        Self {
            max_reconnect_num,
            max_reconnect_recall,
            reconnect_sleep,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The link is broken; worth a reconnect
    Connection(String),
    /// The remote side rejected the call
    Remote { status: InvokeStatus, message: String },
}

/// One transport binding
pub trait Transport: Send + Sync + 'static {
    /// (Re-)establish the underlying handle
    fn open(&self, ec: &mut dyn ErrorCollector) -> bool;

    fn module_info(&self, module: &str) -> Result<ModuleInfo, CallFailure>;

    /// Create or refresh the remote session; returns the id the server uses
    fn begin_session(&self, module: &str, session: SessionId) -> Result<SessionId, CallFailure>;

    fn invoke(
        &self,
        module: &str,
        invoker: &str,
        session: SessionId,
        input: &[u8],
    ) -> Result<Vec<u8>, CallFailure>;

    fn end_session(&self, module: &str, session: SessionId) -> Result<(), CallFailure>;
}

struct Link<T> {
    name: String,
    transport: T,
    policy: ReconnectPolicy,
    connected: AtomicBool,
    reconnecting: Mutex<()>,
}

impl<T: Transport> Link<T> {
    fn connect(&self, ec: &mut dyn ErrorCollector) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            tracing::debug!(connector = %self.name, "Already connected");
            return true;
        }
        let ok = self.transport.open(ec);
        self.connected.store(ok, Ordering::SeqCst);
        ok
    }

    fn reconnect(&self, ec: &mut dyn ErrorCollector) -> bool {
        let _guard = self.reconnecting.lock();
        self.connected.store(false, Ordering::SeqCst);

        for attempt in 1..=self.policy.max_reconnect_num {
            std::thread::sleep(self.policy.reconnect_sleep);
            tracing::info!(connector = %self.name, attempt, "Reconnect attempt");
            if self.connect(ec) {
                return true;
            }
        }
        let e = CoreError::ServerNotFound(self.name.clone());
        tracing::error!(connector = %self.name, "{}", e);
        ec.add_error(&e);
        false
    }

    /// Run `call`, reconnecting and re-issuing it on connectivity failures
    fn call<R>(
        &self,
        ec: &mut dyn ErrorCollector,
        mut call: impl FnMut(&T) -> Result<R, CallFailure>,
    ) -> Result<R, InvokeStatus> {
        let mut recalls = 0;
        loop {
            match call(&self.transport) {
                Ok(value) => return Ok(value),
                Err(CallFailure::Remote { status, message }) => {
                    let error = match status {
                        InvokeStatus::NotImplemented => CoreError::ServerNotImplemented(message),
                        InvokeStatus::FatalError => CoreError::ServerFatalError(message),
                        _ => CoreError::ServerError(message),
                    };
                    ec.add_error(&error);
                    return Err(match status {
                        InvokeStatus::Ok => InvokeStatus::Error,
                        status => status,
                    });
                }
                Err(CallFailure::Connection(message)) => {
                    tracing::warn!(connector = %self.name, error = %message, "Connection lost, trying to reconnect");
                    ec.add_error(&CoreError::CommunicationFailure(message));
                    if recalls >= self.policy.max_reconnect_recall {
                        ec.add_error(&CoreError::RecallLimit(recalls));
                        return Err(InvokeStatus::FatalError);
                    }
                    if !self.reconnect(ec) {
                        return Err(InvokeStatus::FatalError);
                    }
                    recalls += 1;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote Connector
// ─────────────────────────────────────────────────────────────────────────────

/// Connector to a remote host that reconnects when the link drops
pub struct RemoteConnector<T: Transport> {
    link: Arc<Link<T>>,
}

impl<T: Transport> RemoteConnector<T> {
    /// Create an unconnected connector
    pub fn new(name: impl Into<String>, transport: T, policy: ReconnectPolicy) -> Self {
        Self {
            link: Arc::new(Link {
                name: name.into(),
                transport,
                policy,
                connected: AtomicBool::new(false),
                reconnecting: Mutex::new(()),
            }),
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.link.policy
    }

    pub fn transport(&self) -> &T {
        &self.link.transport
    }

    /// Whether the last connect attempt succeeded
    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    /// Drop the current handle and connect again
    pub fn reconnect(&self, ec: &mut dyn ErrorCollector) -> bool {
        self.link.reconnect(ec)
    }
}

impl<T: Transport> Object for RemoteConnector<T> {
    fn object_type(&self) -> &str {
        CONNECTOR_TYPE
    }

    fn name(&self) -> &str {
        &self.link.name
    }

    fn into_connector(self: Arc<Self>) -> Option<Arc<dyn Connector>> {
        Some(self)
    }
}

impl<T: Transport> Connector for RemoteConnector<T> {
    fn connect(&self, ec: &mut dyn ErrorCollector) -> bool {
        self.link.connect(ec)
    }

    fn get_module_info(&self, module_name: &str, ec: &mut dyn ErrorCollector) -> Option<ModuleInfo> {
        self.link
            .call(ec, |t| t.module_info(module_name))
            .ok()
    }

    fn create_connection(
        &self,
        module_name: &str,
        invoker_name: &str,
        _ec: &mut dyn ErrorCollector,
    ) -> Option<Box<dyn Connection>> {
        Some(Box::new(RemoteConnection {
            link: Arc::clone(&self.link),
            module: module_name.to_string(),
            invoker: invoker_name.to_string(),
            session: SessionId::UNSET,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote Connection
// ─────────────────────────────────────────────────────────────────────────────

/// Connection to one remote invoker, recalled after a reconnect
pub struct RemoteConnection<T: Transport> {
    link: Arc<Link<T>>,
    module: String,
    invoker: String,
    session: SessionId,
}

impl<T: Transport> Invoker for RemoteConnection<T> {
    fn invoke(&mut self, input: &[u8], output: &mut Vec<u8>, ec: &mut dyn ErrorCollector) -> InvokeStatus {
        let (module, invoker) = (self.module.as_str(), self.invoker.as_str());
        let mut session = self.session;
        let result = self.link.call(ec, |t| {
            session = t.begin_session(module, session)?;
            t.invoke(module, invoker, session, input)
        });
        self.session = session;
        match result {
            Ok(bytes) => {
                output.extend_from_slice(&bytes);
                InvokeStatus::Ok
            }
            Err(status) => status,
        }
    }
}

impl<T: Transport> Connection for RemoteConnection<T> {
    fn get_session(&mut self, ec: &mut dyn ErrorCollector) -> bool {
        let module = self.module.as_str();
        let current = self.session;
        match self.link.call(ec, |t| t.begin_session(module, current)) {
            Ok(id) => {
                self.session = id;
                true
            }
            Err(_) => false,
        }
    }

    fn session_id(&self) -> SessionId {
        self.session
    }
}

impl<T: Transport> Drop for RemoteConnection<T> {
    fn drop(&mut self) {
        if self.session.is_unset() {
            return;
        }
        if let Err(e) = self.link.transport.end_session(&self.module, self.session) {
            tracing::debug!(module = %self.module, session = %self.session, error = ?e, "Could not end remote session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigReader;
    use crate::error::{ErrorList, codes};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Fake transport: calls fail while `broken`, opens succeed from attempt
    /// `open_succeeds_at` on
    #[derive(Default)]
    struct Flaky {
        broken: AtomicBool,
        opens: AtomicUsize,
        open_succeeds_at: usize,
        invokes: AtomicUsize,
        remote_error: bool,
    }

    impl Transport for Arc<Flaky> {
        fn open(&self, _ec: &mut dyn ErrorCollector) -> bool {
            let attempt = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
            let ok = self.open_succeeds_at != 0 && attempt >= self.open_succeeds_at;
            if ok {
                self.broken.store(false, Ordering::SeqCst);
            }
            ok
        }

        fn module_info(&self, module: &str) -> Result<ModuleInfo, CallFailure> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(CallFailure::Connection("link down".into()));
            }
            Ok(ModuleInfo {
                description: format!("{module} module"),
                version: "1.0".into(),
            })
        }

        fn begin_session(&self, _module: &str, session: SessionId) -> Result<SessionId, CallFailure> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(CallFailure::Connection("link down".into()));
            }
            Ok(if session.is_unset() { SessionId::from(7) } else { session })
        }

        fn invoke(
            &self,
            _module: &str,
            _invoker: &str,
            _session: SessionId,
            input: &[u8],
        ) -> Result<Vec<u8>, CallFailure> {
            self.invokes.fetch_add(1, Ordering::SeqCst);
            if self.remote_error {
                return Err(CallFailure::Remote {
                    status: InvokeStatus::NotImplemented,
                    message: "no such operation".into(),
                });
            }
            if self.broken.load(Ordering::SeqCst) {
                return Err(CallFailure::Connection("link down".into()));
            }
            Ok(input.to_vec())
        }

        fn end_session(&self, _module: &str, _session: SessionId) -> Result<(), CallFailure> {
            Ok(())
        }
    }

    fn policy(num: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_reconnect_num: num,
            max_reconnect_recall: num,
            reconnect_sleep: Duration::from_millis(5),
        }
    }

    fn broken(open_succeeds_at: usize) -> Arc<Flaky> {
        Arc::new(Flaky {
            broken: AtomicBool::new(true),
            open_succeeds_at,
            ..Default::default()
        })
    }

    #[test]
    fn test_connect_is_idempotent() {
        let flaky = Arc::new(Flaky {
            open_succeeds_at: 1,
            ..Default::default()
        });
        let connector = RemoteConnector::new("c", Arc::clone(&flaky), policy(3));
        let mut ec = ErrorList::new();
        assert!(connector.connect(&mut ec));
        assert!(connector.connect(&mut ec));
        assert_eq!(flaky.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_always_failing_transport_exhausts_attempts() {
        let flaky = broken(0);
        let connector = RemoteConnector::new("c", Arc::clone(&flaky), policy(3));
        let mut ec = ErrorList::new();
        let mut connection = connector.create_connection("m", "op", &mut ec).unwrap();

        let started = Instant::now();
        let mut out = Vec::new();
        assert_eq!(connection.invoke(b"x", &mut out, &mut ec), InvokeStatus::FatalError);
        assert_eq!(flaky.opens.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(15));
        assert!(ec.contains_code(codes::SERVER_NOT_FOUND));
    }

    #[test]
    fn test_reconnect_on_second_attempt_recovers() {
        let flaky = broken(2);
        let connector = RemoteConnector::new("c", Arc::clone(&flaky), policy(3));
        let mut ec = ErrorList::new();
        let mut connection = connector.create_connection("m", "op", &mut ec).unwrap();

        let mut out = Vec::new();
        assert_eq!(connection.invoke(b"hello", &mut out, &mut ec), InvokeStatus::Ok);
        assert_eq!(out, b"hello");
        assert_eq!(flaky.opens.load(Ordering::SeqCst), 2);
        assert_eq!(connection.session_id(), SessionId::from(7));
    }

    #[test]
    fn test_remote_error_is_not_retried() {
        let flaky = Arc::new(Flaky {
            open_succeeds_at: 1,
            remote_error: true,
            ..Default::default()
        });
        let connector = RemoteConnector::new("c", Arc::clone(&flaky), policy(3));
        let mut ec = ErrorList::new();
        let mut connection = connector.create_connection("m", "op", &mut ec).unwrap();

        let mut out = Vec::new();
        assert_eq!(
            connection.invoke(b"x", &mut out, &mut ec),
            InvokeStatus::NotImplemented
        );
        assert_eq!(flaky.invokes.load(Ordering::SeqCst), 1);
        assert_eq!(flaky.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_recall_cap_gives_up_immediately() {
        let flaky = broken(1);
        let connector = RemoteConnector::new(
            "c",
            Arc::clone(&flaky),
            ReconnectPolicy {
                max_reconnect_recall: 0,
                ..policy(3)
            },
        );
        let mut ec = ErrorList::new();
        assert!(connector.get_module_info("m", &mut ec).is_none());
        assert!(ec.contains_code(codes::RECALL_LIMIT));
        assert_eq!(flaky.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_module_info_after_reconnect() {
        let flaky = broken(1);
        let connector = RemoteConnector::new("c", Arc::clone(&flaky), policy(2));
        let mut ec = ErrorList::new();
        let info = connector.get_module_info("m", &mut ec).unwrap();
        assert_eq!(info.description, "m module");
        assert!(connector.is_connected());
    }

    #[test]
    fn test_policy_from_config() {
        let config = MemoryConfigReader::new()
            .with_entry("SAS/C/MAX_RECONNECT_NUM", "3")
            .with_entry("SAS/C/RECONNECT_DELAY", "2");
        let policy = ReconnectPolicy::from_config(&config, "SAS/C");
        assert_eq!(policy.max_reconnect_num, 3);
        assert_eq!(policy.max_reconnect_recall, 3);
        assert_eq!(policy.reconnect_sleep, Duration::from_secs(2));

        let negative = MemoryConfigReader::new().with_entry("X/MAX_RECONNECT_NUM", "-1");
        assert_eq!(
            ReconnectPolicy::from_config(&negative, "X"),
            ReconnectPolicy::default()
        );
    }
}
