//! Capability negotiation with the Percy CLI.
//!
//! The first [`CapabilityGate::is_enabled`] call performs the healthcheck and
//! memoizes both the verdict and the session mode the CLI reports. Later
//! calls answer from memory until [`CapabilityGate::reset`].

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::client::{HEALTHCHECK_PATH, ServiceClient, ServiceError};
use crate::logging::PercyLogger;
use crate::percy::PercyError;

/// Major version of the Percy CLI this SDK talks to.
pub const SUPPORTED_MAJOR_VERSION: char = '1';

pub const NOT_RUNNING_MESSAGE: &str = "Percy is not running, disabling snapshots";
pub const DEPRECATED_AGENT_MESSAGE: &str = "You may be using @percy/agent \
which is no longer supported by this SDK. \
Please uninstall @percy/agent and install @percy/cli instead. \
https://docs.percy.io/docs/migrating-to-percy-cli";

const CATEGORY: &str = "healthcheck";

/// Capture mode negotiated with the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Unset,
    Web,
    Automate,
}

impl SessionMode {
    /// Interpret the healthcheck's `type` field. Matching is exact; absent,
    /// empty or unknown values leave the mode unset.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("automate") => SessionMode::Automate,
            Some("web") => SessionMode::Web,
            _ => SessionMode::Unset,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Unset => "unset",
            SessionMode::Web => "web",
            SessionMode::Automate => "automate",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two mutually exclusive capture operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Snapshot,
    Screenshot,
}

pub const SNAPSHOT_IN_AUTOMATE_MESSAGE: &str = "Invalid function call - snapshot(). \
Please use screenshot() function while using Percy with Automate. \
For more information on usage of screenshot, refer \
https://docs.percy.io/docs/integrate-functional-testing-with-visual-testing";

pub const SCREENSHOT_OUTSIDE_AUTOMATE_MESSAGE: &str = "Invalid function call - screenshot(). \
Please use snapshot() function for taking screenshot. \
screenshot() should be used only while using Percy with Automate. \
For more information on usage of snapshot(), refer doc for your language \
https://docs.percy.io/docs/end-to-end-testing";

impl SessionMode {
    /// Check that `kind` may run in this mode. Snapshots are refused in
    /// Automate sessions and screenshots everywhere else.
    pub fn permits(self, kind: CaptureKind) -> Result<(), PercyError> {
        match (kind, self) {
            (CaptureKind::Snapshot, SessionMode::Automate) => {
                Err(PercyError::InvalidCall(SNAPSHOT_IN_AUTOMATE_MESSAGE))
            }
            (CaptureKind::Screenshot, mode) if mode != SessionMode::Automate => {
                Err(PercyError::InvalidCall(SCREENSHOT_OUTSIDE_AUTOMATE_MESSAGE))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct CapabilityState {
    enabled: Option<bool>,
    mode: SessionMode,
}

/// Memoized healthcheck verdict and session mode.
#[derive(Debug, Default)]
pub struct CapabilityGate {
    state: Mutex<CapabilityState>,
}

impl CapabilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether captures should be sent to the CLI.
    ///
    /// The lock is held across the healthcheck so concurrent first callers
    /// wait for one negotiation instead of issuing their own. Failures never
    /// escape; they disable captures and are reported through `logger`.
    pub fn is_enabled(&self, client: &dyn ServiceClient, logger: &PercyLogger) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(enabled) = state.enabled {
            return enabled;
        }

        let (enabled, mode) = negotiate(client, logger);
        state.enabled = Some(enabled);
        state.mode = mode;
        enabled
    }

    /// Negotiated mode; [`SessionMode::Unset`] until a successful healthcheck.
    pub fn session_mode(&self) -> SessionMode {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .mode
    }

    /// Memoized verdict, without negotiating.
    pub fn cached_verdict(&self) -> Option<bool> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled
    }

    /// Replace the negotiated mode, for hosts that learn it out of band.
    pub fn set_session_mode(&self, mode: SessionMode) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .mode = mode;
    }

    /// Forget the verdict and the mode; the next check renegotiates.
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = CapabilityState::default();
    }
}

fn negotiate(client: &dyn ServiceClient, logger: &PercyLogger) -> (bool, SessionMode) {
    let response = match healthcheck(client) {
        Ok(response) => response,
        Err(err) => {
            logger.info(NOT_RUNNING_MESSAGE, Some(CATEGORY));
            logger.debug(err.to_string(), Some(CATEGORY));
            return (false, SessionMode::Unset);
        }
    };

    let Some(version) = response.version else {
        logger.info(DEPRECATED_AGENT_MESSAGE, Some(CATEGORY));
        return (false, SessionMode::Unset);
    };

    if !version.starts_with(SUPPORTED_MAJOR_VERSION) {
        logger.info(
            format!("Unsupported Percy CLI version, {version}"),
            Some(CATEGORY),
        );
        return (false, SessionMode::Unset);
    }

    let mode = SessionMode::parse(response.session_type.as_deref());
    logger.debug(
        format!("Percy CLI {version} ready, session mode {mode}"),
        Some(CATEGORY),
    );
    (true, mode)
}

struct Healthcheck {
    version: Option<String>,
    session_type: Option<String>,
}

fn healthcheck(client: &dyn ServiceClient) -> Result<Healthcheck, ServiceError> {
    let response = client.send(HEALTHCHECK_PATH, None)?;
    let envelope = response.envelope()?;
    if !envelope.success {
        return Err(ServiceError::InvalidResponse(
            envelope
                .error
                .unwrap_or_else(|| "healthcheck reported failure".to_string()),
        ));
    }
    Ok(Healthcheck {
        version: response.version,
        session_type: envelope.session_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ServiceResponse;
    use crate::config::Verbosity;
    use crate::logging::{LogCallback, LogConfig, LogLevel, PercyLogRecord};
    use serde_json::Value as JsonValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    struct ScriptedCli {
        version: Option<&'static str>,
        body: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedCli {
        fn healthy(version: Option<&'static str>, body: &'static str) -> Self {
            Self {
                version,
                body,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn unreachable() -> Self {
            Self {
                version: None,
                body: "",
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ServiceClient for ScriptedCli {
        fn send(
            &self,
            path: &str,
            _payload: Option<&JsonValue>,
        ) -> Result<ServiceResponse, ServiceError> {
            assert_eq!(path, HEALTHCHECK_PATH);
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            if self.fail {
                return Err(ServiceError::Transport {
                    endpoint: path.to_string(),
                    message: "connection refused".into(),
                });
            }
            Ok(ServiceResponse::new(
                self.version.map(str::to_string),
                self.body,
            ))
        }
    }

    fn capturing(verbose: Verbosity) -> (PercyLogger, Arc<std::sync::Mutex<Vec<PercyLogRecord>>>) {
        let records = Arc::new(std::sync::Mutex::new(Vec::new()));
        let capture = Arc::clone(&records);
        let callback: LogCallback = Arc::new(move |record: &PercyLogRecord| {
            capture.lock().unwrap().push(record.clone());
        });
        let logger = PercyLogger::with_config(LogConfig {
            verbose,
            external_logger: Some(callback),
        });
        (logger, records)
    }

    fn messages(records: &std::sync::Mutex<Vec<PercyLogRecord>>) -> Vec<String> {
        records
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.message.clone())
            .collect()
    }

    #[test]
    fn compatible_cli_enables_and_records_mode() {
        let cli = ScriptedCli::healthy(Some("1.28.0"), r#"{"success":true,"type":"automate"}"#);
        let (logger, records) = capturing(Verbosity::Medium);
        let gate = CapabilityGate::new();

        assert!(gate.is_enabled(&cli, &logger));
        assert_eq!(gate.session_mode(), SessionMode::Automate);
        assert!(messages(&records).is_empty());
    }

    #[test]
    fn verdict_is_memoized_until_reset() {
        let cli = ScriptedCli::healthy(Some("1.0.0"), r#"{"success":true,"type":"web"}"#);
        let (logger, _) = capturing(Verbosity::Medium);
        let gate = CapabilityGate::new();

        for _ in 0..3 {
            assert!(gate.is_enabled(&cli, &logger));
        }
        assert_eq!(cli.calls(), 1);

        gate.reset();
        assert_eq!(gate.cached_verdict(), None);
        assert_eq!(gate.session_mode(), SessionMode::Unset);

        assert!(gate.is_enabled(&cli, &logger));
        assert_eq!(cli.calls(), 2);
    }

    #[test]
    fn unreachable_cli_disables_with_single_diagnostic() {
        let cli = ScriptedCli::unreachable();
        let (logger, records) = capturing(Verbosity::Medium);
        let gate = CapabilityGate::new();

        assert!(!gate.is_enabled(&cli, &logger));
        assert!(!gate.is_enabled(&cli, &logger));

        assert_eq!(cli.calls(), 1);
        assert_eq!(messages(&records), vec![NOT_RUNNING_MESSAGE.to_string()]);
    }

    #[test]
    fn debug_mode_adds_error_detail() {
        let cli = ScriptedCli::unreachable();
        let (logger, records) = capturing(Verbosity::Detailed);
        let gate = CapabilityGate::new();

        assert!(!gate.is_enabled(&cli, &logger));

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].message, NOT_RUNNING_MESSAGE);
        assert_eq!(values[1].level, LogLevel::Debug);
        assert!(values[1].message.contains("connection refused"));
    }

    #[test]
    fn unsuccessful_healthcheck_disables() {
        let cli = ScriptedCli::healthy(Some("1.0.0"), r#"{"success":false,"error":"down"}"#);
        let (logger, records) = capturing(Verbosity::Medium);
        let gate = CapabilityGate::new();

        assert!(!gate.is_enabled(&cli, &logger));
        assert_eq!(messages(&records), vec![NOT_RUNNING_MESSAGE.to_string()]);
    }

    #[test]
    fn missing_version_reports_deprecated_agent_once() {
        let cli = ScriptedCli::healthy(None, r#"{"success":true}"#);
        let (logger, records) = capturing(Verbosity::Medium);
        let gate = CapabilityGate::new();

        assert!(!gate.is_enabled(&cli, &logger));
        assert!(!gate.is_enabled(&cli, &logger));

        assert_eq!(messages(&records), vec![DEPRECATED_AGENT_MESSAGE.to_string()]);
    }

    #[test]
    fn unsupported_version_is_named() {
        let cli = ScriptedCli::healthy(Some("0.0.1"), r#"{"success":true}"#);
        let (logger, records) = capturing(Verbosity::Medium);
        let gate = CapabilityGate::new();

        assert!(!gate.is_enabled(&cli, &logger));
        assert_eq!(
            messages(&records),
            vec!["Unsupported Percy CLI version, 0.0.1".to_string()]
        );
        assert_eq!(gate.session_mode(), SessionMode::Unset);
    }

    #[test]
    fn missing_type_leaves_mode_unset() {
        let cli = ScriptedCli::healthy(Some("1.0.0"), r#"{"success":true}"#);
        let (logger, _) = capturing(Verbosity::Medium);
        let gate = CapabilityGate::new();

        assert!(gate.is_enabled(&cli, &logger));
        assert_eq!(gate.session_mode(), SessionMode::Unset);
    }

    #[test]
    fn concurrent_first_checks_share_one_negotiation() {
        let cli = Arc::new(ScriptedCli::healthy(
            Some("1.0.0"),
            r#"{"success":true,"type":"web"}"#,
        ));
        let gate = Arc::new(CapabilityGate::new());
        let barrier = Arc::new(Barrier::new(6));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let cli = Arc::clone(&cli);
                let gate = Arc::clone(&gate);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let logger = PercyLogger::new(Verbosity::Minimal);
                    barrier.wait();
                    gate.is_enabled(cli.as_ref(), &logger)
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(cli.calls(), 1);
        assert_eq!(gate.session_mode(), SessionMode::Web);
    }

    #[test]
    fn snapshot_is_refused_in_automate_mode() {
        let err = SessionMode::Automate
            .permits(CaptureKind::Snapshot)
            .expect_err("automate refuses snapshots");
        assert!(err.to_string().contains("Please use screenshot()"));
        assert!(SessionMode::Web.permits(CaptureKind::Snapshot).is_ok());
        assert!(SessionMode::Unset.permits(CaptureKind::Snapshot).is_ok());
    }

    #[test]
    fn screenshot_requires_automate_mode() {
        for mode in [SessionMode::Web, SessionMode::Unset] {
            let err = mode
                .permits(CaptureKind::Screenshot)
                .expect_err("only automate allows screenshots");
            assert!(err.to_string().contains("Please use snapshot()"));
            assert!(
                err.to_string()
                    .ends_with("https://docs.percy.io/docs/end-to-end-testing")
            );
        }
        assert!(SessionMode::Automate.permits(CaptureKind::Screenshot).is_ok());
    }

    #[test]
    fn parse_session_mode() {
        assert_eq!(SessionMode::parse(Some("automate")), SessionMode::Automate);
        assert_eq!(SessionMode::parse(Some("web")), SessionMode::Web);
        assert_eq!(SessionMode::parse(Some("")), SessionMode::Unset);
        assert_eq!(SessionMode::parse(Some("Automate")), SessionMode::Unset);
        assert_eq!(SessionMode::parse(Some(" automate")), SessionMode::Unset);
        assert_eq!(SessionMode::parse(None), SessionMode::Unset);
    }
}
