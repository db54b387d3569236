//! High-level Percy facade.
//!
//! [`Percy`] owns the process-wide state of the SDK: the memoized capability
//! verdict, the negotiated session mode, the session-identity cache and the
//! cached DOM serialization script. Every capture runs the same pipeline:
//! capability check, mode legality, identifier resolution, payload assembly
//! and a single request to the CLI.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::cache::IdentityCache;
use crate::capability::{CapabilityGate, CaptureKind, SessionMode};
use crate::client::{
    AUTOMATE_SCREENSHOT_PATH, DOM_SCRIPT_PATH, HttpServiceClient, SNAPSHOT_PATH, ServiceClient,
    ServiceError,
};
use crate::config::PercyConfig;
use crate::driver::{AutomationHandle, DriverError, PageDriver, PercyDriver};
use crate::logging::{LogConfig, PercyLogger};
use crate::request::{Options, RequestBuilder};

/// Framework tag reported with Automate screenshots.
pub const SCREENSHOT_FRAMEWORK: &str = "playwright";

const DOM_PRESENT_CHECK: &str = "!!window.PercyDOM";

/// Errors surfaced to callers of the [`Percy`] facade.
///
/// Capture failures are not part of this type: they are logged and the
/// capture yields `Ok(None)`.
#[derive(Debug, Error)]
pub enum PercyError {
    /// A capture was called in a session mode that forbids it.
    #[error("{0}")]
    InvalidCall(&'static str),
    #[error(transparent)]
    Client(#[from] ServiceError),
}

/// Failure of a single capture; always logged, never returned.
#[derive(Debug, Error)]
pub(crate) enum CaptureError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("failed to encode options: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Rejected(String),
}

/// Entry point of the SDK. Share it between threads through an [`Arc`].
pub struct Percy {
    config: PercyConfig,
    client: Arc<dyn ServiceClient>,
    logger: PercyLogger,
    gate: CapabilityGate,
    identities: Arc<IdentityCache>,
    dom_script: Mutex<Option<String>>,
}

impl fmt::Debug for Percy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Percy")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .field("identities", &self.identities)
            .finish()
    }
}

impl Percy {
    /// Build a facade talking to the CLI over HTTP.
    pub fn new(config: PercyConfig) -> Result<Self, PercyError> {
        let client = HttpServiceClient::new(&config)?;
        Ok(Self::with_client(config, Arc::new(client)))
    }

    /// Build a facade on top of a custom transport.
    pub fn with_client(config: PercyConfig, client: Arc<dyn ServiceClient>) -> Self {
        let logger = PercyLogger::with_config(LogConfig {
            verbose: config.verbose,
            external_logger: config.logger.clone(),
        });
        Self {
            config,
            client,
            logger,
            gate: CapabilityGate::new(),
            identities: Arc::new(IdentityCache::new()),
            dom_script: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PercyConfig {
        &self.config
    }

    pub fn logger(&self) -> &PercyLogger {
        &self.logger
    }

    /// Whether the CLI is reachable and compatible. Negotiates on first use.
    pub fn is_enabled(&self) -> bool {
        self.gate.is_enabled(self.client.as_ref(), &self.logger)
    }

    pub fn session_mode(&self) -> SessionMode {
        self.gate.session_mode()
    }

    pub fn set_session_mode(&self, mode: SessionMode) {
        self.gate.set_session_mode(mode);
    }

    pub fn identity_cache(&self) -> &Arc<IdentityCache> {
        &self.identities
    }

    /// Wrap a live page in a [`PercyDriver`] sharing this instance's
    /// identity cache.
    pub fn driver<'a, H: AutomationHandle + ?Sized>(&self, page: &'a H) -> PageDriver<'a, H> {
        PageDriver::new(page, Arc::clone(&self.identities))
    }

    /// Forget the capability verdict, session mode, cached session ids and
    /// the DOM script. The next capture renegotiates.
    pub fn reset(&self) {
        self.gate.reset();
        self.identities.clear();
        *self
            .dom_script
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Serialize the page's DOM and upload it as a snapshot named `name`.
    ///
    /// Returns `Ok(None)` when Percy is disabled or the capture failed, and
    /// [`PercyError::InvalidCall`] inside an Automate session.
    pub fn snapshot<H: AutomationHandle + ?Sized>(
        &self,
        page: &H,
        name: &str,
        options: Option<&Options>,
    ) -> Result<Option<JsonValue>, PercyError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        self.session_mode().permits(CaptureKind::Snapshot)?;

        match self.take_snapshot(page, name, options) {
            Ok(data) => Ok(data),
            Err(err) => {
                self.report(format!("Could not take DOM snapshot \"{name}\""), &err);
                Ok(None)
            }
        }
    }

    /// Ask the CLI to capture an Automate screenshot of the session behind
    /// `driver`.
    ///
    /// Returns `Ok(None)` when Percy is disabled or the capture failed, and
    /// [`PercyError::InvalidCall`] outside an Automate session.
    pub fn screenshot<D: PercyDriver + ?Sized>(
        &self,
        driver: &D,
        name: &str,
        options: Option<&Options>,
    ) -> Result<Option<JsonValue>, PercyError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        self.session_mode().permits(CaptureKind::Screenshot)?;

        match self.take_screenshot(driver, name, options) {
            Ok(data) => Ok(data),
            Err(err) => {
                self.report(format!("Could not take Percy Screenshot \"{name}\""), &err);
                Ok(None)
            }
        }
    }

    /// [`Percy::screenshot`] for a live page handle.
    pub fn screenshot_page<H: AutomationHandle + ?Sized>(
        &self,
        page: &H,
        name: &str,
        options: Option<&Options>,
    ) -> Result<Option<JsonValue>, PercyError> {
        self.screenshot(&self.driver(page), name, options)
    }

    fn take_snapshot<H: AutomationHandle + ?Sized>(
        &self,
        page: &H,
        name: &str,
        options: Option<&Options>,
    ) -> Result<Option<JsonValue>, CaptureError> {
        self.ensure_dom_script(page)?;

        let serialize_options = match options {
            Some(options) => serde_json::to_string(options)?,
            None => "{}".to_string(),
        };
        let dom_snapshot =
            page.evaluate(&format!("PercyDOM.serialize({serialize_options})"), None)?;

        let payload = RequestBuilder::new()
            .field("clientInfo", self.config.client_info.as_str())
            .field("environmentInfo", self.config.environment_info.as_str())
            .field("domSnapshot", dom_snapshot)
            .field("url", page.url()?)
            .field("name", name)
            .merge(options)
            .into_value();

        self.post(SNAPSHOT_PATH, &payload)
    }

    fn take_screenshot<D: PercyDriver + ?Sized>(
        &self,
        driver: &D,
        name: &str,
        options: Option<&Options>,
    ) -> Result<Option<JsonValue>, CaptureError> {
        let payload = RequestBuilder::new()
            .field("sessionId", driver.session_id()?)
            .field("frameGuid", driver.frame_guid()?)
            .field("pageGuid", driver.page_guid()?)
            .field("framework", SCREENSHOT_FRAMEWORK)
            .field("clientInfo", self.config.client_info.as_str())
            .field("environmentInfo", self.config.environment_info.as_str())
            .field("url", driver.url()?)
            .field("snapshotName", name)
            .nest("options", options)
            .into_value();

        self.post(AUTOMATE_SCREENSHOT_PATH, &payload)
    }

    fn post(&self, path: &str, payload: &JsonValue) -> Result<Option<JsonValue>, CaptureError> {
        let response = self.client.send(path, Some(payload))?;
        response
            .envelope()?
            .into_result()
            .map_err(CaptureError::Rejected)
    }

    /// Inject the DOM serialization script unless the page already has it.
    fn ensure_dom_script<H: AutomationHandle + ?Sized>(&self, page: &H) -> Result<(), CaptureError> {
        let present = page.evaluate(DOM_PRESENT_CHECK, None)?;
        if present.as_bool() == Some(true) {
            return Ok(());
        }
        let script = self.dom_script()?;
        page.evaluate(&script, None)?;
        Ok(())
    }

    fn dom_script(&self) -> Result<String, CaptureError> {
        let mut cached = self
            .dom_script
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(script) = cached.as_ref() {
            return Ok(script.clone());
        }

        let script = self.client.send(DOM_SCRIPT_PATH, None)?.body;
        *cached = Some(script.clone());
        Ok(script)
    }

    fn report(&self, headline: String, err: &CaptureError) {
        self.logger.error(headline, Some("capture"));
        self.logger.error(err.to_string(), Some("capture"));
    }
}
