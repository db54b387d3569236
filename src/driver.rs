//! Driver abstraction used by the Automate screenshot flow.
//!
//! [`AutomationHandle`] is the narrow boundary to a live browser page: it
//! exposes the page's public identifiers and a blocking script evaluation.
//! [`PercyDriver`] is what a screenshot needs from a session. It is
//! implemented by [`PageDriver`], which derives everything from a handle, and
//! by [`StaticDriver`], which is built from identifiers obtained elsewhere.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::cache::IdentityCache;

/// Function evaluated to ask the remote grid for session details. The grid
/// intercepts evaluations whose argument carries the executor prefix.
pub const SESSION_DETAILS_SCRIPT: &str = "_ => {}";
pub const SESSION_DETAILS_ARGUMENT: &str =
    "browserstack_executor: {\"action\":\"getSessionDetails\"}";

/// Field of the session details that identifies the Automate session.
pub const SESSION_ID_FIELD: &str = "hashed_id";

/// Errors returned by driver and handle operations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("script evaluation failed: {0}")]
    Evaluate(String),
    #[error("session details did not include '{0}'")]
    MissingField(&'static str),
    #[error("{0}")]
    Unavailable(String),
}

/// Blocking view of a live automation page.
pub trait AutomationHandle: Send + Sync {
    /// Current page URL.
    fn url(&self) -> Result<String, DriverError>;

    /// Protocol identifier of the page.
    fn page_guid(&self) -> Result<String, DriverError>;

    /// Protocol identifier of the page's main frame.
    fn frame_guid(&self) -> Result<String, DriverError>;

    /// Identifier of the browser instance that owns the page. Every page and
    /// frame of one browser must report the same value.
    fn browser_guid(&self) -> Result<String, DriverError>;

    /// Evaluate `script` in the page and wait for its JSON result. When `arg`
    /// is present the script is a function called with it.
    fn evaluate(&self, script: &str, arg: Option<JsonValue>) -> Result<JsonValue, DriverError>;
}

/// Identifiers a screenshot request carries.
pub trait PercyDriver: Send + Sync {
    fn url(&self) -> Result<String, DriverError>;

    fn session_id(&self) -> Result<String, DriverError>;

    fn page_guid(&self) -> Result<String, DriverError>;

    fn frame_guid(&self) -> Result<String, DriverError>;
}

/// [`PercyDriver`] backed by a live page handle.
///
/// The session id is resolved once per browser instance and shared through
/// the [`IdentityCache`].
pub struct PageDriver<'a, H: AutomationHandle + ?Sized> {
    handle: &'a H,
    cache: Arc<IdentityCache>,
}

impl<'a, H: AutomationHandle + ?Sized> PageDriver<'a, H> {
    pub fn new(handle: &'a H, cache: Arc<IdentityCache>) -> Self {
        Self { handle, cache }
    }

    pub fn handle(&self) -> &H {
        self.handle
    }

    fn fetch_session_id(&self) -> Result<String, DriverError> {
        let details = self.handle.evaluate(
            SESSION_DETAILS_SCRIPT,
            Some(JsonValue::String(SESSION_DETAILS_ARGUMENT.to_string())),
        )?;
        session_id_from_details(details)
    }
}

impl<H: AutomationHandle + ?Sized> fmt::Debug for PageDriver<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageDriver")
            .field("cache", &self.cache)
            .finish()
    }
}

impl<H: AutomationHandle + ?Sized> PercyDriver for PageDriver<'_, H> {
    fn url(&self) -> Result<String, DriverError> {
        self.handle.url()
    }

    fn session_id(&self) -> Result<String, DriverError> {
        let browser_guid = self.handle.browser_guid()?;
        self.cache
            .get_or_try_insert_with(&browser_guid, || self.fetch_session_id())
    }

    fn page_guid(&self) -> Result<String, DriverError> {
        self.handle.page_guid()
    }

    fn frame_guid(&self) -> Result<String, DriverError> {
        self.handle.frame_guid()
    }
}

/// Extract the session id from the grid's session details. The grid answers
/// with a JSON document encoded as a string; an already-decoded object is
/// accepted as well.
pub fn session_id_from_details(details: JsonValue) -> Result<String, DriverError> {
    let details = match details {
        JsonValue::String(raw) => serde_json::from_str::<JsonValue>(&raw)
            .map_err(|err| DriverError::Evaluate(format!("invalid session details: {err}")))?,
        other => other,
    };

    details
        .get(SESSION_ID_FIELD)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or(DriverError::MissingField(SESSION_ID_FIELD))
}

/// [`PercyDriver`] built from identifiers that were obtained outside of the
/// automation library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticDriver {
    url: String,
    session_id: String,
    page_guid: String,
    frame_guid: String,
}

impl StaticDriver {
    pub fn new(
        url: impl Into<String>,
        session_id: impl Into<String>,
        page_guid: impl Into<String>,
        frame_guid: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            session_id: session_id.into(),
            page_guid: page_guid.into(),
            frame_guid: frame_guid.into(),
        }
    }
}

impl PercyDriver for StaticDriver {
    fn url(&self) -> Result<String, DriverError> {
        Ok(self.url.clone())
    }

    fn session_id(&self) -> Result<String, DriverError> {
        Ok(self.session_id.clone())
    }

    fn page_guid(&self) -> Result<String, DriverError> {
        Ok(self.page_guid.clone())
    }

    fn frame_guid(&self) -> Result<String, DriverError> {
        Ok(self.frame_guid.clone())
    }
}
