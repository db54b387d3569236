//! Chromiumoxide-backed [`AutomationHandle`] implementation.
//!
//! Chromiumoxide is async; this handle drives each CDP call to completion on
//! a tokio runtime so it can satisfy the blocking handle contract. Calls may
//! come from a plain thread, a `spawn_blocking` task, or a task on a
//! multi-threaded runtime. Tasks on a current-thread runtime cannot block and
//! get [`DriverError::Unavailable`].

use std::future::Future;

use chromiumoxide::Browser;
use chromiumoxide::cdp::js_protocol::runtime::{
    CallArgument, CallFunctionOnParams, EvaluateParams,
};
use chromiumoxide::page::Page;
use serde_json::Value as JsonValue;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::driver::{AutomationHandle, DriverError};

fn map_page_error(err: impl std::fmt::Display) -> DriverError {
    DriverError::Evaluate(err.to_string())
}

/// Blocking handle over a chromiumoxide [`Page`].
#[derive(Debug, Clone)]
pub struct ChromiumoxideHandle {
    runtime: Handle,
    browser_key: String,
    page: Page,
}

impl ChromiumoxideHandle {
    /// Wrap `page`, keyed by the websocket address of the browser that owns it.
    pub fn new(runtime: Handle, browser: &Browser, page: Page) -> Self {
        Self::with_browser_key(runtime, browser.websocket_address().clone(), page)
    }

    /// Wrap `page` with an explicit browser-instance key.
    pub fn with_browser_key(runtime: Handle, browser_key: impl Into<String>, page: Page) -> Self {
        Self {
            runtime,
            browser_key: browser_key.into(),
            page,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    fn block_on<T, E, F>(&self, future: F) -> Result<T, DriverError>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        block_on_runtime(&self.runtime, future)
    }
}

/// Drive `future` to completion on `runtime` from synchronous code.
///
/// Threads already inside a multi-threaded runtime hand their worker off with
/// `block_in_place` first; that is a no-op on blocking-pool threads.
fn block_on_runtime<T, E, F>(runtime: &Handle, future: F) -> Result<T, DriverError>
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    let result = match Handle::try_current() {
        Err(_) => runtime.block_on(future),
        Ok(current) => match current.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| runtime.block_on(future))
            }
            _ => {
                return Err(DriverError::Unavailable(
                    "chromiumoxide handle called from a current-thread runtime; \
                     move the call to a blocking thread"
                        .to_string(),
                ));
            }
        },
    };
    result.map_err(map_page_error)
}

impl AutomationHandle for ChromiumoxideHandle {
    fn url(&self) -> Result<String, DriverError> {
        self.block_on(self.page.url())?
            .ok_or_else(|| DriverError::Unavailable("page has no URL".to_string()))
    }

    fn page_guid(&self) -> Result<String, DriverError> {
        Ok(self.page.target_id().as_ref().to_string())
    }

    fn frame_guid(&self) -> Result<String, DriverError> {
        self.block_on(self.page.mainframe())?
            .map(|id| id.as_ref().to_string())
            .ok_or_else(|| DriverError::Unavailable("page has no main frame".to_string()))
    }

    fn browser_guid(&self) -> Result<String, DriverError> {
        Ok(self.browser_key.clone())
    }

    fn evaluate(&self, script: &str, arg: Option<JsonValue>) -> Result<JsonValue, DriverError> {
        let result = match arg {
            Some(arg) => {
                let params = CallFunctionOnParams::builder()
                    .function_declaration(script)
                    .argument(CallArgument::builder().value(arg).build())
                    .return_by_value(true)
                    .await_promise(true)
                    .build()
                    .map_err(DriverError::Evaluate)?;
                self.block_on(self.page.evaluate_function(params))?
            }
            None => {
                let params = EvaluateParams::builder()
                    .expression(script)
                    .return_by_value(true)
                    .await_promise(true)
                    .build()
                    .map_err(DriverError::Evaluate)?;
                self.block_on(self.page.evaluate_expression(params))?
            }
        };
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }
}
