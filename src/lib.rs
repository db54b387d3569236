//! Percy visual-testing SDK core.
//!
//! [`Percy`] negotiates with the local Percy CLI, enforces which capture
//! operation the negotiated session allows, resolves session identifiers
//! through an [`AutomationHandle`] and uploads the assembled payloads.

pub mod adapter;
pub mod cache;
pub mod capability;
pub mod client;
pub mod config;
pub mod driver;
pub mod logging;
pub mod percy;
pub mod region;
pub mod request;

pub use adapter::ChromiumoxideHandle;
pub use cache::IdentityCache;
pub use capability::{CapabilityGate, CaptureKind, SessionMode};
pub use client::{HttpServiceClient, ServiceClient, ServiceError, ServiceResponse};
pub use config::{PercyConfig, PercyConfigError, PercyConfigOverrides, Verbosity};
pub use driver::{AutomationHandle, DriverError, PageDriver, PercyDriver, StaticDriver};
pub use logging::{LogCallback, LogLevel, PercyLogRecord, PercyLogger};
pub use percy::{Percy, PercyError};
pub use region::{Algorithm, Region, RegionBuilder};
pub use request::{Options, RequestBuilder, options_from};
