//! Concrete [`AutomationHandle`](crate::driver::AutomationHandle) bindings.

pub mod chromiumoxide;

pub use self::chromiumoxide::ChromiumoxideHandle;
