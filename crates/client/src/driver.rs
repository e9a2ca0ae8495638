//! Transport seam between the runtime and the pipeline service.

use std::sync::Arc;

use async_trait::async_trait;

use {
    crate::Result,
    flowline_protocol::{Decoration, Event, ReceiveOptions, RouteLog},
};

/// One remote API call per method.
///
/// Implementations are shared across tasks and retried by the runtime, so
/// every method should be idempotent from the service's point of view.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Push a payload onto the first step of `route`. Returns the id the
    /// service assigned to the new message.
    async fn send(&self, payload: &str, route: &[String]) -> Result<String>;

    /// Fetch up to `options.count` events for `options.step`. An empty
    /// batch is a normal outcome, not an error.
    async fn recv(&self, options: &ReceiveOptions) -> Result<Vec<Event>>;

    /// Acknowledge delivery of a message to `step`.
    async fn ack(&self, id: &str, step: &str) -> Result<bool>;

    /// Mark `step` complete for the message. `Ok(false)` means the service
    /// refused because the step is already completed or would complete out
    /// of route order; it is not an error.
    async fn complete(&self, id: &str, step: &str) -> Result<bool>;

    /// Append a route-log entry for `entry.step`.
    async fn append_log(&self, id: &str, entry: &RouteLog) -> Result<bool>;

    /// Insert `steps` into the route immediately after `after`.
    async fn add_steps_after(&self, id: &str, after: &str, steps: &[String]) -> Result<bool>;

    /// Attach decorations to the message. Returns one flag per input
    /// decoration, order-aligned.
    async fn decorate(&self, id: &str, decorations: &[Decoration]) -> Result<Vec<bool>>;

    /// Read the decorations stored under `keys`, merged into one nested
    /// structure.
    async fn get_decorations(&self, id: &str, keys: &[String]) -> Result<serde_json::Value>;
}

/// Shared driver handle.
pub type DynDriver = Arc<dyn Driver>;
