//! The pipe: one step's sending and receiving surface.

use std::sync::Arc;

use {
    tokio::sync::RwLock,
    tracing::info,
};

use {
    crate::{
        DynDriver, Error, Result,
        http::{HttpConfig, HttpDriver},
        pump::MessagePump,
        retry::RetryPolicy,
    },
    flowline_protocol::{Decoration, Event, ReceiveOptions, ReceiveOptionsPatch, RouteLog},
};

/// Client handle for one named step.
///
/// Owns a driver, the step's receive options, a retry policy for sends and
/// fetches, and the message pump that keeps the local buffer filled.
pub struct Pipe {
    driver: DynDriver,
    step: String,
    options: Arc<RwLock<ReceiveOptions>>,
    retry: Arc<RwLock<RetryPolicy>>,
    pump: MessagePump,
}

impl Pipe {
    /// Pipe for `step` with default receive options.
    pub fn new(driver: DynDriver, step: impl Into<String>) -> Result<Self> {
        Self::with_options(driver, ReceiveOptions::new(step))
    }

    /// Pipe adopting `options` as-is. Fails when the step name is empty.
    pub fn with_options(driver: DynDriver, options: ReceiveOptions) -> Result<Self> {
        if options.step.trim().is_empty() {
            return Err(Error::config("step name is required"));
        }
        let step = options.step.clone();
        let options = Arc::new(RwLock::new(options));
        let retry = Arc::new(RwLock::new(RetryPolicy::default()));
        let pump = MessagePump::new(
            Arc::clone(&driver),
            Arc::clone(&options),
            Arc::clone(&retry),
        );

        Ok(Self {
            driver,
            step,
            options,
            retry,
            pump,
        })
    }

    /// Pipe for `step` backed by the hosted HTTP API.
    pub fn http(config: HttpConfig, step: impl Into<String>) -> Result<Self> {
        let driver = HttpDriver::new(config)?;
        Self::new(Arc::new(driver), step)
    }

    /// The step this pipe is bound to.
    pub fn step(&self) -> &str {
        &self.step
    }

    // ── Remote operations ────────────────────────────────────────────────

    /// Push `payload` onto the first step of `route`, retrying per the
    /// pipe's retry policy. Returns the new message id.
    pub async fn send(&self, payload: &str, route: &[String]) -> Result<String> {
        if payload.is_empty() {
            return Err(Error::invalid_input("payload is required"));
        }
        if route.is_empty() {
            return Err(Error::invalid_input("route must name at least one step"));
        }

        let retry = *self.retry.read().await;
        let id = retry
            .run(|| {
                let driver = Arc::clone(&self.driver);
                async move { driver.send(payload, route).await }
            })
            .await?;
        info!(%id, "sent message");
        Ok(id)
    }

    /// Acknowledge delivery of a message to this step.
    pub async fn ack(&self, id: &str) -> Result<bool> {
        self.driver.ack(id, &self.step).await
    }

    /// Mark this step complete for the message. `Ok(false)` means the
    /// service refused because the step is already completed or would
    /// complete out of route order.
    pub async fn complete(&self, id: &str) -> Result<bool> {
        self.driver.complete(id, &self.step).await
    }

    /// Append a route-log entry for this step.
    pub async fn log(&self, id: &str, code: i32, message: &str) -> Result<bool> {
        let entry = RouteLog::new(&self.step, code, message);
        self.driver.append_log(id, &entry).await
    }

    /// Insert `steps` into the message's route immediately after this
    /// step.
    pub async fn add_steps(&self, id: &str, steps: &[String]) -> Result<bool> {
        if steps.is_empty() {
            return Err(Error::invalid_input("steps must name at least one step"));
        }
        self.driver.add_steps_after(id, &self.step, steps).await
    }

    /// Attach decorations to the message. Returns one flag per input
    /// decoration, order-aligned.
    pub async fn decorate(&self, id: &str, decorations: &[Decoration]) -> Result<Vec<bool>> {
        if decorations.is_empty() {
            return Err(Error::invalid_input(
                "decorations must contain at least one entry",
            ));
        }
        self.driver.decorate(id, decorations).await
    }

    /// Read the decorations stored under `keys` as one nested structure.
    pub async fn get_decorations(&self, id: &str, keys: &[String]) -> Result<serde_json::Value> {
        if keys.is_empty() {
            return Err(Error::invalid_input("keys must name at least one decoration"));
        }
        self.driver.get_decorations(id, keys).await
    }

    /// One immediate, unbuffered fetch, bypassing the pump.
    pub async fn fetch(&self) -> Result<Vec<Event>> {
        let options = self.options.read().await.clone();
        self.driver.recv(&options).await
    }

    // ── Configuration ────────────────────────────────────────────────────

    /// Merge a patch into the receive options. Fields the patch leaves
    /// unset keep their value; the step name is not patchable.
    pub async fn set_receive_options(&self, patch: ReceiveOptionsPatch) {
        self.options.write().await.apply(patch);
    }

    /// Snapshot of the current receive options.
    pub async fn receive_options(&self) -> ReceiveOptions {
        self.options.read().await.clone()
    }

    /// Replace the retry policy used for sends and pump fetches.
    pub async fn set_retry_policy(&self, policy: RetryPolicy) {
        *self.retry.write().await = policy;
    }

    // ── Pump lifecycle ───────────────────────────────────────────────────

    /// Start the message pump.
    pub async fn start(&self) -> Result<()> {
        self.pump.start(0).await
    }

    /// Start the message pump, stopping it after `limit` buffered events.
    pub async fn start_bounded(&self, limit: usize) -> Result<()> {
        self.pump.start(limit).await
    }

    /// Stop the message pump. Cooperative; buffered events still drain
    /// through [`next`](Self::next).
    pub async fn stop(&self) {
        self.pump.stop().await;
    }

    /// The oldest buffered event, waiting until one appears. `None` once
    /// the pump has stopped and the buffer is drained.
    pub async fn next(&self) -> Option<Event> {
        self.pump.next().await
    }
}
