//! Handler-chain execution over one pipe.

use std::{future::Future, pin::Pin, sync::Arc};

use {
    tokio::sync::RwLock,
    tracing::{debug, error, info, warn},
};

use {
    crate::{
        Error, Result,
        http::{HttpConfig, HttpDriver},
        pipe::Pipe,
        retry::RetryPolicy,
    },
    flowline_protocol::{CODE_COMPLETED, CODE_FAILED, Event, ReceiveOptions},
};

/// Boxed future returned by both handler kinds.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Callback invoked for each received event.
pub type MessageHandler = Arc<dyn Fn(Event, Arc<Pipe>) -> HandlerFuture + Send + Sync>;

/// Callback invoked when a message handler fails.
pub type ErrorHandler =
    Arc<dyn Fn(Arc<anyhow::Error>, Event, Arc<Pipe>) -> HandlerFuture + Send + Sync>;

/// Drains one pipe through two ordered handler chains.
///
/// Message handlers run in registration order and short-circuit on the
/// first failure. Error handlers then all run, also in registration
/// order, regardless of each other's outcome. Completion is automatic
/// unless a handler failed while error handlers are registered; in that
/// case responsibility transfers to the error chain and the message stays
/// outstanding for this step.
pub struct Worker {
    pipe: Arc<Pipe>,
    on_message: Vec<MessageHandler>,
    on_error: Vec<ErrorHandler>,
    running: RwLock<bool>,
}

impl Worker {
    pub fn new(pipe: Pipe) -> Self {
        Self {
            pipe: Arc::new(pipe),
            on_message: Vec::new(),
            on_error: Vec::new(),
            running: RwLock::new(false),
        }
    }

    /// Worker over the hosted HTTP API, polling `step` with the worker
    /// receive profile.
    pub fn http(config: HttpConfig, step: impl Into<String>) -> Result<Self> {
        let driver = HttpDriver::new(config)?;
        let pipe = Pipe::with_options(Arc::new(driver), ReceiveOptions::worker(step))?;
        Ok(Self::new(pipe))
    }

    /// The pipe this worker drains.
    pub fn pipe(&self) -> &Arc<Pipe> {
        &self.pipe
    }

    /// Append a message handler. Handlers run in registration order.
    pub fn on_message<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Event, Arc<Pipe>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_message
            .push(Arc::new(move |event, pipe| Box::pin(handler(event, pipe))));
        self
    }

    /// Append an error handler. Error handlers run in registration order
    /// and all of them run.
    pub fn on_error<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Arc<anyhow::Error>, Event, Arc<Pipe>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_error
            .push(Arc::new(move |cause, event, pipe| {
                Box::pin(handler(cause, event, pipe))
            }));
        self
    }

    /// Start the pipe's pump and drain it until the worker is stopped.
    pub async fn run(&self) -> Result<()> {
        self.run_inner(0).await
    }

    /// Like [`run`](Self::run), but stop after `limit` buffered events.
    pub async fn run_bounded(&self, limit: usize) -> Result<()> {
        self.run_inner(limit).await
    }

    async fn run_inner(&self, limit: usize) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(Error::already_running("worker"));
            }
            *running = true;
        }

        if limit > 0 {
            self.pipe.start_bounded(limit).await?;
        } else {
            self.pipe.start().await?;
        }
        info!(step = self.pipe.step(), "worker started");

        while let Some(event) = self.pipe.next().await {
            self.process(event).await;
        }

        info!(step = self.pipe.step(), "worker drained");
        Ok(())
    }

    /// Stop the pipe's pump. The drain loop finishes buffered events and
    /// then returns from [`run`](Self::run).
    pub async fn stop(&self) {
        self.pipe.stop().await;
    }

    async fn process(&self, event: Event) {
        let id = event.id.clone();
        let step = self.pipe.step();
        debug!(%id, step, "processing event");

        let mut failure = None;
        for handler in &self.on_message {
            if let Err(cause) = handler(event.clone(), Arc::clone(&self.pipe)).await {
                warn!(%id, step, error = %cause, "message handler failed");
                failure = Some(cause);
                break;
            }
        }

        let Some(cause) = failure else {
            self.finish(&id).await;
            return;
        };

        self.record_failure(&id, &cause).await;

        if self.on_error.is_empty() {
            // No error chain: the failure is recorded and the message
            // still moves on.
            self.finish(&id).await;
            return;
        }

        let cause = Arc::new(cause);
        for handler in &self.on_error {
            if let Err(error) =
                handler(Arc::clone(&cause), event.clone(), Arc::clone(&self.pipe)).await
            {
                warn!(%id, step, error = %error, "error handler failed");
            }
        }
    }

    /// Record the failure in the route log, patiently: losing a failure
    /// record is worse than a slow one.
    async fn record_failure(&self, id: &str, cause: &anyhow::Error) {
        let text = format!("failed to process step {}: {cause}", self.pipe.step());
        let logged = RetryPolicy::PATIENT
            .run(|| {
                let pipe = Arc::clone(&self.pipe);
                let text = text.clone();
                let id = id.to_string();
                async move { pipe.log(&id, CODE_FAILED, &text).await }
            })
            .await;
        if let Err(error) = logged {
            error!(id, error = %error, "could not record handler failure");
        }
    }

    /// Append the completion log entry and complete the step.
    async fn finish(&self, id: &str) {
        let step = self.pipe.step();
        let text = format!("completed step {step}");

        let logged = RetryPolicy::PATIENT
            .run(|| {
                let pipe = Arc::clone(&self.pipe);
                let text = text.clone();
                let id = id.to_string();
                async move { pipe.log(&id, CODE_COMPLETED, &text).await }
            })
            .await;
        if let Err(error) = logged {
            error!(id, error = %error, "could not record completion");
        }

        let completed = RetryPolicy::PATIENT
            .run(|| {
                let pipe = Arc::clone(&self.pipe);
                let id = id.to_string();
                async move { pipe.complete(&id).await }
            })
            .await;
        match completed {
            Ok(true) => debug!(id, step, "completed event"),
            Ok(false) => debug!(id, step, "completion refused by the service"),
            Err(error) => error!(id, error = %error, "could not complete event"),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use {async_trait::async_trait, tokio::sync::Mutex};

    use {
        super::*,
        crate::Driver,
        flowline_protocol::{Decoration, RouteLog},
    };

    /// Serves one scripted batch, then empty batches; records log and
    /// completion calls.
    struct ChainDriver {
        batch: Mutex<Vec<Event>>,
        log_entries: Mutex<Vec<RouteLog>>,
        completions: Mutex<Vec<String>>,
    }

    impl ChainDriver {
        fn with_events(events: Vec<Event>) -> Self {
            Self {
                batch: Mutex::new(events),
                log_entries: Mutex::new(Vec::new()),
                completions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Driver for ChainDriver {
        async fn send(&self, _payload: &str, _route: &[String]) -> Result<String> {
            Ok("unused".into())
        }

        async fn recv(&self, _options: &ReceiveOptions) -> Result<Vec<Event>> {
            Ok(std::mem::take(&mut *self.batch.lock().await))
        }

        async fn ack(&self, _id: &str, _step: &str) -> Result<bool> {
            Ok(true)
        }

        async fn complete(&self, id: &str, _step: &str) -> Result<bool> {
            self.completions.lock().await.push(id.to_string());
            Ok(true)
        }

        async fn append_log(&self, _id: &str, entry: &RouteLog) -> Result<bool> {
            self.log_entries.lock().await.push(entry.clone());
            Ok(true)
        }

        async fn add_steps_after(
            &self,
            _id: &str,
            _after: &str,
            _steps: &[String],
        ) -> Result<bool> {
            Ok(true)
        }

        async fn decorate(&self, _id: &str, _decorations: &[Decoration]) -> Result<Vec<bool>> {
            Ok(Vec::new())
        }

        async fn get_decorations(&self, _id: &str, _keys: &[String]) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            ..Default::default()
        }
    }

    fn worker_over(driver: Arc<ChainDriver>) -> Worker {
        let pipe = Pipe::new(driver, "enrich").unwrap();
        Worker::new(pipe)
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let driver = Arc::new(ChainDriver::with_events(vec![event("m1")]));
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut worker = worker_over(Arc::clone(&driver));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            worker.on_message(move |_event, _pipe| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().await.push(tag);
                    Ok(())
                }
            });
        }

        worker.run_bounded(1).await.unwrap();

        assert_eq!(*order.lock().await, vec!["first", "second", "third"]);
        assert_eq!(*driver.completions.lock().await, vec!["m1"]);
        let entries = driver.log_entries.lock().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].code, CODE_COMPLETED);
    }

    #[tokio::test]
    async fn failure_short_circuits_remaining_handlers() {
        let driver = Arc::new(ChainDriver::with_events(vec![event("m1")]));
        let later_calls = Arc::new(AtomicUsize::new(0));
        let mut worker = worker_over(Arc::clone(&driver));

        worker.on_message(|_event, _pipe| async { anyhow::bail!("broken") });
        {
            let later_calls = Arc::clone(&later_calls);
            worker.on_message(move |_event, _pipe| {
                let later_calls = Arc::clone(&later_calls);
                async move {
                    later_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        worker.run_bounded(1).await.unwrap();

        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        // Recorded failure, then auto-completion: no error chain exists.
        let entries = driver.log_entries.lock().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].code, CODE_FAILED);
        assert_eq!(entries[1].code, CODE_COMPLETED);
        assert_eq!(*driver.completions.lock().await, vec!["m1"]);
    }

    #[tokio::test]
    async fn error_chain_suppresses_auto_completion() {
        let driver = Arc::new(ChainDriver::with_events(vec![event("m1")]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut worker = worker_over(Arc::clone(&driver));

        worker.on_message(|_event, _pipe| async { anyhow::bail!("broken") });
        {
            let seen = Arc::clone(&seen);
            worker.on_error(move |cause, _event, _pipe| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().await.push(cause.to_string());
                    Ok(())
                }
            });
        }

        worker.run_bounded(1).await.unwrap();

        assert_eq!(*seen.lock().await, vec!["broken"]);
        let entries = driver.log_entries.lock().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].code, CODE_FAILED);
        assert!(driver.completions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn every_error_handler_runs_even_when_one_fails() {
        let driver = Arc::new(ChainDriver::with_events(vec![event("m1")]));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut worker = worker_over(Arc::clone(&driver));

        worker.on_message(|_event, _pipe| async { anyhow::bail!("broken") });
        worker.on_error(|_cause, _event, _pipe| async { anyhow::bail!("handler crashed too") });
        {
            let calls = Arc::clone(&calls);
            worker.on_error(move |_cause, _event, _pipe| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        worker.run_bounded(1).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_run_is_refused() {
        let driver = Arc::new(ChainDriver::with_events(vec![event("m1")]));
        let worker = Arc::new(worker_over(driver));

        let runner = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let second = worker.run().await;
        assert!(matches!(second, Err(Error::AlreadyRunning { .. })));

        worker.stop().await;
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_ends_the_drain_loop() {
        let driver = Arc::new(ChainDriver::with_events(Vec::new()));
        let worker = Arc::new(worker_over(driver));

        let runner = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        worker.stop().await;
        runner.await.unwrap().unwrap();
    }
}
