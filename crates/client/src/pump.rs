//! Background fetch loop feeding a bounded in-process buffer.

use std::{sync::Arc, time::Duration};

use {
    tokio::{
        sync::{Mutex, RwLock, mpsc},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {
    crate::{DynDriver, Error, Result, retry::RetryPolicy},
    flowline_protocol::{Event, ReceiveOptions},
};

/// Wait between fetch cycles when the step is idle or fetching keeps
/// failing.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Keeps a local FIFO buffer of fetched events near the configured count.
///
/// Single-writer, single-reader: the fetch task appends, one consumer
/// drains through [`next`](Self::next). The buffer capacity is taken from
/// the receive options at start. The lifecycle is one-shot; a stopped pump
/// is not restarted.
pub struct MessagePump {
    driver: DynDriver,
    options: Arc<RwLock<ReceiveOptions>>,
    retry: Arc<RwLock<RetryPolicy>>,
    buffer: Mutex<Option<mpsc::Receiver<Event>>>,
    fetch_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    started: RwLock<bool>,
}

impl MessagePump {
    pub(crate) fn new(
        driver: DynDriver,
        options: Arc<RwLock<ReceiveOptions>>,
        retry: Arc<RwLock<RetryPolicy>>,
    ) -> Self {
        Self {
            driver,
            options,
            retry,
            buffer: Mutex::new(None),
            fetch_handle: Mutex::new(None),
            cancel: CancellationToken::new(),
            started: RwLock::new(false),
        }
    }

    /// Spawn the fetch loop. A `limit` above zero makes the pump stop
    /// itself once that many events have been buffered; already buffered
    /// events still drain through [`next`](Self::next).
    pub async fn start(&self, limit: usize) -> Result<()> {
        {
            let mut started = self.started.write().await;
            if *started {
                return Err(Error::already_running("message pump"));
            }
            *started = true;
        }

        let capacity = self.options.read().await.count.max(1) as usize;
        let (tx, rx) = mpsc::channel(capacity);
        *self.buffer.lock().await = Some(rx);

        let handle = tokio::spawn(Self::fetch_loop(
            Arc::clone(&self.driver),
            Arc::clone(&self.options),
            Arc::clone(&self.retry),
            tx,
            self.cancel.clone(),
            limit,
        ));
        *self.fetch_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Ask the fetch loop to exit. In-flight calls are not interrupted;
    /// the loop observes the signal at its next checkpoint, including
    /// between the attempts of a retried fetch.
    pub async fn stop(&self) {
        self.cancel.cancel();
        // Detached rather than aborted: the loop exits at its next
        // checkpoint without cutting off an in-flight call.
        let _ = self.fetch_handle.lock().await.take();
    }

    /// Pop the oldest buffered event, waiting until one appears. Yields
    /// `None` once the pump has stopped and the buffer is drained, or when
    /// the pump was never started.
    pub async fn next(&self) -> Option<Event> {
        let mut buffer = self.buffer.lock().await;
        match buffer.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    async fn fetch_loop(
        driver: DynDriver,
        options: Arc<RwLock<ReceiveOptions>>,
        retry: Arc<RwLock<RetryPolicy>>,
        tx: mpsc::Sender<Event>,
        cancel: CancellationToken,
        limit: usize,
    ) {
        let mut enqueued: usize = 0;
        loop {
            // Wait for buffer room before fetching, so a slow consumer
            // throttles the polling instead of piling up deliveries.
            let permit = tokio::select! {
                permit = tx.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                () = cancel.cancelled() => break,
            };

            let mut current = options.read().await.clone();
            if limit > 0 {
                current.count = current.count.min((limit - enqueued) as u32);
            }
            let policy = *retry.read().await;

            let fetched = policy
                .run_until_cancelled(&cancel, || {
                    let driver = Arc::clone(&driver);
                    let options = current.clone();
                    async move { driver.recv(&options).await }
                })
                .await;

            let events = match fetched {
                None => break,
                Some(Ok(events)) => events,
                Some(Err(error)) => {
                    drop(permit);
                    warn!(step = %current.step, error = %error, "fetch failed after retries");
                    if !idle_wait(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            if events.is_empty() {
                drop(permit);
                debug!(step = %current.step, "no events ready");
                if !idle_wait(&cancel).await {
                    break;
                }
                continue;
            }

            debug!(step = %current.step, count = events.len(), "buffering events");
            let mut queue = events.into_iter();
            if let Some(first) = queue.next() {
                permit.send(first);
                enqueued += 1;
            }
            for event in queue {
                let sent = tokio::select! {
                    sent = tx.send(event) => sent.is_ok(),
                    () = cancel.cancelled() => false,
                };
                if !sent {
                    return;
                }
                enqueued += 1;
            }

            if limit > 0 && enqueued >= limit {
                debug!(limit, "pump reached its event limit");
                break;
            }
        }
    }
}

async fn idle_wait(cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(IDLE_WAIT) => true,
        () = cancel.cancelled() => false,
    }
}
