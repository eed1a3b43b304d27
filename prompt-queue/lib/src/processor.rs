//! Queue processor.
//!
//! The processor is the single actor that advances the queue. Each tick it
//! reads the pending items, delivers the ones whose `not_before` has passed
//! through its [`DeliverySink`], and applies the sink's terminal action to the
//! store. Ticks from the timer, [`QueueProcessor::process`] and
//! [`QueueProcessor::force_deliver`] are serialized, so two ticks never
//! interleave their store updates.
//!
//! A failed delivery leaves the item pending; it is retried on every later
//! tick until it succeeds or is removed.
//!
//! ## Examples
//!
//! ```no_run
//! use prompt_queue_lib::{FileDropSink, MemoryKv, QueueItem, QueueProcessor, QueueStore};
//!
//! # async fn example() {
//! let sink = FileDropSink::new("/home/me/project".into(), ".prompt-queue", "{timestamp}_{id}.md");
//! let mut processor = QueueProcessor::new(QueueStore::new(MemoryKv::new()), sink);
//!
//! processor.subscribe(|| println!("queue changed"));
//! processor.store().add(QueueItem::after_hours("continue", 0.0, "")).await.unwrap();
//!
//! processor.start();
//! // ...
//! processor.shutdown().await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::TICK_INTERVAL;
use crate::error::{QueueError, StoreError};
use crate::sink::{DeliveryReceipt, DeliverySink};
use crate::store::{KeyValueStore, QueueStore};
use crate::types::{QueueItem, TerminalAction};

/// Handle returned by [`QueueProcessor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Outcome of one processing tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Ids delivered during the tick, in store order.
    pub delivered: Vec<String>,
    /// Ids whose delivery failed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl DeliveryReport {
    /// Number of items delivered.
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// True when the tick found nothing due.
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }
}

struct Inner<B, S> {
    store: QueueStore<B>,
    sink: S,
    tick_lock: Mutex<()>,
    listeners: StdMutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl<B: KeyValueStore, S: DeliverySink> Inner<B, S> {
    async fn tick(&self) -> Result<DeliveryReport, StoreError> {
        let _guard = self.tick_lock.lock().await;

        let now = Utc::now();
        let due: Vec<QueueItem> = self
            .store
            .get_pending()
            .await?
            .into_iter()
            .filter(|item| item.is_due(now))
            .collect();
        debug!(due = due.len(), "checked pending items");

        let mut report = DeliveryReport::default();
        for item in &due {
            match self.deliver_one(item).await {
                Ok(_) => report.delivered.push(item.id.clone()),
                Err(e) => report.failed.push((item.id.clone(), e.to_string())),
            }
        }

        if !report.delivered.is_empty() {
            self.notify();
        }
        Ok(report)
    }

    async fn force(&self, id: &str) -> Result<DeliveryReceipt, QueueError> {
        let _guard = self.tick_lock.lock().await;

        let item = self
            .store
            .get(id)
            .await?
            .filter(QueueItem::is_pending)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        let receipt = self.deliver_one(&item).await?;
        self.notify();
        Ok(receipt)
    }

    /// Delivers one item and applies the terminal action.
    async fn deliver_one(&self, item: &QueueItem) -> Result<DeliveryReceipt, QueueError> {
        let receipt = match self.sink.deliver(item).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(id = %item.id, sink = self.sink.name(), error = %e, "delivery failed");
                return Err(e.into());
            }
        };

        let applied = match self.sink.terminal_action() {
            TerminalAction::MarkProcessed => self.store.mark_processed(&item.id).await,
            TerminalAction::Remove => self.store.remove(&item.id).await,
        };
        if let Err(e) = applied {
            error!(id = %item.id, error = %e, "failed to record delivery");
            return Err(e.into());
        }

        info!(id = %item.id, sink = self.sink.name(), destination = %receipt, "delivered prompt");
        Ok(receipt)
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

/// Timer-driven scheduler that delivers due items through a sink.
pub struct QueueProcessor<B, S> {
    inner: Arc<Inner<B, S>>,
    interval: Duration,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl<B, S> QueueProcessor<B, S>
where
    B: KeyValueStore + 'static,
    S: DeliverySink + 'static,
{
    /// Creates a stopped processor ticking every [`TICK_INTERVAL`].
    pub fn new(store: QueueStore<B>, sink: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                sink,
                tick_lock: Mutex::new(()),
                listeners: StdMutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
            interval: TICK_INTERVAL,
            running: None,
        }
    }

    /// Overrides the tick interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The store the processor drives.
    pub fn store(&self) -> &QueueStore<B> {
        &self.inner.store
    }

    /// The sink items are delivered through.
    pub fn sink(&self) -> &S {
        &self.inner.sink
    }

    /// Registers a listener called after every tick that delivered at least
    /// one item and after every successful forced delivery.
    ///
    /// Listeners run synchronously on the processing task.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Starts the recurring tick. The first tick runs immediately.
    ///
    /// Must be called from within a tokio runtime. Calling it while already
    /// running replaces the previous timer.
    pub fn start(&mut self) {
        self.stop();

        let token = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let interval = self.interval;
        let cancel = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("queue processor cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let outcome = inner.tick().instrument(info_span!("queue_tick")).await;
                        if let Err(e) = outcome {
                            error!(error = %e, "queue tick failed");
                        }
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs_f64(), "queue processor started");
        self.running = Some((token, handle));
    }

    /// Cancels future ticks. An in-flight tick runs to completion.
    ///
    /// Safe to call when not started.
    pub fn stop(&mut self) {
        if let Some((token, _handle)) = self.running.take() {
            token.cancel();
            info!("queue processor stopped");
        }
    }

    /// Cancels future ticks and waits for an in-flight tick to finish.
    pub async fn shutdown(&mut self) {
        if let Some((token, handle)) = self.running.take() {
            token.cancel();
            if let Err(e) = handle.await {
                error!(error = %e, "queue processor task failed");
            }
            info!("queue processor stopped");
        }
    }

    /// Returns true while the timer is active.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Runs one tick now and returns the number of delivered items.
    ///
    /// ## Errors
    ///
    /// Returns an error if the pending items cannot be read.
    pub async fn process(&self) -> Result<usize, QueueError> {
        Ok(self.process_report().await?.delivered_count())
    }

    /// Runs one tick now and reports every delivery attempt.
    ///
    /// ## Errors
    ///
    /// Returns an error if the pending items cannot be read. Per-item
    /// failures are reported in [`DeliveryReport::failed`] instead.
    pub async fn process_report(&self) -> Result<DeliveryReport, QueueError> {
        Ok(self
            .inner
            .tick()
            .instrument(info_span!("queue_tick"))
            .await?)
    }

    /// Delivers one pending item now, ignoring its `not_before`.
    ///
    /// ## Errors
    ///
    /// Returns [`QueueError::NotFound`] if no pending item has `id`, or the
    /// sink or store error of the attempt. A failed item stays pending.
    pub async fn force_deliver(&self, id: &str) -> Result<DeliveryReceipt, QueueError> {
        self.inner
            .force(id)
            .instrument(info_span!("queue_force_deliver", id))
            .await
    }
}

impl<B, S> Drop for QueueProcessor<B, S> {
    fn drop(&mut self) {
        if let Some((token, _)) = self.running.take() {
            token.cancel();
        }
    }
}
