// src/manager.rs

//! Reconciler scheduling
//!
//! The manager runs each registered reconciler against the objects of one
//! store. Store change notifications and requeue requests feed a
//! [`WorkQueue`] per reconciler; a fixed pool of workers drains it.
//!
//! The work queue guarantees that a key is never reconciled by two workers
//! at once. A key that changes while it is being reconciled is marked dirty
//! and handed out again once the running pass finishes, so no change is
//! lost and no pass overlaps another for the same object.
//!
//! Status-only changes do not trigger a pass; reconcilers write status
//! themselves and would otherwise trigger themselves forever.

use crate::controller::{Reconciler, Timings};
use crate::error::Result;
use crate::lock::{PackageLock, ensure_lock};
use crate::model::Object;
use crate::store::{ChangeKind, Selector, Store, WatchEvent};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default number of workers per reconciler
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Default)]
struct QueueState {
    /// Keys ready to be handed out, oldest first
    queue: VecDeque<String>,
    /// Keys in `queue`
    pending: HashSet<String>,
    /// Keys a worker is reconciling
    in_flight: HashSet<String>,
    /// In-flight keys that were added again
    dirty: HashSet<String>,
    /// Earliest scheduled requeue per key
    waiting: HashMap<String, Instant>,
}

/// Deduplicating queue of object names
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` unless it is already queued
    pub async fn add(&self, key: &str) {
        let mut state = self.state.lock().await;
        if state.pending.contains(key) {
            return;
        }
        if state.in_flight.contains(key) {
            state.dirty.insert(key.to_string());
            return;
        }
        state.pending.insert(key.to_string());
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Queue `key` once `delay` has passed
    ///
    /// An earlier pending requeue for the same key wins; a later one is
    /// dropped.
    pub fn add_after(self: &Arc<Self>, key: String, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let deadline = Instant::now() + delay;
            {
                let mut state = queue.state.lock().await;
                if state.waiting.get(&key).is_some_and(|at| *at <= deadline) {
                    return;
                }
                state.waiting.insert(key.clone(), deadline);
            }

            tokio::time::sleep_until(deadline).await;

            {
                let mut state = queue.state.lock().await;
                if state.waiting.get(&key) != Some(&deadline) {
                    return;
                }
                state.waiting.remove(&key);
            }
            queue.add(&key).await;
        });
    }

    /// Wait for the next key and mark it in flight
    pub async fn next(&self) -> String {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.pending.remove(&key);
                    state.in_flight.insert(key.clone());
                    return key;
                }
            }
            notified.await;
        }
    }

    /// Finish a key handed out by [`next`](Self::next)
    pub async fn done(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(key);
        if state.dirty.remove(key) {
            state.pending.insert(key.to_string());
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Number of keys waiting to be handed out
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }
}

/// Object names and change notifications of one store
#[async_trait]
trait Source: Send + Sync {
    async fn names(&self) -> Result<Vec<String>>;

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}

struct StoreSource<T: Object>(Arc<dyn Store<T>>);

#[async_trait]
impl<T: Object> Source for StoreSource<T> {
    async fn names(&self) -> Result<Vec<String>> {
        let objects = self.0.list(&Selector::everything()).await?;
        Ok(objects.into_iter().map(|v| v.object.name().to_string()).collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.0.subscribe()
    }
}

struct Controller {
    reconciler: Arc<dyn Reconciler>,
    source: Arc<dyn Source>,
    queue: Arc<WorkQueue>,
}

/// Runs reconcilers until shut down
pub struct Manager {
    controllers: Vec<Controller>,
    timings: Timings,
    workers: usize,
    lock: Option<Arc<dyn Store<PackageLock>>>,
}

impl Manager {
    pub fn new(timings: Timings, workers: usize) -> Self {
        Self {
            controllers: Vec::new(),
            timings,
            workers: workers.max(1),
            lock: None,
        }
    }

    /// Create the package ledger in `store` on start-up if it is missing
    pub fn with_lock(mut self, store: Arc<dyn Store<PackageLock>>) -> Self {
        self.lock = Some(store);
        self
    }

    /// Reconcile every object of `store` with `reconciler`
    ///
    /// Returns the reconciler's queue so callers can trigger passes directly.
    pub fn register<T: Object>(
        &mut self,
        store: Arc<dyn Store<T>>,
        reconciler: Arc<dyn Reconciler>,
    ) -> Arc<WorkQueue> {
        let queue = Arc::new(WorkQueue::new());
        self.controllers.push(Controller {
            reconciler,
            source: Arc::new(StoreSource(store)),
            queue: queue.clone(),
        });
        queue
    }

    /// Run until `shutdown` turns true or its sender is dropped
    ///
    /// Passes already running when shutdown is signalled finish (or time
    /// out) before this returns.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if let Some(lock) = &self.lock {
            ensure_lock(&**lock).await?;
        }

        info!(
            controllers = self.controllers.len(),
            workers = self.workers,
            "starting manager"
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        for controller in &self.controllers {
            let kind = controller.reconciler.kind();
            tasks.push(tokio::spawn(watch_source(
                kind,
                controller.source.clone(),
                controller.queue.clone(),
                shutdown.clone(),
            )));
            for id in 0..self.workers {
                tasks.push(tokio::spawn(work(
                    id,
                    controller.reconciler.clone(),
                    controller.queue.clone(),
                    self.timings.short_wait,
                    shutdown.clone(),
                )));
            }
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "manager task ended abnormally");
            }
        }
        info!("manager stopped");
        Ok(())
    }
}

async fn enqueue_all(kind: &str, source: &dyn Source, queue: &WorkQueue) {
    match source.names().await {
        Ok(names) => {
            debug!(%kind, count = names.len(), "enqueueing all objects");
            for name in names {
                queue.add(&name).await;
            }
        }
        Err(e) => warn!(%kind, error = %e, "cannot list objects"),
    }
}

async fn watch_source(
    kind: &'static str,
    source: Arc<dyn Source>,
    queue: Arc<WorkQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Subscribe before listing so nothing created in between is missed
    let mut events = source.subscribe();
    enqueue_all(kind, &*source, &queue).await;

    while !*shutdown.borrow() {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {}
            event = events.recv() => match event {
                Ok(event) if event.change == ChangeKind::StatusUpdated => {}
                Ok(event) => queue.add(&event.name).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(%kind, missed, "change notifications lagged; relisting");
                    enqueue_all(kind, &*source, &queue).await;
                }
                Err(RecvError::Closed) => break,
            },
        }
        if shutdown.has_changed().is_err() {
            break;
        }
    }
    debug!(%kind, "watch stopped");
}

async fn work(
    id: usize,
    reconciler: Arc<dyn Reconciler>,
    queue: Arc<WorkQueue>,
    short_wait: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let kind = reconciler.kind();
    while !*shutdown.borrow() {
        let key = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            key = queue.next() => key,
        };

        let requeue = match reconciler.reconcile(&key).await {
            Ok(result) => {
                if let Some(error) = result.error() {
                    debug!(%kind, name = %key, worker = id, %error, "pass failed");
                }
                result.requeue_after()
            }
            Err(e) => {
                warn!(%kind, name = %key, worker = id, error = %e, "cannot record reconcile outcome");
                Some(short_wait)
            }
        };

        queue.done(&key).await;
        match requeue {
            Some(delay) => queue.add_after(key, delay),
            None => debug!(%kind, name = %key, "object gone; not requeued"),
        }
    }
    debug!(%kind, worker = id, "worker stopped");
}
