//! Asynchronous adaptation worker and its link to the control cycle.
//!
//! The control cycle and the worker share exactly one [`AdaptationLink`]
//! per loop.  Everything on it is non-blocking from the control side:
//!
//! ```text
//! ┌──────────────┐ LookupRequest (Signal, latest wins) ┌──────────────┐
//! │ Control task │────────────────────────────────────▶│ Worker task  │
//! │ (periodic)   │ PerformanceSample (Channel, try)    │ (async)      │
//! │              │────────────────────────────────────▶│  store I/O   │
//! │              │◀──── snapshot (Mutex<Cell>) + flag ─│              │
//! └──────────────┘                                     └──────────────┘
//! ```
//!
//! - A request posted while an older one is still pending replaces it.
//!   There is no backlog.
//! - Samples are dropped, with a warning, when the channel is full.
//! - The result slot is guarded by a critical-section mutex held only for
//!   a copy.  The ready flag tells the control task to pick it up.
//! - Disabling the link drops pending requests; a lookup already running
//!   still publishes its result.
//!
//! The worker runs three tasks on an `edge-executor` in its own thread:
//! lookups, sample ingestion, and a periodic table flush driven by an
//! `async-io-mini` timer.

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::rc::Rc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use log::{debug, info, warn};

use super::cache::{LookupRequest, MlCacheSnapshot};
use super::store::{GainLookupStore, PerformanceSample};
use crate::app::ports::{StorageError, StoragePort};

/// Samples that may queue before the worker drains them.
pub const SAMPLE_DEPTH: usize = 4;

pub struct AdaptationLink {
    requests: Signal<CriticalSectionRawMutex, LookupRequest>,
    samples: Channel<CriticalSectionRawMutex, PerformanceSample, SAMPLE_DEPTH>,
    result: Mutex<CriticalSectionRawMutex, Cell<Option<MlCacheSnapshot>>>,
    ready: AtomicBool,
    enabled: AtomicBool,
    halt: Signal<CriticalSectionRawMutex, ()>,
}

impl Default for AdaptationLink {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptationLink {
    pub const fn new() -> Self {
        Self {
            requests: Signal::new(),
            samples: Channel::new(),
            result: Mutex::new(Cell::new(None)),
            ready: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            halt: Signal::new(),
        }
    }

    // ── Control side ──────────────────────────────────────────

    /// Post a lookup.  Supersedes any request the worker has not picked
    /// up yet.  Returns `false` when the link is disabled.
    pub fn request(&self, req: LookupRequest) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.requests.signal(req);
        true
    }

    /// Hand a closed performance window to the worker without blocking.
    pub fn submit_sample(&self, sample: PerformanceSample) -> bool {
        if self.samples.try_send(sample).is_err() {
            warn!("Adaptation: sample channel full, dropping sample");
            return false;
        }
        true
    }

    /// Take the newest result if the worker has published one.
    pub fn take_result(&self) -> Option<MlCacheSnapshot> {
        if !self.ready.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.result.lock(Cell::take)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.requests.reset();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Ask the worker thread to flush and exit.
    pub fn shutdown(&self) {
        self.halt.signal(());
    }

    // ── Worker side ───────────────────────────────────────────

    fn publish(&self, snapshot: MlCacheSnapshot) {
        self.result.lock(|slot| slot.set(Some(snapshot)));
        self.ready.store(true, Ordering::Release);
    }
}

// ───────────────────────────────────────────────────────────────
// Worker
// ───────────────────────────────────────────────────────────────

pub struct AdaptationWorker<'a, S: StoragePort> {
    link: &'a AdaptationLink,
    store: GainLookupStore,
    storage: S,
}

impl<'a, S: StoragePort + 'a> AdaptationWorker<'a, S> {
    /// Build the worker and load the persisted table.
    pub fn new(link: &'a AdaptationLink, mut store: GainLookupStore, storage: S) -> Self {
        store.load(&storage);
        Self {
            link,
            store,
            storage,
        }
    }

    pub fn store(&self) -> &GainLookupStore {
        &self.store
    }

    /// Answer one lookup.  Publishes a snapshot when the store has a
    /// usable recommendation.
    pub fn handle_request(&mut self, req: LookupRequest) -> Option<MlCacheSnapshot> {
        if !self.link.is_enabled() {
            debug!("Adaptation: disabled, discarding lookup");
            return None;
        }
        let Some(rec) = self.store.lookup(req.value, req.ambient, req.hour, req.season) else {
            debug!("Adaptation: no recommendation for {:.2}", req.value);
            return None;
        };
        let snapshot = MlCacheSnapshot {
            value: req.value,
            ambient: req.ambient,
            hour: req.hour,
            season: req.season,
            gains: rec.gains,
            confidence: rec.confidence,
            updated_ms: req.issued_ms,
        };
        self.link.publish(snapshot);
        debug!(
            "Adaptation: published Kp={:.3} Ki={:.3} Kd={:.3} (confidence {:.2}{})",
            rec.gains.kp,
            rec.gains.ki,
            rec.gains.kd,
            rec.confidence,
            if rec.fallback { ", global best" } else { "" }
        );
        Some(snapshot)
    }

    pub fn handle_sample(&mut self, sample: PerformanceSample) {
        if self.store.log_sample(sample) {
            let _ = self.flush();
        }
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.store.persist(&mut self.storage)
    }

    /// Drain whatever is pending without waiting.  Returns the number of
    /// items handled.
    pub fn service_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(sample) = self.link.samples.try_receive() {
            self.handle_sample(sample);
            handled += 1;
        }
        if let Some(req) = self.link.requests.try_take() {
            self.handle_request(req);
            handled += 1;
        }
        handled
    }

    /// Run the worker until [`AdaptationLink::shutdown`] is called, then
    /// flush the table.
    pub fn run(self, flush_period: Duration) {
        let link = self.link;
        let executor: edge_executor::LocalExecutor<'a, 4> = edge_executor::LocalExecutor::new();
        let worker = Rc::new(RefCell::new(self));

        executor.spawn(lookup_loop(link, worker.clone())).detach();
        executor.spawn(sample_loop(link, worker.clone())).detach();
        executor.spawn(flush_loop(worker.clone(), flush_period)).detach();

        info!("Adaptation worker started (flush every {:?})", flush_period);
        futures_lite::future::block_on(executor.run(link.halt.wait()));

        let mut w = worker.borrow_mut();
        if w.store.is_dirty() {
            let _ = w.flush();
        }
        info!("Adaptation worker stopped");
    }
}

type SharedWorker<'a, S> = Rc<RefCell<AdaptationWorker<'a, S>>>;

async fn lookup_loop<'a, S: StoragePort + 'a>(link: &'a AdaptationLink, worker: SharedWorker<'a, S>) {
    loop {
        let req = link.requests.wait().await;
        worker.borrow_mut().handle_request(req);
    }
}

async fn sample_loop<'a, S: StoragePort + 'a>(link: &'a AdaptationLink, worker: SharedWorker<'a, S>) {
    loop {
        let sample = link.samples.receive().await;
        worker.borrow_mut().handle_sample(sample);
    }
}

async fn flush_loop<'a, S: StoragePort + 'a>(worker: SharedWorker<'a, S>, period: Duration) {
    loop {
        async_io_mini::Timer::after(period).await;
        let mut w = worker.borrow_mut();
        if w.store.is_dirty() {
            let _ = w.flush();
        }
    }
}

// ── Thread spawn ─────────────────────────────────────────────

/// Spawn a worker thread on the protocol core.  `name` must be
/// NUL-terminated (e.g. `"ml-heater\0"`).
pub fn spawn<S: StoragePort + Send + 'static>(
    link: &'static AdaptationLink,
    store: GainLookupStore,
    storage: S,
    flush_period: Duration,
    name: &'static str,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    crate::drivers::task_pin::spawn_on_core(
        crate::drivers::task_pin::Core::Pro,
        5,
        12,
        name,
        move || AdaptationWorker::new(link, store, storage).run(flush_period),
    )
}
