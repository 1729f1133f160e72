// Copyright 2024 Felix Engl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::MinerConfig;
use crate::frontier::{FrontierUrl, WebsiteCache};
use crate::miner::record::{Admission, FailureVerdict, HostRecords};
use crate::miner::traits::{ContentAnalyser, Fetcher, MinedResult, ResultStore};
use crate::miner::worker::{WorkerHandle, WorkerResponse};
use crate::runtime::Shutdown;
use crate::status::{FrontierError, MinerError, StatusCode};
use crate::url::hostname_of;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use strum::Display;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// The lifecycle of a [WebsiteMinerManager].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display)]
pub enum ManagerState {
    Stopped,
    Running,
    /// No new urls are handed out, the workers finish their urls.
    Draining,
}

/// The counters of a running manager.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MinerStats {
    pub state: ManagerState,
    /// Urls currently at the workers.
    pub mining: usize,
    pub mined: u64,
    pub errors: u64,
    /// Urls skipped by the host records.
    pub skipped: u64,
    /// Urls on the ring.
    pub pending: usize,
    pub visited: u64,
}

/// The state shared between the manager and its handles.
#[derive(Debug)]
struct ManagerShared {
    state: Mutex<ManagerState>,
    stop: Mutex<Option<Shutdown>>,
    mining: AtomicUsize,
    mined: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
    pending: AtomicUsize,
    visited: AtomicU64,
}

impl ManagerShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ManagerState::Stopped),
            stop: Mutex::new(None),
            mining: AtomicUsize::new(0),
            mined: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            visited: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<ManagerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, state: ManagerState) {
        *self.state() = state;
    }

    fn stop_slot(&self) -> MutexGuard<Option<Shutdown>> {
        match self.stop.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn reset_counters(&self) {
        self.mining.store(0, Ordering::Relaxed);
        self.mined.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.pending.store(0, Ordering::Relaxed);
    }
}

/// Messages of a [ManagerHandle] to the running manager.
#[derive(Debug)]
enum ControlMessage {
    IgnoreHost(String),
}

/// Controls a [WebsiteMinerManager] from other tasks.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    shared: Arc<ManagerShared>,
    control: mpsc::UnboundedSender<ControlMessage>,
}

impl ManagerHandle {
    /// Requests the manager to drain and stop. Calling it again or on a stopped
    /// manager does nothing.
    pub fn stop(&self) {
        if let Some(stop) = self.shared.stop_slot().as_ref() {
            stop.shutdown();
        }
    }

    /// Adds [host] to the ignore list of the frontier.
    /// The request is applied by the next running session.
    pub fn ignore_host(&self, host: impl Into<String>) {
        if self
            .control
            .send(ControlMessage::IgnoreHost(host.into()))
            .is_err()
        {
            log::warn!("The manager is gone, the host is not ignored.");
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.shared.state()
    }

    pub fn stats(&self) -> MinerStats {
        MinerStats {
            state: self.state(),
            mining: self.shared.mining.load(Ordering::Relaxed),
            mined: self.shared.mined.load(Ordering::Relaxed),
            errors: self.shared.errors.load(Ordering::Relaxed),
            skipped: self.shared.skipped.load(Ordering::Relaxed),
            pending: self.shared.pending.load(Ordering::Relaxed),
            visited: self.shared.visited.load(Ordering::Relaxed),
        }
    }
}

/// Everything the controller loop reacts to.
enum Event {
    Stop,
    Popped(Result<FrontierUrl, FrontierError>),
    Response(Option<WorkerResponse>),
    Control(Option<ControlMessage>),
    Sweep,
    Report,
}

/// Drives a pool of workers with the urls of a [WebsiteCache].
///
/// The manager owns the cache, the [HostRecords] and the worker handles. All of
/// them are only touched by the task running [WebsiteMinerManager::run], the
/// workers talk to it through channels.
pub struct WebsiteMinerManager<F, A, S> {
    config: MinerConfig,
    cache: WebsiteCache,
    records: HostRecords,
    fetcher: Arc<F>,
    analyser: Arc<A>,
    store: Arc<S>,
    shared: Arc<ManagerShared>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl<F, A, S> WebsiteMinerManager<F, A, S>
where
    F: Fetcher,
    A: ContentAnalyser,
    S: ResultStore,
{
    pub fn new(config: MinerConfig, cache: WebsiteCache, fetcher: F, analyser: A, store: S) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            records: HostRecords::new(
                config.max_urls_per_host,
                config.timeout_threshold,
                config.error_threshold,
            ),
            config,
            cache,
            fetcher: Arc::new(fetcher),
            analyser: Arc::new(analyser),
            store: Arc::new(store),
            shared: Arc::new(ManagerShared::new()),
            control_tx,
            control_rx,
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            shared: self.shared.clone(),
            control: self.control_tx.clone(),
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.shared.state()
    }

    pub fn cache(&self) -> &WebsiteCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut WebsiteCache {
        &mut self.cache
    }

    /// Mines until [shutdown] or [ManagerHandle::stop] is triggered.
    ///
    /// Initializes the cache, spawns the workers and hands out urls until a stop is
    /// requested. Then the workers drain, the cache is closed and the counters are
    /// reset. The manager can be run again afterwards.
    pub async fn run(&mut self, shutdown: Shutdown) -> Result<(), MinerError> {
        {
            let mut state = self.shared.state();
            if *state != ManagerState::Stopped {
                return Err(MinerError::AlreadyRunning);
            }
            *state = ManagerState::Running;
        }
        let stop = shutdown.create_delegated();
        *self.shared.stop_slot() = Some(stop.clone());

        let result = match self.cache.initialize().await {
            Ok(()) => self.mine(stop).await,
            Err(err) => Err(err.into()),
        };

        self.cache.close().await;
        self.records.clear();
        self.shared.reset_counters();
        self.shared
            .visited
            .store(self.cache.stats().visited, Ordering::Relaxed);
        *self.shared.stop_slot() = None;
        self.shared.set_state(ManagerState::Stopped);
        log::info!("The miner stopped.");
        result
    }

    async fn mine(&mut self, stop: Shutdown) -> Result<(), MinerError> {
        let worker_count = self.config.worker_count.max(1);
        let quota = self.config.work_per_worker.max(1);
        let (responses_tx, mut responses_rx) = mpsc::channel(worker_count * quota);
        let mut workers = (0..worker_count)
            .map(|id| {
                WorkerHandle::spawn(
                    id,
                    quota,
                    self.fetcher.clone(),
                    self.analyser.clone(),
                    responses_tx.clone(),
                )
            })
            .collect::<Vec<_>>();
        log::info!("The miner started with {worker_count} workers.");

        let sweep_period = self.config.sweep_interval();
        let mut sweep = interval_at(Instant::now() + sweep_period, sweep_period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let report_period = self.config.report_interval();
        let mut report = interval_at(Instant::now() + report_period, report_period);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut draining = false;
        let mut fatal = None;

        loop {
            if draining && workers.iter().all(|worker| worker.in_flight() == 0) {
                break;
            }
            self.publish(&workers);

            let can_admit = !draining && workers.iter().any(WorkerHandle::has_capacity);
            let event = tokio::select! {
                biased;
                control = self.control_rx.recv() => Event::Control(control),
                _ = stop.wait(), if !draining => Event::Stop,
                response = responses_rx.recv() => Event::Response(response),
                popped = self.cache.pop(), if can_admit => Event::Popped(popped),
                _ = sweep.tick() => Event::Sweep,
                _ = report.tick() => Event::Report,
            };

            match event {
                Event::Stop => {
                    log::info!("Stop requested, drain the workers.");
                    draining = true;
                    self.shared.set_state(ManagerState::Draining);
                    for worker in workers.iter() {
                        worker.drain();
                    }
                }
                Event::Popped(Ok(target)) => self.admit(&mut workers, target),
                Event::Popped(Err(err @ FrontierError::HandleClosed { .. })) => {
                    log::error!("The frontier was closed while mining: {err}");
                    fatal = Some(err);
                    stop.shutdown();
                }
                Event::Popped(Err(err)) => {
                    log::error!("The frontier lost track of its urls: {err}");
                    fatal = Some(err);
                    stop.shutdown();
                }
                Event::Response(Some(response)) => self.on_response(&mut workers, response),
                Event::Response(None) => break,
                Event::Control(Some(ControlMessage::IgnoreHost(host))) => {
                    match self.cache.ignore_add(&host) {
                        Ok(true) => log::info!("Ignore {host} from now on."),
                        Ok(false) => log::debug!("{host} is already ignored."),
                        Err(err) => log::warn!("Can not ignore {host}: {err}"),
                    }
                }
                Event::Control(None) => {}
                Event::Sweep => self.sweep(),
                Event::Report => self.report(),
            }
        }

        drop(responses_tx);
        for worker in workers.iter_mut() {
            worker.join().await;
        }
        match fatal {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn publish(&self, workers: &[WorkerHandle]) {
        let mining = workers.iter().map(WorkerHandle::in_flight).sum();
        self.shared.mining.store(mining, Ordering::Relaxed);
        let stats = self.cache.stats();
        self.shared.pending.store(stats.pending, Ordering::Relaxed);
        self.shared.visited.store(stats.visited, Ordering::Relaxed);
    }

    /// Hands a popped url to the least loaded worker.
    fn admit(&mut self, workers: &mut [WorkerHandle], target: FrontierUrl) {
        if self.cache.is_visited(&target.host) {
            log::trace!("Skip {}, the host is abandoned.", target.url);
            self.skip(target);
            return;
        }
        match self.records.admit(&target.host, &target.url) {
            Admission::Accept => {}
            Admission::Duplicate => {
                log::trace!("{}: {}", StatusCode::SkippedItem, target.url);
                self.skip(target);
                return;
            }
            Admission::Exhausted => {
                log::debug!("{} reached the url limit of the session.", target.host);
                self.abandon(&target.host);
                self.skip(target);
                return;
            }
        }

        let Some(worker) = workers
            .iter_mut()
            .filter(|worker| worker.has_capacity())
            .min_by_key(|worker| worker.in_flight())
        else {
            log::warn!("No worker can take {}.", target.url);
            self.release(&target.host, &target.url);
            return;
        };
        if let Err(target) = worker.dispatch(target) {
            self.release(&target.host, &target.url);
        }
    }

    fn skip(&mut self, target: FrontierUrl) {
        self.shared.skipped.fetch_add(1, Ordering::Relaxed);
        self.release(&target.host, &target.url);
    }

    /// Gives the slot of a popped url back to the ring.
    fn release(&mut self, host: &str, url: &str) {
        match self.cache.mined(host, url) {
            Ok(true) => {
                self.records.remove(host);
            }
            Ok(false) => {}
            Err(err) => log::error!("Failed to release {url} of {host}: {err}"),
        }
    }

    /// Marks [host] as visited, its remaining urls are skipped.
    fn abandon(&mut self, host: &str) {
        self.cache.mark_visited(host);
        self.records.remove(host);
    }

    fn on_response(&mut self, workers: &mut [WorkerHandle], response: WorkerResponse) {
        if let Some(worker) = workers.get_mut(response.worker) {
            worker.completed();
        }

        if let Some(keyword) = response.matched_keyword {
            let store = self.store.clone();
            let result = MinedResult::unconfirmed(response.url.as_str(), keyword);
            tokio::spawn(async move {
                let url = result.url.clone();
                if let Err(err) = store.insert(result).await {
                    log::error!("Failed to store the result of {url}: {err}");
                }
            });
        }

        match response.error {
            None => {
                for link in response.discovered_links.iter() {
                    match hostname_of(link) {
                        Some(host) => self.cache.push(&host, link),
                        None => log::trace!("Drop {link}, it has no host."),
                    }
                }
                self.records.succeeded(&response.host);
                self.shared.mined.fetch_add(1, Ordering::Relaxed);
            }
            Some(err) => {
                log::debug!("{}: {err}", err.status());
                self.shared.errors.fetch_add(1, Ordering::Relaxed);
                if self.records.failed(&response.host, err.is_timeout()) == FailureVerdict::Abandon {
                    log::info!("Abandon {} after too many failures.", response.host);
                    self.abandon(&response.host);
                }
            }
        }
        self.release(&response.host, &response.url);
    }

    fn sweep(&mut self) {
        let idle = self.records.sweep(self.config.idle_window());
        if idle.is_empty() {
            return;
        }
        log::debug!("Abandon {} idle hosts.", idle.len());
        for host in idle {
            self.cache.mark_visited(&host);
        }
    }

    fn report(&self) {
        let stats = self.handle().stats();
        log::info!(
            "Miner: mined {}, errors {}, mining {}, skipped {}, visited {}",
            stats.mined,
            stats.errors,
            stats.mining,
            stats.skipped,
            stats.visited
        );
    }
}
