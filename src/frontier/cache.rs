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

use crate::config::{FrontierConfig, PathsConfig};
use crate::frontier::overflow::{read_chunk, LoadedChunk, Overflow};
use crate::frontier::ring::{FrontierUrl, HostRing, PushStatus};
use crate::frontier::visited::VisitedSet;
use crate::ignore::IgnoreList;
use crate::status::FrontierError;
use crate::sync::Semaphore;
use crate::url::hostname_of;
use camino::Utf8PathBuf;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

const SEMAPHORE_NAME: &str = "website-cache";

/// A snapshot of the sizes of the frontier.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FrontierStats {
    /// Urls queued on the ring.
    pub pending: usize,
    /// Hosts tracked by the ring.
    pub hosts: usize,
    /// Overflow files held in memory.
    pub chunks: usize,
    /// Overflow files waiting on the disc.
    pub unread_files: usize,
    /// Urls in the active overflow file.
    pub spilled: usize,
    pub visited: u64,
}

/// The counters read by the reporter.
#[derive(Debug, Default)]
struct Gauges {
    pending: AtomicUsize,
    hosts: AtomicUsize,
    chunks: AtomicUsize,
    visited: AtomicU64,
}

/// Everything backed by the disc, only present between
/// [WebsiteCache::initialize] and [WebsiteCache::close].
#[derive(Debug)]
struct Stores {
    ignore: IgnoreList,
    visited: VisitedSet,
    overflow: Overflow,
}

/// The frontier of the miner.
///
/// Urls are admitted to the [HostRing] while it has room, everything else
/// is spilled to overflow files and read back in chunks when the ring drains.
/// Hosts found in the visited set or the ignore list never enter the ring.
///
/// Every url on the ring that can be handed out is backed by one permit of
/// [WebsiteCache::semaphore].
#[derive(Debug)]
pub struct WebsiteCache {
    config: FrontierConfig,
    cache_dir: Utf8PathBuf,
    visited_file: Utf8PathBuf,
    ignore_file: Utf8PathBuf,
    ring: HostRing,
    semaphore: Semaphore,
    chunks: VecDeque<Vec<String>>,
    chunk_cursor: usize,
    loading: bool,
    chunk_tx: UnboundedSender<LoadedChunk>,
    chunk_rx: UnboundedReceiver<LoadedChunk>,
    stores: Option<Stores>,
    gauges: Arc<Gauges>,
    reporter: Option<JoinHandle<()>>,
}

impl WebsiteCache {
    pub fn new(config: FrontierConfig, paths: &PathsConfig) -> Self {
        let (chunk_tx, chunk_rx) = unbounded_channel();
        Self {
            ring: HostRing::new(config.host_capacity, config.per_host_capacity),
            config,
            cache_dir: paths.cache_dir(),
            visited_file: paths.visited_file(),
            ignore_file: paths.ignore_file(),
            semaphore: Semaphore::new(SEMAPHORE_NAME),
            chunks: VecDeque::new(),
            chunk_cursor: 0,
            loading: false,
            chunk_tx,
            chunk_rx,
            stores: None,
            gauges: Arc::new(Gauges::default()),
            reporter: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.stores.is_some()
    }

    /// Loads the ignore list, the visited set and the overflow catalogue.
    /// Seeds the entry url when there is nothing on the disc.
    pub async fn initialize(&mut self) -> Result<(), FrontierError> {
        if self.stores.is_some() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let ignore = IgnoreList::open(&self.ignore_file)?;
        let mut visited = VisitedSet::open(
            &self.visited_file,
            self.config.visited_capacity,
            self.config.visited_false_positive_rate,
        )
        .await?;
        let mut overflow = Overflow::open(&self.cache_dir, self.config.chunk_size)?;
        let found = overflow.scan()?;
        overflow.rotate()?;
        visited.start_persister();
        log::info!(
            "Initialized the frontier with {found} overflow files, {} visited hosts and {} ignored hosts.",
            visited.len(),
            ignore.len()
        );
        self.stores = Some(Stores {
            ignore,
            visited,
            overflow,
        });

        if found == 0 {
            let entry = self.config.entry_url.clone();
            match hostname_of(&entry) {
                Some(host) => {
                    log::info!("Seed the frontier with {entry}.");
                    self.push(&host, &entry);
                }
                None => log::warn!("The entry url {entry} has no host."),
            }
        }

        self.start_reporter();
        self.load_cache();
        self.publish();
        Ok(())
    }

    fn start_reporter(&mut self) {
        if self.reporter.is_some() {
            return;
        }
        let gauges = self.gauges.clone();
        let period = self.config.report_interval();
        let perimeter = self.ring.perimeter();
        self.reporter = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                log::info!(
                    "Frontier: pending {}, hosts {}/{perimeter}, chunks {}, visited {}",
                    gauges.pending.load(Ordering::Relaxed),
                    gauges.hosts.load(Ordering::Relaxed),
                    gauges.chunks.load(Ordering::Relaxed),
                    gauges.visited.load(Ordering::Relaxed),
                );
            }
        }));
    }

    fn publish(&self) {
        self.gauges.pending.store(self.ring.count(), Ordering::Relaxed);
        self.gauges.hosts.store(self.ring.host_count(), Ordering::Relaxed);
        self.gauges.chunks.store(self.chunks.len(), Ordering::Relaxed);
        if let Some(stores) = self.stores.as_ref() {
            self.gauges.visited.store(stores.visited.len(), Ordering::Relaxed);
        }
    }

    /// A handle on the semaphore counting the urls ready to be popped.
    /// A new semaphore is created by every [WebsiteCache::close].
    #[cfg(test)]
    pub(crate) fn semaphore(&self) -> Semaphore {
        self.semaphore.clone()
    }

    pub fn stats(&self) -> FrontierStats {
        let (unread_files, spilled, visited) = match self.stores.as_ref() {
            Some(stores) => (
                stores.overflow.unread_len(),
                stores.overflow.active_lines(),
                stores.visited.len(),
            ),
            None => (0, 0, 0),
        };
        FrontierStats {
            pending: self.ring.count(),
            hosts: self.ring.host_count(),
            chunks: self.chunks.len(),
            unread_files,
            spilled,
            visited,
        }
    }

    pub fn is_visited(&self, host: &str) -> bool {
        self.stores
            .as_ref()
            .is_some_and(|stores| stores.visited.has(host))
    }

    pub fn is_ignored(&self, host: &str) -> bool {
        self.stores
            .as_ref()
            .is_some_and(|stores| stores.ignore.is_ignored(host))
    }

    /// Marks [host] as done, its urls are dropped from now on.
    pub fn mark_visited(&self, host: &str) {
        if let Some(stores) = self.stores.as_ref() {
            stores.visited.mark(host);
        }
    }

    /// Adds [host] to the ignore list.
    pub fn ignore_add(&mut self, host: &str) -> Result<bool, FrontierError> {
        match self.stores.as_mut() {
            Some(stores) => Ok(stores.ignore.add(host)?),
            None => Err(FrontierError::HandleClosed {
                name: SEMAPHORE_NAME.to_string(),
            }),
        }
    }

    fn spill(&mut self, url: &str) {
        if let Some(stores) = self.stores.as_mut() {
            if let Err(err) = stores.overflow.spill(url) {
                log::error!("Failed to spill {url}: {err}");
            }
        }
    }

    /// Offers an url to the frontier. Never fails: the url is queued, spilled
    /// to the disc or dropped.
    pub fn push(&mut self, host: &str, url: &str) {
        let Some(stores) = self.stores.as_ref() else {
            log::warn!("The frontier is closed, drop {url}.");
            return;
        };
        if stores.visited.has(host) || stores.ignore.is_ignored(host) {
            log::trace!("Drop {url}, {host} is visited or ignored.");
            return;
        }
        match self.ring.push(host, url) {
            PushStatus::Success => {
                self.semaphore.produce(1);
                self.publish();
            }
            PushStatus::Duplicate | PushStatus::Skip => {}
            PushStatus::Full => self.spill(url),
        }
    }

    /// Waits for a queued url and takes it from the ring.
    ///
    /// Overflow files read while waiting are taken into memory and refill the
    /// ring. Dropping the future before it completes neither consumes a permit
    /// nor loses a loaded file.
    pub async fn pop(&mut self) -> Result<FrontierUrl, FrontierError> {
        loop {
            let semaphore = self.semaphore.clone();
            tokio::select! {
                biased;
                permit = semaphore.consume() => {
                    permit?;
                    return self.pop_admitted();
                }
                Some(chunk) = self.chunk_loaded() => self.accept_chunk(chunk),
            }
        }
    }

    /// Takes an url from the ring for a consumed permit.
    fn pop_admitted(&mut self) -> Result<FrontierUrl, FrontierError> {
        let popped = self.ring.pop()?;
        self.publish();
        Ok(popped)
    }

    /// Reports an url of [host] as processed.
    /// Returns true if the host left the ring, the host is visited afterwards.
    pub fn mined(&mut self, host: &str, url: &str) -> Result<bool, FrontierError> {
        let drained = self.ring.mined(host, url)?;
        if drained {
            log::debug!("{host} is drained.");
            self.mark_visited(host);
            self.fill_ring();
        }
        self.publish();
        Ok(drained)
    }

    /// Moves urls from the loaded chunks to the ring while the ring has room.
    pub fn fill_ring(&mut self) {
        if self.stores.is_none() {
            return;
        }
        let mut admitted = 0usize;
        'chunks: while !self.ring.is_full() {
            let Some(chunk) = self.chunks.front() else {
                break;
            };
            let Some(url) = chunk.get(self.chunk_cursor).cloned() else {
                self.chunks.pop_front();
                self.chunk_cursor = 0;
                continue;
            };
            self.chunk_cursor += 1;

            let Some(host) = hostname_of(&url) else {
                log::debug!("Drop {url}, it has no host.");
                continue;
            };
            if let Some(stores) = self.stores.as_ref() {
                if stores.visited.has(&host) {
                    continue;
                }
                if stores.ignore.is_ignored(&host) {
                    log::debug!("{host} is ignored, mark it as visited.");
                    stores.visited.mark(&host);
                    continue;
                }
            }
            match self.ring.push(&host, &url) {
                PushStatus::Success => admitted += 1,
                PushStatus::Duplicate | PushStatus::Skip => {}
                PushStatus::Full => {
                    self.spill(&url);
                    break 'chunks;
                }
            }
        }
        if let Some(chunk) = self.chunks.front() {
            if self.chunk_cursor >= chunk.len() {
                self.chunks.pop_front();
                self.chunk_cursor = 0;
            }
        }
        if admitted > 0 {
            log::debug!("Admitted {admitted} urls from the overflow.");
            self.semaphore.produce(admitted);
        }
        self.publish();
        self.load_cache();
    }

    /// Starts reading the next overflow file unless a read is running or
    /// enough chunks are in memory.
    pub fn load_cache(&mut self) {
        if self.loading || self.chunks.len() >= self.config.resident_chunks.max(1) {
            return;
        }
        let no_chunks = self.chunks.is_empty();
        let Some(stores) = self.stores.as_mut() else {
            return;
        };
        if no_chunks && !stores.overflow.has_unread() && stores.overflow.active_lines() > 0 {
            log::debug!(
                "Rotate the overflow file early with {} urls.",
                stores.overflow.active_lines()
            );
            if let Err(err) = stores.overflow.rotate() {
                log::error!("Failed to rotate the overflow file: {err}");
                return;
            }
        }
        let Some(path) = stores.overflow.next_unread() else {
            return;
        };
        self.loading = true;
        log::debug!("Load overflow file {path}.");
        let sender = self.chunk_tx.clone();
        tokio::spawn(async move {
            let chunk = read_chunk(path).await;
            let _ = sender.send(chunk);
        });
    }

    /// Waits for the running overflow read. Pending forever if there is none.
    async fn chunk_loaded(&mut self) -> Option<LoadedChunk> {
        if !self.loading {
            return std::future::pending().await;
        }
        self.chunk_rx.recv().await
    }

    /// Takes a read overflow file into memory and refills the ring.
    fn accept_chunk(&mut self, chunk: LoadedChunk) {
        self.loading = false;
        self.take_chunk(chunk);
        self.fill_ring();
    }

    fn take_chunk(&mut self, chunk: LoadedChunk) {
        match chunk.result {
            Ok(urls) if urls.is_empty() => {}
            Ok(urls) => {
                log::debug!("Loaded {} urls from {}.", urls.len(), chunk.path);
                self.chunks.push_back(urls);
            }
            Err(err) => log::error!("Failed to load overflow file {}: {err}", chunk.path),
        }
    }

    /// Accepts overflow reads until no read is running.
    #[cfg(test)]
    pub(crate) async fn settle_loading(&mut self) {
        while self.loading {
            match self.chunk_rx.recv().await {
                Some(chunk) => self.accept_chunk(chunk),
                None => self.loading = false,
            }
        }
    }

    /// Persists the frontier and resets the cache, it can be initialized again.
    ///
    /// The ring and the unread part of the chunks go to a shutdown file that is
    /// read first after the next [WebsiteCache::initialize]. Waiters on the
    /// semaphore are released with [FrontierError::HandleClosed].
    pub async fn close(&mut self) {
        if let Some(reporter) = self.reporter.take() {
            reporter.abort();
        }
        if self.loading {
            if let Some(chunk) = self.chunk_rx.recv().await {
                self.take_chunk(chunk);
            }
            self.loading = false;
        }
        self.semaphore.close();

        if let Some(stores) = self.stores.take() {
            let Stores {
                mut visited,
                mut overflow,
                ..
            } = stores;
            let mut buffer = Vec::new();
            let mut written = match self.ring.to_stream(&mut buffer) {
                Ok(written) => written,
                Err(err) => {
                    log::error!("Failed to serialize the ring: {err}");
                    0
                }
            };
            for (idx, chunk) in self.chunks.iter().enumerate() {
                let skip = if idx == 0 { self.chunk_cursor } else { 0 };
                for url in chunk.iter().skip(skip) {
                    buffer.extend_from_slice(url.as_bytes());
                    buffer.push(b'\n');
                    written += 1;
                }
            }
            let saved = tokio::task::spawn_blocking(move || {
                let saved = overflow.write_shutdown_file(&buffer);
                let closed = overflow.close();
                (saved, closed)
            })
            .await;
            match saved {
                Ok((saved, closed)) => {
                    match saved {
                        Ok(Some(path)) => {
                            log::info!("Saved {written} urls of the frontier to {path}.")
                        }
                        Ok(None) => {}
                        Err(err) => log::error!("Failed to save the frontier: {err}"),
                    }
                    if let Err(err) = closed {
                        log::error!("Failed to close the overflow file: {err}");
                    }
                }
                Err(err) => log::error!("Saving the frontier failed: {err}"),
            }
            if let Err(err) = visited.flush().await {
                log::error!("Failed to save the visited set: {err}");
            }
        }

        self.ring.clear();
        self.chunks.clear();
        self.chunk_cursor = 0;
        self.semaphore = Semaphore::new(SEMAPHORE_NAME);
        self.publish();
    }
}

impl Drop for WebsiteCache {
    fn drop(&mut self) {
        if let Some(reporter) = self.reporter.take() {
            reporter.abort();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::status::StatusCode;
    use camino_tempfile::Utf8TempDir;
    use std::time::Duration;

    fn config(host_capacity: usize, per_host_capacity: usize, chunk_size: usize) -> FrontierConfig {
        FrontierConfig {
            host_capacity,
            per_host_capacity,
            chunk_size,
            resident_chunks: 2,
            visited_capacity: 10_000,
            visited_false_positive_rate: 0.0001,
            entry_url: "http://seed.org/".to_string(),
            report_interval_secs: 3600,
        }
    }

    async fn open(dir: &Utf8TempDir, config: FrontierConfig) -> WebsiteCache {
        let mut cache = WebsiteCache::new(config, &PathsConfig::new(dir.path()));
        cache.initialize().await.unwrap();
        cache.settle_loading().await;
        cache
    }

    async fn pop_now(cache: &mut WebsiteCache) -> FrontierUrl {
        tokio::time::timeout(Duration::from_secs(5), cache.pop())
            .await
            .expect("pop timed out")
            .unwrap()
    }

    #[tokio::test]
    async fn seeds_the_entry_url_on_an_empty_disc() {
        let dir = Utf8TempDir::new().unwrap();
        let mut cache = open(&dir, config(4, 4, 16)).await;
        assert_eq!(1, cache.semaphore().available());
        let seed = pop_now(&mut cache).await;
        assert_eq!("seed.org", seed.host);
        assert_eq!("http://seed.org/", seed.url);
        cache.close().await;
    }

    #[tokio::test]
    async fn push_pop_and_mined() {
        let dir = Utf8TempDir::new().unwrap();
        let mut cache = open(&dir, config(4, 4, 16)).await;
        let seed = pop_now(&mut cache).await;
        assert!(cache.mined(&seed.host, &seed.url).unwrap());
        assert!(cache.is_visited("seed.org"));

        cache.push("a.com", "http://a.com/1");
        cache.push("a.com", "http://a.com/1");
        cache.push("b.com", "http://b.com/1");
        assert_eq!(2, cache.semaphore().available());

        let first = pop_now(&mut cache).await;
        let second = pop_now(&mut cache).await;
        assert_ne!(first.host, second.host);
        assert_eq!(
            StatusCode::NonExists,
            cache.mined(&first.host, "http://other/").unwrap_err().status()
        );
        assert!(cache.mined(&first.host, &first.url).unwrap());
        assert_eq!(
            StatusCode::NonExists,
            cache.mined("unknown.com", "http://unknown.com/").unwrap_err().status()
        );
        cache.close().await;
    }

    #[tokio::test]
    async fn visited_and_ignored_hosts_are_dropped() {
        let dir = Utf8TempDir::new().unwrap();
        let mut cache = open(&dir, config(4, 4, 16)).await;
        cache.mark_visited("done.com");
        cache.ignore_add("spam.net").unwrap();
        let before = cache.semaphore().available();
        cache.push("done.com", "http://done.com/");
        cache.push("www.spam.net", "http://www.spam.net/");
        assert_eq!(before, cache.semaphore().available());
        assert_eq!(1, cache.stats().pending);
        cache.close().await;
    }

    #[tokio::test]
    async fn spilled_urls_come_back_exactly_once() {
        let dir = Utf8TempDir::new().unwrap();
        let mut cache = open(&dir, config(1, 8, 2)).await;
        // the seed occupies the only host slot
        for idx in 0..5 {
            let host = format!("h{idx}.com");
            cache.push(&host, &format!("http://{host}/"));
        }
        assert_eq!(1, cache.stats().hosts);
        assert_eq!(2, cache.stats().unread_files);

        let mut seen = Vec::new();
        while seen.len() < 6 {
            let next = pop_now(&mut cache).await;
            assert!(cache.mined(&next.host, &next.url).unwrap());
            seen.push(next.host);
            cache.settle_loading().await;
        }
        seen.sort();
        assert_eq!(
            vec!["h0.com", "h1.com", "h2.com", "h3.com", "h4.com", "seed.org"],
            seen
        );
        assert_eq!(0, cache.semaphore().available());
        assert_eq!(FrontierStats { visited: 6, ..FrontierStats::default() }, cache.stats());
        cache.close().await;
    }

    #[tokio::test]
    async fn refill_drops_ignored_hosts_and_marks_them() {
        let dir = Utf8TempDir::new().unwrap();
        let mut cache = open(&dir, config(1, 8, 1)).await;
        cache.push("bad.com", "http://bad.com/");
        cache.push("good.com", "http://good.com/");
        cache.ignore_add("bad.com").unwrap();

        let seed = pop_now(&mut cache).await;
        assert!(cache.mined(&seed.host, &seed.url).unwrap());
        cache.settle_loading().await;
        let next = pop_now(&mut cache).await;
        assert_eq!("good.com", next.host);
        assert!(cache.is_visited("bad.com"));
        cache.close().await;
    }

    #[tokio::test]
    async fn close_releases_waiters_and_resumes() {
        let dir = Utf8TempDir::new().unwrap();
        let mut cache = open(&dir, config(2, 8, 1)).await;
        cache.push("a.com", "http://a.com/1");
        cache.push("a.com", "http://a.com/2");
        cache.push("c.com", "http://c.com/1");
        let seed = pop_now(&mut cache).await;
        assert!(cache.mined(&seed.host, &seed.url).unwrap());
        cache.settle_loading().await;

        let semaphore = cache.semaphore();
        let waiter = tokio::spawn(async move {
            loop {
                if let Err(err) = semaphore.consume().await {
                    return err.status();
                }
            }
        });
        cache.close().await;
        assert_eq!(StatusCode::HandleClosed, waiter.await.unwrap());
        assert!(!cache.is_initialized());

        let mut cache = open(&dir, config(2, 8, 1)).await;
        let mut urls = Vec::new();
        while urls.len() < 3 {
            let next = pop_now(&mut cache).await;
            cache.mined(&next.host, &next.url).unwrap();
            urls.push(next.url);
            cache.settle_loading().await;
        }
        urls.sort();
        assert_eq!(vec!["http://a.com/1", "http://a.com/2", "http://c.com/1"], urls);
        assert!(cache.is_visited("seed.org"));
        cache.close().await;
    }

    #[tokio::test]
    async fn push_on_a_closed_cache_is_dropped() {
        let dir = Utf8TempDir::new().unwrap();
        let mut cache = WebsiteCache::new(config(2, 2, 2), &PathsConfig::new(dir.path()));
        cache.push("a.com", "http://a.com/");
        assert_eq!(0, cache.stats().pending);
        assert!(cache.ignore_add("a.com").is_err());
    }

    #[tokio::test]
    async fn pop_waits_for_spilled_urls() {
        let dir = Utf8TempDir::new().unwrap();
        let mut cache = open(&dir, config(1, 8, 2)).await;
        for idx in 0..3 {
            let host = format!("h{idx}.com");
            cache.push(&host, &format!("http://{host}/"));
        }
        let seed = pop_now(&mut cache).await;
        assert!(cache.mined(&seed.host, &seed.url).unwrap());
        assert_eq!(0, cache.stats().pending);

        let next = pop_now(&mut cache).await;
        assert_eq!("http://h0.com/", next.url);
        cache.close().await;
    }

    #[tokio::test]
    async fn close_saves_the_ring_to_one_shutdown_file() {
        let dir = Utf8TempDir::new().unwrap();
        let mut cache = open(&dir, config(2, 8, 1)).await;
        cache.push("a.com", "http://a.com/1");
        cache.push("a.com", "http://a.com/2");
        cache.close().await;

        let cache_dir = PathsConfig::new(dir.path()).cache_dir();
        let files = cache_dir
            .read_dir_utf8()
            .unwrap()
            .map(|entry| entry.unwrap().path().to_path_buf())
            .collect::<Vec<_>>();
        assert_eq!(1, files.len());
        assert!(files[0]
            .file_name()
            .unwrap()
            .starts_with("frontier-00000000000000000000-"));
        let mut urls = std::fs::read_to_string(&files[0])
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect::<Vec<_>>();
        urls.sort();
        assert_eq!(
            vec!["http://a.com/1", "http://a.com/2", "http://seed.org/"],
            urls
        );
    }
}
