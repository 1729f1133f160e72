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

use crate::status::FrontierError;
use bloomfilter::Bloom;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The on-disc schema of a visited set.
#[derive(Debug, Serialize, Deserialize)]
struct VisitedSnapshot {
    bitmap_bits: u64,
    hash_count: u32,
    sip_keys: [(u64, u64); 2],
    entries: u64,
    #[serde(with = "serde_bytes")]
    bitmap: Vec<u8>,
}

/// The primary file and the staging file of a visited set.
#[derive(Debug, Clone)]
pub struct VisitedFiles {
    pub primary: Utf8PathBuf,
    pub backup: Utf8PathBuf,
}

impl VisitedFiles {
    pub fn new<P: AsRef<Utf8Path>>(primary: P) -> Self {
        let primary = primary.as_ref().to_path_buf();
        let backup = Utf8PathBuf::from(format!("{primary}.bkup"));
        Self { primary, backup }
    }

    /// Restores the primary file after an interrupted save.
    ///
    /// A backup that is newer and at least as large as the primary was written
    /// completely, it replaces the primary. Every other backup is discarded.
    /// Fails with [FrontierError::Procedure] if neither file exists.
    pub async fn recover(&self) -> Result<(), FrontierError> {
        let backup = tokio::fs::metadata(&self.backup).await.ok();
        let primary = tokio::fs::metadata(&self.primary).await.ok();
        match (primary, backup) {
            (Some(primary), Some(backup)) => {
                let newer = match (backup.modified(), primary.modified()) {
                    (Ok(backup), Ok(primary)) => backup > primary,
                    _ => false,
                };
                if newer && backup.len() >= primary.len() {
                    log::info!("Promote the visited backup {}.", self.backup);
                    self.promote().await
                } else {
                    log::info!("Discard the stale visited backup {}.", self.backup);
                    tokio::fs::remove_file(&self.backup).await?;
                    Ok(())
                }
            }
            (None, Some(_)) => {
                log::info!("No visited set at {} but a backup, promote it.", self.primary);
                self.promote().await
            }
            (Some(_), None) => Ok(()),
            (None, None) => Err(FrontierError::Procedure(format!(
                "No visited set found at {}",
                self.primary
            ))),
        }
    }

    async fn promote(&self) -> Result<(), FrontierError> {
        match tokio::fs::remove_file(&self.primary).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        tokio::fs::rename(&self.backup, &self.primary).await?;
        Ok(())
    }
}

struct VisitedSetInner {
    bloom: Mutex<Bloom<String>>,
    entries: AtomicU64,
    dirty: AtomicBool,
    changed: Notify,
    files: Option<VisitedFiles>,
}

impl std::fmt::Debug for VisitedSetInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisitedSetInner")
            .field("entries", &self.entries)
            .field("dirty", &self.dirty)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

impl VisitedSetInner {
    fn bloom(&self) -> MutexGuard<Bloom<String>> {
        match self.bloom.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn snapshot(&self) -> VisitedSnapshot {
        let bloom = self.bloom();
        VisitedSnapshot {
            bitmap_bits: bloom.number_of_bits(),
            hash_count: bloom.number_of_hash_functions(),
            sip_keys: bloom.sip_keys(),
            entries: self.entries.load(Ordering::Relaxed),
            bitmap: bloom.bitmap(),
        }
    }

    /// Writes the current state to the backup, then replaces the primary.
    async fn save(&self) -> Result<(), FrontierError> {
        let Some(files) = self.files.as_ref() else {
            return Ok(());
        };
        self.write_backup().await?;
        files.promote().await
    }

    async fn write_backup(&self) -> Result<(), FrontierError> {
        let Some(files) = self.files.as_ref() else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        let backup = files.backup.clone();
        log::trace!("Write visited set with {} entries to {backup}.", snapshot.entries);
        tokio::task::spawn_blocking(move || -> Result<(), FrontierError> {
            let mut writer = BufWriter::new(File::create(&backup)?);
            bincode::serialize_into(&mut writer, &snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        })
        .await
        .map_err(|err| FrontierError::Procedure(format!("Writing the visited set failed: {err}")))?
    }
}

/// The probabilistic set of hosts that are fully crawled or abandoned.
///
/// Marking a host wakes a single persister task, the saves never overlap and
/// multiple marks during a save are coalesced into the next one.
#[derive(Debug)]
pub struct VisitedSet {
    inner: Arc<VisitedSetInner>,
    persister: Option<(CancellationToken, JoinHandle<()>)>,
}

impl VisitedSet {
    /// Creates an empty set without any file backing.
    pub fn in_memory(capacity: usize, false_positive_rate: f64) -> Self {
        Self::create(capacity, false_positive_rate, None)
    }

    fn create(capacity: usize, false_positive_rate: f64, files: Option<VisitedFiles>) -> Self {
        let bloom = Bloom::new_for_fp_rate(capacity.max(1), false_positive_rate);
        Self::from_bloom(bloom, 0, files)
    }

    fn from_bloom(bloom: Bloom<String>, entries: u64, files: Option<VisitedFiles>) -> Self {
        Self {
            inner: Arc::new(VisitedSetInner {
                bloom: Mutex::new(bloom),
                entries: AtomicU64::new(entries),
                dirty: AtomicBool::new(false),
                changed: Notify::new(),
                files,
            }),
            persister: None,
        }
    }

    async fn load(files: VisitedFiles) -> Result<Self, FrontierError> {
        let path = files.primary.clone();
        let snapshot = tokio::task::spawn_blocking(move || -> Result<VisitedSnapshot, FrontierError> {
            let reader = BufReader::new(File::open(&path)?);
            Ok(bincode::deserialize_from(reader)?)
        })
        .await
        .map_err(|err| FrontierError::Procedure(format!("Reading the visited set failed: {err}")))??;

        if snapshot.bitmap_bits == 0 || (snapshot.bitmap.len() as u64) * 8 < snapshot.bitmap_bits {
            return Err(FrontierError::Procedure(format!(
                "The visited set at {} is corrupted.",
                files.primary
            )));
        }

        let bloom = Bloom::from_existing(
            &snapshot.bitmap,
            snapshot.bitmap_bits,
            snapshot.hash_count,
            snapshot.sip_keys,
        );
        Ok(Self::from_bloom(bloom, snapshot.entries, Some(files)))
    }

    /// Opens the set stored at [path].
    ///
    /// Interrupted saves are recovered first. If there is no usable file a new set
    /// is created and saved immediately.
    pub async fn open<P: AsRef<Utf8Path>>(
        path: P,
        capacity: usize,
        false_positive_rate: f64,
    ) -> Result<Self, FrontierError> {
        let files = VisitedFiles::new(path);
        if let Some(parent) = files.primary.parent() {
            if !parent.as_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let loaded = match files.recover().await {
            Ok(()) => Self::load(files.clone()).await,
            Err(err) => Err(err),
        };
        match loaded {
            Ok(loaded) => {
                log::info!(
                    "Loaded visited set from {} with {} entries.",
                    files.primary,
                    loaded.len()
                );
                Ok(loaded)
            }
            Err(err) => {
                log::warn!("Create a new visited set: {err}");
                let created = Self::create(capacity, false_positive_rate, Some(files));
                created.inner.save().await?;
                Ok(created)
            }
        }
    }

    pub fn has(&self, host: &str) -> bool {
        self.inner.bloom().check(&host.to_string())
    }

    /// Adds [host] without requesting a save. Returns false if it was already present.
    pub fn add(&self, host: &str) -> bool {
        let host = host.to_string();
        let mut bloom = self.inner.bloom();
        if bloom.check(&host) {
            return false;
        }
        bloom.set(&host);
        self.inner.entries.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Adds [host] and requests an asynchronous save.
    pub fn mark(&self, host: &str) {
        if !self.add(host) {
            return;
        }
        self.inner.dirty.store(true, Ordering::Release);
        self.inner.changed.notify_one();
    }

    /// The number of marked hosts.
    pub fn len(&self) -> u64 {
        self.inner.entries.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts the background persister. Does nothing if it is already running.
    pub fn start_persister(&mut self) {
        if self.persister.is_some() || self.inner.files.is_none() {
            return;
        }
        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = inner.changed.notified() => {}
                }
                if inner.dirty.swap(false, Ordering::AcqRel) {
                    if let Err(err) = inner.save().await {
                        log::error!("Failed to save the visited set: {err}");
                    }
                }
            }
        });
        self.persister = Some((token, handle));
    }

    /// Stops the persister and saves the current state.
    pub async fn flush(&mut self) -> Result<(), FrontierError> {
        if let Some((token, handle)) = self.persister.take() {
            token.cancel();
            if let Err(err) = handle.await {
                log::error!("The visited set persister failed: {err}");
            }
        }
        self.inner.dirty.store(false, Ordering::Release);
        self.inner.save().await
    }

    /// Writes only the staging file of the set. A later [VisitedSet::open] decides
    /// whether it replaces the primary.
    pub async fn write_backup(&self) -> Result<(), FrontierError> {
        self.inner.write_backup().await
    }

    pub fn files(&self) -> Option<&VisitedFiles> {
        self.inner.files.as_ref()
    }
}

impl Drop for VisitedSet {
    fn drop(&mut self) {
        if let Some((token, _)) = self.persister.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod test {
    use super::{VisitedFiles, VisitedSet};
    use crate::status::FrontierError;
    use camino_tempfile::Utf8TempDir;
    use std::time::{Duration, SystemTime};

    const CAPACITY: usize = 1_000;
    const RATE: f64 = 0.01;

    fn touch(path: &camino::Utf8Path, time: SystemTime) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[tokio::test]
    async fn creates_and_saves_a_new_set() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("visited.bloom");
        let set = VisitedSet::open(&path, CAPACITY, RATE).await.unwrap();
        assert!(set.is_empty());
        assert!(path.exists());
        assert!(!VisitedFiles::new(&path).backup.exists());
    }

    #[tokio::test]
    async fn flush_persists_marks() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("visited.bloom");
        let mut set = VisitedSet::open(&path, CAPACITY, RATE).await.unwrap();
        set.start_persister();
        set.mark("a.example");
        set.mark("b.example");
        set.flush().await.unwrap();
        drop(set);

        let set = VisitedSet::open(&path, CAPACITY, RATE).await.unwrap();
        assert!(set.has("a.example"));
        assert!(set.has("b.example"));
        assert!(!set.has("c.example"));
        assert_eq!(2, set.len());
    }

    #[tokio::test]
    async fn promotes_a_complete_backup_after_a_crash() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("visited.bloom");
        let mut set = VisitedSet::open(&path, CAPACITY, RATE).await.unwrap();
        set.add("a.example");
        set.flush().await.unwrap();

        // the process dies between writing the backup and the rename
        set.add("b.example");
        set.write_backup().await.unwrap();
        drop(set);
        let files = VisitedFiles::new(&path);
        touch(&files.primary, SystemTime::now() - Duration::from_secs(60));
        touch(&files.backup, SystemTime::now());

        let set = VisitedSet::open(&path, CAPACITY, RATE).await.unwrap();
        assert!(set.has("a.example"));
        assert!(set.has("b.example"));
        assert!(!files.backup.exists());
    }

    #[tokio::test]
    async fn discards_a_stale_backup() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("visited.bloom");
        let mut set = VisitedSet::open(&path, CAPACITY, RATE).await.unwrap();
        set.add("a.example");
        set.flush().await.unwrap();
        let files = VisitedFiles::new(&path);
        std::fs::write(&files.backup, b"torn").unwrap();
        touch(&files.backup, SystemTime::now() + Duration::from_secs(60));
        drop(set);

        let set = VisitedSet::open(&path, CAPACITY, RATE).await.unwrap();
        assert!(set.has("a.example"));
        assert!(!files.backup.exists());
    }

    #[tokio::test]
    async fn promotes_a_lonely_backup() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("visited.bloom");
        let mut set = VisitedSet::open(&path, CAPACITY, RATE).await.unwrap();
        set.add("a.example");
        set.write_backup().await.unwrap();
        drop(set);
        std::fs::remove_file(&path).unwrap();

        let set = VisitedSet::open(&path, CAPACITY, RATE).await.unwrap();
        assert!(set.has("a.example"));
    }

    #[tokio::test]
    async fn recovery_without_files_is_a_procedure_error() {
        let dir = Utf8TempDir::new().unwrap();
        let files = VisitedFiles::new(dir.path().join("visited.bloom"));
        assert!(matches!(files.recover().await, Err(FrontierError::Procedure(_))));
    }

    #[tokio::test]
    async fn corrupted_primary_is_replaced() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("visited.bloom");
        std::fs::write(&path, b"garbage").unwrap();
        let set = VisitedSet::open(&path, CAPACITY, RATE).await.unwrap();
        assert!(set.is_empty());
        assert!(std::fs::metadata(&path).unwrap().len() > 7);
    }

    #[test]
    fn hosts_are_counted_once() {
        let set = VisitedSet::in_memory(CAPACITY, RATE);
        assert!(set.add("a.example"));
        set.mark("a.example");
        assert!(!set.add("a.example"));
        set.mark("b.example");
        assert_eq!(2, set.len());
    }
}
