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

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::io::{BufWriter, Write};
use time::OffsetDateTime;

const PREFIX: &str = "frontier-";
const SUFFIX: &str = ".txt";
/// The stamp of the files written on shutdown, sorts before every rotated file.
const SHUTDOWN_STAMP: &str = "00000000000000000000";

fn now_nanos() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos()
}

fn is_overflow_file(name: &str) -> bool {
    name.starts_with(PREFIX) && name.ends_with(SUFFIX)
}

/// The file currently receiving spilled urls.
#[derive(Debug)]
struct ActiveFile {
    path: Utf8PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

/// The disk part of the frontier: a folder of line files holding one url each.
///
/// Spilled urls go to the active file, which is rotated every `chunk_size` lines.
/// Rotated files are queued as unread and handed out oldest first.
#[derive(Debug)]
pub struct Overflow {
    dir: Utf8PathBuf,
    chunk_size: usize,
    unread: VecDeque<Utf8PathBuf>,
    active: Option<ActiveFile>,
    sequence: u32,
}

impl Overflow {
    /// Opens the folder, creates it if necessary. Nothing is read yet.
    pub fn open<P: AsRef<Utf8Path>>(dir: P, chunk_size: usize) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            chunk_size: chunk_size.max(1),
            unread: VecDeque::new(),
            active: None,
            sequence: 0,
        })
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Catalogues the overflow files in the folder, sorted by name. Returns the number of files found.
    pub fn scan(&mut self) -> io::Result<usize> {
        let mut found = Vec::new();
        for entry in self.dir.read_dir_utf8()? {
            let entry = entry?;
            if !entry.file_type()?.is_file() || !is_overflow_file(entry.file_name()) {
                continue;
            }
            let path = entry.path().to_path_buf();
            if self.active.as_ref().is_some_and(|active| active.path == path) {
                continue;
            }
            if self.unread.contains(&path) {
                continue;
            }
            found.push(path);
        }
        found.sort();
        let count = found.len();
        self.unread.extend(found);
        Ok(count)
    }

    fn next_path(&mut self, stamp: &str) -> Utf8PathBuf {
        self.sequence = self.sequence.wrapping_add(1);
        self.dir.join(format!(
            "{PREFIX}{stamp}-{:06}{SUFFIX}",
            self.sequence % 1_000_000
        ))
    }

    /// Closes the active file and opens a new one.
    /// A closed file with lines is queued as unread, an empty one is removed.
    pub fn rotate(&mut self) -> io::Result<()> {
        self.finish_active(true)?;
        let stamp = format!("{:020}", now_nanos());
        let path = self.next_path(&stamp);
        let writer = BufWriter::new(File::create(&path)?);
        log::trace!("Open overflow file {path}.");
        self.active = Some(ActiveFile {
            path,
            writer,
            lines: 0,
        });
        Ok(())
    }

    fn finish_active(&mut self, enqueue: bool) -> io::Result<()> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        active.writer.flush()?;
        drop(active.writer);
        if active.lines == 0 {
            match std::fs::remove_file(&active.path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
                _ => {}
            }
        } else if enqueue {
            self.unread.push_back(active.path);
        }
        Ok(())
    }

    /// Appends `url` to the active file, rotates when the file is full.
    pub fn spill(&mut self, url: &str) -> io::Result<()> {
        if self.active.is_none() {
            self.rotate()?;
        }
        let rotate = match self.active.as_mut() {
            Some(active) => {
                writeln!(active.writer, "{url}")?;
                active.lines += 1;
                active.lines >= self.chunk_size
            }
            None => false,
        };
        if rotate {
            self.rotate()?;
        }
        Ok(())
    }

    /// Lines written to the active file.
    pub fn active_lines(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.lines)
    }

    pub fn unread_len(&self) -> usize {
        self.unread.len()
    }

    pub fn has_unread(&self) -> bool {
        !self.unread.is_empty()
    }

    /// Hands out the oldest unread file.
    pub fn next_unread(&mut self) -> Option<Utf8PathBuf> {
        self.unread.pop_front()
    }

    /// Writes `data` to a new shutdown file, it is the first file read after a restart.
    pub fn write_shutdown_file(&mut self, data: &[u8]) -> io::Result<Option<Utf8PathBuf>> {
        if data.is_empty() {
            return Ok(None);
        }
        let stamp = format!("{SHUTDOWN_STAMP}-{:020}", now_nanos());
        let path = self.next_path(&stamp);
        let mut file = File::create(&path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(Some(path))
    }

    /// Flushes and closes the active file. Files on the disc stay where they are.
    pub fn close(&mut self) -> io::Result<()> {
        self.finish_active(false)?;
        self.unread.clear();
        Ok(())
    }
}

impl Drop for Overflow {
    fn drop(&mut self) {
        if let Some(active) = self.active.as_mut() {
            if let Err(err) = active.writer.flush() {
                log::error!("Failed to flush overflow file {}: {err}", active.path);
            }
        }
    }
}

/// The content of an overflow file, read in the background.
#[derive(Debug)]
pub struct LoadedChunk {
    pub path: Utf8PathBuf,
    pub result: io::Result<Vec<String>>,
}

/// Reads the urls of an overflow file and removes the file.
pub async fn read_chunk(path: Utf8PathBuf) -> LoadedChunk {
    let result = async {
        let content = tokio::fs::read_to_string(&path).await?;
        tokio::fs::remove_file(&path).await?;
        Ok::<_, io::Error>(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>(),
        )
    }
    .await;
    LoadedChunk { path, result }
}
