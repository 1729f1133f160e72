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
use indexmap::IndexSet;
use itertools::Itertools;
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{BufRead, BufReader, BufWriter, Write};
use thiserror::Error;

/// An illegal value for the ignore list
#[derive(Debug, Copy, Clone, Error)]
pub enum IllegalIgnoreValueError {
    /// An entry can not contain a newline.
    #[error("Tried to add something with a new line separator to the ignore list.")]
    NewLinesNotAllowed,
    /// An entry can not be empty.
    #[error("Tried to add an empty string to the ignore list.")]
    EmptyStringsNotAllowed,
    /// Host suffixes never contain whitespaces.
    #[error("Tried to add a value with whitespaces to the ignore list.")]
    WhitespacesNotAllowed,
}

#[derive(Debug, Error)]
pub enum IgnoreError {
    #[error(transparent)]
    IllegalValue(#[from] IllegalIgnoreValueError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// The host deny-list of the miner.
///
/// Every entry is a host suffix, `example.com` ignores `example.com` and all of its
/// subdomains. The list is backed by a line file, `#` starts a comment.
#[derive(Debug)]
pub struct IgnoreList {
    path: Utf8PathBuf,
    file: BufWriter<File>,
    entries: IndexSet<String>,
    pattern: Option<Regex>,
}

impl IgnoreList {
    /// Opens the file at [path], creates it if necessary.
    pub fn open<P: AsRef<Utf8Path>>(path: P) -> Result<Self, IgnoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut entries = IndexSet::new();
        if file.metadata()?.len() > 0 {
            for line in BufReader::new(&file).lines() {
                let line = line?;
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                entries.insert(line.to_ascii_lowercase());
            }
        } else {
            file.write_all(
                b"# A list of host suffixes to be ignored by the miner.\
                \n# Comments can be written by starting with a #.\
                \n",
            )?;
        }

        let mut created = Self {
            path,
            file: BufWriter::new(file),
            entries,
            pattern: None,
        };
        created.rebuild()?;
        log::debug!("Loaded {} ignored hosts from {}", created.entries.len(), created.path);
        Ok(created)
    }

    fn validate(value: &str) -> Result<(), IllegalIgnoreValueError> {
        if value.is_empty() {
            return Err(IllegalIgnoreValueError::EmptyStringsNotAllowed);
        }
        if value.contains('\n') {
            return Err(IllegalIgnoreValueError::NewLinesNotAllowed);
        }
        if value.chars().any(char::is_whitespace) {
            return Err(IllegalIgnoreValueError::WhitespacesNotAllowed);
        }
        Ok(())
    }

    /// Adds [host] to the list and persists it.
    /// Returns false if the host was already known.
    pub fn add(&mut self, host: &str) -> Result<bool, IgnoreError> {
        let host = host.trim().trim_start_matches('.').to_ascii_lowercase();
        Self::validate(&host)?;
        if !self.entries.insert(host.clone()) {
            return Ok(false);
        }
        self.rebuild()?;
        self.file.write_all(host.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        log::info!("Ignore hosts matching {host}.");
        Ok(true)
    }

    fn rebuild(&mut self) -> Result<(), regex::Error> {
        self.pattern = if self.entries.is_empty() {
            None
        } else {
            let pattern = format!(
                r"(?:^|\.)(?:{})$",
                self.entries.iter().map(|value| regex::escape(value)).join("|")
            );
            log::debug!("Ignore pattern: {pattern}");
            Some(Regex::new(&pattern)?)
        };
        Ok(())
    }

    /// Returns true if [host] is ignored.
    pub fn is_ignored(&self, host: &str) -> bool {
        match self.pattern {
            None => false,
            Some(ref pattern) => pattern.is_match(host),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for IgnoreList {
    fn drop(&mut self) {
        let _ = self.file.flush();
    }
}

#[cfg(test)]
mod test {
    use super::{IgnoreError, IgnoreList, IllegalIgnoreValueError};
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn matches_suffixes_only_on_label_boundaries() {
        let dir = Utf8TempDir::new().unwrap();
        let mut list = IgnoreList::open(dir.path().join("ignore.txt")).unwrap();
        assert!(!list.is_ignored("example.com"));
        assert!(list.add("example.com").unwrap());
        assert!(!list.add("Example.com").unwrap());
        assert!(list.is_ignored("example.com"));
        assert!(list.is_ignored("www.example.com"));
        assert!(!list.is_ignored("badexample.com"));
        assert!(!list.is_ignored("example.com.evil"));
    }

    #[test]
    fn can_read_existing() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("ignore.txt");
        let mut list = IgnoreList::open(&path).unwrap();
        list.add("a.example").unwrap();
        list.add("b.example").unwrap();
        drop(list);

        let list = IgnoreList::open(&path).unwrap();
        assert_eq!(2, list.len());
        assert!(list.is_ignored("x.b.example"));
        assert_eq!(vec!["a.example", "b.example"], list.entries().collect::<Vec<_>>());
    }

    #[test]
    fn rejects_illegal_values() {
        let dir = Utf8TempDir::new().unwrap();
        let mut list = IgnoreList::open(dir.path().join("ignore.txt")).unwrap();
        assert!(matches!(
            list.add(""),
            Err(IgnoreError::IllegalValue(IllegalIgnoreValueError::EmptyStringsNotAllowed))
        ));
        assert!(matches!(
            list.add("a b"),
            Err(IgnoreError::IllegalValue(IllegalIgnoreValueError::WhitespacesNotAllowed))
        ));
        assert!(list.is_empty());
    }

    #[test]
    fn special_characters_are_escaped() {
        let dir = Utf8TempDir::new().unwrap();
        let mut list = IgnoreList::open(dir.path().join("ignore.txt")).unwrap();
        list.add("a+b.example").unwrap();
        assert!(list.is_ignored("a+b.example"));
        assert!(!list.is_ignored("aab.example"));
    }
}
