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
use serde::{Deserialize, Serialize};

/// The paths used by the miner. Everything lives below [PathsConfig::root].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename(serialize = "Paths"))]
pub struct PathsConfig {
    #[serde(default = "_default_root")]
    pub root: Utf8PathBuf,
}

fn _default_root() -> Utf8PathBuf {
    Utf8PathBuf::from("miner_data")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: _default_root(),
        }
    }
}

impl PathsConfig {
    pub fn new<P: AsRef<Utf8Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root_path(&self) -> &Utf8Path {
        &self.root
    }

    /// The folder with the overflow files of the frontier.
    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.root.join("cache")
    }

    pub fn visited_file(&self) -> Utf8PathBuf {
        self.root.join("website.bloom")
    }

    pub fn ignore_file(&self) -> Utf8PathBuf {
        self.root.join("ignore.txt")
    }

    pub fn results_file(&self) -> Utf8PathBuf {
        self.root.join("results.jsonl")
    }

    pub fn log_file(&self) -> Utf8PathBuf {
        self.root.join("out.log")
    }
}
