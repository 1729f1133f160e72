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

use crate::config::miner::{DEFAULT_WORKER_COUNT, DEFAULT_WORK_PER_WORKER};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many hosts the ring tracks at once (the perimeter).
pub const DEFAULT_HOST_CAPACITY: usize = DEFAULT_WORKER_COUNT * DEFAULT_WORK_PER_WORKER / 2;
/// How many urls a single host can hold on the ring (the height).
pub const DEFAULT_PER_HOST_CAPACITY: usize = 128;
/// Urls per overflow file.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 64;
/// Overflow files held in memory.
pub const DEFAULT_RESIDENT_CHUNKS: usize = 4;
pub const DEFAULT_VISITED_CAPACITY: usize = 100_000_000;
pub const DEFAULT_VISITED_FALSE_POSITIVE_RATE: f64 = 0.05;
pub const DEFAULT_ENTRY_URL: &str = "http://www.baidu.com";

/// Config of the frontier
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename(serialize = "Frontier"))]
pub struct FrontierConfig {
    /// The number of hosts tracked in memory at once.
    #[serde(default = "_default_host_capacity")]
    pub host_capacity: usize,
    /// The number of urls a host can queue while it is tracked.
    #[serde(default = "_default_per_host_capacity")]
    pub per_host_capacity: usize,
    /// The number of urls after which an overflow file is rotated.
    #[serde(default = "_default_chunk_size")]
    pub chunk_size: usize,
    /// The number of overflow files kept in memory.
    #[serde(default = "_default_resident_chunks")]
    pub resident_chunks: usize,
    /// The expected number of visited hosts.
    #[serde(default = "_default_visited_capacity")]
    pub visited_capacity: usize,
    #[serde(default = "_default_visited_false_positive_rate")]
    pub visited_false_positive_rate: f64,
    /// The url to start with if there is no frontier on the disc.
    #[serde(default = "_default_entry_url")]
    pub entry_url: String,
    /// Seconds between two status lines.
    #[serde(default = "_default_report_interval_secs")]
    pub report_interval_secs: u64,
}

const fn _default_host_capacity() -> usize {
    DEFAULT_HOST_CAPACITY
}
const fn _default_per_host_capacity() -> usize {
    DEFAULT_PER_HOST_CAPACITY
}
const fn _default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
const fn _default_resident_chunks() -> usize {
    DEFAULT_RESIDENT_CHUNKS
}
const fn _default_visited_capacity() -> usize {
    DEFAULT_VISITED_CAPACITY
}
const fn _default_visited_false_positive_rate() -> f64 {
    DEFAULT_VISITED_FALSE_POSITIVE_RATE
}
fn _default_entry_url() -> String {
    DEFAULT_ENTRY_URL.to_string()
}
const fn _default_report_interval_secs() -> u64 {
    30
}

impl FrontierConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            host_capacity: _default_host_capacity(),
            per_host_capacity: _default_per_host_capacity(),
            chunk_size: _default_chunk_size(),
            resident_chunks: _default_resident_chunks(),
            visited_capacity: _default_visited_capacity(),
            visited_false_positive_rate: _default_visited_false_positive_rate(),
            entry_url: _default_entry_url(),
            report_interval_secs: _default_report_interval_secs(),
        }
    }
}
