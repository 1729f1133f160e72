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

use serde::{Deserialize, Serialize};
use std::time::Duration;
use ubyte::ByteUnit;

pub const DEFAULT_WORKER_COUNT: usize = 8;
pub const DEFAULT_WORK_PER_WORKER: usize = 96;
/// The default size of a fetched page (in byte)
pub const DEFAULT_MAX_BODY_SIZE: u64 = ByteUnit::Mebibyte(8).as_u64();

/// Config of the worker pool and the host bookkeeping.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename(serialize = "Miner"))]
pub struct MinerConfig {
    /// The number of workers.
    #[serde(default = "_default_worker_count")]
    pub worker_count: usize,
    /// The number of urls a worker holds at most.
    #[serde(default = "_default_work_per_worker")]
    pub work_per_worker: usize,
    /// The number of urls fetched per host in a session before it is abandoned.
    #[serde(default = "_default_max_urls_per_host")]
    pub max_urls_per_host: usize,
    /// A host is abandoned after more timeouts than this.
    #[serde(default = "_default_timeout_threshold")]
    pub timeout_threshold: u32,
    /// A host is abandoned after more consecutive errors than this.
    #[serde(default = "_default_error_threshold")]
    pub error_threshold: u32,
    /// Hosts without activity for this many seconds are abandoned.
    #[serde(default = "_default_idle_window_secs")]
    pub idle_window_secs: u64,
    #[serde(default = "_default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "_default_report_interval_secs")]
    pub report_interval_secs: u64,
    #[serde(default = "_default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "_default_max_body_size")]
    pub max_body_size: u64,
    #[serde(default = "_default_user_agent")]
    pub user_agent: String,
    /// The keywords reported to the result store.
    #[serde(default)]
    pub keywords: Vec<String>,
}

const fn _default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}
const fn _default_work_per_worker() -> usize {
    DEFAULT_WORK_PER_WORKER
}
const fn _default_max_urls_per_host() -> usize {
    128
}
const fn _default_timeout_threshold() -> u32 {
    3
}
const fn _default_error_threshold() -> u32 {
    10
}
const fn _default_idle_window_secs() -> u64 {
    60 * 60
}
const fn _default_sweep_interval_secs() -> u64 {
    60
}
const fn _default_report_interval_secs() -> u64 {
    5
}
const fn _default_request_timeout_secs() -> u64 {
    180
}
const fn _default_max_body_size() -> u64 {
    DEFAULT_MAX_BODY_SIZE
}
fn _default_user_agent() -> String {
    concat!("frontier-miner/", env!("CARGO_PKG_VERSION")).to_string()
}

impl MinerConfig {
    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            worker_count: _default_worker_count(),
            work_per_worker: _default_work_per_worker(),
            max_urls_per_host: _default_max_urls_per_host(),
            timeout_threshold: _default_timeout_threshold(),
            error_threshold: _default_error_threshold(),
            idle_window_secs: _default_idle_window_secs(),
            sweep_interval_secs: _default_sweep_interval_secs(),
            report_interval_secs: _default_report_interval_secs(),
            request_timeout_secs: _default_request_timeout_secs(),
            max_body_size: _default_max_body_size(),
            user_agent: _default_user_agent(),
            keywords: Vec::new(),
        }
    }
}
