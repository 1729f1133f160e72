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

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// The bookkeeping of a single host during a session.
#[derive(Debug, Clone)]
pub struct HostRecord {
    pub host: String,
    /// Every url of the host handed to a worker in this session.
    pub seen: HashSet<String>,
    pub last_activity: Instant,
    /// Consecutive failures that were not timeouts.
    pub error_count: u32,
    pub timeout_count: u32,
}

impl HostRecord {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            seen: HashSet::new(),
            last_activity: Instant::now(),
            error_count: 0,
            timeout_count: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// The decision of [HostRecords::admit].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Admission {
    Accept,
    /// The url was already fetched in this session.
    Duplicate,
    /// The host reached the url cap of the session.
    Exhausted,
}

/// What a failure did to the host.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FailureVerdict {
    Keep,
    /// The host crossed a threshold and has to be marked visited.
    Abandon,
}

/// The [HostRecord]s of all hosts currently mined.
#[derive(Debug)]
pub struct HostRecords {
    records: HashMap<String, HostRecord>,
    max_urls_per_host: usize,
    timeout_threshold: u32,
    error_threshold: u32,
}

impl HostRecords {
    pub fn new(max_urls_per_host: usize, timeout_threshold: u32, error_threshold: u32) -> Self {
        Self {
            records: HashMap::new(),
            max_urls_per_host,
            timeout_threshold,
            error_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, host: &str) -> Option<&HostRecord> {
        self.records.get(host)
    }

    /// Decides if [url] of [host] is handed to a worker. Creates the record lazily.
    pub fn admit(&mut self, host: &str, url: &str) -> Admission {
        let record = self
            .records
            .entry(host.to_string())
            .or_insert_with(|| HostRecord::new(host));
        if record.seen.contains(url) {
            return Admission::Duplicate;
        }
        if record.seen.len() >= self.max_urls_per_host {
            return Admission::Exhausted;
        }
        record.seen.insert(url.to_string());
        record.touch();
        Admission::Accept
    }

    /// A fetch of [host] succeeded.
    pub fn succeeded(&mut self, host: &str) {
        if let Some(record) = self.records.get_mut(host) {
            record.error_count = 0;
            record.touch();
        }
    }

    /// A fetch of [host] failed.
    pub fn failed(&mut self, host: &str, timeout: bool) -> FailureVerdict {
        let Some(record) = self.records.get_mut(host) else {
            return FailureVerdict::Keep;
        };
        record.touch();
        if timeout {
            record.timeout_count += 1;
            if record.timeout_count > self.timeout_threshold {
                return FailureVerdict::Abandon;
            }
        } else {
            record.error_count += 1;
            if record.error_count > self.error_threshold {
                return FailureVerdict::Abandon;
            }
        }
        FailureVerdict::Keep
    }

    /// Drops the record of a visited host.
    pub fn remove(&mut self, host: &str) -> Option<HostRecord> {
        self.records.remove(host)
    }

    /// Removes every record without activity since [idle]. Returns the removed hosts.
    pub fn sweep(&mut self, idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut idle_hosts = Vec::new();
        self.records.retain(|host, record| {
            let keep = now.saturating_duration_since(record.last_activity) < idle;
            if !keep {
                idle_hosts.push(host.clone());
            }
            keep
        });
        idle_hosts
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn admits_until_the_cap() {
        let mut records = HostRecords::new(2, 3, 10);
        assert_eq!(Admission::Accept, records.admit("a.com", "http://a.com/1"));
        assert_eq!(Admission::Duplicate, records.admit("a.com", "http://a.com/1"));
        assert_eq!(Admission::Accept, records.admit("a.com", "http://a.com/2"));
        assert_eq!(Admission::Exhausted, records.admit("a.com", "http://a.com/3"));
        assert_eq!(Admission::Accept, records.admit("b.com", "http://b.com/1"));
        assert_eq!(2, records.len());
    }

    #[test]
    fn timeouts_abandon_after_the_threshold() {
        let mut records = HostRecords::new(10, 3, 10);
        records.admit("slow.com", "http://slow.com/");
        for _ in 0..3 {
            assert_eq!(FailureVerdict::Keep, records.failed("slow.com", true));
        }
        assert_eq!(FailureVerdict::Abandon, records.failed("slow.com", true));
    }

    #[test]
    fn success_resets_the_errors() {
        let mut records = HostRecords::new(10, 3, 2);
        records.admit("flaky.com", "http://flaky.com/");
        assert_eq!(FailureVerdict::Keep, records.failed("flaky.com", false));
        assert_eq!(FailureVerdict::Keep, records.failed("flaky.com", false));
        records.succeeded("flaky.com");
        assert_eq!(0, records.get("flaky.com").unwrap().error_count);
        assert_eq!(FailureVerdict::Keep, records.failed("flaky.com", false));
        assert_eq!(FailureVerdict::Keep, records.failed("flaky.com", false));
        assert_eq!(FailureVerdict::Abandon, records.failed("flaky.com", false));
        assert_eq!(FailureVerdict::Keep, records.failed("unknown.com", false));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_idle_hosts() {
        let mut records = HostRecords::new(10, 3, 10);
        records.admit("old.com", "http://old.com/");
        tokio::time::advance(Duration::from_secs(60)).await;
        records.admit("new.com", "http://new.com/");
        let removed = records.sweep(Duration::from_secs(30));
        assert_eq!(vec!["old.com".to_string()], removed);
        assert!(records.get("new.com").is_some());
        assert!(records.get("old.com").is_none());
    }
}
