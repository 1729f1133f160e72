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

use crate::miner::traits::{Analysis, ContentAnalyser, Fetcher, MinedResult, ResultStore};
use crate::status::FetchError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serves an in-memory site graph. Unknown urls fail with a network error.
#[derive(Debug, Clone, Default)]
pub struct FakeFetcher {
    pages: Arc<Mutex<HashMap<String, String>>>,
    failures: Arc<Mutex<HashMap<String, VecDeque<FetchError>>>>,
    requested: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch takes at least [delay].
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn page(&self, url: &str, content: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), content.to_string());
    }

    /// The next fetch of [url] fails with [error].
    pub fn fail(&self, url: &str, error: FetchError) {
        self.failures
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.requested.lock().unwrap().push(url.to_string());
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|failures| failures.pop_front());
        if let Some(failure) = failure {
            return Err(failure);
        }
        match self.pages.lock().unwrap().get(url) {
            Some(content) => Ok(content.clone()),
            None => Err(FetchError::Network(format!("{url} is not served"))),
        }
    }
}

/// Keeps the results in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultStore {
    results: Arc<Mutex<Vec<MinedResult>>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<MinedResult> {
        self.results.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn insert(&self, result: MinedResult) -> io::Result<()> {
        self.results.lock().unwrap().push(result);
        Ok(())
    }
}

/// Panics on every page it is asked to analyse.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanickingAnalyser;

impl ContentAnalyser for PanickingAnalyser {
    fn analyse(&self, _host: &str, url: &str, _content: &str) -> Analysis {
        panic!("Can not analyse {url}");
    }
}
