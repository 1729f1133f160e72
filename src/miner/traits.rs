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

use crate::status::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;

/// Loads the textual content of an url.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Returns the decoded text of [url] or a classified failure.
    /// Content that is not text or too big is rejected, never truncated.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// What a [ContentAnalyser] found in a page.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Analysis {
    pub matched_keyword: Option<String>,
    pub discovered_links: Vec<String>,
}

/// Extracts the links and a keyword match of a page.
pub trait ContentAnalyser: Send + Sync + 'static {
    fn analyse(&self, host: &str, url: &str, content: &str) -> Analysis;
}

/// A page with a keyword match. Nobody confirmed it yet.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MinedResult {
    pub url: String,
    pub keyword: String,
    pub confirmed: bool,
}

impl MinedResult {
    pub fn unconfirmed(url: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            keyword: keyword.into(),
            confirmed: false,
        }
    }
}

/// Stores the [MinedResult]s. Failures are logged by the caller, never retried.
#[async_trait]
pub trait ResultStore: Send + Sync + 'static {
    async fn insert(&self, result: MinedResult) -> io::Result<()>;
}
