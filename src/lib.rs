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

//! A politeness aware website miner.
//!
//! The [frontier::WebsiteCache] keeps the urls to mine in a round robin ring of hosts,
//! spills everything else to the disc and remembers the visited hosts. The
//! [miner::WebsiteMinerManager] hands the urls to a pool of workers and feeds the
//! discovered links back into the frontier.

pub mod app;
pub mod config;
pub mod extraction;
pub mod fetching;
pub mod frontier;
pub mod ignore;
pub mod miner;
pub mod runtime;
pub mod status;
pub mod stores;
pub mod sync;
pub mod url;

#[cfg(test)]
pub(crate) mod test_impls;
