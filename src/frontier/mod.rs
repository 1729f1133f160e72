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

//! The frontier of the miner: the host ring in memory, the overflow on the disc
//! and the set of visited hosts.

mod cache;
pub mod overflow;
pub mod ring;
pub mod visited;

pub use cache::{FrontierStats, WebsiteCache};
pub use ring::{FrontierUrl, HostRing, PushStatus};
pub use visited::VisitedSet;
