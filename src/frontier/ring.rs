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

use crate::status::FrontierError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::io::Write;
use strum::Display;

/// The result of [HostRing::push]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display)]
pub enum PushStatus {
    /// The url was queued.
    Success,
    /// The url was already queued for the host once.
    Duplicate,
    /// The host reached its capacity, the url is declined.
    Skip,
    /// The ring can not track any more hosts.
    Full,
}

/// An url taken from the ring together with the host it was queued for.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrontierUrl {
    pub host: String,
    pub url: String,
}

/// One host on the ring.
#[derive(Debug)]
struct HostRingItem {
    host: String,
    pending: VecDeque<String>,
    seen: HashSet<String>,
    in_flight: usize,
    prev: usize,
    next: usize,
}

impl HostRingItem {
    fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}

/// A snapshot of a host on the ring.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HostRingItemState {
    pub pending: usize,
    pub seen: usize,
    pub in_flight: usize,
}

/// A circular list of per-host fifo queues.
///
/// The items live in a flat arena, the links are indices into the arena.
/// Popping takes one url from the current host and moves on to the next host,
/// so every sweep over the ring serves every host at most once.
#[derive(Debug)]
pub struct HostRing {
    slots: Vec<Option<HostRingItem>>,
    free: Vec<usize>,
    hosts: HashMap<String, usize>,
    cursor: Option<usize>,
    count: usize,
    perimeter: usize,
    height: usize,
}

impl HostRing {
    /// Creates a ring tracking at most [perimeter] hosts with at most [height] urls each.
    pub fn new(perimeter: usize, height: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            hosts: HashMap::new(),
            cursor: None,
            count: 0,
            perimeter,
            height,
        }
    }

    /// The number of pending urls over all hosts.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The number of tracked hosts.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn perimeter(&self) -> usize {
        self.perimeter
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns true if no new host can be added.
    pub fn is_full(&self) -> bool {
        self.hosts.len() >= self.perimeter
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn contains_host(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
    }

    pub fn host_state(&self, host: &str) -> Option<HostRingItemState> {
        let item = self.item(*self.hosts.get(host)?);
        Some(HostRingItemState {
            pending: item.pending.len(),
            seen: item.seen.len(),
            in_flight: item.in_flight,
        })
    }

    fn item(&self, idx: usize) -> &HostRingItem {
        self.slots[idx].as_ref().expect("Ring links point to an empty slot!")
    }

    fn item_mut(&mut self, idx: usize) -> &mut HostRingItem {
        self.slots[idx].as_mut().expect("Ring links point to an empty slot!")
    }

    fn allocate(&mut self, item: HostRingItem) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(item);
            idx
        } else {
            self.slots.push(Some(item));
            self.slots.len() - 1
        }
    }

    pub fn push(&mut self, host: &str, url: &str) -> PushStatus {
        if let Some(&idx) = self.hosts.get(host) {
            let height = self.height;
            let item = self.item_mut(idx);
            if item.seen.contains(url) {
                return PushStatus::Duplicate;
            }
            if item.seen.len() >= height {
                return PushStatus::Skip;
            }
            item.pending.push_back(url.to_string());
            item.seen.insert(url.to_string());
            self.count += 1;
            return PushStatus::Success;
        }

        if self.is_full() {
            return PushStatus::Full;
        }
        if self.height == 0 {
            return PushStatus::Skip;
        }

        let mut item = HostRingItem {
            host: host.to_string(),
            pending: VecDeque::from([url.to_string()]),
            seen: HashSet::from([url.to_string()]),
            in_flight: 0,
            prev: 0,
            next: 0,
        };

        let idx = match self.cursor {
            Some(cursor) => {
                let prev = self.item(cursor).prev;
                item.prev = prev;
                item.next = cursor;
                let idx = self.allocate(item);
                self.item_mut(prev).next = idx;
                self.item_mut(cursor).prev = idx;
                idx
            }
            None => {
                let idx = self.allocate(item);
                let created = self.item_mut(idx);
                created.prev = idx;
                created.next = idx;
                self.cursor = Some(idx);
                idx
            }
        };
        log::trace!("Ring add host: {host}");
        self.hosts.insert(host.to_string(), idx);
        self.count += 1;
        PushStatus::Success
    }

    /// Takes the oldest url of the next host with pending work.
    pub fn pop(&mut self) -> Result<FrontierUrl, FrontierError> {
        if self.count == 0 {
            return Err(FrontierError::NonExists);
        }
        let mut current = self.cursor.ok_or(FrontierError::NonExists)?;
        while self.item(current).pending.is_empty() {
            current = self.item(current).next;
        }
        let item = self.item_mut(current);
        let url = item.pending.pop_front().ok_or(FrontierError::NonExists)?;
        item.in_flight += 1;
        let host = item.host.clone();
        self.cursor = Some(item.next);
        self.count -= 1;
        Ok(FrontierUrl { host, url })
    }

    /// Reports an url returned by [HostRing::pop] as done.
    ///
    /// Returns true if the host has no pending and no in flight urls left and was
    /// removed from the ring.
    pub fn mined(&mut self, host: &str, url: &str) -> Result<bool, FrontierError> {
        let idx = self.hosts.get(host).copied().ok_or(FrontierError::NonExists)?;
        let item = self.item_mut(idx);
        if item.in_flight == 0 || !item.seen.contains(url) {
            return Err(FrontierError::NonExists);
        }
        item.in_flight -= 1;
        if !item.is_drained() {
            return Ok(false);
        }

        let (prev, next) = (item.prev, item.next);
        if next == idx {
            self.cursor = None;
        } else {
            self.item_mut(prev).next = next;
            self.item_mut(next).prev = prev;
            if self.cursor == Some(idx) {
                self.cursor = Some(next);
            }
        }
        self.hosts.remove(host);
        if let Some(removed) = self.slots[idx].take() {
            log::trace!("Ring drained host {} after {} urls.", removed.host, removed.seen.len());
        }
        self.free.push(idx);
        Ok(true)
    }

    /// Writes every pending url as a line to [writer]. Returns the number of written urls.
    pub fn to_stream<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let mut written = 0;
        for item in self.slots.iter().flatten() {
            for url in item.pending.iter() {
                writer.write_all(url.as_bytes())?;
                writer.write_all(b"\n")?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Drops every host and url.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.hosts.clear();
        self.cursor = None;
        self.count = 0;
    }
}
