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

use crate::ignore::IgnoreError;
use std::io;
use strum::{Display, EnumString};
use thiserror::Error;

/// The status codes shared by every error of the miner.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display, EnumString)]
pub enum StatusCode {
    Success,
    /// A structure was asked for something it does not hold.
    NonExists,
    /// The fetched content was rejected.
    TypeMismatch,
    NetworkError,
    Timeout,
    /// The handle (semaphore or cache) was already closed.
    HandleClosed,
    /// The admission of an item was declined on purpose.
    SkippedItem,
    /// A precondition of the persisted state was violated.
    Procedure,
}

/// Errors of the frontier (ring, cache, visited set, overflow files).
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("There is no more item in the ring.")]
    NonExists,
    #[error("The handle {name} is closed.")]
    HandleClosed { name: String },
    #[error("Procedure failed: {0}")]
    Procedure(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
    #[error(transparent)]
    Ignore(#[from] IgnoreError),
}

impl FrontierError {
    pub fn status(&self) -> StatusCode {
        match self {
            FrontierError::NonExists => StatusCode::NonExists,
            FrontierError::HandleClosed { .. } => StatusCode::HandleClosed,
            FrontierError::Procedure(_) | FrontierError::Encoding(_) => StatusCode::Procedure,
            FrontierError::Io(_) | FrontierError::Ignore(_) => StatusCode::Procedure,
        }
    }
}

/// Failures of a single fetch. They are always recovered by the manager.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("{0} timed out.")]
    Timeout(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
}

impl FetchError {
    pub fn status(&self) -> StatusCode {
        match self {
            FetchError::Timeout(_) => StatusCode::Timeout,
            FetchError::Network(_) => StatusCode::NetworkError,
            FetchError::TypeMismatch(_) => StatusCode::TypeMismatch,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}

/// Errors of the manager.
#[derive(Debug, Error)]
pub enum MinerError {
    #[error(transparent)]
    Frontier(#[from] FrontierError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("The manager is already running.")]
    AlreadyRunning,
}

impl MinerError {
    pub fn status(&self) -> StatusCode {
        match self {
            MinerError::Frontier(err) => err.status(),
            MinerError::Io(_) => StatusCode::Procedure,
            MinerError::AlreadyRunning => StatusCode::Procedure,
        }
    }
}
