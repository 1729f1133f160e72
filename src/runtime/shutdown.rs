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

use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// A [Shutdown] that is triggered when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct GracefulShutdown {
    shutdown: Shutdown,
    guard: Arc<DropGuard>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let shutdown = Shutdown::new();
        let guard = shutdown.inner.clone().drop_guard();
        Self {
            shutdown,
            guard: Arc::new(guard),
        }
    }

    pub fn create_shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.shutdown()
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownReceiver for GracefulShutdown {
    fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown()
    }
}

/// The shutdown signal of the miner.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    pub fn shutdown(&self) {
        self.inner.cancel();
    }

    /// A shutdown that follows this one but can be triggered on its own.
    pub fn create_delegated(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }

    pub async fn wait(&self) {
        self.inner.cancelled().await
    }
}

impl ShutdownReceiver for Shutdown {
    fn is_shutdown(&self) -> bool {
        self.inner.is_cancelled()
    }
}

/// A simple trait for receiving a shutdown command
pub trait ShutdownReceiver: Clone {
    /// Returns `true` if the shutdown signal has been received.
    fn is_shutdown(&self) -> bool;
}
