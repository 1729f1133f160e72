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
use std::sync::Arc;

/// A counting semaphore between the producers of the frontier and the consumers.
///
/// Every [Semaphore::produce] adds permits, every [Semaphore::consume] takes exactly
/// one permit away. Closing the semaphore fails all pending and future consumers
/// with [FrontierError::HandleClosed].
#[derive(Debug, Clone)]
pub struct Semaphore {
    name: Arc<str>,
    inner: Arc<tokio::sync::Semaphore>,
}

impl Semaphore {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(tokio::sync::Semaphore::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds [n] permits and wakes up to [n] waiting consumers.
    pub fn produce(&self, n: usize) {
        if n == 0 {
            return;
        }
        if self.inner.is_closed() {
            log::trace!("{}: produce({n}) on a closed semaphore.", self.name);
            return;
        }
        self.inner.add_permits(n)
    }

    /// Waits until a permit is available and takes it.
    ///
    /// The waiters are served in FIFO order by tokio. Dropping the returned future
    /// before it completes does not consume a permit.
    pub async fn consume(&self) -> Result<(), FrontierError> {
        match self.inner.acquire().await {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(_) => Err(FrontierError::HandleClosed {
                name: self.name.to_string(),
            }),
        }
    }

    /// The number of permits that can be consumed without waiting.
    pub fn available(&self) -> usize {
        self.inner.available_permits()
    }

    pub fn close(&self) {
        log::debug!("Close semaphore {}.", self.name);
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[cfg(test)]
mod test {
    use super::Semaphore;
    use crate::status::{FrontierError, StatusCode};
    use std::time::Duration;
    use tokio::task::JoinSet;

    #[tokio::test]
    async fn consume_waits_for_produce() {
        let sema = Semaphore::new("test");
        let waiter = {
            let sema = sema.clone();
            tokio::spawn(async move { sema.consume().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        sema.produce(1);
        waiter.await.unwrap().unwrap();
        assert_eq!(0, sema.available());
    }

    #[tokio::test]
    async fn produce_many_serves_many() {
        let sema = Semaphore::new("test");
        sema.produce(3);
        for _ in 0..3 {
            sema.consume().await.unwrap();
        }
        assert_eq!(0, sema.available());
    }

    #[tokio::test]
    async fn closing_fails_all_waiters() {
        let sema = Semaphore::new("ring");
        let mut set = JoinSet::new();
        for _ in 0..2 {
            let sema = sema.clone();
            set.spawn(async move { sema.consume().await });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        sema.close();

        let mut failed = 0;
        while let Some(result) = set.join_next().await {
            match result.unwrap() {
                Err(err @ FrontierError::HandleClosed { .. }) => {
                    assert_eq!(StatusCode::HandleClosed, err.status());
                    failed += 1;
                }
                other => panic!("Expected HandleClosed but got {other:?}"),
            }
        }
        assert_eq!(2, failed);
        assert!(sema.consume().await.is_err());
    }

    #[tokio::test]
    async fn produce_after_close_is_ignored() {
        let sema = Semaphore::new("test");
        sema.close();
        sema.produce(5);
        assert_eq!(0, sema.available());
        assert!(sema.consume().await.is_err());
    }
}
