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

use crate::frontier::FrontierUrl;
use crate::miner::traits::{ContentAnalyser, Fetcher};
use crate::status::FetchError;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// The messages sent to a worker.
#[derive(Debug)]
pub enum WorkerCommand {
    Enqueue(FrontierUrl),
    /// Finish everything enqueued so far and exit.
    DrainAndExit,
}

/// The outcome of a single url, sent back to the manager.
#[derive(Debug, Clone)]
pub struct WorkerResponse {
    pub worker: usize,
    pub url: String,
    pub host: String,
    pub discovered_links: Vec<String>,
    pub matched_keyword: Option<String>,
    pub error: Option<FetchError>,
}

impl WorkerResponse {
    fn failed(worker: usize, target: FrontierUrl, error: FetchError) -> Self {
        Self {
            worker,
            url: target.url,
            host: target.host,
            discovered_links: Vec::new(),
            matched_keyword: None,
            error: Some(error),
        }
    }
}

/// The manager side of a worker.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    quota: usize,
    in_flight: usize,
    commands: mpsc::Sender<WorkerCommand>,
    task: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns a worker processing up to [quota] urls at once.
    pub fn spawn<F: Fetcher, A: ContentAnalyser>(
        id: usize,
        quota: usize,
        fetcher: Arc<F>,
        analyser: Arc<A>,
        responses: mpsc::Sender<WorkerResponse>,
    ) -> Self {
        let quota = quota.max(1);
        // One slot more than the quota for the drain command.
        let (commands, receiver) = mpsc::channel(quota + 1);
        let task = tokio::spawn(run_worker(id, fetcher, analyser, receiver, responses));
        Self {
            id,
            quota,
            in_flight: 0,
            commands,
            task: Some(task),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight < self.quota
    }

    /// Hands [target] to the worker. Gives the url back if the worker is gone.
    pub fn dispatch(&mut self, target: FrontierUrl) -> Result<(), FrontierUrl> {
        if !self.has_capacity() {
            return Err(target);
        }
        match self.commands.try_send(WorkerCommand::Enqueue(target.clone())) {
            Ok(()) => {
                self.in_flight += 1;
                Ok(())
            }
            Err(err) => {
                log::warn!("Worker {} rejected {}: {err}", self.id, target.url);
                Err(target)
            }
        }
    }

    /// Marks one url of this worker as finished.
    pub fn completed(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn drain(&self) {
        if let Err(err) = self.commands.try_send(WorkerCommand::DrainAndExit) {
            log::warn!("Worker {} did not take the drain command: {err}", self.id);
        }
    }

    /// Waits for the worker task to exit.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                log::error!("Worker {} failed: {err}", self.id);
            }
        }
    }
}

async fn run_worker<F: Fetcher, A: ContentAnalyser>(
    id: usize,
    fetcher: Arc<F>,
    analyser: Arc<A>,
    mut commands: mpsc::Receiver<WorkerCommand>,
    responses: mpsc::Sender<WorkerResponse>,
) {
    log::debug!("Worker {id} started.");
    let mut tasks = JoinSet::new();
    let mut draining = false;
    loop {
        tokio::select! {
            command = commands.recv(), if !draining => {
                match command {
                    Some(WorkerCommand::Enqueue(target)) => {
                        tasks.spawn(mine(id, fetcher.clone(), analyser.clone(), target));
                    }
                    Some(WorkerCommand::DrainAndExit) | None => {
                        log::debug!("Worker {id} drains {} urls.", tasks.len());
                        draining = true;
                    }
                }
            }
            Some(joined) = tasks.join_next() => {
                match joined {
                    Ok(response) => {
                        if responses.send(response).await.is_err() {
                            log::warn!("Worker {id} lost its manager.");
                            break;
                        }
                    }
                    Err(err) => log::error!("Worker {id} lost a task: {err}"),
                }
            }
            else => break,
        }
        if draining && tasks.is_empty() {
            break;
        }
    }
    log::debug!("Worker {id} stopped.");
}

async fn mine<F: Fetcher, A: ContentAnalyser>(
    worker: usize,
    fetcher: Arc<F>,
    analyser: Arc<A>,
    target: FrontierUrl,
) -> WorkerResponse {
    let fetched = AssertUnwindSafe(fetcher.fetch(&target.url)).catch_unwind().await;
    let content = match fetched {
        Ok(Ok(content)) => content,
        Ok(Err(err)) => return WorkerResponse::failed(worker, target, err),
        Err(_) => {
            let err = FetchError::Network(format!("The fetch of {} panicked.", target.url));
            return WorkerResponse::failed(worker, target, err);
        }
    };
    let analysed = std::panic::catch_unwind(AssertUnwindSafe(|| {
        analyser.analyse(&target.host, &target.url, &content)
    }));
    let analysis = match analysed {
        Ok(analysis) => analysis,
        Err(_) => {
            let err = FetchError::Network(format!("The analysis of {} panicked.", target.url));
            return WorkerResponse::failed(worker, target, err);
        }
    };
    WorkerResponse {
        worker,
        url: target.url,
        host: target.host,
        discovered_links: analysis.discovered_links,
        matched_keyword: analysis.matched_keyword,
        error: None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extraction::LinkAnalyser;
    use crate::status::StatusCode;
    use crate::test_impls::{FakeFetcher, PanickingAnalyser};

    fn target(url: &str) -> FrontierUrl {
        FrontierUrl {
            host: crate::url::hostname_of(url).unwrap(),
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn worker_answers_every_url_before_it_exits() {
        let fetcher = FakeFetcher::new();
        fetcher.page("http://a.com/", "<a href=\"http://b.com/\">b</a> gold");
        let (responses, mut received) = mpsc::channel(8);
        let mut worker = WorkerHandle::spawn(
            3,
            2,
            Arc::new(fetcher),
            Arc::new(LinkAnalyser::new(["gold"]).unwrap()),
            responses,
        );
        worker.dispatch(target("http://a.com/")).unwrap();
        worker.dispatch(target("http://missing.com/")).unwrap();
        assert!(!worker.has_capacity());
        assert!(worker.dispatch(target("http://c.com/")).is_err());
        worker.drain();

        let mut answers = vec![received.recv().await.unwrap(), received.recv().await.unwrap()];
        answers.sort_by(|a, b| a.url.cmp(&b.url));
        assert_eq!(3, answers[0].worker);
        assert_eq!(None, answers[0].error.as_ref().map(|err| err.status()));
        assert_eq!(Some("gold".to_string()), answers[0].matched_keyword);
        assert_eq!(vec!["http://b.com/".to_string()], answers[0].discovered_links);
        assert!(answers[1].error.is_some());

        worker.join().await;
        assert!(received.recv().await.is_none());
    }

    #[tokio::test]
    async fn a_panicking_analyser_still_answers() {
        let fetcher = FakeFetcher::new();
        fetcher.page("http://a.com/", "<a href=\"http://b.com/\">b</a>");
        let (responses, mut received) = mpsc::channel(8);
        let mut worker = WorkerHandle::spawn(
            0,
            1,
            Arc::new(fetcher),
            Arc::new(PanickingAnalyser),
            responses,
        );
        worker.dispatch(target("http://a.com/")).unwrap();
        worker.drain();

        let answer = received.recv().await.unwrap();
        assert_eq!("http://a.com/", answer.url);
        assert_eq!("a.com", answer.host);
        assert!(answer.discovered_links.is_empty());
        assert_eq!(
            Some(StatusCode::NetworkError),
            answer.error.as_ref().map(|err| err.status())
        );

        worker.join().await;
        assert!(received.recv().await.is_none());
    }
}
