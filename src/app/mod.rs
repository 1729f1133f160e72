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

//! The binary side of the miner.

mod args;
mod logging;

pub use args::{consume_args, ConsumedArgs, MinerArgs, RunMode};
pub use logging::configure_logging;

use crate::config::Configs;
use crate::extraction::LinkAnalyser;
use crate::fetching::HttpFetcher;
use crate::frontier::WebsiteCache;
use crate::ignore::IgnoreList;
use crate::miner::WebsiteMinerManager;
use crate::runtime::GracefulShutdown;
use crate::stores::JsonLinesResultStore;

/// Executes the parsed command line.
pub async fn exec_args(args: MinerArgs) -> anyhow::Result<()> {
    match consume_args(args)? {
        ConsumedArgs::Run(configs) => exec(configs).await,
        ConsumedArgs::Ignore(configs, host) => {
            let mut ignore = IgnoreList::open(configs.paths.ignore_file())?;
            if ignore.add(&host)? {
                println!("{host} is ignored from now on.");
            } else {
                println!("{host} was already ignored.");
            }
            Ok(())
        }
        ConsumedArgs::Nothing => Ok(()),
    }
}

/// Mines until Ctrl-C is pressed.
pub async fn exec(configs: Configs) -> anyhow::Result<()> {
    std::fs::create_dir_all(configs.paths.root_path())?;
    configure_logging(&configs)?;

    let cache = WebsiteCache::new(configs.frontier.clone(), &configs.paths);
    let fetcher = HttpFetcher::new(&configs.miner)?;
    let analyser = LinkAnalyser::new(configs.miner.keywords.iter())?;
    let store = JsonLinesResultStore::open(configs.paths.results_file()).await?;
    let mut manager = WebsiteMinerManager::new(configs.miner.clone(), cache, fetcher, analyser, store);

    let graceful = GracefulShutdown::new();
    let shutdown = graceful.create_shutdown();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("Shutting down."),
            Err(err) => log::error!("Failed to listen for Ctrl-C: {err}"),
        }
        graceful.shutdown();
    });

    log::info!("Start mining in {}.", configs.paths.root_path());
    manager.run(shutdown).await?;
    log::info!("Exit application.");
    Ok(())
}
