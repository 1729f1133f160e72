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

use crate::config::Configs;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
/// A politeness aware website miner
pub struct MinerArgs {
    /// Writes an example config to the data folder.
    #[arg(long)]
    pub generate_example_config: bool,

    /// The folder containing the configs.
    #[arg(short, long)]
    pub config: Option<String>,

    /// The mode of the miner
    #[command(subcommand)]
    pub mode: Option<RunMode>,
}

#[derive(Subcommand, Debug)]
pub enum RunMode {
    /// Mines until Ctrl-C is pressed.
    Run {
        /// Overrides the log level from the config.
        #[arg(long)]
        override_log_level: Option<log::LevelFilter>,
        /// Log to file
        #[arg(long)]
        log_to_file: bool,
        /// The keywords to report, replaces the configured ones.
        #[arg(short, long, value_delimiter = ',')]
        keywords: Vec<String>,
    },
    /// Adds a host to the ignore list of the data folder.
    Ignore {
        /// The host, all of its subdomains are ignored too.
        host: String,
    },
}

#[derive(Debug)]
pub enum ConsumedArgs {
    Run(Configs),
    Ignore(Configs, String),
    Nothing,
}

fn load_configs(folder: Option<String>) -> Result<Configs, config::ConfigError> {
    match folder {
        None => Configs::discover_or_default(),
        Some(folder) => Configs::load_from(folder),
    }
}

/// Consumes the args and returns everything necessary to execute the miner.
pub fn consume_args(args: MinerArgs) -> anyhow::Result<ConsumedArgs> {
    if args.generate_example_config {
        let configs = load_configs(args.config)?;
        let root = configs.paths.root_path();
        std::fs::create_dir_all(root)?;
        let path = root.join("example_config.json");
        let file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &Configs::default())?;
        println!("Wrote the example config to {path}");
        return Ok(ConsumedArgs::Nothing);
    }

    let Some(mode) = args.mode else {
        return Ok(ConsumedArgs::Nothing);
    };
    let mut configs = load_configs(args.config)?;
    match mode {
        RunMode::Run {
            override_log_level,
            log_to_file,
            keywords,
        } => {
            if let Some(level) = override_log_level {
                configs.system.log_level = level;
            }
            if log_to_file {
                configs.system.log_to_file = true;
            }
            if !keywords.is_empty() {
                configs.miner.keywords = keywords;
            }
            Ok(ConsumedArgs::Run(configs))
        }
        RunMode::Ignore { host } => Ok(ConsumedArgs::Ignore(configs, host)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn run_overrides_the_configs() {
        let dir = Utf8TempDir::new().unwrap();
        let args = MinerArgs::parse_from([
            "frontier-miner",
            "--config",
            dir.path().as_str(),
            "run",
            "--override-log-level",
            "debug",
            "--keywords",
            "gold,silver",
        ]);
        match consume_args(args).unwrap() {
            ConsumedArgs::Run(configs) => {
                assert_eq!(log::LevelFilter::Debug, configs.system.log_level);
                assert_eq!(vec!["gold", "silver"], configs.miner.keywords);
                assert!(!configs.system.log_to_file);
            }
            other => panic!("Unexpected {other:?}"),
        }
    }

    #[test]
    fn ignore_takes_the_host() {
        let args = MinerArgs::parse_from(["frontier-miner", "ignore", "example.com"]);
        match consume_args(args).unwrap() {
            ConsumedArgs::Ignore(_, host) => assert_eq!("example.com", host),
            other => panic!("Unexpected {other:?}"),
        }
    }

    #[test]
    fn nothing_to_do_without_a_mode() {
        let args = MinerArgs::default();
        assert!(matches!(consume_args(args).unwrap(), ConsumedArgs::Nothing));
    }
}
