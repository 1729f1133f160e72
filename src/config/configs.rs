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

use crate::config::{FrontierConfig, MinerConfig, PathsConfig, SystemConfig};
use camino::Utf8Path;
use config::Config;
use serde::{Deserialize, Serialize};

/// All configs of the miner.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename(serialize = "Config"))]
pub struct Configs {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub miner: MinerConfig,
}

impl Configs {
    /// Loads the configs in [folder], the environment overrides them.
    pub fn load_from<P: AsRef<Utf8Path>>(folder: P) -> Result<Self, config::ConfigError> {
        Config::builder()
            .add_source(config::File::with_name("./config").required(false))
            .add_source(config::File::with_name("./frontier-miner").required(false))
            .add_source(
                config::File::with_name(folder.as_ref().join("frontier-miner").as_str())
                    .required(false),
            )
            .add_source(
                config::File::with_name(folder.as_ref().join("config").as_str()).required(false),
            )
            .add_source(config::Environment::with_prefix("MINER").separator("."))
            .build()?
            .try_deserialize()
    }

    /// Loads the configs from the working directory, falls back to the defaults.
    pub fn discover_or_default() -> Result<Self, config::ConfigError> {
        match Config::builder()
            .add_source(config::File::with_name("./config").required(false))
            .add_source(config::File::with_name("./frontier-miner").required(false))
            .add_source(config::File::with_name("./miner_data/config").required(false))
            .add_source(config::Environment::with_prefix("MINER").separator("."))
            .build()
        {
            Ok(value) => value.try_deserialize(),
            Err(_) => Ok(Default::default()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Configs;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn partial_configs_fall_back_to_defaults() {
        let dir = Utf8TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("frontier-miner.json"),
            r#"{"miner": {"worker_count": 3, "keywords": ["gold"]}, "paths": {"root": "elsewhere"}}"#,
        )
        .unwrap();
        let configs = Configs::load_from(dir.path()).unwrap();
        assert_eq!(3, configs.miner.worker_count);
        assert_eq!(vec!["gold".to_string()], configs.miner.keywords);
        assert_eq!(96, configs.miner.work_per_worker);
        assert_eq!("elsewhere", configs.paths.root.as_str());
        assert_eq!(384, configs.frontier.host_capacity);
        assert_eq!(log::LevelFilter::Info, configs.system.log_level);
    }

    #[test]
    fn configs_survive_json() {
        let configs = Configs::default();
        let json = serde_json::to_string(&configs).unwrap();
        let parsed: Configs = serde_json::from_str(&json).unwrap();
        assert_eq!(configs, parsed);
    }
}
