/*
* Configuration
* -------------
* Layers, lowest priority first:
*   1. Hardcoded defaults
*   2. <CONFIG_PATH>/default.toml
*   3. <CONFIG_PATH>/local.toml
*   4. Environment variables, PVE_BALANCER__<SECTION>__<KEY>
*      (e.g. PVE_BALANCER__CLUSTER__PORT=8007)
*
* Command line flags are applied on top by the CLI.
*
* Sections:
*   cluster   - API endpoint and credentials
*   migration - how migrations are issued and awaited
*   planner   - knobs of the placement heuristic
*/

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::core::vm::DEFAULT_MEMORY_GRANULARITY;
use crate::migration::WaitPolicy;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub cluster: ClusterSettings,
    pub migration: MigrationSettings,
    pub planner: PlannerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// API host; falls back to a node named on the command line.
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_tls: bool,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    pub online: bool,
    pub poll_interval_ms: u64,
    /// Unset means wait for as long as the task runs.
    pub wait_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSettings {
    pub memory_granularity_mb: u64,
}

impl MigrationSettings {
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: self.wait_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl PlannerSettings {
    pub fn memory_granularity(&self) -> u64 {
        self.memory_granularity_mb * MIB
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());

        info!("Loading configuration from path: {}", config_path);

        Self::build(
            File::with_name(&format!("{}/default", config_path)).required(false),
            Some(File::with_name(&format!("{}/local", config_path)).required(false)),
        )
    }

    pub fn new_from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from file: {}", path.display());
        Self::build(File::from(path), None)
    }

    fn build(
        base: File<config::FileSourceFile, config::FileFormat>,
        local: Option<File<config::FileSourceFile, config::FileFormat>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Start with default settings
            .set_default("cluster.port", 8006)?
            .set_default("cluster.verify_tls", false)?
            .set_default("cluster.request_timeout_secs", 30)?
            .set_default("migration.online", true)?
            .set_default("migration.poll_interval_ms", 1000)?
            .set_default(
                "planner.memory_granularity_mb",
                DEFAULT_MEMORY_GRANULARITY / MIB,
            )?
            .add_source(base);

        if let Some(local) = local {
            builder = builder.add_source(local);
        }

        builder
            .add_source(
                Environment::with_prefix("PVE_BALANCER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

pub fn generate_default_config() -> Settings {
    Settings {
        cluster: ClusterSettings {
            host: None,
            port: 8006,
            username: Some("root@pam".to_string()),
            password: None,
            verify_tls: false,
            request_timeout_secs: 30,
        },
        migration: MigrationSettings {
            online: true,
            poll_interval_ms: 1000,
            wait_timeout_secs: None,
        },
        planner: PlannerSettings {
            memory_granularity_mb: DEFAULT_MEMORY_GRANULARITY / MIB,
        },
    }
}
