use std::{env, path::PathBuf, sync::OnceLock};

use config::{Environment, File};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, FleetResult};

pub static CONFIG_INSTANCE: OnceLock<Settings> = OnceLock::new();

/// Pull references for every container image the operator manages.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct ImageSettings {
    #[serde(default)]
    pub core_resolver: String,
    #[serde(default)]
    pub cli_helper: String,
    #[serde(default)]
    pub metrics_proxy: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: LevelFilter,

    #[serde(default)]
    pub release_version: String,

    #[serde(default)]
    pub images: ImageSettings,

    #[serde(default = "default_operator_namespace")]
    pub operator_namespace: String,

    #[serde(default = "default_operand_namespace")]
    pub operand_namespace: String,

    /// Namespace holding user-provided CA bundle config maps.
    #[serde(default = "default_config_namespace")]
    pub config_namespace: String,

    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,

    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,

    #[serde(default = "default_degraded_toleration_secs")]
    pub degraded_toleration_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            release_version: String::new(),
            images: ImageSettings::default(),
            operator_namespace: default_operator_namespace(),
            operand_namespace: default_operand_namespace(),
            config_namespace: default_config_namespace(),
            service_cidr: default_service_cidr(),
            cluster_domain: default_cluster_domain(),
            degraded_toleration_secs: default_degraded_toleration_secs(),
        }
    }
}

pub fn init_config(settings: Settings) -> FleetResult<&'static Settings> {
    CONFIG_INSTANCE
        .set(settings)
        .map_err(|_| FleetError::AlreadyInitialized)?;
    get_config()
}

pub fn get_config() -> FleetResult<&'static Settings> {
    CONFIG_INSTANCE.get().ok_or(FleetError::NotInitialized)
}

impl Settings {
    /// Layers an optional settings file, `config/default`, `config.{RUN_MODE}` and
    /// `DNSFLEET_*` environment variables, later sources winning.
    pub fn load(path: Option<PathBuf>) -> FleetResult<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let mut s = config::Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config.{}", run_mode)).required(false));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(FleetError::InvalidSetting {
                    name: "settings".to_string(),
                    reason: format!("{} is not a file", path.display()),
                });
            }
            s = s.add_source(File::from(path.as_path()));
        }
        let s = s
            .add_source(
                Environment::with_prefix("DNSFLEET")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let cfg: Settings = s.try_deserialize()?;
        Ok(cfg)
    }

    /// The release version and every image reference are required; running without
    /// them would report bogus operand versions.
    pub fn validate(&self) -> FleetResult {
        let required = [
            ("release_version", &self.release_version),
            ("images.core_resolver", &self.images.core_resolver),
            ("images.cli_helper", &self.images.cli_helper),
            ("images.metrics_proxy", &self.images.metrics_proxy),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(FleetError::MissingSetting(name.to_string()));
        }
        for (name, value) in [
            ("operator_namespace", &self.operator_namespace),
            ("operand_namespace", &self.operand_namespace),
            ("config_namespace", &self.config_namespace),
        ] {
            if value.is_empty() {
                return Err(FleetError::InvalidSetting {
                    name: name.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn default_log_level() -> LevelFilter {
    LevelFilter::Info
}

fn default_operator_namespace() -> String {
    "dnsfleet-dns-operator".to_string()
}

fn default_operand_namespace() -> String {
    "dnsfleet-dns".to_string()
}

fn default_config_namespace() -> String {
    "dnsfleet-config".to_string()
}

fn default_service_cidr() -> String {
    "172.30.0.0/16".to_string()
}

fn default_cluster_domain() -> String {
    "cluster.local".to_string()
}

fn default_degraded_toleration_secs() -> u64 {
    40
}
