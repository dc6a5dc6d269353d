pub mod managed;
pub mod status;
pub mod watch;
pub mod workload;

use envconfig::Envconfig;
use kube::api::ApiResource;
use sensor_agent_crd::SensorAgent;

/// The api server refuses to hold a watch open for longer.
const WATCH_TIMEOUT_LIMIT: u32 = 295;

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "SENSOR_AGENT__NAMESPACE", default = "default")]
    pub namespace: String,

    #[envconfig(from = "SENSOR_AGENT__WATCH_TIMEOUT_SECONDS", default = "290")]
    pub watch_timeout_seconds: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Watch timeout must be below {WATCH_TIMEOUT_LIMIT} seconds, got {0}.")]
    WatchTimeout(u32),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_timeout_seconds >= WATCH_TIMEOUT_LIMIT {
            return Err(ConfigError::WatchTimeout(self.watch_timeout_seconds));
        }

        Ok(())
    }
}

/// The sensor agent resource as compiled into [`SensorAgent`], shared by the watch, status
/// writes and the owner references of generated workloads.
pub fn agent_resource() -> ApiResource {
    ApiResource::erase::<SensorAgent>(&())
}
