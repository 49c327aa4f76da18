//! Layered configuration: defaults, then a TOML file, then `TLGRAB_*`
//! environment variables, then CLI flags. Later layers win.

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Top-level configuration for an export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path of the timelapse listing on the printer's HTTP server.
    pub list_path: String,
    /// Bound on fetching the listing page, in seconds.
    pub fetch_timeout_secs: u64,
    /// Directory downloaded videos land in.
    pub out_dir: PathBuf,
    /// Whole-export budget in seconds, from trigger to readiness.
    pub timeout_secs: u64,
    /// TCP port of the controller's WebSocket endpoint.
    pub control_port: u16,
    /// Seconds of channel silence before a keepalive ping.
    pub keepalive_secs: u64,
    pub verbose: bool,
    pub json_logs: bool,
    pub transfer: TransferConfig,
}

/// Knobs for the retrying HTTP download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Total attempts before giving up.
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Per-attempt HTTP timeout.
    pub http_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            list_path: "/local/aic_tlp/".to_string(),
            fetch_timeout_secs: 10,
            out_dir: PathBuf::from("."),
            timeout_secs: 180,
            control_port: 3030,
            keepalive_secs: 20,
            verbose: false,
            json_logs: false,
            transfer: TransferConfig::default(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 8000,
            backoff_multiplier: 1.5,
            http_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Build the effective configuration.
    ///
    /// `cli_args` is an optional serializable struct of CLI overrides whose
    /// unset fields skip serialization, so only flags the user actually
    /// passed shadow the lower layers.
    pub fn new<A: Serialize>(cli_args: Option<&A>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(Env::var_or("TLGRAB_CONFIG", "tlgrab.toml")))
            .merge(Env::prefixed("TLGRAB_").split("__"));

        if let Some(args) = cli_args {
            figment = figment.merge(Serialized::defaults(args));
        }

        figment.extract()
    }
}
