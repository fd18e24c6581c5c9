//! # Configuration
//!
//! All gateway options come in through clap, which gives the precedence
//! order CLI argument > environment variable > built-in default. The store
//! credentials are only required when a store-facing loop is enabled;
//! everything else has a workable default, so a bare `kiezbox-gateway`
//! drives the serial pipeline and the API without any configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use crate::db::StoreSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "kiezbox-gateway")]
#[command(about = "Gateway service bridging a Kiezbox mesh device to InfluxDB and local clients")]
#[command(version)]
pub struct GatewayConfig {
    /// The serial device connecting us to the mesh device
    #[arg(long = "serial-dev", env = "KB_SERIAL_DEV", default_value = "/dev/ttyUSB0")]
    pub serial_device: String,

    /// Baud rate of the serial device
    #[arg(long = "serial-baud", env = "KB_SERIAL_BAUD", default_value_t = 115200)]
    pub serial_baud: u32,

    /// Directory for caching store points while the store is unreachable
    #[arg(long = "cache-dir", env = "KB_CACHE_DIR", default_value = ".kb-dbcache")]
    pub cache_dir: PathBuf,

    /// Store write timeout in seconds
    #[arg(long = "db-timeout", env = "KB_DB_TIMEOUT", default_value_t = 5)]
    pub db_timeout_secs: u64,

    /// Seconds between retry sweeps over the cache directory
    #[arg(long = "retry-interval", env = "KB_RETRY_INTERVAL", default_value_t = 60)]
    pub retry_interval_secs: u64,

    /// Set the device RTC to the system time once the device is ready
    #[arg(long)]
    pub settime: bool,

    /// Run the store writer loop
    #[arg(long)]
    pub dbwriter: bool,

    /// Run the cached-point retry loop
    #[arg(long)]
    pub dbretry: bool,

    /// Port of the local HTTP API
    #[arg(long = "api-port", env = "KB_API_PORT", default_value_t = 9080)]
    pub api_port: u16,

    /// InfluxDB base URL
    #[arg(long = "db-url", env = "INFLUXDB_URL")]
    pub db_url: Option<String>,

    /// InfluxDB API token
    #[arg(long = "db-token", env = "INFLUXDB_TOKEN", hide_env_values = true)]
    pub db_token: Option<String>,

    /// InfluxDB organisation
    #[arg(long = "db-org", env = "INFLUXDB_ORG")]
    pub db_org: Option<String>,

    /// InfluxDB bucket
    #[arg(long = "db-bucket", env = "INFLUXDB_BUCKET")]
    pub db_bucket: Option<String>,

    /// Report this mode on the API instead of the observed one
    #[arg(long = "mode-override", env = "KB_MODE_OVERRIDE")]
    pub mode_override: Option<i32>,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl GatewayConfig {
    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Store settings when a store-facing loop is enabled. Missing
    /// credentials in that case are the one fatal configuration error.
    pub fn store_settings(&self) -> Result<Option<StoreSettings>> {
        if !self.dbwriter && !self.dbretry {
            return Ok(None);
        }
        match (&self.db_url, &self.db_token, &self.db_org, &self.db_bucket) {
            (Some(url), Some(token), Some(org), Some(bucket)) => Ok(Some(StoreSettings {
                url: url.clone(),
                token: token.clone(),
                org: org.clone(),
                bucket: bucket.clone(),
            })),
            _ => bail!(
                "store loops enabled but INFLUXDB_URL / INFLUXDB_TOKEN / \
                 INFLUXDB_ORG / INFLUXDB_BUCKET are not all set"
            ),
        }
    }
}
