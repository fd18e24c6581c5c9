//! Time-series store layer.
//!
//! The gateway consumes a narrow store contract — reachability ping and
//! single-point write — expressed as the [`Store`] trait. The production
//! implementation speaks the InfluxDB v2 HTTP API; tests substitute
//! in-memory doubles. Point conversion lives in [`point`], the disk spill
//! format in [`spill`], and the writer/retry loops in [`writer`].

pub mod point;
pub mod spill;
pub mod writer;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use log::debug;
use thiserror::Error;

/// Timeout for every store write.
pub const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the reachability probe issued before each write.
pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// One field value on a store point.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// A single measurement point: tags index it, fields carry the values,
/// timestamp is unix seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: i64,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    /// Render the point in line protocol with second precision.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_name(&self.measurement);
        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&escape_tag(value));
        }
        line.push(' ');
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                line.push(',');
            }
            first = false;
            line.push_str(&escape_tag(key));
            line.push('=');
            match value {
                FieldValue::Bool(b) => line.push_str(if *b { "true" } else { "false" }),
                FieldValue::Int(i) => {
                    line.push_str(&i.to_string());
                    line.push('i');
                }
                FieldValue::Float(f) => line.push_str(&f.to_string()),
                FieldValue::Str(s) => {
                    line.push('"');
                    line.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
                    line.push('"');
                }
            }
        }
        line.push(' ');
        line.push_str(&self.timestamp.to_string());
        line
    }
}

fn escape_name(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The write did not complete within the configured deadline. The only
    /// error that sends a record to the disk cache.
    #[error("store request timed out")]
    Timeout,
    #[error("store unreachable: {0}")]
    Unreachable(String),
    /// The store answered and refused the point; retrying the same record
    /// will not help.
    #[error("store rejected write: {0}")]
    Rejected(String),
}

/// Consumed store contract.
pub trait Store: Send + Sync {
    /// Cheap reachability probe, bounded by [`PING_TIMEOUT`].
    fn ping(&self) -> impl Future<Output = bool> + Send;

    /// Write one point, bounded by the configured write timeout.
    fn write_point(&self, point: &Point) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Connection settings for the InfluxDB v2 API.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

/// InfluxDB v2 client over plain HTTP: `GET /ping` for reachability,
/// `POST /api/v2/write` with line protocol for points.
pub struct InfluxDb {
    client: reqwest::Client,
    settings: StoreSettings,
    timeout: Duration,
}

impl InfluxDb {
    pub fn new(settings: StoreSettings, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
            timeout,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.url.trim_end_matches('/'), path)
    }
}

impl Store for InfluxDb {
    fn ping(&self) -> impl Future<Output = bool> + Send {
        async move {
            match self
                .client
                .get(self.endpoint("/ping"))
                .timeout(PING_TIMEOUT)
                .send()
                .await
            {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    debug!("Store ping failed: {}", e);
                    false
                }
            }
        }
    }

    fn write_point(&self, point: &Point) -> impl Future<Output = Result<(), StoreError>> + Send {
        let line = point.to_line_protocol();
        async move {
            let response = self
                .client
                .post(self.endpoint("/api/v2/write"))
                .query(&[
                    ("org", self.settings.org.as_str()),
                    ("bucket", self.settings.bucket.as_str()),
                    ("precision", "s"),
                ])
                .header("Authorization", format!("Token {}", self.settings.token))
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(line)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Err(e) if e.is_timeout() => Err(StoreError::Timeout),
                Err(e) => Err(StoreError::Unreachable(e.to_string())),
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let detail = format!("{}: {}", status, body.chars().take(200).collect::<String>());
                    if status.is_server_error() {
                        Err(StoreError::Unreachable(detail))
                    } else {
                        Err(StoreError::Rejected(detail))
                    }
                }
            }
        }
    }
}
