use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upload: UploadConfig,
    pub socket: SocketConfig,
    pub http: HttpConfig,
    pub transcode: TranscodeConfig,
    pub listing: ListingConfig,
    pub log: LogConfig,
}

/// Sizing of the ingestion pipeline and where uploads land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Uploads processed in parallel (W).
    pub thread_pool_size: usize,
    /// Admitted uploads allowed to wait for a worker (Q).
    pub queue_size: usize,
    /// Relative paths resolve against the working directory.
    pub storage_dir: PathBuf,
}
impl Default for UploadConfig {
    fn default() -> Self {
        Self { thread_pool_size: 4, queue_size: 10, storage_dir: PathBuf::from("uploaded_videos") }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}
impl Default for SocketConfig {
    fn default() -> Self {
        Self { enabled: true, bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 12345)) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}
impl Default for HttpConfig {
    fn default() -> Self {
        Self { enabled: true, bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub enabled: bool,
    /// Searched for in `PATH` when unset.
    pub ffmpeg: Option<PathBuf>,
    /// No deadline when unset.
    pub timeout_secs: Option<u64>,
}
impl Default for TranscodeConfig {
    fn default() -> Self {
        Self { enabled: true, ffmpeg: None, timeout_secs: None }
    }
}
impl TranscodeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub extensions: Vec<String>,
}
impl Default for ListingConfig {
    fn default() -> Self {
        Self { extensions: ["mp4", "avi", "mov"].map(String::from).to_vec() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Used when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
}
impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::default() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Config {
    /// Every problem with the loaded values, in field order. Empty means the
    /// configuration is usable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.upload.thread_pool_size < 1 {
            problems.push("upload.thread_pool_size must be at least 1".to_string());
        }
        if self.upload.queue_size < 1 {
            problems.push("upload.queue_size must be at least 1".to_string());
        }
        if self.upload.storage_dir.as_os_str().is_empty() {
            problems.push("upload.storage_dir must not be empty".to_string());
        }
        if !self.socket.enabled && !self.http.enabled {
            problems.push("at least one of socket.enabled and http.enabled must be true".to_string());
        }
        if self.transcode.timeout_secs == Some(0) {
            problems.push("transcode.timeout_secs must be at least 1 when set".to_string());
        }
        if self.listing.extensions.iter().all(|ext| ext.trim_start_matches('.').is_empty()) {
            problems.push("listing.extensions must name at least one extension".to_string());
        }
        if LevelFilter::from_str(&self.log.level).is_err() {
            problems.push(format!("log.level {:?} is not a log level", self.log.level));
        }
        problems
    }
}
