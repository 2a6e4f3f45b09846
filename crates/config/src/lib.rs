//! Layered configuration: built-in defaults, then an optional file, then
//! `REEL_*` environment variables (`REEL_UPLOAD__QUEUE_SIZE=20` sets
//! `upload.queue_size`).

pub mod error;
mod model;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
pub use crate::model::{
    Config, HttpConfig, ListingConfig, LogConfig, LogFormat, SocketConfig, TranscodeConfig, UploadConfig,
};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "REEL_";

/// Load and validate configuration.
///
/// An explicit `path` must exist. Without one, `config.toml` in the platform
/// config directory is used if present.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let file = match path {
        Some(path) => {
            if !path.is_file() {
                exn::bail!(ErrorKind::Invalid(format!("config file {} does not exist", path.display())));
            }
            Some(path.to_path_buf())
        },
        None => default_file().filter(|p| p.is_file()),
    };
    match &file {
        Some(file) => tracing::debug!(path = %file.display(), "Loading configuration file"),
        None => tracing::debug!("No configuration file; using defaults and environment"),
    }
    extract(figment(file.as_deref()))
}

fn default_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "reel").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Provider stack. File format follows the extension; anything unrecognised
/// is read as TOML.
fn figment(file: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(file) = file {
        figment = match file.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(file)),
            Some("json") => figment.merge(Json::file_exact(file)),
            _ => figment.merge(Toml::file_exact(file)),
        };
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

fn extract(figment: Figment) -> Result<Config> {
    let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
    let problems = config.problems();
    if !problems.is_empty() {
        exn::bail!(ErrorKind::Invalid(problems.join("; ")));
    }
    Ok(config)
}
