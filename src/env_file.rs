use crate::error::{Result, ServiceError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the file of `KEY=VALUE` pairs to load
pub const ENV_FILE_VAR: &str = "ENV_FILE";

/// File loaded when `ENV_FILE` is not set
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Load the file named by `ENV_FILE` (or `.env`) into the process environment.
///
/// Variables already present in the environment are not overridden. A missing
/// `.env` is fine; any other missing file is an error.
pub fn load_env_file() -> Result<Option<PathBuf>> {
    let requested = std::env::var(ENV_FILE_VAR)
        .ok()
        .filter(|value| !value.is_empty());
    load_env_file_from(requested.as_deref())
}

pub fn load_env_file_from(requested: Option<&str>) -> Result<Option<PathBuf>> {
    let path = Path::new(requested.unwrap_or(DEFAULT_ENV_FILE));

    match std::fs::metadata(path) {
        Ok(_) => {
            dotenvy::from_path(path).map_err(|e| ServiceError::EnvFile {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            info!("Loaded environment from {}", path.display());
            Ok(Some(path.to_path_buf()))
        }
        Err(_) if path == Path::new(DEFAULT_ENV_FILE) => {
            debug!("No {} file found, using process environment only", DEFAULT_ENV_FILE);
            Ok(None)
        }
        Err(e) => Err(ServiceError::EnvFile {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
    }
}
