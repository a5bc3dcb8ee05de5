//! Server configuration.
//!
//! Values come from the environment (a `.env` file is loaded if present);
//! CLI flags override them in `main.rs`.
//!
//! | Variable           | Default      |
//! |--------------------|--------------|
//! | `PORT`             | `3001`       |
//! | `OUTPUT_DIR`       | `output`     |
//! | `STATIC_DIR`       | `public`     |
//! | `MAX_UPLOAD_BYTES` | `10485760`   |
//! | `RULES_DIR`        | (built-in)   |
//! | `CORS_ORIGINS`     | `*`          |

use std::env;
use std::path::PathBuf;

use crate::error::{ServerError, ServerResult};

/// Upload cap applied when `MAX_UPLOAD_BYTES` is not set.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Root of the output store
    pub output_dir: PathBuf,
    /// Static files served at `/` (skipped when the directory is missing)
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// Directory with `azure.json` / `tencent.json` rule overrides
    pub rules_dir: Option<PathBuf>,
    /// Allowed CORS origins; empty means any origin
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            output_dir: PathBuf::from("output"),
            static_dir: PathBuf::from("public"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            rules_dir: None,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Build a config from environment variables
    pub fn from_env() -> ServerResult<Self> {
        // Try loading .env file
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ServerResult<Self> {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ServerError::Config(format!("PORT must be a port number, got '{}'", port)))?;
        }
        if let Some(dir) = lookup("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }
        if let Some(max) = lookup("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = max.trim().parse().map_err(|_| {
                ServerError::Config(format!("MAX_UPLOAD_BYTES must be a byte count, got '{}'", max))
            })?;
        }
        if let Some(dir) = lookup("RULES_DIR").filter(|d| !d.trim().is_empty()) {
            config.rules_dir = Some(PathBuf::from(dir));
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty() && *o != "*")
                .map(String::from)
                .collect();
        }

        Ok(config)
    }
}
