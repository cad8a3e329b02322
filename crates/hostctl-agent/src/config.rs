//! Startup configuration
//!
//! Command-line flags pick the files; the env file supplies the bot token,
//! the allowed caller and the device name. The env file is parsed into a map
//! and never applied to the process environment.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use clap::Parser;
use hostctl_proto::CallerId;
use sysinfo::System;
use thiserror::Error;

/// Env file location relative to the home directory
#[cfg(windows)]
pub const DEFAULT_ENV_FILE: &str = "daemon/Windows/.env.w11";

/// Env file location relative to the home directory
#[cfg(not(windows))]
pub const DEFAULT_ENV_FILE: &str = "Services/.env.linux";

/// State directory relative to the home directory
pub const DEFAULT_STATE_DIR: &str = "Services";

/// Instance marker file name
pub const PID_FILE: &str = "hostctl.pid";

/// Log file name
pub const LOG_FILE: &str = "hostctl.log";

/// Device name used when nothing else is known
pub const UNKNOWN_HOST: &str = "unknown-host";

const BOT_TOKEN: &str = "BOT_TOKEN";
const ALLOWED_USER_ID: &str = "ALLOWED_USER_ID";
const DEVICE_NAME: &str = "DEVICE_NAME";

/// Command-line flags
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "hostctl-agent", version, about = "Remote-control this host from a chat")]
pub struct Cli {
    /// Env file holding BOT_TOKEN, ALLOWED_USER_ID and DEVICE_NAME
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Directory for the instance marker and log file
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Search path for host tools, instead of PATH
    #[arg(long, value_name = "PATH")]
    pub search_path: Option<String>,

    /// Root directory for capture scratch directories
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,
}

/// Configuration errors; all are fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No home directory to resolve defaults against
    #[error("Cannot determine the home directory; pass --env-file and --state-dir")]
    NoHome,

    /// Env file missing or unparsable
    #[error("Failed to read env file {path}: {source}")]
    EnvFile {
        /// File that was read
        path: PathBuf,
        /// Parser error
        #[source]
        source: dotenvy::Error,
    },

    /// Required key absent or empty
    #[error("{0} is not set in the env file")]
    Missing(&'static str),

    /// Allowed caller is not an integer
    #[error("ALLOWED_USER_ID must be an integer, got {0:?}")]
    InvalidUserId(String),
}

/// Resolved agent configuration
#[derive(Clone)]
pub struct AgentConfig {
    /// Chat bot token
    pub bot_token: String,
    /// Only caller allowed to issue commands
    pub allowed_user: CallerId,
    /// Name used in replies
    pub device_name: String,
    /// Directory for the instance marker and log file
    pub state_dir: PathBuf,
    /// Tool search path override
    pub search_path: Option<String>,
    /// Scratch root override
    pub scratch_dir: Option<PathBuf>,
    /// Env file the values came from
    pub env_file: PathBuf,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("bot_token", &"<redacted>")
            .field("allowed_user", &self.allowed_user)
            .field("device_name", &self.device_name)
            .field("state_dir", &self.state_dir)
            .field("search_path", &self.search_path)
            .field("scratch_dir", &self.scratch_dir)
            .field("env_file", &self.env_file)
            .finish()
    }
}

impl AgentConfig {
    /// Load configuration for `cli`, resolving defaults against the home directory
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        Self::load_with_home(cli, dirs::home_dir().as_deref())
    }

    /// Load configuration with an explicit home directory
    pub fn load_with_home(cli: &Cli, home: Option<&Path>) -> Result<Self, ConfigError> {
        let env_file = match &cli.env_file {
            Some(path) => path.clone(),
            None => home.ok_or(ConfigError::NoHome)?.join(DEFAULT_ENV_FILE),
        };
        let state_dir = match &cli.state_dir {
            Some(dir) => dir.clone(),
            None => home.ok_or(ConfigError::NoHome)?.join(DEFAULT_STATE_DIR),
        };

        let vars = read_env_file(&env_file)?;
        let mut config = Self::from_vars(&vars, env_file, state_dir)?;
        config.search_path = cli.search_path.clone();
        config.scratch_dir = cli.scratch_dir.clone();
        Ok(config)
    }

    /// Build from parsed env-file values
    pub fn from_vars(
        vars: &HashMap<String, String>,
        env_file: PathBuf,
        state_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let bot_token = non_empty(vars, BOT_TOKEN).ok_or(ConfigError::Missing(BOT_TOKEN))?;

        let raw_user = non_empty(vars, ALLOWED_USER_ID).ok_or(ConfigError::Missing(ALLOWED_USER_ID))?;
        let allowed_user = raw_user
            .parse::<i64>()
            .map(CallerId)
            .map_err(|_| ConfigError::InvalidUserId(raw_user.clone()))?;

        let device_name = resolve_device_name(non_empty(vars, DEVICE_NAME), System::host_name());

        Ok(Self {
            bot_token,
            allowed_user,
            device_name,
            state_dir,
            search_path: None,
            scratch_dir: None,
            env_file,
        })
    }

    /// Instance marker path
    pub fn pidfile(&self) -> PathBuf {
        self.state_dir.join(PID_FILE)
    }

    /// Log file path
    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join(LOG_FILE)
    }
}

/// Parse `path` as a dotenv file
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let wrap = |source: dotenvy::Error| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    };
    dotenvy::from_path_iter(path)
        .map_err(wrap)?
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(wrap)
}

/// Device name from the env file, else the host name, else [`UNKNOWN_HOST`]
pub fn resolve_device_name(configured: Option<String>, host_name: Option<String>) -> String {
    configured
        .or(host_name)
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
