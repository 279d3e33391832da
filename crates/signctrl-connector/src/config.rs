//! Configuration file (`config.toml`) and the runtime settings derived from it.
//!
//! ```toml
//! [base]
//! log_level = "INFO"
//! set_size = 2
//! threshold = 10
//! start_rank = 1
//! validator_laddr = "tcp://127.0.0.1:3000"
//! retry_dial_after = "15s"
//!
//! [privval]
//! chain_id = "testchain"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use signctrl_protocol::CONN_KEY_FILE;

use crate::supervisor::DialPolicy;
use crate::transport::ValidatorAddr;
use crate::ConnectorError;

/// Full file name of the configuration file.
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "SIGNCTRL_CONFIG_DIR";

/// Accepted values of `base.log_level`.
pub const LOG_LEVELS: [&str; 4] = ["DEBUG", "INFO", "WARN", "ERR"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseConfig {
    /// Minimum log level: DEBUG, INFO, WARN or ERR.
    pub log_level: String,
    /// Number of signer instances in the set.
    pub set_size: u32,
    /// Missed blocks in a row that trigger a promotion.
    pub threshold: u32,
    /// Rank on first start-up.
    pub start_rank: u32,
    /// Address the validator listens on for its remote signer.
    pub validator_laddr: String,
    /// Silence on the connection after which it is presumed dead.
    pub retry_dial_after: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivValidatorConfig {
    /// Chain the validator signs for.
    pub chain_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub base: BaseConfig,
    pub privval: PrivValidatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base: BaseConfig {
                log_level: "INFO".to_string(),
                set_size: 2,
                threshold: 10,
                start_rank: 1,
                validator_laddr: "tcp://127.0.0.1:3000".to_string(),
                retry_dial_after: "15s".to_string(),
            },
            privval: PrivValidatorConfig {
                chain_id: String::new(),
            },
        }
    }
}

impl Config {
    /// Read and validate `config.toml` from the given directory.
    pub fn load(dir: &Path) -> Result<Self, ConnectorError> {
        let path = config_file_path(dir);
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ConnectorError::Config(format!("\tcouldn't read {}: {e}\n", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConnectorError> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ConnectorError::Config(format!("\t{e}\n")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConnectorError> {
        toml::to_string_pretty(self).map_err(|e| ConnectorError::Config(e.to_string()))
    }

    /// Check every field, reporting all violations at once.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        let mut errs = String::new();
        let base = &self.base;

        if !LOG_LEVELS.contains(&base.log_level.as_str()) {
            errs += &format!("\tlog_level must be one of the following: {LOG_LEVELS:?}\n");
        }
        if base.set_size < 2 {
            errs += "\tset_size must be 2 or higher\n";
        }
        if base.threshold < 2 {
            errs += "\tthreshold must be 2 or higher\n";
        }
        if base.start_rank < 1 {
            errs += "\tstart_rank must be 1 or higher\n";
        } else if base.start_rank > base.set_size {
            errs += "\tstart_rank must not be higher than set_size\n";
        }
        if let Err(e) = ValidatorAddr::from_str(&base.validator_laddr) {
            errs += &format!("\tvalidator_laddr: {e}\n");
        }
        if let Err(e) = parse_duration(&base.retry_dial_after) {
            errs += &format!("\tretry_dial_after: {e}\n");
        }
        if self.privval.chain_id.trim().is_empty() {
            errs += "\tchain_id must not be empty\n";
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(ConnectorError::Config(errs))
        }
    }

    pub fn validator_addr(&self) -> Result<ValidatorAddr, ConnectorError> {
        ValidatorAddr::from_str(&self.base.validator_laddr)
            .map_err(|e| ConnectorError::Config(e.to_string()))
    }

    pub fn retry_dial_after(&self) -> Result<Duration, ConnectorError> {
        parse_duration(&self.base.retry_dial_after).map_err(ConnectorError::Config)
    }

    /// `tracing` filter directive for the configured log level.
    pub fn log_directive(&self) -> &'static str {
        match self.base.log_level.as_str() {
            "DEBUG" => "debug",
            "WARN" => "warn",
            "ERR" => "error",
            _ => "info",
        }
    }
}

/// Runtime settings handed to the controller loop.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub validator_addr: ValidatorAddr,
    pub conn_key_path: PathBuf,
    pub chain_id: String,
    pub liveness_timeout: Duration,
    pub dial_policy: DialPolicy,
}

impl ControllerSettings {
    pub fn from_config(config: &Config, dir: &Path) -> Result<Self, ConnectorError> {
        Ok(Self {
            validator_addr: config.validator_addr()?,
            conn_key_path: dir.join(CONN_KEY_FILE),
            chain_id: config.privval.chain_id.clone(),
            liveness_timeout: config.retry_dial_after()?,
            dial_policy: DialPolicy::default(),
        })
    }
}

/// Parse `<n>s`, `<n>m` or `<n>h` with `n > 0`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("must not be empty".into());
    }
    let missing_unit = || format!("'{s}' is missing the unit of time (s, m or h)");
    let (unit_at, unit) = s.char_indices().last().ok_or_else(missing_unit)?;
    let secs_per_unit: u64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        _ => return Err(missing_unit()),
    };
    let value: u64 = s[..unit_at]
        .parse()
        .map_err(|_| format!("'{s}' is missing the time"))?;
    if value == 0 {
        return Err(format!("'{s}' must be greater than zero"));
    }
    let secs = value
        .checked_mul(secs_per_unit)
        .ok_or_else(|| format!("'{s}' is too long"))?;
    Ok(Duration::from_secs(secs))
}

/// Configuration directory in use, first match wins:
///
/// 1) `$SIGNCTRL_CONFIG_DIR`
/// 2) `$HOME/.signctrl`
/// 3) the current working directory
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".signctrl");
    }
    PathBuf::from(".")
}

pub fn config_file_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}
