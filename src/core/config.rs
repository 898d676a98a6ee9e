//! Shell configuration.
//!
//! Every limit has a built-in default. An operator can override them with a
//! `.sshclip_shell.toml` in the shell's working directory, which is the
//! account's home when the shell runs as an sshd forced command. The store
//! whitelist is not part of the configuration: see [`crate::core::store::StoreName`].

use crate::core::error::InvocationError;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the optional operator override, relative to the working directory.
pub const CONFIG_FILE_NAME: &str = ".sshclip_shell.toml";

/// What to do with a request that has more tokens than `max_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the extra tokens and keep going.
    #[default]
    Truncate,
    /// Fail the whole request.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
    /// Directory holding the stores. Relative paths resolve against the working directory.
    pub store_root: PathBuf,
    /// Cumulative token length allowed in the remote request.
    pub max_request_chars: usize,
    /// Tokens kept from a request or restriction list.
    pub max_tokens: usize,
    /// Ceiling on bytes moved by one get or put.
    pub max_transfer_bytes: u64,
    /// Longest store file path the shell will open.
    pub max_path_len: usize,
    pub chunk_size: usize,
    /// How long a put waits for its input to become readable, per chunk.
    pub read_timeout_ms: u64,
    pub overflow_policy: OverflowPolicy,
    pub jitter_min_secs: u64,
    pub jitter_max_secs: u64,
    /// Operational log sink. `None` disables file logging.
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    /// Mirror the log to stderr with source locations.
    pub debug: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from(".sshclip_store"),
            max_request_chars: 60,
            max_tokens: 5,
            max_transfer_bytes: 786_432, // 768 KiB
            max_path_len: 255,
            chunk_size: 1024,
            read_timeout_ms: 1000,
            overflow_policy: OverflowPolicy::Truncate,
            jitter_min_secs: 1,
            jitter_max_secs: 10,
            log_file: Some(PathBuf::from(".sshclip_shell.log")),
            log_level: "info".to_string(),
            debug: false,
        }
    }
}

impl ShellConfig {
    /// Parse an override document. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, InvocationError> {
        let config: ShellConfig =
            toml::from_str(content).map_err(|e| InvocationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.sshclip_shell.toml` from `dir`, or the defaults when it is absent.
    pub fn load(dir: &Path) -> Result<Self, InvocationError> {
        let path = dir.join(CONFIG_FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(InvocationError::Config(format!(
                "could not read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), InvocationError> {
        if self.store_root.as_os_str().is_empty() {
            return Err(InvocationError::Config("store_root must not be empty".into()));
        }
        if self.max_tokens == 0 {
            return Err(InvocationError::Config("max_tokens must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(InvocationError::Config("chunk_size must be at least 1".into()));
        }
        if self.jitter_min_secs > self.jitter_max_secs {
            return Err(InvocationError::Config(format!(
                "jitter_min_secs ({}) is greater than jitter_max_secs ({})",
                self.jitter_min_secs, self.jitter_max_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_build_time_limits() {
        let config = ShellConfig::default();
        assert_eq!(config.store_root, PathBuf::from(".sshclip_store"));
        assert_eq!(config.max_request_chars, 60);
        assert_eq!(config.max_tokens, 5);
        assert_eq!(config.max_transfer_bytes, 786_432);
        assert_eq!(config.overflow_policy, OverflowPolicy::Truncate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = ShellConfig::from_toml_str(
            "store_root = \"clips\"\noverflow_policy = \"reject\"\njitter_min_secs = 0\njitter_max_secs = 0\n",
        )
        .unwrap();
        assert_eq!(config.store_root, PathBuf::from("clips"));
        assert_eq!(config.overflow_policy, OverflowPolicy::Reject);
        assert_eq!(config.jitter_max_secs, 0);
        assert_eq!(config.max_tokens, 5);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            ShellConfig::from_toml_str("stores = [\"extra\"]"),
            Err(InvocationError::Config(_))
        ));
        assert!(ShellConfig::from_toml_str("chunk_size = 0").is_err());
        assert!(ShellConfig::from_toml_str("jitter_min_secs = 5\njitter_max_secs = 2").is_err());
    }

    #[test]
    fn load_falls_back_to_defaults_when_absent() {
        let tmp = tempdir().unwrap();
        assert_eq!(ShellConfig::load(tmp.path()).unwrap(), ShellConfig::default());

        fs::write(tmp.path().join(CONFIG_FILE_NAME), "max_tokens = 3\n").unwrap();
        assert_eq!(ShellConfig::load(tmp.path()).unwrap().max_tokens, 3);

        fs::write(tmp.path().join(CONFIG_FILE_NAME), "max_tokens = \"lots\"\n").unwrap();
        assert!(ShellConfig::load(tmp.path()).is_err());
    }
}
