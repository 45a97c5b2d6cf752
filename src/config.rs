//! Configuration management for combridge.
//!
//! Configuration is read from `~/.combridge/config.toml` (or the path given
//! with `--config`). Every section is optional and falls back to defaults
//! matching SDF's `com`:
//!
//! ```toml
//! [remote]
//! command = "ssh"
//! args = ["-tt", "alice@sdf.org", "stty cols {cols} rows {rows}; exec com"]
//!
//! [terminal]
//! cols = 80
//! rows = 24
//!
//! [identity]
//! username = "alice"
//!
//! [session]
//! timeout_ms = 10000
//! queue = "fifo"      # or "reject"
//!
//! [keys]
//! goto = "g"
//!
//! [prompts]
//! goto = '(?i)room.*:\s*$'
//!
//! [bridge]
//! filter_system = true
//! await_completion = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub terminal: TerminalConfig,
    pub identity: IdentityConfig,
    pub session: SessionConfig,
    pub keys: KeysConfig,
    pub prompts: PromptsConfig,
    pub bridge: BridgeConfig,
}

/// Command that yields an interactive `com` session on stdin/stdout
///
/// ssh cannot learn a window size from piped stdio, so the default remote
/// command sizes its pty with `stty` first. `{cols}` and `{rows}` in `args`
/// are replaced with the `[terminal]` geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Advertised to the remote through `TERM`
    pub term: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            command: "ssh".to_string(),
            args: vec!["-tt".to_string(), "sdf.org".to_string(), REMOTE_SHELL_COMMAND.to_string()],
            term: "xterm-256color".to_string(),
        }
    }
}

/// Runs `com` on a pty sized to match the local screen
const REMOTE_SHELL_COMMAND: &str = "stty cols {cols} rows {rows} 2>/dev/null; exec com";

impl RemoteConfig {
    /// Point the default ssh invocation at `user@host`
    pub fn set_login(&mut self, user: &str, host: &str) {
        self.command = "ssh".to_string();
        self.args = vec![
            "-tt".to_string(),
            format!("{}@{}", user, host),
            REMOTE_SHELL_COMMAND.to_string(),
        ];
    }

    /// `args` with the screen geometry filled in
    pub fn args_for(&self, terminal: &TerminalConfig) -> Vec<String> {
        let cols = terminal.cols.to_string();
        let rows = terminal.rows.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{cols}", &cols).replace("{rows}", &rows))
            .collect()
    }
}

/// Virtual screen geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub cols: u16,
    pub rows: u16,
    /// Settle records retained between polls
    pub settle_history: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            settle_history: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Our username on the remote; lines from it are echoes
    pub username: String,
}

/// What happens to a request while another is in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    #[default]
    Fifo,
    Reject,
}

/// Session driver timing and queueing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for one command (prompt replies, room changes)
    pub timeout_ms: u64,
    /// Deadline for listing commands (who, rooms, idle)
    pub listing_timeout_ms: u64,
    /// Longest wait for the input prompt before typing anyway
    pub settle_ms: u64,
    /// Minimum pause between two commands
    pub command_gap_ms: u64,
    pub queue: QueuePolicy,
    pub queue_limit: usize,
    /// Keys sent after a timeout to get back to command mode (empty = none)
    pub abort_keys: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            listing_timeout_ms: 15_000,
            settle_ms: 500,
            command_gap_ms: 200,
            queue: QueuePolicy::Fifo,
            queue_limit: 32,
            abort_keys: "\n".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn listing_timeout(&self) -> Duration {
        Duration::from_millis(self.listing_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn command_gap(&self) -> Duration {
        Duration::from_millis(self.command_gap_ms)
    }
}

/// Keystrokes of the remote program
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub input: String,
    pub goto: String,
    pub emote: String,
    pub private: String,
    pub who: String,
    pub rooms: String,
    pub idle: String,
    pub review: String,
    /// Review with a line count; the count is asked for afterwards
    pub review_count: String,
    /// Peek into another room; followed by the room name
    pub peek: String,
    /// Who listing of another room; followed by the room name
    pub who_room: String,
    pub help: String,
    pub quit: String,
    pub terminator: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            input: " ".to_string(),
            goto: "g".to_string(),
            emote: "e".to_string(),
            private: "s".to_string(),
            who: "w".to_string(),
            rooms: "l".to_string(),
            idle: "I".to_string(),
            review: "r".to_string(),
            review_count: "R".to_string(),
            peek: "p".to_string(),
            who_room: "W".to_string(),
            help: "h".to_string(),
            quit: "q".to_string(),
            terminator: "\n".to_string(),
        }
    }
}

/// Regexes matched against the cursor line to detect prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub input: String,
    pub goto: String,
    pub emote: String,
    pub private: String,
    /// Line count question after the review-with-count key
    pub review: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            input: r"^\s*(?:\[?[\w@.\-]+\]?\s*)?[:>]\s*$".to_string(),
            goto: r"(?i)(?:room|goto)[^:]*:\s*$".to_string(),
            emote: r"(?i)(?:emote|action|dump)[^:]*:\s*$".to_string(),
            private: r"(?i)(?:message|msg|text)[^:]*:\s*$".to_string(),
            review: r"(?i)(?:lines?|how many)[^:?]*[:?]\s*$".to_string(),
        }
    }
}

/// Event filtering and verb behavior of the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Drop system notices before they reach handlers
    pub filter_system: bool,
    /// Verbs resolve when the remote confirms, not when queued
    pub await_completion: bool,
    /// Surface unclassified lines as `Unknown` events
    pub emit_unknown: bool,
    /// Translate incoming remote text (en -> zh) before forwarding
    pub translate_incoming: bool,
    /// Capacity of the request channel into the run loop
    pub request_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            filter_system: true,
            await_completion: true,
            emit_unknown: false,
            translate_incoming: false,
            request_buffer: 64,
        }
    }
}

impl Config {
    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from a given path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// `~/.combridge`, created on demand
    pub fn data_dir() -> Option<PathBuf> {
        let dir = home_dir()?.join(".combridge");
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir)
    }

    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        Self::data_dir().map(|dir| dir.join("config.toml"))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.terminal.cols, 80);
        assert_eq!(config.terminal.rows, 24);
        assert_eq!(config.keys.goto, "g");
        assert_eq!(config.keys.terminator, "\n");
        assert_eq!(config.session.queue, QueuePolicy::Fifo);
        assert!(config.bridge.filter_system);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [identity]
            username = "alice"

            [session]
            queue = "reject"
            timeout_ms = 2500

            [keys]
            idle = "i"
            "#,
        )
        .unwrap();

        assert_eq!(config.identity.username, "alice");
        assert_eq!(config.session.queue, QueuePolicy::Reject);
        assert_eq!(config.session.timeout(), Duration::from_millis(2500));
        assert_eq!(config.session.queue_limit, 32);
        assert_eq!(config.keys.idle, "i");
        assert_eq!(config.keys.who, "w");
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(Config::parse("[session]\ntimeout_ms = \"soon\"").is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/combridge/config.toml")).unwrap();
        assert_eq!(config.remote.command, "ssh");
    }

    #[test]
    fn test_set_login() {
        let mut remote = RemoteConfig::default();
        remote.set_login("bob", "sdf.org");
        assert_eq!(remote.args[..2], ["-tt", "bob@sdf.org"]);
        assert!(remote.args[2].ends_with("exec com"));
    }

    #[test]
    fn test_remote_args_carry_screen_size() {
        let mut remote = RemoteConfig::default();
        remote.set_login("bob", "sdf.org");
        let terminal = TerminalConfig {
            cols: 100,
            rows: 30,
            ..TerminalConfig::default()
        };

        let args = remote.args_for(&terminal);
        assert_eq!(args[2], "stty cols 100 rows 30 2>/dev/null; exec com");

        // Arguments without placeholders are left alone
        let plain = RemoteConfig {
            args: vec!["-tt".to_string(), "host".to_string(), "com".to_string()],
            ..RemoteConfig::default()
        };
        assert_eq!(plain.args_for(&terminal), vec!["-tt", "host", "com"]);
    }
}
