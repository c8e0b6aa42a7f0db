use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Chatdesk realtime server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "chatdesk-server", version, about = "Chatdesk realtime chat server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CHATDESK_PORT", default_value = "1984")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CHATDESK_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./chatdesk.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CHATDESK_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "CHATDESK_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Chat room and notification hub tuning (loaded from [rooms] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rooms: Option<RoomsConfig>,
}

/// Tuning for chat rooms and notification hubs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Seconds between a room going empty and its cleanup deadline (default: 300)
    #[serde(default = "default_idle_cleanup")]
    pub idle_cleanup_secs: u64,

    /// Interval in seconds between cleanup sweeps (default: 30)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Messages sent as backlog on connect (default: 10)
    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: u32,

    /// Largest history page a client may request (default: 100)
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: u32,

    /// Longest accepted message body in characters (default: 4000)
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Bound on a notify call to a notification hub, in milliseconds (default: 5000)
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_ms: u64,

    /// Display-name cache TTL in seconds (default: 86400 = 24 hours)
    #[serde(default = "default_display_name_ttl")]
    pub display_name_ttl_secs: u64,

    /// Messages a participant may send per rate window (default: 20)
    #[serde(default = "default_max_messages_per_window")]
    pub max_messages_per_window: u32,

    /// Rate window length in seconds (default: 60)
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            idle_cleanup_secs: 300,
            sweep_interval_secs: 30,
            backlog_limit: 10,
            max_page_limit: 100,
            max_content_length: 4000,
            notify_timeout_ms: 5000,
            display_name_ttl_secs: 86400,
            max_messages_per_window: 20,
            rate_window_secs: 60,
        }
    }
}

fn default_idle_cleanup() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_backlog_limit() -> u32 {
    10
}

fn default_max_page_limit() -> u32 {
    100
}

fn default_max_content_length() -> usize {
    4000
}

fn default_notify_timeout() -> u64 {
    5000
}

fn default_display_name_ttl() -> u64 {
    86400
}

fn default_max_messages_per_window() -> u32 {
    20
}

fn default_rate_window() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1984,
            bind_address: "0.0.0.0".to_string(),
            config: "./chatdesk.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            rooms: Some(RoomsConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHATDESK_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CHATDESK_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// The `[rooms]` section, or its defaults when absent.
    pub fn rooms(&self) -> RoomsConfig {
        self.rooms.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chatdesk Server Configuration
# Place this file at ./chatdesk.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHATDESK_PORT,
# CHATDESK_ROOMS__BACKLOG_LIMIT, etc.) or CLI flags (--port, etc.)

# Server port (default: 1984)
# port = 1984

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# ---- Chat rooms and notification hubs ----
# [rooms]

# Seconds after the last participant leaves before a room's state is cleared
# idle_cleanup_secs = 300

# Interval in seconds between cleanup sweeps
# sweep_interval_secs = 30

# Messages sent as backlog when a participant connects
# backlog_limit = 10

# Largest history page a client may request
# max_page_limit = 100

# Longest accepted message body, in characters
# max_content_length = 4000

# Bound on a room-to-hub notify call, in milliseconds
# notify_timeout_ms = 5000

# Display-name cache TTL in seconds (24 hours)
# display_name_ttl_secs = 86400

# Per-participant send rate limit
# max_messages_per_window = 20
# rate_window_secs = 60
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooms_section_overrides_only_named_keys() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                port = 4000
                [rooms]
                idle_cleanup_secs = 60
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.port, 4000);
        let rooms = config.rooms();
        assert_eq!(rooms.idle_cleanup_secs, 60);
        assert_eq!(rooms.backlog_limit, 10);
        assert_eq!(rooms.max_messages_per_window, 20);
    }

    #[test]
    fn template_is_valid_toml() {
        let parsed: Result<Config, _> = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(&generate_config_template()))
            .extract();
        assert!(parsed.is_ok());
    }
}
