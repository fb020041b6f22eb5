use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Command line options for the server.
#[derive(Parser, Debug, Default)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Base directory for the message database.
    pub data_dir: PathBuf,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_port() -> u16 {
    8000
}

fn default_logging() -> bool {
    true
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // built-in defaults
        let mut port = default_port();
        let mut logging = default_logging();

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("CHATMIND_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/chatmind.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            port = file_cfg.server.port;
            logging = file_cfg.logging.enabled;
        }

        // environment overrides
        if let Ok(p) = std::env::var("CHATMIND_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("CHATMIND_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        // validate port range
        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }

        // bind address precedence for host override
        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Ok(Self {
            bind,
            data_dir,
            logging_enabled: logging,
        })
    }
}

/// Determine the default data directory for the server.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".local/share/chatmind");
        p
    } else {
        PathBuf::from("./chatmind_data")
    }
}
