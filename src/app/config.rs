//! Application configuration
//!
//! Built once at startup from the command line layered over the env file,
//! then shared read-only with every handler.

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::settings::{EnvFile, DEFAULT_PORT};
use crate::subprocess::{ProcessCommand, ProcessCommandBuilder};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Lines of history `journalctl` prints before following
pub const DEFAULT_LOG_TAIL_LINES: u32 = 1000;

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    pub host: IpAddr,
    pub port: u16,
    pub env_path: PathBuf,
    pub ui_path: PathBuf,
    /// Program run by `/reload`, without arguments
    pub reload_script: String,
    /// systemd unit followed by `/logs`
    pub log_unit: String,
    pub log_tail_lines: u32,
    /// Admit at most one reload at a time
    pub exclusive_reload: bool,
    /// Secret found in the env file at startup
    pub secret: Option<String>,
}

impl AppConfig {
    /// Build the configuration from parsed arguments and the env file they point at
    pub async fn load(cli: &Cli) -> Result<Self> {
        let env = EnvFile::new(&cli.env_file);
        let port = match cli.port {
            Some(port) => port,
            None => env.port().await?,
        };
        let secret = env.secret().await?;

        Self {
            verbose: cli.verbose,
            host: cli.host,
            port,
            env_path: cli.env_file.clone(),
            ui_path: cli.ui.clone(),
            reload_script: cli.reload_script.clone(),
            log_unit: cli.unit.clone(),
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            exclusive_reload: !cli.no_exclusive_reload,
            secret,
        }
        .validated()
    }

    fn validated(self) -> Result<Self> {
        if self.reload_script.trim().is_empty() {
            return Err(Error::Config("reload script must not be empty".into()));
        }
        if self.log_unit.trim().is_empty() {
            return Err(Error::Config("log unit must not be empty".into()));
        }
        Ok(self)
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_env_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_path = path.into();
        self
    }

    pub fn with_ui_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ui_path = path.into();
        self
    }

    pub fn with_reload_script(mut self, script: impl Into<String>) -> Self {
        self.reload_script = script.into();
        self
    }

    pub fn with_exclusive_reload(mut self, exclusive: bool) -> Self {
        self.exclusive_reload = exclusive;
        self
    }

    pub fn reload_command(&self) -> ProcessCommand {
        ProcessCommandBuilder::new(&self.reload_script).build()
    }

    /// `journalctl -n <tail> -fu <unit>`
    pub fn logs_command(&self) -> ProcessCommand {
        let tail = self.log_tail_lines.to_string();
        ProcessCommandBuilder::new("journalctl")
            .args(["-n", tail.as_str(), "-fu", self.log_unit.as_str()])
            .build()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Get the log level string based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            2 => "trace",
            _ => "trace,hyper=debug,tower=debug",
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            env_path: PathBuf::from(".env"),
            ui_path: PathBuf::from("ui.html"),
            reload_script: "./auto_task.sh".to_string(),
            log_unit: "mihomo".to_string(),
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            exclusive_reload: true,
            secret: None,
        }
    }
}
