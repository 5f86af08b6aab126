//! CLI argument structures

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// Local control panel for the mihomo proxy service
#[derive(Parser, Debug, Clone)]
#[command(name = "mihomo-panel")]
#[command(about = "mihomo-panel - Reload, tail logs and edit settings of a mihomo service", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Environment file holding PORT, MIHOMO_SECRET and the editable settings
    #[arg(long, value_name = "PATH", default_value = ".env")]
    pub env_file: PathBuf,

    /// Port to listen on (overrides PORT from the env file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Page served at /
    #[arg(long, value_name = "PATH", default_value = "ui.html")]
    pub ui: PathBuf,

    /// Script run by /reload
    #[arg(long, value_name = "PATH", default_value = "./auto_task.sh")]
    pub reload_script: String,

    /// systemd unit whose journal /logs follows
    #[arg(long, default_value = "mihomo")]
    pub unit: String,

    /// Allow several reloads to run at the same time
    #[arg(long)]
    pub no_exclusive_reload: bool,
}
