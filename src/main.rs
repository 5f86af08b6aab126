use clap::Parser;
use mihomo_panel::app::{handle_fatal_error, init_logging, run, AppConfig};
use mihomo_panel::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli).await {
        Ok(config) => config,
        Err(e) => handle_fatal_error(e.into(), cli.verbose),
    };
    init_logging(&config);

    if let Err(e) = run(config).await {
        handle_fatal_error(e, cli.verbose);
    }
}
