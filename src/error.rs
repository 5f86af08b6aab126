use thiserror::Error;

use crate::settings::SettingsError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Process error: {0}")]
    Process(#[from] crate::subprocess::ProcessError),
}

pub type Result<T> = std::result::Result<T, Error>;
