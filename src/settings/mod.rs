//! Flat `KEY=VALUE` environment file holding the panel's settings
//!
//! The file is shared with the proxy's own scripts, so unknown lines are kept
//! untouched and only whitelisted keys are ever rewritten.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;


pub const SECRET_KEY: &str = "MIHOMO_SECRET";
pub const PORT_KEY: &str = "PORT";
pub const DEFAULT_PORT: u16 = 8000;

/// Keys a client may change, in the order they are applied
pub const ALLOWED_KEYS: [&str; 7] = [
    "SKIP_CNIP",
    "QUIC",
    "LOCAL_LOOPBACK_PROXY",
    "CONFIG_URL",
    "GITHUB_PROXY",
    "GITHUB_API_PROXY",
    SECRET_KEY,
];

/// Keys that only accept `true` or `false`
pub const BOOL_KEYS: [&str; 3] = ["SKIP_CNIP", "QUIC", "LOCAL_LOOPBACK_PROXY"];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("配置值包含非法换行")]
    IllegalNewline { key: String },

    #[error("布尔配置值必须为 true 或 false")]
    InvalidBool { key: String, value: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Validated set of changes to apply to the env file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    entries: Vec<(&'static str, String)>,
}

impl SettingsUpdate {
    /// Pick whitelisted keys out of a JSON request body.
    ///
    /// Values are trimmed; an empty secret is dropped so it can never be
    /// cleared by accident.
    pub fn from_json(data: &Map<String, Value>) -> Result<Self, SettingsError> {
        let mut entries = Vec::new();

        for key in ALLOWED_KEYS {
            let Some(raw) = data.get(key) else {
                continue;
            };
            let value = render_value(raw).trim().to_string();

            if value.contains(['\n', '\r']) {
                return Err(SettingsError::IllegalNewline {
                    key: key.to_string(),
                });
            }
            if BOOL_KEYS.contains(&key) && value != "true" && value != "false" {
                return Err(SettingsError::InvalidBool {
                    key: key.to_string(),
                    value,
                });
            }
            if key == SECRET_KEY && value.is_empty() {
                continue;
            }
            entries.push((key, value));
        }

        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The new shared secret, when this update changes it
    pub fn secret(&self) -> Option<&str> {
        self.get(SECRET_KEY)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Rewrite `content` with `update` applied.
///
/// Each key replaces the first line whose trimmed text starts with `KEY=`, or
/// is appended. The result always ends with a newline.
pub fn merge_lines(content: &str, update: &SettingsUpdate) -> String {
    let mut lines: Vec<String> = if content.is_empty() {
        Vec::new()
    } else {
        content.split('\n').map(str::to_string).collect()
    };

    for (key, value) in &update.entries {
        let prefix = format!("{key}=");
        let entry = format!("{prefix}{value}");
        match lines
            .iter()
            .position(|line| line.trim().starts_with(&prefix))
        {
            Some(index) => lines[index] = entry,
            // Keep the trailing empty segment last so appends don't leave blank lines
            None if lines.last().is_some_and(String::is_empty) => {
                let at = lines.len() - 1;
                lines.insert(at, entry);
            }
            None => lines.push(entry),
        }
    }

    let mut merged = lines.join("\n");
    if !merged.ends_with('\n') {
        merged.push('\n');
    }
    merged
}

/// Handle on the env file. Clones share one write lock.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File contents, or an empty string when the file does not exist
    async fn read(&self) -> Result<String, SettingsError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(SettingsError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Value of the first line starting with `KEY=`
    pub async fn lookup(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let prefix = format!("{key}=");
        let content = self.read().await?;
        Ok(content
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with(&prefix))
            .map(|line| line[prefix.len()..].to_string()))
    }

    /// Listening port; anything but plain digits falls back to the default
    pub async fn port(&self) -> Result<u16, SettingsError> {
        let port = self.lookup(PORT_KEY).await?.and_then(|value| {
            if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                value.parse().ok()
            } else {
                None
            }
        });
        Ok(port.unwrap_or(DEFAULT_PORT))
    }

    /// Shared secret; an empty value means none is configured
    pub async fn secret(&self) -> Result<Option<String>, SettingsError> {
        Ok(self
            .lookup(SECRET_KEY)
            .await?
            .filter(|secret| !secret.is_empty()))
    }

    /// Every `KEY=VALUE` pair except the secret
    pub async fn settings(&self) -> Result<BTreeMap<String, String>, SettingsError> {
        let content = self.read().await?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter_map(|line| line.split_once('='))
            .filter(|(key, _)| *key != SECRET_KEY)
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect())
    }

    /// Merge `update` into the file and write it back with owner-only permissions.
    pub async fn apply(&self, update: &SettingsUpdate) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock().await;

        let merged = merge_lines(&self.read().await?, update);
        self.write(merged.as_bytes())
            .await
            .map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })?;

        tracing::info!(
            "Saved settings to {}: {}",
            self.path.display(),
            update.keys().collect::<Vec<_>>().join(", ")
        );
        Ok(())
    }

    async fn write(&self, content: &[u8]) -> std::io::Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }

        let mut file = options.open(&self.path).await?;
        file.write_all(content).await?;
        file.flush().await
    }
}
