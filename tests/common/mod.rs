//! Common test utilities and helpers

#![allow(dead_code)]

use anyhow::Result;
use mihomo_panel::app::AppConfig;
use mihomo_panel::server::{self, AppState};
use mihomo_panel::subprocess::{MockProcessRunner, SubprocessManager};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

pub const UI_PAGE: &str = "<!doctype html><title>panel</title>\n";

/// Builder for a panel server listening on an ephemeral loopback port
pub struct TestServerBuilder {
    temp_dir: TempDir,
    secret: Option<String>,
    env_content: Option<String>,
    exclusive_reload: bool,
    reload_script: Option<String>,
    processes: Option<SubprocessManager>,
}

impl TestServerBuilder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
            secret: None,
            env_content: None,
            exclusive_reload: true,
            reload_script: None,
            processes: None,
        })
    }

    /// Configure a shared secret, both in the env file and the running config
    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    /// Initial env file content (the file is absent otherwise)
    pub fn with_env(mut self, content: &str) -> Self {
        self.env_content = Some(content.to_string());
        self
    }

    pub fn with_exclusive_reload(mut self, exclusive: bool) -> Self {
        self.exclusive_reload = exclusive;
        self
    }

    pub fn with_reload_script(mut self, script: impl Into<String>) -> Self {
        self.reload_script = Some(script.into());
        self
    }

    /// Run real processes instead of the mock
    pub fn with_real_processes(mut self) -> Self {
        self.processes = Some(SubprocessManager::production());
        self
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub async fn build(self) -> Result<TestServer> {
        let env_path = self.temp_dir.path().join(".env");
        let ui_path = self.temp_dir.path().join("ui.html");
        std::fs::write(&ui_path, UI_PAGE)?;

        let mut env_content = self.env_content.unwrap_or_default();
        if let Some(secret) = &self.secret {
            env_content.push_str(&format!("MIHOMO_SECRET={secret}\n"));
        }
        if !env_content.is_empty() {
            std::fs::write(&env_path, &env_content)?;
        }

        let mut config = AppConfig::default()
            .with_env_path(&env_path)
            .with_ui_path(&ui_path)
            .with_exclusive_reload(self.exclusive_reload);
        if let Some(secret) = self.secret {
            config = config.with_secret(secret);
        }
        if let Some(script) = self.reload_script {
            config = config.with_reload_script(script);
        }

        let (processes, mock) = match self.processes {
            Some(processes) => (processes, MockProcessRunner::new()),
            None => SubprocessManager::mock(),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = AppState::new(config, processes);
        tokio::spawn(server::serve(listener, state.clone()));

        Ok(TestServer {
            addr,
            state,
            mock,
            env_path,
            client: reqwest::Client::new(),
            _temp_dir: self.temp_dir,
        })
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    /// Scripted runner the server uses unless built with real processes
    pub mock: MockProcessRunner,
    pub env_path: PathBuf,
    pub client: reqwest::Client,
    _temp_dir: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn env_file_content(&self) -> Option<String> {
        std::fs::read_to_string(&self.env_path).ok()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.state.shut_down();
    }
}

/// Write an executable reload script that records its pid in `pid_file` first
pub fn write_pid_script(dir: &Path, pid_file: &Path, body: &str) -> Result<PathBuf> {
    let script = dir.join("auto_task.sh");
    std::fs::write(
        &script,
        format!("#!/bin/sh\necho $$ > '{}'\n{body}\n", pid_file.display()),
    )?;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
    Ok(script)
}

pub fn read_pid(pid_file: &Path) -> Result<i32> {
    Ok(std::fs::read_to_string(pid_file)?.trim().parse()?)
}

/// Poll until `pid` no longer exists; false if it is still alive at the deadline
pub async fn wait_until_gone(pid: i32, timeout: Duration) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let deadline = Instant::now() + timeout;
    loop {
        if kill(Pid::from_raw(pid), None) == Err(Errno::ESRCH) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Poll until no reload holds the slot
pub async fn wait_until_slot_free(state: &AppState, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while state.reload_slot.is_busy() {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    true
}
