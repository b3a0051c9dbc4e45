// WinRegi host configuration: built-in defaults, then environment, then CLI flags.
use crate::error::{HostError, Result};
use crate::retry::RetryPolicy;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_WORKER_HOST: &str = "127.0.0.1";
pub const DEFAULT_WORKER_PORT: u16 = 5000;
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 30;
pub const DEFAULT_LOG_RETENTION_DAYS: u64 = 14;

/// Flags that carry worker configuration on the command line. The relaunched
/// instance gets them rebuilt from the resolved config.
const WORKER_FLAGS: [&str; 6] = [
    "--worker-host",
    "--worker-port",
    "--run-mode",
    "--app-dir",
    "--worker-dir",
    "--readiness-attempts",
];

/// Which launch profile the supervisor uses for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Interpreter + script from the worker's source checkout.
    Development,
    /// Self-contained worker executable shipped beside the host.
    Packaged,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Development => "development",
            RunMode::Packaged => "packaged",
        }
    }

    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            RunMode::Development
        } else {
            RunMode::Packaged
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RunMode::Development),
            "packaged" | "production" | "prod" => Ok(RunMode::Packaged),
            other => Err(HostError::InvalidConfig(format!(
                "unknown run mode '{other}' (expected development or packaged)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub worker_host: String,
    pub worker_port: u16,
    pub run_mode: RunMode,
    /// Directory the host binary lives in; launch profiles resolve from here.
    pub app_dir: PathBuf,
    /// Overrides the development profile's `<app_dir>/../backend`.
    pub worker_dir: Option<PathBuf>,
    pub readiness_attempts: u32,
    pub readiness_interval: Duration,
    pub probe_timeout: Duration,
    /// Intent resolution and summaries can sit behind a slow model.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub log_retention_days: u64,
    pub log_buffer_lines: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        let app_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            worker_host: DEFAULT_WORKER_HOST.to_string(),
            worker_port: DEFAULT_WORKER_PORT,
            run_mode: RunMode::for_build(),
            app_dir,
            worker_dir: None,
            readiness_attempts: DEFAULT_READINESS_ATTEMPTS,
            readiness_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            log_retention_days: DEFAULT_LOG_RETENTION_DAYS,
            log_buffer_lines: 2000,
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(host) = get("WINREGI_WORKER_HOST") {
            self.worker_host = host;
        }
        if let Some(port) = get("WINREGI_WORKER_PORT") {
            self.worker_port = port.parse::<u16>().map_err(|e| {
                HostError::InvalidConfig(format!("WINREGI_WORKER_PORT='{port}': {e}"))
            })?;
        }
        if let Some(mode) = get("WINREGI_RUN_MODE") {
            self.run_mode = mode.parse()?;
        }
        if let Some(dir) = get("WINREGI_APP_DIR") {
            self.app_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("WINREGI_WORKER_DIR") {
            self.worker_dir = Some(PathBuf::from(dir));
        }
        if let Some(attempts) = get("WINREGI_READINESS_ATTEMPTS") {
            self.readiness_attempts = attempts.parse::<u32>().map_err(|e| {
                HostError::InvalidConfig(format!("WINREGI_READINESS_ATTEMPTS='{attempts}': {e}"))
            })?;
        }
        Ok(self)
    }

    pub fn worker_base_url(&self) -> String {
        format!("http://{}:{}", self.worker_host, self.worker_port)
    }

    /// Arguments for an elevated instance of this process.
    ///
    /// `argv` is the current argument list without the program name. Worker
    /// flags in it are replaced by the resolved values, since elevation
    /// launchers do not pass the environment through. The relaunch subcommand
    /// itself becomes `run`.
    pub fn relaunch_args<I>(&self, argv: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut forwarded = Vec::new();
        let mut argv = argv.into_iter();
        while let Some(arg) = argv.next() {
            if WORKER_FLAGS.contains(&arg.as_str()) {
                argv.next();
                continue;
            }
            let inline_value = WORKER_FLAGS
                .iter()
                .any(|flag| arg.strip_prefix(flag).is_some_and(|rest| rest.starts_with('=')));
            if inline_value || arg == "relaunch-elevated" {
                continue;
            }
            forwarded.push(arg);
        }
        if forwarded.is_empty() {
            forwarded.push("run".to_string());
        }

        let mut args = vec![
            "--worker-host".to_string(),
            self.worker_host.clone(),
            "--worker-port".to_string(),
            self.worker_port.to_string(),
            "--run-mode".to_string(),
            self.run_mode.as_str().to_string(),
            "--app-dir".to_string(),
            self.app_dir.to_string_lossy().to_string(),
            "--readiness-attempts".to_string(),
            self.readiness_attempts.to_string(),
        ];
        if let Some(dir) = &self.worker_dir {
            args.push("--worker-dir".to_string());
            args.push(dir.to_string_lossy().to_string());
        }
        args.extend(forwarded);
        args
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppPaths {
    pub root: PathBuf,
    pub logs_dir: PathBuf,
}

pub fn resolve_app_paths() -> Result<AppPaths> {
    let base = dirs::data_dir()
        .ok_or_else(|| HostError::InvalidConfig("Failed to resolve data dir".to_string()))?;
    let root = base.join("winregi");
    Ok(AppPaths {
        logs_dir: winregi_observability::canonical_logs_dir_from_root(&root),
        root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_target_local_worker() {
        let config = HostConfig::default();
        assert_eq!(config.worker_base_url(), "http://127.0.0.1:5000");
        assert_eq!(config.readiness_attempts, 30);
        assert_eq!(config.readiness_interval, Duration::from_secs(1));
    }

    #[test]
    fn env_overrides_apply() {
        let config = HostConfig::default()
            .with_env_overrides(lookup(&[
                ("WINREGI_WORKER_PORT", "5123"),
                ("WINREGI_RUN_MODE", "packaged"),
                ("WINREGI_APP_DIR", "/opt/winregi"),
                ("WINREGI_READINESS_ATTEMPTS", " 5 "),
            ]))
            .unwrap();
        assert_eq!(config.worker_port, 5123);
        assert_eq!(config.run_mode, RunMode::Packaged);
        assert_eq!(config.app_dir, PathBuf::from("/opt/winregi"));
        assert_eq!(config.readiness_attempts, 5);
    }

    #[test]
    fn invalid_port_is_config_error() {
        let err = HostConfig::default()
            .with_env_overrides(lookup(&[("WINREGI_WORKER_PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, HostError::InvalidConfig(_)));
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = HostConfig::default()
            .with_env_overrides(lookup(&[("WINREGI_WORKER_HOST", "  ")]))
            .unwrap();
        assert_eq!(config.worker_host, DEFAULT_WORKER_HOST);
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn relaunch_keeps_worker_configuration() {
        let config = HostConfig {
            worker_port: 5050,
            run_mode: RunMode::Packaged,
            app_dir: PathBuf::from("/opt/winregi"),
            worker_dir: Some(PathBuf::from("/srv/worker")),
            ..HostConfig::default()
        };
        let args = config.relaunch_args(strings(&["--worker-port", "5050", "--run-mode=dev"]));
        assert_eq!(
            args,
            strings(&[
                "--worker-host",
                "127.0.0.1",
                "--worker-port",
                "5050",
                "--run-mode",
                "packaged",
                "--app-dir",
                "/opt/winregi",
                "--readiness-attempts",
                "30",
                "--worker-dir",
                "/srv/worker",
                "run",
            ])
        );
    }

    #[test]
    fn relaunch_carries_env_only_overrides() {
        // Resolved from WINREGI_WORKER_PORT; nothing on the command line.
        let config = HostConfig::default()
            .with_env_overrides(lookup(&[("WINREGI_WORKER_PORT", "5123")]))
            .unwrap();
        let args = config.relaunch_args(Vec::new());
        let port = args.iter().position(|a| a == "--worker-port").unwrap();
        assert_eq!(args[port + 1], "5123");
        assert_eq!(args.last().map(String::as_str), Some("run"));
    }

    #[test]
    fn relaunch_subcommand_becomes_run() {
        let config = HostConfig::default();
        let args = config.relaunch_args(strings(&["--worker-host", "10.0.0.2", "relaunch-elevated"]));
        assert_eq!(args.iter().filter(|a| *a == "--worker-host").count(), 1);
        assert!(!args.iter().any(|a| a == "relaunch-elevated"));
        assert_eq!(args.last().map(String::as_str), Some("run"));
        let run = strings(&["run"]);
        assert_eq!(config.relaunch_args(run).last().map(String::as_str), Some("run"));
    }

    #[test]
    fn run_mode_parses_aliases() {
        assert_eq!("dev".parse::<RunMode>().unwrap(), RunMode::Development);
        assert_eq!("Production".parse::<RunMode>().unwrap(), RunMode::Packaged);
        assert!("staging".parse::<RunMode>().is_err());
    }
}
