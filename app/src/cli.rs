// Command-line entry point.
use crate::config::{resolve_app_paths, HostConfig, RunMode};
use crate::elevation::ElevationManager;
use crate::execution::ExecutionController;
use crate::state::AppState;
use crate::{commands, terminal};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use winregi_observability::{emit_event, init_process_logging, ObservabilityEvent, ProcessKind};
use winregi_types::AiProvider;

#[derive(Parser, Debug)]
#[command(name = "winregi")]
#[command(about = "Describe what you want your computer to do; review and run the command")]
struct Cli {
    #[command(flatten)]
    worker: WorkerArgs,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Default)]
struct WorkerArgs {
    #[arg(long, global = true, env = "WINREGI_WORKER_HOST")]
    worker_host: Option<String>,
    #[arg(long, global = true, env = "WINREGI_WORKER_PORT")]
    worker_port: Option<u16>,
    /// development | packaged (aliases: dev, production, prod).
    #[arg(long, global = true, env = "WINREGI_RUN_MODE", value_parser = parse_run_mode)]
    run_mode: Option<RunMode>,
    /// Directory launch profiles resolve from (defaults to the executable's).
    #[arg(long, global = true, env = "WINREGI_APP_DIR")]
    app_dir: Option<PathBuf>,
    #[arg(long, global = true, env = "WINREGI_WORKER_DIR")]
    worker_dir: Option<PathBuf>,
    #[arg(long, global = true, env = "WINREGI_READINESS_ATTEMPTS")]
    readiness_attempts: Option<u32>,
}

// Same aliases as the WINREGI_RUN_MODE override in `HostConfig`.
fn parse_run_mode(value: &str) -> crate::error::Result<RunMode> {
    value.parse()
}

impl WorkerArgs {
    fn apply(self, mut config: HostConfig) -> HostConfig {
        if let Some(host) = self.worker_host {
            config.worker_host = host;
        }
        if let Some(port) = self.worker_port {
            config.worker_port = port;
        }
        if let Some(mode) = self.run_mode {
            config.run_mode = mode;
        }
        if let Some(dir) = self.app_dir {
            config.app_dir = dir;
        }
        if let Some(dir) = self.worker_dir {
            config.worker_dir = Some(dir);
        }
        if let Some(attempts) = self.readiness_attempts {
            config.readiness_attempts = attempts;
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the worker and open the interactive prompt (default).
    Run,
    /// Review and run a literal shell command without the worker.
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Confirm up front instead of being asked.
        #[arg(long, short)]
        yes: bool,
    },
    /// Report whether this process has administrative privileges.
    Elevated,
    /// Restart WinRegi through the platform elevation prompt.
    RelaunchElevated,
    /// Open an http(s) link in the default browser.
    Open { url: String },
    /// Show or change the worker's stored settings.
    Settings {
        #[arg(long)]
        provider: Option<AiProvider>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        theme: Option<String>,
        #[arg(long)]
        favorite: Vec<String>,
        #[arg(long)]
        unfavorite: Vec<String>,
    },
    /// List this host's log files.
    Logs,
}

fn init_logging(process: ProcessKind, logs_dir: &Path, retention_days: u64) -> Option<WorkerGuard> {
    match init_process_logging(process, logs_dir, retention_days) {
        Ok((guard, info)) => {
            emit_event(
                tracing::Level::INFO,
                process,
                ObservabilityEvent {
                    event: "logging.initialized",
                    component: "cli",
                    status: Some("ok"),
                    detail: Some(&info.logs_dir),
                    ..Default::default()
                },
            );
            Some(guard)
        }
        Err(e) => {
            // Console-only logging so startup can proceed on a read-only data dir.
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "info".into()),
                )
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .ok();
            tracing::warn!("File logging unavailable ({}), logging to console only", e);
            None
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli
        .worker
        .apply(HostConfig::from_env().context("invalid WINREGI_* environment")?);
    let paths = resolve_app_paths().context("failed to resolve application data directory")?;
    let command = cli.command.unwrap_or(Command::Run);

    let process = match command {
        Command::Run | Command::Settings { .. } => ProcessKind::Host,
        _ => ProcessKind::Cli,
    };
    let _log_guard = init_logging(process, &paths.logs_dir, config.log_retention_days);
    tracing::debug!("Host configuration: {:?}", config);

    match command {
        Command::Run => {
            let (state, summaries) =
                AppState::new(config, &paths).context("failed to initialize host")?;
            terminal::run_interactive(state, summaries).await
        }
        Command::Exec { command, yes } => {
            let proposed = commands::propose_command(&command.join(" "))?;
            let elevated = ElevationManager::os().currently_elevated();
            println!("{}", proposed.notice(elevated).render());
            let confirmed = if yes || terminal::ask_yes_no("Run this command?").await? {
                proposed.confirm()
            } else {
                proposed.reject();
                println!("Cancelled.");
                return Ok(());
            };
            let executed = ExecutionController::new().execute(confirmed).await;
            println!("{}", executed.result.stdout_combined);
            if !executed.result.succeeded {
                anyhow::bail!(
                    "command failed (exit code {})",
                    executed
                        .result
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "none".to_string())
                );
            }
            Ok(())
        }
        Command::Elevated => {
            let elevated = ElevationManager::os().currently_elevated();
            println!("{}", if elevated { "elevated" } else { "not elevated" });
            Ok(())
        }
        Command::RelaunchElevated => {
            let exe = std::env::current_exe().context("cannot locate current executable")?;
            let args = config.relaunch_args(std::env::args().skip(1));
            let initiated = ElevationManager::os().relaunch_elevated(&exe, &args)?;
            initiated.terminate()
        }
        Command::Open { url } => {
            commands::open_external_link(&url)?;
            Ok(())
        }
        Command::Settings {
            provider,
            api_key,
            theme,
            favorite,
            unfavorite,
        } => {
            let (state, _summaries) =
                AppState::new(config, &paths).context("failed to initialize host")?;
            let result = edit_settings(&state, provider, api_key, theme, favorite, unfavorite).await;
            commands::shutdown(&state).await;
            result
        }
        Command::Logs => {
            let files = crate::logs::list_log_files(&paths.logs_dir)?;
            println!("{}", paths.logs_dir.display());
            for file in files {
                println!("  {:<40} {:>10} bytes", file.name, file.size);
            }
            Ok(())
        }
    }
}

async fn edit_settings(
    state: &AppState,
    provider: Option<AiProvider>,
    api_key: Option<String>,
    theme: Option<String>,
    favorite: Vec<String>,
    unfavorite: Vec<String>,
) -> anyhow::Result<()> {
    let report = commands::startup(state).await?;
    if !report.ready {
        anyhow::bail!("Backend unavailable: the worker did not become ready");
    }

    let mut settings = commands::get_settings(state).await;
    let changed = provider.is_some()
        || api_key.is_some()
        || theme.is_some()
        || !favorite.is_empty()
        || !unfavorite.is_empty();
    if let Some(provider) = provider {
        settings.ai_provider = provider;
    }
    if let Some(key) = api_key {
        settings.api_key = Some(key).filter(|k| !k.trim().is_empty());
    }
    if let Some(theme) = theme {
        settings.theme = theme;
    }
    settings.favorites.extend(favorite);
    for item in &unfavorite {
        settings.favorites.remove(item);
    }
    if changed {
        commands::save_settings(state, &settings).await?;
    }
    terminal::print_settings(&settings);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "winregi",
            "--worker-port",
            "5050",
            "--run-mode",
            "packaged",
            "exec",
            "--yes",
            "echo",
            "hi",
        ])
        .unwrap();
        let config = cli.worker.apply(HostConfig::default());
        assert_eq!(config.worker_port, 5050);
        assert_eq!(config.run_mode, RunMode::Packaged);
        match cli.command {
            Some(Command::Exec { command, yes }) => {
                assert!(yes);
                assert_eq!(command, vec!["echo", "hi"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_mode_flag_accepts_aliases() {
        let cli = Cli::try_parse_from(["winregi", "--run-mode", " dev "]).unwrap();
        assert_eq!(cli.worker.run_mode, Some(RunMode::Development));
        let cli = Cli::try_parse_from(["winregi", "--run-mode", "prod", "run"]).unwrap();
        assert_eq!(cli.worker.run_mode, Some(RunMode::Packaged));
        assert!(Cli::try_parse_from(["winregi", "--run-mode", "staging"]).is_err());
    }

    #[test]
    fn relaunch_args_parse_back_to_same_config() {
        let original = Cli::try_parse_from([
            "winregi",
            "--worker-port",
            "5050",
            "--worker-dir",
            "/srv/worker",
            "relaunch-elevated",
        ])
        .unwrap();
        let config = original.worker.apply(HostConfig::default());

        let mut argv = vec!["winregi".to_string()];
        argv.extend(config.relaunch_args(
            ["--worker-port", "5050", "--worker-dir", "/srv/worker", "relaunch-elevated"]
                .map(String::from),
        ));
        let relaunched = Cli::try_parse_from(argv).unwrap();
        assert!(matches!(relaunched.command, Some(Command::Run)));
        let again = relaunched.worker.apply(HostConfig::default());
        assert_eq!(again.worker_port, 5050);
        assert_eq!(again.worker_dir, Some(PathBuf::from("/srv/worker")));
        assert_eq!(again.run_mode, config.run_mode);
        assert_eq!(again.app_dir, config.app_dir);
    }

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["winregi"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn settings_accepts_provider_aliases() {
        let cli = Cli::try_parse_from(["winregi", "settings", "--provider", "cloud"]).unwrap();
        match cli.command {
            Some(Command::Settings { provider, .. }) => {
                assert_eq!(provider, Some(AiProvider::Cloud))
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
