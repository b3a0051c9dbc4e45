// Interactive terminal front end: readiness gate, intent prompt, review and
// confirmation, results, and summaries as they arrive.
use crate::backend::StartOutcome;
use crate::commands;
use crate::execution::{ExecutedCommand, Proposed};
use crate::feedback::SummaryEvent;
use crate::state::AppState;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use winregi_types::{AiProvider, UserSettings};

type InputLines = Lines<BufReader<Stdin>>;

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Help,
    Quit,
    Elevate,
    Status,
    Logs,
    Settings,
    Provider(AiProvider),
    ApiKey(String),
    Open(String),
    /// `!<command>`: run literal text through the same gate.
    Literal(String),
    Intent(String),
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if let Some(literal) = line.strip_prefix('!') {
        return Input::Literal(literal.trim().to_string());
    }
    let Some(host_command) = line.strip_prefix(':') else {
        return Input::Intent(line.to_string());
    };
    let (name, arg) = host_command
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((host_command, ""));
    match (name.to_ascii_lowercase().as_str(), arg) {
        ("help" | "h", _) => Input::Help,
        ("quit" | "exit" | "q", _) => Input::Quit,
        ("elevate", _) => Input::Elevate,
        ("status", _) => Input::Status,
        ("logs", _) => Input::Logs,
        ("settings", _) => Input::Settings,
        ("provider", arg) => match arg.parse::<AiProvider>() {
            Ok(provider) => Input::Provider(provider),
            Err(e) => Input::Unknown(e),
        },
        ("key", arg) => Input::ApiKey(arg.to_string()),
        ("open", arg) if !arg.is_empty() => Input::Open(arg.to_string()),
        _ => Input::Unknown(format!("unknown command ':{name}' (try :help)")),
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn prompt(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

async fn read_answer(lines: &mut InputLines, question: &str) -> anyhow::Result<bool> {
    prompt(&format!("{question} [y/N] "));
    Ok(lines.next_line().await?.is_some_and(|a| is_yes(&a)))
}

/// One-off confirmation outside the interactive loop.
pub async fn ask_yes_no(question: &str) -> anyhow::Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    read_answer(&mut lines, question).await
}

pub fn print_settings(settings: &UserSettings) {
    println!("theme:     {}", settings.theme);
    println!("provider:  {}", settings.ai_provider.as_str());
    println!(
        "api key:   {}",
        if settings.api_key.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    if settings.favorites.is_empty() {
        println!("favorites: none");
    } else {
        println!("favorites:");
        for favorite in &settings.favorites {
            println!("  - {favorite}");
        }
    }
}

const HELP: &str = "\
Type what you want the computer to do, e.g. \"show my IP address\".
  !<command>          review and run a literal command
  :settings           show settings
  :provider <local|cloud>
  :key <api key>      set the cloud provider key (empty clears it)
  :open <url>         open a link in the browser
  :status             worker status and recent worker output
  :logs               list log files
  :elevate            restart with administrator rights
  :quit";

pub async fn run_interactive(
    state: AppState,
    mut summaries: mpsc::UnboundedReceiver<SummaryEvent>,
) -> anyhow::Result<()> {
    println!("System Initializing...");
    let report = match commands::startup(&state).await {
        Ok(report) => report,
        Err(e) => {
            commands::shutdown(&state).await;
            return Err(e.into());
        }
    };
    if let StartOutcome::ExecutableMissing { path } = &report.launch {
        eprintln!("Worker executable not found: {path}");
    }
    if !report.ready {
        commands::shutdown(&state).await;
        anyhow::bail!(
            "Backend unavailable: the worker at {} did not answer after {} attempts",
            state.config.worker_base_url(),
            state.config.readiness_attempts
        );
    }

    let elevated = commands::currently_elevated(&state);
    println!(
        "WinRegi ready{}. Type :help for commands.",
        if elevated { " [ADMIN]" } else { "" }
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = summaries.recv().await {
            match event {
                SummaryEvent::Ready { request_id, summary } => {
                    println!("\n[{}] {}", short_id(&request_id), summary.trim());
                }
                SummaryEvent::Unavailable { request_id, reason } => {
                    println!("\n[{}] Summary unavailable: {}", short_id(&request_id), reason);
                }
            }
            prompt("> ");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let outcome = repl(&state, &mut lines).await;

    printer.abort();
    commands::shutdown(&state).await;
    outcome
}

async fn repl(state: &AppState, lines: &mut InputLines) -> anyhow::Result<()> {
    loop {
        prompt("> ");
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Help => println!("{HELP}"),
            Input::Quit => return Ok(()),
            Input::Unknown(message) => eprintln!("{message}"),
            Input::Intent(intent) => match commands::resolve_intent(state, &intent).await {
                Ok(proposed) => review_and_run(state, proposed, lines).await?,
                Err(e) => {
                    eprintln!("{e}");
                    if e.is_system_unusable() {
                        eprintln!("The worker is not reachable; check :status.");
                    }
                }
            },
            Input::Literal(text) => match commands::propose_command(&text) {
                Ok(proposed) => review_and_run(state, proposed, lines).await?,
                Err(e) => eprintln!("{e}"),
            },
            Input::Open(url) => match commands::open_external_link(&url) {
                Ok(()) => println!("Opening browser."),
                Err(e) => eprintln!("{e}"),
            },
            Input::Settings => print_settings(&commands::get_settings(state).await),
            Input::Provider(provider) => {
                let mut settings = commands::get_settings(state).await;
                settings.ai_provider = provider;
                save(state, &settings).await;
            }
            Input::ApiKey(key) => {
                let mut settings = commands::get_settings(state).await;
                settings.api_key = Some(key).filter(|k| !k.is_empty());
                save(state, &settings).await;
            }
            Input::Status => {
                let snapshot = commands::worker_status(state).await;
                println!(
                    "worker: {} (profile {}, pid {})",
                    snapshot.state,
                    snapshot.profile,
                    snapshot
                        .pid
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
                for line in state.supervisor.worker_logs_snapshot(10) {
                    println!("  {line}");
                }
            }
            Input::Logs => match commands::list_log_files(state) {
                Ok(files) => {
                    for file in files {
                        println!("  {:<40} {:>10} bytes", file.name, file.size);
                    }
                }
                Err(e) => eprintln!("{e}"),
            },
            Input::Elevate => {
                if commands::currently_elevated(state) {
                    println!("Already running with administrator rights.");
                    continue;
                }
                match commands::relaunch_elevated(state).await {
                    Ok(initiated) => initiated.terminate(),
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }
}

async fn save(state: &AppState, settings: &UserSettings) {
    match commands::save_settings(state, settings).await {
        Ok(()) => println!("Settings saved."),
        Err(e) => eprintln!("{e}"),
    }
}

async fn review_and_run(
    state: &AppState,
    proposed: Proposed,
    lines: &mut InputLines,
) -> anyhow::Result<()> {
    let notice = proposed.notice(commands::currently_elevated(state));
    println!("{}", notice.render());
    if !read_answer(lines, "Run this command?").await? {
        proposed.reject();
        println!("Cancelled.");
        return Ok(());
    }
    let executed = commands::execute_command(state, proposed.confirm()).await;
    print_result(&executed);
    Ok(())
}

fn print_result(executed: &ExecutedCommand) {
    let status = if executed.result.succeeded {
        "Succeeded"
    } else {
        "Failed"
    };
    println!("{} in {} ms", status, executed.result.duration_ms);
    if !executed.result.stdout_combined.is_empty() {
        println!("{}", executed.result.stdout_combined);
    }
    println!("[{}] Explaining output...", short_id(&executed.request_id));
}

fn short_id(request_id: &str) -> &str {
    request_id.get(..8).unwrap_or(request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_an_intent() {
        assert_eq!(
            parse_input("  show my ip address "),
            Input::Intent("show my ip address".into())
        );
        assert_eq!(parse_input("open notepad"), Input::Intent("open notepad".into()));
    }

    #[test]
    fn host_commands_are_prefixed() {
        assert_eq!(parse_input(":quit"), Input::Quit);
        assert_eq!(parse_input(":provider cloud"), Input::Provider(AiProvider::Cloud));
        assert_eq!(parse_input(":key  abc "), Input::ApiKey("abc".into()));
        assert_eq!(parse_input(":key"), Input::ApiKey(String::new()));
        assert_eq!(
            parse_input(":open https://example.com"),
            Input::Open("https://example.com".into())
        );
        assert!(matches!(parse_input(":open"), Input::Unknown(_)));
        assert!(matches!(parse_input(":provider mars"), Input::Unknown(_)));
    }

    #[test]
    fn bang_runs_literal_text() {
        assert_eq!(parse_input("!Get-Date"), Input::Literal("Get-Date".into()));
    }

    #[test]
    fn only_explicit_yes_confirms() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES\n"));
        assert!(!is_yes(""));
        assert!(!is_yes("n"));
        assert!(!is_yes("sure"));
    }
}
