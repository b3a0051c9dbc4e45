// WinRegi Privilege Elevation
// Elevation can be checked but never granted in-process: the only way up is
// a fresh instance started through the platform's elevation prompt.
use crate::error::{HostError, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use winregi_observability::{emit_event, ObservabilityEvent, ProcessKind};

/// Answers whether the current process holds administrative privileges.
pub trait PrivilegeQuery: Send + Sync {
    fn is_elevated(&self) -> std::io::Result<bool>;
}

/// Asks the operating system directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsPrivilegeQuery;

#[cfg(unix)]
impl PrivilegeQuery for OsPrivilegeQuery {
    fn is_elevated(&self) -> std::io::Result<bool> {
        Ok(nix::unistd::geteuid().is_root())
    }
}

#[cfg(windows)]
impl PrivilegeQuery for OsPrivilegeQuery {
    fn is_elevated(&self) -> std::io::Result<bool> {
        use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
        use windows_sys::Win32::Security::{
            GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
        };
        use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

        unsafe {
            let mut token: HANDLE = std::ptr::null_mut();
            if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
                return Err(std::io::Error::last_os_error());
            }
            let mut elevation: TOKEN_ELEVATION = std::mem::zeroed();
            let mut returned = 0u32;
            let ok = GetTokenInformation(
                token,
                TokenElevation,
                &mut elevation as *mut _ as *mut _,
                std::mem::size_of::<TOKEN_ELEVATION>() as u32,
                &mut returned,
            );
            let query_err = (ok == 0).then(std::io::Error::last_os_error);
            let _ = CloseHandle(token);
            match query_err {
                Some(e) => Err(e),
                None => Ok(elevation.TokenIsElevated != 0),
            }
        }
    }
}

/// Proof that an elevated instance is on its way. The only thing left to do
/// with it is to end the current process.
#[must_use = "the current instance must terminate once the elevated one is launched"]
#[derive(Debug)]
pub struct RelaunchInitiated {
    pub launcher: String,
    /// Set on Unix, where the launcher replaces this process so the elevated
    /// instance inherits the terminal.
    handoff: Option<Command>,
}

impl RelaunchInitiated {
    pub fn terminate(self) -> ! {
        match self.handoff {
            Some(cmd) => hand_off(cmd, &self.launcher),
            None => {
                tracing::info!(
                    "Exiting so the elevated instance ({}) can take over",
                    self.launcher
                );
                std::process::exit(0)
            }
        }
    }
}

#[cfg(unix)]
fn hand_off(mut cmd: Command, launcher: &str) -> ! {
    use std::os::unix::process::CommandExt;
    tracing::info!("Handing the terminal to the elevated instance ({})", launcher);
    // Only returns on failure.
    let err = cmd.exec();
    tracing::error!("Failed to exec {}: {}", launcher, err);
    eprintln!("Elevation failed: could not start {launcher}: {err}");
    std::process::exit(1)
}

#[cfg(not(unix))]
fn hand_off(mut cmd: Command, launcher: &str) -> ! {
    if let Err(e) = cmd.spawn() {
        tracing::error!("Failed to start {}: {}", launcher, e);
        std::process::exit(1)
    }
    std::process::exit(0)
}

pub struct ElevationManager {
    query: Arc<dyn PrivilegeQuery>,
}

impl ElevationManager {
    pub fn new(query: Arc<dyn PrivilegeQuery>) -> Self {
        Self { query }
    }

    pub fn os() -> Self {
        Self::new(Arc::new(OsPrivilegeQuery))
    }

    /// Fresh OS query on every call. A failed query reads as "not elevated".
    pub fn currently_elevated(&self) -> bool {
        match self.query.is_elevated() {
            Ok(elevated) => elevated,
            Err(e) => {
                tracing::warn!("Privilege query failed, assuming not elevated: {}", e);
                false
            }
        }
    }

    /// Starts a new elevated instance of `exe` with `args`.
    ///
    /// On Windows the RunAs launcher is spawned and opens its own console. On
    /// Unix the launcher must be on `PATH`; it is exec'd by
    /// [`RelaunchInitiated::terminate`] so the password prompt and the new
    /// session stay on the operator's terminal. Either way the caller stops
    /// the worker before terminating.
    pub fn relaunch_elevated(&self, exe: &Path, args: &[String]) -> Result<RelaunchInitiated> {
        self.launch(relaunch_command(exe, args))
    }

    fn launch(&self, mut cmd: Command) -> Result<RelaunchInitiated> {
        let launcher = cmd.get_program().to_string_lossy().to_string();
        let prepared = if cfg!(unix) {
            locate_launcher(cmd.get_program()).map(|_| Some(cmd))
        } else {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            cmd.spawn().map(|_| None)
        };

        match prepared {
            Ok(handoff) => {
                emit_event(
                    tracing::Level::INFO,
                    ProcessKind::Host,
                    ObservabilityEvent {
                        event: "elevation.relaunch",
                        component: "elevation",
                        status: Some("initiated"),
                        detail: Some(&launcher),
                        ..Default::default()
                    },
                );
                Ok(RelaunchInitiated { launcher, handoff })
            }
            Err(e) => {
                emit_event(
                    tracing::Level::ERROR,
                    ProcessKind::Host,
                    ObservabilityEvent {
                        event: "elevation.relaunch",
                        component: "elevation",
                        status: Some("failed"),
                        error_code: Some("ELEVATION_LAUNCH_FAILED"),
                        detail: Some(&e.to_string()),
                        ..Default::default()
                    },
                );
                Err(HostError::Elevation(format!(
                    "Failed to start elevated instance via {launcher}: {e}"
                )))
            }
        }
    }
}

/// Resolves `program` the way `exec` will, so a missing launcher is reported
/// before the worker is stopped.
fn locate_launcher(program: &OsStr) -> std::io::Result<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return if direct.is_file() {
            Ok(direct.to_path_buf())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", direct.display()),
            ))
        };
    }
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found on PATH", direct.display()),
            )
        })
}

/// The platform command that starts `exe` behind an elevation prompt.
#[cfg(windows)]
pub fn relaunch_command(exe: &Path, args: &[String]) -> Command {
    let mut script = format!(
        "Start-Process -FilePath {} -Verb RunAs",
        powershell_quote(&exe.to_string_lossy())
    );
    if !args.is_empty() {
        let list: Vec<String> = args.iter().map(|a| powershell_quote(a)).collect();
        script.push_str(&format!(" -ArgumentList {}", list.join(",")));
    }
    let mut cmd = Command::new("powershell");
    cmd.args(["-NoProfile", "-Command", &script]);
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

// `sudo` prompts on the terminal the host is running in.
#[cfg(target_os = "macos")]
pub fn relaunch_command(exe: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new("sudo");
    cmd.arg(exe).args(args);
    cmd
}

#[cfg(all(unix, not(target_os = "macos")))]
pub fn relaunch_command(exe: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new("pkexec");
    cmd.arg(exe).args(args);
    cmd
}

#[cfg_attr(not(windows), allow(dead_code))]
fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
