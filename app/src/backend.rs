// WinRegi Backend Supervisor
// Owns the reasoning worker process: launch profile selection, single
// instance spawn, output draining, exit observation and shutdown.
use crate::config::{HostConfig, RunMode};
use crate::error::{HostError, Result};
use crate::logs::{OutputStream, WorkerLine, WorkerOutputBuffer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use winregi_observability::{emit_event, ObservabilityEvent, ProcessKind};
use winregi_types::BackendProcessState;

#[cfg(windows)]
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
#[cfg(windows)]
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
    SetInformationJobObject, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
};
#[cfg(windows)]
use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_SET_QUOTA, PROCESS_TERMINATE};

#[cfg(windows)]
// Integer so the supervisor stays Send + Sync.
struct WindowsJobHandle(isize);

#[cfg(windows)]
impl WindowsJobHandle {
    fn as_handle(&self) -> HANDLE {
        self.0 as HANDLE
    }
}

#[cfg(windows)]
impl Drop for WindowsJobHandle {
    fn drop(&mut self) {
        unsafe {
            if self.0 != 0 {
                // KILL_ON_JOB_CLOSE: closing the last handle terminates the worker.
                let _ = CloseHandle(self.as_handle());
            }
        }
    }
}

#[cfg(windows)]
fn windows_create_kill_on_close_job() -> std::io::Result<WindowsJobHandle> {
    unsafe {
        let job = CreateJobObjectW(std::ptr::null_mut(), std::ptr::null());
        if job.is_null() {
            return Err(std::io::Error::last_os_error());
        }

        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;

        let ok = SetInformationJobObject(
            job,
            JobObjectExtendedLimitInformation,
            &mut info as *mut _ as *mut _,
            std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
        );
        if ok == 0 {
            let e = std::io::Error::last_os_error();
            let _ = CloseHandle(job);
            return Err(e);
        }

        Ok(WindowsJobHandle(job as isize))
    }
}

#[cfg(windows)]
fn windows_assign_pid_to_job(job: HANDLE, pid: u32) -> std::io::Result<()> {
    unsafe {
        let process = OpenProcess(PROCESS_SET_QUOTA | PROCESS_TERMINATE, 0, pid);
        if process.is_null() {
            return Err(std::io::Error::last_os_error());
        }
        let ok = AssignProcessToJobObject(job, process);
        let assign_err = (ok == 0).then(std::io::Error::last_os_error);
        let _ = CloseHandle(process);
        match assign_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(windows)]
const PACKAGED_WORKER_NAME: &str = "api.exe";
#[cfg(not(windows))]
const PACKAGED_WORKER_NAME: &str = "api";

const WORKER_SCRIPT: &str = "server.py";

/// How the worker is launched for a given run mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchProfile {
    /// The worker's virtualenv interpreter running its entry script.
    Development {
        interpreter: PathBuf,
        script: PathBuf,
        cwd: PathBuf,
    },
    /// A self-contained worker executable, started without arguments.
    Packaged { executable: PathBuf, cwd: PathBuf },
}

impl LaunchProfile {
    pub fn resolve(config: &HostConfig) -> Self {
        match config.run_mode {
            RunMode::Development => {
                let worker_dir = config
                    .worker_dir
                    .clone()
                    .unwrap_or_else(|| config.app_dir.join("..").join("backend"));
                Self::development(&worker_dir)
            }
            RunMode::Packaged => {
                let dir = config
                    .worker_dir
                    .clone()
                    .unwrap_or_else(|| config.app_dir.clone());
                LaunchProfile::Packaged {
                    executable: dir.join(PACKAGED_WORKER_NAME),
                    cwd: dir,
                }
            }
        }
    }

    pub fn development(worker_dir: &Path) -> Self {
        let venv = worker_dir.join("venv");
        let interpreter = if cfg!(windows) {
            venv.join("Scripts").join("python.exe")
        } else {
            venv.join("bin").join("python")
        };
        LaunchProfile::Development {
            interpreter,
            script: worker_dir.join(WORKER_SCRIPT),
            cwd: worker_dir.to_path_buf(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LaunchProfile::Development { .. } => "development",
            LaunchProfile::Packaged { .. } => "packaged",
        }
    }

    /// The file that must exist before a spawn is attempted.
    pub fn executable(&self) -> &Path {
        match self {
            LaunchProfile::Development { interpreter, .. } => interpreter,
            LaunchProfile::Packaged { executable, .. } => executable,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = match self {
            LaunchProfile::Development {
                interpreter,
                script,
                cwd,
            } => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(script).current_dir(cwd);
                cmd
            }
            LaunchProfile::Packaged { executable, cwd } => {
                let mut cmd = Command::new(executable);
                cmd.current_dir(cwd);
                cmd
            }
        };
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        // kill_on_drop does not run when the host dies from a signal. On Linux
        // the kernel sends SIGTERM instead once the spawning thread is gone;
        // start() runs on runtime threads, which live as long as the host.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGTERM)
                    .map_err(std::io::Error::from)
            });
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// What a call to [`BackendSupervisor::start`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Spawned { pid: Option<u32> },
    /// A worker handle is already held; nothing was spawned.
    AlreadyRunning { pid: Option<u32> },
    /// The launch profile's executable does not exist; nothing was spawned.
    ExecutableMissing { path: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendRuntimeSnapshot {
    pub state: BackendProcessState,
    pub pid: Option<u32>,
    pub profile: &'static str,
    pub executable: String,
    /// Number of processes spawned by this supervisor so far.
    pub generation: u64,
    pub log_lines_dropped: u64,
}

struct WorkerHandle {
    pid: Option<u32>,
    generation: u64,
    kill_tx: oneshot::Sender<()>,
    watcher: JoinHandle<()>,
}

pub struct BackendSupervisor {
    profile: LaunchProfile,
    state: Arc<RwLock<BackendProcessState>>,
    /// Serializes start/stop so concurrent callers cannot double-spawn.
    lifecycle_lock: Mutex<()>,
    handle: Arc<Mutex<Option<WorkerHandle>>>,
    generation: AtomicU64,
    log_buffer: Arc<WorkerOutputBuffer>,
    #[cfg(windows)]
    windows_job: Mutex<Option<WindowsJobHandle>>,
}

impl BackendSupervisor {
    pub fn new(profile: LaunchProfile, log_buffer_lines: usize) -> Self {
        Self {
            profile,
            state: Arc::new(RwLock::new(BackendProcessState::NotStarted)),
            lifecycle_lock: Mutex::new(()),
            handle: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
            log_buffer: Arc::new(WorkerOutputBuffer::new(log_buffer_lines)),
            #[cfg(windows)]
            windows_job: Mutex::new(None),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(LaunchProfile::resolve(config), config.log_buffer_lines)
    }

    pub fn profile(&self) -> &LaunchProfile {
        &self.profile
    }

    pub async fn state(&self) -> BackendProcessState {
        *self.state.read().await
    }

    pub async fn snapshot(&self) -> BackendRuntimeSnapshot {
        let pid = self.handle.lock().await.as_ref().and_then(|h| h.pid);
        BackendRuntimeSnapshot {
            state: self.state().await,
            pid,
            profile: self.profile.label(),
            executable: self.profile.executable().display().to_string(),
            generation: self.generation.load(Ordering::SeqCst),
            log_lines_dropped: self.log_buffer.dropped_total(),
        }
    }

    pub fn worker_logs_snapshot(&self, last_n: usize) -> Vec<WorkerLine> {
        self.log_buffer.snapshot(last_n)
    }

    /// Spawns the worker unless one is already held.
    ///
    /// A missing executable is not an error: it is logged, nothing is spawned
    /// and the state is left as it was. Only an OS-level spawn failure returns
    /// `Err`, with the state moved to `Failed`.
    pub async fn start(&self) -> Result<StartOutcome> {
        let _lifecycle_guard = self.lifecycle_lock.lock().await;

        if let Some(existing) = self.handle.lock().await.as_ref() {
            tracing::debug!("Worker already running (pid {:?})", existing.pid);
            return Ok(StartOutcome::AlreadyRunning { pid: existing.pid });
        }

        let executable = self.profile.executable();
        if !executable.exists() {
            let path = executable.display().to_string();
            tracing::error!(
                "Worker executable not found for {} profile: {}",
                self.profile.label(),
                path
            );
            emit_event(
                tracing::Level::ERROR,
                ProcessKind::Host,
                ObservabilityEvent {
                    event: "worker.start.missing_executable",
                    component: "backend",
                    status: Some("skipped"),
                    error_code: Some("WORKER_EXECUTABLE_MISSING"),
                    detail: Some(&path),
                    ..Default::default()
                },
            );
            return Ok(StartOutcome::ExecutableMissing { path });
        }

        *self.state.write().await = BackendProcessState::Starting;
        tracing::info!(
            "Starting worker ({} profile) from: {}",
            self.profile.label(),
            executable.display()
        );

        let mut child = match self.profile.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                *self.state.write().await = BackendProcessState::Failed;
                emit_event(
                    tracing::Level::ERROR,
                    ProcessKind::Host,
                    ObservabilityEvent {
                        event: "worker.start.failed",
                        component: "backend",
                        status: Some("failed"),
                        error_code: Some("WORKER_SPAWN_FAILED"),
                        detail: Some(&e.to_string()),
                        ..Default::default()
                    },
                );
                return Err(HostError::Launch(format!("Failed to spawn worker: {e}")));
            }
        };
        let pid = child.id();

        // Piped stdio must always be drained or the worker blocks on a full pipe.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_output(stdout, OutputStream::Stdout, self.log_buffer.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_output(stderr, OutputStream::Stderr, self.log_buffer.clone()));
        }

        #[cfg(windows)]
        {
            if let Some(pid) = pid {
                let mut job_guard = self.windows_job.lock().await;
                if job_guard.is_none() {
                    match windows_create_kill_on_close_job() {
                        Ok(job) => *job_guard = Some(job),
                        Err(e) => tracing::warn!("Failed to create job object for worker: {}", e),
                    }
                }
                if let Some(job) = job_guard.as_ref() {
                    if let Err(e) = windows_assign_pid_to_job(job.as_handle(), pid) {
                        // Nested jobs without breakaway reject the assignment; stop() still kills.
                        tracing::warn!("Failed to assign worker PID {} to job object: {}", pid, e);
                    }
                }
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (kill_tx, kill_rx) = oneshot::channel();

        // Hold the handle lock across the watcher spawn so an instant exit
        // cannot be observed before the handle is stored.
        let mut handle_guard = self.handle.lock().await;
        let watcher = tokio::spawn(watch_worker(
            child,
            kill_rx,
            generation,
            self.handle.clone(),
            self.state.clone(),
        ));
        *handle_guard = Some(WorkerHandle {
            pid,
            generation,
            kill_tx,
            watcher,
        });
        drop(handle_guard);

        emit_event(
            tracing::Level::INFO,
            ProcessKind::Host,
            ObservabilityEvent {
                event: "worker.start.spawned",
                component: "backend",
                status: Some("starting"),
                detail: Some(&format!(
                    "pid={} profile={} generation={}",
                    pid.map(|p| p.to_string()).unwrap_or_default(),
                    self.profile.label(),
                    generation
                )),
                ..Default::default()
            },
        );
        Ok(StartOutcome::Spawned { pid })
    }

    /// Called once the readiness gate has seen the worker answer.
    /// Returns false when there is no live worker to promote.
    pub async fn mark_running(&self) -> bool {
        let held = self.handle.lock().await.is_some();
        let mut state = self.state.write().await;
        if held && *state == BackendProcessState::Starting {
            *state = BackendProcessState::Running;
            tracing::info!("Worker reported ready");
            true
        } else {
            held && *state == BackendProcessState::Running
        }
    }

    /// Kills the worker if one is held. Safe to call any number of times.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle_guard = self.lifecycle_lock.lock().await;

        let handle = self.handle.lock().await.take();
        let Some(handle) = handle else {
            let mut state = self.state.write().await;
            if *state != BackendProcessState::NotStarted {
                *state = BackendProcessState::Stopped;
            }
            return Ok(());
        };

        tracing::info!("Stopping worker (pid {:?})", handle.pid);
        // The watcher may have already exited; a closed channel is fine.
        let _ = handle.kill_tx.send(());
        if let Err(e) = handle.watcher.await {
            tracing::warn!("Worker watcher task ended abnormally: {}", e);
        }

        #[cfg(windows)]
        {
            *self.windows_job.lock().await = None;
        }

        *self.state.write().await = BackendProcessState::Stopped;
        emit_event(
            tracing::Level::INFO,
            ProcessKind::Host,
            ObservabilityEvent {
                event: "worker.stop",
                component: "backend",
                status: Some("stopped"),
                detail: Some(&format!("generation={}", handle.generation)),
                ..Default::default()
            },
        );
        Ok(())
    }
}

async fn drain_output<R>(reader: R, stream: OutputStream, log_buffer: Arc<WorkerOutputBuffer>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                match stream {
                    OutputStream::Stdout => tracing::info!(target: "winregi.worker", "{}", line),
                    OutputStream::Stderr => tracing::warn!(target: "winregi.worker", "{}", line),
                }
                log_buffer.push(stream, line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Worker {:?} stream closed: {}", stream, e);
                break;
            }
        }
    }
}

async fn watch_worker(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    generation: u64,
    handle: Arc<Mutex<Option<WorkerHandle>>>,
    state: Arc<RwLock<BackendProcessState>>,
) {
    tokio::select! {
        status = child.wait() => {
            let mut guard = handle.lock().await;
            if guard.as_ref().map(|h| h.generation) != Some(generation) {
                // stop() already took this handle and owns the state transition.
                return;
            }
            guard.take();
            let next = record_exit(&status, generation);
            *state.write().await = next;
        }
        _ = kill_rx => {
            terminate(&mut child).await;
        }
    }
}

fn record_exit(status: &std::io::Result<ExitStatus>, generation: u64) -> BackendProcessState {
    let (next, detail) = match status {
        Ok(status) if status.success() => {
            tracing::info!("Worker exited cleanly");
            (BackendProcessState::Stopped, status.to_string())
        }
        Ok(status) => {
            tracing::error!("Worker exited unexpectedly: {}", status);
            (BackendProcessState::Failed, status.to_string())
        }
        Err(e) => {
            tracing::error!("Failed to observe worker exit: {}", e);
            (BackendProcessState::Failed, e.to_string())
        }
    };
    emit_event(
        if next == BackendProcessState::Failed {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        },
        ProcessKind::Host,
        ObservabilityEvent {
            event: "worker.exit",
            component: "backend",
            status: Some(next.as_str()),
            detail: Some(&format!("{detail} generation={generation}")),
            ..Default::default()
        },
    );
    next
}

async fn terminate(child: &mut Child) {
    #[cfg(windows)]
    {
        if let Some(pid) = child.id() {
            // Take the whole tree down; the worker may have spawned helpers.
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            let mut cmd = Command::new("taskkill");
            cmd.args(["/F", "/T", "/PID", &pid.to_string()])
                .creation_flags(CREATE_NO_WINDOW);
            let _ = cmd.output().await;
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!("Worker kill returned: {}", e);
    }
}
