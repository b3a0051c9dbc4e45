// WinRegi Application State
use crate::backend::BackendSupervisor;
use crate::config::{AppPaths, HostConfig};
use crate::elevation::ElevationManager;
use crate::error::Result;
use crate::execution::ExecutionController;
use crate::feedback::{FeedbackPipeline, SummaryEvent};
use crate::readiness::ReadinessProber;
use crate::worker_client::{IntentResolver, SettingsSource, Summarizer, WorkerClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The worker-facing services the host talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn IntentResolver>,
    pub settings: Arc<dyn SettingsSource>,
    pub summarizer: Arc<dyn Summarizer>,
}

impl Collaborators {
    pub fn from_worker(client: WorkerClient) -> Self {
        let client = Arc::new(client);
        Self {
            resolver: client.clone(),
            settings: client.clone(),
            summarizer: client,
        }
    }
}

pub struct AppState {
    pub config: HostConfig,
    pub logs_dir: PathBuf,
    /// Sole owner of the worker process handle.
    pub supervisor: Arc<BackendSupervisor>,
    pub prober: ReadinessProber,
    pub elevation: ElevationManager,
    pub resolver: Arc<dyn IntentResolver>,
    /// Read on every use; never cached here.
    pub settings: Arc<dyn SettingsSource>,
    pub controller: ExecutionController,
    pub feedback: FeedbackPipeline,
}

impl AppState {
    /// Wires the real worker client, supervisor and OS privilege query.
    pub fn new(
        config: HostConfig,
        paths: &AppPaths,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SummaryEvent>)> {
        let base_url = config.worker_base_url();
        let client = WorkerClient::new(&base_url, config.request_timeout, config.retry)?;
        let supervisor = Arc::new(BackendSupervisor::from_config(&config));
        Self::from_parts(
            config,
            paths.logs_dir.clone(),
            supervisor,
            ElevationManager::os(),
            Collaborators::from_worker(client),
        )
    }

    pub fn from_parts(
        config: HostConfig,
        logs_dir: PathBuf,
        supervisor: Arc<BackendSupervisor>,
        elevation: ElevationManager,
        collaborators: Collaborators,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SummaryEvent>)> {
        let prober = ReadinessProber::new(
            &config.worker_base_url(),
            config.probe_timeout,
            config.readiness_interval,
        )?;
        let (feedback, summaries) =
            FeedbackPipeline::new(collaborators.summarizer, collaborators.settings.clone());
        Ok((
            Self {
                config,
                logs_dir,
                supervisor,
                prober,
                elevation,
                resolver: collaborators.resolver,
                settings: collaborators.settings,
                controller: ExecutionController::new(),
                feedback,
            },
            summaries,
        ))
    }
}
