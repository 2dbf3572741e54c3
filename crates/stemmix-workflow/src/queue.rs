//! Bounded admission for concurrent mix jobs.
//!
//! At most `max_running` jobs execute at once and at most `max_queued`
//! more wait for a slot. Anything beyond that is rejected immediately with
//! [`StemmixError::QueueFull`] instead of piling up.

use crate::diagnostics::MixDiagnostics;
use crate::orchestrator::{MixProgress, MixRequest, Orchestrator};
use std::sync::Arc;
use stemmix_core::{Result, StemmixError};
use stemmix_media::ProcessRunner;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct MixService<R> {
    orchestrator: Arc<Orchestrator<R>>,
    admission: Arc<Semaphore>,
    running: Arc<Semaphore>,
    capacity: usize,
}

impl<R> MixService<R>
where
    R: ProcessRunner + Clone + 'static,
{
    pub fn new(orchestrator: Orchestrator<R>) -> Self {
        let config = orchestrator.config();
        let max_running = config.max_running_jobs.max(1);
        let capacity = max_running + config.max_queued_jobs;
        info!(max_running, capacity, "Mix service ready");
        Self {
            orchestrator: Arc::new(orchestrator),
            admission: Arc::new(Semaphore::new(capacity)),
            running: Arc::new(Semaphore::new(max_running)),
            capacity,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<R> {
        &self.orchestrator
    }

    /// Jobs admitted (running or waiting) right now.
    pub fn admitted(&self) -> usize {
        self.capacity - self.admission.available_permits()
    }

    fn admit(&self) -> Result<OwnedSemaphorePermit> {
        self.admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| StemmixError::QueueFull {
                capacity: self.capacity,
            })
    }

    /// Run a job on the caller's task once a slot is free.
    pub async fn submit(
        &self,
        request: &MixRequest,
        on_progress: &(dyn Fn(MixProgress) + Send + Sync),
    ) -> Result<MixDiagnostics> {
        let _admitted = self.admit()?;
        let _slot = acquire(&self.running).await?;
        self.orchestrator.run(request, on_progress).await
    }

    /// Admit a job and run it on a new task.
    ///
    /// Admission is decided before this returns; a full queue yields
    /// `QueueFull` without spawning anything.
    pub fn spawn(
        &self,
        request: MixRequest,
        on_progress: impl Fn(MixProgress) + Send + Sync + 'static,
    ) -> Result<JoinHandle<Result<MixDiagnostics>>> {
        let admitted = self.admit()?;
        debug!(admitted = self.admitted(), "Job admitted");
        let orchestrator = Arc::clone(&self.orchestrator);
        let running = Arc::clone(&self.running);
        Ok(tokio::spawn(async move {
            let _admitted = admitted;
            let _slot = acquire(&running).await?;
            orchestrator.run(&request, &on_progress).await
        }))
    }
}

async fn acquire(running: &Semaphore) -> Result<tokio::sync::SemaphorePermit<'_>> {
    running
        .acquire()
        .await
        .map_err(|_| StemmixError::Config("mix service has shut down".into()))
}
