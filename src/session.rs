//! # Session Store
//!
//! Una sessione per canale: operazione selezionata, parametri e l'eventuale Job in corso.
//!
//! ## Responsabilità:
//! - Selezione/sostituzione dell'operazione (rifiutata con un Job attivo)
//! - Mutua esclusione: al massimo un Job in `Processing` o in attesa di decisione
//! - Parcheggio delle risorse di un Job in attesa della decisione sul retry
//! - Chiusura con marcatura di cancellazione del Job in volo
//!
//! ## Stati:
//! - Sessione: `AwaitingFile → Processing → {AwaitingFile | AwaitingOptimizationDecision | rimossa}`
//! - Job: `Created → Validating → Transcoding → {Delivered | AwaitingOptimizationDecision → Retrying → {Delivered | Failed} | Failed}`

use crate::error::{ConvertError, ConvertResult};
use crate::negotiator::OptimizationAttempt;
use crate::operation::OperationParams;
use crate::strategies::SourceFile;
use crate::temp::TempTracker;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Channel identifier supplied by the platform adapter
pub type SessionId = String;

/// Process-unique job number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    AwaitingFile,
    Processing,
    AwaitingOptimizationDecision,
    Closed,
}

impl SessionStatus {
    /// A Job is in flight or waiting for the user
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionStatus::Processing | SessionStatus::AwaitingOptimizationDecision
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Validating,
    Transcoding,
    AwaitingOptimizationDecision,
    Retrying,
    Delivered,
    Failed,
}

#[derive(Debug)]
struct Job {
    id: JobId,
    status: JobStatus,
    retry_attempted: bool,
    cancelled: Arc<AtomicBool>,
}

/// Resources held while the user decides whether to retry
#[derive(Debug)]
pub struct ParkedJob {
    pub tracker: TempTracker,
    pub sources: Vec<SourceFile>,
    /// Overflow that triggered the offer, with the profile the retry runs on
    pub attempt: OptimizationAttempt,
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub params: OperationParams,
    pub status: SessionStatus,
    job: Option<Job>,
    parked: Option<ParkedJob>,
}

impl Session {
    /// Parked resources, if a decision was pending
    pub fn take_parked(&mut self) -> Option<ParkedJob> {
        self.parked.take()
    }
}

/// Handle given to the code running a Job
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub session: SessionId,
    pub job: JobId,
    /// Snapshot taken when the Job started
    pub params: OperationParams,
    pub retry_attempted: bool,
    cancelled: Arc<AtomicBool>,
}

impl JobTicket {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Owned map of sessions keyed by channel
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    next_job: Arc<AtomicU64>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the session of `id`
    pub async fn select(&self, id: &str, params: OperationParams) -> ConvertResult<()> {
        params.validate()?;
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(id) {
            if existing.status.is_busy() {
                return Err(ConvertError::SessionBusy);
            }
        }

        info!(session = %id, operation = %params.operation(), "Operation selected");
        sessions.insert(
            id.to_string(),
            Session {
                id: id.to_string(),
                params,
                status: SessionStatus::AwaitingFile,
                job: None,
                parked: None,
            },
        );
        Ok(())
    }

    /// Start a Job, taking the session's per-channel lock
    pub async fn begin_job(&self, id: &str) -> ConvertResult<JobTicket> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(id).ok_or(ConvertError::NoOperationSelected)?;
        match session.status {
            SessionStatus::AwaitingFile => {}
            SessionStatus::Closed => return Err(ConvertError::NoOperationSelected),
            _ => return Err(ConvertError::SessionBusy),
        }

        let job_id = JobId(self.next_job.fetch_add(1, Ordering::SeqCst) + 1);
        let cancelled = Arc::new(AtomicBool::new(false));
        session.status = SessionStatus::Processing;
        session.job = Some(Job {
            id: job_id,
            status: JobStatus::Created,
            retry_attempted: false,
            cancelled: cancelled.clone(),
        });

        debug!(session = %id, job = %job_id, "Job created");
        Ok(JobTicket {
            session: id.to_string(),
            job: job_id,
            params: session.params.clone(),
            retry_attempted: false,
            cancelled,
        })
    }

    /// Record a job transition; ignored when the Job is no longer current
    pub async fn set_job_status(&self, ticket: &JobTicket, status: JobStatus) {
        let mut sessions = self.sessions.lock().await;
        if let Some(job) = current_job(&mut sessions, ticket) {
            debug!(session = %ticket.session, job = %ticket.job, ?status, "Job transition");
            job.status = status;
        }
    }

    /// Hold a Job's resources until the user decides.
    ///
    /// Gives the resources back when the session was closed meanwhile.
    pub async fn park_for_decision(&self, ticket: &JobTicket, parked: ParkedJob) -> Result<(), ParkedJob> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&ticket.session) else {
            return Err(parked);
        };
        match session.job.as_mut() {
            Some(job) if job.id == ticket.job && !job.retry_attempted && !ticket.is_cancelled() => {
                job.status = JobStatus::AwaitingOptimizationDecision;
                job.retry_attempted = true;
            }
            _ => return Err(parked),
        }
        session.status = SessionStatus::AwaitingOptimizationDecision;
        session.parked = Some(parked);
        info!(session = %ticket.session, job = %ticket.job, "Awaiting optimization decision");
        Ok(())
    }

    /// Resume a parked Job for its single retry
    pub async fn take_for_retry(&self, id: &str) -> ConvertResult<(JobTicket, ParkedJob)> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(id).ok_or(ConvertError::NoOperationSelected)?;
        if session.status != SessionStatus::AwaitingOptimizationDecision {
            return Err(ConvertError::NoPendingDecision);
        }
        let (Some(job), Some(parked)) = (session.job.as_mut(), session.parked.take()) else {
            return Err(ConvertError::NoPendingDecision);
        };

        job.status = JobStatus::Retrying;
        session.status = SessionStatus::Processing;
        let ticket = JobTicket {
            session: id.to_string(),
            job: job.id,
            params: session.params.clone(),
            retry_attempted: true,
            cancelled: job.cancelled.clone(),
        };
        Ok((ticket, parked))
    }

    /// End the current Job; delivery closes the session, anything else reopens it.
    ///
    /// Returns whether the session still exists.
    pub async fn finish_job(&self, ticket: &JobTicket, delivered: bool) -> bool {
        let mut sessions = self.sessions.lock().await;
        let current = sessions
            .get(&ticket.session)
            .and_then(|s| s.job.as_ref())
            .map(|job| job.id == ticket.job)
            .unwrap_or(false);
        if !current {
            return sessions.contains_key(&ticket.session);
        }

        if delivered {
            sessions.remove(&ticket.session);
            info!(session = %ticket.session, job = %ticket.job, "Delivered, session closed");
            return false;
        }

        if let Some(session) = sessions.get_mut(&ticket.session) {
            session.status = SessionStatus::AwaitingFile;
            session.job = None;
            session.parked = None;
        }
        info!(session = %ticket.session, job = %ticket.job, "Job failed, session awaiting a new file");
        true
    }

    /// Remove the session, marking an in-flight Job cancelled
    pub async fn close(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        let mut session = sessions.remove(id)?;
        if let Some(job) = &session.job {
            job.cancelled.store(true, Ordering::SeqCst);
        }
        session.status = SessionStatus::Closed;
        info!(session = %id, "Session closed");
        Some(session)
    }

    pub async fn status(&self, id: &str) -> Option<SessionStatus> {
        self.sessions.lock().await.get(id).map(|s| s.status)
    }

    pub async fn job_status(&self, id: &str) -> Option<JobStatus> {
        self.sessions
            .lock()
            .await
            .get(id)
            .and_then(|s| s.job.as_ref())
            .map(|job| job.status)
    }
}

fn current_job<'a>(sessions: &'a mut HashMap<SessionId, Session>, ticket: &JobTicket) -> Option<&'a mut Job> {
    sessions
        .get_mut(&ticket.session)
        .and_then(|s| s.job.as_mut())
        .filter(|job| job.id == ticket.job)
}
