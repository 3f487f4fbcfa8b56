//! # Conversion Engine
//!
//! Orchestratore del flusso di conversione per sessione:
//! selezione → Format Gate → fetch → strategia → Size Negotiator → consegna.
//!
//! ## Responsabilità:
//! - Applica la mutua esclusione per sessione tramite `SessionStore`
//! - Possiede un `TempTracker` per Job e lo rilascia su ogni percorso di uscita
//! - Gestisce l'unico retry ottimizzato e la decisione dell'utente
//! - Collega l'`IdleSupervisor`: attività, avvisi, chiusura automatica
//!
//! Le sessioni diverse non condividono stato mutabile oltre alla mappa delle
//! sessioni, quindi un Job lungo non blocca le altre sessioni.

use crate::command::ToolRunner;
use crate::config::Config;
use crate::error::{ConvertError, ConvertResult};
use crate::fetch::{FileRef, SourceFetcher};
use crate::format_gate::{FormatGate, MediaKind};
use crate::idle::{IdleEvent, IdleSupervisor};
use crate::negotiator::{format_size, reduction_percent, OptimizationAttempt, SizeNegotiator, Verdict};
use crate::operation::{Operation, OperationParams, QualityProfile};
use crate::session::{JobStatus, JobTicket, ParkedJob, SessionId, SessionStatus, SessionStore};
use crate::strategies::remote::RemoteResolver;
use crate::strategies::{SourceFile, StrategyTranscoder, TranscodeRequest, Transcoder};
use crate::temp::{self, TempTracker};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Delivered artifact
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub side_text: Option<String>,
    /// Temp paths removed when the Job ended
    pub cleaned_paths: Vec<PathBuf>,
}

/// Overflow of the first pass, waiting for `Decision`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OptimizationOffer {
    pub original_size: u64,
    pub ceiling: u64,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Delivered(ConversionResult),
    OptimizationOffered(OptimizationOffer),
    /// The user declined the retry; paths released with the session
    Closed(Vec<PathBuf>),
}

/// User answer to an optimization offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry,
    Cancel,
}

/// Notifications for the platform adapter
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    IdleWarning(SessionId),
    Expired {
        session: SessionId,
        cleaned_paths: Vec<PathBuf>,
    },
}

pub struct ConversionEngine {
    config: Config,
    store: SessionStore,
    idle: IdleSupervisor,
    negotiator: SizeNegotiator,
    fetcher: SourceFetcher,
    transcoder: Arc<dyn Transcoder>,
    temp_root: PathBuf,
}

impl ConversionEngine {
    /// Build the engine and start its idle reaper. Must run inside a tokio runtime.
    pub fn new(config: Config, transcoder: Arc<dyn Transcoder>) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let temp_root = config.temp_root();
        let swept = temp::sweep_stale(&temp_root, Duration::from_secs(config.stale_temp_secs));
        if swept > 0 {
            info!("🧹 Removed {} stale job directories", swept);
        }

        let (idle, idle_events) = IdleSupervisor::new(config.idle_warning(), config.idle_close());
        let (events, receiver) = mpsc::unbounded_channel();

        let engine = Arc::new(Self {
            store: SessionStore::new(),
            idle,
            negotiator: SizeNegotiator::new(config.input_ceiling_bytes, config.output_ceiling_bytes),
            fetcher: SourceFetcher::new(config.input_ceiling_bytes),
            transcoder,
            temp_root,
            config,
        });

        tokio::spawn(reap_idle(Arc::downgrade(&engine), idle_events, events));
        (engine, receiver)
    }

    /// Engine backed by the external-tool strategies
    pub fn with_strategies(config: Config) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let transcoder = StrategyTranscoder::new(
            ToolRunner::new(config.tool_timeout()),
            RemoteResolver::new(config.resolver_endpoint.clone()),
            config.max_remote_clip_secs,
            config.max_still_images,
        );
        Self::new(config, Arc::new(transcoder))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn status(&self, id: &str) -> Option<SessionStatus> {
        self.store.status(id).await
    }

    pub async fn job_status(&self, id: &str) -> Option<JobStatus> {
        self.store.job_status(id).await
    }

    /// Select (or replace) the operation of a session
    pub async fn select(&self, id: &str, params: OperationParams) -> ConvertResult<()> {
        self.store.select(id, params).await?;
        self.idle.touch(id).await;
        Ok(())
    }

    /// Submit uploaded files for the selected operation
    pub async fn submit_file(&self, id: &str, files: Vec<FileRef>) -> ConvertResult<SubmitOutcome> {
        let ticket = self.store.begin_job(id).await?;
        self.idle.touch(id).await;
        let outcome = self.run_file_job(&ticket, files).await;
        self.conclude(&ticket, outcome).await
    }

    /// Run the remote operation of a session on the URL in its parameters
    pub async fn submit_url(&self, id: &str) -> ConvertResult<SubmitOutcome> {
        let ticket = self.store.begin_job(id).await?;
        self.idle.touch(id).await;
        let outcome = self.run_url_job(&ticket).await;
        self.conclude(&ticket, outcome).await
    }

    /// Answer a pending optimization offer
    pub async fn decide(&self, id: &str, decision: Decision) -> ConvertResult<SubmitOutcome> {
        match decision {
            Decision::Retry => {
                let (ticket, parked) = self.store.take_for_retry(id).await?;
                self.idle.touch(id).await;
                info!(session = %id, job = %ticket.job, "🔁 Optimization retry accepted");
                let outcome = self
                    .attempt(&ticket, parked.tracker, parked.sources, Some(parked.attempt))
                    .await;
                self.conclude(&ticket, outcome).await
            }
            Decision::Cancel => {
                if self.store.status(id).await != Some(SessionStatus::AwaitingOptimizationDecision) {
                    return Err(ConvertError::NoPendingDecision);
                }
                info!(session = %id, "Optimization retry declined");
                Ok(SubmitOutcome::Closed(self.close(id).await))
            }
        }
    }

    /// Close a session: cancel timers, cancel its Job, release parked resources
    pub async fn close(&self, id: &str) -> Vec<PathBuf> {
        self.idle.cancel(id).await;
        let Some(mut session) = self.store.close(id).await else {
            return Vec::new();
        };
        match session.take_parked() {
            Some(parked) => parked.tracker.release().await,
            None => Vec::new(),
        }
    }

    async fn run_file_job(&self, ticket: &JobTicket, files: Vec<FileRef>) -> ConvertResult<SubmitOutcome> {
        self.store.set_job_status(ticket, JobStatus::Validating).await;
        let operation = ticket.params.operation();
        let accepted = self.validate_files(operation, files)?;

        let mut tracker = self.create_tracker(ticket)?;
        self.store.set_job_status(ticket, JobStatus::Transcoding).await;

        let mut sources = Vec::with_capacity(accepted.len());
        for (file, kind) in &accepted {
            match self.fetcher.fetch(file, *kind, &mut tracker).await {
                Ok(source) => sources.push(source),
                Err(e) => {
                    tracker.release().await;
                    return Err(e);
                }
            }
        }

        self.attempt(ticket, tracker, sources, None).await
    }

    async fn run_url_job(&self, ticket: &JobTicket) -> ConvertResult<SubmitOutcome> {
        self.store.set_job_status(ticket, JobStatus::Validating).await;
        if !ticket.params.operation().takes_url() {
            return Err(ConvertError::InvalidParameters(format!(
                "{} expects an uploaded file, not a URL",
                ticket.params.operation()
            )));
        }
        let tracker = self.create_tracker(ticket)?;
        self.store.set_job_status(ticket, JobStatus::Transcoding).await;
        self.attempt(ticket, tracker, Vec::new(), None).await
    }

    /// Gate every file before anything is allocated or fetched
    fn validate_files(
        &self,
        operation: Operation,
        files: Vec<FileRef>,
    ) -> ConvertResult<Vec<(FileRef, MediaKind)>> {
        if files.is_empty() {
            return Err(ConvertError::NoValidInput);
        }

        if operation != Operation::MultiStillAssemble {
            let file = files.into_iter().next().ok_or(ConvertError::NoValidInput)?;
            let kind = FormatGate::check(&file.name, file.content_type.as_deref(), operation)?;
            self.negotiator.check_input(file.size)?;
            return Ok(vec![(file, kind)]);
        }

        let max = self.config.max_still_images;
        if files.len() > max {
            return Err(ConvertError::TooManyInputs {
                count: files.len(),
                max,
            });
        }

        let mut accepted = Vec::with_capacity(files.len());
        for file in files {
            match FormatGate::check(&file.name, file.content_type.as_deref(), operation) {
                Ok(kind) => {
                    self.negotiator.check_input(file.size)?;
                    accepted.push((file, kind));
                }
                Err(e) => warn!("⚠️  Skipping {}: {}", file.name, e),
            }
        }
        if accepted.is_empty() {
            return Err(ConvertError::NoValidInput);
        }
        Ok(accepted)
    }

    fn create_tracker(&self, ticket: &JobTicket) -> ConvertResult<TempTracker> {
        Ok(TempTracker::create(&self.temp_root, ticket.job)?)
    }

    /// One transcode pass plus its verdict. Owns `tracker` until the Job ends or is parked.
    async fn attempt(
        &self,
        ticket: &JobTicket,
        mut tracker: TempTracker,
        sources: Vec<SourceFile>,
        retry: Option<OptimizationAttempt>,
    ) -> ConvertResult<SubmitOutcome> {
        let profile = retry
            .as_ref()
            .map(|attempt| attempt.profile.clone())
            .unwrap_or_else(QualityProfile::standard);
        let first_pass_size = retry.as_ref().map(|attempt| attempt.original_size);
        let mark = tracker.mark();

        let request = TranscodeRequest {
            params: &ticket.params,
            sources: &sources,
            profile: &profile,
        };
        let result = self.transcoder.transcode(request, &mut tracker).await;

        if ticket.is_cancelled() {
            let cleaned = tracker.release().await;
            debug!(job = %ticket.job, count = cleaned.len(), "Discarded output of a cancelled job");
            return Err(ConvertError::Cancelled);
        }

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracker.release().await;
                return Err(e);
            }
        };

        let size = output.bytes.len() as u64;
        match self
            .negotiator
            .assess(size, ticket.retry_attempted, first_pass_size.unwrap_or(size))
        {
            Verdict::Accept => {
                let cleaned_paths = tracker.release().await;
                info!(
                    session = %ticket.session,
                    job = %ticket.job,
                    "✅ Delivering {} ({})",
                    output.filename,
                    format_size(size)
                );
                let output = match first_pass_size {
                    Some(original) => output.with_note(format!(
                        "Optimized from {} to {} ({:.0}% smaller).",
                        format_size(original),
                        format_size(size),
                        reduction_percent(original, size)
                    )),
                    None => output,
                };
                Ok(SubmitOutcome::Delivered(ConversionResult {
                    bytes: output.bytes,
                    filename: output.filename,
                    side_text: output.side_text,
                    cleaned_paths,
                }))
            }
            Verdict::OfferRetry(attempt) => {
                tracker.release_since(mark).await;
                info!(
                    session = %ticket.session,
                    job = %ticket.job,
                    "📦 Output {} exceeds {}, offering an optimized retry",
                    format_size(attempt.original_size),
                    format_size(attempt.ceiling)
                );
                let offer = OptimizationOffer {
                    original_size: attempt.original_size,
                    ceiling: attempt.ceiling,
                };
                let parked = ParkedJob {
                    tracker,
                    sources,
                    attempt,
                };
                match self.store.park_for_decision(ticket, parked).await {
                    Ok(()) => Ok(SubmitOutcome::OptimizationOffered(offer)),
                    Err(parked) => {
                        parked.tracker.release().await;
                        Err(ConvertError::Cancelled)
                    }
                }
            }
            Verdict::Reject(e) => {
                tracker.release().await;
                Err(e)
            }
        }
    }

    /// Settle session state and idle timers after a Job step
    async fn conclude(&self, ticket: &JobTicket, outcome: ConvertResult<SubmitOutcome>) -> ConvertResult<SubmitOutcome> {
        match &outcome {
            Ok(SubmitOutcome::Delivered(_)) => {
                self.store.set_job_status(ticket, JobStatus::Delivered).await;
                self.store.finish_job(ticket, true).await;
                self.idle.cancel(&ticket.session).await;
            }
            Ok(SubmitOutcome::OptimizationOffered(_)) => {
                self.idle.touch(&ticket.session).await;
            }
            Ok(SubmitOutcome::Closed(_)) | Err(ConvertError::Cancelled) => {}
            Err(e) => {
                warn!(session = %ticket.session, job = %ticket.job, "❌ Job failed: {}", e);
                self.store.set_job_status(ticket, JobStatus::Failed).await;
                if self.store.finish_job(ticket, false).await {
                    self.idle.touch(&ticket.session).await;
                }
            }
        }
        outcome
    }
}

/// Forward idle warnings and close expired sessions
async fn reap_idle(
    engine: Weak<ConversionEngine>,
    mut idle_events: mpsc::UnboundedReceiver<IdleEvent>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(event) = idle_events.recv().await {
        match event {
            IdleEvent::Warning(session) => {
                let _ = events.send(SessionEvent::IdleWarning(session));
            }
            IdleEvent::Expired(session) => {
                let Some(engine) = engine.upgrade() else { break };
                let cleaned_paths = engine.close(&session).await;
                let _ = events.send(SessionEvent::Expired {
                    session,
                    cleaned_paths,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::strategies::TranscodeOutput;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const CEILING: u64 = 25_000;

    /// Returns scripted output sizes, leaving a partial file behind on every call
    struct Scripted {
        outputs: Mutex<VecDeque<ConvertResult<usize>>>,
        profiles: Mutex<Vec<QualityProfile>>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl Scripted {
        fn new(outputs: Vec<ConvertResult<usize>>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs.into()),
                profiles: Mutex::new(Vec::new()),
                gate: None,
            })
        }

        fn calls(&self) -> Vec<QualityProfile> {
            self.profiles.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transcoder for Scripted {
        async fn transcode(
            &self,
            request: TranscodeRequest<'_>,
            tracker: &mut TempTracker,
        ) -> ConvertResult<TranscodeOutput> {
            self.profiles.lock().unwrap().push(request.profile.clone());
            let partial = tracker.allocate("partial", "bin");
            tokio::fs::write(&partial, b"partial").await?;

            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }

            let next = self
                .outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ConvertError::Transcode("script exhausted".to_string())));
            let size = next?;
            let stem = request.sources.first().map(|s| s.stem()).unwrap_or_else(|| "clip".to_string());
            Ok(TranscodeOutput {
                bytes: vec![7u8; size],
                filename: format!("{}.out", stem),
                side_text: None,
            })
        }
    }

    struct Fixture {
        dir: TempDir,
        engine: Arc<ConversionEngine>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Fixture {
        fn new(transcoder: Arc<dyn Transcoder>) -> Self {
            Self::with_config(transcoder, |_| {})
        }

        fn with_config(transcoder: Arc<dyn Transcoder>, tweak: impl FnOnce(&mut Config)) -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = Config {
                input_ceiling_bytes: 100_000,
                output_ceiling_bytes: CEILING,
                temp_root: Some(dir.path().join("jobs")),
                ..Default::default()
            };
            tweak(&mut config);
            let (engine, events) = ConversionEngine::new(config, transcoder);
            Self { dir, engine, events }
        }

        fn file(&self, name: &str, bytes: usize) -> FileRef {
            let path = self.dir.path().join(name);
            std::fs::write(&path, vec![1u8; bytes]).unwrap();
            FileRef::local(&path).unwrap()
        }

        fn job_dirs(&self) -> usize {
            let root = self.dir.path().join("jobs");
            if !root.exists() {
                return 0;
            }
            std::fs::read_dir(root).unwrap().count()
        }
    }

    fn assert_paths_gone(paths: &[PathBuf]) {
        assert!(!paths.is_empty());
        assert!(paths.iter().all(|p| !Path::new(p).exists()));
    }

    #[tokio::test]
    async fn test_delivery_cleans_every_temp_path() {
        let fake = Scripted::new(vec![Ok(9_000)]);
        let fx = Fixture::new(fake.clone());
        fx.engine.select("c1", OperationParams::LossyRecompress { percentage: 50 }).await.unwrap();

        // 10 KB animated input, 50% reduction
        let input = fx.file("party.gif", 10_000);
        match fx.engine.submit_file("c1", vec![input]).await.unwrap() {
            SubmitOutcome::Delivered(result) => {
                assert!((result.bytes.len() as u64) < 10_000);
                assert!((result.bytes.len() as u64) <= CEILING);
                assert_eq!(result.filename, "party.out");
                assert_paths_gone(&result.cleaned_paths);
            }
            other => panic!("expected delivery, got {:?}", other),
        }
        assert_eq!(fx.engine.status("c1").await, None);
        assert_eq!(fx.job_dirs(), 0);
        assert!(!fake.calls()[0].optimized);
    }

    #[tokio::test]
    async fn test_too_many_stills_rejected_before_transcoding() {
        let fake = Scripted::new(vec![Ok(10)]);
        let fx = Fixture::new(fake.clone());
        fx.engine
            .select("c1", OperationParams::MultiStillAssemble { frame_duration: 5 })
            .await
            .unwrap();

        let files: Vec<FileRef> = (0..11).map(|i| fx.file(&format!("s{}.png", i), 10)).collect();
        let err = fx.engine.submit_file("c1", files).await.unwrap_err();
        assert!(matches!(err, ConvertError::TooManyInputs { count: 11, max: 10 }));
        assert!(fake.calls().is_empty());
        assert_eq!(fx.job_dirs(), 0);
        assert_eq!(fx.engine.status("c1").await, Some(SessionStatus::AwaitingFile));
    }

    #[tokio::test]
    async fn test_overflow_then_retry_delivers() {
        let fake = Scripted::new(vec![Ok(30_000), Ok(22_000)]);
        let fx = Fixture::new(fake.clone());
        fx.engine.select("c1", OperationParams::AnimatedEncode).await.unwrap();

        let outcome = fx.engine.submit_file("c1", vec![fx.file("trip.mp4", 50_000)]).await.unwrap();
        assert!(matches!(
            outcome,
            SubmitOutcome::OptimizationOffered(OptimizationOffer { original_size: 30_000, ceiling: CEILING })
        ));
        assert_eq!(
            fx.engine.status("c1").await,
            Some(SessionStatus::AwaitingOptimizationDecision)
        );
        assert_eq!(
            fx.engine.job_status("c1").await,
            Some(JobStatus::AwaitingOptimizationDecision)
        );
        // parked source survives, the first-pass output does not
        assert_eq!(fx.job_dirs(), 1);

        match fx.engine.decide("c1", Decision::Retry).await.unwrap() {
            SubmitOutcome::Delivered(result) => {
                assert_eq!(result.bytes.len(), 22_000);
                let note = result.side_text.unwrap();
                assert!(note.contains("27% smaller"), "{}", note);
            }
            other => panic!("expected delivery, got {:?}", other),
        }
        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], QualityProfile::standard());
        // the retry runs on the profile carried by the offer
        assert_eq!(calls[1], QualityProfile::optimized());
        assert_eq!(fx.job_dirs(), 0);
        assert_eq!(fx.engine.status("c1").await, None);
    }

    #[tokio::test]
    async fn test_second_overflow_is_terminal() {
        let fake = Scripted::new(vec![Ok(30_000), Ok(28_000)]);
        let fx = Fixture::new(fake.clone());
        fx.engine.select("c1", OperationParams::AnimatedEncode).await.unwrap();
        fx.engine.submit_file("c1", vec![fx.file("trip.mp4", 50_000)]).await.unwrap();

        let err = fx.engine.decide("c1", Decision::Retry).await.unwrap_err();
        match err {
            ConvertError::OutputTooLargeAfterOptimization { original, optimized, ceiling } => {
                assert_eq!((original, optimized, ceiling), (30_000, 28_000, CEILING));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(fx.job_dirs(), 0);
        assert_eq!(fx.engine.status("c1").await, Some(SessionStatus::AwaitingFile));
        assert!(matches!(
            fx.engine.decide("c1", Decision::Retry).await,
            Err(ConvertError::NoPendingDecision)
        ));
    }

    #[tokio::test]
    async fn test_docx_rejected_without_temp_files() {
        let fake = Scripted::new(vec![Ok(10)]);
        let fx = Fixture::new(fake.clone());
        fx.engine.select("c1", OperationParams::Crop).await.unwrap();

        let err = fx.engine.submit_file("c1", vec![fx.file("notes.docx", 100)]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatMismatch);
        let message = err.to_string();
        assert!(message.contains("png") && message.contains("gif"), "{}", message);
        assert!(fake.calls().is_empty());
        assert_eq!(fx.job_dirs(), 0);
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let fx = Fixture::new(Scripted::new(vec![]));
        let err = fx.engine.submit_file("nobody", vec![fx.file("a.png", 1)]).await.unwrap_err();
        assert!(matches!(err, ConvertError::NoOperationSelected));
        assert!(matches!(
            fx.engine.decide("nobody", Decision::Cancel).await,
            Err(ConvertError::NoPendingDecision)
        ));
        fx.engine.select("c1", OperationParams::Crop).await.unwrap();
        assert!(matches!(
            fx.engine.submit_url("c1").await,
            Err(ConvertError::InvalidParameters(_))
        ));
        assert_eq!(fx.job_dirs(), 0);
    }

    #[tokio::test]
    async fn test_input_ceiling_checked_before_fetch() {
        let fake = Scripted::new(vec![Ok(10)]);
        let fx = Fixture::new(fake.clone());
        fx.engine.select("c1", OperationParams::Crop).await.unwrap();
        let err = fx.engine.submit_file("c1", vec![fx.file("huge.png", 100_001)]).await.unwrap_err();
        assert!(matches!(err, ConvertError::InputTooLarge { .. }));
        assert_eq!(fx.job_dirs(), 0);
    }

    #[tokio::test]
    async fn test_transcode_error_keeps_session_open() {
        let fake = Scripted::new(vec![Err(ConvertError::Transcode("gifsicle: bad input".to_string())), Ok(100)]);
        let fx = Fixture::new(fake.clone());
        fx.engine.select("c1", OperationParams::Crop).await.unwrap();

        let err = fx.engine.submit_file("c1", vec![fx.file("a.png", 100)]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TranscodeError);
        assert_eq!(fx.job_dirs(), 0);
        assert_eq!(fx.engine.status("c1").await, Some(SessionStatus::AwaitingFile));

        let outcome = fx.engine.submit_file("c1", vec![fx.file("b.png", 100)]).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Delivered(_)));
    }

    #[tokio::test]
    async fn test_cancel_decision_closes_session() {
        let fake = Scripted::new(vec![Ok(30_000)]);
        let fx = Fixture::new(fake.clone());
        fx.engine.select("c1", OperationParams::AnimatedEncode).await.unwrap();
        fx.engine.submit_file("c1", vec![fx.file("trip.mp4", 500)]).await.unwrap();

        match fx.engine.decide("c1", Decision::Cancel).await.unwrap() {
            SubmitOutcome::Closed(paths) => assert_paths_gone(&paths),
            other => panic!("expected close, got {:?}", other),
        }
        assert_eq!(fx.engine.status("c1").await, None);
        assert_eq!(fx.job_dirs(), 0);
    }

    #[tokio::test]
    async fn test_close_during_transcode_discards_output() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let fake = Arc::new(Scripted {
            outputs: Mutex::new(VecDeque::from(vec![Ok(100)])),
            profiles: Mutex::new(Vec::new()),
            gate: Some((started.clone(), release.clone())),
        });
        let fx = Fixture::new(fake);
        fx.engine.select("c1", OperationParams::Crop).await.unwrap();

        let engine = fx.engine.clone();
        let file = fx.file("a.png", 100);
        let running = tokio::spawn(async move { engine.submit_file("c1", vec![file]).await });

        started.notified().await;
        assert!(matches!(
            fx.engine.select("c1", OperationParams::PaletteExtract).await,
            Err(ConvertError::SessionBusy)
        ));
        fx.engine.close("c1").await;
        release.notify_one();

        let result = running.await.unwrap();
        assert!(matches!(result, Err(ConvertError::Cancelled)));
        assert_eq!(fx.job_dirs(), 0);
        assert_eq!(fx.engine.status("c1").await, None);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let fake = Scripted::new(vec![Ok(30_000), Ok(100)]);
        let fx = Fixture::new(fake);
        fx.engine.select("a", OperationParams::AnimatedEncode).await.unwrap();
        fx.engine.select("b", OperationParams::Crop).await.unwrap();

        fx.engine.submit_file("a", vec![fx.file("x.mp4", 10)]).await.unwrap();
        let outcome = fx.engine.submit_file("b", vec![fx.file("y.png", 10)]).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Delivered(_)));
        assert_eq!(
            fx.engine.status("a").await,
            Some(SessionStatus::AwaitingOptimizationDecision)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_warned_then_closed() {
        let fake = Scripted::new(vec![Ok(30_000)]);
        let mut fx = Fixture::with_config(fake, |config| {
            config.idle_warning_secs = 120;
            config.idle_close_secs = 30;
        });
        fx.engine.select("c1", OperationParams::AnimatedEncode).await.unwrap();
        fx.engine.submit_file("c1", vec![fx.file("trip.mp4", 10)]).await.unwrap();
        assert_eq!(fx.job_dirs(), 1);

        assert_eq!(fx.events.recv().await, Some(SessionEvent::IdleWarning("c1".to_string())));
        match fx.events.recv().await {
            Some(SessionEvent::Expired { session, cleaned_paths }) => {
                assert_eq!(session, "c1");
                assert_paths_gone(&cleaned_paths);
            }
            other => panic!("expected expiry, got {:?}", other),
        }
        assert_eq!(fx.engine.status("c1").await, None);
        assert_eq!(fx.job_dirs(), 0);
    }
}
