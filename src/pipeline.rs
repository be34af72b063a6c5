//! Pipeline and loop controller.
//!
//! Per staged file the controller walks
//! `Gating → Claiming → Extracting → Classifying → Routing → Recording` and
//! ends in one [`FileOutcome`]. A failure in one file is logged and counted;
//! the cycle always moves on to the next file.
//!
//! [`Pipeline`] is immutable and shared across worker tasks. The
//! [`LoopController`] owns the scan loop, the [`StabilityGate`] and the
//! shutdown flag, which is checked only between files so an in-flight move
//! is always finished.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::classify::Classifier;
use crate::config::{Config, TransferMode};
use crate::error::{ErrorKind, ExtractionError, ProcessError, StartupError};
use crate::extract::{self, ExtractedText};
use crate::ledger::{ClaimOutcome, Completion, Ledger, SqliteLedger};
use crate::lexicon::Lexicon;
use crate::models::{ClassificationResult, DocumentRecord, Fingerprint, RecordStatus};
use crate::recorder::MetadataRecorder;
use crate::router::Router;
use crate::stability::{Readiness, StabilityGate};
use crate::staging::{self, StagedFile};

/// Why a file was left alone this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotStable,
    Vanished,
    /// Another worker or instance holds the claim.
    ClaimedElsewhere,
    /// Already archived; the staged copy is kept (copy mode).
    AlreadyProcessed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotStable => "not_stable",
            SkipReason::Vanished => "vanished",
            SkipReason::ClaimedElsewhere => "claimed_elsewhere",
            SkipReason::AlreadyProcessed => "already_processed",
        }
    }

    /// Taxonomy kind behind the skip; `None` for ordinary bookkeeping.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SkipReason::Vanished => Some(ErrorKind::TransientIo),
            SkipReason::ClaimedElsewhere => Some(ErrorKind::LedgerContention),
            SkipReason::NotStable | SkipReason::AlreadyProcessed => None,
        }
    }
}

/// Terminal state of one file in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Completed {
        status: RecordStatus,
        destination: PathBuf,
    },
    /// Dry run: where the file would have gone.
    Planned {
        status: RecordStatus,
        destination: PathBuf,
    },
    Skipped(SkipReason),
    Failed {
        kind: ErrorKind,
        error: String,
    },
}

/// Immutable per-instance processing state.
pub struct Pipeline {
    config: Config,
    classifier: Classifier,
    router: Router,
    recorder: MetadataRecorder,
    ledger: Arc<dyn Ledger>,
    worker_id: String,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(config: Config, lexicon: Arc<Lexicon>, ledger: Arc<dyn Ledger>) -> Self {
        let classifier = Classifier::new(lexicon, config.classifier.filename_weight);
        let router = Router::from_config(&config);
        let recorder = MetadataRecorder::new(config.metadata_log_path());
        Self {
            config,
            classifier,
            router,
            recorder,
            ledger,
            worker_id: Uuid::new_v4().to_string(),
            dry_run: false,
        }
    }

    /// Validate the configuration, load the lexicon and open the shared
    /// SQLite ledger. Any failure here is a startup failure.
    pub async fn open(config: Config) -> Result<Self, StartupError> {
        Ok(Self::open_inner(config).await?)
    }

    async fn open_inner(config: Config) -> Result<Self> {
        config.validate()?;
        if !config.paths.archive.is_dir() {
            bail!(
                "Archive root does not exist: {} (run `docsort init`)",
                config.paths.archive.display()
            );
        }
        let lexicon = Lexicon::load_or_builtin(config.paths.lexicon.as_deref())
            .context("Failed to load lexicon")?;
        let ledger = SqliteLedger::open(
            &config.ledger_path(),
            Duration::from_secs(config.ledger.reclaim_timeout_secs),
        )
        .await?;
        Ok(Self::new(config, Arc::new(lexicon), Arc::new(ledger)))
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Process a file the stability gate has admitted.
    pub async fn process(&self, file: &StagedFile) -> FileOutcome {
        let span = tracing::info_span!("file", path = %file.relative);
        async {
            match self.try_process(file).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_vanished() => {
                    tracing::debug!("file vanished before it could be read");
                    FileOutcome::Skipped(SkipReason::Vanished)
                }
                Err(e) if e.kind() == ErrorKind::LedgerContention => {
                    tracing::debug!(error = %e, "ledger busy; retrying next cycle");
                    FileOutcome::Skipped(SkipReason::ClaimedElsewhere)
                }
                Err(e) => {
                    tracing::warn!(error = %e, kind = %e.kind(), "file processing failed");
                    FileOutcome::Failed {
                        kind: e.kind(),
                        error: e.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn try_process(&self, file: &StagedFile) -> Result<FileOutcome, ProcessError> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| ProcessError::io(&file.path, e))?;
        let fp = Fingerprint::of_bytes(&bytes);
        let source = file.path.display().to_string();
        tracing::debug!(fingerprint = %fp.short(), size = bytes.len(), "read staged file");

        if self.dry_run {
            if self.ledger.is_processed(&fp).await.map_err(ProcessError::Ledger)? {
                return Ok(self.plan_duplicate(file));
            }
            let analysis = self.analyze(file, bytes).await;
            let destination =
                self.router
                    .destination(analysis.status, &analysis.classification, &file.file_name());
            return Ok(FileOutcome::Planned {
                status: analysis.status,
                destination,
            });
        }

        match self
            .ledger
            .claim(&fp, &self.worker_id, &source)
            .await
            .map_err(ProcessError::Ledger)?
        {
            ClaimOutcome::Granted { reclaimed } => {
                if reclaimed {
                    tracing::info!(fingerprint = %fp.short(), "reclaimed released or stale claim");
                }
            }
            ClaimOutcome::AlreadyClaimed { owner } => {
                tracing::debug!(fingerprint = %fp.short(), owner = %owner, "claimed by another worker");
                return Ok(FileOutcome::Skipped(SkipReason::ClaimedElsewhere));
            }
            ClaimOutcome::AlreadyProcessed(_) => {
                return self.archive_duplicate(file, &fp, bytes.len() as u64).await;
            }
        }

        let size_bytes = bytes.len() as u64;
        let analysis = self.analyze(file, bytes).await;
        let planned =
            self.router
                .destination(analysis.status, &analysis.classification, &file.file_name());

        let placed = match self.place(&file.path, &planned).await {
            Ok(p) => p,
            Err(e) => {
                // Give the claim back so the next cycle can retry at once.
                if let Err(release_err) = self.ledger.release(&fp, &self.worker_id).await {
                    tracing::warn!(error = %release_err, "failed to release claim");
                }
                return Err(e);
            }
        };

        let record = self.build_record(&fp, file, &placed, size_bytes, analysis);
        let status = record.status;

        if let Err(e) = self.recorder.append(&record) {
            tracing::error!(
                fingerprint = %fp.short(),
                destination = %placed.display(),
                error = %e,
                "archived but metadata append failed"
            );
            let completion = Completion::Failed(format!("metadata append failed: {:#}", e));
            let dest = placed.display().to_string();
            if let Err(le) = self
                .ledger
                .complete(&fp, &self.worker_id, &completion, Some(&dest))
                .await
            {
                tracing::error!(error = %le, "failed to mark fingerprint failed");
            }
            return Err(ProcessError::Recorder(e));
        }

        let dest = placed.display().to_string();
        if let Err(e) = self
            .ledger
            .complete(&fp, &self.worker_id, &Completion::Recorded(status), Some(&dest))
            .await
        {
            // The record is durable. If the claim went stale and was taken
            // over, the new owner completes it; `audit` reports a second record.
            tracing::warn!(fingerprint = %fp.short(), error = %e, "claim lost before completion");
        }

        tracing::info!(
            fingerprint = %fp.short(),
            status = %status,
            destination = %placed.display(),
            "archived"
        );
        Ok(FileOutcome::Completed {
            status,
            destination: placed,
        })
    }

    /// Extract and classify. Never fails: extraction errors become an
    /// `extraction_error` analysis with all labels `unknown`.
    async fn analyze(&self, file: &StagedFile, bytes: Vec<u8>) -> Analysis {
        let content_type = extract::content_type_for(&file.path);
        let file_name = file.file_name();
        match extract::extract_async(bytes, content_type, self.config.classifier.head_pages).await
        {
            Ok(extracted) => {
                tracing::debug!(
                    pages_read = extracted.pages_read,
                    page_count = extracted.page_count,
                    "extracted leading pages"
                );
                let classification = self.classifier.classify(&extracted.text, &file_name);
                let status = self.router.status_for(&classification);
                Analysis::from_text(&extracted, &file_name, classification, status)
            }
            Err(e) => {
                tracing::warn!(error = %e, "extraction failed");
                Analysis::from_error(&file_name, e)
            }
        }
    }

    async fn place(&self, source: &Path, planned: &Path) -> Result<PathBuf, ProcessError> {
        let router = self.router.clone();
        let src = source.to_path_buf();
        let dst = planned.to_path_buf();
        let joined = tokio::task::spawn_blocking(move || router.place(&src, &dst)).await;
        match joined {
            Ok(result) => result.map_err(|e| ProcessError::io(source, e)),
            Err(e) => Err(ProcessError::io(source, std::io::Error::other(e.to_string()))),
        }
    }

    fn plan_duplicate(&self, file: &StagedFile) -> FileOutcome {
        match self.router.transfer() {
            TransferMode::Copy => FileOutcome::Skipped(SkipReason::AlreadyProcessed),
            TransferMode::Move => FileOutcome::Planned {
                status: RecordStatus::Duplicate,
                destination: self.router.destination(
                    RecordStatus::Duplicate,
                    &ClassificationResult::unknown(),
                    &file.file_name(),
                ),
            },
        }
    }

    /// A staged file whose content is already archived. Move mode clears it
    /// out of staging into the duplicates bucket; copy mode leaves it.
    async fn archive_duplicate(
        &self,
        file: &StagedFile,
        fp: &Fingerprint,
        size_bytes: u64,
    ) -> Result<FileOutcome, ProcessError> {
        if self.router.transfer() == TransferMode::Copy {
            tracing::debug!(fingerprint = %fp.short(), "already processed");
            return Ok(FileOutcome::Skipped(SkipReason::AlreadyProcessed));
        }

        let unknown = ClassificationResult::unknown();
        let planned = self
            .router
            .destination(RecordStatus::Duplicate, &unknown, &file.file_name());
        let placed = self.place(&file.path, &planned).await?;

        let analysis = Analysis {
            title_guess: fallback_title(&file.file_name()),
            language_guess: "unknown".to_string(),
            page_count: 0,
            classification: unknown,
            status: RecordStatus::Duplicate,
            error: None,
        };
        let record = self.build_record(fp, file, &placed, size_bytes, analysis);
        self.recorder.append(&record).map_err(ProcessError::Recorder)?;

        tracing::info!(
            fingerprint = %fp.short(),
            destination = %placed.display(),
            "duplicate moved out of staging"
        );
        Ok(FileOutcome::Completed {
            status: RecordStatus::Duplicate,
            destination: placed,
        })
    }

    fn build_record(
        &self,
        fp: &Fingerprint,
        file: &StagedFile,
        placed: &Path,
        size_bytes: u64,
        analysis: Analysis,
    ) -> DocumentRecord {
        let c = analysis.classification;
        let (error_reason, error) = match analysis.error {
            Some(e) => (Some(e.tag().to_string()), Some(e.to_string())),
            None => (None, None),
        };
        DocumentRecord {
            fingerprint: fp.clone(),
            source_path: file.path.display().to_string(),
            destination_path: placed.display().to_string(),
            status: analysis.status,
            vendor: c.vendor.label.clone(),
            document_type: c.document_type.label.clone(),
            topic: c.topic.label.clone(),
            topology: c.topology.label.clone(),
            aggregate_confidence: c.aggregate_confidence,
            classification: c,
            title_guess: analysis.title_guess,
            language_guess: analysis.language_guess,
            page_count: analysis.page_count,
            size_bytes,
            lexicon_version: self.classifier.lexicon().version().to_string(),
            error_kind: analysis.status.error_kind(),
            error_reason,
            error,
            worker: self.worker_id.clone(),
            processed_at: Utc::now(),
        }
    }
}

/// Result of extract + classify for one file.
struct Analysis {
    classification: ClassificationResult,
    status: RecordStatus,
    title_guess: String,
    language_guess: String,
    page_count: usize,
    error: Option<ExtractionError>,
}

impl Analysis {
    fn from_text(
        extracted: &ExtractedText,
        file_name: &str,
        classification: ClassificationResult,
        status: RecordStatus,
    ) -> Self {
        Self {
            title_guess: extract::guess_title(&extracted.text, file_name),
            language_guess: extract::guess_language(&extracted.text).to_string(),
            page_count: extracted.page_count,
            classification,
            status,
            error: None,
        }
    }

    fn from_error(file_name: &str, error: ExtractionError) -> Self {
        Self {
            classification: ClassificationResult::unknown(),
            status: RecordStatus::ExtractionError,
            title_guess: fallback_title(file_name),
            language_guess: "unknown".to_string(),
            page_count: 0,
            error: Some(error),
        }
    }
}

fn fallback_title(file_name: &str) -> String {
    extract::guess_title("", file_name)
}

/// Per-cycle tallies.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub not_stable: usize,
    pub vanished: usize,
    pub classified: usize,
    pub low_confidence: usize,
    pub extraction_errors: usize,
    pub duplicates: usize,
    pub planned: usize,
    pub claimed_elsewhere: usize,
    pub already_processed: usize,
    pub failed: usize,
    /// Files not started because shutdown was requested.
    pub deferred: usize,
}

impl CycleReport {
    pub fn tally(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Completed { status, .. } => match status {
                RecordStatus::Classified => self.classified += 1,
                RecordStatus::LowConfidence => self.low_confidence += 1,
                RecordStatus::ExtractionError => self.extraction_errors += 1,
                RecordStatus::Duplicate => self.duplicates += 1,
            },
            FileOutcome::Planned { .. } => self.planned += 1,
            FileOutcome::Skipped(reason) => match reason {
                SkipReason::NotStable => self.not_stable += 1,
                SkipReason::Vanished => self.vanished += 1,
                SkipReason::ClaimedElsewhere => self.claimed_elsewhere += 1,
                SkipReason::AlreadyProcessed => self.already_processed += 1,
            },
            FileOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Files that reached the archive this cycle.
    pub fn archived(&self) -> usize {
        self.classified + self.low_confidence + self.extraction_errors + self.duplicates
    }

    /// Fold another cycle's outcomes into this one. `scanned` keeps the
    /// larger value since both cycles saw the same staging tree.
    pub fn absorb(&mut self, other: &CycleReport) {
        self.scanned = self.scanned.max(other.scanned);
        self.vanished += other.vanished;
        self.classified += other.classified;
        self.low_confidence += other.low_confidence;
        self.extraction_errors += other.extraction_errors;
        self.duplicates += other.duplicates;
        self.planned += other.planned;
        self.claimed_elsewhere += other.claimed_elsewhere;
        self.already_processed += other.already_processed;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.not_stable = other.not_stable;
    }

    pub fn print_summary(&self, title: &str) {
        println!("{}", title);
        println!("  scanned: {}", self.scanned);
        println!("  classified: {}", self.classified);
        println!("  low confidence: {}", self.low_confidence);
        println!("  extraction errors: {}", self.extraction_errors);
        println!("  duplicates: {}", self.duplicates);
        if self.planned > 0 {
            println!("  planned (dry-run): {}", self.planned);
        }
        println!("  not yet stable: {}", self.not_stable);
        println!("  skipped: {}", self.skipped());
        println!("  failed: {}", self.failed);
        if self.deferred > 0 {
            println!("  deferred by shutdown: {}", self.deferred);
        }
        println!("ok");
    }

    fn skipped(&self) -> usize {
        self.vanished + self.claimed_elsewhere + self.already_processed
    }
}

pub struct LoopController {
    pipeline: Arc<Pipeline>,
    gate: StabilityGate,
    shutdown: Arc<AtomicBool>,
}

impl LoopController {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let gate = StabilityGate::new(Duration::from_secs(pipeline.config().watch.stable_secs));
        Self {
            pipeline,
            gate,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set to `true` to stop at the next file boundary.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// One scan of the staging area.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let config = self.pipeline.config();
        let files = staging::scan_staging(config)?;
        let mut report = CycleReport {
            scanned: files.len(),
            ..Default::default()
        };

        let paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        self.gate.retain_paths(&paths);

        let mut ready = Vec::new();
        for file in files {
            match self.gate.observe(&file.path) {
                Readiness::Ready => ready.push(file),
                Readiness::NotYet => report.tally(&FileOutcome::Skipped(SkipReason::NotStable)),
                Readiness::Vanished => report.tally(&FileOutcome::Skipped(SkipReason::Vanished)),
            }
        }

        let workers = config.watch.workers.max(1);
        let mut queue = ready.into_iter();
        let mut in_flight: JoinSet<(StagedFile, FileOutcome)> = JoinSet::new();

        loop {
            while in_flight.len() < workers && !self.stopping() {
                let Some(file) = queue.next() else {
                    break;
                };
                let pipeline = self.pipeline.clone();
                in_flight.spawn(async move {
                    let outcome = pipeline.process(&file).await;
                    (file, outcome)
                });
            }

            match in_flight.join_next().await {
                Some(Ok((file, outcome))) => {
                    if let FileOutcome::Skipped(reason) = &outcome {
                        if let Some(kind) = reason.kind() {
                            tracing::debug!(
                                path = %file.relative,
                                reason = reason.as_str(),
                                kind = %kind,
                                "file skipped"
                            );
                        }
                    }
                    if matches!(
                        outcome,
                        FileOutcome::Completed { .. } | FileOutcome::Skipped(SkipReason::Vanished)
                    ) {
                        self.gate.forget(&file.path);
                    }
                    report.tally(&outcome);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "worker task aborted");
                    report.failed += 1;
                }
                None => break,
            }
        }

        report.deferred = queue.count();
        if report.deferred > 0 {
            tracing::info!(deferred = report.deferred, "shutdown requested; leaving remaining files");
        }

        Ok(report)
    }

    /// Priming pass, wait out the stability interval, then a processing pass.
    pub async fn run_once(&mut self) -> Result<CycleReport> {
        let mut report = self.run_cycle().await?;
        if self.stopping() {
            return Ok(report);
        }
        self.sleep_unless_stopped(self.gate.min_interval()).await;
        if self.stopping() {
            return Ok(report);
        }
        let second = self.run_cycle().await?;
        report.absorb(&second);
        Ok(report)
    }

    /// Scan until shutdown is requested.
    pub async fn run(&mut self) -> Result<CycleReport> {
        let interval = Duration::from_secs(self.pipeline.config().watch.scan_interval_secs);
        let mut totals = CycleReport::default();
        let mut cycle = 0u64;

        while !self.stopping() {
            cycle += 1;
            match self.run_cycle().await {
                Ok(report) => {
                    tracing::info!(
                        cycle,
                        scanned = report.scanned,
                        archived = report.archived(),
                        not_stable = report.not_stable,
                        tracked = self.gate.tracked(),
                        failed = report.failed,
                        "scan cycle finished"
                    );
                    totals.absorb(&report);
                }
                // A missing staging dir (e.g. an unmounted share) is retried.
                Err(e) => {
                    let error = format!("{:#}", e);
                    tracing::error!(cycle, error = %error, "scan cycle failed");
                }
            }
            self.sleep_unless_stopped(interval).await;
        }

        tracing::info!(cycles = cycle, "loop stopped");
        Ok(totals)
    }

    async fn sleep_unless_stopped(&self, total: Duration) {
        let tick = Duration::from_millis(200);
        let mut waited = Duration::ZERO;
        while waited < total && !self.stopping() {
            tokio::time::sleep(tick.min(total - waited)).await;
            waited += tick;
        }
    }
}
