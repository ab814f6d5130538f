//! The orchestrator: drives one job through the stages in order.
//!
//! A job's progress is whatever is on disk. The next stage is the first one
//! whose output is missing, so an interrupted run resumes where it stopped
//! and a finished stage is never repeated by `run`.

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

pub mod live;

use crate::collector::CollectOutcome;
use crate::error::{PipelineError, Stage, StageFailure};
use crate::records::{
    ArticleRecord, AudioAsset, RenderedVideo, Script, SubtitleTrack, UploadRecord,
};
use crate::state::{SeenSet, UploadLedger};
use crate::workspace::{JobDir, Workspace, WorkspaceError};

pub use live::LiveStages;

/// The five stage entry points
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StageSet: Send + Sync {
    async fn collect(&self, seen: &mut SeenSet, workspace: &Workspace) -> Result<CollectOutcome, StageFailure>;
    async fn narrate(&self, job: &JobDir) -> Result<(), StageFailure>;
    async fn align(&self, job: &JobDir) -> Result<(), StageFailure>;
    async fn compose(&self, job: &JobDir) -> Result<(), StageFailure>;
    async fn publish(&self, job: &JobDir, ledger: &mut UploadLedger) -> Result<(), StageFailure>;
}

/// Outcome of a complete run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job: JobDir,
    pub title: String,
    /// Stages executed by this run, in order
    pub stages: Vec<Stage>,
    pub upload: Option<UploadRecord>,
}

/// Whether `stage` has left its output in `job`
pub fn stage_completed(job: &JobDir, stage: Stage) -> bool {
    match stage {
        Stage::Collector => job.has::<ArticleRecord>(),
        Stage::Narrator => job.has::<Script>() && job.has::<AudioAsset>(),
        Stage::Aligner => job.has::<SubtitleTrack>(),
        Stage::Composer => job.has::<RenderedVideo>(),
        Stage::Publisher => job.has::<UploadRecord>(),
    }
}

pub struct Orchestrator {
    stages: Box<dyn StageSet>,
    workspace: Workspace,
    cancel: watch::Receiver<bool>,
    show_progress: bool,
}

impl Orchestrator {
    pub fn new(stages: Box<dyn StageSet>, workspace: Workspace, cancel: watch::Receiver<bool>) -> Self {
        Self {
            stages,
            workspace,
            cancel,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Resume the oldest unfinished job, or collect a new one, and drive it
    /// through publication
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        self.workspace.ensure_layout()?;

        let mut stages = Vec::new();
        let job = match self.workspace.pending_job()? {
            Some(job) => {
                tracing::info!("Resuming job '{}' at the {} stage", job.id, job.next_stage().unwrap_or(Stage::Publisher));
                job
            }
            None => {
                let job = self.collect().await?;
                stages.push(Stage::Collector);
                job
            }
        };

        while let Some(stage) = job.next_stage() {
            self.execute(stage, &job).await?;
            stages.push(stage);
        }

        let title = job.load::<ArticleRecord>()?.title;
        let upload = if job.has::<UploadRecord>() {
            Some(job.load::<UploadRecord>()?)
        } else {
            None
        };

        Ok(RunReport {
            job,
            title,
            stages,
            upload,
        })
    }

    /// Run the Collector once
    pub async fn collect(&self) -> Result<JobDir, PipelineError> {
        self.workspace.ensure_layout()?;

        let recovered: Vec<String> = self
            .workspace
            .list_jobs()?
            .into_iter()
            .map(|(_, article)| article.id)
            .collect();
        let mut seen = SeenSet::load(&self.workspace.seen_log(), recovered).map_err(WorkspaceError::from)?;

        let spinner = self.spinner(Stage::Collector, "new article");
        let outcome = self
            .guarded(Stage::Collector, self.stages.collect(&mut seen, &self.workspace))
            .await;
        spinner.finish_and_clear();

        match outcome? {
            CollectOutcome::Collected { article, job } => {
                tracing::info!("Collected '{}' into job '{}'", article.title, job.id);
                Ok(job)
            }
            CollectOutcome::Exhausted { attempts } => Err(PipelineError::Exhausted(format!(
                "no unseen article found in {} attempts",
                attempts
            ))),
        }
    }

    /// Run one stage for a job (the oldest unfinished one when `job_id` is `None`)
    pub async fn run_single(&self, stage: Stage, job_id: Option<&str>) -> Result<JobDir, PipelineError> {
        if stage == Stage::Collector {
            return self.collect().await;
        }

        let job = self.resolve_job(job_id)?;
        self.execute(stage, &job).await?;
        Ok(job)
    }

    /// Job named `id`, or the oldest unfinished job
    pub fn resolve_job(&self, id: Option<&str>) -> Result<JobDir, PipelineError> {
        match id {
            Some(id) => self
                .workspace
                .find_job(id)
                .ok_or_else(|| PipelineError::UnknownJob(id.to_string())),
            None => self
                .workspace
                .pending_job()?
                .ok_or_else(|| PipelineError::Exhausted("no unfinished job".to_string())),
        }
    }

    async fn execute(&self, stage: Stage, job: &JobDir) -> Result<(), PipelineError> {
        tracing::info!("Running {} for '{}'", stage, job.id);
        let spinner = self.spinner(stage, &job.id);

        let result = match stage {
            Stage::Collector => Err(PipelineError::UnknownJob(job.id.clone())),
            Stage::Narrator => self.guarded(stage, self.stages.narrate(job)).await,
            Stage::Aligner => self.guarded(stage, self.stages.align(job)).await,
            Stage::Composer => self.guarded(stage, self.stages.compose(job)).await,
            Stage::Publisher => {
                let mut ledger = UploadLedger::load(&self.workspace.uploads_log()).map_err(WorkspaceError::from)?;
                self.guarded(stage, self.stages.publish(job, &mut ledger)).await
            }
        };
        spinner.finish_and_clear();
        result?;

        if !stage_completed(job, stage) {
            return Err(PipelineError::NoProgress {
                stage,
                job: job.id.clone(),
            });
        }
        Ok(())
    }

    /// Run a stage future unless, or until, cancellation is requested
    async fn guarded<T, F>(&self, stage: Stage, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, StageFailure>>,
    {
        let mut cancel = self.cancel.clone();
        if *cancel.borrow() {
            return Err(PipelineError::Cancelled(stage));
        }

        tokio::select! {
            result = fut => result.map_err(PipelineError::from),
            _ = cancelled(&mut cancel) => {
                tracing::warn!("Cancelled during the {} stage", stage);
                Err(PipelineError::Cancelled(stage))
            }
        }
    }

    fn spinner(&self, stage: Stage, subject: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        progress.set_message(format!("{}: {}", stage, subject));
        progress.enable_steady_tick(Duration::from_millis(120));
        progress
    }
}

/// Resolves once the flag is set; never resolves if the sender is gone
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classify, ErrorCategory};
    use crate::records::{Privacy, RenderedVideo};
    use crate::test_support::{article, audio, script, track, write_bytes};
    use chrono::Utc;
    use tempfile::TempDir;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Fake(ErrorCategory);

    impl Classify for Fake {
        fn category(&self) -> ErrorCategory {
            self.0
        }
    }

    fn write_outputs(job: &JobDir, stage: Stage) {
        match stage {
            Stage::Narrator => {
                job.store(&script(&job.id, "Hello there.")).unwrap();
                job.store(&audio(job, 2.0)).unwrap();
            }
            Stage::Aligner => {
                job.store(&track(&job.id, 2.0, &[(0.0, 2.0, "Hello there.")])).unwrap();
            }
            Stage::Composer => {
                write_bytes(&job.video_file(), b"mp4");
                job.store(&RenderedVideo {
                    article_id: job.id.clone(),
                    path: job.video_file(),
                    duration_secs: 2.0,
                    width: 1080,
                    height: 1920,
                    fps: 30,
                    created_at: Utc::now(),
                })
                .unwrap();
            }
            Stage::Publisher => {
                job.store(&UploadRecord {
                    article_id: job.id.clone(),
                    video_id: "vid".into(),
                    title: job.id.clone(),
                    description: String::new(),
                    tags: Vec::new(),
                    privacy: Privacy::Private,
                    content_hash: "hash".into(),
                    uploaded_at: Utc::now(),
                })
                .unwrap();
            }
            Stage::Collector => {}
        }
    }

    /// Stages that write their outputs like the real ones would
    fn working_stages() -> MockStageSet {
        let mut stages = MockStageSet::new();
        stages.expect_collect().returning(|seen, workspace| {
            let job = workspace.create_job("Yoda").unwrap();
            let record = article("Yoda");
            job.store(&record).unwrap();
            seen.mark("Yoda").unwrap();
            Ok(CollectOutcome::Collected { article: record, job })
        });
        stages.expect_narrate().returning(|job| {
            write_outputs(job, Stage::Narrator);
            Ok(())
        });
        stages.expect_align().returning(|job| {
            write_outputs(job, Stage::Aligner);
            Ok(())
        });
        stages.expect_compose().returning(|job| {
            write_outputs(job, Stage::Composer);
            Ok(())
        });
        stages.expect_publish().returning(|job, _| {
            write_outputs(job, Stage::Publisher);
            Ok(())
        });
        stages
    }

    fn orchestrator(dir: &TempDir, stages: MockStageSet) -> (Orchestrator, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let orchestrator = Orchestrator::new(Box::new(stages), Workspace::new(dir.path()), rx);
        (orchestrator, tx)
    }

    #[tokio::test]
    async fn test_full_run_reaches_publication() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, _tx) = orchestrator(&dir, working_stages());

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.stages, Stage::ALL.to_vec());
        assert_eq!(report.title, "Yoda");
        assert_eq!(report.upload.unwrap().video_id, "vid");
        assert_eq!(report.job.next_stage(), None);
    }

    #[tokio::test]
    async fn test_run_resumes_unfinished_job() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let job = ws.create_job("Yoda").unwrap();
        job.store(&article("Yoda")).unwrap();
        write_outputs(&job, Stage::Narrator);

        let mut stages = MockStageSet::new();
        stages.expect_collect().never();
        stages.expect_narrate().never();
        stages.expect_align().times(1).returning(|job| {
            write_outputs(job, Stage::Aligner);
            Ok(())
        });
        stages.expect_compose().times(1).returning(|job| {
            write_outputs(job, Stage::Composer);
            Ok(())
        });
        stages.expect_publish().times(1).returning(|job, _| {
            write_outputs(job, Stage::Publisher);
            Ok(())
        });

        let (orchestrator, _tx) = orchestrator(&dir, stages);
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.stages, vec![Stage::Aligner, Stage::Composer, Stage::Publisher]);
    }

    #[tokio::test]
    async fn test_failure_stops_the_run() {
        let dir = TempDir::new().unwrap();
        let mut stages = MockStageSet::new();
        stages.expect_collect().returning(|_, workspace| {
            let job = workspace.create_job("Yoda").unwrap();
            let record = article("Yoda");
            job.store(&record).unwrap();
            Ok(CollectOutcome::Collected { article: record, job })
        });
        stages.expect_narrate().returning(|_| {
            Err(StageFailure::new(Stage::Narrator, Fake(ErrorCategory::Permanent)))
        });
        stages.expect_align().never();

        let (orchestrator, _tx) = orchestrator(&dir, stages);
        let err = orchestrator.run().await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Narrator));
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_collection() {
        let dir = TempDir::new().unwrap();
        let mut stages = MockStageSet::new();
        stages
            .expect_collect()
            .returning(|_, _| Ok(CollectOutcome::Exhausted { attempts: 30 }));

        let (orchestrator, _tx) = orchestrator(&dir, stages);
        let err = orchestrator.run().await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Exhausted);
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_stage_without_output_is_no_progress() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let job = ws.create_job("Yoda").unwrap();
        job.store(&article("Yoda")).unwrap();

        let mut stages = MockStageSet::new();
        stages.expect_narrate().returning(|_| Ok(()));

        let (orchestrator, _tx) = orchestrator(&dir, stages);
        let err = orchestrator.run_single(Stage::Narrator, Some("Yoda")).await.unwrap_err();

        assert!(matches!(err, PipelineError::NoProgress { stage: Stage::Narrator, .. }));
    }

    #[tokio::test]
    async fn test_cancel_before_stage() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let job = ws.create_job("Yoda").unwrap();
        job.store(&article("Yoda")).unwrap();

        let mut stages = MockStageSet::new();
        stages.expect_narrate().never();

        let (orchestrator, tx) = orchestrator(&dir, stages);
        tx.send(true).unwrap();

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled(Stage::Narrator)));
        assert_eq!(err.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_stage() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = watch::channel(false);
        let orchestrator = Orchestrator::new(Box::new(MockStageSet::new()), Workspace::new(dir.path()), rx);

        let slow = async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), StageFailure>(())
        };
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };

        let (result, _) = tokio::join!(orchestrator.guarded(Stage::Composer, slow), cancel);
        assert!(matches!(result, Err(PipelineError::Cancelled(Stage::Composer))));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, _tx) = orchestrator(&dir, MockStageSet::new());

        let err = orchestrator.run_single(Stage::Aligner, Some("Nobody")).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownJob(_)));
    }

    #[tokio::test]
    async fn test_job_id_cannot_leave_jobs_dir() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        ws.ensure_layout().unwrap();
        ws.job("../outside").store(&article("Outside")).unwrap();

        // no expectations: any stage call fails the test
        let (orchestrator, _tx) = orchestrator(&dir, MockStageSet::new());

        let err = orchestrator.run_single(Stage::Narrator, Some("../outside")).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownJob(ref id) if id == "../outside"));
        assert_eq!(err.exit_code(), 1);
    }
}
