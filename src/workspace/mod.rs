//! On-disk layout shared by all stages.
//!
//! ```text
//! <data_dir>/state/seen.log
//! <data_dir>/state/uploads.log
//! <data_dir>/state/youtube_token.json
//! <data_dir>/jobs/<job-id>/{article,script,audio,subtitles,video,upload}.json
//! ```
//!
//! Every file a stage produces is written to a temporary file in the same
//! directory and renamed into place, so readers only ever see complete files.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{Classify, ErrorCategory, Stage};
use crate::records::{
    ArticleRecord, AudioAsset, RenderedVideo, Script, StageRecord, SubtitleTrack, UploadRecord,
};
use crate::utils::sanitize_filename;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{what} is missing: expected {path}")]
    Missing { what: &'static str, path: PathBuf },

    #[error("malformed {what} at {path}: {source}")]
    Malformed {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {what} at {path}: {reason}")]
    Invalid {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },
}

impl Classify for WorkspaceError {
    fn category(&self) -> ErrorCategory {
        match self {
            WorkspaceError::Io(_) => ErrorCategory::Permanent,
            _ => ErrorCategory::Invariant,
        }
    }
}

pub type WorkspaceResult<T> = std::result::Result<T, WorkspaceError>;

/// Write `contents` to `path` atomically (temp file, fsync, rename)
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs_err::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Temporary file next to `path` for tools that write their own output.
///
/// The suffix is kept so tools that infer a format from the extension still
/// work. Call [`NamedTempFile::persist`] once the file is complete.
pub fn staging_file(path: &Path) -> std::io::Result<NamedTempFile> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs_err::create_dir_all(parent)?;

    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(&suffix)
        .tempfile_in(parent)
}

fn is_job_id(id: &str) -> bool {
    if id.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}

/// Root of all pipeline state
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory skeleton if needed
    pub fn ensure_layout(&self) -> WorkspaceResult<()> {
        fs_err::create_dir_all(self.state_dir())?;
        fs_err::create_dir_all(self.jobs_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn seen_log(&self) -> PathBuf {
        self.state_dir().join("seen.log")
    }

    pub fn uploads_log(&self) -> PathBuf {
        self.state_dir().join("uploads.log")
    }

    pub fn token_path(&self) -> PathBuf {
        self.state_dir().join("youtube_token.json")
    }

    pub fn job(&self, id: &str) -> JobDir {
        JobDir {
            id: id.to_string(),
            path: self.jobs_dir().join(id),
        }
    }

    /// Existing job named by an outside caller.
    ///
    /// The id must be a single directory name under `jobs/`; anything with a
    /// separator or a `.`/`..` component is refused.
    pub fn find_job(&self, id: &str) -> Option<JobDir> {
        if !is_job_id(id) {
            tracing::warn!("Refusing job id that is not a plain directory name: {:?}", id);
            return None;
        }

        let job = self.job(id);
        job.has::<ArticleRecord>().then_some(job)
    }

    /// Create a fresh job directory for an article title.
    ///
    /// The id is the sanitized title; a short random suffix is added when a
    /// different article already owns that directory.
    pub fn create_job(&self, title: &str) -> WorkspaceResult<JobDir> {
        let mut base = sanitize_filename(title);
        if base.is_empty() {
            base = "untitled".to_string();
        }

        let mut job = self.job(&base);
        if job.path.exists() {
            let suffix = &uuid::Uuid::new_v4().to_string()[..8];
            job = self.job(&format!("{}_{}", base, suffix));
        }

        fs_err::create_dir_all(&job.path)?;
        Ok(job)
    }

    /// All job directories that hold an article record, oldest first
    pub fn list_jobs(&self) -> WorkspaceResult<Vec<(JobDir, ArticleRecord)>> {
        let jobs_dir = self.jobs_dir();
        if !jobs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        for entry in fs_err::read_dir(&jobs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let id = entry.file_name().to_string_lossy().to_string();
            let job = self.job(&id);
            if !job.has::<ArticleRecord>() {
                tracing::warn!("Ignoring job directory without an article record: {}", job.path.display());
                continue;
            }

            let article = job.load::<ArticleRecord>()?;
            jobs.push((job, article));
        }

        jobs.sort_by(|a, b| {
            a.1.collected_at
                .cmp(&b.1.collected_at)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        Ok(jobs)
    }

    /// Oldest job that has not reached the end of the pipeline
    pub fn pending_job(&self) -> WorkspaceResult<Option<JobDir>> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .map(|(job, _)| job)
            .find(|job| job.next_stage().is_some()))
    }
}

/// Directory holding every artefact of one article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDir {
    pub id: String,
    pub path: PathBuf,
}

impl JobDir {
    pub fn record_path<R: StageRecord>(&self) -> PathBuf {
        self.path.join(R::FILE)
    }

    pub fn audio_file(&self) -> PathBuf {
        self.path.join("narration.mp3")
    }

    pub fn srt_file(&self) -> PathBuf {
        self.path.join("subtitles.srt")
    }

    pub fn video_file(&self) -> PathBuf {
        self.path.join("short.mp4")
    }

    pub fn has<R: StageRecord>(&self) -> bool {
        self.record_path::<R>().is_file()
    }

    /// Load and validate a record
    pub fn load<R: StageRecord>(&self) -> WorkspaceResult<R> {
        let path = self.record_path::<R>();
        if !path.is_file() {
            return Err(WorkspaceError::Missing { what: R::NAME, path });
        }

        let content = fs_err::read_to_string(&path)?;
        let record: R = serde_json::from_str(&content).map_err(|source| WorkspaceError::Malformed {
            what: R::NAME,
            path: path.clone(),
            source,
        })?;

        record
            .validate()
            .map_err(|reason| WorkspaceError::Invalid { what: R::NAME, path, reason })?;

        Ok(record)
    }

    /// Validate and atomically persist a record
    pub fn store<R: StageRecord>(&self, record: &R) -> WorkspaceResult<PathBuf> {
        let path = self.record_path::<R>();
        record.validate().map_err(|reason| WorkspaceError::Invalid {
            what: R::NAME,
            path: path.clone(),
            reason,
        })?;

        let json = serde_json::to_vec_pretty(record).map_err(|source| WorkspaceError::Malformed {
            what: R::NAME,
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    /// First stage whose output is still missing
    pub fn next_stage(&self) -> Option<Stage> {
        if !self.has::<ArticleRecord>() {
            Some(Stage::Collector)
        } else if !(self.has::<Script>() && self.has::<AudioAsset>()) {
            Some(Stage::Narrator)
        } else if !self.has::<SubtitleTrack>() {
            Some(Stage::Aligner)
        } else if !self.has::<RenderedVideo>() {
            Some(Stage::Composer)
        } else if !self.has::<UploadRecord>() {
            Some(Stage::Publisher)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::article;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("file.txt");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs_err::read_to_string(&path).unwrap(), "second");
        let leftovers = fs_err::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_store_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        ws.ensure_layout().unwrap();

        let job = ws.create_job("Mission to Batuu").unwrap();
        job.store(&article("Mission to Batuu")).unwrap();

        let loaded = job.load::<ArticleRecord>().unwrap();
        assert_eq!(loaded.id, "Mission to Batuu");
        assert_eq!(job.next_stage(), Some(Stage::Narrator));
    }

    #[test]
    fn test_store_rejects_invalid_record() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let job = ws.create_job("Empty").unwrap();

        let mut record = article("Empty");
        record.body = String::new();

        let err = job.store(&record).unwrap_err();
        assert!(matches!(err, WorkspaceError::Invalid { .. }));
        assert!(!job.has::<ArticleRecord>());
    }

    #[test]
    fn test_load_missing_record() {
        let dir = TempDir::new().unwrap();
        let job = Workspace::new(dir.path()).job("nope");

        let err = job.load::<Script>().unwrap_err();
        assert!(matches!(err, WorkspaceError::Missing { what: "script", .. }));
        assert_eq!(err.category(), ErrorCategory::Invariant);
    }

    #[test]
    fn test_find_job_stays_inside_jobs_dir() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        ws.ensure_layout().unwrap();

        let job = ws.create_job("Yoda").unwrap();
        job.store(&article("Yoda")).unwrap();
        assert_eq!(ws.find_job("Yoda").map(|j| j.id), Some("Yoda".to_string()));

        // a record planted next to jobs/ is reachable only through a relative id
        ws.job("../escape").store(&article("Escape")).unwrap();
        assert!(dir.path().join("escape").join("article.json").exists());

        for id in ["../escape", "..", ".", "", "jobs/../Yoda", "..\\escape", "/tmp/Yoda"] {
            assert!(ws.find_job(id).is_none(), "accepted {:?}", id);
        }
        assert!(ws.find_job("Nobody").is_none());
    }

    #[test]
    fn test_create_job_avoids_collisions() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());

        let first = ws.create_job("Kessel/Run").unwrap();
        let second = ws.create_job("Kessel/Run").unwrap();

        assert_eq!(first.id, "Kessel_Run");
        assert_ne!(first.id, second.id);
        assert!(second.id.starts_with("Kessel_Run_"));
    }

    #[test]
    fn test_pending_job_is_oldest_unfinished() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());

        let older = ws.create_job("Older").unwrap();
        let mut record = article("Older");
        record.collected_at = Utc::now() - Duration::hours(1);
        older.store(&record).unwrap();

        let newer = ws.create_job("Newer").unwrap();
        newer.store(&article("Newer")).unwrap();

        // a directory left behind before its article was written
        fs_err::create_dir_all(ws.jobs_dir().join("Orphan")).unwrap();

        assert_eq!(ws.list_jobs().unwrap().len(), 2);
        assert_eq!(ws.pending_job().unwrap(), Some(older));
    }
}
