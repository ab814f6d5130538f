//! Durable cross-run state: the seen set and the upload ledger.
//!
//! Both are append-only files. Each append is flushed to disk before the
//! call returns.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::records::UploadRecord;

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }

    let mut file = fs_err::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", line)?;
    file.sync_data()?;
    Ok(())
}

/// Identifiers of articles that have already been collected
#[derive(Debug)]
pub struct SeenSet {
    path: PathBuf,
    ids: HashSet<String>,
}

impl SeenSet {
    /// Read the log at `path`, merged with ids recovered from existing jobs.
    ///
    /// Merging job ids covers a crash between persisting an article record
    /// and appending its id to the log.
    pub fn load(path: &Path, recovered: impl IntoIterator<Item = String>) -> std::io::Result<Self> {
        let mut ids = HashSet::new();

        if path.exists() {
            let content = fs_err::read_to_string(path)?;
            ids.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }

        let logged = ids.len();
        let mut set = Self {
            path: path.to_path_buf(),
            ids,
        };

        for id in recovered {
            if !set.ids.contains(&id) {
                tracing::warn!("Recovering unlogged article from job directory: {}", id);
                set.mark(&id)?;
            }
        }

        tracing::debug!("Loaded {} seen articles ({} from log)", set.ids.len(), logged);
        Ok(set)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Record `id` durably. Marking an id twice is a no-op.
    pub fn mark(&mut self, id: &str) -> std::io::Result<()> {
        if self.ids.contains(id) {
            return Ok(());
        }
        append_line(&self.path, id)?;
        self.ids.insert(id.to_string());
        Ok(())
    }
}

/// Ledger of confirmed uploads, keyed by content hash
#[derive(Debug)]
pub struct UploadLedger {
    path: PathBuf,
    records: Vec<UploadRecord>,
}

impl UploadLedger {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let mut records = Vec::new();

        if path.exists() {
            let content = fs_err::read_to_string(path)?;
            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<UploadRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!(
                        "Skipping malformed upload ledger line {} in {}: {}",
                        index + 1,
                        path.display(),
                        e
                    ),
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn find_by_hash(&self, content_hash: &str) -> Option<&UploadRecord> {
        self.records.iter().find(|r| r.content_hash == content_hash)
    }

    pub fn records(&self) -> &[UploadRecord] {
        &self.records
    }

    pub fn append(&mut self, record: UploadRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(&record).map_err(std::io::Error::other)?;
        append_line(&self.path, &line)?;
        self.records.push(record);
        Ok(())
    }
}
