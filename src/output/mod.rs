use console::style;

use crate::error::{ErrorCategory, PipelineError};
use crate::pipeline::RunReport;
use crate::records::{ArticleRecord, RenderedVideo, UploadRecord};
use crate::utils::{format_duration, format_file_size};
use crate::workspace::JobDir;

pub mod formatters;

pub use formatters::*;

/// One row of the `status` listing
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub id: String,
    pub title: String,
    /// `None` once the job is published
    pub next: Option<String>,
    pub video: Option<String>,
    pub video_id: Option<String>,
}

impl JobStatus {
    pub fn from_job(job: &JobDir, article: &ArticleRecord) -> Self {
        let video = job.load::<RenderedVideo>().ok().map(|v| {
            let size = fs_err::metadata(&v.path).map(|m| m.len()).unwrap_or(0);
            format!("{}, {}", format_duration(v.duration_secs), format_file_size(size))
        });

        Self {
            id: job.id.clone(),
            title: article.title.clone(),
            next: job.next_stage().map(|s| s.to_string()),
            video,
            video_id: job.load::<UploadRecord>().ok().map(|u| u.video_id),
        }
    }
}

/// Plain-text table of jobs, oldest first
pub fn format_status_table(rows: &[JobStatus]) -> String {
    if rows.is_empty() {
        return "No jobs yet.".to_string();
    }

    let width = rows.iter().map(|r| r.id.chars().count()).max().unwrap_or(0).max(3);
    let mut lines = vec![format!("{:<width$}  {:<10}  {}", "JOB", "NEXT", "DETAILS", width = width)];

    for row in rows {
        let next = row.next.as_deref().unwrap_or("done");
        let details = match (&row.video_id, &row.video) {
            (Some(id), _) => format!("published as {}", id),
            (None, Some(video)) => format!("video {}", video),
            (None, None) if row.title != row.id => row.title.clone(),
            _ => String::new(),
        };
        lines.push(
            format!("{:<width$}  {:<10}  {}", row.id, next, details, width = width)
                .trim_end()
                .to_string(),
        );
    }

    lines.join("\n")
}

pub fn print_status(rows: &[JobStatus]) {
    println!("{}", format_status_table(rows));
}

pub fn print_run_summary(report: &RunReport) {
    let stages: Vec<String> = report.stages.iter().map(|s| s.to_string()).collect();
    println!("{} {}", style("✓").green().bold(), style(&report.title).bold());

    if stages.is_empty() {
        println!("  Nothing left to do for {}", report.job.path.display());
    } else {
        println!("  Stages run: {}", stages.join(" → "));
    }

    if let Some(upload) = &report.upload {
        println!("  Video id:   {} ({})", upload.video_id, upload.privacy.as_str());
    }
}

pub fn print_failure(err: &PipelineError) {
    let label = match err.category() {
        ErrorCategory::Exhausted => style("Nothing to do").yellow(),
        ErrorCategory::Cancelled => style("Cancelled").yellow(),
        _ => style("Failed").red().bold(),
    };
    eprintln!("{}: {}", label, err);
}
