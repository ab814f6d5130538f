//! Fixtures shared by unit tests.

use chrono::Utc;
use std::path::Path;

use crate::records::{ArticleRecord, AudioAsset, Script, SubtitleSegment, SubtitleTrack};
use crate::utils::word_count;
use crate::workspace::JobDir;

pub fn article(id: &str) -> ArticleRecord {
    ArticleRecord {
        id: id.to_string(),
        title: id.to_string(),
        url: format!("https://example.org/wiki/{}", id),
        body: "Some body text.".to_string(),
        sections: Vec::new(),
        infobox: None,
        appearances: Vec::new(),
        image_urls: Vec::new(),
        categories: Vec::new(),
        category: "Uncategorized".to_string(),
        collected_at: Utc::now(),
    }
}

pub fn script(article_id: &str, text: &str) -> Script {
    Script {
        article_id: article_id.to_string(),
        text: text.to_string(),
        word_count: word_count(text),
        word_limit: 150,
        attempts: 1,
        truncated: false,
        created_at: Utc::now(),
    }
}

/// Write a fake audio file into the job and return its asset record
pub fn audio(job: &JobDir, duration_secs: f64) -> AudioAsset {
    let path = job.audio_file();
    write_bytes(&path, b"ID3 fake mp3 payload");
    AudioAsset {
        article_id: job.id.clone(),
        path,
        duration_secs,
        voice: "en-US-Wavenet-D".to_string(),
        created_at: Utc::now(),
    }
}

pub fn track(article_id: &str, duration: f64, segments: &[(f64, f64, &str)]) -> SubtitleTrack {
    SubtitleTrack {
        article_id: article_id.to_string(),
        audio_duration_secs: duration,
        segments: segments
            .iter()
            .map(|(start, end, text)| SubtitleSegment {
                start: *start,
                end: *end,
                text: text.to_string(),
            })
            .collect(),
        fallback_spans: Vec::new(),
    }
}

pub fn write_bytes(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent).unwrap();
    }
    fs_err::write(path, bytes).unwrap();
}

/// `count` words of filler text
pub fn words(count: usize) -> String {
    (0..count)
        .map(|i| format!("word{}", i))
        .collect::<Vec<_>>()
        .join(" ")
}
