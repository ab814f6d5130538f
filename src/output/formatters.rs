use crate::records::SubtitleTrack;

/// Format seconds as an SRT timestamp (`HH:MM:SS,mmm`)
pub fn format_srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;
    format!("{:02}:{:02}:{:02},{:03}", hours, mins, secs, ms)
}

/// Render a subtitle track as SubRip text
pub fn format_as_srt(track: &SubtitleTrack) -> String {
    track
        .segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            format!(
                "{}\n{} --> {}\n{}\n\n",
                i + 1,
                format_srt_timestamp(segment.start),
                format_srt_timestamp(segment.end),
                segment.text
            )
        })
        .collect()
}
