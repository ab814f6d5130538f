use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::plan::{wrap_text, RenderPlan};
use super::VideoRenderer;
use crate::media::{run_tool, ToolError};

/// Font size as a share of the frame height
const TITLE_FONT_SCALE: f64 = 0.055;
const CAPTION_FONT_SCALE: f64 = 0.05;

/// Distance of the caption baseline block from the bottom edge
const CAPTION_BOTTOM_MARGIN: f64 = 0.18;

/// Average glyph width as a share of the font size, for wrapping
const GLYPH_WIDTH: f64 = 0.55;

/// [`VideoRenderer`] that drives ffmpeg with a single filter graph
pub struct FfmpegRenderer {
    program: String,
    timeout: Duration,
}

impl FfmpegRenderer {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl VideoRenderer for FfmpegRenderer {
    async fn render(&self, plan: &RenderPlan, output: &Path) -> Result<(), ToolError> {
        let scratch = tempfile::Builder::new()
            .prefix("holocron-render-")
            .tempdir()
            .map_err(|source| ToolError::Io {
                program: self.program.clone(),
                source,
            })?;

        let text_files = write_text_files(plan, scratch.path()).map_err(|source| ToolError::Io {
            program: self.program.clone(),
            source,
        })?;

        let args = build_args(plan, &text_files, output);
        tracing::debug!("ffmpeg arguments: {}", args.join(" "));

        run_tool(&self.program, &args, self.timeout).await?;
        Ok(())
    }
}

/// Title and caption text handed to drawtext through files
#[derive(Debug, Clone, PartialEq)]
pub struct TextFiles {
    pub title: PathBuf,
    pub title_lines: usize,
    pub captions: Vec<PathBuf>,
}

fn chars_per_line(width: u32, font_size: u32, share: f64) -> usize {
    let usable = f64::from(width) * share;
    ((usable / (f64::from(font_size) * GLYPH_WIDTH)) as usize).max(8)
}

fn title_font_size(plan: &RenderPlan) -> u32 {
    (f64::from(plan.height) * TITLE_FONT_SCALE) as u32
}

fn caption_font_size(plan: &RenderPlan) -> u32 {
    (f64::from(plan.height) * CAPTION_FONT_SCALE) as u32
}

/// Write wrapped title and caption text into `dir`
pub fn write_text_files(plan: &RenderPlan, dir: &Path) -> std::io::Result<TextFiles> {
    let title_lines = wrap_text(&plan.title, chars_per_line(plan.width, title_font_size(plan), 0.85));
    let title = dir.join("title.txt");
    fs_err::write(&title, title_lines.join("\n"))?;

    let caption_width = chars_per_line(plan.width, caption_font_size(plan), 0.9);
    let mut captions = Vec::with_capacity(plan.captions.len());
    for (i, caption) in plan.captions.iter().enumerate() {
        let path = dir.join(format!("caption_{:04}.txt", i));
        fs_err::write(&path, wrap_text(&caption.text, caption_width).join("\n"))?;
        captions.push(path);
    }

    Ok(TextFiles {
        title,
        title_lines: title_lines.len().max(1),
        captions,
    })
}

/// Quote a value for use inside a filter graph
fn quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn font_option(plan: &RenderPlan) -> String {
    plan.font
        .as_ref()
        .map(|font| format!("fontfile={}:", quoted(&path_arg(font))))
        .unwrap_or_default()
}

/// The `-filter_complex` graph: background crop and scale, title, images,
/// then captions, ending in the `[v]` pad
pub fn filter_graph(plan: &RenderPlan, text: &TextFiles) -> String {
    let (w, h) = (plan.width, plan.height);
    let hf = f64::from(h);
    let font = font_option(plan);
    let title_size = title_font_size(plan);
    let caption_size = caption_font_size(plan);

    let mut graph = String::new();

    let _ = write!(
        graph,
        "[0:v]crop='min(iw,ih*{w}/{h})':'min(ih,iw*{h}/{w})',scale={w}:{h},setsar=1,fps={fps},\
         drawtext={font}textfile={title}:expansion=none:fontsize={title_size}:fontcolor=white:\
         line_spacing=8:x=(w-text_w)/2:y={title_y}[base]",
        w = w,
        h = h,
        fps = plan.fps,
        font = font,
        title = quoted(&path_arg(&text.title)),
        title_size = title_size,
        title_y = (hf * 0.02) as u32,
    );

    let image_y = (hf * 0.02 + text.title_lines as f64 * f64::from(title_size + 8) + hf * 0.03) as u32;
    let image_max_w = (f64::from(w) * 0.96) as u32;
    let image_max_h = (hf * 0.45) as u32;

    let mut last = "base".to_string();
    for (i, image) in plan.images.iter().enumerate() {
        let input = i + 2;
        let _ = write!(
            graph,
            ";[{input}:v]scale={mw}:{mh}:force_original_aspect_ratio=decrease[img{i}];\
             [{last}][img{i}]overlay=x=(W-w)/2:y={y}:enable='gte(t,{start:.3})*lt(t,{end:.3})'[ov{i}]",
            input = input,
            mw = image_max_w,
            mh = image_max_h,
            i = i,
            last = last,
            y = image_y,
            start = image.start,
            end = image.end,
        );
        last = format!("ov{}", i);
    }

    let _ = write!(graph, ";[{}]", last);
    if text.captions.is_empty() {
        graph.push_str("null");
    }
    for (i, (caption, file)) in plan.captions.iter().zip(&text.captions).enumerate() {
        if i > 0 {
            graph.push(',');
        }
        let _ = write!(
            graph,
            "drawtext={font}textfile={file}:expansion=none:fontsize={size}:fontcolor=yellow:\
             box=1:boxcolor=black@0.7:boxborderw=12:line_spacing=6:\
             x=(w-text_w)/2:y=h-{margin}-text_h:enable='gte(t,{start:.3})*lt(t,{end:.3})'",
            font = font,
            file = quoted(&path_arg(file)),
            size = caption_size,
            margin = (hf * CAPTION_BOTTOM_MARGIN) as u32,
            start = caption.start,
            end = caption.end,
        );
    }
    graph.push_str("[v]");

    graph
}

/// Full ffmpeg argument list for `plan`, writing to `output`
pub fn build_args(plan: &RenderPlan, text: &TextFiles, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if plan.loop_background {
        args.extend(["-stream_loop".to_string(), "-1".to_string()]);
    }
    args.extend([
        "-ss".to_string(),
        format!("{:.3}", plan.background_offset),
        "-i".to_string(),
        path_arg(&plan.background),
        "-i".to_string(),
        path_arg(&plan.audio),
    ]);

    for image in &plan.images {
        args.extend([
            "-loop".to_string(),
            "1".to_string(),
            "-t".to_string(),
            format!("{:.3}", plan.duration_secs),
            "-i".to_string(),
            path_arg(&image.path),
        ]);
    }

    let duration = format!("{:.3}", plan.duration_secs);
    let fps = plan.fps.to_string();
    let graph = filter_graph(plan, text);
    args.extend(
        [
            "-filter_complex",
            graph.as_str(),
            "-map",
            "[v]",
            "-map",
            "1:a:0",
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-pix_fmt",
            "yuv420p",
            "-r",
            fps.as_str(),
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            "-t",
            duration.as_str(),
            "-movflags",
            "+faststart",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(path_arg(output));

    args
}
