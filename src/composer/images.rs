use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::ImageFetcher;

/// Downloads overlay images over HTTP
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &str, target: &Path) -> anyhow::Result<()> {
        let response = self.client.get(url).send().await?.error_for_status()?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type.starts_with("image/svg") {
            anyhow::bail!("SVG images are not supported");
        }
        if !content_type.is_empty() && !content_type.starts_with("image/") {
            anyhow::bail!("unexpected content type {}", content_type);
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

/// Extension from the URL path, if it looks like a raster image
pub fn image_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let name = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(name).ok()?;
    let ext = Path::new(&*decoded).extension()?.to_string_lossy().to_lowercase();

    let raster = matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp");
    raster.then_some(ext)
}

/// Wiki image URLs often end in `/revision/latest?cb=...`; find the file
/// name segment instead of the last one
fn wiki_image_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter_map(|segment| {
            let decoded = urlencoding::decode(segment).ok()?;
            let ext = Path::new(&*decoded).extension()?.to_string_lossy().to_lowercase();
            Some(ext)
        })
        .last()
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, urls: &[String], dir: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        for (i, url) in urls.iter().enumerate() {
            let ext = match image_extension(url).or_else(|| wiki_image_extension(url)) {
                Some(ext) if ext != "svg" => ext,
                Some(_) => {
                    tracing::debug!("Skipping SVG image {}", url);
                    continue;
                }
                None => "img".to_string(),
            };

            let target = dir.join(format!("image_{:02}.{}", i, ext));
            match self.download(url, &target).await {
                Ok(()) => paths.push(target),
                Err(e) => {
                    tracing::warn!("Skipping image {}: {}", url, e);
                    let _ = fs_err::remove_file(&target);
                }
            }
        }

        paths
    }
}
